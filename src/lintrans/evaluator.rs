use std::{collections::HashMap, sync::Arc};

use tracing::{debug, instrument, trace};

use crate::{
    error::{Error, Result},
    evaluator::{check_gadget, AutomorphismOps, KeySwitchOps, RingOps, ShallowCopy},
    Ciphertext,
    Parameters,
    Poly,
    PolyQP,
};
use super::transform::LinearTransformation;

/// Scratch space of a [LinearTransformationEvaluator].
#[derive(Clone, Debug)]
struct LinearTransformationBuffers {
    decomp: Vec<PolyQP>,
    // P * c0, P * c1
    ct: [Poly; 2],
    rotated: [PolyQP; 2],
    inner: [PolyQP; 2],
    switched: [PolyQP; 2],
    acc: [PolyQP; 2],
    // hoisted rotations of the input by baby steps, left multiplied by P
    pre_rotated: HashMap<usize, [PolyQP; 2]>,
}

impl LinearTransformationBuffers {

    fn new(params: &Parameters) -> Self {
        let n = params.n();
        let (level_q, level_p) = (params.max_level(), params.max_level_p());
        let qp = || -> [PolyQP; 2] {std::array::from_fn(|_| PolyQP::new(n, level_q, level_p))};
        LinearTransformationBuffers {
            decomp: (0..params.beta(level_q)).map(|_| PolyQP::new(n, level_q, level_p)).collect(),
            ct: std::array::from_fn(|_| params.ring_q().new_poly_max()),
            rotated: qp(),
            inner: qp(),
            switched: qp(),
            acc: qp(),
            pre_rotated: HashMap::new(),
        }
    }

}

/// Brings `polys` back into `[0, q)` once `count` lazy terms were added, unless
/// the last term already triggered a flush.
fn flush(params: &Parameters, level_q: usize, level_p: usize, count: usize, margins: (usize, usize), polys: &mut [PolyQP]) {
    let (margin_q, margin_p) = margins;
    for poly in polys.iter_mut() {
        if count % margin_q != 0 {
            params.ring_q().reduce_assign(level_q, &mut poly.q);
        }
        if count % margin_p != 0 {
            params.ring_p().reduce_assign(level_p, &mut poly.p);
        }
    }
}

/// Reduces `polys` after the term of index `i` when the margins say so.
fn reduce_periodic(params: &Parameters, level_q: usize, level_p: usize, i: usize, margins: (usize, usize), polys: &mut [PolyQP]) {
    let (margin_q, margin_p) = margins;
    for poly in polys.iter_mut() {
        if i % margin_q == margin_q - 1 {
            params.ring_q().reduce_assign(level_q, &mut poly.q);
        }
        if i % margin_p == margin_p - 1 {
            params.ring_p().reduce_assign(level_p, &mut poly.p);
        }
    }
}

/// Evaluates [LinearTransformation]s on ciphertexts.
///
/// The evaluator is generic over the capabilities it needs from the
/// underlying ciphertext evaluator, [crate::Evaluator] being the one provided
/// by this crate. The input is decomposed once per call and level; every
/// rotation then reuses that decomposition.
///
/// Two strategies are used depending on the giant step `n1` of the
/// transformation:
///
/// - `n1 == 0`: one hoisted rotation per non-zero diagonal, multiplied by the
///   diagonal and accumulated over QP, followed by a single division by P;
/// - `n1 > 0`: the input is rotated once per distinct baby step, the products
///   with the pre-rotated diagonals are summed per giant step, and every
///   non-zero giant step costs one key switch of that partial sum.
///
/// The output carries the scale of the input times the scale of the diagonals.
pub struct LinearTransformationEvaluator<E> {
    eval: E,
    buffers: LinearTransformationBuffers,
}

impl<E: std::fmt::Debug> std::fmt::Debug for LinearTransformationEvaluator<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinearTransformationEvaluator")
            .field("eval", &self.eval)
            .field("pre_rotated", &self.buffers.pre_rotated.len())
            .finish()
    }
}

impl<E> LinearTransformationEvaluator<E>
where
    E: RingOps + KeySwitchOps + AutomorphismOps,
{

    /// Wraps `eval`.
    pub fn new(eval: E) -> Self {
        let buffers = LinearTransformationBuffers::new(eval.parameters());
        LinearTransformationEvaluator { eval, buffers }
    }

    /// The wrapped evaluator.
    pub fn evaluator(&self) -> &E {&self.eval}

    /// The wrapped evaluator, mutably.
    pub fn evaluator_mut(&mut self) -> &mut E {&mut self.eval}

    /// Unwraps the evaluator.
    pub fn into_inner(self) -> E {self.eval}

    /// Evaluates `lt` on `op0` into `out`, at the smallest level among `op0`,
    /// `lt` and `out`.
    pub fn evaluate(&mut self, op0: &Ciphertext, lt: &LinearTransformation, out: &mut Ciphertext) -> Result<()> {
        self.evaluate_many(op0, std::slice::from_ref(lt), std::slice::from_mut(out))
    }

    /// See [Self::evaluate]. The output is allocated at the level of `lt`.
    pub fn evaluate_new(&mut self, op0: &Ciphertext, lt: &LinearTransformation) -> Result<Ciphertext> {
        let mut out = Ciphertext::new(self.eval.parameters(), 1, lt.level_q());
        self.evaluate(op0, lt, &mut out)?;
        Ok(out)
    }

    /// Evaluates every transformation of `lts` on `op0`, the i-th result going
    /// into `outs[i]`. Decompositions and baby-step rotations of `op0` are
    /// shared between the transformations.
    ///
    /// Fails with [Error::OutputTooSmall] when `outs` is shorter than `lts` and
    /// with [Error::LevelMismatch] when the transformations disagree on their
    /// level over P. The first failing transformation aborts the call.
    #[instrument(skip_all, fields(transformations = lts.len()))]
    pub fn evaluate_many(&mut self, op0: &Ciphertext, lts: &[LinearTransformation], outs: &mut [Ciphertext]) -> Result<()> {
        if outs.len() < lts.len() {
            return Err(Error::OutputTooSmall(format!(
                "{} outputs for {} linear transformations", outs.len(), lts.len()
            )));
        }
        if op0.degree() != 1 {
            return Err(Error::InvalidOperand(format!(
                "linear transformations need a degree one ciphertext, got degree {}", op0.degree()
            )));
        }
        let Some(first) = lts.first() else {
            return Ok(());
        };
        let params = self.eval.parameters().clone();
        let level_p = first.level_p();
        for lt in lts {
            if lt.level_p() != level_p {
                return Err(Error::LevelMismatch { expected: level_p, got: lt.level_p() });
            }
            if lt.parameters_id() != params.id() {
                return Err(Error::InvalidParameters(
                    "linear transformation and evaluator use different parameters".to_string()
                ));
            }
        }
        if level_p != params.max_level_p() {
            return Err(Error::LevelMismatch { expected: params.max_level_p(), got: level_p });
        }

        self.buffers.pre_rotated.clear();
        let mut decomposed = None;
        for (lt, out) in lts.iter().zip(outs.iter_mut()) {
            let level = op0.level().min(lt.level_q()).min(out.level());
            let grid = lt.bsgs_index();
            let rotates = grid.baby_steps.iter().any(|&i| i != 0);
            if rotates && decomposed != Some(level) {
                self.eval.decompose_ntt(level, &op0.value()[1], &mut self.buffers.decomp);
                self.buffers.pre_rotated.clear();
                decomposed = Some(level);
            }
            debug!(level, n1 = lt.n1(), giants = grid.giant_steps.len(), babies = grid.baby_steps.len(), "evaluate");
            if lt.n1() == 0 {
                self.multiply_naive(&params, level, op0, lt, out)?;
            } else {
                self.pre_rotate(&params, level, op0, &grid.baby_steps)?;
                self.multiply_bsgs(&params, level, op0, lt, out)?;
            }
            *out.meta_mut() = *op0.meta();
            out.set_scale(op0.scale().mul(lt.scale(), params.plaintext_modulus()));
        }
        Ok(())
    }

    /// See [Self::evaluate_many]. Every output is allocated at the level of its transformation.
    pub fn evaluate_many_new(&mut self, op0: &Ciphertext, lts: &[LinearTransformation]) -> Result<Vec<Ciphertext>> {
        let params = self.eval.parameters().clone();
        let mut outs: Vec<Ciphertext> = lts.iter().map(|lt| Ciphertext::new(&params, 1, lt.level_q())).collect();
        self.evaluate_many(op0, lts, &mut outs)?;
        Ok(outs)
    }

    /// Computes `lts[k-1](... lts[1](lts[0](op0)))`, rescaling after every
    /// transformation. An empty `lts` copies `op0`.
    #[instrument(skip_all, fields(transformations = lts.len()))]
    pub fn evaluate_sequential(&mut self, op0: &Ciphertext, lts: &[LinearTransformation], out: &mut Ciphertext) -> Result<()> {
        let Some((first, rest)) = lts.split_first() else {
            out.copy_from(op0);
            return Ok(());
        };
        self.evaluate(op0, first, out)?;
        self.eval.rescale_assign(out)?;
        for lt in rest {
            let input = out.clone();
            self.evaluate(&input, lt, out)?;
            self.eval.rescale_assign(out)?;
        }
        Ok(())
    }

    /// See [Self::evaluate_sequential]. The output is allocated at the level of the first transformation.
    pub fn evaluate_sequential_new(&mut self, op0: &Ciphertext, lts: &[LinearTransformation]) -> Result<Ciphertext> {
        let level = lts.first().map_or(op0.level(), LinearTransformation::level_q);
        let mut out = Ciphertext::new(self.eval.parameters(), 1, level);
        self.evaluate_sequential(op0, lts, &mut out)?;
        Ok(out)
    }

    /// One hoisted rotation per non-zero diagonal, accumulated over QP.
    fn multiply_naive(
        &mut self, params: &Parameters, level: usize, op0: &Ciphertext, lt: &LinearTransformation, out: &mut Ciphertext,
    ) -> Result<()> {
        let (ring_q, ring_p) = (params.ring_q(), params.ring_p());
        let level_p = lt.level_p();
        let margins = (params.qi_overflow_margin(), params.pi_overflow_margin());
        let rotations: Vec<usize> = lt.bsgs_index().baby_steps.iter().copied().filter(|&k| k != 0).collect();

        let LinearTransformationEvaluator { eval, buffers } = self;
        let LinearTransformationBuffers { decomp, rotated, acc, .. } = buffers;
        for (i, &k) in rotations.iter().enumerate() {
            let Some(diagonal) = lt.diagonal(k) else {
                panic!("[Logic error] Diagonal {} was allocated with the grid.", k);
            };
            eval.automorphism_hoisted_lazy(level, op0, &decomp[..], params.galois_element(k as isize), rotated)?;
            for (sum, term) in acc.iter_mut().zip(rotated.iter()) {
                if i == 0 {
                    ring_q.mul_coeffs_montgomery(level, &diagonal.q, &term.q, &mut sum.q);
                    ring_p.mul_coeffs_montgomery(level_p, &diagonal.p, &term.p, &mut sum.p);
                } else {
                    ring_q.mul_coeffs_montgomery_then_add_lazy(level, &diagonal.q, &term.q, &mut sum.q);
                    ring_p.mul_coeffs_montgomery_then_add_lazy(level_p, &diagonal.p, &term.p, &mut sum.p);
                }
            }
            reduce_periodic(params, level, level_p, i, margins, acc);
        }

        out.resize(1, level);
        if rotations.is_empty() {
            out.value_mut().iter_mut().for_each(Poly::zero);
        } else {
            flush(params, level, level_p, rotations.len(), margins, acc);
            trace!(terms = rotations.len(), "naive accumulation flushed");
            for (dst, sum) in out.value_mut().iter_mut().zip(acc.iter()) {
                dst.copy_from(level, &sum.q);
                eval.mod_down_qp_to_q_ntt(level, dst, &sum.p);
            }
        }

        if let Some(diagonal) = lt.diagonal(0) {
            for (dst, src) in out.value_mut().iter_mut().zip(op0.value()) {
                ring_q.mul_coeffs_montgomery_then_add(level, &diagonal.q, src, dst);
            }
        }
        Ok(())
    }

    /// Fills the cache with the hoisted rotations of `op0` by every non-zero
    /// baby step, dropping the cached rotations `babies` does not list.
    fn pre_rotate(&mut self, params: &Parameters, level: usize, op0: &Ciphertext, babies: &[usize]) -> Result<()> {
        let (n, level_p) = (params.n(), params.max_level_p());
        let LinearTransformationEvaluator { eval, buffers } = self;
        buffers.pre_rotated.retain(|i, _| babies.contains(i));
        for &i in babies {
            if i == 0 || buffers.pre_rotated.contains_key(&i) {
                continue;
            }
            let mut rotated: [PolyQP; 2] = std::array::from_fn(|_| PolyQP::new(n, level, level_p));
            eval.automorphism_hoisted_lazy(level, op0, &buffers.decomp, params.galois_element(i as isize), &mut rotated)?;
            buffers.pre_rotated.insert(i, rotated);
        }
        Ok(())
    }

    /// Baby-step giant-step evaluation over the cache filled by [Self::pre_rotate].
    fn multiply_bsgs(
        &mut self, params: &Parameters, level: usize, op0: &Ciphertext, lt: &LinearTransformation, out: &mut Ciphertext,
    ) -> Result<()> {
        let (ring_q, ring_p) = (params.ring_q(), params.ring_p());
        let level_p = lt.level_p();
        // the outer sum adds partial sums that are themselves lazy
        let margins = ((params.qi_overflow_margin() >> 1).max(1), (params.pi_overflow_margin() >> 1).max(1));
        let keys = self.eval.evaluation_keys();

        let LinearTransformationEvaluator { eval, buffers } = self;
        let LinearTransformationBuffers { ct, inner, switched, acc, pre_rotated, .. } = buffers;
        for (dst, src) in ct.iter_mut().zip(op0.value()) {
            ring_q.mul_rns_scalar_montgomery(level, src, params.p_mod_q_montgomery(), dst);
        }

        let index = &lt.bsgs_index().index;
        for (outer, (&j, babies)) in index.iter().enumerate() {
            for (cnt, &i) in babies.iter().enumerate() {
                let Some(diagonal) = lt.diagonal(j + i) else {
                    panic!("[Logic error] Diagonal {} was allocated with the grid.", j + i);
                };
                if i == 0 {
                    // P * c vanishes modulo P
                    for (sum, term) in inner.iter_mut().zip(ct.iter()) {
                        if cnt == 0 {
                            ring_q.mul_coeffs_montgomery(level, &diagonal.q, term, &mut sum.q);
                            sum.p.zero();
                        } else {
                            ring_q.mul_coeffs_montgomery_then_add_lazy(level, &diagonal.q, term, &mut sum.q);
                        }
                    }
                } else {
                    let Some(rotated) = pre_rotated.get(&i) else {
                        panic!("[Logic error] Baby step {} was pre-rotated.", i);
                    };
                    for (sum, term) in inner.iter_mut().zip(rotated.iter()) {
                        if cnt == 0 {
                            ring_q.mul_coeffs_montgomery(level, &diagonal.q, &term.q, &mut sum.q);
                            ring_p.mul_coeffs_montgomery(level_p, &diagonal.p, &term.p, &mut sum.p);
                        } else {
                            ring_q.mul_coeffs_montgomery_then_add_lazy(level, &diagonal.q, &term.q, &mut sum.q);
                            ring_p.mul_coeffs_montgomery_then_add_lazy(level_p, &diagonal.p, &term.p, &mut sum.p);
                        }
                    }
                }
                reduce_periodic(params, level, level_p, cnt, margins, inner);
            }
            flush(params, level, level_p, babies.len(), margins, inner);

            if j != 0 {
                let [inner0, inner1] = &mut *inner;
                eval.mod_down_qp_to_q_ntt(level, &mut inner1.q, &inner1.p);

                let galois_element = params.galois_element(j as isize);
                let key = keys.galois_key(galois_element)?;
                if key.gadget().level_p() != level_p {
                    return Err(Error::LevelMismatch { expected: level_p, got: key.gadget().level_p() });
                }
                check_gadget(params, key.gadget(), level)?;
                let permutation = eval.automorphism_index(galois_element);

                eval.gadget_product_lazy(level, &inner1.q, key.gadget(), switched);
                ring_q.add_assign(level, &inner0.q, &mut switched[0].q);
                ring_p.add_assign(level_p, &inner0.p, &mut switched[0].p);

                for (sum, term) in acc.iter_mut().zip(switched.iter()) {
                    if outer == 0 {
                        ring_q.automorphism_ntt_with_index(level, &term.q, &permutation, &mut sum.q);
                        ring_p.automorphism_ntt_with_index(level_p, &term.p, &permutation, &mut sum.p);
                    } else {
                        ring_q.automorphism_ntt_with_index_then_add_lazy(level, &term.q, &permutation, &mut sum.q);
                        ring_p.automorphism_ntt_with_index_then_add_lazy(level_p, &term.p, &permutation, &mut sum.p);
                    }
                }
            } else {
                for (sum, term) in acc.iter_mut().zip(inner.iter()) {
                    if outer == 0 {
                        sum.copy_from(level, level_p, term);
                    } else {
                        ring_q.add_lazy_assign(level, &term.q, &mut sum.q);
                        ring_p.add_lazy_assign(level_p, &term.p, &mut sum.p);
                    }
                }
            }
            reduce_periodic(params, level, level_p, outer, margins, acc);
        }
        flush(params, level, level_p, index.len(), margins, acc);
        trace!(giants = index.len(), "bsgs accumulation flushed");

        out.resize(1, level);
        for (dst, sum) in out.value_mut().iter_mut().zip(acc.iter()) {
            dst.copy_from(level, &sum.q);
            eval.mod_down_qp_to_q_ntt(level, dst, &sum.p);
        }
        Ok(())
    }

}

impl<E> ShallowCopy for LinearTransformationEvaluator<E>
where
    E: RingOps + KeySwitchOps + AutomorphismOps + ShallowCopy,
{
    fn shallow_copy(&self) -> Self {
        LinearTransformationEvaluator::new(self.eval.shallow_copy())
    }
}

impl<E: RingOps> LinearTransformationEvaluator<E> {

    /// The parameters of the wrapped evaluator.
    pub fn parameters(&self) -> &Arc<Parameters> {self.eval.parameters()}

}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{seq::SliceRandom, Rng, SeedableRng};
    use crate::{
        create_bgv_suite,
        BgvSuite,
        BsgsRatio,
        Diagonals,
        Evaluator,
        LinearTransformationParameters,
        Permutation,
        PermutationMapping,
        Scale,
    };

    const T: u64 = 65537;
    const SLOTS: usize = 8;

    fn suite() -> BgvSuite {
        create_bgv_suite(4, vec![50, 50, 50], vec![60], T, &[])
    }

    fn transformation(suite: &BgvSuite, diagonals: &Diagonals, scale: u64, ratio: BsgsRatio) -> LinearTransformation {
        let lt_params = LinearTransformationParameters::new(&suite.params, diagonals.index_list(), Scale::new(scale), ratio);
        LinearTransformation::new(&suite.params, &lt_params).encode(&suite.encoder, diagonals).unwrap()
    }

    fn lt_evaluator(suite: &mut BgvSuite, lts: &[&LinearTransformation]) -> LinearTransformationEvaluator<Evaluator> {
        let mut elements: Vec<u64> = lts.iter().flat_map(|lt| lt.galois_elements(&suite.params)).collect();
        elements.sort();
        elements.dedup();
        let keys = suite.keygen.gen_evaluation_key_set(&suite.secret_key, &elements).unwrap();
        LinearTransformationEvaluator::new(suite.evaluator.with_keys(keys.into_shared()))
    }

    fn encrypt(suite: &mut BgvSuite, values: &[u64], scale: u64) -> Ciphertext {
        let pt = suite.encoder.encode_new(values, Scale::new(scale), suite.params.max_level()).unwrap();
        suite.encryptor.encrypt_new(&pt).unwrap()
    }

    fn decrypt(suite: &BgvSuite, ct: &Ciphertext) -> Vec<u64> {
        suite.encoder.decode(&suite.decryptor.decrypt_new(ct)).unwrap()
    }

    fn random_values(rng: &mut impl Rng) -> Vec<u64> {
        (0..2 * SLOTS).map(|_| rng.gen_range(0..T)).collect()
    }

    fn tridiagonal() -> Diagonals {
        [-1, 0, 1].into_iter().map(|k| (k, vec![1u64; 2 * SLOTS])).collect()
    }

    #[test]
    fn test_tridiagonal_naive_and_bsgs() {
        let mut suite = suite();
        let values: Vec<u64> = (1..=2 * SLOTS as u64).collect();
        let ct = encrypt(&mut suite, &values, 1);

        let mut expected = vec![0; 2 * SLOTS];
        for row in 0..2 {
            let v = &values[row * SLOTS..(row + 1) * SLOTS];
            for x in 0..SLOTS {
                expected[row * SLOTS + x] = v[(x + SLOTS - 1) % SLOTS] + v[x] + v[(x + 1) % SLOTS];
            }
        }

        let naive = transformation(&suite, &tridiagonal(), 1, BsgsRatio::Disabled);
        let bsgs = transformation(&suite, &tridiagonal(), 1, BsgsRatio::Fixed(2));
        assert_eq!(naive.n1(), 0);
        assert_eq!(bsgs.n1(), 2);
        let mut lt_eval = lt_evaluator(&mut suite, &[&naive, &bsgs]);

        let naive_out = lt_eval.evaluate_new(&ct, &naive).unwrap();
        let bsgs_out = lt_eval.evaluate_new(&ct, &bsgs).unwrap();
        assert_eq!(decrypt(&suite, &naive_out), expected);
        assert_eq!(decrypt(&suite, &bsgs_out), expected);
        assert_eq!(naive_out.level(), suite.params.max_level());
    }

    #[test]
    fn test_random_diagonals_every_ratio() {
        let mut suite = suite();
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
        let diagonals: Diagonals = [-3, -1, 0, 2, 3, 5].into_iter().map(|k| (k, random_values(&mut rng))).collect();
        let values = random_values(&mut rng);
        let expected = diagonals.evaluate_plain(&values, suite.params.plaintext_modulus()).unwrap();
        let ct = encrypt(&mut suite, &values, 1);

        let ratios = [
            BsgsRatio::Disabled,
            BsgsRatio::Fixed(1),
            BsgsRatio::Fixed(2),
            BsgsRatio::Fixed(4),
            BsgsRatio::Fixed(8),
            BsgsRatio::Optimal,
            BsgsRatio::LogRatio(1),
        ];
        let lts: Vec<LinearTransformation> = ratios.iter().map(|&r| transformation(&suite, &diagonals, 1, r)).collect();
        let mut lt_eval = lt_evaluator(&mut suite, &lts.iter().collect::<Vec<_>>());
        let outs = lt_eval.evaluate_many_new(&ct, &lts).unwrap();
        for (out, ratio) in outs.iter().zip(ratios) {
            assert_eq!(decrypt(&suite, out), expected, "ratio {:?}", ratio);
        }
    }

    #[test]
    fn test_identity_and_zero_rotation() {
        let mut suite = suite();
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
        let values = random_values(&mut rng);
        let ct = encrypt(&mut suite, &values, 1);

        let identity: Diagonals = [(0, vec![1u64; 2 * SLOTS])].into_iter().collect();
        let weights = random_values(&mut rng);
        let pointwise: Diagonals = [(0, weights.clone())].into_iter().collect();
        for ratio in [BsgsRatio::Disabled, BsgsRatio::Optimal] {
            let lt = transformation(&suite, &identity, 1, ratio);
            assert!(lt.galois_elements(&suite.params).is_empty());
            // no key is needed
            let mut lt_eval = LinearTransformationEvaluator::new(suite.evaluator.shallow_copy());
            assert_eq!(decrypt(&suite, &lt_eval.evaluate_new(&ct, &lt).unwrap()), values);

            let lt = transformation(&suite, &pointwise, 1, ratio);
            let expected: Vec<u64> = values.iter().zip(&weights).map(|(&a, &b)| ((a as u128 * b as u128) % T as u128) as u64).collect();
            assert_eq!(decrypt(&suite, &lt_eval.evaluate_new(&ct, &lt).unwrap()), expected);
        }
    }

    #[test]
    fn test_aliased_diagonals() {
        let mut suite = suite();
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
        let diagonal = random_values(&mut rng);
        let values = random_values(&mut rng);
        let ct = encrypt(&mut suite, &values, 1);

        let negative: Diagonals = [(-1, diagonal.clone()), (2, diagonal.clone())].into_iter().collect();
        let positive: Diagonals = [(7, diagonal.clone()), (-6, diagonal)].into_iter().collect();
        let lts = [
            transformation(&suite, &negative, 1, BsgsRatio::Disabled),
            transformation(&suite, &positive, 1, BsgsRatio::Disabled),
            transformation(&suite, &negative, 1, BsgsRatio::Fixed(4)),
            transformation(&suite, &positive, 1, BsgsRatio::Fixed(4)),
        ];
        let mut lt_eval = lt_evaluator(&mut suite, &lts.iter().collect::<Vec<_>>());
        let outs = lt_eval.evaluate_many_new(&ct, &lts).unwrap();
        let expected = negative.evaluate_plain(&values, suite.params.plaintext_modulus()).unwrap();
        for out in &outs {
            assert_eq!(decrypt(&suite, out), expected);
        }
    }

    #[test]
    fn test_partial_permutation() {
        let mut suite = suite();
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
        let permutation = Permutation([0, 1].map(|_| {
            let mut to: Vec<usize> = (0..SLOTS).collect();
            to.shuffle(&mut rng);
            to.truncate(SLOTS / 2);
            to.into_iter().enumerate()
                .map(|(from, to)| PermutationMapping { from, to, scaling: rng.gen_range(0..T) })
                .collect()
        }));
        let diagonals = permutation.get_diagonals(suite.params.log_n());
        let values = random_values(&mut rng);
        let ct = encrypt(&mut suite, &values, 1);

        let mut expected = vec![0u64; 2 * SLOTS];
        for (row, mappings) in permutation.0.iter().enumerate() {
            for m in mappings {
                expected[row * SLOTS + m.to] = ((values[row * SLOTS + m.from] as u128 * m.scaling as u128) % T as u128) as u64;
            }
        }

        let lt = transformation(&suite, &diagonals, 1, BsgsRatio::LogRatio(1));
        let mut lt_eval = lt_evaluator(&mut suite, &[&lt]);
        let mut out = Ciphertext::new(&suite.params, 1, suite.params.max_level());
        lt_eval.evaluate(&ct, &lt, &mut out).unwrap();
        assert_eq!(decrypt(&suite, &out), expected);
    }

    #[test]
    fn test_permutation_round_trip() {
        let mut suite = suite();
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
        let permutation = Permutation([0, 1].map(|_| {
            let mut to: Vec<usize> = (0..SLOTS).collect();
            to.shuffle(&mut rng);
            to.into_iter().enumerate().map(|(from, to)| PermutationMapping { from, to, scaling: 1u64 }).collect()
        }));
        let log_n = suite.params.log_n();
        let forward = transformation(&suite, &permutation.get_diagonals(log_n), 1, BsgsRatio::Optimal);
        let backward = transformation(&suite, &permutation.transpose().get_diagonals(log_n), 1, BsgsRatio::Disabled);
        let values = random_values(&mut rng);
        let ct = encrypt(&mut suite, &values, 1);

        let mut lt_eval = lt_evaluator(&mut suite, &[&forward, &backward]);
        let out = lt_eval.evaluate_sequential_new(&ct, &[forward, backward]).unwrap();
        assert_eq!(out.level(), suite.params.max_level() - 2);
        assert_eq!(decrypt(&suite, &out), values);
    }

    #[test]
    fn test_scale_bookkeeping() {
        let mut suite = suite();
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
        let values = random_values(&mut rng);
        let ct = encrypt(&mut suite, &values, 5);
        let lt = transformation(&suite, &tridiagonal(), 3, BsgsRatio::Fixed(2));
        let mut lt_eval = lt_evaluator(&mut suite, &[&lt]);

        let out = lt_eval.evaluate_new(&ct, &lt).unwrap();
        assert_eq!(out.scale(), Scale::new(15));
        let expected = tridiagonal().evaluate_plain(&values, suite.params.plaintext_modulus()).unwrap();
        assert_eq!(decrypt(&suite, &out), expected);

        let t = suite.params.plaintext_modulus();
        let q_last = Scale::new(t.reduce(suite.params.ring_q().moduli()[2].value()));
        let sequential = lt_eval.evaluate_sequential_new(&ct, std::slice::from_ref(&lt)).unwrap();
        assert_eq!(sequential.scale(), Scale::new(15).div(q_last, t).unwrap());
        assert_eq!(decrypt(&suite, &sequential), expected);
    }

    #[test]
    fn test_level_capping() {
        let mut suite = suite();
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
        let values = random_values(&mut rng);
        let ct = encrypt(&mut suite, &values, 1);
        let lt_params = LinearTransformationParameters::new(&suite.params, tridiagonal().index_list(), Scale::one(), BsgsRatio::Fixed(2))
            .with_level(1);
        let lt = LinearTransformation::new(&suite.params, &lt_params).encode(&suite.encoder, &tridiagonal()).unwrap();
        let mut lt_eval = lt_evaluator(&mut suite, &[&lt]);

        let mut out = Ciphertext::new(&suite.params, 1, 2);
        lt_eval.evaluate(&ct, &lt, &mut out).unwrap();
        assert_eq!(out.level(), 1);
        let expected = tridiagonal().evaluate_plain(&values, suite.params.plaintext_modulus()).unwrap();
        assert_eq!(decrypt(&suite, &out), expected);

        let mut low = Ciphertext::new(&suite.params, 1, 0);
        lt_eval.evaluate(&ct, &lt, &mut low).unwrap();
        assert_eq!(low.level(), 0);
        assert_eq!(decrypt(&suite, &low), expected);
    }

    #[test]
    fn test_errors() {
        let mut suite = suite();
        let ct = encrypt(&mut suite, &[1, 2, 3], 1);
        let naive = transformation(&suite, &tridiagonal(), 1, BsgsRatio::Disabled);
        let bsgs = transformation(&suite, &tridiagonal(), 1, BsgsRatio::Fixed(2));

        let mut without_keys = LinearTransformationEvaluator::new(suite.evaluator.shallow_copy());
        assert!(matches!(without_keys.evaluate_new(&ct, &naive), Err(Error::MissingGaloisKey { .. })));
        assert!(matches!(without_keys.evaluate_new(&ct, &bsgs), Err(Error::MissingGaloisKey { .. })));

        let mut lt_eval = lt_evaluator(&mut suite, &[&naive]);
        let lts = [naive.clone(), naive];
        let mut outs = vec![Ciphertext::new(&suite.params, 1, 2)];
        assert!(matches!(lt_eval.evaluate_many(&ct, &lts, &mut outs), Err(Error::OutputTooSmall(_))));

        let square = suite.evaluator.mul_new(&ct, &ct).unwrap();
        assert!(matches!(lt_eval.evaluate_new(&square, &lts[0]), Err(Error::InvalidOperand(_))));

        let mut at_level_zero = ct.clone();
        at_level_zero.resize(1, 0);
        let sequential = lt_eval.evaluate_sequential_new(&at_level_zero, &lts[..1]);
        assert!(matches!(sequential, Err(Error::LevelTooLow { level: 0 })));
    }

    #[test]
    fn test_shallow_copy_matches() {
        let mut suite = suite();
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
        let values = random_values(&mut rng);
        let ct = encrypt(&mut suite, &values, 1);
        let lt = transformation(&suite, &tridiagonal(), 1, BsgsRatio::Optimal);
        let mut lt_eval = lt_evaluator(&mut suite, &[&lt]);
        let mut copy = lt_eval.shallow_copy();

        let a = lt_eval.evaluate_new(&ct, &lt).unwrap();
        let b = copy.evaluate_new(&ct, &lt).unwrap();
        assert_eq!(a.value(), b.value());
        assert!(std::ptr::eq(lt_eval.parameters().as_ref(), copy.parameters().as_ref()));
    }

    #[test]
    fn test_shallow_copies_in_parallel() {
        let mut suite = suite();
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
        let inputs: Vec<Vec<u64>> = (0..4).map(|_| random_values(&mut rng)).collect();
        let cts: Vec<Ciphertext> = inputs.iter().map(|values| encrypt(&mut suite, values, 1)).collect();
        let lt = transformation(&suite, &tridiagonal(), 1, BsgsRatio::Fixed(2));
        let lt_eval = lt_evaluator(&mut suite, &[&lt]);

        let outputs: Vec<Ciphertext> = std::thread::scope(|scope| {
            let handles: Vec<_> = cts.iter().map(|ct| {
                let mut worker = lt_eval.shallow_copy();
                let lt = &lt;
                scope.spawn(move || worker.evaluate_new(ct, lt).unwrap())
            }).collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let t = suite.params.plaintext_modulus();
        for (values, out) in inputs.iter().zip(&outputs) {
            assert_eq!(decrypt(&suite, out), tridiagonal().evaluate_plain(values, t).unwrap());
        }
    }
}
