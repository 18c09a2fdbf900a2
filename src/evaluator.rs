use std::{collections::HashMap, ptr, sync::Arc};

use tracing::{debug, instrument};

use crate::{
    error::{Error, Result},
    keyswitch::{self, KeySwitchScratch},
    BatchEncoder,
    Ciphertext,
    GadgetCiphertext,
    MemEvaluationKeySet,
    Parameters,
    Plaintext,
    Poly,
    PolyQP,
    Ring,
    Scale,
    SharedEvaluationKeySet,
};

/// Right-hand operand of the arithmetic entry points of [Evaluator].
///
/// Scalars and vectors are batch encoded on the fly into a scratch plaintext.
/// Vectors may be shorter than the slot count and are zero padded.
#[derive(Clone, Copy, Debug)]
pub enum Operand<'a> {
    /// A ciphertext of degree at most one (two for additions).
    Ciphertext(&'a Ciphertext),
    /// A plaintext produced by [BatchEncoder::encode].
    Plaintext(&'a Plaintext),
    /// The same value in every slot.
    Scalar(u64),
    /// One value per slot.
    Vector(&'a [u64]),
}

impl<'a> From<&'a Ciphertext> for Operand<'a> {
    fn from(value: &'a Ciphertext) -> Self {Operand::Ciphertext(value)}
}

impl<'a> From<&'a Plaintext> for Operand<'a> {
    fn from(value: &'a Plaintext) -> Self {Operand::Plaintext(value)}
}

impl From<u64> for Operand<'_> {
    fn from(value: u64) -> Self {Operand::Scalar(value)}
}

impl<'a> From<&'a [u64]> for Operand<'a> {
    fn from(value: &'a [u64]) -> Self {Operand::Vector(value)}
}

impl<'a> From<&'a Vec<u64>> for Operand<'a> {
    fn from(value: &'a Vec<u64>) -> Self {Operand::Vector(value)}
}

/// Level and scale management of ciphertexts.
pub trait RingOps {

    /// The parameters the evaluator works with.
    fn parameters(&self) -> &Arc<Parameters>;

    /// Divides `op0` by its last prime into `op1`, see [Evaluator::rescale].
    fn rescale(&mut self, op0: &Ciphertext, op1: &mut Ciphertext) -> Result<()>;

    /// In-place version of [RingOps::rescale].
    fn rescale_assign(&mut self, op: &mut Ciphertext) -> Result<()>;

}

/// Hybrid key switching primitives over the extended basis QP.
///
/// The lazy variants leave their result multiplied by P and do not divide it
/// back, so that several of them can be accumulated before a single
/// [KeySwitchOps::mod_down_qp_to_q_ntt].
pub trait KeySwitchOps {

    /// The key set used for relinearization and automorphisms.
    fn evaluation_keys(&self) -> SharedEvaluationKeySet;

    /// Writes the `beta(level_q)` gadget digits of `c` into `decomp`.
    fn decompose_ntt(&mut self, level_q: usize, c: &Poly, decomp: &mut [PolyQP]);

    /// Decomposes `c` and accumulates its digits against `gadget` into `out[0]` and `out[1]`.
    fn gadget_product_lazy(&mut self, level_q: usize, c: &Poly, gadget: &GadgetCiphertext, out: &mut [PolyQP]);

    /// Accumulates an already decomposed polynomial against `gadget` into `out[0]` and `out[1]`.
    fn gadget_product_hoisted_lazy(&self, level_q: usize, decomp: &[PolyQP], gadget: &GadgetCiphertext, out: &mut [PolyQP]);

    /// poly_q = round((poly_q, poly_p) / P) at `level_q`.
    fn mod_down_qp_to_q_ntt(&mut self, level_q: usize, poly_q: &mut Poly, poly_p: &Poly);

}

/// Galois automorphisms on ciphertexts.
pub trait AutomorphismOps {

    /// NTT-domain permutation of the automorphism X -> X^galois_element.
    fn automorphism_index(&self, galois_element: u64) -> Arc<Vec<usize>>;

    /// Applies the automorphism to `ct`, whose second polynomial was decomposed into
    /// `decomp`, leaving the result over QP multiplied by P in `out[0]` and `out[1]`.
    fn automorphism_hoisted_lazy(
        &mut self, level_q: usize, ct: &Ciphertext, decomp: &[PolyQP], galois_element: u64, out: &mut [PolyQP],
    ) -> Result<()>;

}

/// A copy that shares every read-only table and owns fresh scratch space.
pub trait ShallowCopy {

    /// See [ShallowCopy].
    fn shallow_copy(&self) -> Self;

}

/// Scratch space owned by one [Evaluator].
///
/// Nothing stored here outlives a single call.
#[derive(Clone, Debug)]
pub struct EvaluatorBuffers {
    decomp: Vec<PolyQP>,
    qp: [PolyQP; 4],
    q: [Poly; 4],
    qmul: [Poly; 7],
    ext: Vec<u64>,
    coeff: Vec<u64>,
    plaintext: Plaintext,
    key_switch: KeySwitchScratch,
}

impl EvaluatorBuffers {

    /// Allocates buffers for the largest level of `params`.
    pub fn new(params: &Parameters) -> Self {
        let n = params.n();
        let (level_q, level_p) = (params.max_level(), params.max_level_p());
        let level_qmul = params.level_qmul(level_q);
        EvaluatorBuffers {
            decomp: (0..params.beta(level_q)).map(|_| PolyQP::new(n, level_q, level_p)).collect(),
            qp: std::array::from_fn(|_| PolyQP::new(n, level_q, level_p)),
            q: std::array::from_fn(|_| params.ring_q().new_poly_max()),
            qmul: std::array::from_fn(|_| params.ring_qmul().new_poly_max()),
            ext: vec![0; n * (level_q.max(level_qmul) + 1)],
            coeff: vec![0; n],
            plaintext: Plaintext::new(params, level_q),
            key_switch: KeySwitchScratch::new(params),
        }
    }

}

/// Evaluates arithmetic circuits on [Ciphertext] objects.
///
/// A ciphertext at level l encrypts X = c0 + c1 * s with
/// X = T^{-1} * scale * m + e modulo q_0 * ... * q_l, every polynomial in NTT
/// representation. Operations come in two flavours:
///
/// - standard tensoring (BGV), where the noise grows with the message and
///   [Evaluator::rescale] divides it back by dropping a prime of Q;
/// - scale-invariant tensoring (BFV), which divides the tensor product by Q
///   over an auxiliary basis so that no rescaling is needed.
///
/// The `_new` variants allocate their output. Every other operation writes
/// into a caller-provided ciphertext, resizing it to the degree of the result
/// and to the smallest level among the inputs and the output.
///
/// Relinearization and automorphisms read keys from an [crate::EvaluationKeySet]
/// and fail with [Error::MissingRelinearizationKey] or [Error::MissingGaloisKey]
/// when the key is absent.
///
/// An evaluator owns scratch space and must not be shared between threads;
/// use [ShallowCopy::shallow_copy] to obtain one evaluator per thread.
pub struct Evaluator {
    params: Arc<Parameters>,
    keys: SharedEvaluationKeySet,
    encoder: Arc<BatchEncoder>,
    scale_invariant: bool,
    buffers: EvaluatorBuffers,
}

impl std::fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evaluator")
            .field("params", &self.params.id())
            .field("galois_elements", &self.keys.galois_elements())
            .field("scale_invariant", &self.scale_invariant)
            .finish()
    }
}

fn check_degree(ct: &Ciphertext) -> Result<()> {
    if ct.degree() > 1 {
        return Err(Error::DegreeTooLarge { degree: ct.degree() });
    }
    Ok(())
}

fn check_plaintext(pt: &Plaintext) -> Result<()> {
    if !pt.meta().is_ntt || pt.meta().is_montgomery {
        return Err(Error::InvalidOperand(
            "plaintext must be in NTT representation and out of Montgomery form".to_string()
        ));
    }
    Ok(())
}

fn check_scales(params: &Parameters, expected: Scale, got: Scale) -> Result<()> {
    if !expected.equal_mod(&got, params.plaintext_modulus()) {
        return Err(Error::InvalidOperand(format!(
            "scale mismatch: expected {}, got {}", expected.value(), got.value()
        )));
    }
    Ok(())
}

/// Checks that a key switching key covers `level_q` and was generated at level P.
pub(crate) fn check_gadget(params: &Parameters, gadget: &GadgetCiphertext, level_q: usize) -> Result<()> {
    if gadget.level_p() != params.max_level_p() {
        return Err(Error::LevelMismatch { expected: params.max_level_p(), got: gadget.level_p() });
    }
    if gadget.level_q() < level_q || gadget.beta() < params.beta(level_q) {
        return Err(Error::LevelMismatch { expected: level_q, got: gadget.level_q() });
    }
    Ok(())
}

/// out[i + j] = sum of lhs[i] * rhs[j], with `lhs` in Montgomery form.
///
/// When `square` is set `lhs` and `rhs` hold the same ciphertext up to the
/// lhs scaling, and the cross term is computed once and doubled.
fn tensor(ring: &Ring, level: usize, lhs: &[Poly], rhs: &[Poly], square: bool, out: &mut [Poly]) {
    if square && lhs.len() == 2 && rhs.len() == 2 {
        ring.mul_coeffs_montgomery(level, &lhs[0], &rhs[0], &mut out[0]);
        ring.mul_coeffs_montgomery(level, &lhs[0], &rhs[1], &mut out[1]);
        ring.mul_scalar_assign(level, 2, &mut out[1]);
        ring.mul_coeffs_montgomery(level, &lhs[1], &rhs[1], &mut out[2]);
        return;
    }
    let mut written = [false; 3];
    for (i, a) in lhs.iter().enumerate() {
        for (j, b) in rhs.iter().enumerate() {
            if written[i + j] {
                ring.mul_coeffs_montgomery_then_add(level, a, b, &mut out[i + j]);
            } else {
                ring.mul_coeffs_montgomery(level, a, b, &mut out[i + j]);
                written[i + j] = true;
            }
        }
    }
}

/// Extends `src` from Q_level to the auxiliary basis, in NTT representation.
fn mod_up_and_ntt(params: &Parameters, level: usize, level_qmul: usize, src: &Poly, coeff: &mut Poly, dst: &mut Poly) {
    let n = params.n();
    coeff.copy_from(level, src);
    params.ring_q().intt_assign(level, coeff);
    params.q_to_qmul(level).mod_up(n, coeff.data_at_level(level), &mut dst.data_mut()[..(level_qmul + 1) * n]);
    params.ring_qmul().ntt_assign(level_qmul, dst);
}

/// Given c over Q (`c_q`) and over the auxiliary basis (`c_qmul`), both in NTT
/// representation, writes T * round(c / Q) into `c_q`.
fn quantize(params: &Parameters, level: usize, level_qmul: usize, ext: &mut [u64], c_q: &mut Poly, c_qmul: &mut Poly) {
    let n = params.n();
    let ring_q = params.ring_q();
    ring_q.intt_assign(level, c_q);
    params.ring_qmul().intt_assign(level_qmul, c_qmul);

    let to_qmul = params.q_to_qmul(level);
    let ext = &mut ext[..(level_qmul + 1) * n];
    to_qmul.mod_up(n, c_q.data_at_level(level), ext);
    to_qmul.mod_down_finish(n, ext, &mut c_qmul.data_mut()[..(level_qmul + 1) * n]);

    params.qmul_to_q(level).mod_up(n, c_qmul.data_at_level(level_qmul), &mut c_q.data_mut()[..(level + 1) * n]);
    ring_q.mul_scalar_assign(level, params.plaintext_modulus().value(), c_q);
    ring_q.ntt_assign(level, c_q);
}

/// Writes round(X / q_level) modulo Q_{level - 1} into `low`, given the last
/// residue `last` of X and, in `low`, its other residues.
fn divide_round_by_last_modulus(
    params: &Parameters, coeff: &mut [u64], ext: &mut [u64], level: usize, last: &[u64], low: &mut [u64],
) {
    let n = params.n();
    let ring_q = params.ring_q();
    coeff.copy_from_slice(last);
    ring_q.intt_residue(level, coeff);
    let converter = params.rescale_converter(level);
    let ext = &mut ext[..level * n];
    converter.mod_up(n, coeff, ext);
    for (j, residue) in ext.chunks_exact_mut(n).enumerate() {
        ring_q.ntt_residue(j, residue);
    }
    converter.mod_down_finish(n, ext, low);
}

/// Adds the relinearization of `c2` into `low[0]` and `low[1]`.
fn relinearize_into(
    params: &Parameters, key_switch: &mut KeySwitchScratch, decomp: &mut [PolyQP], qp: &mut [PolyQP],
    gadget: &GadgetCiphertext, level: usize, c2: &Poly, low: &mut [Poly],
) {
    keyswitch::gadget_product(params, key_switch, level, c2, gadget, decomp, &mut qp[..2]);
    let ring_q = params.ring_q();
    for (acc, ks) in low.iter_mut().zip(qp.iter()) {
        ring_q.add_assign(level, &ks.q, acc);
    }
}

impl Evaluator {

    /// Creates a standard (BGV) evaluator. Without keys, every relinearization and
    /// automorphism fails with a missing key error.
    pub fn new(params: Arc<Parameters>, keys: Option<SharedEvaluationKeySet>) -> Self {
        let keys = keys.unwrap_or_else(|| MemEvaluationKeySet::default().into_shared());
        let buffers = EvaluatorBuffers::new(&params);
        let encoder = Arc::new(BatchEncoder::new(params.clone()));
        Evaluator { params, keys, encoder, scale_invariant: false, buffers }
    }

    /// Selects scale-invariant (BFV) tensoring for [Evaluator::mul] and
    /// [Evaluator::mul_relin], which also turns [Evaluator::rescale] into a copy.
    pub fn with_scale_invariant(mut self, scale_invariant: bool) -> Self {
        self.scale_invariant = scale_invariant;
        self
    }

    /// Whether tensoring is scale-invariant.
    pub fn is_scale_invariant(&self) -> bool {self.scale_invariant}

    /// The parameters the evaluator works with.
    pub fn parameters(&self) -> &Arc<Parameters> {&self.params}

    /// The batch encoder used for scalar and vector operands.
    pub fn encoder(&self) -> &BatchEncoder {&self.encoder}

    /// Replaces the key set, keeping the scratch space.
    pub fn with_keys(&self, keys: SharedEvaluationKeySet) -> Self {
        let mut copy = self.shallow_copy();
        copy.keys = keys;
        copy
    }

    fn new_ciphertext(&self, degree: usize, level: usize) -> Ciphertext {
        Ciphertext::new(&self.params, degree, level)
    }

    /// Encodes a scalar or vector operand into the scratch plaintext at `level`.
    fn encode_operand(encoder: &BatchEncoder, plaintext: &mut Plaintext, op: Operand, scale: Scale, level: usize) -> Result<()> {
        plaintext.resize(level);
        match op {
            Operand::Scalar(value) => encoder.encode(&vec![value; encoder.slot_count()], scale, plaintext),
            Operand::Vector(values) => encoder.encode(values, scale, plaintext),
            _ => Err(Error::InvalidOperand("only scalars and vectors are encoded".to_string())),
        }
    }

    /* ----------------------------- additions ----------------------------- */

    fn add_or_sub(&mut self, op0: &Ciphertext, op1: Operand, negate: bool, out: &mut Ciphertext) -> Result<()> {
        let Evaluator { params, encoder, buffers, .. } = self;
        let ring_q = params.ring_q();
        let pt = match op1 {
            Operand::Ciphertext(ct1) => {
                check_scales(params, op0.scale(), ct1.scale())?;
                let level = op0.level().min(ct1.level()).min(out.level());
                let degree = op0.degree().max(ct1.degree());
                out.resize(degree, level);
                for (i, dst) in out.value_mut().iter_mut().enumerate() {
                    match (op0.value().get(i), ct1.value().get(i)) {
                        (Some(a), Some(b)) if negate => ring_q.sub(level, a, b, dst),
                        (Some(a), Some(b)) => ring_q.add(level, a, b, dst),
                        (Some(a), None) => dst.copy_from(level, a),
                        (None, Some(b)) => {
                            dst.copy_from(level, b);
                            if negate {
                                ring_q.neg_assign(level, dst);
                            }
                        }
                        (None, None) => {}
                    }
                }
                *out.meta_mut() = *op0.meta();
                return Ok(());
            }
            Operand::Plaintext(pt) => {
                check_plaintext(pt)?;
                check_scales(params, op0.scale(), pt.scale())?;
                pt
            }
            Operand::Scalar(_) | Operand::Vector(_) => {
                let level = op0.level().min(out.level());
                Self::encode_operand(encoder, &mut buffers.plaintext, op1, op0.scale(), level)?;
                &buffers.plaintext
            }
        };

        let level = op0.level().min(pt.level()).min(out.level());
        out.resize(op0.degree(), level);
        for (dst, src) in out.value_mut().iter_mut().zip(op0.value()) {
            dst.copy_from(level, src);
        }
        if negate {
            ring_q.sub_assign(level, pt.value(), &mut out.value_mut()[0]);
        } else {
            ring_q.add_assign(level, pt.value(), &mut out.value_mut()[0]);
        }
        *out.meta_mut() = *op0.meta();
        Ok(())
    }

    /// out = op0 + op1. Both operands must have the same scale, the output takes the scale of op0.
    pub fn add<'b>(&mut self, op0: &Ciphertext, op1: impl Into<Operand<'b>>, out: &mut Ciphertext) -> Result<()> {
        self.add_or_sub(op0, op1.into(), false, out)
    }

    /// See [Self::add].
    pub fn add_new<'b>(&mut self, op0: &Ciphertext, op1: impl Into<Operand<'b>>) -> Result<Ciphertext> {
        let mut out = self.new_ciphertext(op0.degree(), op0.level());
        self.add(op0, op1, &mut out)?;
        Ok(out)
    }

    /// out = op0 - op1. Both operands must have the same scale, the output takes the scale of op0.
    pub fn sub<'b>(&mut self, op0: &Ciphertext, op1: impl Into<Operand<'b>>, out: &mut Ciphertext) -> Result<()> {
        self.add_or_sub(op0, op1.into(), true, out)
    }

    /// See [Self::sub].
    pub fn sub_new<'b>(&mut self, op0: &Ciphertext, op1: impl Into<Operand<'b>>) -> Result<Ciphertext> {
        let mut out = self.new_ciphertext(op0.degree(), op0.level());
        self.sub(op0, op1, &mut out)?;
        Ok(out)
    }

    /* ---------------------------- multiplications ---------------------------- */

    fn mul_standard(&mut self, op0: &Ciphertext, op1: Operand, relin: bool, out: &mut Ciphertext) -> Result<()> {
        check_degree(op0)?;
        let Evaluator { params, keys, encoder, buffers, .. } = self;
        let ring_q = params.ring_q();
        let t = params.plaintext_modulus();

        let pt = match op1 {
            Operand::Ciphertext(ct1) => {
                check_degree(ct1)?;
                let level = op0.level().min(ct1.level()).min(out.level());
                let degree = op0.degree() + ct1.degree();
                let rlk = if relin && degree == 2 {
                    let rlk = keys.relinearization_key()?;
                    check_gadget(params, rlk.gadget(), level)?;
                    Some(rlk)
                } else {
                    None
                };

                out.resize(degree, level);
                let lhs = &mut buffers.q[..=op0.degree()];
                for (dst, src) in lhs.iter_mut().zip(op0.value()) {
                    ring_q.mul_rns_scalar_montgomery(level, src, params.t_montgomery(), dst);
                }
                tensor(ring_q, level, lhs, ct1.value(), ptr::eq(op0, ct1), out.value_mut());

                *out.meta_mut() = *op0.meta();
                out.set_scale(op0.scale().mul(ct1.scale(), t));

                if let Some(rlk) = rlk {
                    let EvaluatorBuffers { decomp, qp, key_switch, .. } = buffers;
                    let (low, high) = out.value_mut().split_at_mut(2);
                    relinearize_into(params, key_switch, decomp, qp, rlk.gadget(), level, &high[0], low);
                    out.resize(1, level);
                }
                return Ok(());
            }
            Operand::Scalar(value) => {
                let level = op0.level().min(out.level());
                out.resize(op0.degree(), level);
                for (dst, src) in out.value_mut().iter_mut().zip(op0.value()) {
                    dst.copy_from(level, src);
                    ring_q.mul_scalar_assign(level, t.reduce(value), dst);
                }
                *out.meta_mut() = *op0.meta();
                return Ok(());
            }
            Operand::Plaintext(pt) => {
                check_plaintext(pt)?;
                pt
            }
            Operand::Vector(_) => {
                let level = op0.level().min(out.level());
                Self::encode_operand(encoder, &mut buffers.plaintext, op1, Scale::one(), level)?;
                &buffers.plaintext
            }
        };

        let level = op0.level().min(pt.level()).min(out.level());
        out.resize(op0.degree(), level);
        let c00 = &mut buffers.q[0];
        ring_q.mul_rns_scalar_montgomery(level, pt.value(), params.t_montgomery(), c00);
        for (dst, src) in out.value_mut().iter_mut().zip(op0.value()) {
            ring_q.mul_coeffs_montgomery(level, c00, src, dst);
        }
        *out.meta_mut() = *op0.meta();
        out.set_scale(op0.scale().mul(pt.scale(), t));
        Ok(())
    }

    fn mul_invariant(&mut self, op0: &Ciphertext, op1: Operand, relin: bool, out: &mut Ciphertext) -> Result<()> {
        let ct1 = match op1 {
            Operand::Ciphertext(ct1) if op0.degree() > 0 && ct1.degree() > 0 => ct1,
            _ => return self.mul_standard(op0, op1, relin, out),
        };
        check_degree(op0)?;
        check_degree(ct1)?;

        let Evaluator { params, keys, buffers, .. } = self;
        let (ring_q, ring_qmul) = (params.ring_q(), params.ring_qmul());
        let t = params.plaintext_modulus();
        let level = op0.level().min(ct1.level()).min(out.level());
        let level_qmul = params.level_qmul(level);
        let rlk = if relin {
            let rlk = keys.relinearization_key()?;
            check_gadget(params, rlk.gadget(), level)?;
            Some(rlk)
        } else {
            None
        };
        let square = ptr::eq(op0, ct1);
        let scale = op0.scale().mul(ct1.scale(), t)
            .div(Scale::new(params.neg_q_mod_t(level)), t)
            .ok_or_else(|| Error::InvalidOperand("-Q is not invertible modulo the plaintext modulus".to_string()))?;
        debug!(level, level_qmul, square, "scale-invariant tensoring");

        out.resize(2, level);
        {
            let EvaluatorBuffers { q, qmul, ext, .. } = buffers;
            let (lhs_q, rest_q) = q.split_at_mut(2);
            let coeff = &mut rest_q[1];
            let (operands, products) = qmul.split_at_mut(4);
            let (lhs_qmul, rhs_qmul) = operands.split_at_mut(2);

            for (src, dst) in op0.value().iter().zip(lhs_qmul.iter_mut()) {
                mod_up_and_ntt(params, level, level_qmul, src, coeff, dst);
            }
            if square {
                for (src, dst) in lhs_qmul.iter().zip(rhs_qmul.iter_mut()) {
                    dst.copy_from(level_qmul, src);
                }
            } else {
                for (src, dst) in ct1.value().iter().zip(rhs_qmul.iter_mut()) {
                    mod_up_and_ntt(params, level, level_qmul, src, coeff, dst);
                }
            }

            for (src, dst) in op0.value().iter().zip(lhs_q.iter_mut()) {
                dst.copy_from(level, src);
                ring_q.mform_assign(level, dst);
            }
            for lhs in lhs_qmul.iter_mut() {
                ring_qmul.mform_assign(level_qmul, lhs);
            }

            tensor(ring_q, level, lhs_q, ct1.value(), square, out.value_mut());
            tensor(ring_qmul, level_qmul, lhs_qmul, rhs_qmul, square, products);

            for (c_q, c_qmul) in out.value_mut().iter_mut().zip(products.iter_mut()) {
                quantize(params, level, level_qmul, ext, c_q, c_qmul);
            }
        }

        *out.meta_mut() = *op0.meta();
        out.set_scale(scale);

        if let Some(rlk) = rlk {
            let EvaluatorBuffers { decomp, qp, key_switch, .. } = buffers;
            let (low, high) = out.value_mut().split_at_mut(2);
            relinearize_into(params, key_switch, decomp, qp, rlk.gadget(), level, &high[0], low);
            out.resize(1, level);
        }
        Ok(())
    }

    /// out = op0 * op1 without relinearization. A ciphertext times a ciphertext has degree two.
    ///
    /// Uses scale-invariant tensoring when the evaluator was built with it.
    pub fn mul<'b>(&mut self, op0: &Ciphertext, op1: impl Into<Operand<'b>>, out: &mut Ciphertext) -> Result<()> {
        if self.scale_invariant {
            self.mul_invariant(op0, op1.into(), false, out)
        } else {
            self.mul_standard(op0, op1.into(), false, out)
        }
    }

    /// See [Self::mul].
    pub fn mul_new<'b>(&mut self, op0: &Ciphertext, op1: impl Into<Operand<'b>>) -> Result<Ciphertext> {
        let mut out = self.new_ciphertext(2, op0.level());
        self.mul(op0, op1, &mut out)?;
        Ok(out)
    }

    /// out = op0 * op1, relinearized to degree one.
    ///
    /// Uses scale-invariant tensoring when the evaluator was built with it.
    #[instrument(skip_all)]
    pub fn mul_relin<'b>(&mut self, op0: &Ciphertext, op1: impl Into<Operand<'b>>, out: &mut Ciphertext) -> Result<()> {
        if self.scale_invariant {
            self.mul_invariant(op0, op1.into(), true, out)
        } else {
            self.mul_standard(op0, op1.into(), true, out)
        }
    }

    /// See [Self::mul_relin].
    pub fn mul_relin_new<'b>(&mut self, op0: &Ciphertext, op1: impl Into<Operand<'b>>) -> Result<Ciphertext> {
        let mut out = self.new_ciphertext(1, op0.level());
        self.mul_relin(op0, op1, &mut out)?;
        Ok(out)
    }

    /// out = op0 * op1 with scale-invariant tensoring, whatever the evaluator flavour.
    /// The output scale is scale0 * scale1 / (-Q mod T).
    /// Degree zero operands use standard tensoring.
    pub fn mul_scale_invariant<'b>(&mut self, op0: &Ciphertext, op1: impl Into<Operand<'b>>, out: &mut Ciphertext) -> Result<()> {
        self.mul_invariant(op0, op1.into(), false, out)
    }

    /// See [Self::mul_scale_invariant].
    pub fn mul_scale_invariant_new<'b>(&mut self, op0: &Ciphertext, op1: impl Into<Operand<'b>>) -> Result<Ciphertext> {
        let mut out = self.new_ciphertext(2, op0.level());
        self.mul_scale_invariant(op0, op1, &mut out)?;
        Ok(out)
    }

    /// Relinearized version of [Self::mul_scale_invariant].
    #[instrument(skip_all)]
    pub fn mul_relin_scale_invariant<'b>(&mut self, op0: &Ciphertext, op1: impl Into<Operand<'b>>, out: &mut Ciphertext) -> Result<()> {
        self.mul_invariant(op0, op1.into(), true, out)
    }

    /// See [Self::mul_relin_scale_invariant].
    pub fn mul_relin_scale_invariant_new<'b>(&mut self, op0: &Ciphertext, op1: impl Into<Operand<'b>>) -> Result<Ciphertext> {
        let mut out = self.new_ciphertext(1, op0.level());
        self.mul_relin_scale_invariant(op0, op1, &mut out)?;
        Ok(out)
    }

    fn mul_then_add_standard(&mut self, op0: &Ciphertext, op1: Operand, relin: bool, out: &mut Ciphertext) -> Result<()> {
        check_degree(op0)?;
        let Evaluator { params, keys, encoder, buffers, .. } = self;
        let ring_q = params.ring_q();
        let t = params.plaintext_modulus();

        let pt = match op1 {
            Operand::Ciphertext(ct1) => {
                check_degree(ct1)?;
                check_scales(params, op0.scale().mul(ct1.scale(), t), out.scale())?;
                let level = op0.level().min(ct1.level()).min(out.level());
                let degree = op0.degree() + ct1.degree();
                let rlk = if relin && degree == 2 {
                    let rlk = keys.relinearization_key()?;
                    check_gadget(params, rlk.gadget(), level)?;
                    Some(rlk)
                } else {
                    None
                };
                let out_degree = if rlk.is_some() { out.degree().max(1) } else { out.degree().max(degree) };
                out.resize(out_degree, level);

                let EvaluatorBuffers { decomp, qp, key_switch, q, .. } = buffers;
                let (lhs, rest) = q.split_at_mut(2);
                for (dst, src) in lhs.iter_mut().zip(op0.value()) {
                    ring_q.mul_rns_scalar_montgomery(level, src, params.t_montgomery(), dst);
                }
                let lhs = &lhs[..=op0.degree()];
                let c2 = &mut rest[0];
                for (i, a) in lhs.iter().enumerate() {
                    for (j, b) in ct1.value().iter().enumerate() {
                        if i + j == 2 && rlk.is_some() {
                            ring_q.mul_coeffs_montgomery(level, a, b, c2);
                        } else {
                            ring_q.mul_coeffs_montgomery_then_add(level, a, b, &mut out.value_mut()[i + j]);
                        }
                    }
                }
                if let Some(rlk) = rlk {
                    relinearize_into(params, key_switch, decomp, qp, rlk.gadget(), level, c2, &mut out.value_mut()[..2]);
                }
                return Ok(());
            }
            Operand::Scalar(value) => {
                check_scales(params, op0.scale(), out.scale())?;
                let level = op0.level().min(out.level());
                out.resize(out.degree().max(op0.degree()), level);
                for (dst, src) in out.value_mut().iter_mut().zip(op0.value()) {
                    ring_q.mul_scalar_then_add(level, src, t.reduce(value), dst);
                }
                return Ok(());
            }
            Operand::Plaintext(pt) => {
                check_plaintext(pt)?;
                pt
            }
            Operand::Vector(_) => {
                let level = op0.level().min(out.level());
                Self::encode_operand(encoder, &mut buffers.plaintext, op1, Scale::one(), level)?;
                &buffers.plaintext
            }
        };

        check_scales(params, op0.scale().mul(pt.scale(), t), out.scale())?;
        let level = op0.level().min(pt.level()).min(out.level());
        out.resize(out.degree().max(op0.degree()), level);
        let c00 = &mut buffers.q[0];
        ring_q.mul_rns_scalar_montgomery(level, pt.value(), params.t_montgomery(), c00);
        for (dst, src) in out.value_mut().iter_mut().zip(op0.value()) {
            ring_q.mul_coeffs_montgomery_then_add(level, c00, src, dst);
        }
        Ok(())
    }

    /// out = out + op0 * op1 with standard tensoring, without relinearization.
    ///
    /// The scale of `out` must already equal the scale of the product.
    pub fn mul_then_add<'b>(&mut self, op0: &Ciphertext, op1: impl Into<Operand<'b>>, out: &mut Ciphertext) -> Result<()> {
        self.mul_then_add_standard(op0, op1.into(), false, out)
    }

    /// out = out + op0 * op1 with standard tensoring, the product relinearized.
    ///
    /// The scale of `out` must already equal the scale of the product.
    pub fn mul_relin_then_add<'b>(&mut self, op0: &Ciphertext, op1: impl Into<Operand<'b>>, out: &mut Ciphertext) -> Result<()> {
        self.mul_then_add_standard(op0, op1.into(), true, out)
    }

    /// Reduces a degree two ciphertext to degree one. Degree one ciphertexts are copied.
    #[instrument(skip_all)]
    pub fn relinearize(&mut self, op0: &Ciphertext, out: &mut Ciphertext) -> Result<()> {
        match op0.degree() {
            0 | 1 => {
                out.copy_from(op0);
                Ok(())
            }
            2 => {
                let Evaluator { params, keys, buffers, .. } = self;
                let level = op0.level().min(out.level());
                let rlk = keys.relinearization_key()?;
                check_gadget(params, rlk.gadget(), level)?;
                out.resize(1, level);
                for (dst, src) in out.value_mut().iter_mut().zip(op0.value()) {
                    dst.copy_from(level, src);
                }
                let EvaluatorBuffers { decomp, qp, key_switch, .. } = buffers;
                relinearize_into(params, key_switch, decomp, qp, rlk.gadget(), level, &op0.value()[2], out.value_mut());
                *out.meta_mut() = *op0.meta();
                Ok(())
            }
            degree => Err(Error::DegreeTooLarge { degree }),
        }
    }

    /// See [Self::relinearize].
    pub fn relinearize_new(&mut self, op0: &Ciphertext) -> Result<Ciphertext> {
        let mut out = self.new_ciphertext(1, op0.level());
        self.relinearize(op0, &mut out)?;
        Ok(out)
    }

    /* ------------------------------ rescaling ------------------------------ */

    /// Divides `op0` by its last prime q_l with rounding, into `out` at level l - 1.
    /// The scale becomes scale / q_l mod T.
    ///
    /// Scale-invariant evaluators copy `op0` instead.
    #[instrument(skip_all)]
    pub fn rescale(&mut self, op0: &Ciphertext, out: &mut Ciphertext) -> Result<()> {
        if self.scale_invariant {
            out.copy_from(op0);
            return Ok(());
        }
        let level = op0.level();
        if level == 0 {
            return Err(Error::LevelTooLow { level });
        }
        if out.level() < level - 1 {
            return Err(Error::OutputTooSmall(format!(
                "output at level {} cannot hold level {}", out.level(), level - 1
            )));
        }
        let scale = self.rescaled_scale(op0.scale(), level)?;

        let n = self.params.n();
        let Evaluator { params, buffers, .. } = self;
        out.resize(op0.degree(), level - 1);
        for (dst, src) in out.value_mut().iter_mut().zip(op0.value()) {
            dst.copy_from(level - 1, src);
            divide_round_by_last_modulus(
                params, &mut buffers.coeff, &mut buffers.ext, level, src.residue(level), &mut dst.data_mut()[..level * n],
            );
        }
        *out.meta_mut() = *op0.meta();
        out.set_scale(scale);
        Ok(())
    }

    /// See [Self::rescale].
    pub fn rescale_new(&mut self, op0: &Ciphertext) -> Result<Ciphertext> {
        let level = if self.scale_invariant {op0.level()} else {op0.level().saturating_sub(1)};
        let mut out = self.new_ciphertext(op0.degree(), level);
        self.rescale(op0, &mut out)?;
        Ok(out)
    }

    /// In-place version of [Self::rescale].
    pub fn rescale_assign(&mut self, op: &mut Ciphertext) -> Result<()> {
        if self.scale_invariant {
            return Ok(());
        }
        let level = op.level();
        if level == 0 {
            return Err(Error::LevelTooLow { level });
        }
        let scale = self.rescaled_scale(op.scale(), level)?;

        let n = self.params.n();
        let Evaluator { params, buffers, .. } = self;
        for poly in op.value_mut().iter_mut() {
            let (low, high) = poly.data_mut().split_at_mut(level * n);
            divide_round_by_last_modulus(params, &mut buffers.coeff, &mut buffers.ext, level, &high[..n], low);
        }
        op.resize(op.degree(), level - 1);
        op.set_scale(scale);
        Ok(())
    }

    fn rescaled_scale(&self, scale: Scale, level: usize) -> Result<Scale> {
        let t = self.params.plaintext_modulus();
        let q_last = self.params.ring_q().moduli()[level].value();
        scale.div(Scale::new(t.reduce(q_last)), t)
            .ok_or_else(|| Error::InvalidOperand("dropped prime is not invertible modulo the plaintext modulus".to_string()))
    }

    /* ----------------------------- automorphisms ----------------------------- */

    /// Applies X -> X^galois_element to `op0`, key switching back to the original secret.
    #[instrument(skip_all, fields(galois_element))]
    pub fn automorphism(&mut self, op0: &Ciphertext, galois_element: u64, out: &mut Ciphertext) -> Result<()> {
        if op0.degree() != 1 {
            return Err(Error::InvalidOperand(format!(
                "automorphisms need a degree one ciphertext, got degree {}", op0.degree()
            )));
        }
        if galois_element == 1 {
            out.copy_from(op0);
            return Ok(());
        }
        let Evaluator { params, keys, buffers, .. } = self;
        let level = op0.level().min(out.level());
        let key = keys.galois_key(galois_element)?;
        check_gadget(params, key.gadget(), level)?;
        let index = params.galois_tool().permutation_ntt(galois_element);
        let ring_q = params.ring_q();

        let EvaluatorBuffers { decomp, qp, key_switch, .. } = buffers;
        keyswitch::gadget_product(params, key_switch, level, &op0.value()[1], key.gadget(), decomp, &mut qp[..2]);
        let (ks0, ks1) = qp.split_at_mut(1);
        ring_q.add_assign(level, &op0.value()[0], &mut ks0[0].q);

        out.resize(1, level);
        let [out0, out1] = out.value_mut() else {
            panic!("[Logic error] Ciphertext was resized to degree one.");
        };
        ring_q.automorphism_ntt_with_index(level, &ks0[0].q, &index, out0);
        ring_q.automorphism_ntt_with_index(level, &ks1[0].q, &index, out1);
        *out.meta_mut() = *op0.meta();
        Ok(())
    }

    /// See [Self::automorphism].
    pub fn automorphism_new(&mut self, op0: &Ciphertext, galois_element: u64) -> Result<Ciphertext> {
        let mut out = self.new_ciphertext(1, op0.level());
        self.automorphism(op0, galois_element, &mut out)?;
        Ok(out)
    }

    /// [Self::automorphism] reusing `decomp`, the decomposition at `level` of the second polynomial
    /// of `op0`. The output is at `level`.
    pub fn automorphism_hoisted(
        &mut self, level: usize, op0: &Ciphertext, decomp: &[PolyQP], galois_element: u64, out: &mut Ciphertext,
    ) -> Result<()> {
        if galois_element == 1 {
            out.copy_from(op0);
            return Ok(());
        }
        let level = level.min(op0.level());
        let mut rotated = [std::mem::take(&mut self.buffers.qp[2]), std::mem::take(&mut self.buffers.qp[3])];
        let result = AutomorphismOps::automorphism_hoisted_lazy(self, level, op0, decomp, galois_element, &mut rotated);
        if result.is_ok() {
            out.resize(1, level);
            let Evaluator { params, buffers, .. } = self;
            for (dst, src) in out.value_mut().iter_mut().zip(rotated.iter()) {
                dst.copy_from(level, &src.q);
                keyswitch::mod_down_qp_to_q_ntt(params, &mut buffers.key_switch, level, dst, &src.p);
            }
            *out.meta_mut() = *op0.meta();
        }
        let [rotated0, rotated1] = rotated;
        self.buffers.qp[2] = rotated0;
        self.buffers.qp[3] = rotated1;
        result
    }

    /// Rotates both rows of the slot matrix left by `k` columns.
    pub fn rotate_columns(&mut self, op0: &Ciphertext, k: isize, out: &mut Ciphertext) -> Result<()> {
        let galois_element = self.params.galois_element(k);
        self.automorphism(op0, galois_element, out)
    }

    /// See [Self::rotate_columns].
    pub fn rotate_columns_new(&mut self, op0: &Ciphertext, k: isize) -> Result<Ciphertext> {
        let mut out = self.new_ciphertext(1, op0.level());
        self.rotate_columns(op0, k, &mut out)?;
        Ok(out)
    }

    /// Swaps the two rows of the slot matrix.
    pub fn rotate_rows(&mut self, op0: &Ciphertext, out: &mut Ciphertext) -> Result<()> {
        let galois_element = self.params.galois_element_row_swap();
        self.automorphism(op0, galois_element, out)
    }

    /// See [Self::rotate_rows].
    pub fn rotate_rows_new(&mut self, op0: &Ciphertext) -> Result<Ciphertext> {
        let mut out = self.new_ciphertext(1, op0.level());
        self.rotate_rows(op0, &mut out)?;
        Ok(out)
    }

    /// Column rotations of `op0` by every amount in `rotations`, sharing one decomposition.
    pub fn rotate_hoisted_new(&mut self, op0: &Ciphertext, rotations: &[isize]) -> Result<HashMap<isize, Ciphertext>> {
        let level = op0.level();
        let mut decomp = std::mem::take(&mut self.buffers.decomp);
        KeySwitchOps::decompose_ntt(self, level, &op0.value()[1], &mut decomp);
        let result: Result<HashMap<_, _>> = rotations.iter()
            .map(|&k| {
                let mut out = self.new_ciphertext(1, level);
                let galois_element = self.params.galois_element(k);
                self.automorphism_hoisted(level, op0, &decomp, galois_element, &mut out)?;
                Ok((k, out))
            })
            .collect();
        self.buffers.decomp = decomp;
        result
    }

    /// Column rotations of `op0` by every amount in `rotations`, sharing one decomposition,
    /// left over QP and multiplied by P.
    pub fn rotate_hoisted_lazy_new(
        &mut self, level: usize, rotations: &[isize], op0: &Ciphertext,
    ) -> Result<HashMap<isize, [PolyQP; 2]>> {
        let level = level.min(op0.level());
        let (n, level_p) = (self.params.n(), self.params.max_level_p());
        let mut decomp = std::mem::take(&mut self.buffers.decomp);
        KeySwitchOps::decompose_ntt(self, level, &op0.value()[1], &mut decomp);
        let mut result = HashMap::with_capacity(rotations.len());
        for &k in rotations {
            let mut rotated: [PolyQP; 2] = std::array::from_fn(|_| PolyQP::new(n, level, level_p));
            let galois_element = self.params.galois_element(k);
            if galois_element == 1 {
                let ring_q = self.params.ring_q();
                for (dst, src) in rotated.iter_mut().zip(op0.value()) {
                    ring_q.mul_rns_scalar_montgomery(level, src, self.params.p_mod_q_montgomery(), &mut dst.q);
                }
            } else if let Err(err) = AutomorphismOps::automorphism_hoisted_lazy(self, level, op0, &decomp, galois_element, &mut rotated) {
                self.buffers.decomp = decomp;
                return Err(err);
            }
            result.insert(k, rotated);
        }
        self.buffers.decomp = decomp;
        Ok(result)
    }

}

impl RingOps for Evaluator {

    fn parameters(&self) -> &Arc<Parameters> {&self.params}

    fn rescale(&mut self, op0: &Ciphertext, op1: &mut Ciphertext) -> Result<()> {
        Evaluator::rescale(self, op0, op1)
    }

    fn rescale_assign(&mut self, op: &mut Ciphertext) -> Result<()> {
        Evaluator::rescale_assign(self, op)
    }

}

impl KeySwitchOps for Evaluator {

    fn evaluation_keys(&self) -> SharedEvaluationKeySet {self.keys.clone()}

    fn decompose_ntt(&mut self, level_q: usize, c: &Poly, decomp: &mut [PolyQP]) {
        keyswitch::decompose_ntt(&self.params, &mut self.buffers.key_switch, level_q, c, decomp);
    }

    fn gadget_product_lazy(&mut self, level_q: usize, c: &Poly, gadget: &GadgetCiphertext, out: &mut [PolyQP]) {
        let Evaluator { params, buffers, .. } = self;
        keyswitch::gadget_product_lazy(params, &mut buffers.key_switch, level_q, c, gadget, &mut buffers.decomp, out);
    }

    fn gadget_product_hoisted_lazy(&self, level_q: usize, decomp: &[PolyQP], gadget: &GadgetCiphertext, out: &mut [PolyQP]) {
        keyswitch::gadget_product_hoisted_lazy(&self.params, level_q, decomp, gadget, out);
    }

    fn mod_down_qp_to_q_ntt(&mut self, level_q: usize, poly_q: &mut Poly, poly_p: &Poly) {
        keyswitch::mod_down_qp_to_q_ntt(&self.params, &mut self.buffers.key_switch, level_q, poly_q, poly_p);
    }

}

impl AutomorphismOps for Evaluator {

    fn automorphism_index(&self, galois_element: u64) -> Arc<Vec<usize>> {
        self.params.galois_tool().permutation_ntt(galois_element)
    }

    fn automorphism_hoisted_lazy(
        &mut self, level_q: usize, ct: &Ciphertext, decomp: &[PolyQP], galois_element: u64, out: &mut [PolyQP],
    ) -> Result<()> {
        let Evaluator { params, keys, buffers, .. } = self;
        let key = keys.galois_key(galois_element)?;
        check_gadget(params, key.gadget(), level_q)?;
        let index = params.galois_tool().permutation_ntt(galois_element);
        keyswitch::automorphism_hoisted_lazy(
            params, level_q, &ct.value()[0], decomp, key.gadget(), &index, &mut buffers.qp[..2], out,
        );
        Ok(())
    }

}

impl ShallowCopy for Evaluator {

    fn shallow_copy(&self) -> Self {
        Evaluator {
            params: self.params.clone(),
            keys: self.keys.clone(),
            encoder: self.encoder.clone(),
            scale_invariant: self.scale_invariant,
            buffers: EvaluatorBuffers::new(&self.params),
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use crate::{create_bgv_suite, util::GaloisTool, BgvSuite};

    const T: u64 = 65537;

    fn suite(galois_steps: &[isize], row_swap: bool) -> BgvSuite {
        let tool = GaloisTool::new(4);
        let mut elements: Vec<u64> = galois_steps.iter().map(|&k| tool.galois_element(k)).collect();
        if row_swap {
            elements.push(tool.galois_element_row_swap());
        }
        create_bgv_suite(4, vec![50, 50, 50], vec![60], T, &elements)
    }

    fn random_values(rng: &mut impl Rng, bound: u64) -> Vec<u64> {
        (0..16).map(|_| rng.gen_range(0..bound)).collect()
    }

    fn encrypt(suite: &mut BgvSuite, values: &[u64], scale: u64) -> Ciphertext {
        let level = suite.params.max_level();
        let pt = suite.encoder.encode_new(values, Scale::new(scale), level).unwrap();
        suite.encryptor.encrypt_new(&pt).unwrap()
    }

    fn decrypt(suite: &BgvSuite, ct: &Ciphertext) -> Vec<u64> {
        suite.encoder.decode(&suite.decryptor.decrypt_new(ct)).unwrap()
    }

    fn mul_mod(a: u64, b: u64) -> u64 {
        ((a as u128 * b as u128) % T as u128) as u64
    }

    #[test]
    fn test_add_sub() {
        let mut suite = suite(&[], false);
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
        let (a, b) = (random_values(&mut rng, T), random_values(&mut rng, T));
        let ct_a = encrypt(&mut suite, &a, 3);
        let ct_b = encrypt(&mut suite, &b, 3);

        let sum = suite.evaluator.add_new(&ct_a, &ct_b).unwrap();
        let expected: Vec<u64> = a.iter().zip(&b).map(|(x, y)| (x + y) % T).collect();
        assert_eq!(decrypt(&suite, &sum), expected);

        let diff = suite.evaluator.sub_new(&ct_a, &b).unwrap();
        let expected: Vec<u64> = a.iter().zip(&b).map(|(x, y)| (x + T - y) % T).collect();
        assert_eq!(decrypt(&suite, &diff), expected);

        let shifted = suite.evaluator.add_new(&ct_a, 5u64).unwrap();
        let expected: Vec<u64> = a.iter().map(|x| (x + 5) % T).collect();
        assert_eq!(decrypt(&suite, &shifted), expected);
        assert_eq!(shifted.scale(), Scale::new(3));

        let ct_c = encrypt(&mut suite, &b, 4);
        assert!(matches!(suite.evaluator.add_new(&ct_a, &ct_c), Err(Error::InvalidOperand(_))));
    }

    #[test]
    fn test_mul_relin() {
        let mut suite = suite(&[], false);
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
        let (a, b) = (random_values(&mut rng, T), random_values(&mut rng, T));
        let ct_a = encrypt(&mut suite, &a, 3);
        let ct_b = encrypt(&mut suite, &b, 7);

        let product = suite.evaluator.mul_relin_new(&ct_a, &ct_b).unwrap();
        assert_eq!(product.degree(), 1);
        assert_eq!(product.scale(), Scale::new(21));
        let expected: Vec<u64> = a.iter().zip(&b).map(|(&x, &y)| mul_mod(x, y)).collect();
        assert_eq!(decrypt(&suite, &product), expected);

        // degree two without relinearization
        let product = suite.evaluator.mul_new(&ct_a, &ct_b).unwrap();
        assert_eq!(product.degree(), 2);
        assert_eq!(decrypt(&suite, &product), expected);
        let relinearized = suite.evaluator.relinearize_new(&product).unwrap();
        assert_eq!(relinearized.degree(), 1);
        assert_eq!(decrypt(&suite, &relinearized), expected);
    }

    #[test]
    fn test_square() {
        let mut suite = suite(&[], false);
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
        let a = random_values(&mut rng, T);
        let ct_a = encrypt(&mut suite, &a, 1);
        let square = suite.evaluator.mul_relin_new(&ct_a, &ct_a).unwrap();
        let expected: Vec<u64> = a.iter().map(|&x| mul_mod(x, x)).collect();
        assert_eq!(decrypt(&suite, &square), expected);
    }

    #[test]
    fn test_mul_plain_operands() {
        let mut suite = suite(&[], false);
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
        let (a, b) = (random_values(&mut rng, T), random_values(&mut rng, T));
        let ct_a = encrypt(&mut suite, &a, 5);
        let expected: Vec<u64> = a.iter().zip(&b).map(|(&x, &y)| mul_mod(x, y)).collect();

        let pt = suite.encoder.encode_new(&b, Scale::new(3), ct_a.level()).unwrap();
        let out = suite.evaluator.mul_new(&ct_a, &pt).unwrap();
        assert_eq!(out.scale(), Scale::new(15));
        assert_eq!(decrypt(&suite, &out), expected);

        let out = suite.evaluator.mul_new(&ct_a, &b).unwrap();
        assert_eq!(out.scale(), Scale::new(5));
        assert_eq!(decrypt(&suite, &out), expected);

        let out = suite.evaluator.mul_new(&ct_a, 3u64).unwrap();
        let expected: Vec<u64> = a.iter().map(|&x| mul_mod(x, 3)).collect();
        assert_eq!(decrypt(&suite, &out), expected);
    }

    #[test]
    fn test_mul_then_add() {
        let mut suite = suite(&[], false);
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
        let values: Vec<Vec<u64>> = (0..4).map(|_| random_values(&mut rng, T)).collect();
        let cts: Vec<Ciphertext> = values.iter().map(|v| encrypt(&mut suite, v, 1)).collect();

        let mut acc = suite.evaluator.mul_relin_new(&cts[0], &cts[1]).unwrap();
        suite.evaluator.mul_relin_then_add(&cts[2], &cts[3], &mut acc).unwrap();
        let expected: Vec<u64> = (0..16)
            .map(|i| (mul_mod(values[0][i], values[1][i]) + mul_mod(values[2][i], values[3][i])) % T)
            .collect();
        assert_eq!(acc.degree(), 1);
        assert_eq!(decrypt(&suite, &acc), expected);

        let mut acc = suite.evaluator.mul_new(&cts[0], &cts[1]).unwrap();
        suite.evaluator.mul_then_add(&cts[2], &cts[3], &mut acc).unwrap();
        assert_eq!(acc.degree(), 2);
        assert_eq!(decrypt(&suite, &acc), expected);

        let skewed = encrypt(&mut suite, &values[0], 2);
        assert!(matches!(
            suite.evaluator.mul_then_add(&skewed, &cts[1], &mut acc),
            Err(Error::InvalidOperand(_))
        ));
    }

    #[test]
    fn test_mul_scale_invariant() {
        let mut suite = suite(&[], false);
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
        let (a, b) = (random_values(&mut rng, T), random_values(&mut rng, T));
        let ct_a = encrypt(&mut suite, &a, 3);
        let ct_b = encrypt(&mut suite, &b, 7);
        let level = ct_a.level();

        let mut evaluator = suite.evaluator.shallow_copy().with_scale_invariant(true);
        let product = evaluator.mul_relin_new(&ct_a, &ct_b).unwrap();
        let t = suite.params.plaintext_modulus();
        let expected_scale = Scale::new(21).div(Scale::new(suite.params.neg_q_mod_t(level)), t).unwrap();
        assert_eq!(product.scale(), expected_scale);
        assert_eq!(product.level(), level);
        let expected: Vec<u64> = a.iter().zip(&b).map(|(&x, &y)| mul_mod(x, y)).collect();
        assert_eq!(decrypt(&suite, &product), expected);

        let square = evaluator.mul_scale_invariant_new(&ct_a, &ct_a).unwrap();
        assert_eq!(square.degree(), 2);
        let expected: Vec<u64> = a.iter().map(|&x| mul_mod(x, x)).collect();
        assert_eq!(decrypt(&suite, &square), expected);

        // no rescaling in scale-invariant mode
        let copy = evaluator.rescale_new(&product).unwrap();
        assert_eq!(copy.level(), level);
        assert_eq!(copy.scale(), product.scale());
        assert_eq!(decrypt(&suite, &copy), decrypt(&suite, &product));
    }

    #[test]
    fn test_rescale_chain() {
        let mut suite = suite(&[], false);
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
        let t = *suite.params.plaintext_modulus();
        let a = random_values(&mut rng, 16);
        let mut ct = encrypt(&mut suite, &a, 1);
        let mut expected = a.clone();

        for level in (1..=suite.params.max_level()).rev() {
            let product = suite.evaluator.mul_relin_new(&ct, &ct).unwrap();
            let q_last = suite.params.ring_q().moduli()[level].value();
            let scale = product.scale().div(Scale::new(t.reduce(q_last)), &t).unwrap();
            ct = suite.evaluator.rescale_new(&product).unwrap();
            assert_eq!(ct.level(), level - 1);
            assert_eq!(ct.scale(), scale);
            expected = expected.iter().map(|&x| mul_mod(x, x)).collect();
            assert_eq!(decrypt(&suite, &ct), expected);
        }
        assert_eq!(suite.evaluator.rescale_new(&ct), Err(Error::LevelTooLow { level: 0 }));
    }

    #[test]
    fn test_rescale_assign_and_output_size() {
        let mut suite = suite(&[], false);
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
        let a = random_values(&mut rng, T);
        let ct = encrypt(&mut suite, &a, 1);

        let mut small = Ciphertext::new(&suite.params, 1, 0);
        assert!(matches!(suite.evaluator.rescale(&ct, &mut small), Err(Error::OutputTooSmall(_))));

        let expected = suite.evaluator.rescale_new(&ct).unwrap();
        let mut in_place = ct.clone();
        suite.evaluator.rescale_assign(&mut in_place).unwrap();
        assert_eq!(in_place, expected);
        assert_eq!(decrypt(&suite, &in_place), a);
    }

    #[test]
    fn test_rotations() {
        let mut suite = suite(&[1, 3], true);
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
        let a = random_values(&mut rng, T);
        let ct = encrypt(&mut suite, &a, 1);

        for k in [1usize, 3] {
            let rotated = suite.evaluator.rotate_columns_new(&ct, k as isize).unwrap();
            let expected: Vec<u64> = (0..16).map(|i| a[(i / 8) * 8 + (i % 8 + k) % 8]).collect();
            assert_eq!(decrypt(&suite, &rotated), expected);
        }

        let swapped = suite.evaluator.rotate_rows_new(&ct).unwrap();
        let expected: Vec<u64> = (0..16).map(|i| a[(i + 8) % 16]).collect();
        assert_eq!(decrypt(&suite, &swapped), expected);

        let same = suite.evaluator.rotate_columns_new(&ct, 0).unwrap();
        assert_eq!(same, ct);

        assert_eq!(
            suite.evaluator.rotate_columns_new(&ct, 2).unwrap_err(),
            Error::MissingGaloisKey { galois_element: suite.params.galois_element(2) }
        );
    }

    #[test]
    fn test_hoisted_rotations() {
        let mut suite = suite(&[1, 3], false);
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
        let a = random_values(&mut rng, T);
        let ct = encrypt(&mut suite, &a, 1);

        let rotations = suite.evaluator.rotate_hoisted_new(&ct, &[0, 1, 3]).unwrap();
        for (&k, rotated) in rotations.iter() {
            let expected = suite.evaluator.rotate_columns_new(&ct, k).unwrap();
            assert_eq!(decrypt(&suite, rotated), decrypt(&suite, &expected));
        }

        let level = ct.level();
        let mut lazy = suite.evaluator.rotate_hoisted_lazy_new(level, &[0, 3], &ct).unwrap();
        for (k, rotated) in lazy.iter_mut() {
            let mut out = Ciphertext::new(&suite.params, 1, level);
            for (dst, src) in out.value_mut().iter_mut().zip(rotated.iter()) {
                dst.copy_from(level, &src.q);
                KeySwitchOps::mod_down_qp_to_q_ntt(&mut suite.evaluator, level, dst, &src.p);
            }
            let expected: Vec<u64> = (0..16).map(|i| a[(i / 8) * 8 + (i % 8 + *k as usize) % 8]).collect();
            assert_eq!(decrypt(&suite, &out), expected);
        }
    }

    #[test]
    fn test_errors() {
        let mut suite = suite(&[], false);
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
        let a = random_values(&mut rng, T);
        let ct = encrypt(&mut suite, &a, 1);

        let degree_two = suite.evaluator.mul_new(&ct, &ct).unwrap();
        assert_eq!(suite.evaluator.mul_new(&degree_two, &ct).unwrap_err(), Error::DegreeTooLarge { degree: 2 });
        assert!(matches!(suite.evaluator.rotate_rows_new(&degree_two), Err(Error::InvalidOperand(_))));

        let mut bare = Evaluator::new(suite.params.clone(), None);
        assert_eq!(bare.mul_relin_new(&ct, &ct).unwrap_err(), Error::MissingRelinearizationKey);
        assert!(matches!(bare.rotate_rows_new(&ct), Err(Error::MissingGaloisKey { .. })));
        // without relinearization no key is needed
        assert!(bare.mul_new(&ct, &ct).is_ok());
    }

    #[test]
    fn test_shallow_copy_matches() {
        let mut suite = suite(&[1], false);
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
        let (a, b) = (random_values(&mut rng, T), random_values(&mut rng, T));
        let ct_a = encrypt(&mut suite, &a, 1);
        let ct_b = encrypt(&mut suite, &b, 1);

        let mut copy = suite.evaluator.shallow_copy();
        let expected = suite.evaluator.mul_relin_new(&ct_a, &ct_b).unwrap();
        assert_eq!(copy.mul_relin_new(&ct_a, &ct_b).unwrap(), expected);
        assert_eq!(
            copy.rotate_columns_new(&ct_a, 1).unwrap(),
            suite.evaluator.rotate_columns_new(&ct_a, 1).unwrap()
        );
    }
}
