use std::{collections::HashMap, sync::Arc};

use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{
    error::{Error, Result},
    util::{self, sampling, BlakeRNG, PRNGSeed},
    Parameters,
    ParametersId,
    Poly,
    PolyQP,
};

/// Struct to store a secret key.
///
/// The key is a ternary polynomial s, stored over the extended basis QP in
/// NTT representation and Montgomery form at the maximum levels.
///
/// - See [KeyGenerator] for the class that generates the secret key.
/// - See [RelinearizationKey] and [GaloisKey] for the evaluation keys derived from it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretKey {
    value: PolyQP,
    parameters_id: ParametersId,
}

impl SecretKey {

    /// The [ParametersId] the key was generated for.
    pub fn parameters_id(&self) -> &ParametersId {&self.parameters_id}

    /// The polynomial s over QP, NTT and Montgomery form.
    pub fn value(&self) -> &PolyQP {&self.value}

}

/// A ciphertext of a secret-dependent polynomial under the gadget
/// decomposition used by hybrid key switching.
///
/// For an input secret s_in and an output secret s_out, digit `i` holds the
/// pair (b_i, a_i) over QP with b_i = -a_i * s_out + e_i + P * s_in * [q in group i].
/// All polynomials are in NTT representation and Montgomery form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GadgetCiphertext {
    value: Vec<[PolyQP; 2]>,
    level_q: usize,
    level_p: usize,
    parameters_id: ParametersId,
}

impl GadgetCiphertext {

    /// One pair per decomposition digit.
    pub fn value(&self) -> &[[PolyQP; 2]] {&self.value}

    /// The number of decomposition digits.
    pub fn beta(&self) -> usize {self.value.len()}

    /// The level of the Q part.
    pub fn level_q(&self) -> usize {self.level_q}

    /// The level of the special primes.
    pub fn level_p(&self) -> usize {self.level_p}

    /// The [ParametersId] the key was generated for.
    pub fn parameters_id(&self) -> &ParametersId {&self.parameters_id}

}

/// Switches s^2 to s. Consumed by relinearization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelinearizationKey {
    gadget: GadgetCiphertext,
}

impl RelinearizationKey {

    /// The underlying gadget ciphertext.
    pub fn gadget(&self) -> &GadgetCiphertext {&self.gadget}

}

/// Switches s to the automorphism of s by the inverse of `galois_element`,
/// so that applying the automorphism after key switching yields a ciphertext under s.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GaloisKey {
    galois_element: u64,
    gadget: GadgetCiphertext,
}

impl GaloisKey {

    /// The Galois element this key was generated for.
    pub fn galois_element(&self) -> u64 {self.galois_element}

    /// The underlying gadget ciphertext.
    pub fn gadget(&self) -> &GadgetCiphertext {&self.gadget}

}

/// Provider of evaluation keys.
///
/// Evaluators only read key material, so a set can be shared by any number
/// of evaluators behind an [Arc].
pub trait EvaluationKeySet {

    /// The Galois key for `galois_element`, or [Error::MissingGaloisKey].
    fn galois_key(&self, galois_element: u64) -> Result<&GaloisKey>;

    /// The relinearization key, or [Error::MissingRelinearizationKey].
    fn relinearization_key(&self) -> Result<&RelinearizationKey>;

    /// Galois elements for which a key is available.
    fn galois_elements(&self) -> Vec<u64>;

}

/// A key set shared between evaluators.
pub type SharedEvaluationKeySet = Arc<dyn EvaluationKeySet + Send + Sync>;

/// An in-memory [EvaluationKeySet].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MemEvaluationKeySet {
    relinearization_key: Option<RelinearizationKey>,
    galois_keys: HashMap<u64, GaloisKey>,
}

impl MemEvaluationKeySet {

    /// Creates a key set from an optional relinearization key and Galois keys.
    pub fn new(relinearization_key: Option<RelinearizationKey>, galois_keys: Vec<GaloisKey>) -> Self {
        let galois_keys = galois_keys.into_iter().map(|k| (k.galois_element, k)).collect();
        Self { relinearization_key, galois_keys }
    }

    /// Registers a Galois key, replacing any key for the same element.
    pub fn insert_galois_key(&mut self, key: GaloisKey) {
        self.galois_keys.insert(key.galois_element, key);
    }

    /// Sets the relinearization key.
    pub fn set_relinearization_key(&mut self, key: RelinearizationKey) {
        self.relinearization_key = Some(key);
    }

    /// Wraps the set into a shareable handle.
    pub fn into_shared(self) -> SharedEvaluationKeySet {
        Arc::new(self)
    }

}

impl EvaluationKeySet for MemEvaluationKeySet {

    fn galois_key(&self, galois_element: u64) -> Result<&GaloisKey> {
        self.galois_keys.get(&galois_element).ok_or(Error::MissingGaloisKey { galois_element })
    }

    fn relinearization_key(&self) -> Result<&RelinearizationKey> {
        self.relinearization_key.as_ref().ok_or(Error::MissingRelinearizationKey)
    }

    fn galois_elements(&self) -> Vec<u64> {
        let mut elements: Vec<u64> = self.galois_keys.keys().copied().collect();
        elements.sort_unstable();
        elements
    }

}

/// Samples an error polynomial into both halves of `out`, in NTT representation.
pub(crate) fn sample_error_qp<R: Rng + ?Sized>(rng: &mut R, params: &Parameters, out: &mut PolyQP) {
    let sigma = params.noise_standard_deviation();
    let Some(distribution) = sampling::ClippedNormal::new(
        0.0, sigma, sigma * sampling::NOISE_DISTRIBUTION_WITH_MULTIPLIER,
    ) else {
        panic!("[Logic error] Noise standard deviation was validated as positive.");
    };
    let e = sampling::rounded(rng, &distribution, params.n());
    let (level_q, level_p) = (out.q.level(), out.p.level());
    params.ring_q().set_coefficients_i64(level_q, &e, &mut out.q);
    params.ring_q().ntt_assign(level_q, &mut out.q);
    params.ring_p().set_coefficients_i64(level_p, &e, &mut out.p);
    params.ring_p().ntt_assign(level_p, &mut out.p);
}

/// Generates secret keys and the evaluation keys derived from them.
///
/// Randomness comes from a [BlakeRNG]; with [KeyGenerator::with_seed] every
/// key is reproducible.
pub struct KeyGenerator {
    params: Arc<Parameters>,
    rng: BlakeRNG,
}

impl KeyGenerator {

    /// Creates a key generator seeded from system entropy.
    pub fn new(params: Arc<Parameters>) -> Self {
        Self { params, rng: BlakeRNG::new_random() }
    }

    /// Creates a deterministic key generator.
    pub fn with_seed(params: Arc<Parameters>, seed: PRNGSeed) -> Self {
        Self { params, rng: BlakeRNG::from_seed(seed) }
    }

    /// The parameters used by the generator.
    pub fn parameters(&self) -> &Arc<Parameters> {&self.params}

    /// Samples a new ternary secret key.
    #[instrument(skip_all)]
    pub fn gen_secret_key(&mut self) -> SecretKey {
        let params = &self.params;
        let (level_q, level_p) = (params.max_level(), params.max_level_p());
        let s = sampling::ternary(&mut self.rng, params.n());
        let mut value = PolyQP::new(params.n(), level_q, level_p);
        for (ring, poly, level) in [
            (params.ring_q(), &mut value.q, level_q),
            (params.ring_p(), &mut value.p, level_p),
        ] {
            ring.set_coefficients_i64(level, &s, poly);
            ring.ntt_assign(level, poly);
            ring.mform_assign(level, poly);
        }
        SecretKey { value, parameters_id: *params.id() }
    }

    /// Generates the key switching s^2 to s.
    #[instrument(skip_all)]
    pub fn gen_relinearization_key(&mut self, sk: &SecretKey) -> RelinearizationKey {
        let params = self.params.clone();
        let (level_q, level_p) = (params.max_level(), params.max_level_p());
        let mut s2 = PolyQP::new(params.n(), level_q, level_p);
        params.ring_q().mul_coeffs_montgomery(level_q, &sk.value.q, &sk.value.q, &mut s2.q);
        params.ring_p().mul_coeffs_montgomery(level_p, &sk.value.p, &sk.value.p, &mut s2.p);
        // s2 is s^2 in Montgomery form
        RelinearizationKey { gadget: self.gen_gadget(&s2, &sk.value) }
    }

    /// Generates the key for the automorphism X -> X^galois_element.
    #[instrument(skip(self, sk))]
    pub fn gen_galois_key(&mut self, galois_element: u64, sk: &SecretKey) -> Result<GaloisKey> {
        let params = self.params.clone();
        let two_n = 2 * params.n() as u64;
        if galois_element & 1 == 0 || galois_element >= two_n {
            return Err(Error::InvalidOperand(format!(
                "Galois element {} is not an odd value below {}", galois_element, two_n
            )));
        }
        let (level_q, level_p) = (params.max_level(), params.max_level_p());
        let index = params.galois_tool().permutation_ntt(params.inverse_galois_element(galois_element));
        let mut s_out = PolyQP::new(params.n(), level_q, level_p);
        params.ring_q().automorphism_ntt_with_index(level_q, &sk.value.q, &index, &mut s_out.q);
        params.ring_p().automorphism_ntt_with_index(level_p, &sk.value.p, &index, &mut s_out.p);
        Ok(GaloisKey { galois_element, gadget: self.gen_gadget(&sk.value, &s_out) })
    }

    /// Generates Galois keys for all given elements, skipping duplicates.
    pub fn gen_galois_keys(&mut self, galois_elements: &[u64], sk: &SecretKey) -> Result<Vec<GaloisKey>> {
        let mut elements = galois_elements.to_vec();
        elements.sort_unstable();
        elements.dedup();
        elements.into_iter().map(|g| self.gen_galois_key(g, sk)).collect()
    }

    /// Generates a key set holding a relinearization key and Galois keys for `galois_elements`.
    pub fn gen_evaluation_key_set(&mut self, sk: &SecretKey, galois_elements: &[u64]) -> Result<MemEvaluationKeySet> {
        let relinearization_key = self.gen_relinearization_key(sk);
        let galois_keys = self.gen_galois_keys(galois_elements, sk)?;
        Ok(MemEvaluationKeySet::new(Some(relinearization_key), galois_keys))
    }

    /// Encrypts P * s_in under s_out, both given in NTT and Montgomery form.
    fn gen_gadget(&mut self, s_in: &PolyQP, s_out: &PolyQP) -> GadgetCiphertext {
        let params = self.params.clone();
        let (ring_q, ring_p) = (params.ring_q(), params.ring_p());
        let (level_q, level_p) = (params.max_level(), params.max_level_p());
        let n = params.n();

        // P mod q_j, out of Montgomery form
        let p_mod_q: Vec<u64> = params.p_mod_q_montgomery().iter().zip(ring_q.moduli())
            .map(|(&x, q)| util::montgomery_reduce(x as u128, q))
            .collect();

        let beta = params.beta(level_q);
        let mut value = Vec::with_capacity(beta);
        for i in 0..beta {
            let mut a = PolyQP::new(n, level_q, level_p);
            sampling::uniform(&mut self.rng, ring_q.moduli(), n, a.q.data_mut());
            sampling::uniform(&mut self.rng, ring_p.moduli(), n, a.p.data_mut());

            let mut b = PolyQP::new(n, level_q, level_p);
            sample_error_qp(&mut self.rng, &params, &mut b);
            let mut a_s = PolyQP::new(n, level_q, level_p);
            ring_q.mul_coeffs_montgomery(level_q, &a.q, &s_out.q, &mut a_s.q);
            ring_p.mul_coeffs_montgomery(level_p, &a.p, &s_out.p, &mut a_s.p);
            ring_q.sub_assign(level_q, &a_s.q, &mut b.q);
            ring_p.sub_assign(level_p, &a_s.p, &mut b.p);

            let mut p_s = Poly::new(n, level_q);
            ring_q.mul_rns_scalar_montgomery(level_q, &s_in.q, &p_mod_q, &mut p_s);
            for j in params.decomposition_group(level_q, i) {
                let modulus = &ring_q.moduli()[j];
                b.q.residue_mut(j).iter_mut().zip(p_s.residue(j))
                    .for_each(|(x, &y)| *x = util::add_u64_mod(*x, y, modulus));
            }

            for poly in [&mut a, &mut b] {
                ring_q.mform_assign(level_q, &mut poly.q);
                ring_p.mform_assign(level_p, &mut poly.p);
            }
            value.push([b, a]);
        }

        GadgetCiphertext { value, level_q, level_p, parameters_id: *params.id() }
    }

}
