use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::{Error, Result},
    util::{self, GaloisTool, RnsConverter},
    CoeffModulus,
    LogDimensions,
    Modulus,
    Ring,
};

/// A unique identifier for a set of parameters.
pub type ParametersId = util::hash::HashBlock;

/// Bit size of the primes of the auxiliary basis used by scale-invariant tensoring.
const QMUL_PRIME_BIT_COUNT: usize = 61;

fn default_noise_standard_deviation() -> f64 {
    3.2
}

/// The user-facing description of a parameter set.
///
/// Moduli are given either explicitly (`q`, `p`) or by bit sizes (`log_q`,
/// `log_p`), in which case NTT-friendly primes are generated. The special
/// primes P used by hybrid key switching must be non-empty.
///
/// ```rust
/// # use heathcliff_lintrans::*;
/// let literal = ParametersLiteral::new()
///     .set_log_n(4)
///     .set_log_q(vec![50, 50, 50])
///     .set_log_p(vec![60])
///     .set_plaintext_modulus(65537);
/// let params = Parameters::new(&literal).unwrap();
/// assert_eq!(params.max_level(), 2);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParametersLiteral {
    /// log2 of the ring degree.
    pub log_n: usize,
    /// Explicit primes of Q.
    #[serde(default)]
    pub q: Vec<u64>,
    /// Explicit special primes P.
    #[serde(default)]
    pub p: Vec<u64>,
    /// Bit sizes of generated primes of Q.
    #[serde(default)]
    pub log_q: Vec<usize>,
    /// Bit sizes of generated special primes P.
    #[serde(default)]
    pub log_p: Vec<usize>,
    /// The plaintext modulus T.
    pub plaintext_modulus: u64,
    /// Standard deviation of the error distribution.
    #[serde(default = "default_noise_standard_deviation")]
    pub noise_standard_deviation: f64,
}

impl Default for ParametersLiteral {
    fn default() -> Self {
        ParametersLiteral {
            log_n: 0,
            q: vec![],
            p: vec![],
            log_q: vec![],
            log_p: vec![],
            plaintext_modulus: 0,
            noise_standard_deviation: default_noise_standard_deviation(),
        }
    }
}

impl ParametersLiteral {

    /// An empty literal, to be filled with the setters.
    pub fn new() -> Self {
        Self::default()
    }

    /// See [ParametersLiteral] for an example.
    pub fn set_log_n(mut self, log_n: usize) -> Self {
        self.log_n = log_n;
        self
    }

    /// Sets explicit primes for Q.
    pub fn set_q(mut self, q: &[Modulus]) -> Self {
        self.q = q.iter().map(Modulus::value).collect();
        self
    }

    /// Sets explicit special primes P.
    pub fn set_p(mut self, p: &[Modulus]) -> Self {
        self.p = p.iter().map(Modulus::value).collect();
        self
    }

    /// See [ParametersLiteral] for an example.
    pub fn set_log_q(mut self, log_q: Vec<usize>) -> Self {
        self.log_q = log_q;
        self
    }

    /// See [ParametersLiteral] for an example.
    pub fn set_log_p(mut self, log_p: Vec<usize>) -> Self {
        self.log_p = log_p;
        self
    }

    /// See [ParametersLiteral] for an example.
    pub fn set_plaintext_modulus(mut self, plaintext_modulus: u64) -> Self {
        self.plaintext_modulus = plaintext_modulus;
        self
    }

    /// Sets the standard deviation of the error distribution.
    pub fn set_noise_standard_deviation(mut self, noise_standard_deviation: f64) -> Self {
        self.noise_standard_deviation = noise_standard_deviation;
        self
    }

}

/// Validated parameters with every precomputation needed by the evaluators.
///
/// Instances are created once with [Parameters::new] and shared read-only
/// behind an [Arc] by keys, encoders and evaluators.
pub struct Parameters {
    literal: ParametersLiteral,
    id: ParametersId,
    ring_q: Ring,
    ring_p: Ring,
    ring_qmul: Ring,
    ring_t: Ring,
    galois_tool: GaloisTool,

    // T * 2^128 mod q_i
    t_montgomery: Vec<u64>,
    t_inv_mod_q: Vec<u64>,
    // -Q_level mod T
    neg_q_mod_t: Vec<u64>,
    // P * 2^64 mod q_i
    p_mod_q_montgomery: Vec<u64>,
    level_qmul: Vec<usize>,
    qi_overflow_margin: usize,
    pi_overflow_margin: usize,

    // [level_q][group]
    decomposition: Vec<Vec<RnsConverter>>,
    p_to_q: Vec<RnsConverter>,
    q_to_qmul: Vec<RnsConverter>,
    qmul_to_q: Vec<RnsConverter>,
    q_to_t: Vec<RnsConverter>,
    // index level - 1 drops q_level
    rescale: Vec<RnsConverter>,
}

impl std::fmt::Debug for Parameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parameters")
            .field("log_n", &self.literal.log_n)
            .field("q", &self.ring_q.moduli())
            .field("p", &self.ring_p.moduli())
            .field("plaintext_modulus", &self.literal.plaintext_modulus)
            .finish()
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidParameters(message.into())
}

fn resolve_moduli(
    name: &str, explicit: &[u64], bit_sizes: &[usize], degree: usize, exclude: &[u64]
) -> Result<Vec<Modulus>> {
    match (explicit.is_empty(), bit_sizes.is_empty()) {
        (false, false) => Err(invalid(format!("{} given both explicitly and by bit sizes", name))),
        (true, true) => Err(invalid(format!("{} is empty", name))),
        (false, true) => {
            if explicit.iter().any(|&v| v >> util::HE_MOD_BIT_COUNT_MAX != 0 || v < 2) {
                return Err(invalid(format!("{} has a modulus wider than {} bits", name, util::HE_MOD_BIT_COUNT_MAX)));
            }
            Ok(explicit.iter().map(|&v| Modulus::new(v)).collect())
        }
        (true, false) => {
            if bit_sizes.len() > util::HE_COEFF_MOD_COUNT_MAX
                || bit_sizes.iter().any(|&b| !(util::HE_USER_MOD_BIT_COUNT_MIN..=util::HE_USER_MOD_BIT_COUNT_MAX).contains(&b))
            {
                return Err(invalid(format!("{} bit sizes {:?} are out of range", name, bit_sizes)));
            }
            Ok(CoeffModulus::create_excluding(degree, bit_sizes.to_vec(), exclude))
        }
    }
}

fn check_ntt_friendly(name: &str, moduli: &[Modulus], degree: usize) -> Result<()> {
    for m in moduli {
        if !m.is_prime() {
            return Err(invalid(format!("{} modulus {} is not prime", name, m.value())));
        }
        if m.value() % (2 * degree as u64) != 1 {
            return Err(invalid(format!("{} modulus {} is not 1 mod 2N", name, m.value())));
        }
    }
    Ok(())
}

fn product_mod(values: &[Modulus], modulus: &Modulus) -> u64 {
    values.iter().fold(1 % modulus.value(), |acc, v| util::multiply_u64_mod(acc, modulus.reduce(v.value()), modulus))
}

impl Parameters {

    /// Validates the literal and performs all precomputations.
    pub fn new(literal: &ParametersLiteral) -> Result<Arc<Parameters>> {
        let log_n = literal.log_n;
        if log_n < 1 || log_n as isize > util::get_power_of_two(util::HE_POLY_MOD_DEGREE_MAX as u64) {
            return Err(invalid(format!("log_n {} is out of range", log_n)));
        }
        let degree = 1usize << log_n;

        let q = resolve_moduli("Q", &literal.q, &literal.log_q, degree, &[])?;
        let q_values: Vec<u64> = q.iter().map(Modulus::value).collect();
        let p = resolve_moduli("P", &literal.p, &literal.log_p, degree, &q_values)?;
        check_ntt_friendly("Q", &q, degree)?;
        check_ntt_friendly("P", &p, degree)?;

        let mut all_values: Vec<u64> = q.iter().chain(p.iter()).map(Modulus::value).collect();
        all_values.sort_unstable();
        if all_values.windows(2).any(|w| w[0] == w[1]) {
            return Err(invalid("moduli of Q and P must be distinct"));
        }

        if literal.plaintext_modulus < 2 || literal.plaintext_modulus >> util::HE_MOD_BIT_COUNT_MAX != 0 {
            return Err(invalid(format!("plaintext modulus {} is out of range", literal.plaintext_modulus)));
        }
        let t = Modulus::new(literal.plaintext_modulus);
        if t.value() >= q[0].value() {
            return Err(invalid("plaintext modulus must be smaller than the first prime of Q"));
        }
        if q.iter().any(|qi| qi.value() % t.value() == 0) {
            return Err(invalid("plaintext modulus must not divide Q"));
        }
        if !t.is_prime() || t.value() % (2 * degree as u64) != 1 {
            return Err(invalid("plaintext modulus must be a prime congruent to 1 mod 2N for batching"));
        }
        if !(literal.noise_standard_deviation > 0.0) {
            return Err(invalid("noise standard deviation must be positive"));
        }

        let level_qmul: Vec<usize> = (0..q.len())
            .map(|level| {
                let bits = util::product_bit_count(&q_values[..=level]) + log_n;
                util::divide_round_up_usize(bits, QMUL_PRIME_BIT_COUNT) - 1
            })
            .collect();
        let qmul = util::get_primes_excluding(
            2 * degree as u64, QMUL_PRIME_BIT_COUNT, level_qmul[q.len() - 1] + 1, &all_values,
        );

        let ring_q = Ring::new(log_n, &q).map_err(invalid)?;
        let ring_p = Ring::new(log_n, &p).map_err(invalid)?;
        let ring_qmul = Ring::new(log_n, &qmul).map_err(invalid)?;
        let ring_t = Ring::new(log_n, &[t]).map_err(invalid)?;

        let t_montgomery = q.iter()
            .map(|qi| util::to_montgomery(util::to_montgomery(qi.reduce(t.value()), qi), qi))
            .collect();
        let mut t_inv_mod_q = Vec::with_capacity(q.len());
        for qi in &q {
            let mut inv = 0;
            if !util::try_invert_u64_mod(qi.reduce(t.value()), qi, &mut inv) {
                return Err(invalid("plaintext modulus is not invertible modulo Q"));
            }
            t_inv_mod_q.push(inv);
        }
        let neg_q_mod_t = (0..q.len())
            .map(|level| util::negate_u64_mod(product_mod(&q[..=level], &t), &t))
            .collect();
        let p_mod_q_montgomery = q.iter()
            .map(|qi| util::to_montgomery(product_mod(&p, qi), qi))
            .collect();

        let max_q = q.iter().map(Modulus::value).max().unwrap_or(1);
        let max_p = p.iter().map(Modulus::value).max().unwrap_or(1);
        // one slot is kept for the reduced value the accumulator restarts from
        let qi_overflow_margin = ((u64::MAX / max_q) as usize).saturating_sub(1).max(1);
        let pi_overflow_margin = ((u64::MAX / max_p) as usize).saturating_sub(1).max(1);

        let group = p.len();
        let mut decomposition = Vec::with_capacity(q.len());
        let mut p_to_q = Vec::with_capacity(q.len());
        let mut q_to_qmul = Vec::with_capacity(q.len());
        let mut qmul_to_q = Vec::with_capacity(q.len());
        let mut q_to_t = Vec::with_capacity(q.len());
        let mut rescale = Vec::with_capacity(q.len());
        for level in 0..q.len() {
            let active = &q[..=level];
            let mut per_level = vec![];
            for start in (0..=level).step_by(group) {
                let end = (start + group).min(level + 1);
                let rest: Vec<Modulus> = active[..start].iter()
                    .chain(active[end..].iter())
                    .chain(p.iter())
                    .copied()
                    .collect();
                per_level.push(RnsConverter::new(&active[start..end], &rest).map_err(invalid)?);
            }
            decomposition.push(per_level);
            p_to_q.push(RnsConverter::new(&p, active).map_err(invalid)?);
            let qmul_active = &qmul[..=level_qmul[level]];
            q_to_qmul.push(RnsConverter::new(active, qmul_active).map_err(invalid)?);
            qmul_to_q.push(RnsConverter::new(qmul_active, active).map_err(invalid)?);
            q_to_t.push(RnsConverter::new(active, &[t]).map_err(invalid)?);
            if level > 0 {
                rescale.push(RnsConverter::new(&q[level..=level], &q[..level]).map_err(invalid)?);
            }
        }

        let mut id_data = vec![log_n as u64, t.value()];
        id_data.extend(q.iter().map(Modulus::value));
        id_data.push(0);
        id_data.extend(p.iter().map(Modulus::value));
        let id = util::hash::hash(&id_data);

        debug!(log_n, q = q.len(), p = p.len(), qmul = qmul.len(), t = t.value(), "parameters created");

        Ok(Arc::new(Parameters {
            literal: literal.clone(),
            id,
            ring_q,
            ring_p,
            ring_qmul,
            ring_t,
            galois_tool: GaloisTool::new(log_n),
            t_montgomery,
            t_inv_mod_q,
            neg_q_mod_t,
            p_mod_q_montgomery,
            level_qmul,
            qi_overflow_margin,
            pi_overflow_margin,
            decomposition,
            p_to_q,
            q_to_qmul,
            qmul_to_q,
            q_to_t,
            rescale,
        }))
    }

    /// The literal these parameters were built from.
    pub fn literal(&self) -> &ParametersLiteral {&self.literal}
    /// SHA-256 based identifier of the moduli and degree.
    pub fn id(&self) -> &ParametersId {&self.id}
    /// log2 of the ring degree.
    pub fn log_n(&self) -> usize {self.ring_q.log_n()}
    /// The ring degree N.
    pub fn n(&self) -> usize {self.ring_q.coeff_count()}
    /// The ring over Q.
    pub fn ring_q(&self) -> &Ring {&self.ring_q}
    /// The ring over the special primes P.
    pub fn ring_p(&self) -> &Ring {&self.ring_p}
    /// The ring over the auxiliary basis of scale-invariant tensoring.
    pub fn ring_qmul(&self) -> &Ring {&self.ring_qmul}
    /// The ring modulo T.
    pub fn ring_t(&self) -> &Ring {&self.ring_t}
    /// The plaintext modulus T.
    pub fn plaintext_modulus(&self) -> &Modulus {&self.ring_t.moduli()[0]}
    /// Galois elements and permutation tables.
    pub fn galois_tool(&self) -> &GaloisTool {&self.galois_tool}
    /// Standard deviation of the error distribution.
    pub fn noise_standard_deviation(&self) -> f64 {self.literal.noise_standard_deviation}

    /// Highest level of Q.
    pub fn max_level(&self) -> usize {self.ring_q.max_level()}
    /// Highest level of P.
    pub fn max_level_p(&self) -> usize {self.ring_p.max_level()}
    /// Total number of slots, N.
    pub fn max_slots(&self) -> usize {self.n()}
    /// The 2 x N/2 slot matrix.
    pub fn max_log_dimensions(&self) -> LogDimensions {
        LogDimensions { rows: 1, cols: self.log_n() - 1 }
    }

    /// Galois element of a rotation of the slot rows by `k` columns.
    pub fn galois_element(&self, k: isize) -> u64 {self.galois_tool.galois_element(k)}
    /// Galois element swapping the two slot rows.
    pub fn galois_element_row_swap(&self) -> u64 {self.galois_tool.galois_element_row_swap()}
    /// Inverse of a Galois element modulo 2N.
    pub fn inverse_galois_element(&self, galois_element: u64) -> u64 {
        self.galois_tool.inverse_galois_element(galois_element)
    }

    /// T * 2^128 mod q_i, so that one Montgomery product multiplies by T while leaving Montgomery form.
    pub fn t_montgomery(&self) -> &[u64] {&self.t_montgomery}
    /// T^{-1} mod q_i.
    pub fn t_inv_mod_q(&self) -> &[u64] {&self.t_inv_mod_q}
    /// -Q_level mod T.
    pub fn neg_q_mod_t(&self, level: usize) -> u64 {self.neg_q_mod_t[level]}
    /// P * 2^64 mod q_i.
    pub fn p_mod_q_montgomery(&self) -> &[u64] {&self.p_mod_q_montgomery}
    /// Level of the auxiliary basis used at Q level `level`.
    pub fn level_qmul(&self, level: usize) -> usize {self.level_qmul[level]}
    /// Number of values below the largest q_i that can be added onto a reduced value without overflowing a u64.
    pub fn qi_overflow_margin(&self) -> usize {self.qi_overflow_margin}
    /// Number of values below the largest p_i that can be added onto a reduced value without overflowing a u64.
    pub fn pi_overflow_margin(&self) -> usize {self.pi_overflow_margin}

    /// Number of decomposition digits at `level_q`.
    pub fn beta(&self, level_q: usize) -> usize {
        util::divide_round_up_usize(level_q + 1, self.max_level_p() + 1)
    }

    /// The Q moduli of digit `i`.
    pub fn decomposition_group(&self, level_q: usize, i: usize) -> std::ops::Range<usize> {
        let group = self.max_level_p() + 1;
        i * group..((i + 1) * group).min(level_q + 1)
    }

    pub(crate) fn decomposition_converter(&self, level_q: usize, i: usize) -> &RnsConverter {
        &self.decomposition[level_q][i]
    }
    pub(crate) fn p_to_q(&self, level_q: usize) -> &RnsConverter {&self.p_to_q[level_q]}
    pub(crate) fn q_to_qmul(&self, level_q: usize) -> &RnsConverter {&self.q_to_qmul[level_q]}
    pub(crate) fn qmul_to_q(&self, level_q: usize) -> &RnsConverter {&self.qmul_to_q[level_q]}
    pub(crate) fn q_to_t(&self, level_q: usize) -> &RnsConverter {&self.q_to_t[level_q]}
    pub(crate) fn rescale_converter(&self, level_q: usize) -> &RnsConverter {&self.rescale[level_q - 1]}

}

#[cfg(test)]
mod tests {
    use super::*;

    fn literal() -> ParametersLiteral {
        ParametersLiteral::new()
            .set_log_n(4)
            .set_log_q(vec![50, 50, 50])
            .set_log_p(vec![60])
            .set_plaintext_modulus(65537)
    }

    #[test]
    fn test_create_parameters() {
        let params = Parameters::new(&literal()).unwrap();
        assert_eq!(params.n(), 16);
        assert_eq!(params.max_level(), 2);
        assert_eq!(params.max_level_p(), 0);
        assert_eq!(params.max_slots(), 16);
        assert_eq!(params.max_log_dimensions(), LogDimensions { rows: 1, cols: 3 });
        assert_eq!(params.beta(2), 3);
        assert_eq!(params.decomposition_group(2, 1), 1..2);
        // 50 + 4 bits fit one 61-bit prime, 150 + 4 bits need three
        assert_eq!(params.level_qmul(0), 0);
        assert_eq!(params.level_qmul(2), 2);
        for qi in params.ring_q().moduli() {
            assert_eq!(qi.value() % 32, 1);
        }
        let t = params.plaintext_modulus();
        let q0 = params.ring_q().moduli()[0];
        assert_eq!(
            util::add_u64_mod(params.neg_q_mod_t(0), t.reduce(q0.value()), t),
            0
        );
        let t_inv = params.t_inv_mod_q()[0];
        assert_eq!(util::multiply_u64_mod(t_inv, 65537, &q0), 1);
    }

    #[test]
    fn test_parameters_id_is_stable() {
        let a = Parameters::new(&literal()).unwrap();
        let b = Parameters::new(&literal()).unwrap();
        assert_eq!(a.id(), b.id());
        let c = Parameters::new(&literal().set_log_q(vec![50, 50])).unwrap();
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn test_invalid_parameters() {
        let no_p = literal().set_log_p(vec![]);
        assert!(matches!(Parameters::new(&no_p), Err(Error::InvalidParameters(_))));

        let bad_t = literal().set_plaintext_modulus(65539);
        assert!(matches!(Parameters::new(&bad_t), Err(Error::InvalidParameters(_))));

        let not_friendly = literal().set_log_q(vec![]).set_q(&[Modulus::new(65521)]);
        assert!(matches!(Parameters::new(&not_friendly), Err(Error::InvalidParameters(_))));

        let both = literal().set_q(&CoeffModulus::create(16, vec![50]));
        assert!(matches!(Parameters::new(&both), Err(Error::InvalidParameters(_))));

        let shared = ParametersLiteral::new()
            .set_log_n(4)
            .set_q(&CoeffModulus::create(16, vec![50]))
            .set_p(&CoeffModulus::create(16, vec![50]))
            .set_plaintext_modulus(65537);
        assert!(matches!(Parameters::new(&shared), Err(Error::InvalidParameters(_))));
    }

    #[test]
    fn test_literal_serde() {
        let literal = literal();
        let bytes = bincode::serialize(&literal).unwrap();
        let decoded: ParametersLiteral = bincode::deserialize(&bytes).unwrap();
        assert_eq!(literal, decoded);
    }
}
