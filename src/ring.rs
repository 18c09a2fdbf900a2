use itertools::multizip;
use serde::{Deserialize, Serialize};

use crate::{
    Modulus,
    util::{self, NTTTables, MultiplyU64ModOperand},
};

/// A polynomial in RNS representation.
///
/// Residues are stored modulus-major: the coefficients modulo the i-th prime
/// occupy `data[i * n..(i + 1) * n]`. The level of the polynomial is the
/// number of residues minus one.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poly {
    coeff_count: usize,
    data: Vec<u64>,
}

impl Poly {

    /// A zero polynomial with `level + 1` residues of `coeff_count` coefficients.
    pub fn new(coeff_count: usize, level: usize) -> Self {
        Poly { coeff_count, data: vec![0; coeff_count * (level + 1)] }
    }

    /// Number of coefficients per residue.
    pub fn coeff_count(&self) -> usize {self.coeff_count}

    /// Number of residues minus one.
    pub fn level(&self) -> usize {
        (self.data.len() / self.coeff_count.max(1)).saturating_sub(1)
    }

    /// All residues.
    pub fn data(&self) -> &[u64] {&self.data}

    /// All residues, mutable.
    pub fn data_mut(&mut self) -> &mut [u64] {&mut self.data}

    /// Residues `0..=level`.
    pub fn data_at_level(&self, level: usize) -> &[u64] {
        &self.data[..(level + 1) * self.coeff_count]
    }

    /// The i-th residue.
    pub fn residue(&self, i: usize) -> &[u64] {
        &self.data[i * self.coeff_count..(i + 1) * self.coeff_count]
    }

    /// The i-th residue, mutable.
    pub fn residue_mut(&mut self, i: usize) -> &mut [u64] {
        &mut self.data[i * self.coeff_count..(i + 1) * self.coeff_count]
    }

    /// Adds or drops residues so that the polynomial is at `level`.
    pub fn resize(&mut self, level: usize) {
        self.data.resize(self.coeff_count * (level + 1), 0);
    }

    /// Copies residues `0..=level` of `other`. Both must hold at least `level + 1` residues.
    pub fn copy_from(&mut self, level: usize, other: &Poly) {
        let len = (level + 1) * self.coeff_count;
        self.data[..len].copy_from_slice(&other.data[..len]);
    }

    /// Sets every coefficient to zero.
    pub fn zero(&mut self) {
        self.data.fill(0);
    }

}

/// A polynomial over the extended basis QP, as two RNS polynomials.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolyQP {
    /// Residues modulo the primes of Q.
    pub q: Poly,
    /// Residues modulo the special primes P.
    pub p: Poly,
}

impl PolyQP {

    /// A zero polynomial at levels `level_q` and `level_p`.
    pub fn new(coeff_count: usize, level_q: usize, level_p: usize) -> Self {
        PolyQP { q: Poly::new(coeff_count, level_q), p: Poly::new(coeff_count, level_p) }
    }

    /// Copies both halves of `other` at the given levels.
    pub fn copy_from(&mut self, level_q: usize, level_p: usize, other: &PolyQP) {
        self.q.copy_from(level_q, &other.q);
        self.p.copy_from(level_p, &other.p);
    }

}

/// The polynomial ring Z_Q[X]/(X^N + 1) for a chain of NTT-friendly primes.
///
/// Every operation takes a `level` and works on the first `level + 1` residues
/// only; operands must hold at least that many.
#[derive(Clone, Debug)]
pub struct Ring {
    log_n: usize,
    coeff_count: usize,
    moduli: Vec<Modulus>,
    ntt_tables: Vec<NTTTables>,
    // 2^64 mod q_i
    mont_one: Vec<u64>,
}

impl Ring {

    /// Builds the ring and its NTT tables. Every modulus must be a prime congruent to 1 modulo 2N.
    pub fn new(log_n: usize, moduli: &[Modulus]) -> Result<Self, String> {
        let ntt_tables = NTTTables::create_ntt_tables(log_n, moduli)?;
        Ok(Ring {
            log_n,
            coeff_count: 1 << log_n,
            moduli: moduli.to_vec(),
            ntt_tables,
            mont_one: moduli.iter().map(|m| util::to_montgomery(1, m)).collect(),
        })
    }

    /// log2 of the ring degree.
    pub fn log_n(&self) -> usize {self.log_n}
    /// The ring degree N.
    pub fn coeff_count(&self) -> usize {self.coeff_count}
    /// All primes of the ring.
    pub fn moduli(&self) -> &[Modulus] {&self.moduli}
    /// The index of the last prime.
    pub fn max_level(&self) -> usize {self.moduli.len().saturating_sub(1)}
    /// Whether the ring has no primes.
    pub fn is_empty(&self) -> bool {self.moduli.is_empty()}

    /// A zero polynomial at `level`.
    pub fn new_poly(&self, level: usize) -> Poly {
        Poly::new(self.coeff_count, level)
    }

    /// A zero polynomial at the maximum level.
    pub fn new_poly_max(&self) -> Poly {
        Poly::new(self.coeff_count, self.max_level())
    }

    #[inline]
    fn residues<'a>(&'a self, level: usize) -> impl Iterator<Item = (usize, &'a Modulus)> + 'a {
        self.moduli[..=level].iter().enumerate()
    }

    #[inline]
    fn range(&self, i: usize) -> std::ops::Range<usize> {
        i * self.coeff_count..(i + 1) * self.coeff_count
    }

    /// out = a + b
    pub fn add(&self, level: usize, a: &Poly, b: &Poly, out: &mut Poly) {
        for (i, m) in self.residues(level) {
            let r = self.range(i);
            multizip((&mut out.data[r.clone()], &a.data[r.clone()], &b.data[r]))
                .for_each(|(o, &x, &y)| *o = util::add_u64_mod(x, y, m));
        }
    }

    /// out += a
    pub fn add_assign(&self, level: usize, a: &Poly, out: &mut Poly) {
        for (i, m) in self.residues(level) {
            let r = self.range(i);
            out.data[r.clone()].iter_mut().zip(&a.data[r])
                .for_each(|(o, &x)| *o = util::add_u64_mod(*o, x, m));
        }
    }

    /// out += a without reduction.
    pub fn add_lazy_assign(&self, level: usize, a: &Poly, out: &mut Poly) {
        let len = (level + 1) * self.coeff_count;
        out.data[..len].iter_mut().zip(&a.data[..len]).for_each(|(o, &x)| *o += x);
    }

    /// out -= a
    pub fn sub_assign(&self, level: usize, a: &Poly, out: &mut Poly) {
        for (i, m) in self.residues(level) {
            let r = self.range(i);
            out.data[r.clone()].iter_mut().zip(&a.data[r])
                .for_each(|(o, &x)| *o = util::sub_u64_mod(*o, x, m));
        }
    }

    /// out = a - b
    pub fn sub(&self, level: usize, a: &Poly, b: &Poly, out: &mut Poly) {
        for (i, m) in self.residues(level) {
            let r = self.range(i);
            multizip((&mut out.data[r.clone()], &a.data[r.clone()], &b.data[r]))
                .for_each(|(o, &x, &y)| *o = util::sub_u64_mod(x, y, m));
        }
    }

    /// out = -out
    pub fn neg_assign(&self, level: usize, out: &mut Poly) {
        for (i, m) in self.residues(level) {
            out.data[self.range(i)].iter_mut().for_each(|o| *o = util::negate_u64_mod(*o, m));
        }
    }

    /// Brings every coefficient into `[0, q_i)`.
    pub fn reduce_assign(&self, level: usize, out: &mut Poly) {
        for (i, m) in self.residues(level) {
            out.data[self.range(i)].iter_mut().for_each(|o| *o = m.reduce(*o));
        }
    }

    /// Forward NTT.
    pub fn ntt_assign(&self, level: usize, out: &mut Poly) {
        for (i, _) in self.residues(level) {
            self.ntt_tables[i].ntt_negacyclic_harvey(&mut out.data[self.range(i)]);
        }
    }

    /// Inverse NTT.
    pub fn intt_assign(&self, level: usize, out: &mut Poly) {
        for (i, _) in self.residues(level) {
            self.ntt_tables[i].inverse_ntt_negacyclic_harvey(&mut out.data[self.range(i)]);
        }
    }

    /// Forward NTT of the i-th residue only.
    pub fn ntt_residue(&self, i: usize, values: &mut [u64]) {
        self.ntt_tables[i].ntt_negacyclic_harvey(values);
    }

    /// Inverse NTT of the i-th residue only.
    pub fn intt_residue(&self, i: usize, values: &mut [u64]) {
        self.ntt_tables[i].inverse_ntt_negacyclic_harvey(values);
    }

    /// Switches into Montgomery form: out = out * 2^64.
    pub fn mform_assign(&self, level: usize, out: &mut Poly) {
        for (i, m) in self.residues(level) {
            out.data[self.range(i)].iter_mut().for_each(|o| *o = util::to_montgomery(*o, m));
        }
    }

    /// Leaves Montgomery form: out = out * 2^-64.
    pub fn imform_assign(&self, level: usize, out: &mut Poly) {
        for (i, m) in self.residues(level) {
            out.data[self.range(i)].iter_mut().for_each(|o| *o = util::montgomery_reduce(*o as u128, m));
        }
    }

    /// out = a * b * 2^-64. Inputs must be reduced.
    pub fn mul_coeffs_montgomery(&self, level: usize, a: &Poly, b: &Poly, out: &mut Poly) {
        for (i, m) in self.residues(level) {
            let r = self.range(i);
            multizip((&mut out.data[r.clone()], &a.data[r.clone()], &b.data[r]))
                .for_each(|(o, &x, &y)| *o = util::montgomery_reduce(x as u128 * y as u128, m));
        }
    }

    /// out = out * a * 2^-64.
    pub fn mul_coeffs_montgomery_assign(&self, level: usize, a: &Poly, out: &mut Poly) {
        for (i, m) in self.residues(level) {
            let r = self.range(i);
            out.data[r.clone()].iter_mut().zip(&a.data[r])
                .for_each(|(o, &x)| *o = util::montgomery_reduce(*o as u128 * x as u128, m));
        }
    }

    /// out += a * b * 2^-64, reduced.
    pub fn mul_coeffs_montgomery_then_add(&self, level: usize, a: &Poly, b: &Poly, out: &mut Poly) {
        for (i, m) in self.residues(level) {
            let r = self.range(i);
            multizip((&mut out.data[r.clone()], &a.data[r.clone()], &b.data[r]))
                .for_each(|(o, &x, &y)| {
                    *o = util::add_u64_mod(*o, util::montgomery_reduce(x as u128 * y as u128, m), m)
                });
        }
    }

    /// out += a * b * 2^-64 where each product is reduced into `[0, q_i)` and the sum is not.
    pub fn mul_coeffs_montgomery_then_add_lazy(&self, level: usize, a: &Poly, b: &Poly, out: &mut Poly) {
        for (i, m) in self.residues(level) {
            let r = self.range(i);
            multizip((&mut out.data[r.clone()], &a.data[r.clone()], &b.data[r]))
                .for_each(|(o, &x, &y)| *o += util::montgomery_reduce(x as u128 * y as u128, m));
        }
    }

    /// out = out * scalar, with `scalar` any u64.
    pub fn mul_scalar_assign(&self, level: usize, scalar: u64, out: &mut Poly) {
        for (i, m) in self.residues(level) {
            let operand = MultiplyU64ModOperand::new(m.reduce(scalar), m);
            out.data[self.range(i)].iter_mut()
                .for_each(|o| *o = util::multiply_u64operand_mod(*o, &operand, m));
        }
    }

    /// out += a * scalar, with `scalar` any u64.
    pub fn mul_scalar_then_add(&self, level: usize, a: &Poly, scalar: u64, out: &mut Poly) {
        for (i, m) in self.residues(level) {
            let operand = MultiplyU64ModOperand::new(m.reduce(scalar), m);
            let r = self.range(i);
            out.data[r.clone()].iter_mut().zip(&a.data[r])
                .for_each(|(o, &x)| *o = util::add_u64_mod(*o, util::multiply_u64operand_mod(x, &operand, m), m));
        }
    }

    /// out = a * scalar_i * 2^-64 per residue, with `scalar` holding one reduced value per prime.
    pub fn mul_rns_scalar_montgomery(&self, level: usize, a: &Poly, scalar: &[u64], out: &mut Poly) {
        for (i, m) in self.residues(level) {
            let r = self.range(i);
            let s = scalar[i] as u128;
            out.data[r.clone()].iter_mut().zip(&a.data[r])
                .for_each(|(o, &x)| *o = util::montgomery_reduce(x as u128 * s, m));
        }
    }

    /// out = out * scalar_i * 2^-64 per residue.
    pub fn mul_rns_scalar_montgomery_assign(&self, level: usize, scalar: &[u64], out: &mut Poly) {
        for (i, m) in self.residues(level) {
            let s = scalar[i] as u128;
            out.data[self.range(i)].iter_mut()
                .for_each(|o| *o = util::montgomery_reduce(*o as u128 * s, m));
        }
    }

    /// out = a with the NTT-domain permutation `index` applied to every residue.
    pub fn automorphism_ntt_with_index(&self, level: usize, a: &Poly, index: &[usize], out: &mut Poly) {
        for (i, _) in self.residues(level) {
            let r = self.range(i);
            let src = &a.data[r.clone()];
            out.data[r].iter_mut().zip(index).for_each(|(o, &k)| *o = src[k]);
        }
    }

    /// out += a permuted by `index`, without reduction.
    pub fn automorphism_ntt_with_index_then_add_lazy(&self, level: usize, a: &Poly, index: &[usize], out: &mut Poly) {
        for (i, _) in self.residues(level) {
            let r = self.range(i);
            let src = &a.data[r.clone()];
            out.data[r].iter_mut().zip(index).for_each(|(o, &k)| *o += src[k]);
        }
    }

    /// Writes the signed coefficients `values` into every residue of `out`.
    pub fn set_coefficients_i64(&self, level: usize, values: &[i64], out: &mut Poly) {
        for (i, m) in self.residues(level) {
            out.data[self.range(i)].iter_mut().zip(values)
                .for_each(|(o, &v)| *o = m.reduce_i64(v));
        }
    }

    /// 2^64 mod q_i for every prime, the Montgomery representation of one.
    pub fn montgomery_one(&self) -> &[u64] {&self.mont_one}

    /// Residues of `value` modulo every prime, in Montgomery form.
    pub fn rns_scalar_montgomery(&self, value: u64) -> Vec<u64> {
        self.moduli.iter().map(|m| util::to_montgomery(m.reduce(value), m)).collect()
    }

    /// Whether the first `level + 1` residues of `a` and `b` agree.
    pub fn equal(&self, level: usize, a: &Poly, b: &Poly) -> bool {
        a.data_at_level(level) == b.data_at_level(level)
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CoeffModulus;
    use rand::{Rng, SeedableRng};

    fn random_poly(ring: &Ring, level: usize, rng: &mut impl Rng) -> Poly {
        let mut p = ring.new_poly(level);
        util::sampling::uniform(rng, &ring.moduli()[..=level], ring.coeff_count(), p.data_mut());
        p
    }

    #[test]
    fn test_poly_layout() {
        let mut p = Poly::new(4, 2);
        assert_eq!(p.level(), 2);
        p.residue_mut(1).copy_from_slice(&[1, 2, 3, 4]);
        assert_eq!(p.data()[4..8], [1, 2, 3, 4]);
        p.resize(0);
        assert_eq!(p.level(), 0);
        assert_eq!(p.data().len(), 4);
    }

    #[test]
    fn test_montgomery_multiplication_matches_schoolbook() {
        let moduli = CoeffModulus::create(8, vec![40, 50]);
        let ring = Ring::new(3, &moduli).unwrap();
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
        let a = random_poly(&ring, 1, &mut rng);
        let b = random_poly(&ring, 1, &mut rng);

        // schoolbook negacyclic product
        let mut expected = ring.new_poly(1);
        for (i, m) in moduli.iter().enumerate() {
            let (x, y) = (a.residue(i), b.residue(i));
            let out = expected.residue_mut(i);
            for j in 0..8 {
                for k in 0..8 {
                    let prod = util::multiply_u64_mod(x[j], y[k], m);
                    if j + k < 8 {
                        out[j + k] = util::add_u64_mod(out[j + k], prod, m);
                    } else {
                        out[j + k - 8] = util::sub_u64_mod(out[j + k - 8], prod, m);
                    }
                }
            }
        }

        let (mut a_ntt, mut b_ntt) = (a.clone(), b.clone());
        ring.ntt_assign(1, &mut a_ntt);
        ring.ntt_assign(1, &mut b_ntt);
        ring.mform_assign(1, &mut b_ntt);
        let mut c = ring.new_poly(1);
        ring.mul_coeffs_montgomery(1, &a_ntt, &b_ntt, &mut c);
        ring.intt_assign(1, &mut c);
        assert_eq!(c, expected);
    }

    #[test]
    fn test_add_sub_neg() {
        let moduli = CoeffModulus::create(8, vec![30, 30]);
        let ring = Ring::new(3, &moduli).unwrap();
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
        let a = random_poly(&ring, 1, &mut rng);
        let b = random_poly(&ring, 1, &mut rng);
        let mut c = ring.new_poly(1);
        ring.add(1, &a, &b, &mut c);
        ring.sub_assign(1, &b, &mut c);
        assert_eq!(c, a);
        ring.neg_assign(1, &mut c);
        ring.add_assign(1, &a, &mut c);
        assert!(c.data().iter().all(|&x| x == 0));

        let mut lazy = a.clone();
        ring.add_lazy_assign(1, &b, &mut lazy);
        ring.reduce_assign(1, &mut lazy);
        ring.add(1, &a, &b, &mut c);
        assert_eq!(lazy, c);
    }

    #[test]
    fn test_scalar_operations() {
        let moduli = CoeffModulus::create(8, vec![30, 40]);
        let ring = Ring::new(3, &moduli).unwrap();
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
        let a = random_poly(&ring, 1, &mut rng);

        let mut by_scalar = a.clone();
        ring.mul_scalar_assign(1, 65537, &mut by_scalar);

        let mut by_rns = ring.new_poly(1);
        let scalar = ring.rns_scalar_montgomery(65537);
        ring.mul_rns_scalar_montgomery(1, &a, &scalar, &mut by_rns);
        assert_eq!(by_scalar, by_rns);

        let mut accumulated = ring.new_poly(1);
        ring.mul_scalar_then_add(1, &a, 65537, &mut accumulated);
        assert_eq!(accumulated, by_scalar);

        let mut mont = a.clone();
        ring.mform_assign(1, &mut mont);
        ring.imform_assign(1, &mut mont);
        assert_eq!(mont, a);
    }

    #[test]
    fn test_set_coefficients_i64() {
        let moduli = [Modulus::new(17), Modulus::new(97)];
        let ring = Ring::new(3, &moduli).unwrap();
        let mut p = ring.new_poly(1);
        ring.set_coefficients_i64(1, &[-1, 0, 1, 2, -2, 0, 0, 5], &mut p);
        assert_eq!(p.residue(0), &[16, 0, 1, 2, 15, 0, 0, 5]);
        assert_eq!(p.residue(1), &[96, 0, 1, 2, 95, 0, 0, 5]);
    }
}
