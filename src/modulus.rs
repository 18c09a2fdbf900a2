use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::util;

/// An integer modulus of up to 61 bits.
///
/// Every prime of the ciphertext moduli chains Q, P and QMul, as well as the
/// plaintext modulus T, is represented by a Modulus. Construction performs
/// the pre-computation needed by Barrett reduction (`floor(2^128 / q)`) and
/// by Montgomery reduction (`q^{-1} mod 2^64`).
#[derive(Debug, Eq, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(from = "u64", into = "u64")]
pub struct Modulus {
    value: u64,
    const_ratio: [u64; 3],
    montgomery_inv: u64,
    bit_count: usize,
    is_prime: bool,
}

impl Ord for Modulus {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value.cmp(&other.value)
    }
}

impl PartialOrd for Modulus {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Modulus {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl From<u64> for Modulus {
    fn from(value: u64) -> Self {
        Modulus::new(value)
    }
}

impl From<Modulus> for u64 {
    fn from(modulus: Modulus) -> Self {
        modulus.value
    }
}

impl Modulus {

    /// Create a new Modulus instance with the given value.
    ///
    /// Panics if the value is 1 or wider than 61 bits.
    pub fn new(value: u64) -> Self {
        if value == 0 {
            return Modulus::default();
        }
        if (value >> util::HE_MOD_BIT_COUNT_MAX != 0) || (value == 1) {
            panic!("[Invalid argument] Value can be at most 61-bit and cannot be 1.");
        }
        let mut ratio = u128::MAX / value as u128;
        let mut remainder = u128::MAX - ratio * value as u128 + 1;
        if remainder == value as u128 {
            ratio += 1;
            remainder = 0;
        }
        let mut ret = Modulus {
            value,
            const_ratio: [ratio as u64, (ratio >> 64) as u64, remainder as u64],
            montgomery_inv: Self::compute_montgomery_inv(value),
            bit_count: util::get_significant_bit_count(value),
            is_prime: false,
        };
        ret.is_prime = util::is_prime(&ret);
        ret
    }

    /// Newton iteration for `q^{-1} mod 2^64`, doubling the correct bits each step.
    fn compute_montgomery_inv(value: u64) -> u64 {
        if value & 1 == 0 {return 0;}
        let mut inv = value;
        for _ in 0..5 {
            inv = inv.wrapping_mul(2u64.wrapping_sub(value.wrapping_mul(inv)));
        }
        inv
    }

    /// Calculate the Barrett reduction.
    #[inline]
    pub fn reduce(&self, value: u64) -> u64 {
        util::barrett_reduce_u64(value, self)
    }

    /// Calculate the Barrett reduction on [u128].
    #[inline]
    pub fn reduce_u128(&self, value: u128) -> u64 {
        util::barrett_reduce_u128(value, self)
    }

    /// Reduce a signed value into `[0, q)`.
    #[inline]
    pub fn reduce_i64(&self, value: i64) -> u64 {
        let r = self.reduce(value.unsigned_abs());
        if value < 0 {util::negate_u64_mod(r, self)} else {r}
    }

    /// `floor(2^128 / q)` as two words, followed by `2^128 mod q`.
    pub fn const_ratio(&self) -> &[u64; 3] {&self.const_ratio}
    /// `q^{-1} mod 2^64`; zero for even moduli.
    pub fn montgomery_inv(&self) -> u64 {self.montgomery_inv}
    /// The [u64] value.
    pub fn value(&self) -> u64 {self.value}
    /// Is the value a prime number?
    pub fn is_prime(&self) -> bool {self.is_prime}
    /// Is the value zero?
    pub fn is_zero(&self) -> bool {self.value == 0}
    /// How many bits are there in the modulus?
    pub fn bit_count(&self) -> usize {self.bit_count}

}

impl std::fmt::Display for Modulus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Modulus ({})", self.value)
    }
}

/// Static helpers for creating ciphertext moduli chains.
pub struct CoeffModulus;

impl CoeffModulus {

    /// Returns distinct primes with the given bit-lengths (at most 60 bits),
    /// all congruent to 1 modulo `2 * poly_modulus_degree`.
    pub fn create(poly_modulus_degree: usize, bit_sizes: Vec<usize>) -> Vec<Modulus> {
        Self::create_excluding(poly_modulus_degree, bit_sizes, &[])
    }

    /// Same as [CoeffModulus::create], never returning any of the values in `exclude`.
    ///
    /// Used to generate chains that must be disjoint from moduli already in use,
    /// such as the special primes P next to Q.
    pub fn create_excluding(poly_modulus_degree: usize, bit_sizes: Vec<usize>, exclude: &[u64]) -> Vec<Modulus> {
        if !(util::HE_POLY_MOD_DEGREE_MIN..=util::HE_POLY_MOD_DEGREE_MAX).contains(&poly_modulus_degree) ||
            util::get_power_of_two(poly_modulus_degree as u64) < 0
        {
            panic!("[Invalid argument] Poly modulus degree is invalid.");
        }
        if bit_sizes.len() > util::HE_COEFF_MOD_COUNT_MAX {
            panic!("[Invalid argument] Bit sizes too many.");
        }
        if bit_sizes.iter().any(|&b| !(util::HE_USER_MOD_BIT_COUNT_MIN..=util::HE_USER_MOD_BIT_COUNT_MAX).contains(&b)) {
            panic!("[Invalid argument] Bit sizes invalid.");
        }
        let mut count_table = std::collections::BTreeMap::new();
        for size in &bit_sizes {
            *count_table.entry(*size).or_insert(0) += 1;
        }
        let factor = 2 * poly_modulus_degree as u64;
        let mut prime_table = std::collections::BTreeMap::new();
        for (size, count) in count_table {
            prime_table.insert(size, util::get_primes_excluding(factor, size, count, exclude));
        }
        bit_sizes.iter()
            .filter_map(|size| prime_table.get_mut(size).and_then(|r| r.pop()))
            .collect()
    }

}

/// Static helpers for creating a plaintext modulus.
pub struct PlainModulus;

impl PlainModulus {

    /// Creates a plaintext modulus supporting batching, that is a prime
    /// congruent to 1 modulo `2 * poly_modulus_degree`.
    pub fn batching(poly_modulus_degree: usize, bit_size: usize) -> Modulus {
        CoeffModulus::create(poly_modulus_degree, vec![bit_size])[0]
    }

}
