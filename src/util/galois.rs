use std::sync::{Arc, PoisonError, RwLock};

use crate::{util, Modulus};

pub(crate) const GALOIS_GENERATOR: u64 = 3;

/**
Galois elements of Z_{2N}^* and the permutations they induce on polynomials
in bit-reversed NTT representation. Permutation tables are generated lazily
and shared through a read-mostly cache, since every automorphism of a given
element reuses the same table.
*/
pub struct GaloisTool {
    coeff_count_power: usize,
    coeff_count: usize,
    permutation_tables: RwLock<Vec<Option<Arc<Vec<usize>>>>>,
}

impl GaloisTool {

    pub fn new(coeff_count_power: usize) -> Self {
        assert!(coeff_count_power as isize <= util::get_power_of_two(util::HE_POLY_MOD_DEGREE_MAX as u64)
            && coeff_count_power as isize >= util::get_power_of_two(util::HE_POLY_MOD_DEGREE_MIN as u64),
            "[Invalid argument] Coeff count power out of range.");
        GaloisTool {
            coeff_count_power,
            coeff_count: 1 << coeff_count_power,
            permutation_tables: RwLock::new(vec![None; 1 << coeff_count_power]),
        }
    }

    pub fn coeff_count(&self) -> usize {self.coeff_count}

    /**
    NTT-domain index table of X -> X^galois_elt: the transformed polynomial
    has value operand[table[i]] at position i.
    */
    pub fn generate_table_ntt(&self, galois_elt: u64) -> Vec<usize> {
        let coeff_count = self.coeff_count;
        let mask = coeff_count as u64 - 1;
        (coeff_count..(coeff_count << 1)).map(|i| {
            let reversed = util::reverse_bits_u32(i as u32, self.coeff_count_power + 1);
            let index_raw = ((galois_elt * reversed as u64) >> 1) & mask;
            util::reverse_bits_u32(index_raw as u32, self.coeff_count_power) as usize
        }).collect()
    }

    /**
    Galois element rotating the slot rows by `step` positions to the left
    (to the right when negative): 3^(step mod N/2) mod 2N. Step zero maps to the identity.
    */
    pub fn galois_element(&self, step: isize) -> u64 {
        let half = (self.coeff_count >> 1) as isize;
        let step = step.rem_euclid(half.max(1)) as u64;
        let m = (self.coeff_count << 1) as u64;
        let mut galois_elt = 1;
        let mut power = GALOIS_GENERATOR;
        let mut exponent = step;
        while exponent > 0 {
            if exponent & 1 == 1 {
                galois_elt = (galois_elt * power) & (m - 1);
            }
            power = (power * power) & (m - 1);
            exponent >>= 1;
        }
        galois_elt
    }

    /** Galois element swapping the two slot rows, X -> X^{2N-1}. */
    pub fn galois_element_row_swap(&self) -> u64 {
        (self.coeff_count << 1) as u64 - 1
    }

    /** Inverse of a Galois element in Z_{2N}^*. */
    pub fn inverse_galois_element(&self, galois_elt: u64) -> u64 {
        let mut inverse = 0;
        util::try_invert_u64_mod_u64(galois_elt, (self.coeff_count << 1) as u64, &mut inverse);
        inverse
    }

    /**
    Compute the index in the range of 0 to (coeff_count_ - 1) of a given Galois element.
    */
    pub fn get_index_from_elt(galois_elt: u64) -> usize {
        assert!(galois_elt & 1 > 0, "[Invalid argument] Galois elt is not invalid");
        ((galois_elt - 1) >> 1) as usize
    }

    /** Cached permutation table for `galois_elt`. */
    pub fn permutation_ntt(&self, galois_elt: u64) -> Arc<Vec<usize>> {
        let index = Self::get_index_from_elt(galois_elt) & (self.coeff_count - 1);
        {
            let tables = self.permutation_tables.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(table) = &tables[index] {
                return table.clone();
            }
        }
        let mut tables = self.permutation_tables.write().unwrap_or_else(PoisonError::into_inner);
        tables[index]
            .get_or_insert_with(|| Arc::new(self.generate_table_ntt(galois_elt)))
            .clone()
    }

    /** Coefficient-domain automorphism modulo one prime. */
    pub fn apply(&self, operand: &[u64], galois_elt: u64, modulus: &Modulus, result: &mut [u64]) {
        let mask = self.coeff_count - 1;
        let mut index_raw = 0usize;
        for &value in operand.iter().take(self.coeff_count) {
            let index = index_raw & mask;
            result[index] = if (index_raw >> self.coeff_count_power) & 1 > 0 {
                util::negate_u64_mod(value, modulus)
            } else {
                value
            };
            index_raw += galois_elt as usize;
        }
    }

    /** NTT-domain automorphism of one residue. */
    #[inline]
    pub fn apply_ntt(&self, operand: &[u64], galois_elt: u64, result: &mut [u64]) {
        let table = self.permutation_ntt(galois_elt);
        result.iter_mut().zip(table.iter()).for_each(|(r, &t)| *r = operand[t]);
    }

}
