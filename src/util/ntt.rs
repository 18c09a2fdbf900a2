use crate::{
    util, Modulus,
    util::MultiplyU64ModOperand,
};

/**
Precomputed tables for the negacyclic number-theoretic transform modulo one prime.

The forward transform is a Cooley-Tukey decimation in time with Harvey's lazy
butterflies, writing its output in bit-reversed order. The inverse transform
consumes bit-reversed input and merges the multiplication by 1/n into the final
pass. Powers of the inverse root are stored so that slot i holds
the (reverse_bits(i - 1) + 1)-th power.
*/
#[derive(Clone, Debug, Default)]
pub struct NTTTables {
    root: u64,
    coeff_count_power: usize,
    coeff_count: usize,
    modulus: Modulus,
    inv_degree_modulo: MultiplyU64ModOperand,
    root_powers: Vec<MultiplyU64ModOperand>,
    inv_root_powers: Vec<MultiplyU64ModOperand>,
}

impl NTTTables {

    pub fn new(coeff_count_power: usize, modulus: &Modulus) -> Result<Self, String> {
        let coeff_count = 1usize << coeff_count_power;
        let modulus = *modulus;
        let mut root: u64 = 0;
        if !util::try_minimal_primitive_root(2 * coeff_count as u64, &modulus, &mut root) {
            return Err(format!("no primitive {}-th root of unity modulo {}", 2 * coeff_count, modulus.value()));
        }
        let mut inv_root: u64 = 0;
        if !util::try_invert_u64_mod(root, &modulus, &mut inv_root) {
            return Err(format!("root {} is not invertible modulo {}", root, modulus.value()));
        }

        let mut root_powers = vec![MultiplyU64ModOperand::new(1, &modulus); coeff_count];
        let root_operand = MultiplyU64ModOperand::new(root, &modulus);
        let mut power = root;
        for i in 1..coeff_count {
            root_powers[util::reverse_bits_u64(i as u64, coeff_count_power) as usize] = MultiplyU64ModOperand::new(power, &modulus);
            power = util::multiply_u64operand_mod(power, &root_operand, &modulus);
        }

        let mut inv_root_powers = vec![MultiplyU64ModOperand::new(1, &modulus); coeff_count];
        let root_operand = MultiplyU64ModOperand::new(inv_root, &modulus);
        let mut power = inv_root;
        for i in 1..coeff_count {
            inv_root_powers[util::reverse_bits_u64((i - 1) as u64, coeff_count_power) as usize + 1] = MultiplyU64ModOperand::new(power, &modulus);
            power = util::multiply_u64operand_mod(power, &root_operand, &modulus);
        }

        let mut inv_degree_modulo = 0;
        if !util::try_invert_u64_mod(coeff_count as u64, &modulus, &mut inv_degree_modulo) {
            return Err(format!("degree {} is not invertible modulo {}", coeff_count, modulus.value()));
        }

        Ok(NTTTables {
            root,
            coeff_count_power,
            coeff_count,
            modulus,
            inv_degree_modulo: MultiplyU64ModOperand::new(inv_degree_modulo, &modulus),
            root_powers,
            inv_root_powers,
        })
    }

    pub fn root(&self) -> u64 {self.root}
    pub fn modulus(&self) -> &Modulus {&self.modulus}
    pub fn get_root_powers(&self) -> &[MultiplyU64ModOperand] {&self.root_powers}
    pub fn get_inv_root_powers(&self) -> &[MultiplyU64ModOperand] {&self.inv_root_powers}
    pub fn coeff_count_power(&self) -> usize {self.coeff_count_power}
    pub fn coeff_count(&self) -> usize {self.coeff_count}

    pub fn create_ntt_tables(coeff_count_power: usize, moduli: &[Modulus]) -> Result<Vec<NTTTables>, String> {
        moduli.iter().map(|m| Self::new(coeff_count_power, m)).collect()
    }

    /** Input in [0, 4q), output in [0, 4q). */
    pub fn ntt_negacyclic_harvey_lazy(&self, values: &mut [u64]) {
        let q = self.modulus.value();
        let two_q = q << 1;
        let n = self.coeff_count;
        for layer in 0..self.coeff_count_power {
            let m = 1 << layer;
            let gap = n >> (1 + layer);
            for (i, r) in self.root_powers[m..2 * m].iter().enumerate() {
                let offset = i * 2 * gap;
                let (left, right) = values[offset..offset + 2 * gap].split_at_mut(gap);
                for (x, y) in left.iter_mut().zip(right.iter_mut()) {
                    let u = if *x >= two_q {*x - two_q} else {*x};
                    let v = util::multiply_u64operand_mod_lazy(*y, r, &self.modulus);
                    *x = u + v;
                    *y = u + two_q - v;
                }
            }
        }
    }

    pub fn ntt_negacyclic_harvey(&self, values: &mut [u64]) {
        self.ntt_negacyclic_harvey_lazy(values);
        let q = self.modulus.value();
        let two_q = q << 1;
        values.iter_mut().for_each(|x| {
            if *x >= two_q {*x -= two_q}
            if *x >= q {*x -= q}
        });
    }

    /** Input in [0, 2q), output in [0, 2q). */
    pub fn inverse_ntt_negacyclic_harvey_lazy(&self, values: &mut [u64]) {
        let two_q = self.modulus.value() << 1;
        let n = self.coeff_count;
        for layer in 0..self.coeff_count_power {
            let gap = 1 << layer;
            let m = n >> (1 + layer);
            for (i, r) in self.inv_root_powers[n - 2 * m + 1..n - m + 1].iter().enumerate() {
                let offset = i * 2 * gap;
                let (left, right) = values[offset..offset + 2 * gap].split_at_mut(gap);
                for (x, y) in left.iter_mut().zip(right.iter_mut()) {
                    let sum = *x + *y;
                    let u = if sum >= two_q {sum - two_q} else {sum};
                    let v = *x + two_q - *y;
                    *x = u;
                    *y = util::multiply_u64operand_mod_lazy(v, r, &self.modulus);
                }
            }
        }
        values.iter_mut().for_each(|x| {
            *x = util::multiply_u64operand_mod_lazy(*x, &self.inv_degree_modulo, &self.modulus);
        });
    }

    pub fn inverse_ntt_negacyclic_harvey(&self, values: &mut [u64]) {
        self.inverse_ntt_negacyclic_harvey_lazy(values);
        let q = self.modulus.value();
        values.iter_mut().for_each(|x| {
            if *x >= q {*x -= q}
        });
    }

}
