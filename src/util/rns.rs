use crate::{
    Modulus,
    util::{self, MultiplyU64ModOperand},
};

/**
Exact conversion between two coprime RNS bases.

Given residues of an integer x modulo the source base Q = q_0 ... q_{k-1},
[RnsConverter::mod_up] computes the residues of the centered representative
of x, that is the unique value in (-Q/2, Q/2] congruent to x, modulo every
prime of the destination base. The overflow count of the CRT reconstruction
is recovered in floating point; the input is first shifted by (Q - 1)/2 so that
centered small values sit far away from the boundaries where the estimate
could be off by one.

[RnsConverter::mod_down_finish] completes a rounded division by Q:
(y - ext) * Q^{-1} over the destination base.
*/
#[derive(Clone, Debug)]
pub struct RnsConverter {
    base: Vec<Modulus>,
    dst: Vec<Modulus>,
    inv_punctured_prod_mod_base: Vec<MultiplyU64ModOperand>,
    // [j][i] = (Q / q_i) mod p_j
    punctured_prod_mod_dst: Vec<Vec<u64>>,
    base_prod_mod_dst: Vec<u64>,
    half_base_prod_mod_base: Vec<u64>,
    half_base_prod_mod_dst: Vec<u64>,
    inv_base_f64: Vec<f64>,
    inv_base_prod_mod_dst: Vec<MultiplyU64ModOperand>,
}

/** Product of `values` modulo `modulus`, skipping index `except`. */
fn multiply_many_u64_except_mod(values: &[Modulus], except: Option<usize>, modulus: &Modulus) -> u64 {
    values.iter().enumerate()
        .filter(|(i, _)| Some(*i) != except)
        .fold(1 % modulus.value(), |acc, (_, m)| util::multiply_u64_mod(acc, modulus.reduce(m.value()), modulus))
}

impl RnsConverter {

    pub fn new(base: &[Modulus], dst: &[Modulus]) -> Result<Self, String> {
        if base.is_empty() {
            return Err("RNS base cannot be empty".to_string());
        }
        for (i, q) in base.iter().chain(dst.iter()).enumerate() {
            if q.value() & 1 == 0 {
                return Err(format!("RNS modulus {} must be odd", q.value()));
            }
            for p in base.iter().chain(dst.iter()).skip(i + 1) {
                if util::gcd(q.value(), p.value()) != 1 {
                    return Err(format!("RNS moduli {} and {} are not coprime", q.value(), p.value()));
                }
            }
        }

        let mut inv_punctured_prod_mod_base = Vec::with_capacity(base.len());
        let mut half_base_prod_mod_base = Vec::with_capacity(base.len());
        for (i, q) in base.iter().enumerate() {
            let punctured = multiply_many_u64_except_mod(base, Some(i), q);
            let mut inv = 0;
            if !util::try_invert_u64_mod(punctured, q, &mut inv) {
                return Err(format!("punctured product is not invertible modulo {}", q.value()));
            }
            inv_punctured_prod_mod_base.push(MultiplyU64ModOperand::new(inv, q));
            // (Q - 1) / 2 = -2^{-1} mod q
            half_base_prod_mod_base.push((q.value() - 1) >> 1);
        }

        let mut punctured_prod_mod_dst = Vec::with_capacity(dst.len());
        let mut base_prod_mod_dst = Vec::with_capacity(dst.len());
        let mut half_base_prod_mod_dst = Vec::with_capacity(dst.len());
        let mut inv_base_prod_mod_dst = Vec::with_capacity(dst.len());
        for p in dst {
            punctured_prod_mod_dst.push((0..base.len()).map(|i| multiply_many_u64_except_mod(base, Some(i), p)).collect());
            let prod = multiply_many_u64_except_mod(base, None, p);
            base_prod_mod_dst.push(prod);
            // (Q - 1) / 2 = (Q - 1) * 2^{-1} mod p
            let inv_two = (p.value() + 1) >> 1;
            half_base_prod_mod_dst.push(util::multiply_u64_mod(util::sub_u64_mod(prod, 1, p), inv_two, p));
            let mut inv = 0;
            if !util::try_invert_u64_mod(prod, p, &mut inv) {
                return Err(format!("base product is not invertible modulo {}", p.value()));
            }
            inv_base_prod_mod_dst.push(MultiplyU64ModOperand::new(inv, p));
        }

        Ok(RnsConverter {
            base: base.to_vec(),
            dst: dst.to_vec(),
            inv_punctured_prod_mod_base,
            punctured_prod_mod_dst,
            base_prod_mod_dst,
            half_base_prod_mod_base,
            half_base_prod_mod_dst,
            inv_base_f64: base.iter().map(|q| 1.0 / q.value() as f64).collect(),
            inv_base_prod_mod_dst,
        })
    }

    pub fn base(&self) -> &[Modulus] {&self.base}
    pub fn dst(&self) -> &[Modulus] {&self.dst}

    /**
    Centered basis extension of `n` coefficients. `input` holds one residue
    polynomial per base modulus in `[0, q_i)`, `output` one per destination modulus.
    */
    pub fn mod_up(&self, n: usize, input: &[u64], output: &mut [u64]) {
        let base_size = self.base.len();
        let mut y = vec![0u64; base_size];
        for k in 0..n {
            let mut overflow = 0f64;
            for (i, q) in self.base.iter().enumerate() {
                let shifted = util::add_u64_mod(input[i * n + k], self.half_base_prod_mod_base[i], q);
                y[i] = util::multiply_u64operand_mod(shifted, &self.inv_punctured_prod_mod_base[i], q);
                overflow += y[i] as f64 * self.inv_base_f64[i];
            }
            let overflow = overflow.floor() as u64;
            for (j, p) in self.dst.iter().enumerate() {
                let punctured = &self.punctured_prod_mod_dst[j];
                let mut acc = 0u128;
                for (i, (&yi, &hat)) in y.iter().zip(punctured.iter()).enumerate() {
                    acc += yi as u128 * hat as u128;
                    if i & 31 == 31 {
                        acc = p.reduce_u128(acc) as u128;
                    }
                }
                let mut r = p.reduce_u128(acc);
                let correction = util::multiply_u64_mod(p.reduce(overflow), self.base_prod_mod_dst[j], p);
                r = util::sub_u64_mod(r, correction, p);
                output[j * n + k] = util::sub_u64_mod(r, self.half_base_prod_mod_dst[j], p);
            }
        }
    }

    /**
    Given `ext`, the centered extension of the base residues of some y, and
    `output` holding y modulo the destination, overwrites `output` with
    (y - ext) / Q. Inputs must be reduced.
    */
    pub fn mod_down_finish(&self, n: usize, ext: &[u64], output: &mut [u64]) {
        for (j, p) in self.dst.iter().enumerate() {
            let inv = &self.inv_base_prod_mod_dst[j];
            output[j * n..(j + 1) * n].iter_mut()
                .zip(ext[j * n..(j + 1) * n].iter())
                .for_each(|(o, &e)| {
                    *o = util::multiply_u64operand_mod(util::sub_u64_mod(*o, e, p), inv, p);
                });
        }
    }

}
