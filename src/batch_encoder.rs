use std::sync::Arc;

use crate::{
    error::{Error, Result},
    util::{self, GALOIS_GENERATOR},
    Modulus,
    Parameters,
    Plaintext,
    Poly,
    PolyQP,
    Scale,
};

/// Integer types that can be batched into the slots of a plaintext.
///
/// Values are reduced modulo the plaintext modulus T when encoding. When
/// decoding, unsigned types receive the representative in `[0, T)` and
/// signed types the centered representative in `(-T/2, T/2]`.
pub trait PlainInteger: Copy {
    /// The value modulo T.
    fn reduce(self, t: &Modulus) -> u64;
    /// A representative of `value`, which lies in `[0, T)`.
    fn lift(value: u64, t: &Modulus) -> Self;
}

impl PlainInteger for u64 {
    fn reduce(self, t: &Modulus) -> u64 {t.reduce(self)}
    fn lift(value: u64, _t: &Modulus) -> Self {value}
}

impl PlainInteger for i64 {
    fn reduce(self, t: &Modulus) -> u64 {t.reduce_i64(self)}
    fn lift(value: u64, t: &Modulus) -> Self {
        if value > t.value() >> 1 {
            value as i64 - t.value() as i64
        } else {
            value as i64
        }
    }
}

/// Provides SIMD encoding and decoding of integer vectors.
///
/// With N the ring degree and T a prime congruent to 1 modulo 2N, the
/// plaintext space Z_T\[X\]/(X^N+1) splits into N slots, viewed as a
/// 2-by-(N/2) matrix. Slot `i < N/2` is column `i` of the first row, slot
/// `N/2 + i` column `i` of the second row. The automorphism with Galois
/// element 3^k rotates both rows left by k columns, and 2N-1 swaps the rows.
///
/// Two embeddings into Q are provided:
/// - [BatchEncoder::encode] produces T^{-1} * scale * m, the form a
///   ciphertext decrypts to, usable as a ciphertext-like operand;
/// - [BatchEncoder::embed] produces scale * m in NTT representation and
///   Montgomery form over QP, the form taken by linear transformation diagonals.
pub struct BatchEncoder {
    params: Arc<Parameters>,
    matrix_reps_index_map: Vec<usize>,
    // T^{-1} mod q_i, Montgomery form
    t_inv_montgomery: Vec<u64>,
}

impl BatchEncoder {

    /// Creates an encoder for the given parameters.
    pub fn new(params: Arc<Parameters>) -> Self {
        let slots = params.n();
        let logn = params.log_n();
        let row_size = slots >> 1;
        let m = slots << 1;
        let mut matrix_reps_index_map = vec![0; slots];
        let mut pos = 1;
        for i in 0..row_size {
            let index1 = (pos - 1) >> 1;
            let index2 = (m - pos - 1) >> 1;
            matrix_reps_index_map[i] = util::reverse_bits_u64(index1 as u64, logn) as usize;
            matrix_reps_index_map[i + row_size] = util::reverse_bits_u64(index2 as u64, logn) as usize;
            pos = (pos * GALOIS_GENERATOR as usize) & (m - 1);
        }
        let t_inv_montgomery = params.t_inv_mod_q().iter().zip(params.ring_q().moduli())
            .map(|(&x, q)| util::to_montgomery(x, q))
            .collect();
        BatchEncoder { params, matrix_reps_index_map, t_inv_montgomery }
    }

    /// The parameters of the encoder.
    pub fn parameters(&self) -> &Arc<Parameters> {&self.params}

    /// Number of slots, N.
    pub fn slot_count(&self) -> usize {self.matrix_reps_index_map.len()}

    /// Number of rows of the slot matrix. Equals to 2.
    pub fn row_count(&self) -> usize {2}

    /// Number of columns of the slot matrix. Equals to N/2.
    pub fn column_count(&self) -> usize {self.slot_count() >> 1}

    /// Coefficients modulo T of the polynomial whose slots are `values * scale`, zero padded.
    fn slots_to_coefficients<T: PlainInteger>(&self, values: &[T], scale: Scale) -> Result<Vec<u64>> {
        let slots = self.slot_count();
        if values.len() > slots {
            return Err(Error::InvalidOperand(format!(
                "{} values do not fit into {} slots", values.len(), slots
            )));
        }
        let t = self.params.plaintext_modulus();
        let scale = t.reduce(scale.value());
        let mut coefficients = vec![0; slots];
        for (&index, value) in self.matrix_reps_index_map.iter().zip(values) {
            coefficients[index] = util::multiply_u64_mod(value.reduce(t), scale, t);
        }
        // The index map already performs the bit reversal.
        self.params.ring_t().intt_residue(0, &mut coefficients);
        Ok(coefficients)
    }

    fn centered(&self, coefficients: &[u64]) -> Vec<i64> {
        let t = self.params.plaintext_modulus();
        coefficients.iter().map(|&x| i64::lift(x, t)).collect()
    }

    /// Encodes `values` as T^{-1} * scale * m into `destination`, at its level, in NTT representation.
    /// ```rust
    /// # use heathcliff_lintrans::*;
    /// let suite = create_bgv_suite(4, vec![50, 50], vec![60], 65537, &[]);
    /// let plain = suite.encoder.encode_new(&[1u64, 2, 3], Scale::new(5), 1).unwrap();
    /// let decoded: Vec<u64> = suite.encoder.decode(&plain).unwrap();
    /// assert_eq!(&decoded[..4], &[1, 2, 3, 0]);
    /// ```
    pub fn encode<T: PlainInteger>(&self, values: &[T], scale: Scale, destination: &mut Plaintext) -> Result<()> {
        let coefficients = self.centered(&self.slots_to_coefficients(values, scale)?);
        let level = destination.level();
        let ring_q = self.params.ring_q();
        let poly = destination.value_mut();
        ring_q.set_coefficients_i64(level, &coefficients, poly);
        ring_q.mul_rns_scalar_montgomery_assign(level, &self.t_inv_montgomery, poly);
        ring_q.ntt_assign(level, poly);
        let meta = destination.meta_mut();
        meta.scale = scale;
        meta.is_ntt = true;
        meta.is_montgomery = false;
        meta.is_batched = true;
        Ok(())
    }

    /// See [Self::encode].
    pub fn encode_new<T: PlainInteger>(&self, values: &[T], scale: Scale, level: usize) -> Result<Plaintext> {
        let mut destination = Plaintext::new(&self.params, level);
        self.encode(values, scale, &mut destination)?;
        Ok(destination)
    }

    /// Writes scale * m into `destination` at its level, in NTT representation and Montgomery form.
    pub fn embed_q<T: PlainInteger>(&self, values: &[T], scale: Scale, destination: &mut Poly) -> Result<()> {
        let coefficients = self.centered(&self.slots_to_coefficients(values, scale)?);
        lift_ntt_montgomery(self.params.ring_q(), &coefficients, destination);
        Ok(())
    }

    /// Writes scale * m into both halves of `destination` at their levels, in NTT
    /// representation and Montgomery form.
    pub fn embed<T: PlainInteger>(&self, values: &[T], scale: Scale, destination: &mut PolyQP) -> Result<()> {
        let coefficients = self.centered(&self.slots_to_coefficients(values, scale)?);
        lift_ntt_montgomery(self.params.ring_q(), &coefficients, &mut destination.q);
        lift_ntt_montgomery(self.params.ring_p(), &coefficients, &mut destination.p);
        Ok(())
    }

    /// Decodes a plaintext holding T^{-1} * scale * m + e modulo Q, in NTT or
    /// coefficient representation, into the slot values m.
    pub fn decode<T: PlainInteger>(&self, plain: &Plaintext) -> Result<Vec<T>> {
        let level = plain.level();
        let ring_q = self.params.ring_q();
        let t = self.params.plaintext_modulus();
        let mut poly = plain.value().clone();
        if plain.meta().is_montgomery {
            ring_q.imform_assign(level, &mut poly);
        }
        if plain.meta().is_ntt {
            ring_q.intt_assign(level, &mut poly);
        }
        ring_q.mul_scalar_assign(level, t.value(), &mut poly);

        let n = self.slot_count();
        let mut coefficients = vec![0; n];
        self.params.q_to_t(level).mod_up(n, poly.data_at_level(level), &mut coefficients);
        self.params.ring_t().ntt_residue(0, &mut coefficients);

        let Some(scale_inv) = Scale::one().div(plain.scale(), t) else {
            return Err(Error::InvalidOperand(format!(
                "scale {} is not invertible modulo the plaintext modulus", plain.scale().value()
            )));
        };
        Ok(self.matrix_reps_index_map.iter()
            .map(|&index| T::lift(util::multiply_u64_mod(coefficients[index], scale_inv.value(), t), t))
            .collect())
    }

}

fn lift_ntt_montgomery(ring: &crate::Ring, coefficients: &[i64], destination: &mut Poly) {
    let level = destination.level();
    ring.set_coefficients_i64(level, coefficients, destination);
    ring.ntt_assign(level, destination);
    ring.mform_assign(level, destination);
}
