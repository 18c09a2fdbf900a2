use serde::{Deserialize, Serialize};

use crate::{
    util,
    Modulus,
    Parameters,
    Poly,
};

/// The multiplicative factor, modulo the plaintext modulus T, that a
/// ciphertext or plaintext carries on top of its message.
///
/// Standard tensoring multiplies scales, rescaling divides by the dropped
/// prime and scale-invariant tensoring divides by `-Q mod T`. Decoding
/// divides the scale out again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scale(u64);

impl Default for Scale {
    fn default() -> Self {
        Scale(1)
    }
}

impl Scale {

    /// A scale with the given value, interpreted modulo T.
    pub fn new(value: u64) -> Self {
        Scale(value)
    }

    /// The neutral scale.
    pub fn one() -> Self {
        Scale(1)
    }

    /// The raw value.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// `self * other mod t`.
    pub fn mul(self, other: Scale, t: &Modulus) -> Scale {
        Scale(util::multiply_u64_mod(t.reduce(self.0), t.reduce(other.0), t))
    }

    /// `self / other mod t`, or `None` when `other` is not invertible modulo t.
    pub fn div(self, other: Scale, t: &Modulus) -> Option<Scale> {
        let mut inv = 0;
        if !util::try_invert_u64_mod(t.reduce(other.0), t, &mut inv) {
            return None;
        }
        Some(Scale(util::multiply_u64_mod(t.reduce(self.0), inv, t)))
    }

    /// Whether both scales agree modulo t.
    pub fn equal_mod(&self, other: &Scale, t: &Modulus) -> bool {
        t.reduce(self.0) == t.reduce(other.0)
    }

}

/// Shape of the slot matrix, as log2 of its rows and columns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogDimensions {
    /// log2 of the number of rows.
    pub rows: usize,
    /// log2 of the number of columns.
    pub cols: usize,
}

impl LogDimensions {

    /// Number of slots per row.
    pub fn slots(&self) -> usize {
        1 << self.cols
    }

}

/// Bookkeeping carried by ciphertexts and plaintexts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaData {
    /// Accumulated scaling factor.
    pub scale: Scale,
    /// Whether the polynomials are in NTT representation.
    pub is_ntt: bool,
    /// Whether the polynomials are in Montgomery form.
    pub is_montgomery: bool,
    /// Whether the message is SIMD-batched into slots.
    pub is_batched: bool,
    /// The slot matrix shape.
    pub log_dimensions: LogDimensions,
}

impl MetaData {

    /// Metadata of a fresh batched NTT-domain element at scale one.
    pub fn new(log_dimensions: LogDimensions) -> Self {
        MetaData {
            scale: Scale::one(),
            is_ntt: true,
            is_montgomery: false,
            is_batched: true,
            log_dimensions,
        }
    }

}

/// A plaintext: a single polynomial modulo Q at some level.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plaintext {
    value: Poly,
    meta: MetaData,
}

impl Plaintext {

    /// A zero plaintext at `level`.
    pub fn new(params: &Parameters, level: usize) -> Self {
        Plaintext {
            value: params.ring_q().new_poly(level),
            meta: MetaData::new(params.max_log_dimensions()),
        }
    }

    /// Wraps an existing polynomial.
    pub fn from_poly(value: Poly, meta: MetaData) -> Self {
        Plaintext { value, meta }
    }

    /// The level of the polynomial.
    pub fn level(&self) -> usize {self.value.level()}
    /// The polynomial.
    pub fn value(&self) -> &Poly {&self.value}
    /// The polynomial, mutable.
    pub fn value_mut(&mut self) -> &mut Poly {&mut self.value}
    /// The metadata.
    pub fn meta(&self) -> &MetaData {&self.meta}
    /// The metadata, mutable.
    pub fn meta_mut(&mut self) -> &mut MetaData {&mut self.meta}
    /// The scale.
    pub fn scale(&self) -> Scale {self.meta.scale}
    /// Sets the scale.
    pub fn set_scale(&mut self, scale: Scale) {self.meta.scale = scale;}
    /// Changes the level, dropping or appending zero residues.
    pub fn resize(&mut self, level: usize) {self.value.resize(level);}

}

/// A ciphertext: `degree + 1` polynomials modulo Q at a common level.
///
/// A degree one ciphertext (c0, c1) decrypts as c0 + c1 * s; a degree two
/// ciphertext, as produced by tensoring without relinearization, adds c2 * s^2.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ciphertext {
    value: Vec<Poly>,
    meta: MetaData,
}

impl Ciphertext {

    /// A zero ciphertext of the given degree at `level`.
    pub fn new(params: &Parameters, degree: usize, level: usize) -> Self {
        Ciphertext {
            value: (0..=degree).map(|_| params.ring_q().new_poly(level)).collect(),
            meta: MetaData::new(params.max_log_dimensions()),
        }
    }

    /// Number of polynomials minus one.
    pub fn degree(&self) -> usize {self.value.len().saturating_sub(1)}
    /// The common level of the polynomials.
    pub fn level(&self) -> usize {self.value.first().map(Poly::level).unwrap_or(0)}
    /// The polynomials.
    pub fn value(&self) -> &[Poly] {&self.value}
    /// The polynomials, mutable.
    pub fn value_mut(&mut self) -> &mut [Poly] {&mut self.value}
    /// The metadata.
    pub fn meta(&self) -> &MetaData {&self.meta}
    /// The metadata, mutable.
    pub fn meta_mut(&mut self) -> &mut MetaData {&mut self.meta}
    /// The scale.
    pub fn scale(&self) -> Scale {self.meta.scale}
    /// Sets the scale.
    pub fn set_scale(&mut self, scale: Scale) {self.meta.scale = scale;}

    /// Changes degree and level. New polynomials are zero.
    pub fn resize(&mut self, degree: usize, level: usize) {
        let coeff_count = self.value.first().map(Poly::coeff_count).unwrap_or(0);
        self.value.resize_with(degree + 1, || Poly::new(coeff_count, level));
        self.value.iter_mut().for_each(|p| p.resize(level));
    }

    /// Copies polynomials and metadata from `other` at `min(self.level, other.level)`, adopting other's degree.
    pub fn copy_from(&mut self, other: &Ciphertext) {
        let level = self.level().min(other.level());
        self.resize(other.degree(), level);
        for (dst, src) in self.value.iter_mut().zip(other.value.iter()) {
            dst.copy_from(level, src);
        }
        self.meta = other.meta;
    }

    /// Is every coefficient zero?
    /// Transparent ciphertexts leak the message.
    pub fn is_transparent(&self) -> bool {
        self.value.iter().skip(1).all(|p| p.data().iter().all(|&x| x == 0))
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_arithmetic() {
        let t = Modulus::new(65537);
        let a = Scale::new(3);
        let b = Scale::new(65536);
        assert_eq!(a.mul(b, &t), Scale::new(65534));
        assert_eq!(a.mul(b, &t).div(b, &t), Some(a));
        assert_eq!(a.div(Scale::new(65537), &t), None);
        assert!(Scale::new(65538).equal_mod(&Scale::one(), &t));
    }

    #[test]
    fn test_ciphertext_resize() {
        let params = crate::shortcut::create_test_parameters();
        let mut ct = Ciphertext::new(&params, 1, params.max_level());
        assert_eq!(ct.degree(), 1);
        assert_eq!(ct.level(), params.max_level());
        ct.resize(2, 0);
        assert_eq!(ct.degree(), 2);
        assert_eq!(ct.level(), 0);
        assert!(ct.value().iter().all(|p| p.level() == 0));
        assert!(ct.is_transparent());

        let mut other = Ciphertext::new(&params, 1, params.max_level());
        other.set_scale(Scale::new(7));
        other.copy_from(&ct);
        assert_eq!(other.degree(), 2);
        assert_eq!(other.level(), 0);
        assert_eq!(other.scale(), Scale::one());
    }
}
