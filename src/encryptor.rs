use std::sync::Arc;

use rand::SeedableRng;

use crate::{
    error::{Error, Result},
    key::sample_error_qp,
    util::{sampling, BlakeRNG, PRNGSeed},
    Ciphertext,
    Parameters,
    Plaintext,
    PolyQP,
    SecretKey,
};

/// Encrypts [Plaintext] objects into [Ciphertext] objects with the secret key.
///
/// A fresh ciphertext at level l is (c0, c1) = (-a * s + e + pt, a) modulo Q_l
/// with a uniform, in NTT representation.
///
/// ```rust
/// # use heathcliff_lintrans::*;
/// let mut suite = create_bgv_suite(4, vec![50, 50], vec![60], 65537, &[]);
/// let plain = suite.encoder.encode_new(&[1u64, 2, 3], Scale::one(), 1).unwrap();
/// let cipher = suite.encryptor.encrypt_new(&plain).unwrap();
/// let decoded: Vec<u64> = suite.encoder.decode(&suite.decryptor.decrypt_new(&cipher)).unwrap();
/// assert_eq!(&decoded[..3], &[1, 2, 3]);
/// ```
pub struct Encryptor {
    params: Arc<Parameters>,
    secret_key: SecretKey,
    rng: BlakeRNG,
}

impl Encryptor {

    /// Creates an encryptor drawing randomness from system entropy.
    pub fn new(params: Arc<Parameters>, secret_key: SecretKey) -> Self {
        Self { params, secret_key, rng: BlakeRNG::new_random() }
    }

    /// Creates a deterministic encryptor.
    pub fn with_seed(params: Arc<Parameters>, secret_key: SecretKey, seed: PRNGSeed) -> Self {
        Self { params, secret_key, rng: BlakeRNG::from_seed(seed) }
    }

    /// Encrypts zero into `destination`, at its level, as a degree one ciphertext.
    pub fn encrypt_zero(&mut self, destination: &mut Ciphertext) -> Result<()> {
        let level = destination.level();
        let params = self.params.clone();
        let ring_q = params.ring_q();
        destination.resize(1, level);

        let mut e = PolyQP::new(params.n(), level, 0);
        sample_error_qp(&mut self.rng, &params, &mut e);

        let [c0, c1] = destination.value_mut() else {
            panic!("[Logic error] Ciphertext was resized to degree one.");
        };
        sampling::uniform(&mut self.rng, &ring_q.moduli()[..=level], params.n(), c1.data_mut());
        ring_q.mul_coeffs_montgomery(level, c1, &self.secret_key.value().q, c0);
        ring_q.neg_assign(level, c0);
        ring_q.add_assign(level, &e.q, c0);

        let meta = destination.meta_mut();
        meta.is_ntt = true;
        meta.is_montgomery = false;
        Ok(())
    }

    /// Encrypts `plain` into `destination` at the level of `plain`.
    pub fn encrypt(&mut self, plain: &Plaintext, destination: &mut Ciphertext) -> Result<()> {
        if !plain.meta().is_ntt || plain.meta().is_montgomery {
            return Err(Error::InvalidOperand(
                "plaintext must be in NTT representation and out of Montgomery form".to_string()
            ));
        }
        let level = plain.level();
        destination.resize(1, level);
        self.encrypt_zero(destination)?;
        self.params.ring_q().add_assign(level, plain.value(), &mut destination.value_mut()[0]);
        *destination.meta_mut() = *plain.meta();
        Ok(())
    }

    /// See [Self::encrypt].
    pub fn encrypt_new(&mut self, plain: &Plaintext) -> Result<Ciphertext> {
        let mut destination = Ciphertext::new(&self.params, 1, plain.level());
        self.encrypt(plain, &mut destination)?;
        Ok(destination)
    }

}

/// Decrypts [Ciphertext] objects into [Plaintext] objects.
///
/// The plaintext holds c0 + c1 * s (+ c2 * s^2) in NTT representation, and
/// is read back into slot values by [crate::BatchEncoder::decode].
pub struct Decryptor {
    params: Arc<Parameters>,
    secret_key: SecretKey,
}

impl Decryptor {

    /// Creates a decryptor.
    pub fn new(params: Arc<Parameters>, secret_key: SecretKey) -> Self {
        Self { params, secret_key }
    }

    /// Decrypts a ciphertext of degree at most two.
    pub fn decrypt(&self, encrypted: &Ciphertext, destination: &mut Plaintext) -> Result<()> {
        if encrypted.degree() > 2 {
            return Err(Error::DegreeTooLarge { degree: encrypted.degree() });
        }
        let level = encrypted.level();
        let ring_q = self.params.ring_q();
        let s = &self.secret_key.value().q;
        destination.resize(level);

        // Horner evaluation in s, which is in Montgomery form
        let value = encrypted.value();
        let out = destination.value_mut();
        out.copy_from(level, &value[encrypted.degree()]);
        for poly in value[..encrypted.degree()].iter().rev() {
            ring_q.mul_coeffs_montgomery_assign(level, s, out);
            ring_q.add_assign(level, poly, out);
        }

        *destination.meta_mut() = *encrypted.meta();
        Ok(())
    }

    /// See [Self::decrypt].
    pub fn decrypt_new(&self, encrypted: &Ciphertext) -> Plaintext {
        let mut destination = Plaintext::new(&self.params, encrypted.level());
        // Degrees above two are never produced by the evaluator.
        if let Err(err) = self.decrypt(encrypted, &mut destination) {
            panic!("[Invalid argument] {}", err);
        }
        destination
    }

    /// log2 of the largest centered coefficient of T * (c0 + c1 * s) - scale * m, the
    /// noise of a ciphertext known to encrypt `values` at the ciphertext's scale.
    pub fn noise_bits(&self, encrypted: &Ciphertext, values: &[u64], encoder: &crate::BatchEncoder) -> Result<f64> {
        let level = encrypted.level();
        let ring_q = self.params.ring_q();
        let mut phase = self.decrypt_new(encrypted);
        let expected = encoder.encode_new(values, encrypted.scale(), level)?;
        ring_q.sub_assign(level, expected.value(), phase.value_mut());
        let poly = phase.value_mut();
        ring_q.intt_assign(level, poly);
        ring_q.mul_scalar_assign(level, self.params.plaintext_modulus().value(), poly);
        let max = ring_q.moduli()[..=level].iter().enumerate()
            .flat_map(|(i, q)| poly.residue(i).iter().map(move |&x| x.min(q.value() - x)))
            .max()
            .unwrap_or(0);
        Ok((max.max(1) as f64).log2())
    }

}
