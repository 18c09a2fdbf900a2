use std::sync::Arc;

use crate::{
    util::{PRNGSeed, HE_PRNG_SEED_BYTES},
    BatchEncoder,
    Decryptor,
    Encryptor,
    Evaluator,
    KeyGenerator,
    Parameters,
    ParametersLiteral,
    SecretKey,
};

/// Every object needed to encrypt, evaluate and decrypt with a single party.
pub struct BgvSuite {
    /// The parameters shared by every member.
    pub params: Arc<Parameters>,
    /// SIMD encoder.
    pub encoder: BatchEncoder,
    /// The generator that produced the keys.
    pub keygen: KeyGenerator,
    /// The secret key.
    pub secret_key: SecretKey,
    /// Secret-key encryptor.
    pub encryptor: Encryptor,
    /// Decryptor.
    pub decryptor: Decryptor,
    /// A standard evaluator holding the relinearization key and the requested Galois keys.
    pub evaluator: Evaluator,
}

fn seed(tag: u8) -> PRNGSeed {
    PRNGSeed([tag; HE_PRNG_SEED_BYTES])
}

/// Creates a deterministic suite: moduli of the given bit sizes, plaintext modulus
/// `plaintext_modulus`, a relinearization key and one Galois key per element of
/// `galois_elements`.
///
/// Panics if the parameters are invalid.
pub fn create_bgv_suite(
    log_n: usize, log_q: Vec<usize>, log_p: Vec<usize>, plaintext_modulus: u64, galois_elements: &[u64],
) -> BgvSuite {
    let literal = ParametersLiteral::new()
        .set_log_n(log_n)
        .set_log_q(log_q)
        .set_log_p(log_p)
        .set_plaintext_modulus(plaintext_modulus);
    let params = match Parameters::new(&literal) {
        Ok(params) => params,
        Err(err) => panic!("[Invalid argument] {}", err),
    };
    let mut keygen = KeyGenerator::with_seed(params.clone(), seed(1));
    let secret_key = keygen.gen_secret_key();
    let keys = match keygen.gen_evaluation_key_set(&secret_key, galois_elements) {
        Ok(keys) => keys,
        Err(err) => panic!("[Invalid argument] {}", err),
    };
    BgvSuite {
        encoder: BatchEncoder::new(params.clone()),
        encryptor: Encryptor::with_seed(params.clone(), secret_key.clone(), seed(2)),
        decryptor: Decryptor::new(params.clone(), secret_key.clone()),
        evaluator: Evaluator::new(params.clone(), Some(keys.into_shared())),
        keygen,
        secret_key,
        params,
    }
}

/// N = 16, three 50-bit primes in Q, one 60-bit prime in P and T = 65537.
#[cfg(test)]
pub(crate) fn create_test_parameters() -> Arc<Parameters> {
    let literal = ParametersLiteral::new()
        .set_log_n(4)
        .set_log_q(vec![50, 50, 50])
        .set_log_p(vec![60])
        .set_plaintext_modulus(65537);
    Parameters::new(&literal).unwrap()
}
