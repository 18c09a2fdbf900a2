//! Homomorphic linear transformations over RLWE ciphertexts (BGV/BFV).
//!
//! The crate provides an RNS evaluation engine for batched integer
//! ciphertexts: tensoring (standard and scale-invariant), relinearization,
//! rescaling and Galois automorphisms, and on top of it an evaluator for
//! linear maps given by their non-zero diagonals, optionally split into
//! baby-step/giant-step rotations.
//!
//! ```rust
//! use heathcliff_lintrans::{
//!     create_bgv_suite, BsgsRatio, Diagonals, LinearTransformation,
//!     LinearTransformationEvaluator, LinearTransformationParameters, Scale,
//! };
//!
//! let mut suite = create_bgv_suite(4, vec![50, 50, 50], vec![60], 65537, &[]);
//! let params = suite.params.clone();
//! // two rows of eight columns
//! let slots = params.max_log_dimensions().slots();
//! let diagonals: Diagonals = [-1, 0, 1].into_iter().map(|k| (k, vec![1u64; 2 * slots])).collect();
//!
//! let lt_params = LinearTransformationParameters::new(
//!     &params, diagonals.index_list(), Scale::one(), BsgsRatio::Optimal,
//! );
//! let lt = LinearTransformation::new(&params, &lt_params)
//!     .encode(&suite.encoder, &diagonals)
//!     .unwrap();
//!
//! let keys = suite.keygen
//!     .gen_evaluation_key_set(&suite.secret_key, &lt.galois_elements(&params))
//!     .unwrap();
//! let mut lt_eval = LinearTransformationEvaluator::new(suite.evaluator.with_keys(keys.into_shared()));
//!
//! let values: Vec<u64> = (1..=16).collect();
//! let pt = suite.encoder.encode_new(&values, Scale::one(), params.max_level()).unwrap();
//! let ct = suite.encryptor.encrypt_new(&pt).unwrap();
//! let out = lt_eval.evaluate_new(&ct, &lt).unwrap();
//! let decoded: Vec<u64> = suite.encoder.decode(&suite.decryptor.decrypt_new(&out)).unwrap();
//! assert_eq!(&decoded[..3], &[8 + 1 + 2, 1 + 2 + 3, 2 + 3 + 4]);
//! ```

#![warn(missing_docs)]

mod batch_encoder;
mod encryptor;
mod error;
mod evaluator;
mod key;
mod keyswitch;
mod lintrans;
mod modulus;
mod parameters;
mod ring;
mod shortcut;
mod text;
pub mod util;

pub use batch_encoder::{BatchEncoder, PlainInteger};
pub use encryptor::{Decryptor, Encryptor};
pub use error::{Error, Result};
pub use evaluator::{
    AutomorphismOps,
    Evaluator,
    EvaluatorBuffers,
    KeySwitchOps,
    Operand,
    RingOps,
    ShallowCopy,
};
pub use key::{
    EvaluationKeySet,
    GadgetCiphertext,
    GaloisKey,
    KeyGenerator,
    MemEvaluationKeySet,
    RelinearizationKey,
    SecretKey,
    SharedEvaluationKeySet,
};
pub use lintrans::{
    bsgs_index,
    find_best_bsgs_ratio,
    Allocated,
    BsgsIndex,
    BsgsRatio,
    Diagonals,
    Encoded,
    LinearTransformation,
    LinearTransformationEvaluator,
    LinearTransformationParameters,
    Permutation,
    PermutationMapping,
};
pub use modulus::{CoeffModulus, Modulus, PlainModulus};
pub use parameters::{Parameters, ParametersId, ParametersLiteral};
pub use ring::{Poly, PolyQP, Ring};
pub use shortcut::{create_bgv_suite, BgvSuite};
pub use text::{Ciphertext, LogDimensions, MetaData, Plaintext, Scale};
