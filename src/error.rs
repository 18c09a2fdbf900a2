use thiserror::Error;

/// Errors reported by the evaluation engine.
///
/// Every variant is surfaced by the operation that detected it; nothing is
/// retried, since the arithmetic is deterministic. Composite operations
/// forward the first error of their inner calls.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The parameter literal cannot be instantiated.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// No Galois key is registered for the requested Galois element.
    #[error("missing Galois key for Galois element {galois_element}")]
    MissingGaloisKey {
        /// The Galois element that was requested.
        galois_element: u64,
    },

    /// No relinearization key is registered.
    #[error("missing relinearization key")]
    MissingRelinearizationKey,

    /// A tensoring operand has degree larger than one.
    #[error("operand degree {degree} is larger than 1")]
    DegreeTooLarge {
        /// The offending degree.
        degree: usize,
    },

    /// The ciphertext has no modulus left to drop.
    #[error("ciphertext is at level {level}, no modulus left to drop")]
    LevelTooLow {
        /// The level of the ciphertext.
        level: usize,
    },

    /// Two objects that must share a level do not.
    #[error("level mismatch: expected {expected}, got {got}")]
    LevelMismatch {
        /// The level required by the operation.
        expected: usize,
        /// The level that was provided.
        got: usize,
    },

    /// A receiver ciphertext or slice cannot hold the result.
    #[error("output is too small: {0}")]
    OutputTooSmall(String),

    /// An operand has an unsupported type or shape.
    #[error("invalid operand: {0}")]
    InvalidOperand(String),

    /// A diagonal map does not match the transformation it is encoded into.
    #[error("invalid diagonals: {0}")]
    InvalidDiagonals(String),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
