//! Linear maps on the slots, evaluated from their diagonals.
//!
//! A map is described by [Diagonals] (or a [Permutation]), laid out into a
//! [LinearTransformation] with [LinearTransformationParameters], encoded
//! once, and applied by a [LinearTransformationEvaluator].

mod bsgs;
mod diagonals;
mod evaluator;
mod transform;

pub use bsgs::{bsgs_index, find_best_bsgs_ratio, BsgsIndex, BsgsRatio};
pub use diagonals::{Diagonals, Permutation, PermutationMapping};
pub use evaluator::LinearTransformationEvaluator;
pub use transform::{Allocated, Encoded, LinearTransformation, LinearTransformationParameters};
