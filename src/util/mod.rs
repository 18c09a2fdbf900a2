//! Provide various utility functions and structs.
//! 
//! The utility objects in this submodule are not documented.
//! Use at your own risk.
#![allow(missing_docs)]

mod basic;
mod galois;
pub(crate) mod hash;
mod number_theory;
mod ntt;
mod rns;
mod uintsmallmod;
pub mod sampling;
mod random_generator;

// gather utilities in this module
pub use basic::*;
pub use ntt::*;
pub use number_theory::*;
pub use rns::*;
pub use uintsmallmod::*;
pub use galois::*;
pub use random_generator::{BlakeRNG, PRNGSeed};

