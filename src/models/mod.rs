//! Core data models for kernel-pool.
//!
//! Epistemic mapping:
//! - K_i (Knowledge): Concrete types with compile-time guarantees
//! - B_i (Beliefs): Wrapped in Result/Option
//! - I^R (Resolvable): Config parameters
//! - I^B (Bounded): Error variants with retry hints

mod backend;
mod config;
mod error;

pub use backend::*;
pub use config::*;
pub use error::*;
