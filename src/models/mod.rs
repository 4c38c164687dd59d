//! Core data models for leadgen.
//!
//! Epistemic mapping:
//! - K_i (Knowledge): Concrete types with compile-time guarantees
//! - B_i (Beliefs): Wrapped in Result/Option
//! - I^R (Resolvable): Config file and CLI parameters
//! - I^B (Bounded): Error variants with fallback strategies

mod config;
mod error;
mod lead;
mod stats;

pub use config::*;
pub use error::*;
pub use lead::*;
pub use stats::*;
