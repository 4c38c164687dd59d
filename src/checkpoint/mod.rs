//! Checkpoint module for resumable pipeline execution.
//!
//! Provides:
//! - `Stage`: Explicit stage markers with a transition table
//! - `CheckpointStore`: Atomic persistence and loading of checkpoint records

mod stage;
mod store;

pub use stage::*;
pub use store::*;
