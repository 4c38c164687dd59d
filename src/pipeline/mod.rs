//! Pipeline module - stage runner and the pieces it coordinates.

mod dedup;
mod fallback;
mod interrupt;
mod runner;
mod stages;

pub use dedup::*;
pub use fallback::*;
pub use interrupt::*;
pub use runner::*;
pub use stages::*;
