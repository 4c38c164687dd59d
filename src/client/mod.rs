//! HTTP clients for the collect and enrich stages.

mod apify;
mod perplexity;
mod rate_limiter;

pub use apify::*;
pub use perplexity::*;
pub use rate_limiter::*;
