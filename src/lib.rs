//! leadgen - Resumable Google Maps lead scraping, enrichment and spreadsheet export.
//!
//! ## Architecture
//!
//! A single stage runner drives three stages in order, checkpointing after each:
//! - **Collect**: Apify Google Maps actor → leads
//! - **Enrich**: Perplexity summary per lead, local fallback on failure
//! - **Export**: deduplicate against the destination → append CSV rows
//!
//! ## Epistemic Design
//!
//! - K_i (Knowledge): Stage order and checkpoint format are fixed (types, enums)
//! - B_i (Beliefs): Runtime fallible operations (Result, Option)
//! - I^R (Resolvable): User-configurable parameters
//! - I^B (Bounded): Network/API uncertainties (retry, backoff, fallback)

pub mod checkpoint;
pub mod client;
pub mod models;
pub mod output;
pub mod pipeline;

// Re-exports for convenience
pub use checkpoint::{CheckpointRecord, CheckpointStore, Stage};
pub use client::{ApifyClient, PerplexityClient, RateLimiter};
pub use models::{Config, Lead, LeadIdentity, LeadgenError, Result, RunConfig, RunParams, RunStats};
pub use output::CsvExporter;
pub use pipeline::{Collector, Enricher, Exporter, Interrupt, StageRunner};
