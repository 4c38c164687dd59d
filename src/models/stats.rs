//! Run statistics reported at the end of a pipeline run.

use crate::checkpoint::Stage;
use std::path::PathBuf;

/// Counters collected while the stage runner executes.
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    /// Leads in the working set (collected now or loaded from a checkpoint)
    pub total_leads: usize,
    /// Leads summarized by the enrichment provider in this invocation
    pub enriched: usize,
    /// Leads that received the fallback summary in this invocation
    pub fallbacks: usize,
    /// Rows appended to the destination
    pub exported: usize,
    /// Leads dropped by the deduplication filter
    pub skipped_duplicates: usize,
    /// Checkpoint stage the run resumed from, if any
    pub resumed_from: Option<Stage>,
    /// Stage reached when the run ended
    pub final_stage: Stage,
    /// Run stopped on user interrupt; checkpoint kept for --resume
    pub interrupted: bool,
    pub runtime_secs: f64,
    pub output: PathBuf,
}

impl RunStats {
    /// Enrichment calls per hour for this invocation.
    pub fn enrich_throughput_per_hour(&self) -> f64 {
        if self.runtime_secs > 0.0 {
            (self.enriched + self.fallbacks) as f64 / self.runtime_secs * 3600.0
        } else {
            0.0
        }
    }
}
