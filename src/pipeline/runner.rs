//! Stage runner: collect → enrich → export with checkpoint/resume.
//!
//! Pipeline flow:
//! Checkpoint? → Collector → [Collected] → Enricher (+ fallback) → [Enriched]
//!   → Dedup filter → Exporter → checkpoint cleared
//!
//! Epistemic foundation:
//! - K_i: A checkpoint for stage N is written only after all of stage N's leads are captured
//! - K_i: Per-lead enrichment failures never abort the batch
//! - B_i: Collection succeeds → Result (fatal on failure, nothing to protect yet)
//! - I^B: Export target may be locked → retried by the exporter, checkpoint kept on failure

use crate::checkpoint::{CheckpointStore, Stage};
use crate::models::{Lead, LeadgenError, Result, RunConfig, RunParams, RunStats, SummarySource};
use crate::pipeline::{
    fallback_summary, filter_new, lacks_enrichment_input, Collector, Enricher, Exporter, Interrupt,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Leads needing enrichment above which a cost estimate is logged.
const COST_WARNING_THRESHOLD: usize = 20;

/// How the enrich stage ended.
enum EnrichOutcome {
    Completed,
    Interrupted,
}

/// Sequential three-stage runner.
pub struct StageRunner<C, E, X> {
    collector: C,
    enricher: E,
    exporter: X,
    store: CheckpointStore,
    interrupt: Interrupt,
    save_every: usize,
}

impl<C, E, X> StageRunner<C, E, X>
where
    C: Collector,
    E: Enricher,
    X: Exporter,
{
    pub fn new(collector: C, enricher: E, exporter: X, store: CheckpointStore) -> Self {
        Self {
            collector,
            enricher,
            exporter,
            store,
            interrupt: Interrupt::never(),
            save_every: 1,
        }
    }

    /// Observe this interrupt between leads and stages.
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Re-save the checkpoint after every `n` processed leads during enrichment.
    pub fn with_save_every(mut self, n: usize) -> Self {
        self.save_every = n.max(1);
        self
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    /// Run the pipeline from scratch or from the last checkpoint.
    pub async fn run(&self, run: &RunConfig) -> Result<RunStats> {
        let start = Instant::now();
        let (mut stage, mut leads, params) = self.starting_point(run)?;
        self.exporter.check_destination(&params.output)?;

        let mut stats = RunStats {
            total_leads: leads.len(),
            resumed_from: (stage != Stage::NotStarted).then_some(stage),
            output: params.output.clone(),
            ..Default::default()
        };

        info!(
            queries = ?params.queries,
            location = %params.location,
            max_results = params.max_results,
            output = %params.output.display(),
            enrich = run.enrich,
            stage = %stage,
            "Starting lead pipeline"
        );

        loop {
            match stage {
                Stage::NotStarted => {
                    leads = self.collect(&params).await?;
                    stats.total_leads = leads.len();
                    if leads.is_empty() {
                        warn!("No leads found; check the search query and location");
                        break;
                    }
                    stage = stage.advance(Stage::Collected)?;
                    self.store.save(stage, &leads, &params)?;
                    info!(leads = leads.len(), "Collect stage complete, checkpoint saved");
                }
                Stage::Collected => {
                    match self.enrich(&mut leads, run.enrich, &params, &mut stats).await? {
                        EnrichOutcome::Completed => {
                            stage = stage.advance(Stage::Enriched)?;
                            self.store.save(stage, &leads, &params)?;
                            info!(
                                enriched = stats.enriched,
                                fallbacks = stats.fallbacks,
                                "Enrich stage complete, checkpoint saved"
                            );
                        }
                        EnrichOutcome::Interrupted => {
                            self.store.save(stage, &leads, &params)?;
                            let processed: Vec<Lead> =
                                leads.iter().filter(|l| l.is_summarized()).cloned().collect();
                            warn!(
                                processed = processed.len(),
                                remaining = leads.len() - processed.len(),
                                checkpoint = %self.store.path().display(),
                                "Enrichment interrupted; exporting processed leads, rerun with --resume to finish"
                            );
                            self.export(&processed, &params.output, &mut stats).await?;
                            stats.interrupted = true;
                            break;
                        }
                    }
                }
                Stage::Enriched => {
                    self.export(&leads, &params.output, &mut stats).await?;
                    stage = stage.advance(Stage::Exported)?;
                    self.store.clear()?;
                    info!(exported = stats.exported, "Export stage complete, checkpoint cleared");
                }
                Stage::Exported => {
                    self.store.clear()?;
                    break;
                }
            }
        }

        stats.final_stage = stage;
        stats.runtime_secs = start.elapsed().as_secs_f64();

        info!(
            leads = stats.total_leads,
            enriched = stats.enriched,
            fallbacks = stats.fallbacks,
            exported = stats.exported,
            skipped_duplicates = stats.skipped_duplicates,
            interrupted = stats.interrupted,
            "Lead pipeline finished"
        );

        Ok(stats)
    }

    /// Decide the starting stage, lead set and parameters.
    fn starting_point(&self, run: &RunConfig) -> Result<(Stage, Vec<Lead>, RunParams)> {
        let fresh = || (Stage::NotStarted, Vec::new(), run.params());

        if !run.resume {
            if self.store.exists() {
                warn!(
                    checkpoint = %self.store.path().display(),
                    "Existing checkpoint will be replaced by this run (use --resume to continue it)"
                );
            }
            return Ok(fresh());
        }

        let record = match self.store.load() {
            Ok(Some(record)) => record,
            Ok(None) => {
                info!("No checkpoint found, starting fresh");
                return Ok(fresh());
            }
            Err(LeadgenError::CorruptCheckpoint { path, reason }) => {
                warn!(
                    path = %path.display(),
                    reason = %reason,
                    "Ignoring corrupt checkpoint, starting fresh"
                );
                return Ok(fresh());
            }
            Err(e) => return Err(e),
        };

        let conflicts = run.conflicts_with(&record.params);
        if !conflicts.is_empty() {
            return Err(LeadgenError::ResumeMismatch(format!(
                "checkpoint at {} was made for a different request: {}",
                self.store.path().display(),
                conflicts.join("; ")
            )));
        }
        if let Some(max_results) = run.max_results {
            if max_results != record.params.max_results {
                warn!(
                    requested = max_results,
                    recorded = record.params.max_results,
                    "Ignoring --max-results on resume; leads were already collected"
                );
            }
        }

        info!(
            stage = %record.stage,
            leads = record.leads.len(),
            summarized = record.summarized_count(),
            saved_at = %record.saved_at,
            "Resuming from checkpoint"
        );

        Ok((record.stage, record.leads, record.params))
    }

    async fn collect(&self, params: &RunParams) -> Result<Vec<Lead>> {
        info!(queries = ?params.queries, location = %params.location, "Collecting leads");
        let leads = self
            .collector
            .collect(&params.queries, &params.location, params.max_results)
            .await?;
        info!(count = leads.len(), "Collected leads");
        Ok(leads)
    }

    /// Summarize every lead that has no summary yet, one at a time.
    async fn enrich(
        &self,
        leads: &mut [Lead],
        enabled: bool,
        params: &RunParams,
        stats: &mut RunStats,
    ) -> Result<EnrichOutcome> {
        if !enabled {
            info!("Enrichment skipped (--skip-enrich), passing leads through");
            return Ok(EnrichOutcome::Completed);
        }

        let total = leads.len();
        let pending = leads.iter().filter(|l| !l.is_summarized()).count();
        if pending == 0 {
            info!("All leads already summarized");
            return Ok(EnrichOutcome::Completed);
        }
        if pending > COST_WARNING_THRESHOLD {
            if let Some(cost) = self.enricher.estimated_cost(pending) {
                info!(leads = pending, estimate = format!("${cost:.2}"), "Enrichment cost estimate");
            }
        }

        info!(total, pending, already_done = total - pending, "Enriching leads");

        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-"),
        );
        pb.set_position((total - pending) as u64);

        let mut unsaved = 0;

        for idx in 0..leads.len() {
            if leads[idx].is_summarized() {
                continue;
            }
            if self.interrupt.is_triggered() {
                pb.abandon_with_message("interrupted");
                return Ok(EnrichOutcome::Interrupted);
            }

            if lacks_enrichment_input(&leads[idx]) {
                debug!(index = idx, "Lead has no name, using fallback summary");
                let summary = fallback_summary(&leads[idx]);
                leads[idx].set_summary(summary, SummarySource::Fallback);
                stats.fallbacks += 1;
            } else {
                let result = tokio::select! {
                    biased;
                    result = self.enricher.enrich(&leads[idx]) => Some(result),
                    _ = self.interrupt.triggered() => None,
                };

                match result {
                    None => {
                        pb.abandon_with_message("interrupted");
                        return Ok(EnrichOutcome::Interrupted);
                    }
                    Some(Ok(summary)) if !summary.trim().is_empty() => {
                        leads[idx].set_summary(summary.trim(), SummarySource::Enriched);
                        stats.enriched += 1;
                    }
                    Some(Ok(_)) => {
                        warn!(lead = %leads[idx].name, "Enricher returned an empty summary, using fallback");
                        let summary = fallback_summary(&leads[idx]);
                        leads[idx].set_summary(summary, SummarySource::Fallback);
                        stats.fallbacks += 1;
                    }
                    Some(Err(e)) => {
                        warn!(lead = %leads[idx].name, error = %e, "Enrichment failed, using fallback");
                        let summary = fallback_summary(&leads[idx]);
                        leads[idx].set_summary(summary, SummarySource::Fallback);
                        stats.fallbacks += 1;
                    }
                }
            }

            unsaved += 1;
            if unsaved >= self.save_every {
                self.store.save(Stage::Collected, leads, params)?;
                unsaved = 0;
            }

            pb.inc(1);
            pb.set_message(format!(
                "enriched: {}, fallbacks: {}",
                stats.enriched, stats.fallbacks
            ));
        }

        pb.finish_with_message(format!(
            "Done! {} enriched, {} fallbacks",
            stats.enriched, stats.fallbacks
        ));
        Ok(EnrichOutcome::Completed)
    }

    /// Deduplicate against the destination and append what is new.
    async fn export(&self, leads: &[Lead], output: &Path, stats: &mut RunStats) -> Result<()> {
        let existing = self.exporter.existing_identities(output).await?;
        let outcome = filter_new(leads, &existing);
        stats.skipped_duplicates += outcome.skipped();

        if outcome.skipped() > 0 {
            info!(
                already_exported = outcome.already_exported,
                repeated = outcome.repeated,
                "Skipped duplicate leads"
            );
        }
        if outcome.leads.is_empty() {
            info!(output = %output.display(), "No new leads to export");
            return Ok(());
        }

        let written = self.exporter.export(&outcome.leads, output).await?;
        stats.exported += written;
        info!(rows = written, output = %output.display(), "Exported leads");
        Ok(())
    }
}
