//! Checkpoint persistence for resumable pipelines.
//!
//! Epistemic foundation:
//! - K_i: A checkpoint holds the stage marker, the lead set and the request
//! - K_i: State is persisted to disk atomically (write, fsync, rename)
//! - B_i: Checkpoint file may not exist → Option
//! - B_i: Checkpoint file may be unreadable → CorruptCheckpoint, never partial data

use crate::checkpoint::Stage;
use crate::models::{Lead, LeadgenError, Result, RunParams};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// On-disk format version.
pub const CHECKPOINT_VERSION: u32 = 1;

const CHECKPOINT_FILE: &str = "checkpoint.json";
const STAGING_FILE: &str = "checkpoint.json.tmp";

/// A persisted snapshot of pipeline progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub version: u32,
    /// Last completed stage
    pub stage: Stage,
    /// Request that produced the leads
    pub params: RunParams,
    /// Leads as of `stage`
    pub leads: Vec<Lead>,
    pub saved_at: DateTime<Utc>,
}

impl CheckpointRecord {
    pub fn new(stage: Stage, leads: Vec<Lead>, params: RunParams) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            stage,
            params,
            leads,
            saved_at: Utc::now(),
        }
    }

    /// Leads that already carry a summary.
    pub fn summarized_count(&self) -> usize {
        self.leads.iter().filter(|l| l.is_summarized()).count()
    }
}

/// Checkpoint store backed by a single JSON file in the work directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    /// Path to main checkpoint file
    checkpoint_path: PathBuf,
    /// Staging file renamed over the checkpoint
    staging_path: PathBuf,
}

impl CheckpointStore {
    /// Create a store, creating the directory if needed.
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| LeadgenError::io("creating checkpoint dir", e))?;

        Ok(Self {
            checkpoint_path: dir.join(CHECKPOINT_FILE),
            staging_path: dir.join(STAGING_FILE),
        })
    }

    pub fn path(&self) -> &Path {
        &self.checkpoint_path
    }

    /// Check if a checkpoint exists.
    pub fn exists(&self) -> bool {
        self.checkpoint_path.exists()
    }

    /// Persist a stage marker with its leads and request (atomic replace).
    pub fn save(&self, stage: Stage, leads: &[Lead], params: &RunParams) -> Result<()> {
        let record = CheckpointRecord::new(stage, leads.to_vec(), params.clone());

        {
            let file = File::create(&self.staging_path)
                .map_err(|e| LeadgenError::io("creating staging checkpoint", e))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, &record)
                .map_err(|e| LeadgenError::Internal(format!("Serializing checkpoint: {e}")))?;
            writer
                .flush()
                .map_err(|e| LeadgenError::io("flushing staging checkpoint", e))?;
            writer
                .get_ref()
                .sync_all()
                .map_err(|e| LeadgenError::io("syncing staging checkpoint", e))?;
        }

        fs::rename(&self.staging_path, &self.checkpoint_path)
            .map_err(|e| LeadgenError::io("renaming checkpoint", e))?;

        debug!(stage = %stage, leads = leads.len(), "Checkpoint saved");
        Ok(())
    }

    /// Load the last valid checkpoint.
    ///
    /// Returns `Ok(None)` when none exists and `CorruptCheckpoint` when the file
    /// cannot be parsed; partially parsed data is never returned.
    pub fn load(&self) -> Result<Option<CheckpointRecord>> {
        let content = match fs::read_to_string(&self.checkpoint_path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(LeadgenError::io("reading checkpoint", e)),
        };

        let record: CheckpointRecord =
            serde_json::from_str(&content).map_err(|e| self.corrupt(e.to_string()))?;

        if record.version != CHECKPOINT_VERSION {
            return Err(self.corrupt(format!(
                "unsupported version {} (expected {CHECKPOINT_VERSION})",
                record.version
            )));
        }

        Ok(Some(record))
    }

    /// Remove checkpoint state. Clearing twice is a no-op.
    pub fn clear(&self) -> Result<()> {
        for path in [&self.checkpoint_path, &self.staging_path] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(LeadgenError::io("removing checkpoint", e)),
            }
        }
        debug!("Checkpoint cleared");
        Ok(())
    }

    fn corrupt(&self, reason: String) -> LeadgenError {
        LeadgenError::CorruptCheckpoint {
            path: self.checkpoint_path.clone(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SummarySource;
    use tempfile::TempDir;

    fn params() -> RunParams {
        RunParams {
            queries: vec!["Plumbers".to_string(), "Electricians".to_string()],
            location: "Chicago, USA".to_string(),
            max_results: 5,
            output: PathBuf::from("output/leads.csv"),
        }
    }

    fn leads() -> Vec<Lead> {
        let mut first = Lead::new("Quick Fix Plumbing", "123 Main St, Chicago, IL 60601")
            .with_category("Plumber");
        first.phone = "(312) 555-0100".to_string();
        first.set_summary("Residential plumbing repairs.", SummarySource::Enriched);
        let mut second = Lead::new("Bright Spark", "9 Oak Ave").with_category("Electrician");
        second.website = Some("https://brightspark.example".to_string());
        vec![first, second]
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();

        store.save(Stage::Collected, &leads(), &params()).unwrap();
        let record = store.load().unwrap().expect("checkpoint present");

        assert_eq!(record.stage, Stage::Collected);
        assert_eq!(record.leads, leads());
        assert_eq!(record.params, params());
        assert_eq!(record.summarized_count(), 1);
    }

    #[test]
    fn test_load_without_checkpoint() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(&dir.path().join("nested/work")).unwrap();
        assert!(!store.exists());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_overwrites_previous_stage() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();

        store.save(Stage::Collected, &leads(), &params()).unwrap();
        store.save(Stage::Enriched, &leads()[..1], &params()).unwrap();

        let record = store.load().unwrap().unwrap();
        assert_eq!(record.stage, Stage::Enriched);
        assert_eq!(record.leads.len(), 1);
        assert!(!dir.path().join(STAGING_FILE).exists());
    }

    #[test]
    fn test_truncated_checkpoint_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();
        store.save(Stage::Collected, &leads(), &params()).unwrap();

        let content = fs::read_to_string(store.path()).unwrap();
        fs::write(store.path(), &content[..content.len() / 2]).unwrap();

        assert!(matches!(
            store.load(),
            Err(LeadgenError::CorruptCheckpoint { .. })
        ));
    }

    #[test]
    fn test_unknown_version_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();
        let mut record = CheckpointRecord::new(Stage::Collected, leads(), params());
        record.version = 99;
        fs::write(store.path(), serde_json::to_string(&record).unwrap()).unwrap();

        assert!(matches!(
            store.load(),
            Err(LeadgenError::CorruptCheckpoint { .. })
        ));
    }

    #[test]
    fn test_stale_staging_file_is_ignored() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();
        store.save(Stage::Enriched, &leads(), &params()).unwrap();

        // Crash mid-save: half-written staging file next to a valid checkpoint
        fs::write(dir.path().join(STAGING_FILE), "{\"version\": 1, \"sta").unwrap();

        let record = store.load().unwrap().unwrap();
        assert_eq!(record.stage, Stage::Enriched);
        assert_eq!(record.leads.len(), 2);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();
        store.save(Stage::Collected, &leads(), &params()).unwrap();

        store.clear().unwrap();
        assert!(!store.exists());
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }
}
