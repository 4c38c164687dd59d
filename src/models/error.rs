//! Error types for leadgen.
//!
//! Epistemic taxonomy:
//! - B_i falsified: Expected failures (corrupt checkpoint, resume mismatch)
//! - I^B materialized: Provider failures (collection, enrichment, locked output)
//! - K_i violated: Internal invariant violations (bugs)

use crate::checkpoint::Stage;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level error type for leadgen.
#[derive(Debug, Error)]
pub enum LeadgenError {
    // ═══════════════════════════════════════════════════════════════════
    // B_i FALSIFIED — Belief proven wrong (expected failures)
    // ═══════════════════════════════════════════════════════════════════
    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Refusing to resume: {0}")]
    ResumeMismatch(String),

    #[error("Corrupt checkpoint {path}: {reason}")]
    CorruptCheckpoint { path: PathBuf, reason: String },

    // ═══════════════════════════════════════════════════════════════════
    // I^B MATERIALIZED — Stage-level failures from external collaborators
    // ═══════════════════════════════════════════════════════════════════
    #[error("Collection failed: {0}")]
    Collection(#[from] CollectionError),

    #[error("Enrichment failed: {0}")]
    Enrichment(#[from] EnrichmentError),

    #[error("Export failed: {0}")]
    Export(#[from] ExportError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    // ═══════════════════════════════════════════════════════════════════
    // K_i VIOLATED — Invariant broken (bug, should not happen)
    // ═══════════════════════════════════════════════════════════════════
    #[error("Invalid stage transition: {from} -> {to}")]
    InvalidTransition { from: Stage, to: Stage },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LeadgenError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// True when the run stopped because the user interrupted it.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Collection(CollectionError::Interrupted))
    }
}

/// Failures of the maps collector. Always fatal for the run.
#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("Missing Apify token: set {env_var} or apify.api_token in config")]
    MissingToken { env_var: String },

    #[error("Authentication failed: invalid Apify token")]
    AuthenticationFailed,

    #[error("Invalid search: {0}")]
    InvalidSearch(String),

    #[error("Actor run {run_id} timed out after {waited:?}")]
    Timeout { run_id: String, waited: Duration },

    #[error("Actor run {run_id} finished with status {status}")]
    RunFailed { run_id: String, status: String },

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Interrupted before collection finished")]
    Interrupted,
}

/// Failures of a single enrichment call. Recovered per lead by the fallback summarizer.
#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("Missing Perplexity API key: set {env_var} or perplexity.api_key in config")]
    MissingApiKey { env_var: String },

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: f64 },

    #[error("Request rejected (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request failed after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },
}

impl EnrichmentError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_)
                | Self::RateLimited { .. }
                | Self::Api { .. }
                | Self::InvalidResponse(_)
                | Self::Network(_)
        )
    }

    /// Get retry delay hint in seconds, if applicable.
    pub fn retry_after(&self) -> Option<f64> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

/// Failures of the spreadsheet writer.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("{path} is locked or in use after {attempts} attempts; close it and rerun with --resume")]
    Locked { path: PathBuf, attempts: u32 },

    #[error("Destination {path} has no '{column}' column")]
    MissingColumn { path: PathBuf, column: &'static str },

    #[error("Destination {path} header {found:?} lacks the '{column}' column; export to a new file")]
    HeaderMismatch {
        path: PathBuf,
        column: &'static str,
        found: Vec<String>,
    },

    #[error("Unsupported output format for {path}: only .csv files can be written")]
    UnsupportedFormat { path: PathBuf },

    #[error("CSV error on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl ExportError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// True when the destination is held by another process (e.g. open in a spreadsheet app).
    pub fn is_lock(&self) -> bool {
        match self {
            Self::Io { source, .. } => is_lock_error(source),
            Self::Csv { source, .. } => match source.kind() {
                csv::ErrorKind::Io(err) => is_lock_error(err),
                _ => false,
            },
            _ => false,
        }
    }
}

fn is_lock_error(err: &io::Error) -> bool {
    // 32 = ERROR_SHARING_VIOLATION, 33 = ERROR_LOCK_VIOLATION
    matches!(
        err.kind(),
        io::ErrorKind::PermissionDenied | io::ErrorKind::ResourceBusy | io::ErrorKind::WouldBlock
    ) || (cfg!(windows) && matches!(err.raw_os_error(), Some(32 | 33)))
}

/// Result type alias for leadgen.
pub type Result<T> = std::result::Result<T, LeadgenError>;
