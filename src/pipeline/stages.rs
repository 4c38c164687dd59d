//! Narrow interfaces to the external collaborators of each stage.
//!
//! The stage runner only sees these traits; the HTTP clients in
//! `crate::client` and the CSV writer in `crate::output` implement them.

use crate::models::{CollectionError, EnrichmentError, ExportError, Lead, LeadIdentity};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;

/// Collect stage: scrapes business listings.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Fetch up to `max_results` leads per query in `location`.
    async fn collect(
        &self,
        queries: &[String],
        location: &str,
        max_results: u32,
    ) -> Result<Vec<Lead>, CollectionError>;
}

/// Enrich stage: produces a business summary for one lead.
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn enrich(&self, lead: &Lead) -> Result<String, EnrichmentError>;

    /// Estimated provider cost of enriching `count` leads, in USD.
    fn estimated_cost(&self, _count: usize) -> Option<f64> {
        None
    }
}

/// Export stage: appends leads to the destination spreadsheet.
#[async_trait]
pub trait Exporter: Send + Sync {
    /// Identities already present in the destination (empty if it does not exist).
    async fn existing_identities(&self, path: &Path) -> Result<HashSet<LeadIdentity>, ExportError>;

    /// Append `leads` to `path`, returning the number of rows written.
    async fn export(&self, leads: &[Lead], path: &Path) -> Result<usize, ExportError>;

    /// Reject a destination this exporter cannot write, before any paid work starts.
    fn check_destination(&self, _path: &Path) -> Result<(), ExportError> {
        Ok(())
    }
}
