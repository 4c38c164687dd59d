//! Lead records flowing through the pipeline.
//!
//! A lead is created by the collector, gains a business summary in the
//! enrich stage and is written once to the destination spreadsheet.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a lead's business summary came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummarySource {
    /// Written by the enrichment provider
    Enriched,
    /// Generated locally by the fallback summarizer
    Fallback,
}

/// A single business listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lead {
    /// Business name
    pub name: String,

    /// Provider category (e.g. "Pizza restaurant")
    #[serde(default)]
    pub category: String,

    /// Full street address, exported as the Location column
    #[serde(default)]
    pub address: String,

    #[serde(default)]
    pub city: String,

    #[serde(default)]
    pub state: String,

    #[serde(default)]
    pub phone: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Business summary, filled by the enrich stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_info: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_source: Option<SummarySource>,
}

impl Lead {
    /// Create a lead with only a name and address set.
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            ..Default::default()
        }
    }

    /// Builder-style category setter.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Deduplication identity of this lead.
    pub fn identity(&self) -> LeadIdentity {
        LeadIdentity::new(&self.name, &self.address)
    }

    /// True once the enrich stage has produced a non-blank summary.
    pub fn is_summarized(&self) -> bool {
        self.business_info
            .as_deref()
            .is_some_and(|info| !info.trim().is_empty())
    }

    /// Record a summary and where it came from.
    pub fn set_summary(&mut self, summary: impl Into<String>, source: SummarySource) {
        self.business_info = Some(summary.into());
        self.summary_source = Some(source);
    }

    /// "City, State" with empty parts dropped.
    pub fn locality(&self) -> String {
        [self.city.trim(), self.state.trim()]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Website, if present and non-blank.
    pub fn website(&self) -> Option<&str> {
        self.website
            .as_deref()
            .map(str::trim)
            .filter(|site| !site.is_empty())
    }
}

/// Normalized name + address key used to detect the same business across runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeadIdentity(String);

impl LeadIdentity {
    pub fn new(name: &str, address: &str) -> Self {
        Self(format!("{}||{}", normalize(name), normalize(address)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LeadIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercase and collapse every whitespace run to a single space.
pub fn normalize(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
