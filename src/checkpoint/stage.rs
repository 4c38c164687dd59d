//! Pipeline stage markers and the transition table between them.
//!
//! K_i: Progress is an explicit tagged state, never inferred from which
//! files happen to exist on disk.

use crate::models::{LeadgenError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Last completed stage of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Nothing collected yet
    #[default]
    NotStarted,
    /// Collect stage finished; leads captured
    Collected,
    /// Enrich stage finished; every lead has a summary (or enrichment was skipped)
    Enriched,
    /// Export stage finished; checkpoint is cleared
    Exported,
}

/// Every legal transition: (from, to, stage that performs it).
pub const TRANSITIONS: [(Stage, Stage, &str); 3] = [
    (Stage::NotStarted, Stage::Collected, "collect"),
    (Stage::Collected, Stage::Enriched, "enrich"),
    (Stage::Enriched, Stage::Exported, "export"),
];

impl Stage {
    /// The state reached by running the next stage, or None when done.
    pub fn next(self) -> Option<Stage> {
        TRANSITIONS
            .iter()
            .find(|(from, _, _)| *from == self)
            .map(|(_, to, _)| *to)
    }

    /// Name of the stage that moves the pipeline out of this state.
    pub fn pending_step(self) -> Option<&'static str> {
        TRANSITIONS
            .iter()
            .find(|(from, _, _)| *from == self)
            .map(|(_, _, step)| *step)
    }

    /// Validate and perform a transition.
    pub fn advance(self, to: Stage) -> Result<Stage> {
        if self.next() == Some(to) {
            Ok(to)
        } else {
            Err(LeadgenError::InvalidTransition { from: self, to })
        }
    }

    pub fn is_terminal(self) -> bool {
        self.next().is_none()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Collected => "collected",
            Self::Enriched => "enriched",
            Self::Exported => "exported",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
