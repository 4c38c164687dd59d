//! Deduplication filter applied before export.

use crate::models::{Lead, LeadIdentity};
use std::collections::HashSet;

/// Result of filtering a candidate lead set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupOutcome {
    /// Candidates to export, in their original relative order
    pub leads: Vec<Lead>,
    /// Dropped because the destination already holds them
    pub already_exported: usize,
    /// Dropped because an earlier candidate had the same identity
    pub repeated: usize,
}

impl DedupOutcome {
    pub fn skipped(&self) -> usize {
        self.already_exported + self.repeated
    }
}

/// Keep candidates whose identity is neither in `existing` nor seen earlier in `candidates`.
///
/// Inputs are not mutated; applying the filter to its own output with the
/// same `existing` set returns the same leads.
pub fn filter_new(candidates: &[Lead], existing: &HashSet<LeadIdentity>) -> DedupOutcome {
    let mut seen = HashSet::with_capacity(candidates.len());
    let mut outcome = DedupOutcome::default();

    for lead in candidates {
        let identity = lead.identity();
        if existing.contains(&identity) {
            outcome.already_exported += 1;
        } else if !seen.insert(identity) {
            outcome.repeated += 1;
        } else {
            outcome.leads.push(lead.clone());
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lead(name: &str, address: &str) -> Lead {
        Lead::new(name, address)
    }

    #[test]
    fn test_drops_leads_already_in_destination() {
        let existing: HashSet<_> = [LeadIdentity::new("Joe's Pizza", "7 Carmine St")].into();
        let candidates = vec![
            lead("JOE'S PIZZA", " 7  carmine st"),
            lead("Quick Fix Plumbing", "123 Main St"),
        ];

        let outcome = filter_new(&candidates, &existing);
        assert_eq!(outcome.leads, vec![candidates[1].clone()]);
        assert_eq!(outcome.already_exported, 1);
        assert_eq!(outcome.repeated, 0);
    }

    #[test]
    fn test_drops_repeats_within_batch_keeping_first() {
        let mut first = lead("Cafe Uno", "1 Main St");
        first.phone = "first".to_string();
        let mut second = lead("cafe uno", "1 main st");
        second.phone = "second".to_string();
        let candidates = vec![first.clone(), lead("Cafe Due", "2 Main St"), second];

        let outcome = filter_new(&candidates, &HashSet::new());
        assert_eq!(outcome.leads.len(), 2);
        assert_eq!(outcome.leads[0].phone, "first");
        assert_eq!(outcome.leads[1].name, "Cafe Due");
        assert_eq!(outcome.repeated, 1);
        assert_eq!(outcome.skipped(), 1);
    }

    #[test]
    fn test_same_name_different_address_is_kept() {
        let candidates = vec![
            lead("Joe's Pizza", "7 Carmine St"),
            lead("Joe's Pizza", "1435 Broadway"),
        ];
        assert_eq!(filter_new(&candidates, &HashSet::new()).leads.len(), 2);
    }

    #[test]
    fn test_idempotent() {
        let existing: HashSet<_> = [LeadIdentity::new("A", "1")].into();
        let candidates = vec![
            lead("A", "1"),
            lead("B", "2"),
            lead("b", "2 "),
            lead("C", "3"),
            lead("", ""),
            lead(" ", " "),
        ];

        let once = filter_new(&candidates, &existing);
        let twice = filter_new(&once.leads, &existing);
        assert_eq!(once.leads, twice.leads);
        assert_eq!(twice.skipped(), 0);
    }

    #[test]
    fn test_does_not_mutate_inputs() {
        let existing: HashSet<_> = [LeadIdentity::new("A", "1")].into();
        let candidates = vec![lead("A", "1"), lead("B", "2")];
        let before = candidates.clone();
        let _ = filter_new(&candidates, &existing);
        assert_eq!(candidates, before);
        assert_eq!(existing.len(), 1);
    }
}
