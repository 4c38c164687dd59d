//! Deterministic placeholder summaries for leads the enricher could not describe.

use crate::models::Lead;

/// Returned when a lead has neither a name nor a category.
pub const GENERIC_SUMMARY: &str = "Local business; no further details are available.";

/// Build a summary from the lead's name and category alone.
///
/// Pure: never touches the network, never fails, same lead → same string.
pub fn fallback_summary(lead: &Lead) -> String {
    let name = lead.name.trim();
    let category = lead.category.trim();

    match (name.is_empty(), category.is_empty()) {
        (true, true) => GENERIC_SUMMARY.to_string(),
        (false, true) => format!("{name} is a local business."),
        (true, false) => format!("{} {category} business.", capitalize(article(category))),
        (false, false) => format!("{name} is {} {category} business.", article(category)),
    }
}

/// A lead without a name gives the enricher nothing to research.
pub fn lacks_enrichment_input(lead: &Lead) -> bool {
    lead.name.trim().is_empty()
}

fn article(word: &str) -> &'static str {
    match word.chars().next().map(|c| c.to_ascii_lowercase()) {
        Some('a' | 'e' | 'i' | 'o' | 'u') => "an",
        _ => "a",
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_and_category() {
        let lead = Lead::new("Joe's Pizza", "7 Carmine St").with_category("Pizza restaurant");
        assert_eq!(
            fallback_summary(&lead),
            "Joe's Pizza is a Pizza restaurant business."
        );
    }

    #[test]
    fn test_vowel_category_uses_an() {
        let lead = Lead::new("Pasta Roma", "").with_category("Italian restaurant");
        assert_eq!(
            fallback_summary(&lead),
            "Pasta Roma is an Italian restaurant business."
        );
    }

    #[test]
    fn test_name_only() {
        let lead = Lead::new("Quick Fix Plumbing", "123 Main St");
        assert_eq!(
            fallback_summary(&lead),
            "Quick Fix Plumbing is a local business."
        );
    }

    #[test]
    fn test_category_only() {
        let lead = Lead::new("  ", "").with_category("electrician");
        assert_eq!(fallback_summary(&lead), "An electrician business.");
    }

    #[test]
    fn test_empty_lead_gets_generic_placeholder() {
        let lead = Lead::default();
        assert_eq!(fallback_summary(&lead), GENERIC_SUMMARY);
        assert!(lacks_enrichment_input(&lead));
    }

    #[test]
    fn test_deterministic_and_non_empty() {
        let leads = [
            Lead::default(),
            Lead::new("A", ""),
            Lead::new("", "").with_category("Mall"),
            Lead::new("Select Citywalk", "Saket").with_category("Shopping mall"),
        ];
        for lead in &leads {
            let first = fallback_summary(lead);
            assert!(!first.trim().is_empty());
            assert_eq!(first, fallback_summary(lead));
        }
    }

    #[test]
    fn test_ignores_location_and_website() {
        let mut a = Lead::new("Cafe Uno", "1 Main St").with_category("Cafe");
        let b = a.clone();
        a.city = "Mumbai".to_string();
        a.website = Some("https://cafeuno.example".to_string());
        assert_eq!(fallback_summary(&a), fallback_summary(&b));
    }
}
