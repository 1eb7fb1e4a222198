//! Query intent parsing.
//!
//! Extracts topics, demographics, years, specificity, and the follow-up flag
//! from raw query text plus prior turns. Parsing never fails: input the
//! tables cannot interpret yields the empty general intent and the pipeline
//! proceeds on the broad path.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

use crate::models::{HistoryTurn, QueryIntent, Specificity};
use crate::segments;
use crate::topics;

static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(19|20)\d{2}\b").expect("year regex"));

const FOLLOW_UP_LEADS: &[&str] = &["what about", "and by", "how about", "and for", "and in"];

const INTERROGATIVES: &[&str] = &["what", "how", "which", "who", "where", "why"];

const COMPARISON_MARKERS: &[&str] = &[
    "compare",
    "compared",
    "comparison",
    "vs",
    "versus",
    "change",
    "changed",
    "trend",
    "over time",
    "year over year",
];

/// Lowercase, strip punctuation to spaces, collapse whitespace. Shared with
/// the identifier's exact-match cache key.
pub fn normalize_query(query: &str) -> String {
    let lowered = query.to_lowercase();
    let stripped: String = lowered
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' {
                c
            } else {
                ' '
            }
        })
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse a query in the context of prior turns.
pub fn parse(query: &str, history: &[HistoryTurn]) -> QueryIntent {
    let normalized = normalize_query(query);
    if normalized.is_empty() {
        return QueryIntent::general();
    }

    let demographics = extract_demographics(&normalized);
    let matched_topics = topics::matched_topics(&normalized);
    let years = extract_years(&normalized);

    let specificity = if demographics.is_empty() && matched_topics.is_empty() {
        Specificity::General
    } else {
        Specificity::Specific
    };

    let is_follow_up = !history.is_empty()
        && looks_like_follow_up(&normalized, !matched_topics.is_empty(), !demographics.is_empty());

    QueryIntent {
        topics: matched_topics,
        demographics,
        years,
        specificity,
        is_follow_up,
    }
}

/// Canonical demographic segments named in the normalized query, sorted and
/// deduplicated. Aliases are matched longest first on word boundaries so
/// "age group" wins over "age" and "maintain" never matches "ai".
fn extract_demographics(normalized: &str) -> Vec<String> {
    let padded = format!(" {} ", normalized);
    let mut found = BTreeSet::new();
    for (alias, canonical) in segments::segment_aliases() {
        if padded.contains(&format!(" {} ", alias)) {
            found.insert(canonical.to_string());
        }
    }
    found.into_iter().collect()
}

/// Four-digit years in a plausible survey range, in order of appearance.
fn extract_years(normalized: &str) -> Vec<u16> {
    let mut seen = BTreeSet::new();
    let mut years = Vec::new();
    for m in YEAR_RE.find_iter(normalized) {
        if let Ok(year) = m.as_str().parse::<u16>() {
            if (1990..=2099).contains(&year) && seen.insert(year) {
                years.push(year);
            }
        }
    }
    years
}

/// A query is a follow-up when it leans on the previous turn instead of
/// restating a topic: a recognized lead-in phrase, a short query with no
/// topic of its own, or an interrogative plus a bare demographic.
fn looks_like_follow_up(normalized: &str, has_topic: bool, has_demographic: bool) -> bool {
    if FOLLOW_UP_LEADS
        .iter()
        .any(|lead| normalized.starts_with(lead))
    {
        return true;
    }

    let token_count = normalized.split_whitespace().count();
    if token_count <= 4 && !has_topic {
        return true;
    }

    if !has_topic && has_demographic {
        if let Some(first) = normalized.split_whitespace().next() {
            if INTERROGATIVES.contains(&first) {
                return true;
            }
        }
    }

    false
}

/// Whether the query asks for a cross-slice or cross-year comparison. Used by
/// the orchestrator to decide if incomparable topics must be filtered out.
pub fn is_comparison_query(query: &str, intent: &QueryIntent) -> bool {
    if intent.years.len() > 1 {
        return true;
    }
    let padded = format!(" {} ", normalize_query(query));
    COMPARISON_MARKERS
        .iter()
        .any(|marker| padded.contains(&format!(" {} ", marker)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> Vec<HistoryTurn> {
        vec![HistoryTurn {
            query: "How is work life balance in 2025?".to_string(),
            response: "Mostly stable.".to_string(),
        }]
    }

    #[test]
    fn test_follow_up_with_demographic() {
        let intent = parse("What about by age?", &history());
        assert!(intent.is_follow_up);
        assert!(intent.demographics.contains(&"age".to_string()));
    }

    #[test]
    fn test_fresh_query_is_not_follow_up() {
        let intent = parse("How is work life balance across markets?", &history());
        assert!(!intent.is_follow_up);
        assert!(intent.topics.contains(&"work_life_balance".to_string()));
        assert!(intent.demographics.contains(&"region".to_string()));
    }

    #[test]
    fn test_no_history_never_follow_up() {
        let intent = parse("What about by age?", &[]);
        assert!(!intent.is_follow_up);
    }

    #[test]
    fn test_years_extracted_and_deduped() {
        let intent = parse("compare 2024 to 2025 and 2024 again", &[]);
        assert_eq!(intent.years, vec![2024, 2025]);
    }

    #[test]
    fn test_year_out_of_range_ignored() {
        let intent = parse("the 1889 survey and the 2024 one", &[]);
        assert_eq!(intent.years, vec![2024]);
    }

    #[test]
    fn test_specificity_general_when_nothing_matches() {
        let intent = parse("tell me something interesting", &[]);
        assert_eq!(intent.specificity, Specificity::General);
        assert!(intent.topics.is_empty());
        assert!(intent.demographics.is_empty());
    }

    #[test]
    fn test_specificity_specific_on_demographic() {
        let intent = parse("break it down by gender please", &[]);
        assert_eq!(intent.specificity, Specificity::Specific);
        assert_eq!(intent.demographics, vec!["gender".to_string()]);
    }

    #[test]
    fn test_empty_query_fails_open() {
        let intent = parse("   ??? ", &history());
        assert_eq!(intent.specificity, Specificity::General);
        assert!(!intent.is_follow_up);
        assert!(intent.years.is_empty());
    }

    #[test]
    fn test_comparison_detection() {
        let intent = parse("how did pay change since 2024", &[]);
        assert!(is_comparison_query("how did pay change since 2024", &intent));

        let intent = parse("how is pay in 2025", &[]);
        assert!(!is_comparison_query("how is pay in 2025", &intent));

        let intent = parse("pay in 2024 vs 2025", &[]);
        assert!(is_comparison_query("pay in 2024 vs 2025", &intent));
    }

    #[test]
    fn test_multiword_alias_beats_single() {
        let intent = parse("split by company size", &[]);
        assert_eq!(intent.demographics, vec!["org_size".to_string()]);
    }
}
