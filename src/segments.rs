//! Static segment vocabulary: alias tables and bucket remaps.
//!
//! All segment knowledge lives here as declarative data so it can be unit
//! tested and extended without touching control flow. Three tables:
//!
//! - phrase aliases — natural-language demographic phrases to canonical keys
//!   (used by the intent parser)
//! - category aliases — source file category names to canonical keys (used by
//!   the segment filter; harmonization passes were not consistent about
//!   naming, e.g. `country` vs `region`)
//! - org-size buckets — raw size ranges to harmonized bucket labels

/// The baseline category, included unconditionally in filter output.
pub const OVERALL: &str = "overall";

/// Canonical demographic segment keys.
pub const SEGMENT_TYPES: &[&str] = &[
    "age",
    "gender",
    "region",
    "sector",
    "org_size",
    "job_level",
    "relationship_status",
    "education",
    "generation",
    "employment_status",
];

/// Natural-language phrase → canonical segment key. Multi-word phrases are
/// matched before single words by the intent parser, longest first.
const SEGMENT_ALIASES: &[(&str, &str)] = &[
    ("age group", "age"),
    ("age groups", "age"),
    ("age", "age"),
    ("generation", "generation"),
    ("generations", "generation"),
    ("gender", "gender"),
    ("men", "gender"),
    ("women", "gender"),
    ("male", "gender"),
    ("female", "gender"),
    ("region", "region"),
    ("regions", "region"),
    ("country", "region"),
    ("countries", "region"),
    ("market", "region"),
    ("markets", "region"),
    ("sector", "sector"),
    ("sectors", "sector"),
    ("industry", "sector"),
    ("industries", "sector"),
    ("org size", "org_size"),
    ("organisation size", "org_size"),
    ("organization size", "org_size"),
    ("company size", "org_size"),
    ("job level", "job_level"),
    ("job levels", "job_level"),
    ("seniority", "job_level"),
    ("relationship status", "relationship_status"),
    ("marital status", "relationship_status"),
    ("education", "education"),
    ("education level", "education"),
    ("employment status", "employment_status"),
    ("employment type", "employment_status"),
    ("full time", "employment_status"),
    ("part time", "employment_status"),
];

/// Source category name → canonical segment key. Source files are lowercased
/// snake_case but not consistent across survey years.
const CATEGORY_ALIASES: &[(&str, &str)] = &[
    ("overall", OVERALL),
    ("all", OVERALL),
    ("total", OVERALL),
    ("country", "region"),
    ("market", "region"),
    ("region", "region"),
    ("age", "age"),
    ("age_group", "age"),
    ("gender", "gender"),
    ("sector", "sector"),
    ("industry", "sector"),
    ("org_size", "org_size"),
    ("company_size", "org_size"),
    ("organisation_size", "org_size"),
    ("organization_size", "org_size"),
    ("job_level", "job_level"),
    ("seniority", "job_level"),
    ("relationship_status", "relationship_status"),
    ("marital_status", "relationship_status"),
    ("education", "education"),
    ("generation", "generation"),
    ("employment_status", "employment_status"),
    ("work_status", "employment_status"),
];

/// Raw org-size range → harmonized bucket label. Survey years before 2024
/// shipped numeric ranges; later years ship the bucket names directly.
const ORG_SIZE_BUCKETS: &[(&str, &str)] = &[
    ("1-9", "micro"),
    ("10-49", "small"),
    ("50-249", "medium"),
    ("250-999", "large"),
    ("1000+", "enterprise"),
];

/// Look up the canonical segment for a natural-language phrase.
pub fn canonical_segment(phrase: &str) -> Option<&'static str> {
    let needle = phrase.trim().to_lowercase();
    SEGMENT_ALIASES
        .iter()
        .find(|(alias, _)| *alias == needle)
        .map(|(_, canonical)| *canonical)
}

/// All phrase aliases, longest first, for substring scanning.
pub fn segment_aliases() -> Vec<(&'static str, &'static str)> {
    let mut aliases: Vec<_> = SEGMENT_ALIASES.to_vec();
    aliases.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.0.cmp(b.0)));
    aliases
}

/// Translate a source file category name to its canonical segment key.
/// Returns `None` for categories the vocabulary does not know; the filter
/// skips those rather than guessing.
pub fn canonical_category(source: &str) -> Option<&'static str> {
    let needle = source.trim().to_lowercase();
    CATEGORY_ALIASES
        .iter()
        .find(|(alias, _)| *alias == needle)
        .map(|(_, canonical)| *canonical)
}

/// Harmonize an org-size segment value. Unknown values pass through.
pub fn canonical_org_bucket(value: &str) -> &str {
    ORG_SIZE_BUCKETS
        .iter()
        .find(|(raw, _)| *raw == value)
        .map(|(_, bucket)| *bucket)
        .unwrap_or(value)
}

/// Whether `segment` is one of the canonical demographic segment keys.
pub fn is_known_segment(segment: &str) -> bool {
    SEGMENT_TYPES.contains(&segment)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phrase_aliases_resolve() {
        assert_eq!(canonical_segment("age"), Some("age"));
        assert_eq!(canonical_segment("job level"), Some("job_level"));
        assert_eq!(canonical_segment("Company Size"), Some("org_size"));
        assert_eq!(canonical_segment("nonsense"), None);
    }

    #[test]
    fn test_category_aliases_resolve() {
        assert_eq!(canonical_category("country"), Some("region"));
        assert_eq!(canonical_category("job_level"), Some("job_level"));
        assert_eq!(canonical_category("total"), Some(OVERALL));
        assert_eq!(canonical_category("shoe_size"), None);
    }

    #[test]
    fn test_every_canonical_target_is_known() {
        for (_, canonical) in SEGMENT_ALIASES {
            assert!(is_known_segment(canonical), "unknown target: {}", canonical);
        }
        for (_, canonical) in CATEGORY_ALIASES {
            assert!(
                *canonical == OVERALL || is_known_segment(canonical),
                "unknown target: {}",
                canonical
            );
        }
    }

    #[test]
    fn test_org_bucket_remap() {
        assert_eq!(canonical_org_bucket("1-9"), "micro");
        assert_eq!(canonical_org_bucket("1000+"), "enterprise");
        assert_eq!(canonical_org_bucket("enterprise"), "enterprise");
    }

    #[test]
    fn test_aliases_sorted_longest_first() {
        let aliases = segment_aliases();
        for pair in aliases.windows(2) {
            assert!(pair[0].0.len() >= pair[1].0.len());
        }
    }
}
