//! Core data models used throughout Survey Harness.
//!
//! These types represent the survey data files, cache entries, parsed query
//! intents, and pipeline results that flow through the retrieval layer. Each
//! pipeline stage has its own tagged record type with fixed fields; nothing
//! is threaded through as loose property bags.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::segments;

/// A single metric value from a source file.
///
/// Source files store either a decimal fraction (`0.92`) or a percentage
/// string (`"92%"`, `"0.92"`), depending on which harmonization pass produced
/// them. Both deserialize into the same value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawMetric", into = "f64")]
pub struct MetricValue(pub f64);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawMetric {
    Number(f64),
    Text(String),
}

impl From<RawMetric> for MetricValue {
    fn from(raw: RawMetric) -> Self {
        match raw {
            RawMetric::Number(n) => MetricValue(n),
            RawMetric::Text(s) => {
                let trimmed = s.trim().trim_end_matches('%');
                MetricValue(trimmed.parse::<f64>().unwrap_or(0.0))
            }
        }
    }
}

impl From<MetricValue> for f64 {
    fn from(v: MetricValue) -> f64 {
        v.0
    }
}

impl MetricValue {
    /// Value scaled to 0–100. Fractions (<= 1.0) scale up; values already on
    /// the percentage scale pass through.
    pub fn as_percentage(&self) -> f64 {
        if self.0 <= 1.0 {
            self.0 * 100.0
        } else {
            self.0
        }
    }
}

/// Metadata block of a persisted survey data file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileMetadata {
    pub topic_id: String,
    pub question_id: String,
    pub year: u16,
    pub comparable: bool,
    pub user_message: Option<String>,
    pub keywords: Vec<String>,
    pub available_markets: Vec<String>,
    /// Source category names present in this file (e.g. `country`, `job_level`).
    pub segments: Vec<String>,
    pub metric: Option<String>,
    pub value_format: Option<String>,
    pub sort_order: Option<String>,
}

/// One answer option of a survey question, with its per-segment breakdown.
///
/// `data` maps a source category name (e.g. `country`) to a map from segment
/// value (e.g. `"de"`) to the metric value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseRow {
    pub response: String,
    #[serde(default)]
    pub data: BTreeMap<String, BTreeMap<String, MetricValue>>,
}

/// A loaded survey data file. Immutable once loaded; may be partially
/// populated (only some segment categories present) when loaded incrementally.
///
/// The `id` is not part of the wire format — it is the file stem, assigned by
/// the repository after parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataFile {
    #[serde(default)]
    pub id: String,
    pub metadata: FileMetadata,
    pub question: String,
    #[serde(default)]
    pub responses: Vec<ResponseRow>,
}

impl DataFile {
    /// Canonical segments with data present in any response row. The
    /// `overall` baseline is bookkept separately and not reported here.
    pub fn present_segments(&self) -> BTreeSet<String> {
        let mut present = BTreeSet::new();
        for row in &self.responses {
            for category in row.data.keys() {
                if let Some(canonical) = segments::canonical_category(category) {
                    if canonical != segments::OVERALL {
                        present.insert(canonical.to_string());
                    }
                }
            }
        }
        present
    }

    /// All canonical segments this file can provide, from the metadata
    /// segment list plus whatever is already present in the rows.
    pub fn available_segments(&self) -> BTreeSet<String> {
        let mut available = self.present_segments();
        for source in &self.metadata.segments {
            if let Some(canonical) = segments::canonical_category(source) {
                if canonical != segments::OVERALL {
                    available.insert(canonical.to_string());
                }
            }
        }
        available
    }

    /// Drop every segment category whose canonical name is not requested.
    /// The `overall` baseline is always kept. Rows left with no data are
    /// removed.
    pub fn retain_segments(&mut self, requested: &BTreeSet<String>) {
        for row in &mut self.responses {
            row.data
                .retain(|category, _| match segments::canonical_category(category) {
                    Some(canonical) => {
                        canonical == segments::OVERALL || requested.contains(canonical)
                    }
                    None => false,
                });
        }
        self.responses.retain(|row| !row.data.is_empty());
    }

    /// Shallow segment merge: add categories and segment values from
    /// `incoming` that this file does not already carry. Existing values are
    /// left untouched. Rows are matched by response label; unmatched incoming
    /// rows are appended.
    pub fn merge_segments(&mut self, incoming: &DataFile) {
        for other_row in &incoming.responses {
            match self
                .responses
                .iter_mut()
                .find(|row| row.response == other_row.response)
            {
                Some(row) => {
                    for (category, values) in &other_row.data {
                        let slot = row.data.entry(category.clone()).or_default();
                        for (segment_value, metric) in values {
                            slot.entry(segment_value.clone()).or_insert(*metric);
                        }
                    }
                }
                None => self.responses.push(other_row.clone()),
            }
        }
    }
}

/// Per-file state inside a thread's cache entry.
///
/// Invariant: `loaded_segments` is always a subset of `available_segments`.
/// [`crate::cache`] enforces this on every merge.
#[derive(Debug, Clone)]
pub struct CachedFile {
    pub id: String,
    pub loaded_segments: BTreeSet<String>,
    pub available_segments: BTreeSet<String>,
    pub data: Option<DataFile>,
}

impl CachedFile {
    /// Build a cache record from a freshly loaded file. The loaded set is
    /// what the file actually carries after any segment trim.
    pub fn from_loaded(file: DataFile) -> Self {
        let loaded = file.present_segments();
        let mut available = file.available_segments();
        available.extend(loaded.iter().cloned());
        CachedFile {
            id: file.id.clone(),
            loaded_segments: loaded,
            available_segments: available,
            data: Some(file),
        }
    }
}

/// A thread's cached view of which files and segments are already loaded.
#[derive(Debug, Clone)]
pub struct ThreadCacheEntry {
    pub thread_id: String,
    pub files: Vec<CachedFile>,
    pub expires_at: DateTime<Utc>,
}

impl ThreadCacheEntry {
    pub fn file(&self, id: &str) -> Option<&CachedFile> {
        self.files.iter().find(|f| f.id == id)
    }
}

/// Whether a query names explicit demographics or topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Specificity {
    General,
    Specific,
}

/// One prior turn of the conversation, as supplied by the chat layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub query: String,
    pub response: String,
}

/// Parsed intent of a single query. Derived fresh per request, never
/// persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryIntent {
    pub topics: Vec<String>,
    pub demographics: Vec<String>,
    pub years: Vec<u16>,
    pub specificity: Specificity,
    pub is_follow_up: bool,
}

impl QueryIntent {
    /// The fail-open result: nothing recognized, treated as a broad query.
    pub fn general() -> Self {
        QueryIntent {
            topics: Vec::new(),
            demographics: Vec::new(),
            years: Vec::new(),
            specificity: Specificity::General,
            is_follow_up: false,
        }
    }
}

/// Validated output of file identification, whether it came from the static
/// topic table or the external semantic matcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub file_ids: Vec<String>,
    pub matched_topics: Vec<String>,
    pub explanation: String,
}

/// One flat statistic emitted by the segment filter. Values are never
/// fabricated; every record corresponds to a datum in a source file.
#[derive(Debug, Clone, Serialize)]
pub struct StatRecord {
    pub file_id: String,
    pub question: String,
    pub response: String,
    /// Canonical segment name (or `overall` for the baseline).
    pub category: String,
    /// Segment value within the category (e.g. `senior`).
    pub value: String,
    /// 0–100 scale.
    pub percentage: f64,
}

/// Result of filtering loaded files down to the requested segments.
#[derive(Debug, Clone, Default)]
pub struct FilterResult {
    /// Input files trimmed to the requested segments (plus `overall`).
    pub filtered_data: Vec<DataFile>,
    pub stats: Vec<StatRecord>,
    /// Requested canonical segments that produced at least one stat. Sorted.
    pub found_segments: Vec<String>,
    /// Requested segments with no data in any input file. Sorted.
    pub missing_segments: Vec<String>,
}

/// Cross-year comparability of a single topic.
#[derive(Debug, Clone, Serialize)]
pub struct TopicCompatibility {
    pub comparable: bool,
    pub available_years: Vec<u16>,
    pub available_markets: Vec<String>,
    pub user_message: Option<String>,
}

/// Cross-year comparability of a single segment type.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentTypeCompatibility {
    pub comparable: bool,
    pub comparable_values: Vec<String>,
    pub user_message: Option<String>,
}

/// Structured, non-throwing error attached to a compatibility result when
/// the mapping itself could not be consulted.
#[derive(Debug, Clone, Serialize)]
pub struct CompatibilityError {
    /// Error class, e.g. `TECHNICAL`.
    pub kind: String,
    pub message: String,
    pub details: Option<String>,
}

/// Full comparability assessment for one request.
#[derive(Debug, Clone, Serialize)]
pub struct CompatibilityMetadata {
    pub is_fully_compatible: bool,
    pub topic_compatibility: BTreeMap<String, TopicCompatibility>,
    pub segment_compatibility: BTreeMap<String, SegmentTypeCompatibility>,
    pub mapping_version: Option<String>,
    pub assessed_at: DateTime<Utc>,
    pub error: Option<CompatibilityError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_with(categories: &[(&str, &[(&str, f64)])]) -> DataFile {
        let mut data = BTreeMap::new();
        for (category, values) in categories {
            let mut map = BTreeMap::new();
            for (k, v) in *values {
                map.insert(k.to_string(), MetricValue(*v));
            }
            data.insert(category.to_string(), map);
        }
        DataFile {
            id: "f1".to_string(),
            metadata: FileMetadata::default(),
            question: "Q".to_string(),
            responses: vec![ResponseRow {
                response: "Agree".to_string(),
                data,
            }],
        }
    }

    #[test]
    fn test_metric_value_from_string_and_number() {
        let v: MetricValue = serde_json::from_str("0.92").unwrap();
        assert!((v.as_percentage() - 92.0).abs() < 1e-9);

        let v: MetricValue = serde_json::from_str("\"92%\"").unwrap();
        assert!((v.as_percentage() - 92.0).abs() < 1e-9);

        let v: MetricValue = serde_json::from_str("\"0.5\"").unwrap();
        assert!((v.as_percentage() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_present_segments_translates_and_skips_overall() {
        let file = file_with(&[
            ("overall", &[("overall", 0.8)]),
            ("country", &[("de", 0.7)]),
            ("job_level", &[("senior", 0.9)]),
        ]);
        let present = file.present_segments();
        assert!(present.contains("region"));
        assert!(present.contains("job_level"));
        assert!(!present.contains("overall"));
    }

    #[test]
    fn test_retain_segments_keeps_overall() {
        let mut file = file_with(&[
            ("overall", &[("overall", 0.8)]),
            ("gender", &[("female", 0.7)]),
            ("job_level", &[("senior", 0.9)]),
        ]);
        let requested: BTreeSet<String> = ["job_level".to_string()].into_iter().collect();
        file.retain_segments(&requested);

        let row = &file.responses[0];
        assert!(row.data.contains_key("overall"));
        assert!(row.data.contains_key("job_level"));
        assert!(!row.data.contains_key("gender"));
    }

    #[test]
    fn test_merge_segments_does_not_overwrite() {
        let mut base = file_with(&[("gender", &[("female", 0.7)])]);
        let incoming = file_with(&[
            ("gender", &[("female", 0.1), ("male", 0.6)]),
            ("age", &[("18-24", 0.5)]),
        ]);
        base.merge_segments(&incoming);

        let row = &base.responses[0];
        assert_eq!(row.data["gender"]["female"], MetricValue(0.7));
        assert_eq!(row.data["gender"]["male"], MetricValue(0.6));
        assert_eq!(row.data["age"]["18-24"], MetricValue(0.5));
    }

    #[test]
    fn test_cached_file_invariant_holds() {
        let file = file_with(&[("gender", &[("female", 0.7)])]);
        let cached = CachedFile::from_loaded(file);
        assert!(cached.loaded_segments.is_subset(&cached.available_segments));
    }
}
