//! Cross-year compatibility assessment.
//!
//! Survey methodology changes between years; not every topic or segment can
//! be compared across them without distortion. The canonical mapping document
//! records, per topic, whether it is comparable and which file ids belong to
//! which year. This module loads that mapping once per process, assesses
//! topic and segment comparability for a request, and vetoes mixed-year
//! comparisons for topics flagged non-comparable.
//!
//! Failures to load the mapping never throw into the pipeline: the assessor
//! returns a conservative "not fully compatible" result carrying a structured
//! error so the caller can still answer without cross-year claims.

use anyhow::Result;
use chrono::Utc;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use crate::error::RetrievalError;
use crate::models::{
    CompatibilityError, CompatibilityMetadata, SegmentTypeCompatibility, TopicCompatibility,
};
use crate::segments;

// ============ Mapping document ============

/// Parsed canonical topic mapping, as loaded from the configured JSON path.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompatibilityMapping {
    #[serde(default)]
    pub themes: Vec<Theme>,
    #[serde(default)]
    pub data_access: DataAccess,
    pub metadata: MappingMeta,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Theme {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub topics: Vec<TopicEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicEntry {
    pub id: String,
    #[serde(default)]
    pub comparable: bool,
    /// Year (as a JSON object key) → file ids published for that year.
    #[serde(default)]
    pub mapping: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub available_markets: Vec<String>,
    #[serde(default)]
    pub user_message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataAccess {
    #[serde(default)]
    pub comparable_markets: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MappingMeta {
    pub version: String,
}

impl CompatibilityMapping {
    /// Find a topic entry by id. Linear scan; the mapping is small and loaded
    /// once.
    pub fn find_topic(&self, topic_id: &str) -> Option<&TopicEntry> {
        self.themes
            .iter()
            .flat_map(|theme| theme.topics.iter())
            .find(|topic| topic.id == topic_id)
    }

    pub fn topic_count(&self) -> usize {
        self.themes.iter().map(|t| t.topics.len()).sum()
    }

    /// Reverse lookup: which topic and year does a file id belong to?
    pub fn locate_file(&self, file_id: &str) -> Option<(&TopicEntry, u16)> {
        for theme in &self.themes {
            for topic in &theme.topics {
                for (year, entries) in &topic.mapping {
                    if entries.iter().any(|e| e == file_id) {
                        if let Ok(year) = year.parse::<u16>() {
                            return Some((topic, year));
                        }
                    }
                }
            }
        }
        None
    }
}

impl TopicEntry {
    /// Years with at least one published file, ascending.
    pub fn available_years(&self) -> Vec<u16> {
        let mut years: Vec<u16> = self
            .mapping
            .iter()
            .filter(|(_, entries)| !entries.is_empty())
            .filter_map(|(year, _)| year.parse::<u16>().ok())
            .collect();
        years.sort_unstable();
        years
    }

    /// File ids published for `year`, or every year when `None`.
    pub fn file_ids(&self, years: &[u16]) -> Vec<String> {
        let mut ids = Vec::new();
        for (year, entries) in &self.mapping {
            let keep = match year.parse::<u16>() {
                Ok(y) => years.is_empty() || years.contains(&y),
                Err(_) => false,
            };
            if keep {
                ids.extend(entries.iter().cloned());
            }
        }
        ids
    }
}

// ============ Process-wide store ============

/// Process-scoped holder of the mapping singleton: lazy init on first use,
/// explicit [`MappingStore::refresh`], replace-on-swap so concurrent readers
/// never block each other.
pub struct MappingStore {
    path: PathBuf,
    inner: RwLock<Option<Arc<CompatibilityMapping>>>,
}

impl MappingStore {
    pub fn new(path: PathBuf) -> Self {
        MappingStore {
            path,
            inner: RwLock::new(None),
        }
    }

    /// The current mapping, loading it on first use.
    pub fn get(&self) -> Result<Arc<CompatibilityMapping>, RetrievalError> {
        if let Some(mapping) = self.inner.read().expect("mapping lock").as_ref() {
            return Ok(mapping.clone());
        }
        self.refresh()
    }

    /// Reload from disk and swap the singleton reference.
    pub fn refresh(&self) -> Result<Arc<CompatibilityMapping>, RetrievalError> {
        let mapping = Arc::new(load_mapping(&self.path)?);
        debug!(
            version = %mapping.metadata.version,
            topics = mapping.topic_count(),
            "compatibility mapping loaded"
        );
        *self.inner.write().expect("mapping lock") = Some(mapping.clone());
        Ok(mapping)
    }

    /// Drop the loaded mapping so the next access reloads. For tests.
    pub fn reset(&self) {
        *self.inner.write().expect("mapping lock") = None;
    }
}

fn load_mapping(path: &Path) -> Result<CompatibilityMapping, RetrievalError> {
    let raw = std::fs::read_to_string(path).map_err(|e| RetrievalError::MappingLoad {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    serde_json::from_str(&raw).map_err(|e| RetrievalError::MappingLoad {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

// ============ Assessment ============

/// Result of [`CompatibilityAssessor::filter_incomparable`].
#[derive(Debug, Clone, Default)]
pub struct IncomparableFilter {
    pub filtered_file_ids: Vec<String>,
    /// Topic id → its user-facing message, for every topic whose files were
    /// removed.
    pub incomparable_topic_messages: BTreeMap<String, String>,
}

pub struct CompatibilityAssessor {
    store: Arc<MappingStore>,
}

const NOT_IN_MAPPING_MESSAGE: &str =
    "This topic is not in the canonical mapping; cross-year comparisons are not supported for it.";

const UNKNOWN_SEGMENT_MESSAGE: &str =
    "This segment type is not covered by the methodology notes; treat cross-year comparisons with caution.";

const NO_COMPARABLE_MARKETS_MESSAGE: &str =
    "No markets were surveyed consistently across years; regional comparisons are not supported.";

impl CompatibilityAssessor {
    pub fn new(store: Arc<MappingStore>) -> Self {
        CompatibilityAssessor { store }
    }

    /// Assess cross-year comparability for the matched topics and requested
    /// segment types. Pure with respect to the loaded mapping version:
    /// identical inputs against an unchanged mapping give identical results.
    pub fn assess(&self, topic_ids: &[String], segment_types: &[String]) -> CompatibilityMetadata {
        let mapping = match self.store.get() {
            Ok(mapping) => mapping,
            Err(e) => {
                warn!(error = %e, "compatibility mapping unavailable, degrading");
                return CompatibilityMetadata {
                    is_fully_compatible: false,
                    topic_compatibility: BTreeMap::new(),
                    segment_compatibility: BTreeMap::new(),
                    mapping_version: None,
                    assessed_at: Utc::now(),
                    error: Some(CompatibilityError {
                        kind: "TECHNICAL".to_string(),
                        message: "Compatibility mapping could not be loaded.".to_string(),
                        details: Some(e.to_string()),
                    }),
                };
            }
        };

        let mut fully_compatible = true;
        let mut topic_compatibility = BTreeMap::new();

        for topic_id in topic_ids {
            let entry = match mapping.find_topic(topic_id) {
                Some(entry) => entry,
                None => {
                    fully_compatible = false;
                    topic_compatibility.insert(
                        topic_id.clone(),
                        TopicCompatibility {
                            comparable: false,
                            available_years: Vec::new(),
                            available_markets: Vec::new(),
                            user_message: Some(NOT_IN_MAPPING_MESSAGE.to_string()),
                        },
                    );
                    continue;
                }
            };

            let available_years = entry.available_years();
            // A single-year topic cannot produce an invalid comparison, so it
            // does not veto overall compatibility.
            if !entry.comparable && available_years.len() > 1 {
                fully_compatible = false;
            }
            topic_compatibility.insert(
                topic_id.clone(),
                TopicCompatibility {
                    comparable: entry.comparable,
                    available_years,
                    available_markets: entry.available_markets.clone(),
                    user_message: entry.user_message.clone(),
                },
            );
        }

        let mut segment_compatibility = BTreeMap::new();
        for segment_type in segment_types {
            let assessed = assess_segment(segment_type, &mapping);
            if !assessed.comparable {
                fully_compatible = false;
            }
            segment_compatibility.insert(segment_type.clone(), assessed);
        }

        CompatibilityMetadata {
            is_fully_compatible: fully_compatible,
            topic_compatibility,
            segment_compatibility,
            mapping_version: Some(mapping.metadata.version.clone()),
            assessed_at: Utc::now(),
            error: None,
        }
    }

    /// Remove every file of a non-comparable topic from a mixed-year
    /// comparison. A no-op unless the query is a comparison AND the file set
    /// spans more than one year; the removal always takes the whole topic,
    /// not just the overlapping year.
    pub fn filter_incomparable(
        &self,
        file_ids: &[String],
        is_comparison_query: bool,
    ) -> IncomparableFilter {
        let passthrough = IncomparableFilter {
            filtered_file_ids: file_ids.to_vec(),
            incomparable_topic_messages: BTreeMap::new(),
        };

        if !is_comparison_query {
            return passthrough;
        }

        let mapping = match self.store.get() {
            Ok(mapping) => mapping,
            Err(e) => {
                // Without the mapping there is nothing to judge; the assess()
                // result already carries the structured error.
                warn!(error = %e, "compatibility mapping unavailable, skipping comparison filter");
                return passthrough;
            }
        };

        let located: Vec<(&String, Option<(&TopicEntry, u16)>)> = file_ids
            .iter()
            .map(|id| (id, mapping.locate_file(id)))
            .collect();

        let years: BTreeSet<u16> = located
            .iter()
            .filter_map(|(id, loc)| loc.map(|(_, year)| year).or_else(|| year_from_id(id)))
            .collect();
        if years.len() <= 1 {
            return passthrough;
        }

        let mut filtered = Vec::new();
        let mut messages = BTreeMap::new();
        for (id, loc) in located {
            match loc {
                Some((topic, _)) if !topic.comparable => {
                    messages.insert(
                        topic.id.clone(),
                        topic
                            .user_message
                            .clone()
                            .unwrap_or_else(|| NOT_IN_MAPPING_MESSAGE.to_string()),
                    );
                }
                _ => filtered.push(id.clone()),
            }
        }

        IncomparableFilter {
            filtered_file_ids: filtered,
            incomparable_topic_messages: messages,
        }
    }
}

fn assess_segment(
    segment_type: &str,
    mapping: &CompatibilityMapping,
) -> SegmentTypeCompatibility {
    match segment_type {
        "region" | "country" => {
            let markets = mapping.data_access.comparable_markets.clone();
            if markets.is_empty() {
                SegmentTypeCompatibility {
                    comparable: false,
                    comparable_values: Vec::new(),
                    user_message: Some(NO_COMPARABLE_MARKETS_MESSAGE.to_string()),
                }
            } else {
                SegmentTypeCompatibility {
                    comparable: true,
                    comparable_values: markets,
                    user_message: None,
                }
            }
        }
        known if segments::is_known_segment(known) => SegmentTypeCompatibility {
            comparable: true,
            comparable_values: Vec::new(),
            user_message: None,
        },
        _ => SegmentTypeCompatibility {
            comparable: true,
            comparable_values: Vec::new(),
            user_message: Some(UNKNOWN_SEGMENT_MESSAGE.to_string()),
        },
    }
}

/// Fallback year detection for file ids not present in the mapping:
/// a trailing `_YYYY` suffix.
fn year_from_id(id: &str) -> Option<u16> {
    let (_, suffix) = id.rsplit_once('_')?;
    let year = suffix.parse::<u16>().ok()?;
    (1990..=2099).contains(&year).then_some(year)
}

// ============ CLI command ============

/// Validate and summarize the mapping for `svy mapping check`.
pub fn run_mapping_check(config: &crate::config::Config) -> Result<()> {
    let store = MappingStore::new(config.compatibility.mapping_path.clone());
    let mapping = store.get()?;

    let comparable = mapping
        .themes
        .iter()
        .flat_map(|t| t.topics.iter())
        .filter(|t| t.comparable)
        .count();

    println!("mapping version: {}", mapping.metadata.version);
    println!("themes:          {}", mapping.themes.len());
    println!("topics:          {}", mapping.topic_count());
    println!("  comparable:    {}", comparable);
    println!(
        "  non-comparable: {}",
        mapping.topic_count() - comparable
    );
    println!(
        "comparable markets: {}",
        if mapping.data_access.comparable_markets.is_empty() {
            "(none)".to_string()
        } else {
            mapping.data_access.comparable_markets.join(", ")
        }
    );
    println!("ok");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::NamedTempFile;

    fn mapping_json() -> &'static str {
        r#"{
            "themes": [
                {
                    "name": "engagement",
                    "topics": [
                        {
                            "id": "work_life_balance",
                            "comparable": true,
                            "mapping": {
                                "2024": ["wlb_1_2024"],
                                "2025": ["wlb_1_2025"]
                            },
                            "availableMarkets": ["de", "us"]
                        },
                        {
                            "id": "compensation",
                            "comparable": false,
                            "userMessage": "Pay questions were reworded in 2025; years are not comparable.",
                            "mapping": {
                                "2024": ["pay_1_2024"],
                                "2025": ["pay_1_2025"]
                            }
                        },
                        {
                            "id": "ai_adoption",
                            "comparable": false,
                            "mapping": {
                                "2025": ["ai_1_2025"]
                            }
                        }
                    ]
                }
            ],
            "dataAccess": {
                "comparableMarkets": ["de", "us", "uk"]
            },
            "metadata": {"version": "3.2.0"}
        }"#
    }

    fn store() -> Arc<MappingStore> {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(mapping_json().as_bytes()).unwrap();
        let (_, path) = file.keep().unwrap();
        Arc::new(MappingStore::new(path))
    }

    #[test]
    fn test_assess_known_comparable_topic() {
        let assessor = CompatibilityAssessor::new(store());
        let meta = assessor.assess(&["work_life_balance".to_string()], &[]);

        assert!(meta.is_fully_compatible);
        let topic = &meta.topic_compatibility["work_life_balance"];
        assert!(topic.comparable);
        assert_eq!(topic.available_years, vec![2024, 2025]);
        assert_eq!(meta.mapping_version.as_deref(), Some("3.2.0"));
    }

    #[test]
    fn test_assess_unknown_topic_vetoes() {
        let assessor = CompatibilityAssessor::new(store());
        let meta = assessor.assess(&["made_up".to_string()], &[]);
        assert!(!meta.is_fully_compatible);
        assert!(!meta.topic_compatibility["made_up"].comparable);
    }

    #[test]
    fn test_single_year_incomparable_topic_does_not_veto() {
        let assessor = CompatibilityAssessor::new(store());
        let meta = assessor.assess(&["ai_adoption".to_string()], &[]);
        assert!(meta.is_fully_compatible);
        assert!(!meta.topic_compatibility["ai_adoption"].comparable);
    }

    #[test]
    fn test_multi_year_incomparable_topic_vetoes() {
        let assessor = CompatibilityAssessor::new(store());
        let meta = assessor.assess(&["compensation".to_string()], &[]);
        assert!(!meta.is_fully_compatible);
    }

    #[test]
    fn test_segment_defaults() {
        let assessor = CompatibilityAssessor::new(store());
        let meta = assessor.assess(
            &[],
            &["region".to_string(), "age".to_string(), "shoe_size".to_string()],
        );

        assert!(meta.is_fully_compatible);
        assert_eq!(
            meta.segment_compatibility["region"].comparable_values,
            vec!["de", "us", "uk"]
        );
        assert!(meta.segment_compatibility["age"].comparable);
        let unknown = &meta.segment_compatibility["shoe_size"];
        assert!(unknown.comparable);
        assert!(unknown.user_message.is_some());
    }

    #[test]
    fn test_assess_is_stable_for_same_inputs() {
        let assessor = CompatibilityAssessor::new(store());
        let topics = vec!["work_life_balance".to_string(), "compensation".to_string()];
        let segments = vec!["age".to_string()];
        let a = assessor.assess(&topics, &segments);
        let b = assessor.assess(&topics, &segments);
        assert_eq!(a.is_fully_compatible, b.is_fully_compatible);
        assert_eq!(a.mapping_version, b.mapping_version);
    }

    #[test]
    fn test_mapping_load_failure_is_structured() {
        let store = Arc::new(MappingStore::new(PathBuf::from("/nonexistent/mapping.json")));
        let assessor = CompatibilityAssessor::new(store);
        let meta = assessor.assess(&["work_life_balance".to_string()], &[]);

        assert!(!meta.is_fully_compatible);
        let error = meta.error.expect("structured error");
        assert_eq!(error.kind, "TECHNICAL");
    }

    #[test]
    fn test_filter_noop_when_not_comparison() {
        let assessor = CompatibilityAssessor::new(store());
        let ids = vec!["pay_1_2024".to_string(), "pay_1_2025".to_string()];
        let result = assessor.filter_incomparable(&ids, false);
        assert_eq!(result.filtered_file_ids, ids);
        assert!(result.incomparable_topic_messages.is_empty());
    }

    #[test]
    fn test_filter_noop_for_single_year() {
        let assessor = CompatibilityAssessor::new(store());
        let ids = vec!["pay_1_2025".to_string(), "wlb_1_2025".to_string()];
        let result = assessor.filter_incomparable(&ids, true);
        assert_eq!(result.filtered_file_ids, ids);
        assert!(result.incomparable_topic_messages.is_empty());
    }

    #[test]
    fn test_filter_removes_whole_incomparable_topic() {
        let assessor = CompatibilityAssessor::new(store());
        let ids = vec![
            "pay_1_2024".to_string(),
            "pay_1_2025".to_string(),
            "wlb_1_2024".to_string(),
            "wlb_1_2025".to_string(),
        ];
        let result = assessor.filter_incomparable(&ids, true);

        assert_eq!(
            result.filtered_file_ids,
            vec!["wlb_1_2024".to_string(), "wlb_1_2025".to_string()]
        );
        assert_eq!(
            result.incomparable_topic_messages["compensation"],
            "Pay questions were reworded in 2025; years are not comparable."
        );
    }

    #[test]
    fn test_refresh_replaces_singleton() {
        let store = store();
        let first = store.get().unwrap();
        let second = store.refresh().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first.metadata.version, second.metadata.version);
    }

    #[test]
    fn test_year_from_id_fallback() {
        assert_eq!(year_from_id("pay_1_2024"), Some(2024));
        assert_eq!(year_from_id("pay_1"), None);
        assert_eq!(year_from_id("nounderscore"), None);
    }
}
