//! File identification.
//!
//! Maps a parsed query to the data files that can answer it. Three tiers,
//! cheapest first: an exact-match cache keyed on the normalized query, the
//! static topic keyword table, and finally the external semantic matcher for
//! anything ambiguous. Whatever the tier, the result is a validated
//! [`MatchOutcome`] — the fields are always present and well-typed.

use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use crate::compat::MappingStore;
use crate::intent::normalize_query;
use crate::matcher::{MatchRequest, SemanticMatcher};
use crate::models::{MatchOutcome, QueryIntent};
use crate::topics;

/// Context the identifier needs beyond the query text itself.
pub struct IdentifyContext<'a> {
    pub intent: &'a QueryIntent,
    pub previous_query: Option<&'a str>,
    pub previous_response: Option<&'a str>,
}

pub struct FileIdentifier {
    matcher: Arc<dyn SemanticMatcher>,
    mapping: Arc<MappingStore>,
    confidence_threshold: f64,
    /// Exact-match cache of matcher results, keyed by the hashed normalized
    /// query. Process-scoped; [`FileIdentifier::clear_cache`] resets it.
    cache: RwLock<HashMap<String, MatchOutcome>>,
}

impl FileIdentifier {
    pub fn new(
        matcher: Arc<dyn SemanticMatcher>,
        mapping: Arc<MappingStore>,
        confidence_threshold: f64,
    ) -> Self {
        FileIdentifier {
            matcher,
            mapping,
            confidence_threshold,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Identify the files for a query. Never fails: when neither the static
    /// table nor the matcher produces anything, the outcome is empty with an
    /// explanation.
    pub async fn identify(&self, query: &str, ctx: &IdentifyContext<'_>) -> MatchOutcome {
        let normalized = normalize_query(query);
        let key = cache_key(&normalized);

        if let Some(hit) = self.cache.read().expect("identify cache").get(&key) {
            debug!(query = %normalized, "identify cache hit");
            return hit.clone();
        }

        let confident = topics::confident_topics(&normalized, self.confidence_threshold);
        if !confident.is_empty() {
            let file_ids = self.resolve_file_ids(&confident, &ctx.intent.years);
            return MatchOutcome {
                file_ids,
                matched_topics: confident,
                explanation: "Matched against the canonical topic keyword table.".to_string(),
            };
        }

        let request = MatchRequest {
            query: query.to_string(),
            context: json!({
                "topics": ctx.intent.topics,
                "demographics": ctx.intent.demographics,
                "years": ctx.intent.years,
            }),
            is_follow_up: ctx.intent.is_follow_up,
            previous_query: ctx.previous_query.map(str::to_string),
            previous_response: ctx.previous_response.map(str::to_string),
        };

        match self.matcher.match_query(&request).await {
            Ok(outcome) => {
                self.cache
                    .write()
                    .expect("identify cache")
                    .insert(key, outcome.clone());
                outcome
            }
            Err(e) => {
                warn!(error = %e, "semantic matcher failed, degrading to static tables");
                // Below-threshold keyword hits are still better than nothing.
                let weak = topics::matched_topics(&normalized);
                let file_ids = self.resolve_file_ids(&weak, &ctx.intent.years);
                MatchOutcome {
                    file_ids,
                    matched_topics: weak,
                    explanation: "Semantic matcher unavailable; used low-confidence keyword matches.".to_string(),
                }
            }
        }
    }

    /// Resolve topic ids to file ids through the canonical mapping,
    /// restricted to the requested years when any were named.
    fn resolve_file_ids(&self, topic_ids: &[String], years: &[u16]) -> Vec<String> {
        let mapping = match self.mapping.get() {
            Ok(mapping) => mapping,
            Err(e) => {
                warn!(error = %e, "canonical mapping unavailable for file resolution");
                return Vec::new();
            }
        };

        let mut seen = std::collections::HashSet::new();
        let mut file_ids = Vec::new();
        for topic_id in topic_ids {
            match mapping.find_topic(topic_id) {
                Some(entry) => {
                    for id in entry.file_ids(years) {
                        if seen.insert(id.clone()) {
                            file_ids.push(id);
                        }
                    }
                }
                None => debug!(topic_id, "topic has no mapping entry"),
            }
        }
        file_ids
    }

    /// Drop all cached matcher results.
    pub fn clear_cache(&self) {
        self.cache.write().expect("identify cache").clear();
    }
}

fn cache_key(normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}
