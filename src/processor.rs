//! Query orchestration.
//!
//! Composes the pipeline per request:
//! parse intent → identify files → reconcile against the thread cache →
//! load only what is missing → filter → assess compatibility → assemble.
//!
//! Terminal states: `Success`, `EarlyReturn` (empty query, short-circuits
//! after parsing), `PartialFailure` (some files failed to load; the request
//! proceeds on the subset that did). Failed loads are dropped, not retried —
//! retry policy belongs to the storage transport, and a caller-supplied
//! timeout around the whole call is the only cancellation mechanism.

use anyhow::Result;
use sqlx::SqlitePool;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::assemble;
use crate::cache::SegmentCache;
use crate::compat::{CompatibilityAssessor, MappingStore};
use crate::config::Config;
use crate::filter;
use crate::identify::{FileIdentifier, IdentifyContext};
use crate::intent;
use crate::matcher::SemanticMatcher;
use crate::models::{
    CachedFile, CompatibilityMetadata, DataFile, HistoryTurn, QueryIntent, Specificity, StatRecord,
};
use crate::repository::FileRepository;

/// One query against one conversation thread.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub thread_id: String,
    pub query: String,
    pub history: Vec<HistoryTurn>,
}

/// Fully assembled answer material for the text-generation collaborator.
#[derive(Debug, Clone)]
pub struct QueryResponse {
    pub intent: QueryIntent,
    pub matched_topics: Vec<String>,
    pub file_ids: Vec<String>,
    /// Ids that failed to load; non-empty means the outcome was a partial
    /// failure.
    pub failed_file_ids: Vec<String>,
    pub stats: Vec<StatRecord>,
    pub found_segments: Vec<String>,
    pub missing_segments: Vec<String>,
    pub compatibility: CompatibilityMetadata,
    pub caveats: Vec<String>,
    /// Deterministic text block handed downstream.
    pub rendered: String,
}

/// Terminal state of one orchestrated request.
#[derive(Debug)]
pub enum QueryOutcome {
    /// Empty or invalid query; nothing was loaded.
    EarlyReturn { reason: String },
    Success(Box<QueryResponse>),
    PartialFailure(Box<QueryResponse>),
}

impl QueryOutcome {
    pub fn response(&self) -> Option<&QueryResponse> {
        match self {
            QueryOutcome::Success(r) | QueryOutcome::PartialFailure(r) => Some(r),
            QueryOutcome::EarlyReturn { .. } => None,
        }
    }
}

pub struct QueryProcessor {
    config: Arc<Config>,
    repository: FileRepository,
    cache: SegmentCache,
    identifier: FileIdentifier,
    assessor: CompatibilityAssessor,
    mapping: Arc<MappingStore>,
}

impl QueryProcessor {
    pub fn new(
        config: Arc<Config>,
        pool: SqlitePool,
        matcher: Arc<dyn SemanticMatcher>,
    ) -> Result<Self> {
        let repository = FileRepository::new(&config.data, config.retrieval.max_batch_size)?;
        let cache = SegmentCache::new(pool, config.cache.ttl_minutes);
        let mapping = Arc::new(MappingStore::new(config.compatibility.mapping_path.clone()));
        let identifier = FileIdentifier::new(
            matcher,
            mapping.clone(),
            config.retrieval.confidence_threshold,
        );
        let assessor = CompatibilityAssessor::new(mapping.clone());

        Ok(QueryProcessor {
            config,
            repository,
            cache,
            identifier,
            assessor,
            mapping,
        })
    }

    /// The canonical mapping store, for manual refresh.
    pub fn mapping(&self) -> &Arc<MappingStore> {
        &self.mapping
    }

    /// Run one request through the pipeline.
    pub async fn process(&self, request: &QueryRequest) -> QueryOutcome {
        if request.query.trim().is_empty() {
            debug!(stage = "ParseIntent", "empty query, early return");
            return QueryOutcome::EarlyReturn {
                reason: "empty query".to_string(),
            };
        }

        debug!(stage = "ParseIntent", query = %request.query);
        let intent = intent::parse(&request.query, &request.history);
        let is_comparison = intent::is_comparison_query(&request.query, &intent);

        debug!(stage = "IdentifyFiles", topics = ?intent.topics);
        let last_turn = request.history.last();
        let ctx = IdentifyContext {
            intent: &intent,
            previous_query: last_turn.map(|t| t.query.as_str()),
            previous_response: last_turn.map(|t| t.response.as_str()),
        };
        let outcome = self.identifier.identify(&request.query, &ctx).await;

        let mut file_ids = outcome.file_ids.clone();
        let max_files = self.config.retrieval.max_files_per_query;
        if file_ids.len() > max_files {
            warn!(
                dropped = file_ids.len() - max_files,
                "file set exceeds per-query cap, truncating"
            );
            file_ids.truncate(max_files);
        }

        let incomparable = self.assessor.filter_incomparable(&file_ids, is_comparison);
        let file_ids = incomparable.filtered_file_ids.clone();

        let requested: BTreeSet<String> = intent.demographics.iter().cloned().collect();
        let general = intent.specificity == Specificity::General && requested.is_empty();

        debug!(stage = "ReconcileCache", thread_id = %request.thread_id);
        let cached_entry = self.cache.get(&request.thread_id).await;

        let mut satisfied: Vec<DataFile> = Vec::new();
        let mut to_load: Vec<String> = Vec::new();
        for id in &file_ids {
            let cached = cached_entry
                .as_ref()
                .and_then(|entry| entry.file(id))
                .and_then(|file| file.data.as_ref().map(|data| (data, &file.loaded_segments)));
            match cached {
                Some((data, loaded)) => {
                    let mut needed = requested.difference(loaded);
                    if needed.next().is_none() {
                        satisfied.push(data.clone());
                    } else {
                        to_load.push(id.clone());
                    }
                }
                None => to_load.push(id.clone()),
            }
        }

        debug!(
            stage = "LoadMissing",
            cached = satisfied.len(),
            loading = to_load.len()
        );
        let load_scope = if general { BTreeSet::new() } else { requested.clone() };
        let (loaded, failed) = self
            .repository
            .get_files_by_ids(&to_load, Some(&load_scope))
            .await;

        if !failed.is_empty() {
            warn!(failed = ?failed, "some data files failed to load, proceeding without them");
        }

        // Merge fresh segments over whatever the cache already held for the
        // same files, then write the union back.
        let mut combined = satisfied;
        let mut cache_updates: Vec<CachedFile> = Vec::new();
        for fresh in loaded {
            let merged = match cached_entry
                .as_ref()
                .and_then(|entry| entry.file(&fresh.id))
                .and_then(|file| file.data.clone())
            {
                Some(mut prior) => {
                    prior.merge_segments(&fresh);
                    prior
                }
                None => fresh.clone(),
            };
            cache_updates.push(CachedFile::from_loaded(merged.clone()));
            combined.push(merged);
        }

        if !cache_updates.is_empty() {
            if let Err(e) = self.cache.update(&request.thread_id, cache_updates).await {
                warn!(error = %e, "thread cache update failed, continuing");
            }
        }

        debug!(stage = "Filter", files = combined.len(), general);
        let requested_vec: Vec<String> = requested.iter().cloned().collect();
        let filtered = if general {
            filter::base_data(&combined)
        } else {
            filter::filter_by_segments(&combined, &requested_vec)
        };

        debug!(stage = "AssessCompatibility", topics = ?outcome.matched_topics);
        let compatibility = self
            .assessor
            .assess(&outcome.matched_topics, &requested_vec);

        let extra_caveats: Vec<String> = incomparable
            .incomparable_topic_messages
            .iter()
            .map(|(topic, message)| format!("{}: {}", topic, message))
            .collect();

        debug!(stage = "Assemble");
        let rendered = assemble::assemble_block(
            &filtered.stats,
            &compatibility,
            &filtered.missing_segments,
            &extra_caveats,
        );

        let response = Box::new(QueryResponse {
            intent,
            matched_topics: outcome.matched_topics,
            file_ids,
            failed_file_ids: failed.clone(),
            stats: filtered.stats,
            found_segments: filtered.found_segments,
            missing_segments: filtered.missing_segments,
            compatibility,
            caveats: extra_caveats,
            rendered,
        });

        if failed.is_empty() {
            QueryOutcome::Success(response)
        } else {
            QueryOutcome::PartialFailure(response)
        }
    }
}

// ============ CLI command ============

/// Run one query end to end and print the assembled block, for `svy ask`.
pub async fn run_ask(config: &Config, thread_id: &str, query: &str) -> Result<()> {
    let pool = crate::db::connect(config).await?;
    let matcher = crate::matcher::create_matcher(&config.matcher)?;
    let processor = QueryProcessor::new(Arc::new(config.clone()), pool.clone(), matcher)?;

    let request = QueryRequest {
        thread_id: thread_id.to_string(),
        query: query.to_string(),
        history: Vec::new(),
    };

    match processor.process(&request).await {
        QueryOutcome::EarlyReturn { reason } => {
            println!("Nothing to do: {}.", reason);
        }
        QueryOutcome::Success(response) => {
            print_response(&response, false);
        }
        QueryOutcome::PartialFailure(response) => {
            print_response(&response, true);
        }
    }

    pool.close().await;
    Ok(())
}

fn print_response(response: &QueryResponse, partial: bool) {
    println!("matched topics: {}", response.matched_topics.join(", "));
    println!("files: {}", response.file_ids.join(", "));
    if partial {
        println!("failed loads: {}", response.failed_file_ids.join(", "));
    }
    println!();
    print!("{}", response.rendered);
}
