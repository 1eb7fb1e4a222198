//! Thread-scoped segment cache.
//!
//! Tracks, per conversation thread, which data files and which segments of
//! each are already loaded, so repeated questions do not re-read or re-send
//! unchanged data. Backed by the shared SQLite store so multiple server
//! processes see the same entries.
//!
//! Updates merge rather than replace: segment sets union, data merges
//! key-by-key, and every write refreshes the TTL. Reads of missing, expired,
//! or undeserializable entries are cache misses, never errors — the
//! orchestrator falls back to a full reload.
//!
//! The read-modify-write in [`SegmentCache::update`] is not atomic across
//! processes. Two concurrent updates for the same thread can interleave and
//! the later write wins at whole-entry granularity, silently dropping
//! segments the other request added. Known limitation; see DESIGN.md.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::error::RetrievalError;
use crate::models::{CachedFile, DataFile, ThreadCacheEntry};

// ============ Wire representation ============

// Persisted entries store segment sets as arrays with no uniqueness
// guarantee. These wire types are the only place the array form exists;
// rehydration dedupes into sets before any merge logic runs.

#[derive(Debug, Serialize, Deserialize)]
struct WireEntry {
    thread_id: String,
    files: Vec<WireFile>,
    expires_at: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFile {
    id: String,
    loaded_segments: Vec<String>,
    available_segments: Vec<String>,
    #[serde(default)]
    data: Option<DataFile>,
}

fn to_wire(entry: &ThreadCacheEntry) -> WireEntry {
    WireEntry {
        thread_id: entry.thread_id.clone(),
        files: entry
            .files
            .iter()
            .map(|f| WireFile {
                id: f.id.clone(),
                loaded_segments: f.loaded_segments.iter().cloned().collect(),
                available_segments: f.available_segments.iter().cloned().collect(),
                data: f.data.clone(),
            })
            .collect(),
        expires_at: entry.expires_at.timestamp(),
    }
}

fn from_wire(wire: WireEntry) -> ThreadCacheEntry {
    ThreadCacheEntry {
        thread_id: wire.thread_id,
        files: wire
            .files
            .into_iter()
            .map(|f| {
                let loaded: BTreeSet<String> = f.loaded_segments.into_iter().collect();
                let mut available: BTreeSet<String> =
                    f.available_segments.into_iter().collect();
                // loaded ⊆ available must hold even for entries written by
                // older processes
                available.extend(loaded.iter().cloned());
                CachedFile {
                    id: f.id,
                    loaded_segments: loaded,
                    available_segments: available,
                    data: f.data,
                }
            })
            .collect(),
        expires_at: DateTime::from_timestamp(wire.expires_at, 0).unwrap_or_else(Utc::now),
    }
}

// ============ Merge logic ============

/// Merge incoming file records into an existing list. Matching ids union
/// their segment sets and shallow-merge data; new ids are appended.
/// Idempotent: applying the same incoming set twice changes nothing.
pub(crate) fn merge_files(existing: &mut Vec<CachedFile>, incoming: Vec<CachedFile>) {
    for inc in incoming {
        match existing.iter_mut().find(|f| f.id == inc.id) {
            Some(current) => {
                current
                    .loaded_segments
                    .extend(inc.loaded_segments.iter().cloned());
                current
                    .available_segments
                    .extend(inc.available_segments.iter().cloned());
                current
                    .available_segments
                    .extend(current.loaded_segments.iter().cloned());
                match (&mut current.data, inc.data) {
                    (Some(data), Some(inc_data)) => data.merge_segments(&inc_data),
                    (slot @ None, Some(inc_data)) => *slot = Some(inc_data),
                    _ => {}
                }
            }
            None => {
                let mut inc = inc;
                inc.available_segments
                    .extend(inc.loaded_segments.iter().cloned());
                existing.push(inc);
            }
        }
    }
}

// ============ Cache store ============

/// Shared thread cache over the SQLite store.
pub struct SegmentCache {
    pool: SqlitePool,
    ttl: Duration,
}

impl SegmentCache {
    pub fn new(pool: SqlitePool, ttl_minutes: i64) -> Self {
        SegmentCache {
            pool,
            ttl: Duration::minutes(ttl_minutes),
        }
    }

    /// Fetch the cache entry for a thread. Returns `None` for threads with no
    /// prior write, expired entries (the row is purged), and unreadable
    /// entries — read failures never propagate past this boundary.
    pub async fn get(&self, thread_id: &str) -> Option<ThreadCacheEntry> {
        match self.read_entry(thread_id).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(thread_id, error = %e, "treating failed cache read as miss");
                None
            }
        }
    }

    async fn read_entry(
        &self,
        thread_id: &str,
    ) -> Result<Option<ThreadCacheEntry>, RetrievalError> {
        let row: Option<(String, i64)> = sqlx::query_as(
            "SELECT entry, expires_at FROM thread_cache WHERE thread_id = ?",
        )
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RetrievalError::CacheRead(e.to_string()))?;

        let Some((entry_json, expires_at)) = row else {
            return Ok(None);
        };

        if expires_at <= Utc::now().timestamp() {
            debug!(thread_id, "cache entry expired, purging");
            let _ = sqlx::query("DELETE FROM thread_cache WHERE thread_id = ?")
                .bind(thread_id)
                .execute(&self.pool)
                .await;
            return Ok(None);
        }

        let wire: WireEntry = serde_json::from_str(&entry_json)
            .map_err(|e| RetrievalError::CacheRead(e.to_string()))?;
        Ok(Some(from_wire(wire)))
    }

    /// Merge incoming file records into the thread's entry and refresh its
    /// TTL. Creates the entry on first write.
    ///
    /// Read-modify-write; not atomic across concurrent writers (see module
    /// docs).
    pub async fn update(&self, thread_id: &str, incoming: Vec<CachedFile>) -> Result<()> {
        let mut files = self
            .get(thread_id)
            .await
            .map(|entry| entry.files)
            .unwrap_or_default();

        merge_files(&mut files, incoming);

        let now = Utc::now();
        let entry = ThreadCacheEntry {
            thread_id: thread_id.to_string(),
            files,
            expires_at: now + self.ttl,
        };

        let payload = serde_json::to_string(&to_wire(&entry))?;

        sqlx::query(
            r#"
            INSERT INTO thread_cache (thread_id, entry, updated_at, expires_at) VALUES (?, ?, ?, ?)
            ON CONFLICT(thread_id) DO UPDATE SET
                entry = excluded.entry,
                updated_at = excluded.updated_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(thread_id)
        .bind(&payload)
        .bind(now.timestamp())
        .bind(entry.expires_at.timestamp())
        .execute(&self.pool)
        .await?;

        debug!(thread_id, files = entry.files.len(), "thread cache updated");
        Ok(())
    }

    /// Delete a thread's entry. Returns the number of rows removed.
    pub async fn clear(&self, thread_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM thread_cache WHERE thread_id = ?")
            .bind(thread_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// ============ CLI commands ============

/// Print a thread's cache entry for `svy cache show`.
pub async fn run_show(config: &crate::config::Config, thread_id: &str) -> Result<()> {
    let pool = crate::db::connect(config).await?;
    let cache = SegmentCache::new(pool.clone(), config.cache.ttl_minutes);

    match cache.get(thread_id).await {
        Some(entry) => {
            println!("thread: {}", entry.thread_id);
            println!("expires: {}", entry.expires_at.format("%Y-%m-%d %H:%M:%S"));
            println!("files: {}", entry.files.len());
            for file in &entry.files {
                println!(
                    "  {} loaded=[{}] available=[{}]{}",
                    file.id,
                    file.loaded_segments.iter().cloned().collect::<Vec<_>>().join(","),
                    file.available_segments.iter().cloned().collect::<Vec<_>>().join(","),
                    if file.data.is_some() { "" } else { " (no data)" }
                );
            }
        }
        None => println!("No cache entry for thread '{}'.", thread_id),
    }

    pool.close().await;
    Ok(())
}

/// Delete a thread's cache entry for `svy cache clear`.
pub async fn run_clear(config: &crate::config::Config, thread_id: &str) -> Result<()> {
    let pool = crate::db::connect(config).await?;
    let cache = SegmentCache::new(pool.clone(), config.cache.ttl_minutes);
    let removed = cache.clear(thread_id).await?;
    if removed > 0 {
        println!("cleared thread '{}'", thread_id);
    } else {
        println!("No cache entry for thread '{}'.", thread_id);
    }
    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FileMetadata, MetricValue, ResponseRow};
    use std::collections::BTreeMap;

    fn cached(id: &str, loaded: &[&str], available: &[&str]) -> CachedFile {
        CachedFile {
            id: id.to_string(),
            loaded_segments: loaded.iter().map(|s| s.to_string()).collect(),
            available_segments: available.iter().map(|s| s.to_string()).collect(),
            data: None,
        }
    }

    #[test]
    fn test_merge_unions_segments() {
        let mut existing = vec![cached("f1", &["age"], &["age", "gender"])];
        merge_files(&mut existing, vec![cached("f1", &["gender"], &["age", "gender"])]);

        assert_eq!(existing.len(), 1);
        let sets: Vec<&str> = existing[0].loaded_segments.iter().map(String::as_str).collect();
        assert_eq!(sets, vec!["age", "gender"]);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let incoming = || vec![cached("f1", &["seg1"], &["seg1", "seg2"])];
        let mut once = Vec::new();
        merge_files(&mut once, incoming());
        let mut twice = Vec::new();
        merge_files(&mut twice, incoming());
        merge_files(&mut twice, incoming());

        assert_eq!(once[0].loaded_segments, twice[0].loaded_segments);
        assert_eq!(once[0].available_segments, twice[0].available_segments);
    }

    #[test]
    fn test_merge_inserts_new_ids() {
        let mut existing = vec![cached("f1", &["age"], &["age"])];
        merge_files(&mut existing, vec![cached("f2", &["gender"], &["gender"])]);
        assert_eq!(existing.len(), 2);
        assert_eq!(existing[1].id, "f2");
    }

    #[test]
    fn test_merge_preserves_loaded_subset_invariant() {
        // An incoming record claiming a loaded segment outside its available
        // set still ends up consistent after the merge.
        let mut existing = Vec::new();
        merge_files(&mut existing, vec![cached("f1", &["age", "gender"], &["age"])]);
        assert!(existing[0]
            .loaded_segments
            .is_subset(&existing[0].available_segments));
    }

    #[test]
    fn test_merge_shallow_merges_data() {
        let mk_file = |category: &str, value: f64| {
            let mut values = BTreeMap::new();
            values.insert("x".to_string(), MetricValue(value));
            let mut data = BTreeMap::new();
            data.insert(category.to_string(), values);
            DataFile {
                id: "f1".to_string(),
                metadata: FileMetadata::default(),
                question: "Q".to_string(),
                responses: vec![ResponseRow {
                    response: "Agree".to_string(),
                    data,
                }],
            }
        };

        let mut existing = vec![CachedFile {
            data: Some(mk_file("age", 0.5)),
            ..cached("f1", &["age"], &["age", "gender"])
        }];
        merge_files(
            &mut existing,
            vec![CachedFile {
                data: Some(mk_file("gender", 0.7)),
                ..cached("f1", &["gender"], &["age", "gender"])
            }],
        );

        let data = existing[0].data.as_ref().unwrap();
        let row = &data.responses[0];
        assert!(row.data.contains_key("age"));
        assert!(row.data.contains_key("gender"));
    }

    #[test]
    fn test_wire_round_trip_dedupes() {
        let wire = WireEntry {
            thread_id: "t1".to_string(),
            files: vec![WireFile {
                id: "f1".to_string(),
                loaded_segments: vec!["age".into(), "age".into(), "gender".into()],
                available_segments: vec!["age".into()],
                data: None,
            }],
            expires_at: 4_102_444_800, // far future
        };
        let entry = from_wire(wire);
        assert_eq!(entry.files[0].loaded_segments.len(), 2);
        // available picked up the loaded segments
        assert!(entry.files[0].available_segments.contains("gender"));
    }
}
