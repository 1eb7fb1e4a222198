//! Survey data file repository.
//!
//! Loads per-topic JSON files from the data root, with an in-process memo of
//! fully parsed files so a cache hit skips disk I/O entirely. Files are
//! discovered by glob scan; the file stem is the file id.
//!
//! The JSON storage format has no partial reads, so segment-scoped loads
//! parse the whole file once (memoized) and hand back a copy trimmed to the
//! requested segments plus the `overall` baseline.

use anyhow::{bail, Result};
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::{debug, error};
use walkdir::WalkDir;

use crate::config::{Config, DataConfig};
use crate::error::RetrievalError;
use crate::models::DataFile;

pub struct FileRepository {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
    /// file id (stem) → absolute path, built by [`FileRepository::rescan`].
    index: RwLock<HashMap<String, PathBuf>>,
    /// Fully parsed files, keyed by id. Never stores trimmed copies.
    memo: DashMap<String, Arc<DataFile>>,
    max_batch_size: usize,
}

impl FileRepository {
    pub fn new(config: &DataConfig, max_batch_size: usize) -> Result<Self> {
        if !config.root.exists() {
            bail!("data root does not exist: {}", config.root.display());
        }

        let include = build_globset(&config.include_globs)?;
        let exclude = build_globset(&config.exclude_globs)?;

        let repo = FileRepository {
            root: config.root.clone(),
            include,
            exclude,
            index: RwLock::new(HashMap::new()),
            memo: DashMap::new(),
            max_batch_size: max_batch_size.max(1),
        };
        repo.rescan()?;
        Ok(repo)
    }

    /// Walk the data root and rebuild the id → path index. Returns the number
    /// of files found. Does not invalidate the memo; data files are immutable
    /// once published.
    pub fn rescan(&self) -> Result<usize> {
        let mut index = HashMap::new();

        for entry in WalkDir::new(&self.root) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(&self.root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().to_string();

            if self.exclude.is_match(&rel_str) || !self.include.is_match(&rel_str) {
                continue;
            }

            let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
                continue;
            };
            index.insert(stem, path.to_path_buf());
        }

        let count = index.len();
        *self.index.write().expect("index lock") = index;
        debug!(count, root = %self.root.display(), "data file index rebuilt");
        Ok(count)
    }

    /// All known file ids, sorted for deterministic output.
    pub fn known_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .index
            .read()
            .expect("index lock")
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Load one file, optionally trimmed to the given segments. Returns
    /// `None` (with a logged error) when the file is missing or invalid —
    /// a single bad file must not take down a batch.
    pub async fn get_file_by_id(
        &self,
        id: &str,
        segments: Option<&BTreeSet<String>>,
    ) -> Option<DataFile> {
        match self.load_full(id).await {
            Ok(file) => Some(trim(&file, segments)),
            Err(e) => {
                error!(id, error = %e, "failed to load data file");
                None
            }
        }
    }

    /// Load a batch of files concurrently (bounded fan-out). Results come
    /// back in input order; ids that failed to load are reported separately
    /// and do not abort the rest of the batch.
    pub async fn get_files_by_ids(
        &self,
        ids: &[String],
        segments: Option<&BTreeSet<String>>,
    ) -> (Vec<DataFile>, Vec<String>) {
        let results: Vec<(usize, Option<DataFile>)> = stream::iter(ids.iter().enumerate())
            .map(|(i, id)| async move { (i, self.get_file_by_id(id, segments).await) })
            .buffer_unordered(self.max_batch_size)
            .collect()
            .await;

        let mut ordered: Vec<Option<DataFile>> = vec![None; ids.len()];
        for (i, file) in results {
            ordered[i] = file;
        }

        let mut files = Vec::new();
        let mut failed = Vec::new();
        for (i, slot) in ordered.into_iter().enumerate() {
            match slot {
                Some(file) => files.push(file),
                None => failed.push(ids[i].clone()),
            }
        }
        (files, failed)
    }

    /// Load exactly the named segments of one file. Since the storage format
    /// cannot read partially, this parses the whole file (memoized) and trims;
    /// requesting segments that are all already loaded elsewhere is the
    /// caller's no-op to detect.
    pub async fn load_segments(
        &self,
        id: &str,
        segments: &BTreeSet<String>,
    ) -> Result<DataFile, RetrievalError> {
        let file = self.load_full(id).await?;
        Ok(trim(&file, Some(segments)))
    }

    /// Parse (or reuse) the full file for `id`.
    async fn load_full(&self, id: &str) -> Result<Arc<DataFile>, RetrievalError> {
        if let Some(hit) = self.memo.get(id) {
            return Ok(hit.value().clone());
        }

        let path = {
            let index = self.index.read().expect("index lock");
            index.get(id).cloned()
        };
        let Some(path) = path else {
            return Err(RetrievalError::FileNotFound { id: id.to_string() });
        };

        let raw = tokio::fs::read_to_string(&path).await.map_err(|e| {
            RetrievalError::InvalidDataFile {
                id: id.to_string(),
                reason: e.to_string(),
            }
        })?;

        let mut file: DataFile =
            serde_json::from_str(&raw).map_err(|e| RetrievalError::InvalidDataFile {
                id: id.to_string(),
                reason: e.to_string(),
            })?;
        file.id = id.to_string();

        let file = Arc::new(file);
        self.memo.insert(id.to_string(), file.clone());
        Ok(file)
    }
}

/// Copy `file`, trimmed to `segments` when given. `None` means the full file.
fn trim(file: &DataFile, segments: Option<&BTreeSet<String>>) -> DataFile {
    let mut copy = file.clone();
    if let Some(requested) = segments {
        copy.retain_segments(requested);
    }
    copy
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

// ============ CLI commands ============

/// List discovered data files for `svy files`.
pub fn run_files(config: &Config) -> Result<()> {
    let repo = FileRepository::new(&config.data, config.retrieval.max_batch_size)?;
    let ids = repo.known_ids();
    println!("{} data files under {}", ids.len(), config.data.root.display());
    for id in ids {
        println!("  {}", id);
    }
    Ok(())
}

/// Show one data file's metadata and baseline for `svy file <id>`.
pub async fn run_file(config: &Config, id: &str) -> Result<()> {
    let repo = FileRepository::new(&config.data, config.retrieval.max_batch_size)?;
    let Some(file) = repo.get_file_by_id(id, None).await else {
        bail!("data file not found: {}", id);
    };

    println!("--- Data File ---");
    println!("id:          {}", file.id);
    println!("topic:       {}", file.metadata.topic_id);
    println!("question_id: {}", file.metadata.question_id);
    println!("year:        {}", file.metadata.year);
    println!("comparable:  {}", file.metadata.comparable);
    println!("question:    {}", file.question);
    println!(
        "segments:    {}",
        file.available_segments()
            .into_iter()
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!();
    let base = crate::filter::base_data(std::slice::from_ref(&file));
    for stat in &base.stats {
        println!("  {} — {:.1}%", stat.response, stat.percentage);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataConfig;
    use std::fs;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, json: &str) {
        fs::write(dir.path().join(name), json).unwrap();
    }

    fn sample_json() -> &'static str {
        r#"{
            "metadata": {
                "topicId": "work_life_balance",
                "questionId": "wlb_1",
                "year": 2025,
                "comparable": true,
                "keywords": ["balance"],
                "availableMarkets": ["de", "us"],
                "segments": ["country", "job_level"]
            },
            "question": "My work-life balance is good.",
            "responses": [
                {
                    "response": "Agree",
                    "data": {
                        "overall": {"overall": 0.74},
                        "country": {"de": 0.71, "us": 0.78},
                        "job_level": {"senior": 0.92, "mid": 0.85, "junior": 0.77}
                    }
                }
            ]
        }"#
    }

    fn repo_for(dir: &TempDir) -> FileRepository {
        let config = DataConfig {
            root: dir.path().to_path_buf(),
            include_globs: vec!["**/*.json".to_string()],
            exclude_globs: vec![],
        };
        FileRepository::new(&config, 4).unwrap()
    }

    #[tokio::test]
    async fn test_load_by_stem_and_memoize() {
        let dir = TempDir::new().unwrap();
        write_file(&dir, "wlb_1_2025.json", sample_json());
        let repo = repo_for(&dir);

        let file = repo.get_file_by_id("wlb_1_2025", None).await.unwrap();
        assert_eq!(file.id, "wlb_1_2025");
        assert_eq!(file.metadata.year, 2025);

        // Second load is served from the memo even if the backing file is
        // deleted underneath us.
        fs::remove_file(dir.path().join("wlb_1_2025.json")).unwrap();
        let again = repo.get_file_by_id("wlb_1_2025", None).await.unwrap();
        assert_eq!(again.question, file.question);
    }

    #[tokio::test]
    async fn test_missing_file_is_none_not_error() {
        let dir = TempDir::new().unwrap();
        let repo = repo_for(&dir);
        assert!(repo.get_file_by_id("nope", None).await.is_none());
    }

    #[tokio::test]
    async fn test_batch_drops_failures_keeps_order() {
        let dir = TempDir::new().unwrap();
        write_file(&dir, "a.json", sample_json());
        write_file(&dir, "c.json", sample_json());
        let repo = repo_for(&dir);

        let ids = vec!["a".to_string(), "missing".to_string(), "c".to_string()];
        let (files, failed) = repo.get_files_by_ids(&ids, None).await;

        assert_eq!(files.len(), 2);
        assert_eq!(files[0].id, "a");
        assert_eq!(files[1].id, "c");
        assert_eq!(failed, vec!["missing".to_string()]);
    }

    #[tokio::test]
    async fn test_segment_scoped_load_trims() {
        let dir = TempDir::new().unwrap();
        write_file(&dir, "wlb_1_2025.json", sample_json());
        let repo = repo_for(&dir);

        let segments: BTreeSet<String> = ["job_level".to_string()].into_iter().collect();
        let file = repo.load_segments("wlb_1_2025", &segments).await.unwrap();

        let row = &file.responses[0];
        assert!(row.data.contains_key("job_level"));
        assert!(row.data.contains_key("overall"));
        assert!(!row.data.contains_key("country"));

        // The memo still holds the full file.
        let full = repo.get_file_by_id("wlb_1_2025", None).await.unwrap();
        assert!(full.responses[0].data.contains_key("country"));
    }

    #[tokio::test]
    async fn test_invalid_json_is_dropped() {
        let dir = TempDir::new().unwrap();
        write_file(&dir, "bad.json", "{not json");
        let repo = repo_for(&dir);
        assert!(repo.get_file_by_id("bad", None).await.is_none());
    }
}
