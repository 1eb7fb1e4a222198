use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub cache: CacheConfig,
    pub data: DataConfig,
    pub compatibility: CompatibilityConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub matcher: MatcherConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// SQLite database backing the shared thread cache.
    pub db_path: PathBuf,
    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: i64,
}

fn default_ttl_minutes() -> i64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataConfig {
    /// Root directory of the per-topic survey data files.
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.json".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompatibilityConfig {
    /// Path to the canonical topic mapping JSON document.
    pub mapping_path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Upper bound on concurrent file loads in one batch.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Hard cap on files handed to filtering for a single query.
    #[serde(default = "default_max_files_per_query")]
    pub max_files_per_query: usize,
    /// Minimum static topic-match score to skip the semantic matcher.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        RetrievalConfig {
            max_batch_size: default_max_batch_size(),
            max_files_per_query: default_max_files_per_query(),
            confidence_threshold: default_confidence_threshold(),
        }
    }
}

fn default_max_batch_size() -> usize {
    8
}
fn default_max_files_per_query() -> usize {
    12
}
fn default_confidence_threshold() -> f64 {
    0.5
}

#[derive(Debug, Deserialize, Clone)]
pub struct MatcherConfig {
    /// `disabled` or `http`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        MatcherConfig {
            provider: default_provider(),
            url: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    5
}

impl MatcherConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.cache.ttl_minutes < 1 {
        anyhow::bail!("cache.ttl_minutes must be >= 1");
    }

    if config.retrieval.max_batch_size == 0 {
        anyhow::bail!("retrieval.max_batch_size must be > 0");
    }

    if config.retrieval.max_files_per_query == 0 {
        anyhow::bail!("retrieval.max_files_per_query must be > 0");
    }

    if !(0.0..=1.0).contains(&config.retrieval.confidence_threshold) {
        anyhow::bail!("retrieval.confidence_threshold must be in [0.0, 1.0]");
    }

    match config.matcher.provider.as_str() {
        "disabled" | "http" => {}
        other => anyhow::bail!(
            "Unknown matcher provider: '{}'. Must be disabled or http.",
            other
        ),
    }

    if config.matcher.is_enabled() && config.matcher.url.is_none() {
        anyhow::bail!(
            "matcher.url must be specified when provider is '{}'",
            config.matcher.provider
        );
    }

    Ok(config)
}
