//! Cache and dataset overview.
//!
//! Provides a quick summary of the retrieval layer's state: how many data
//! files are discoverable, how many thread-cache entries exist and how many
//! of those have already expired. Used by `svy stats` to give confidence that
//! the data directory and cache store are wired up correctly.

use anyhow::Result;
use chrono::Utc;

use crate::config::Config;
use crate::db;
use crate::repository::FileRepository;

/// Run the stats command: inspect the data directory and cache DB and print
/// a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let repo = FileRepository::new(&config.data, config.retrieval.max_batch_size)?;
    let file_count = repo.known_ids().len();

    let pool = db::connect(config).await?;

    let total_threads: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM thread_cache")
        .fetch_one(&pool)
        .await?;

    let expired_threads: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM thread_cache WHERE expires_at <= ?")
            .bind(Utc::now().timestamp())
            .fetch_one(&pool)
            .await?;

    let db_size = std::fs::metadata(&config.cache.db_path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Survey Harness — Stats");
    println!("======================");
    println!();
    println!("  Data root:     {}", config.data.root.display());
    println!("  Data files:    {}", file_count);
    println!();
    println!("  Cache DB:      {}", config.cache.db_path.display());
    println!("  Size:          {}", format_bytes(db_size));
    println!("  Threads:       {}", total_threads);
    println!("  Expired:       {}", expired_threads);
    println!(
        "  TTL:           {} minutes",
        config.cache.ttl_minutes
    );

    pool.close().await;
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
