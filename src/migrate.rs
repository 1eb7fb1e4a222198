use anyhow::Result;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    // Thread cache: one row per conversation thread, serialized entry payload
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS thread_cache (
            thread_id TEXT PRIMARY KEY,
            entry TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_thread_cache_expires_at ON thread_cache(expires_at)",
    )
    .execute(&pool)
    .await?;

    pool.close().await;
    Ok(())
}
