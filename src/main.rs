//! # Survey Harness CLI (`svy`)
//!
//! The `svy` binary is the operational interface for Survey Harness. It
//! provides commands for cache database initialization, running queries
//! through the retrieval pipeline, inspecting data files and thread caches,
//! and validating the canonical topic mapping.
//!
//! ## Usage
//!
//! ```bash
//! svy --config ./config/svy.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `svy init` | Create the SQLite cache database and run schema migrations |
//! | `svy ask "<query>"` | Run a query through the full retrieval pipeline |
//! | `svy intent "<query>"` | Print the parsed intent of a query |
//! | `svy files` | List discovered survey data files |
//! | `svy file <id>` | Show one data file's metadata and baseline figures |
//! | `svy cache show <thread>` | Inspect a thread's cache entry |
//! | `svy cache clear <thread>` | Delete a thread's cache entry |
//! | `svy mapping check` | Load and summarize the topic mapping |
//! | `svy stats` | Data directory and cache store overview |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use survey_harness::{cache, compat, config, intent, migrate, processor, repository, stats};

/// Survey Harness CLI — a segment-aware retrieval layer for survey analytics
/// assistants.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/svy.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "svy",
    about = "Survey Harness — a segment-aware retrieval layer for survey analytics assistants",
    version,
    long_about = "Survey Harness resolves free-text analytic questions to survey data files and \
    demographic segments, caches per-thread what has already been loaded, filters statistics down \
    to the requested segments, and flags cross-year comparisons the methodology cannot support."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/svy.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the cache database schema.
    ///
    /// Creates the SQLite database file and the thread_cache table. This
    /// command is idempotent — running it multiple times is safe.
    Init,

    /// Run a query through the full retrieval pipeline.
    Ask {
        /// The analytic question to answer.
        query: String,
        /// Conversation thread id for segment caching.
        #[arg(long, default_value = "cli")]
        thread: String,
    },

    /// Parse a query and print the extracted intent.
    Intent {
        /// The query to parse.
        query: String,
    },

    /// List discovered survey data files.
    Files,

    /// Show one data file's metadata and baseline figures.
    File {
        /// File id (the file stem, e.g. wlb_1_2025).
        id: String,
    },

    /// Inspect or clear thread cache entries.
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },

    /// Canonical topic mapping operations.
    Mapping {
        #[command(subcommand)]
        command: MappingCommands,
    },

    /// Data directory and cache store overview.
    Stats,
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Show a thread's cache entry.
    Show { thread: String },
    /// Delete a thread's cache entry.
    Clear { thread: String },
}

#[derive(Subcommand)]
enum MappingCommands {
    /// Load the mapping, validate it, and print a summary.
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&config).await?;
            println!("initialized {}", config.cache.db_path.display());
        }
        Commands::Ask { query, thread } => {
            processor::run_ask(&config, &thread, &query).await?;
        }
        Commands::Intent { query } => {
            let parsed = intent::parse(&query, &[]);
            println!("{}", serde_json::to_string_pretty(&parsed)?);
        }
        Commands::Files => {
            repository::run_files(&config)?;
        }
        Commands::File { id } => {
            repository::run_file(&config, &id).await?;
        }
        Commands::Cache { command } => match command {
            CacheCommands::Show { thread } => cache::run_show(&config, &thread).await?,
            CacheCommands::Clear { thread } => cache::run_clear(&config, &thread).await?,
        },
        Commands::Mapping { command } => match command {
            MappingCommands::Check => compat::run_mapping_check(&config)?,
        },
        Commands::Stats => {
            stats::run_stats(&config).await?;
        }
    }

    Ok(())
}
