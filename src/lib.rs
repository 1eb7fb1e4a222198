//! # Survey Harness
//!
//! A segment-aware retrieval layer for survey analytics assistants.
//!
//! Survey Harness answers the retrieval half of a survey chat assistant:
//! given a free-text question and a conversation thread, it decides which
//! per-topic data files and which demographic slices ("segments") are
//! relevant, loads only what the thread has not seen yet, filters the data
//! down to the requested segments, and vetoes cross-year comparisons the
//! survey methodology cannot support. The chat UI and the text-generation
//! call sit outside this crate; the pipeline hands them a deterministic
//! statistics block.
//!
//! ## Architecture
//!
//! ```text
//! query + thread
//!       │
//!       ▼
//! ┌───────────┐   ┌────────────┐   ┌───────────────┐
//! │  Intent    │──▶│ Identifier │──▶│  SegmentCache  │
//! │  Parser    │   │ (+matcher) │   │ (SQLite, TTL) │
//! └───────────┘   └────────────┘   └──────┬────────┘
//!                                         │ missing segments only
//!                                         ▼
//!                  ┌────────────┐   ┌───────────────┐
//!                  │  Compat    │◀──│  Repository    │
//!                  │  Assessor  │   │ (JSON files)  │
//!                  └─────┬──────┘   └──────┬────────┘
//!                        ▼                 ▼
//!                     ┌───────────────────────┐
//!                     │   Filter + Assemble    │
//!                     └───────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! svy init                                  # create the cache database
//! svy files                                 # list discovered data files
//! svy mapping check                         # validate the topic mapping
//! svy ask "work life balance by job level"  # run the full pipeline
//! svy cache show thread-1                   # inspect a thread's cache
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`intent`] | Query intent parsing |
//! | [`identify`] | Query → file id resolution |
//! | [`matcher`] | External semantic matcher client |
//! | [`repository`] | Data file loading and memoization |
//! | [`cache`] | Thread-scoped segment cache |
//! | [`filter`] | Segment filtering |
//! | [`compat`] | Cross-year compatibility assessment |
//! | [`processor`] | Request orchestration |
//! | [`assemble`] | Deterministic result block |
//! | [`db`] | Cache database connection |
//! | [`migrate`] | Schema migrations |

pub mod assemble;
pub mod cache;
pub mod compat;
pub mod config;
pub mod db;
pub mod error;
pub mod filter;
pub mod identify;
pub mod intent;
pub mod matcher;
pub mod migrate;
pub mod models;
pub mod processor;
pub mod repository;
pub mod segments;
pub mod stats;
pub mod topics;
