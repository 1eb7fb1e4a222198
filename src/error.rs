//! Error taxonomy of the retrieval layer.
//!
//! Errors local to one file or one segment are absorbed and logged by the
//! component that hit them; only errors that change what the caller should do
//! surface through these variants. Compatibility-mapping failures are carried
//! as structured data on the assessment result rather than thrown, so the
//! orchestrator can degrade to a no-comparison answer instead of failing the
//! request.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetrievalError {
    /// The backing store has no file with this id. Non-fatal in batch loads.
    #[error("data file not found: {id}")]
    FileNotFound { id: String },

    /// A file exists but does not parse as a survey data file.
    #[error("invalid data file {id}: {reason}")]
    InvalidDataFile { id: String, reason: String },

    /// The compatibility mapping could not be loaded or parsed.
    #[error("failed to load compatibility mapping from {path}: {reason}")]
    MappingLoad { path: String, reason: String },

    /// A thread-cache read failed. Always treated as a cache miss upstream.
    #[error("thread cache read failed: {0}")]
    CacheRead(String),

    /// The external semantic matcher is unreachable, disabled, or returned
    /// an unusable response.
    #[error("semantic matcher unavailable: {0}")]
    MatcherUnavailable(String),
}
