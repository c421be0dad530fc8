//! Error taxonomy for the pattern engine.
//!
//! Every fallible library operation returns [`Result`]. The binary wraps these
//! in `anyhow` at the command boundary.

use crate::pattern::types::PatternId;

/// Errors raised by the pattern store, index, ranker and update queue.
#[derive(Debug, thiserror::Error)]
pub enum MotifError {
    /// The id is not (or no longer) present in the pattern store.
    #[error("pattern not found: {0}")]
    NotFound(PatternId),

    /// A pattern with this id is already stored.
    #[error("duplicate pattern id: {0}")]
    DuplicateId(PatternId),

    /// Empty or malformed query rejected at the boundary.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Pattern content rejected before it reached the store.
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    /// The caller asked for a non-empty result and no candidates matched.
    #[error("no candidate patterns matched the query")]
    EmptyCandidateSet,

    /// The update queue stayed full for longer than the configured wait.
    #[error("update queue saturated after waiting {waited_ms}ms")]
    QueueSaturated { waited_ms: u64 },

    /// The update queue consumer has shut down.
    #[error("update queue is closed")]
    QueueClosed,

    /// A persisted bucket disagrees with the content table.
    #[error("index corruption in bucket {bucket}: {details}")]
    IndexCorruption { bucket: usize, details: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MotifError>;
