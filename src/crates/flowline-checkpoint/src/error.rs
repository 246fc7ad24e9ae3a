//! Error types for store operations

use thiserror::Error;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur while reading or writing threads and checkpoints
#[derive(Error, Debug)]
pub enum StoreError {
    /// Thread or checkpoint not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Optimistic-concurrency check failed on append
    ///
    /// The caller's parent checkpoint id no longer matches the thread's
    /// latest checkpoint. Another writer advanced the chain first; the
    /// caller should re-fetch the latest checkpoint and retry.
    #[error("Concurrency conflict on thread {thread_id}: expected parent {expected:?}, found {actual:?}")]
    Conflict {
        thread_id: String,
        expected: Option<String>,
        actual: Option<String>,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid argument or record
    #[error("Invalid: {0}")]
    Invalid(String),
}
