//! Error taxonomy for the workflow engine
//!
//! Four caller-visible categories, each with its own propagation policy:
//!
//! - `Configuration` - the graph or registry is malformed (raised at build
//!   time and fatal to process startup), or a caller presented a different
//!   pipeline's graph than the thread was started with (rejected at resume
//!   before any state is touched).
//! - `InvalidState` - a caller tried to resume or cancel a thread whose
//!   status does not allow it. Surfaced directly to the caller.
//! - `Conflict` - a checkpoint append lost the optimistic-concurrency race.
//!   Surfaced directly so the caller can re-fetch and retry.
//! - `Cancelled` - the thread was cancelled while a stage was in flight;
//!   the stage result was discarded.
//!
//! Stage failures are deliberately NOT an error variant at this level:
//! they are recorded into the state's `errors` channel and reported through
//! the thread's `failed` status instead.

use flowline_checkpoint::{StoreError, ThreadStatus};
use thiserror::Error;

/// Result type for workflow operations
pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Errors surfaced by graph construction and the execution engine
#[derive(Error, Debug)]
pub enum WorkflowError {
    /// Graph or channel registry is malformed, or the graph presented at
    /// resume is not the thread's pipeline
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Caller attempted an operation the thread's status does not allow
    #[error("Invalid state for thread {thread_id}: expected {expected}, found {actual}")]
    InvalidState {
        thread_id: String,
        expected: String,
        actual: ThreadStatus,
    },

    /// Checkpoint append lost the optimistic-concurrency race
    #[error("Concurrency conflict: {0}")]
    Conflict(String),

    /// Thread or checkpoint not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Thread was cancelled while a stage was in flight
    #[error("Thread {0} was cancelled")]
    Cancelled(String),

    /// Underlying store failure
    #[error("Store error: {0}")]
    Store(StoreError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StoreError> for WorkflowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { .. } => WorkflowError::Conflict(err.to_string()),
            StoreError::NotFound(what) => WorkflowError::NotFound(what),
            other => WorkflowError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_conflict_maps_to_conflict() {
        let err = StoreError::Conflict {
            thread_id: "t-1".to_string(),
            expected: None,
            actual: Some("c-1".to_string()),
        };
        assert!(matches!(
            WorkflowError::from(err),
            WorkflowError::Conflict(_)
        ));
    }

    #[test]
    fn test_store_not_found_maps_to_not_found() {
        let err = StoreError::NotFound("thread t-1".to_string());
        assert!(matches!(
            WorkflowError::from(err),
            WorkflowError::NotFound(_)
        ));
    }
}
