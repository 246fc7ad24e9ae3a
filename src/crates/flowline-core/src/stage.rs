//! Stage functions - the processing units of a pipeline
//!
//! A stage receives the full workflow state and returns only the fields it
//! changes (a sparse [`PartialState`]), or a [`StageError`] on failure.
//! Stages must not mutate anything outside their return value and must be
//! safe to re-invoke: a crash between a stage computing its result and the
//! checkpoint committing means the engine replays the same stage against
//! the same pre-stage state, so external side effects need idempotency on
//! the collaborator's side.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use flowline_checkpoint::WorkflowState;

/// Sparse state update produced by a stage - only the fields it changed
pub type PartialState = WorkflowState;

/// Failure of one stage invocation
///
/// Recorded into the state's `errors` channel (Accumulate, so never
/// dropped) and reported to callers through the thread's `failed` status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageError {
    /// Name of the failing stage
    pub stage: String,
    /// Human-readable failure message
    pub message: String,
    /// When the failure occurred
    pub timestamp: DateTime<Utc>,
}

impl StageError {
    /// Create a stage error timestamped now
    pub fn new(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Serialize for storage in the `errors` channel
    pub fn to_value(&self) -> serde_json::Value {
        // StageError's fields serialize infallibly.
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!(self.message))
    }
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stage '{}' failed: {}", self.stage, self.message)
    }
}

/// Async stage executor: full state in, sparse update out
pub type StageExecutor = Arc<
    dyn Fn(WorkflowState) -> Pin<Box<dyn Future<Output = std::result::Result<PartialState, StageError>> + Send>>
        + Send
        + Sync,
>;

/// One declared stage of a pipeline graph
#[derive(Clone)]
pub struct StageSpec {
    /// Unique stage name within its graph
    pub name: String,

    /// The stage function
    pub executor: StageExecutor,

    /// Channels this stage may write; validated against the registry at
    /// graph-build time so unknown fields are rejected before any run
    pub writes: Vec<String>,

    /// When true, a failure is recorded but the stage is retried once
    /// before the thread is failed
    pub retryable: bool,
}

impl StageSpec {
    /// Create a stage from a name and an executor closure
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(WorkflowState) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<PartialState, StageError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            executor: Arc::new(move |state| Box::pin(f(state))),
            writes: Vec::new(),
            retryable: false,
        }
    }

    /// Declare the channels this stage writes
    pub fn with_writes(mut self, writes: Vec<&str>) -> Self {
        self.writes = writes.into_iter().map(String::from).collect();
        self
    }

    /// Mark this stage as retryable on failure
    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }
}

impl std::fmt::Debug for StageSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageSpec")
            .field("name", &self.name)
            .field("executor", &"<function>")
            .field("writes", &self.writes)
            .field("retryable", &self.retryable)
            .finish()
    }
}
