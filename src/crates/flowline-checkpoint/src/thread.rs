//! Thread records - one durable, resumable execution context per pipeline run
//!
//! A [`Thread`] is the unit of ownership in the store: it carries the status
//! of one pipeline execution, a pointer to its latest checkpoint, and a
//! free-form metadata map for operational annotations (cancellation reason,
//! timeout flag, and similar).
//!
//! The `updated_at` timestamp advances on every status transition and on
//! every checkpoint append. The reaper uses it as its sole staleness signal,
//! so store implementations must bump it on both paths.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::checkpoint::CheckpointId;

/// Thread ID type
pub type ThreadId = String;

/// Lifecycle status of a thread
///
/// `Active` and `Paused` are in-flight; the remaining three are terminal.
/// Terminal threads are never resumed and become eligible for retention
/// deletion once they age past the configured threshold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ThreadStatus {
    /// The engine is running (or crashed mid-step; the reaper recovers these)
    Active,
    /// Execution halted at an interrupt point, waiting for external input
    Paused,
    /// Execution reached the terminal marker
    Completed,
    /// A stage failed, or the reaper timed the thread out
    Failed,
    /// A caller cancelled the thread
    Cancelled,
}

impl ThreadStatus {
    /// True for statuses from which execution can never continue
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ThreadStatus::Completed | ThreadStatus::Failed | ThreadStatus::Cancelled
        )
    }
}

impl std::fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ThreadStatus::Active => "active",
            ThreadStatus::Paused => "paused",
            ThreadStatus::Completed => "completed",
            ThreadStatus::Failed => "failed",
            ThreadStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One durable execution context for a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    /// Unique thread id (UUID v4, string form)
    pub id: ThreadId,

    /// Owning user
    pub user_id: String,

    /// Optional parent session this run belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,

    /// Name of the pipeline graph this thread executes
    pub pipeline: String,

    /// Current lifecycle status
    pub status: ThreadStatus,

    /// Pointer to the latest checkpoint in this thread's chain
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_checkpoint: Option<CheckpointId>,

    /// Free-form operational metadata (cancellation actor/reason, timeout flag)
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last modification timestamp - advanced on every status transition
    /// and every checkpoint append
    pub updated_at: DateTime<Utc>,
}

impl Thread {
    /// Create a new thread in `Active` status with a fresh id
    pub fn new(user_id: impl Into<String>, pipeline: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            parent_session_id: None,
            pipeline: pipeline.into(),
            status: ThreadStatus::Active,
            latest_checkpoint: None,
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach a parent session id
    pub fn with_parent_session(mut self, session_id: impl Into<String>) -> Self {
        self.parent_session_id = Some(session_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_thread_is_active() {
        let thread = Thread::new("user-1", "wireframe");
        assert_eq!(thread.status, ThreadStatus::Active);
        assert!(thread.latest_checkpoint.is_none());
        assert_eq!(thread.created_at, thread.updated_at);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!ThreadStatus::Active.is_terminal());
        assert!(!ThreadStatus::Paused.is_terminal());
        assert!(ThreadStatus::Completed.is_terminal());
        assert!(ThreadStatus::Failed.is_terminal());
        assert!(ThreadStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&ThreadStatus::Paused).unwrap();
        assert_eq!(json, "\"paused\"");
    }
}
