//! Operational log records
//!
//! One row per significant lifecycle event (thread started, stage completed,
//! interrupted, resumed, cancelled, reaped). These are retained independently
//! of threads and purged by the retention sweep on their own, longer,
//! schedule.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::thread::ThreadId;

/// A single operational log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationLog {
    /// Unique log id
    pub id: String,

    /// Thread this event belongs to
    pub thread_id: ThreadId,

    /// Event name, e.g. `thread.started`, `stage.completed`, `thread.reaped`
    pub event: String,

    /// Optional structured detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,

    /// Creation timestamp - the retention sweep keys off this
    pub created_at: DateTime<Utc>,
}

impl OperationLog {
    /// Create a new log entry timestamped now
    pub fn new(thread_id: impl Into<ThreadId>, event: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            thread_id: thread_id.into(),
            event: event.into(),
            detail: None,
            created_at: Utc::now(),
        }
    }

    /// Attach structured detail
    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}
