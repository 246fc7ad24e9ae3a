//! Checkpoint data structures - immutable snapshots of workflow state
//!
//! A [`Checkpoint`] captures the full [`WorkflowState`] of a thread at one
//! point in its execution. Checkpoints for a thread form a single linear
//! chain through `parent_id`: the store only accepts an append whose parent
//! matches the thread's current latest checkpoint, so the chain never forks
//! even when two processes race to advance the same thread.
//!
//! Metadata records which stage produced the snapshot and whether the engine
//! halted at an interrupt point, which is what resume uses to find the
//! outgoing edge to continue from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::thread::ThreadId;

/// Checkpoint ID type
pub type CheckpointId = String;

/// Workflow state - a mapping from channel name to value
///
/// Values are plain JSON; the merge semantics for each field live in the
/// engine's channel registry, not here.
pub type WorkflowState = HashMap<String, serde_json::Value>;

/// Metadata associated with a checkpoint
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CheckpointMetadata {
    /// Name of the stage that produced this snapshot, when applicable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,

    /// True when execution halted at an interrupt point after this snapshot
    #[serde(default)]
    pub interrupt: bool,

    /// Additional custom metadata
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl CheckpointMetadata {
    /// Create empty metadata
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the producing stage
    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    /// Mark this checkpoint as an interrupt point
    pub fn with_interrupt(mut self) -> Self {
        self.interrupt = true;
        self
    }

    /// Add custom metadata
    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Immutable state snapshot for one thread
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Unique checkpoint id (UUID v4, string form)
    pub id: CheckpointId,

    /// Owning thread
    pub thread_id: ThreadId,

    /// Parent checkpoint in the thread's chain; `None` only for the first
    /// checkpoint of a thread
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<CheckpointId>,

    /// Full serialized workflow state at this point
    pub state: WorkflowState,

    /// Producing stage, interrupt flag, and custom annotations
    pub metadata: CheckpointMetadata,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Create a new checkpoint with a fresh id
    pub fn new(
        thread_id: impl Into<ThreadId>,
        parent_id: Option<CheckpointId>,
        state: WorkflowState,
        metadata: CheckpointMetadata,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            thread_id: thread_id.into(),
            parent_id,
            state,
            metadata,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_checkpoint_creation() {
        let mut state = WorkflowState::new();
        state.insert("subject".to_string(), json!("summer launch"));

        let checkpoint = Checkpoint::new(
            "thread-1",
            None,
            state,
            CheckpointMetadata::new().with_stage("draft_wireframes"),
        );

        assert_eq!(checkpoint.thread_id, "thread-1");
        assert!(checkpoint.parent_id.is_none());
        assert_eq!(checkpoint.metadata.stage.as_deref(), Some("draft_wireframes"));
        assert!(!checkpoint.metadata.interrupt);
    }

    #[test]
    fn test_metadata_builder() {
        let metadata = CheckpointMetadata::new()
            .with_stage("approval_gate")
            .with_interrupt()
            .with_extra("round", json!(2));

        assert!(metadata.interrupt);
        assert_eq!(metadata.extra.get("round"), Some(&json!(2)));
    }

    #[test]
    fn test_metadata_roundtrip() {
        let metadata = CheckpointMetadata::new()
            .with_stage("finalize")
            .with_extra("final", json!(true));

        let encoded = serde_json::to_string(&metadata).unwrap();
        let decoded: CheckpointMetadata = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.stage.as_deref(), Some("finalize"));
        assert_eq!(decoded.extra.get("final"), Some(&json!(true)));
    }
}
