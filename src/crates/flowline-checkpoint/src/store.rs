//! Extensible storage trait for threads, checkpoints, and operation logs
//!
//! [`WorkflowStore`] is the persistence seam of the workflow engine. The
//! engine, lifecycle manager, and reaper all talk to durable state through
//! this trait, so a deployment can back it with PostgreSQL, SQLite, or any
//! other transactional store while tests use the bundled
//! [`InMemoryStore`](crate::memory::InMemoryStore).
//!
//! # Contract highlights
//!
//! - [`append_checkpoint`](WorkflowStore::append_checkpoint) is atomic: the
//!   new checkpoint row and the thread's latest-checkpoint pointer commit
//!   together, and the append fails with [`StoreError::Conflict`] when the
//!   caller's parent id does not match the thread's current latest. This is
//!   the optimistic-concurrency check that keeps a thread's history linear
//!   when two processes race to resume it.
//! - Every successful append and every status update advances the thread's
//!   `updated_at`; the reaper relies on this as its only staleness signal.
//! - [`checkpoint_history`](WorkflowStore::checkpoint_history) is a
//!   point-in-time query returning the full chain newest first, not a
//!   restartable stream.
//! - [`delete_threads`](WorkflowStore::delete_threads) cascades: a thread
//!   and its checkpoints are removed together.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::checkpoint::{Checkpoint, CheckpointId, CheckpointMetadata, WorkflowState};
use crate::error::Result;
use crate::log::OperationLog;
use crate::thread::{Thread, ThreadId, ThreadStatus};

/// Filter for thread listing queries
///
/// All criteria are conjunctive; an empty filter matches every thread.
#[derive(Debug, Clone, Default)]
pub struct ThreadFilter {
    /// Match any of these statuses (empty = any status)
    pub statuses: Vec<ThreadStatus>,

    /// Restrict to one owning user
    pub user_id: Option<String>,

    /// Only threads whose `updated_at` is strictly older than this
    pub updated_before: Option<DateTime<Utc>>,
}

impl ThreadFilter {
    /// Create an empty filter matching all threads
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to the given statuses
    pub fn with_statuses(mut self, statuses: Vec<ThreadStatus>) -> Self {
        self.statuses = statuses;
        self
    }

    /// Restrict to one owning user
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Restrict to threads last touched before the given instant
    pub fn with_updated_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.updated_before = Some(cutoff);
        self
    }

    /// Whether the given thread matches this filter
    pub fn matches(&self, thread: &Thread) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&thread.status) {
            return false;
        }
        if let Some(user_id) = &self.user_id {
            if &thread.user_id != user_id {
                return false;
            }
        }
        if let Some(cutoff) = self.updated_before {
            if thread.updated_at >= cutoff {
                return false;
            }
        }
        true
    }
}

/// Storage backend for threads, checkpoints, and operation logs
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Persist a new thread row
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`](crate::StoreError::Invalid) if a
    /// thread with the same id already exists.
    async fn create_thread(&self, thread: Thread) -> Result<()>;

    /// Fetch one thread by id
    async fn get_thread(&self, thread_id: &str) -> Result<Thread>;

    /// Update a thread's status and/or merge entries into its metadata
    ///
    /// Advances `updated_at` and returns the updated row. Metadata entries
    /// overwrite matching keys and leave others in place.
    async fn update_thread(
        &self,
        thread_id: &str,
        status: Option<ThreadStatus>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<Thread>;

    /// List threads matching the filter, oldest `updated_at` first
    async fn list_threads(&self, filter: &ThreadFilter) -> Result<Vec<Thread>>;

    /// Delete threads and their checkpoints, cascading
    ///
    /// Unknown ids are skipped. Returns the number of threads removed.
    async fn delete_threads(&self, thread_ids: &[ThreadId]) -> Result<usize>;

    /// Append a checkpoint to a thread's chain
    ///
    /// Atomically writes the checkpoint, advances the thread's
    /// latest-checkpoint pointer, and bumps `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`](crate::StoreError::Conflict) when
    /// `parent_id` does not match the thread's current latest checkpoint.
    async fn append_checkpoint(
        &self,
        thread_id: &str,
        parent_id: Option<CheckpointId>,
        state: WorkflowState,
        metadata: CheckpointMetadata,
    ) -> Result<Checkpoint>;

    /// Fetch the latest checkpoint of a thread, if any
    async fn latest_checkpoint(&self, thread_id: &str) -> Result<Option<Checkpoint>>;

    /// Fetch the full checkpoint chain of a thread, newest first
    async fn checkpoint_history(&self, thread_id: &str) -> Result<Vec<Checkpoint>>;

    /// Append an operational log entry
    async fn append_log(&self, log: OperationLog) -> Result<()>;

    /// Delete log entries older than the cutoff, returning the count removed
    async fn purge_logs(&self, older_than: DateTime<Utc>) -> Result<usize>;
}
