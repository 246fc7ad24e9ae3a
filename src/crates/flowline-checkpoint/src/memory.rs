//! In-memory store for development and testing
//!
//! [`InMemoryStore`] is the reference implementation of [`WorkflowStore`].
//! All records live in a single `RwLock`-guarded map, and the whole append
//! path runs under one write-lock acquisition, which gives the same
//! atomicity the trait expects from a transactional database: the checkpoint
//! row, the latest-checkpoint pointer, and the `updated_at` bump commit
//! together or not at all.
//!
//! Data is lost on restart; production deployments implement the trait over
//! a real database instead.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::checkpoint::{Checkpoint, CheckpointId, CheckpointMetadata, WorkflowState};
use crate::error::{Result, StoreError};
use crate::log::OperationLog;
use crate::store::{ThreadFilter, WorkflowStore};
use crate::thread::{Thread, ThreadId, ThreadStatus};

#[derive(Default)]
struct Inner {
    threads: HashMap<ThreadId, Thread>,
    /// Checkpoint chains per thread, oldest first (append order)
    checkpoints: HashMap<ThreadId, Vec<Checkpoint>>,
    logs: Vec<OperationLog>,
}

/// Thread-safe in-memory implementation of [`WorkflowStore`]
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of threads currently stored
    pub async fn thread_count(&self) -> usize {
        self.inner.read().await.threads.len()
    }

    /// Number of checkpoints across all threads
    pub async fn checkpoint_count(&self) -> usize {
        self.inner
            .read()
            .await
            .checkpoints
            .values()
            .map(Vec::len)
            .sum()
    }

    /// Number of log entries currently stored
    pub async fn log_count(&self) -> usize {
        self.inner.read().await.logs.len()
    }

    /// Remove all records (test isolation helper)
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.threads.clear();
        inner.checkpoints.clear();
        inner.logs.clear();
    }

    /// Rewrite a thread's timestamps (test helper for aging scenarios)
    pub async fn backdate_thread(
        &self,
        thread_id: &str,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let thread = inner
            .threads
            .get_mut(thread_id)
            .ok_or_else(|| StoreError::NotFound(format!("thread {thread_id}")))?;
        thread.created_at = created_at;
        thread.updated_at = updated_at;
        Ok(())
    }

    /// Rewrite a log entry's timestamp (test helper for aging scenarios)
    pub async fn backdate_log(&self, log_id: &str, created_at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.write().await;
        let log = inner
            .logs
            .iter_mut()
            .find(|l| l.id == log_id)
            .ok_or_else(|| StoreError::NotFound(format!("log {log_id}")))?;
        log.created_at = created_at;
        Ok(())
    }
}

#[async_trait]
impl WorkflowStore for InMemoryStore {
    async fn create_thread(&self, thread: Thread) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.threads.contains_key(&thread.id) {
            return Err(StoreError::Invalid(format!(
                "thread {} already exists",
                thread.id
            )));
        }
        inner.checkpoints.entry(thread.id.clone()).or_default();
        inner.threads.insert(thread.id.clone(), thread);
        Ok(())
    }

    async fn get_thread(&self, thread_id: &str) -> Result<Thread> {
        self.inner
            .read()
            .await
            .threads
            .get(thread_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("thread {thread_id}")))
    }

    async fn update_thread(
        &self,
        thread_id: &str,
        status: Option<ThreadStatus>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<Thread> {
        let mut inner = self.inner.write().await;
        let thread = inner
            .threads
            .get_mut(thread_id)
            .ok_or_else(|| StoreError::NotFound(format!("thread {thread_id}")))?;
        if let Some(status) = status {
            thread.status = status;
        }
        thread.metadata.extend(metadata);
        thread.updated_at = Utc::now();
        Ok(thread.clone())
    }

    async fn list_threads(&self, filter: &ThreadFilter) -> Result<Vec<Thread>> {
        let inner = self.inner.read().await;
        let mut matched: Vec<Thread> = inner
            .threads
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        matched.sort_by_key(|t| t.updated_at);
        Ok(matched)
    }

    async fn delete_threads(&self, thread_ids: &[ThreadId]) -> Result<usize> {
        let mut inner = self.inner.write().await;
        let mut removed = 0;
        for id in thread_ids {
            if inner.threads.remove(id).is_some() {
                inner.checkpoints.remove(id);
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn append_checkpoint(
        &self,
        thread_id: &str,
        parent_id: Option<CheckpointId>,
        state: WorkflowState,
        metadata: CheckpointMetadata,
    ) -> Result<Checkpoint> {
        let mut inner = self.inner.write().await;
        let thread = inner
            .threads
            .get(thread_id)
            .ok_or_else(|| StoreError::NotFound(format!("thread {thread_id}")))?;

        // Optimistic-concurrency check: the caller must be appending from
        // the thread's current latest checkpoint.
        if thread.latest_checkpoint != parent_id {
            return Err(StoreError::Conflict {
                thread_id: thread_id.to_string(),
                expected: parent_id,
                actual: thread.latest_checkpoint.clone(),
            });
        }

        let checkpoint = Checkpoint::new(thread_id, parent_id, state, metadata);

        let thread = inner
            .threads
            .get_mut(thread_id)
            .ok_or_else(|| StoreError::NotFound(format!("thread {thread_id}")))?;
        thread.latest_checkpoint = Some(checkpoint.id.clone());
        thread.updated_at = Utc::now();
        inner
            .checkpoints
            .entry(thread_id.to_string())
            .or_default()
            .push(checkpoint.clone());

        Ok(checkpoint)
    }

    async fn latest_checkpoint(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let inner = self.inner.read().await;
        if !inner.threads.contains_key(thread_id) {
            return Err(StoreError::NotFound(format!("thread {thread_id}")));
        }
        Ok(inner
            .checkpoints
            .get(thread_id)
            .and_then(|chain| chain.last().cloned()))
    }

    async fn checkpoint_history(&self, thread_id: &str) -> Result<Vec<Checkpoint>> {
        let inner = self.inner.read().await;
        if !inner.threads.contains_key(thread_id) {
            return Err(StoreError::NotFound(format!("thread {thread_id}")));
        }
        let mut chain = inner
            .checkpoints
            .get(thread_id)
            .cloned()
            .unwrap_or_default();
        chain.reverse();
        Ok(chain)
    }

    async fn append_log(&self, log: OperationLog) -> Result<()> {
        self.inner.write().await.logs.push(log);
        Ok(())
    }

    async fn purge_logs(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let mut inner = self.inner.write().await;
        let before = inner.logs.len();
        inner.logs.retain(|log| log.created_at >= older_than);
        Ok(before - inner.logs.len())
    }
}
