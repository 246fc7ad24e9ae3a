//! Thread lifecycle manager - start, resume, cancel, introspect
//!
//! [`WorkflowManager`] owns status transitions a caller can trigger and is
//! the surface the surrounding application's handlers adapt to. Pipeline
//! graphs are passed in per call rather than held globally, so one manager
//! serves every pipeline against one store.
//!
//! # Resume contract
//!
//! Approvals (or any other external updates) are submitted atomically with
//! the resume call: the sparse update is merged through the channel
//! registry and checkpointed before execution re-enters the loop. There is
//! no separate "record approval" API. Re-delivering the same updates while
//! the thread is still paused merges to an identical state, appends no
//! checkpoint, and re-pauses at the same gate - a no-op, not an error -
//! which makes duplicate webhook-style deliveries harmless.

use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use flowline_checkpoint::{
    Checkpoint, OperationLog, Thread, ThreadFilter, ThreadId, ThreadStatus, WorkflowState,
    WorkflowStore,
};

use crate::engine::Engine;
use crate::error::{Result, WorkflowError};
use crate::graph::PipelineGraph;
use crate::stage::PartialState;

/// Outcome of a start or resume call
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// The thread after execution returned control
    pub thread: Thread,
    /// State at the point execution halted (interrupt or terminal)
    pub state: WorkflowState,
}

/// Caller-facing operations on workflow threads
pub struct WorkflowManager {
    store: Arc<dyn WorkflowStore>,
}

impl WorkflowManager {
    /// Create a manager over the given store
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self { store }
    }

    /// Access the underlying store
    pub fn store(&self) -> Arc<dyn WorkflowStore> {
        self.store.clone()
    }

    /// Create a thread and run the pipeline until it pauses or terminates
    ///
    /// The caller layer is expected to have validated the input and checked
    /// entitlement before calling this.
    pub async fn start(
        &self,
        graph: Arc<PipelineGraph>,
        user_id: &str,
        parent_session_id: Option<String>,
        input: &WorkflowState,
    ) -> Result<RunOutcome> {
        let mut thread = Thread::new(user_id, graph.name.clone());
        if let Some(session) = parent_session_id {
            thread = thread.with_parent_session(session);
        }
        let thread_id = thread.id.clone();
        self.store.create_thread(thread).await?;
        info!(thread_id = %thread_id, pipeline = %graph.name, user_id, "thread created");
        self.log(&thread_id, "thread.started", Some(json!({ "pipeline": &graph.name })))
            .await?;

        let engine = Engine::new(graph, self.store.clone());
        let state = engine.start(&thread_id, input).await?;
        let thread = self.store.get_thread(&thread_id).await?;
        Ok(RunOutcome { thread, state })
    }

    /// Resume a paused thread, merging `external_updates` first
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::InvalidState`] when the thread is not
    /// `paused`, and [`WorkflowError::Configuration`] when `graph` is not
    /// the pipeline the thread was started with - both leave its checkpoint
    /// chain untouched. A concurrent resume that loses the
    /// checkpoint-append race surfaces [`WorkflowError::Conflict`].
    pub async fn resume(
        &self,
        graph: Arc<PipelineGraph>,
        thread_id: &str,
        external_updates: &PartialState,
    ) -> Result<RunOutcome> {
        let thread = self.store.get_thread(thread_id).await?;
        if thread.status != ThreadStatus::Paused {
            return Err(WorkflowError::InvalidState {
                thread_id: thread_id.to_string(),
                expected: ThreadStatus::Paused.to_string(),
                actual: thread.status,
            });
        }

        let engine = Engine::new(graph, self.store.clone());
        let state = engine.resume(thread_id, external_updates).await?;
        let thread = self.store.get_thread(thread_id).await?;
        Ok(RunOutcome { thread, state })
    }

    /// Cancel an in-flight thread, recording who did it and why
    ///
    /// Cancellation is cooperative: the status flips immediately, and an
    /// engine step in flight discards its result when it next checks.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::InvalidState`] when the thread is already
    /// terminal.
    pub async fn cancel(
        &self,
        thread_id: &str,
        actor: &str,
        reason: Option<String>,
    ) -> Result<Thread> {
        let thread = self.store.get_thread(thread_id).await?;
        if thread.status.is_terminal() {
            return Err(WorkflowError::InvalidState {
                thread_id: thread_id.to_string(),
                expected: "active or paused".to_string(),
                actual: thread.status,
            });
        }

        let mut metadata = HashMap::new();
        metadata.insert("cancelledBy".to_string(), json!(actor));
        if let Some(reason) = &reason {
            metadata.insert("cancelReason".to_string(), json!(reason));
        }
        let thread = self
            .store
            .update_thread(thread_id, Some(ThreadStatus::Cancelled), metadata)
            .await?;
        info!(thread_id, actor, "thread cancelled");
        self.log(
            thread_id,
            "thread.cancelled",
            Some(json!({ "actor": actor, "reason": reason })),
        )
        .await?;
        Ok(thread)
    }

    /// Fetch a thread and its full checkpoint history (newest first)
    pub async fn get(&self, thread_id: &str) -> Result<(Thread, Vec<Checkpoint>)> {
        let thread = self.store.get_thread(thread_id).await?;
        let history = self.store.checkpoint_history(thread_id).await?;
        Ok((thread, history))
    }

    /// List threads for admin views
    pub async fn list(&self, filter: &ThreadFilter) -> Result<Vec<Thread>> {
        Ok(self.store.list_threads(filter).await?)
    }

    /// Immediately delete threads and their checkpoints (admin action)
    pub async fn delete(&self, thread_ids: &[ThreadId]) -> Result<usize> {
        let removed = self.store.delete_threads(thread_ids).await?;
        info!(removed, "threads deleted by admin action");
        Ok(removed)
    }

    async fn log(
        &self,
        thread_id: &str,
        event: &str,
        detail: Option<serde_json::Value>,
    ) -> Result<()> {
        let mut log = OperationLog::new(thread_id, event);
        if let Some(detail) = detail {
            log = log.with_detail(detail);
        }
        self.store.append_log(log).await?;
        Ok(())
    }
}
