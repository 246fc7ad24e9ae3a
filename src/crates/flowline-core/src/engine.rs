//! Execution engine - drives a thread through its pipeline graph
//!
//! The engine is deliberately not a long-lived in-memory process. Each call
//! to [`Engine::start`] or [`Engine::resume`] runs stages sequentially until
//! the thread reaches an interrupt point or a terminal state, persisting a
//! checkpoint after every step, and then returns control to the caller.
//! Everything needed to continue lives in the last checkpoint, so a resume
//! can be served by a different process instance than the one that started
//! the thread.
//!
//! # Transition rules
//!
//! Given the current stage `s` and state `S`:
//!
//! 1. If `s` is an interrupt point, persist a checkpoint tagged
//!    `interrupt = true`, set the thread `paused`, and return. A resume call
//!    re-enters at `s`'s *outgoing edge*, not at `s` itself, so a
//!    conditional edge that routes back to `s` (the "wait again" pattern)
//!    pauses the thread again instead of erroring.
//! 2. Otherwise invoke `s`'s stage function on `S`. On success, merge the
//!    sparse result through the channel registry, persist a checkpoint
//!    tagged with the stage name, and advance along the edge. On failure,
//!    record the error into the `errors` channel, persist the error-bearing
//!    state, and set the thread `failed` (after one retry when the stage is
//!    marked retryable).
//! 3. When the edge resolves to [`END`], persist a final checkpoint and set
//!    the thread `completed`.
//!
//! Cancellation is cooperative: an in-flight stage is not interrupted, but
//! the engine re-checks thread status before every persist and discards the
//! result of a cancelled thread, surfacing [`WorkflowError::Cancelled`].
//!
//! Every checkpoint append goes through the store's optimistic-concurrency
//! check. If another process advanced the same thread first, the append
//! fails with a conflict and this engine instance stops without forking the
//! thread's history.

use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use flowline_checkpoint::{
    CheckpointId, CheckpointMetadata, OperationLog, ThreadStatus, WorkflowState, WorkflowStore,
};

use crate::error::{Result, WorkflowError};
use crate::graph::{PipelineGraph, END};
use crate::stage::{PartialState, StageError};

/// Name of the accumulate channel stage failures are recorded into
pub const ERRORS_CHANNEL: &str = "errors";

/// Stateless executor binding one graph to one store
pub struct Engine {
    graph: Arc<PipelineGraph>,
    store: Arc<dyn WorkflowStore>,
}

impl Engine {
    /// Create an engine for the given graph and store
    pub fn new(graph: Arc<PipelineGraph>, store: Arc<dyn WorkflowStore>) -> Self {
        Self { graph, store }
    }

    /// Begin executing a fresh thread from the graph's entry stage
    ///
    /// Persists an input checkpoint first so resume always has a parent to
    /// chain from, then runs until an interrupt point or a terminal state.
    /// Returns the state at the point execution halted.
    pub async fn start(&self, thread_id: &str, input: &WorkflowState) -> Result<WorkflowState> {
        let state = self.graph.registry.initial_state(input)?;
        let checkpoint = self
            .store
            .append_checkpoint(
                thread_id,
                None,
                state.clone(),
                CheckpointMetadata::new().with_extra("input", json!(true)),
            )
            .await?;
        info!(thread_id, pipeline = %self.graph.name, "thread execution started");
        self.run_loop(thread_id, self.graph.entry.clone(), state, Some(checkpoint.id))
            .await
    }

    /// Continue a paused thread from its interrupted stage's outgoing edge
    ///
    /// `updates` is a sparse partial state (typically approvals) merged
    /// through the channel registry and checkpointed before the loop
    /// re-enters. Merging that produces no change appends nothing, which is
    /// what makes duplicate resume deliveries a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Configuration`] when this engine's graph is
    /// not the pipeline the thread was started with, before any state is
    /// touched. Returns [`WorkflowError::InvalidState`] when the thread is
    /// not `paused`.
    pub async fn resume(&self, thread_id: &str, updates: &PartialState) -> Result<WorkflowState> {
        let thread = self.store.get_thread(thread_id).await?;
        if thread.pipeline != self.graph.name {
            return Err(WorkflowError::Configuration(format!(
                "thread {thread_id} runs pipeline '{}', not '{}'",
                thread.pipeline, self.graph.name
            )));
        }
        if thread.status != ThreadStatus::Paused {
            return Err(WorkflowError::InvalidState {
                thread_id: thread_id.to_string(),
                expected: ThreadStatus::Paused.to_string(),
                actual: thread.status,
            });
        }

        let latest = self
            .store
            .latest_checkpoint(thread_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("checkpoints for thread {thread_id}")))?;
        let interrupted = latest.metadata.stage.clone().ok_or_else(|| {
            WorkflowError::Configuration(format!(
                "latest checkpoint of thread {thread_id} records no stage to resume from"
            ))
        })?;
        if interrupted == END {
            // Another process finished this thread between the caller's
            // status check and now.
            let thread = self.store.get_thread(thread_id).await?;
            return Err(WorkflowError::InvalidState {
                thread_id: thread_id.to_string(),
                expected: ThreadStatus::Paused.to_string(),
                actual: thread.status,
            });
        }

        let mut state = latest.state;
        let mut parent = Some(latest.id);

        if !updates.is_empty() {
            let merged = self.graph.registry.merge_all(&state, updates)?;
            if merged != state {
                let checkpoint = self
                    .store
                    .append_checkpoint(
                        thread_id,
                        parent,
                        merged.clone(),
                        CheckpointMetadata::new()
                            .with_stage(&interrupted)
                            .with_extra("resume_updates", json!(true)),
                    )
                    .await?;
                parent = Some(checkpoint.id);
                state = merged;
            }
        }

        self.store
            .update_thread(thread_id, Some(ThreadStatus::Active), HashMap::new())
            .await?;
        info!(thread_id, stage = %interrupted, "thread resumed");
        self.log(thread_id, "thread.resumed", Some(json!({ "stage": &interrupted })))
            .await;

        let next = self.graph.next_stage(&interrupted, &state)?;
        self.run_loop(thread_id, next, state, parent).await
    }

    async fn run_loop(
        &self,
        thread_id: &str,
        mut current: String,
        mut state: WorkflowState,
        mut parent: Option<CheckpointId>,
    ) -> Result<WorkflowState> {
        loop {
            if current == END {
                self.ensure_not_cancelled(thread_id).await?;
                self.store
                    .append_checkpoint(
                        thread_id,
                        parent,
                        state.clone(),
                        CheckpointMetadata::new()
                            .with_stage(END)
                            .with_extra("final", json!(true)),
                    )
                    .await?;
                self.store
                    .update_thread(thread_id, Some(ThreadStatus::Completed), HashMap::new())
                    .await?;
                info!(thread_id, pipeline = %self.graph.name, "thread completed");
                self.log(thread_id, "thread.completed", None).await;
                return Ok(state);
            }

            if self.graph.is_interrupt(&current) {
                self.ensure_not_cancelled(thread_id).await?;
                // A redelivered resume that changed nothing re-arrives here
                // with the interrupt checkpoint it paused at still the
                // latest; re-appending it would grow the chain per
                // duplicate webhook delivery.
                let already_recorded = match self.store.latest_checkpoint(thread_id).await? {
                    Some(latest) => {
                        parent.as_deref() == Some(latest.id.as_str())
                            && latest.metadata.interrupt
                            && latest.metadata.stage.as_deref() == Some(current.as_str())
                            && latest.state == state
                    }
                    None => false,
                };
                if !already_recorded {
                    self.store
                        .append_checkpoint(
                            thread_id,
                            parent,
                            state.clone(),
                            CheckpointMetadata::new().with_stage(&current).with_interrupt(),
                        )
                        .await?;
                }
                self.store
                    .update_thread(thread_id, Some(ThreadStatus::Paused), HashMap::new())
                    .await?;
                info!(thread_id, stage = %current, "thread paused at interrupt point");
                self.log(thread_id, "thread.interrupted", Some(json!({ "stage": &current })))
                    .await;
                return Ok(state);
            }

            let spec = self.graph.stages.get(&current).ok_or_else(|| {
                WorkflowError::Configuration(format!("stage '{current}' is not declared"))
            })?;

            debug!(thread_id, stage = %current, "running stage");
            let mut attempts = 0;
            let outcome = loop {
                attempts += 1;
                match (spec.executor)(state.clone()).await {
                    Ok(update) => break Ok(update),
                    Err(stage_err) => {
                        state = self.record_stage_error(&state, &stage_err)?;
                        if spec.retryable && attempts == 1 {
                            warn!(thread_id, stage = %current, error = %stage_err, "retryable stage failed, retrying once");
                            continue;
                        }
                        break Err(stage_err);
                    }
                }
            };

            match outcome {
                Ok(update) => {
                    let merged = self.graph.registry.merge_all(&state, &update)?;
                    self.ensure_not_cancelled(thread_id).await?;
                    let checkpoint = self
                        .store
                        .append_checkpoint(
                            thread_id,
                            parent,
                            merged.clone(),
                            CheckpointMetadata::new().with_stage(&current),
                        )
                        .await?;
                    debug!(thread_id, stage = %current, checkpoint = %checkpoint.id, "stage completed");
                    self.log(thread_id, "stage.completed", Some(json!({ "stage": &current })))
                        .await;
                    let next = self.graph.next_stage(&current, &merged)?;
                    parent = Some(checkpoint.id);
                    state = merged;
                    current = next;
                }
                Err(stage_err) => {
                    self.ensure_not_cancelled(thread_id).await?;
                    self.store
                        .append_checkpoint(
                            thread_id,
                            parent,
                            state.clone(),
                            CheckpointMetadata::new()
                                .with_stage(&current)
                                .with_extra("failed", json!(true)),
                        )
                        .await?;
                    self.store
                        .update_thread(thread_id, Some(ThreadStatus::Failed), HashMap::new())
                        .await?;
                    error!(thread_id, stage = %current, error = %stage_err, "stage failed, thread marked failed");
                    self.log(
                        thread_id,
                        "stage.failed",
                        Some(json!({ "stage": &current, "message": &stage_err.message })),
                    )
                    .await;
                    return Ok(state);
                }
            }
        }
    }

    /// Append a stage failure to the `errors` channel
    ///
    /// Pipelines without an `errors` channel keep the state unchanged; the
    /// failure still fails the thread and lands in the logs.
    fn record_stage_error(&self, state: &WorkflowState, err: &StageError) -> Result<WorkflowState> {
        if !self.graph.registry.contains(ERRORS_CHANNEL) {
            warn!(stage = %err.stage, "pipeline has no errors channel; failure not recorded in state");
            return Ok(state.clone());
        }
        let mut partial = PartialState::new();
        partial.insert(ERRORS_CHANNEL.to_string(), json!([err.to_value()]));
        self.graph.registry.merge_all(state, &partial)
    }

    async fn ensure_not_cancelled(&self, thread_id: &str) -> Result<()> {
        let thread = self.store.get_thread(thread_id).await?;
        if thread.status == ThreadStatus::Cancelled {
            warn!(thread_id, "thread cancelled mid-step; discarding stage result");
            return Err(WorkflowError::Cancelled(thread_id.to_string()));
        }
        Ok(())
    }

    async fn log(&self, thread_id: &str, event: &str, detail: Option<serde_json::Value>) {
        let mut log = OperationLog::new(thread_id, event);
        if let Some(detail) = detail {
            log = log.with_detail(detail);
        }
        // Log persistence is best-effort; a failed log write never fails a step.
        if let Err(err) = self.store.append_log(log).await {
            warn!(thread_id, event, %err, "failed to append operation log");
        }
    }
}
