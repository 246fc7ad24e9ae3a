//! End-to-end engine behavior across the lifecycle manager, engine, and store

use flowline_checkpoint::{InMemoryStore, ThreadStatus, WorkflowState, WorkflowStore};
use flowline_core::{
    GraphBuilder, MergeKind, PartialState, PipelineGraph, StageSpec, WorkflowError,
    WorkflowManager, END, ERRORS_CHANNEL,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Subset check used by approval gates: every required id must be approved.
fn approval_router(state: &WorkflowState) -> String {
    let required: Vec<Value> = state
        .get("required_ids")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let approved: Vec<Value> = state
        .get("approved_ids")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    if required.iter().all(|id| approved.contains(id)) {
        "approved".to_string()
    } else {
        "await_approval".to_string()
    }
}

/// Gate pipeline: prepare -> [interrupt] gate -> (self-loop | finalize) -> END
fn gated_graph(required: Vec<&str>) -> Arc<PipelineGraph> {
    let required: Vec<String> = required.into_iter().map(String::from).collect();
    Arc::new(
        GraphBuilder::new("gated")
            .channel("required_ids", MergeKind::Replace, json!([]))
            .channel("approved_ids", MergeKind::Accumulate, json!([]))
            .channel("status", MergeKind::Replace, Value::Null)
            .channel(ERRORS_CHANNEL, MergeKind::Accumulate, json!([]))
            .stage(
                StageSpec::new("prepare", move |_state| {
                    let required = required.clone();
                    async move {
                        let mut update = PartialState::new();
                        update.insert("required_ids".to_string(), json!(required));
                        update.insert("status".to_string(), json!("awaiting_approval"));
                        Ok(update)
                    }
                })
                .with_writes(vec!["required_ids", "status"]),
            )
            .stage(StageSpec::new("gate", |_state| async {
                Ok(PartialState::new())
            }))
            .stage(
                StageSpec::new("finalize", |_state| async {
                    let mut update = PartialState::new();
                    update.insert("status".to_string(), json!("complete"));
                    Ok(update)
                })
                .with_writes(vec!["status"]),
            )
            .entry("prepare")
            .edge("prepare", "gate")
            .conditional_edge(
                "gate",
                approval_router,
                HashMap::from([
                    ("approved".to_string(), "finalize".to_string()),
                    ("await_approval".to_string(), "gate".to_string()),
                ]),
            )
            .edge("finalize", END)
            .interrupt_before("gate")
            .build()
            .unwrap(),
    )
}

fn approvals(ids: &[&str]) -> PartialState {
    let mut update = PartialState::new();
    update.insert("approved_ids".to_string(), json!(ids));
    update
}

#[tokio::test]
async fn test_empty_requirement_set_approves_on_first_evaluation() {
    let store = Arc::new(InMemoryStore::new());
    let manager = WorkflowManager::new(store);
    let graph = gated_graph(vec![]);

    let outcome = manager
        .start(graph.clone(), "user-1", None, &WorkflowState::new())
        .await
        .unwrap();
    assert_eq!(outcome.thread.status, ThreadStatus::Paused);

    // No approvals submitted; the vacuous requirement routes straight through.
    let outcome = manager
        .resume(graph, &outcome.thread.id, &PartialState::new())
        .await
        .unwrap();
    assert_eq!(outcome.thread.status, ThreadStatus::Completed);
    assert_eq!(outcome.state["status"], json!("complete"));
}

#[tokio::test]
async fn test_partial_approval_self_loops_then_completes() {
    let store = Arc::new(InMemoryStore::new());
    let manager = WorkflowManager::new(store);
    let graph = gated_graph(vec!["wf-1", "wf-2"]);

    let outcome = manager
        .start(graph.clone(), "user-1", None, &WorkflowState::new())
        .await
        .unwrap();
    let id = outcome.thread.id.clone();
    assert_eq!(outcome.thread.status, ThreadStatus::Paused);
    assert_eq!(outcome.state["status"], json!("awaiting_approval"));

    // One of two approved: the gate waits again rather than erroring.
    let outcome = manager
        .resume(graph.clone(), &id, &approvals(&["wf-1"]))
        .await
        .unwrap();
    assert_eq!(outcome.thread.status, ThreadStatus::Paused);

    // Second approval completes the run.
    let outcome = manager
        .resume(graph, &id, &approvals(&["wf-2"]))
        .await
        .unwrap();
    assert_eq!(outcome.thread.status, ThreadStatus::Completed);
    assert_eq!(outcome.state["approved_ids"], json!(["wf-1", "wf-2"]));
}

#[tokio::test]
async fn test_duplicate_resume_delivery_is_noop() {
    let store = Arc::new(InMemoryStore::new());
    let manager = WorkflowManager::new(store.clone());
    let graph = gated_graph(vec!["wf-1", "wf-2"]);

    let outcome = manager
        .start(graph.clone(), "user-1", None, &WorkflowState::new())
        .await
        .unwrap();
    let id = outcome.thread.id.clone();

    let first = manager
        .resume(graph.clone(), &id, &approvals(&["wf-1"]))
        .await
        .unwrap();
    assert_eq!(first.thread.status, ThreadStatus::Paused);
    let history_after_first = store.checkpoint_history(&id).await.unwrap();

    // The same webhook fires twice: state and status are unchanged.
    let second = manager
        .resume(graph, &id, &approvals(&["wf-1"]))
        .await
        .unwrap();
    assert_eq!(second.thread.status, ThreadStatus::Paused);
    assert_eq!(second.state["approved_ids"], json!(["wf-1"]));

    // The duplicate delivery appended nothing: the chain head is the same
    // interrupt checkpoint the first resume paused at.
    let history_after_second = store.checkpoint_history(&id).await.unwrap();
    assert_eq!(history_after_first.len(), history_after_second.len());
    assert_eq!(history_after_first[0].id, history_after_second[0].id);
    assert_eq!(
        history_after_first[0].state["approved_ids"],
        history_after_second[0].state["approved_ids"]
    );
}

#[tokio::test]
async fn test_concurrent_resume_keeps_history_linear() {
    let store = Arc::new(InMemoryStore::new());
    let manager = Arc::new(WorkflowManager::new(store.clone()));
    let graph = gated_graph(vec!["wf-1"]);

    let outcome = manager
        .start(graph.clone(), "user-1", None, &WorkflowState::new())
        .await
        .unwrap();
    let id = outcome.thread.id.clone();

    let approvals_a = approvals(&["wf-1"]);
    let approvals_b = approvals(&["wf-1"]);
    let (a, b) = tokio::join!(
        manager.resume(graph.clone(), &id, &approvals_a),
        manager.resume(graph.clone(), &id, &approvals_b),
    );

    // Exactly one resume drives the thread; the loser surfaces a
    // conflict (or invalid-state, if it read status after the winner
    // flipped it) rather than forking the history.
    let succeeded = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(succeeded, 1);
    for result in [a, b] {
        if let Err(err) = result {
            assert!(
                matches!(
                    err,
                    WorkflowError::Conflict(_) | WorkflowError::InvalidState { .. }
                ),
                "unexpected loser error: {err}"
            );
        }
    }

    // The thread converged on one consistent terminal state.
    let thread = store.get_thread(&id).await.unwrap();
    assert_eq!(thread.status, ThreadStatus::Completed);

    // Parent linkage forms a single unbranched chain.
    let history = store.checkpoint_history(&id).await.unwrap();
    for pair in history.windows(2) {
        assert_eq!(pair[0].parent_id.as_ref(), Some(&pair[1].id));
    }
    assert!(history.last().unwrap().parent_id.is_none());
}

#[tokio::test]
async fn test_resume_after_failure_is_invalid_state() {
    let store = Arc::new(InMemoryStore::new());
    let manager = WorkflowManager::new(store.clone());
    let graph = Arc::new(
        GraphBuilder::new("failing")
            .channel(ERRORS_CHANNEL, MergeKind::Accumulate, json!([]))
            .stage(StageSpec::new("boom", |_state| async {
                Err(flowline_core::StageError::new("boom", "no provider"))
            }))
            .entry("boom")
            .edge("boom", END)
            .build()
            .unwrap(),
    );

    let outcome = manager
        .start(graph.clone(), "user-1", None, &WorkflowState::new())
        .await
        .unwrap();
    assert_eq!(outcome.thread.status, ThreadStatus::Failed);

    let before = store.checkpoint_history(&outcome.thread.id).await.unwrap();
    let result = manager
        .resume(graph, &outcome.thread.id, &PartialState::new())
        .await;
    assert!(matches!(result, Err(WorkflowError::InvalidState { .. })));
    let after = store.checkpoint_history(&outcome.thread.id).await.unwrap();
    assert_eq!(before.len(), after.len());
}

#[tokio::test]
async fn test_paused_thread_reports_pending_requirement_from_state() {
    let store = Arc::new(InMemoryStore::new());
    let manager = WorkflowManager::new(store);
    let graph = gated_graph(vec!["wf-1", "wf-2"]);

    let outcome = manager
        .start(graph.clone(), "user-1", None, &WorkflowState::new())
        .await
        .unwrap();

    // The pending requirement is derivable from the paused state itself.
    assert_eq!(outcome.thread.status, ThreadStatus::Paused);
    assert_eq!(outcome.state["required_ids"], json!(["wf-1", "wf-2"]));
    assert_eq!(outcome.state["approved_ids"], json!([]));
}
