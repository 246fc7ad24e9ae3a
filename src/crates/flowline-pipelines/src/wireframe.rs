//! Social-ad wireframe pipeline
//!
//! Turns a subject plus a set of ad formats into one draft wireframe per
//! format, then pauses for human review. Reviewers approve wireframes one
//! at a time; the approval gate self-loops until every required wireframe
//! id has been approved, at which point the run finalizes.
//!
//! Stage order:
//!
//! ```text
//! collect_sources -> draft_wireframes -> [interrupt] approval_gate
//!     approval_gate --approved--> finalize -> END
//!     approval_gate --await_approval--> approval_gate (wait again)
//! ```

use serde_json::{json, Value};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use flowline_checkpoint::WorkflowState;
use flowline_core::{
    GraphBuilder, MergeKind, PartialState, PipelineGraph, Result, StageError, StageSpec, END,
    ERRORS_CHANNEL,
};

use crate::provider::{generate_with_deadline, TextGenerator, DEFAULT_DEADLINE};

/// Pipeline name recorded on every wireframe thread
pub const PIPELINE_NAME: &str = "social-wireframes";

type StageFuture =
    Pin<Box<dyn std::future::Future<Output = std::result::Result<PartialState, StageError>> + Send>>;

fn string_list(state: &WorkflowState, field: &str) -> Vec<String> {
    state
        .get(field)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// Wireframe ids still awaiting approval: required minus approved
pub fn pending_approvals(state: &WorkflowState) -> Vec<String> {
    let approved = string_list(state, "approved_wireframe_ids");
    string_list(state, "required_wireframe_ids")
        .into_iter()
        .filter(|id| !approved.contains(id))
        .collect()
}

fn approval_router(state: &WorkflowState) -> String {
    if pending_approvals(state).is_empty() {
        "approved".to_string()
    } else {
        "await_approval".to_string()
    }
}

async fn collect_sources(state: WorkflowState) -> std::result::Result<PartialState, StageError> {
    let urls = string_list(&state, "source_urls");
    let content = state
        .get("source_content")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    // Source text arrives with the input; a url with no supplied content
    // contributes nothing rather than failing the run.
    let snippets: Vec<Value> = urls
        .iter()
        .filter_map(|url| content.get(url).and_then(Value::as_str).map(|text| {
            let excerpt: String = text.chars().take(400).collect();
            json!({ "url": url, "excerpt": excerpt })
        }))
        .collect();

    let mut update = PartialState::new();
    update.insert("source_snippets".to_string(), json!(snippets));
    Ok(update)
}

fn draft_wireframes(
    generator: Arc<dyn TextGenerator>,
) -> impl Fn(WorkflowState) -> StageFuture + Send + Sync {
    move |state: WorkflowState| {
        let generator = generator.clone();
        Box::pin(async move {
            let subject = state
                .get("subject")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            let formats = string_list(&state, "selected_formats");
            if formats.is_empty() {
                return Err(StageError::new("draft_wireframes", "no formats selected"));
            }
            let snippets = state
                .get("source_snippets")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let context: Vec<&str> = snippets
                .iter()
                .filter_map(|s| s.get("excerpt").and_then(Value::as_str))
                .collect();

            let mut wireframes = Vec::with_capacity(formats.len());
            for (index, format) in formats.iter().enumerate() {
                let prompt = format!(
                    "Write a {format} ad wireframe about '{subject}'. Context: {}",
                    context.join(" | ")
                );
                let body = generate_with_deadline(generator.as_ref(), &prompt, DEFAULT_DEADLINE)
                    .await
                    .map_err(|err| StageError::new("draft_wireframes", err.to_string()))?;
                // Stable ids: a retry or replay regenerates the same id for
                // the same format, so prior approvals still apply.
                wireframes.push(json!({
                    "id": format!("wf-{index}-{format}"),
                    "format": format,
                    "headline": format!("{subject} ({format})"),
                    "body": body,
                }));
            }

            let ids: Vec<Value> = wireframes
                .iter()
                .filter_map(|w| w.get("id").cloned())
                .collect();
            let mut update = PartialState::new();
            update.insert("wireframes".to_string(), json!(wireframes));
            update.insert("required_wireframe_ids".to_string(), json!(ids));
            update.insert("status".to_string(), json!("awaiting_approval"));
            Ok(update)
        })
    }
}

// Interrupt stages are pause points: the engine halts before them and a
// resume re-enters at their outgoing edge, so the body never executes.
async fn approval_gate(_state: WorkflowState) -> std::result::Result<PartialState, StageError> {
    Ok(PartialState::new())
}

async fn finalize(_state: WorkflowState) -> std::result::Result<PartialState, StageError> {
    let mut update = PartialState::new();
    update.insert("status".to_string(), json!("complete"));
    Ok(update)
}

/// Build the social-ad wireframe pipeline
///
/// # Errors
///
/// Returns a configuration error if the graph definition is internally
/// inconsistent; this aborts startup.
pub fn wireframe_pipeline(generator: Arc<dyn TextGenerator>) -> Result<PipelineGraph> {
    GraphBuilder::new(PIPELINE_NAME)
        .channel("subject", MergeKind::Replace, Value::Null)
        .channel("selected_formats", MergeKind::Replace, json!([]))
        .channel("source_urls", MergeKind::Replace, json!([]))
        .channel("source_content", MergeKind::ShallowMerge, json!({}))
        .channel("source_snippets", MergeKind::Append, json!([]))
        .channel("wireframes", MergeKind::Append, json!([]))
        .channel("required_wireframe_ids", MergeKind::Replace, json!([]))
        // Accumulate keeps approvals a growing set: re-delivered or
        // overlapping approval batches merge without duplicates.
        .channel("approved_wireframe_ids", MergeKind::Accumulate, json!([]))
        .channel("status", MergeKind::Replace, Value::Null)
        .channel(ERRORS_CHANNEL, MergeKind::Accumulate, json!([]))
        // Caller-extensible bag; no stage writes it.
        .channel("metadata", MergeKind::ShallowMerge, json!({}))
        .stage(StageSpec::new("collect_sources", collect_sources).with_writes(vec!["source_snippets"]))
        .stage(
            StageSpec::new("draft_wireframes", draft_wireframes(generator))
                .with_writes(vec!["wireframes", "required_wireframe_ids", "status"])
                .retryable(),
        )
        .stage(StageSpec::new("approval_gate", approval_gate))
        .stage(StageSpec::new("finalize", finalize).with_writes(vec!["status"]))
        .entry("collect_sources")
        .edge("collect_sources", "draft_wireframes")
        .edge("draft_wireframes", "approval_gate")
        .conditional_edge(
            "approval_gate",
            approval_router,
            HashMap::from([
                ("approved".to_string(), "finalize".to_string()),
                ("await_approval".to_string(), "approval_gate".to_string()),
            ]),
        )
        .edge("finalize", END)
        .interrupt_before("approval_gate")
        .build()
}
