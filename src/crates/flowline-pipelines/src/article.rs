//! Long-form article pipeline
//!
//! Researches a topic keyword by keyword, proposes an outline, pauses for
//! the editor to approve every section title, then drafts and assembles
//! the article. The outline gate uses the same wait-again pattern as the
//! wireframe approval gate: it self-loops until the approved set covers
//! the full outline.
//!
//! Stage order:
//!
//! ```text
//! research -> outline -> [interrupt] outline_gate
//!     outline_gate --approved--> draft_sections -> assemble -> END
//!     outline_gate --await_approval--> outline_gate (wait again)
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

/// Pipeline name recorded on every article thread
pub const PIPELINE_NAME: &str = "long-form-article";

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

/// Outline sections not yet approved by the editor
pub fn pending_sections(state: &WorkflowState) -> Vec<String> {
    let approved = string_list(state, "approved_sections");
    string_list(state, "outline")
        .into_iter()
        .filter(|title| !approved.contains(title))
        .collect()
}

fn outline_router(state: &WorkflowState) -> String {
    if pending_sections(state).is_empty() {
        "approved".to_string()
    } else {
        "await_approval".to_string()
    }
}

fn research(generator: Arc<dyn TextGenerator>) -> impl Fn(WorkflowState) -> StageFuture + Send + Sync {
    move |state: WorkflowState| {
        let generator = generator.clone();
        Box::pin(async move {
            let topic = state
                .get("topic")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            if topic.is_empty() {
                return Err(StageError::new("research", "no topic provided"));
            }
            let keywords = string_list(&state, "keywords");

            let mut notes = Vec::with_capacity(keywords.len().max(1));
            if keywords.is_empty() {
                let prompt = format!("Summarize what matters about '{topic}'");
                let note = generate_with_deadline(generator.as_ref(), &prompt, DEFAULT_DEADLINE)
                    .await
                    .map_err(|err| StageError::new("research", err.to_string()))?;
                notes.push(json!({ "keyword": topic, "note": note }));
            }
            for keyword in &keywords {
                let prompt = format!("Research '{keyword}' as it relates to '{topic}'");
                let note = generate_with_deadline(generator.as_ref(), &prompt, DEFAULT_DEADLINE)
                    .await
                    .map_err(|err| StageError::new("research", err.to_string()))?;
                notes.push(json!({ "keyword": keyword, "note": note }));
            }

            let mut update = PartialState::new();
            update.insert("research_notes".to_string(), json!(notes));
            Ok(update)
        })
    }
}

fn outline(generator: Arc<dyn TextGenerator>) -> impl Fn(WorkflowState) -> StageFuture + Send + Sync {
    move |state: WorkflowState| {
        let generator = generator.clone();
        Box::pin(async move {
            let topic = state
                .get("topic")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            let notes = state
                .get("research_notes")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let context: Vec<&str> = notes
                .iter()
                .filter_map(|n| n.get("note").and_then(Value::as_str))
                .collect();

            let prompt = format!(
                "Outline an article about '{topic}', one section title per line. Notes: {}",
                context.join(" | ")
            );
            let raw = generate_with_deadline(generator.as_ref(), &prompt, DEFAULT_DEADLINE)
                .await
                .map_err(|err| StageError::new("outline", err.to_string()))?;

            // One title per non-empty line, bullets and numbering stripped.
            let titles: Vec<String> = raw
                .lines()
                .map(|line| line.trim_start_matches(['-', '*', ' ']).trim())
                .map(|line| line.trim_start_matches(|c: char| c.is_ascii_digit() || c == '.'))
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from)
                .collect();
            if titles.is_empty() {
                return Err(StageError::new("outline", "provider returned no outline"));
            }

            let mut update = PartialState::new();
            update.insert("outline".to_string(), json!(titles));
            update.insert("status".to_string(), json!("awaiting_approval"));
            Ok(update)
        })
    }
}

// Pause point only; the engine never executes an interrupt stage's body.
async fn outline_gate(_state: WorkflowState) -> std::result::Result<PartialState, StageError> {
    Ok(PartialState::new())
}

fn draft_sections(
    generator: Arc<dyn TextGenerator>,
) -> impl Fn(WorkflowState) -> StageFuture + Send + Sync {
    move |state: WorkflowState| {
        let generator = generator.clone();
        Box::pin(async move {
            let topic = state
                .get("topic")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            let titles = string_list(&state, "outline");

            let mut sections = Vec::with_capacity(titles.len());
            for title in &titles {
                let prompt = format!("Write the '{title}' section of an article about '{topic}'");
                let body = generate_with_deadline(generator.as_ref(), &prompt, DEFAULT_DEADLINE)
                    .await
                    .map_err(|err| StageError::new("draft_sections", err.to_string()))?;
                sections.push(json!({ "title": title, "body": body }));
            }

            let mut update = PartialState::new();
            update.insert("sections".to_string(), json!(sections));
            Ok(update)
        })
    }
}

async fn assemble(state: WorkflowState) -> std::result::Result<PartialState, StageError> {
    let sections = state
        .get("sections")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    if sections.is_empty() {
        return Err(StageError::new("assemble", "no drafted sections to assemble"));
    }

    let article = sections
        .iter()
        .filter_map(|s| {
            let title = s.get("title").and_then(Value::as_str)?;
            let body = s.get("body").and_then(Value::as_str)?;
            Some(format!("## {title}\n\n{body}"))
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    let word_count = article.split_whitespace().count();

    let mut update = PartialState::new();
    update.insert("article".to_string(), json!(article));
    update.insert("word_count".to_string(), json!(word_count));
    update.insert("status".to_string(), json!("complete"));
    Ok(update)
}

/// Build the long-form article pipeline
///
/// # Errors
///
/// Returns a configuration error if the graph definition is internally
/// inconsistent; this aborts startup.
pub fn article_pipeline(generator: Arc<dyn TextGenerator>) -> Result<PipelineGraph> {
    GraphBuilder::new(PIPELINE_NAME)
        .channel("topic", MergeKind::Replace, Value::Null)
        .channel("keywords", MergeKind::Replace, json!([]))
        .channel("research_notes", MergeKind::Append, json!([]))
        .channel("outline", MergeKind::Replace, json!([]))
        .channel("approved_sections", MergeKind::Accumulate, json!([]))
        .channel("sections", MergeKind::Append, json!([]))
        .channel("article", MergeKind::Replace, Value::Null)
        .channel("word_count", MergeKind::Replace, Value::Null)
        .channel("status", MergeKind::Replace, Value::Null)
        .channel(ERRORS_CHANNEL, MergeKind::Accumulate, json!([]))
        // Caller-extensible bag; no stage writes it.
        .channel("metadata", MergeKind::ShallowMerge, json!({}))
        .stage(
            StageSpec::new("research", research(generator.clone()))
                .with_writes(vec!["research_notes"])
                .retryable(),
        )
        .stage(
            StageSpec::new("outline", outline(generator.clone()))
                .with_writes(vec!["outline", "status"]),
        )
        .stage(StageSpec::new("outline_gate", outline_gate))
        .stage(
            StageSpec::new("draft_sections", draft_sections(generator))
                .with_writes(vec!["sections"])
                .retryable(),
        )
        .stage(
            StageSpec::new("assemble", assemble)
                .with_writes(vec!["article", "word_count", "status"]),
        )
        .entry("research")
        .edge("research", "outline")
        .edge("outline", "outline_gate")
        .conditional_edge(
            "outline_gate",
            outline_router,
            HashMap::from([
                ("approved".to_string(), "draft_sections".to_string()),
                ("await_approval".to_string(), "outline_gate".to_string()),
            ]),
        )
        .edge("draft_sections", "assemble")
        .edge("assemble", END)
        .interrupt_before("outline_gate")
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{CannedGenerator, GeneratorError};
    use async_trait::async_trait;

    fn state_with(entries: &[(&str, Value)]) -> WorkflowState {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    /// Generator returning a fixed multi-line outline.
    struct OutlineGenerator;

    #[async_trait]
    impl TextGenerator for OutlineGenerator {
        async fn generate(&self, _prompt: &str) -> std::result::Result<String, GeneratorError> {
            Ok("- Introduction\n- 1. Market context\n\n- Conclusion\n".to_string())
        }
    }

    #[test]
    fn test_pipeline_builds() {
        let graph = article_pipeline(Arc::new(CannedGenerator::new())).unwrap();
        assert_eq!(graph.entry, "research");
        assert!(graph.is_interrupt("outline_gate"));
    }

    #[test]
    fn test_router_requires_every_outline_section_approved() {
        let partial = state_with(&[
            ("outline", json!(["Introduction", "Conclusion"])),
            ("approved_sections", json!(["Introduction"])),
        ]);
        assert_eq!(outline_router(&partial), "await_approval");

        let complete = state_with(&[
            ("outline", json!(["Introduction", "Conclusion"])),
            ("approved_sections", json!(["Conclusion", "Introduction"])),
        ]);
        assert_eq!(outline_router(&complete), "approved");
    }

    #[tokio::test]
    async fn test_research_emits_one_note_per_keyword() {
        let stage = research(Arc::new(CannedGenerator::new()));
        let state = state_with(&[
            ("topic", json!("compact living")),
            ("keywords", json!(["storage", "lighting", "layout"])),
        ]);
        let update = stage(state).await.unwrap();
        let notes = update["research_notes"].as_array().unwrap();
        assert_eq!(notes.len(), 3);
        assert_eq!(notes[0]["keyword"], json!("storage"));
    }

    #[tokio::test]
    async fn test_research_without_topic_fails() {
        let stage = research(Arc::new(CannedGenerator::new()));
        let err = stage(WorkflowState::new()).await.unwrap_err();
        assert_eq!(err.stage, "research");
    }

    #[tokio::test]
    async fn test_outline_parses_titles_and_strips_markers() {
        let stage = outline(Arc::new(OutlineGenerator));
        let state = state_with(&[("topic", json!("compact living"))]);
        let update = stage(state).await.unwrap();
        assert_eq!(
            update["outline"],
            json!(["Introduction", "Market context", "Conclusion"])
        );
        assert_eq!(update["status"], json!("awaiting_approval"));
    }

    #[tokio::test]
    async fn test_assemble_joins_sections_and_counts_words() {
        let state = state_with(&[(
            "sections",
            json!([
                { "title": "Introduction", "body": "small rooms reward planning" },
                { "title": "Conclusion", "body": "measure twice" },
            ]),
        )]);
        let update = assemble(state).await.unwrap();
        let article = update["article"].as_str().unwrap();
        assert!(article.starts_with("## Introduction"));
        assert!(article.contains("## Conclusion"));
        // 2 headings + 2 title words + 6 body words
        assert_eq!(update["word_count"], json!(article.split_whitespace().count()));
        assert_eq!(update["status"], json!("complete"));
    }

    #[tokio::test]
    async fn test_assemble_with_no_sections_fails() {
        let err = assemble(WorkflowState::new()).await.unwrap_err();
        assert_eq!(err.stage, "assemble");
    }
}
