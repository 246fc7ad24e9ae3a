//! # flowline-core - Resumable multi-stage workflow engine
//!
//! `flowline-core` drives long-running content pipelines modeled as graphs
//! of stages. A pipeline run (a *thread*) can take minutes, pause for human
//! approval, survive process restarts, and be reaped when nobody ever
//! responds. It provides:
//!
//! - **Channel registry** - per-field merge semantics
//!   (`Replace | Append | ShallowMerge | Accumulate`) combining each
//!   stage's sparse update into the durable state
//! - **Graph definition** - stages, direct and conditional edges,
//!   interrupt points, all validated at build time so a malformed pipeline
//!   fails startup rather than a request
//! - **Execution engine** - runs stages sequentially, checkpoints after
//!   every step, halts at interrupt points, resumes from the last
//!   checkpoint in any process instance
//! - **Thread lifecycle manager** - start / resume / cancel / introspect
//! - **Reaper & retention** - hourly stuck-thread recovery and daily
//!   deletion of aged-out terminal threads and logs
//!
//! Durable state lives behind the
//! [`WorkflowStore`](flowline_checkpoint::WorkflowStore) trait from
//! `flowline-checkpoint`; the engine holds no state of its own between
//! calls.
//!
//! ## Example
//!
//! ```rust,ignore
//! use flowline_core::{GraphBuilder, MergeKind, StageSpec, WorkflowManager, END};
//! use flowline_checkpoint::InMemoryStore;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let graph = Arc::new(
//!     GraphBuilder::new("greeting")
//!         .channel("message", MergeKind::Replace, json!(null))
//!         .stage(StageSpec::new("compose", |_state| async {
//!             let mut update = flowline_core::PartialState::new();
//!             update.insert("message".into(), json!("hello"));
//!             Ok(update)
//!         })
//!         .with_writes(vec!["message"]))
//!         .entry("compose")
//!         .edge("compose", END)
//!         .build()?,
//! );
//!
//! let manager = WorkflowManager::new(Arc::new(InMemoryStore::new()));
//! let outcome = manager.start(graph, "user-1", None, &Default::default()).await?;
//! assert_eq!(outcome.state["message"], json!("hello"));
//! ```

pub mod channel;
pub mod engine;
pub mod error;
pub mod graph;
pub mod lifecycle;
pub mod reaper;
pub mod stage;

pub use channel::{ChannelDef, ChannelRegistry, MergeKind};
pub use engine::{Engine, ERRORS_CHANNEL};
pub use error::{Result, WorkflowError};
pub use graph::{Edge, GraphBuilder, PipelineGraph, RouterFn, END};
pub use lifecycle::{RunOutcome, WorkflowManager};
pub use reaper::{Reaper, ReaperConfig, RetentionReport};
pub use stage::{PartialState, StageError, StageExecutor, StageSpec};
