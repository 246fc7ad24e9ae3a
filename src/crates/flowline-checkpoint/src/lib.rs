//! # flowline-checkpoint - Durable thread and checkpoint storage
//!
//! This crate owns the durable data model of the flowline workflow engine
//! and the storage seam it is persisted through:
//!
//! - [`Thread`] - one resumable execution context with a lifecycle status,
//!   a latest-checkpoint pointer, and operational metadata
//! - [`Checkpoint`] - an immutable snapshot of workflow state, chained to
//!   its parent so each thread has a single linear history
//! - [`OperationLog`] - per-event operational records with independent
//!   retention
//! - [`WorkflowStore`] - the async storage trait the engine, lifecycle
//!   manager, and reaper operate through
//! - [`InMemoryStore`] - thread-safe reference implementation for tests and
//!   development
//!
//! The store enforces the engine's one crucial write invariant: an append
//! only commits when its parent id matches the thread's current latest
//! checkpoint, so two processes racing to advance the same thread can never
//! fork its history. The loser observes [`StoreError::Conflict`] and
//! re-fetches.

pub mod checkpoint;
pub mod error;
pub mod log;
pub mod memory;
pub mod store;
pub mod thread;

pub use checkpoint::{Checkpoint, CheckpointId, CheckpointMetadata, WorkflowState};
pub use error::{Result, StoreError};
pub use log::OperationLog;
pub use memory::InMemoryStore;
pub use store::{ThreadFilter, WorkflowStore};
pub use thread::{Thread, ThreadId, ThreadStatus};
