//! Channel registry - per-field merge semantics for workflow state
//!
//! Every field of a pipeline's [`WorkflowState`] is a *channel*: a name, a
//! default value, and a [`MergeKind`] describing how a partial update from a
//! stage combines with the existing value. The registry is a finite
//! tagged-variant table matched by the engine rather than a map of stored
//! closures, which keeps it serializable and testable in isolation.
//!
//! # Merge kinds
//!
//! | Kind | Behavior |
//! |------|----------|
//! | `Replace` | New value wins if present, otherwise the old value is kept |
//! | `Append` | New elements are concatenated onto the existing sequence |
//! | `ShallowMerge` | New key/value pairs overwrite matching keys of a map |
//! | `Accumulate` | New elements are unioned in; nothing is ever dropped |
//!
//! All merges are pure and total over `(old, new)`: either side may be
//! absent on the first invocation, in which case the registered default
//! stands in.
//!
//! Merging a field that was never registered is a configuration error, not
//! a silently dropped update. Graph validation rejects such fields at build
//! time, so a validated graph never hits that path at run time.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use flowline_checkpoint::WorkflowState;

use crate::error::{Result, WorkflowError};

/// How a partial update to one channel combines with the existing value
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MergeKind {
    /// New value wins if present, else the old value is kept
    Replace,
    /// New elements are concatenated to the existing ordered sequence
    Append,
    /// New key/value pairs overwrite matching keys; other keys are preserved
    ShallowMerge,
    /// New elements are unioned into existing ones without truncation
    ///
    /// Used for error lists: errors are never dropped, and re-delivering
    /// the same element is a no-op.
    Accumulate,
}

/// One registered channel: merge kind plus default value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelDef {
    /// Merge semantics for this channel
    pub kind: MergeKind,
    /// Value used when neither old nor new state carries the field
    pub default: Value,
}

/// Per-field merge-function table for one pipeline's state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelRegistry {
    channels: HashMap<String, ChannelDef>,
}

impl ChannelRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel with its merge kind and default value
    ///
    /// Re-registering a name overwrites the previous definition.
    pub fn register(&mut self, field: impl Into<String>, kind: MergeKind, default: Value) {
        self.channels
            .insert(field.into(), ChannelDef { kind, default });
    }

    /// Whether a channel with this name is registered
    pub fn contains(&self, field: &str) -> bool {
        self.channels.contains_key(field)
    }

    /// Names of all registered channels
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    /// Build the initial state: every channel at its default, then the
    /// caller's input merged on top
    pub fn initial_state(&self, input: &WorkflowState) -> Result<WorkflowState> {
        let defaults: WorkflowState = self
            .channels
            .iter()
            .map(|(name, def)| (name.clone(), def.default.clone()))
            .collect();
        self.merge_all(&defaults, input)
    }

    /// Merge a sparse partial update into the existing state
    ///
    /// Fields absent from `partial` pass through unchanged from `old`,
    /// falling back to the registered default when `old` lacks them too.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Configuration`] when `partial` carries a
    /// field no channel was registered for. Graph validation prevents this
    /// for declared stage writes; hitting it means the configuration and
    /// the stage disagree.
    pub fn merge_all(&self, old: &WorkflowState, partial: &WorkflowState) -> Result<WorkflowState> {
        for field in partial.keys() {
            if !self.contains(field) {
                return Err(WorkflowError::Configuration(format!(
                    "update for unregistered channel '{field}'"
                )));
            }
        }

        let mut merged = WorkflowState::new();
        for (name, def) in &self.channels {
            let existing = old.get(name).unwrap_or(&def.default);
            let value = match partial.get(name) {
                Some(update) => merge_field(def.kind, existing, update),
                None => existing.clone(),
            };
            merged.insert(name.clone(), value);
        }
        Ok(merged)
    }
}

/// Apply one merge kind to a single field
fn merge_field(kind: MergeKind, old: &Value, new: &Value) -> Value {
    match kind {
        MergeKind::Replace => {
            if new.is_null() {
                old.clone()
            } else {
                new.clone()
            }
        }
        MergeKind::Append => {
            let mut items = as_elements(old);
            items.extend(as_elements(new));
            Value::Array(items)
        }
        MergeKind::ShallowMerge => {
            let mut map = match old {
                Value::Object(m) => m.clone(),
                _ => serde_json::Map::new(),
            };
            if let Value::Object(updates) = new {
                for (k, v) in updates {
                    map.insert(k.clone(), v.clone());
                }
            }
            Value::Object(map)
        }
        MergeKind::Accumulate => {
            let mut items = as_elements(old);
            for item in as_elements(new) {
                if !items.contains(&item) {
                    items.push(item);
                }
            }
            Value::Array(items)
        }
    }
}

/// Treat a value as a sequence: arrays as-is, null as empty, anything else
/// as a single element
fn as_elements(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}
