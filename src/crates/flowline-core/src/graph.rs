//! Pipeline graph definition and build-time validation
//!
//! A [`PipelineGraph`] is an ordered set of stages, the edges between them
//! (direct or conditional), a set of *interrupt points* the engine pauses
//! before, an entry stage, and the channel registry describing the state
//! those stages flow through.
//!
//! Graphs are plain values returned by [`GraphBuilder::build`] and passed
//! into the engine at call time, so multiple graphs and engines coexist in
//! tests without global state. `build` rejects malformed graphs with a
//! configuration error, which aborts process startup - a bad edge target is
//! never discovered at request time.
//!
//! # Validation rules
//!
//! - the entry stage is declared and is not an interrupt point (you cannot
//!   interrupt before the first stage)
//! - every edge source, edge target, and conditional branch target names a
//!   declared stage (or [`END`])
//! - every declared stage has exactly one outgoing edge
//! - every interrupt point names a declared stage
//! - every channel a stage declares in its write set is registered

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use flowline_checkpoint::WorkflowState;

use crate::channel::{ChannelRegistry, MergeKind};
use crate::error::{Result, WorkflowError};
use crate::stage::StageSpec;

/// Terminal marker - an edge to `END` completes the thread
pub const END: &str = "__end__";

/// Router function for conditional edges
///
/// Must be pure and total: every label it can return has to appear in the
/// branch table it was registered with.
pub type RouterFn = Arc<dyn Fn(&WorkflowState) -> String + Send + Sync>;

/// Edge from one stage to the next
#[derive(Clone)]
pub enum Edge {
    /// Unconditional transition to a stage (or [`END`])
    Direct(String),

    /// Routing function evaluated against a fixed label-to-target table
    Conditional {
        /// Returns a branch label for the current state
        router: RouterFn,
        /// Label -> target stage (or [`END`])
        branches: HashMap<String, String>,
    },
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Edge::Direct(to) => f.debug_tuple("Direct").field(to).finish(),
            Edge::Conditional { branches, .. } => f
                .debug_struct("Conditional")
                .field("router", &"<function>")
                .field("branches", branches)
                .finish(),
        }
    }
}

/// A validated, executable pipeline definition
#[derive(Debug, Clone)]
pub struct PipelineGraph {
    /// Pipeline name, recorded on every thread it runs
    pub name: String,
    /// Stage to start execution at
    pub entry: String,
    /// All declared stages by name
    pub stages: HashMap<String, StageSpec>,
    /// Outgoing edge per stage
    pub edges: HashMap<String, Edge>,
    /// Stages the engine pauses before, awaiting external input
    pub interrupt_before: HashSet<String>,
    /// Per-field merge table for this pipeline's state
    pub registry: ChannelRegistry,
}

impl PipelineGraph {
    /// Resolve the next stage after `from` for the given state
    ///
    /// Returns [`END`] when the pipeline is complete.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Configuration`] if a conditional router
    /// returns a label missing from its branch table. Routers are required
    /// to be total, so this indicates a bug in the pipeline definition.
    pub fn next_stage(&self, from: &str, state: &WorkflowState) -> Result<String> {
        let edge = self.edges.get(from).ok_or_else(|| {
            WorkflowError::Configuration(format!("stage '{from}' has no outgoing edge"))
        })?;
        match edge {
            Edge::Direct(to) => Ok(to.clone()),
            Edge::Conditional { router, branches } => {
                let label = router(state);
                branches.get(&label).cloned().ok_or_else(|| {
                    WorkflowError::Configuration(format!(
                        "router for stage '{from}' returned unmapped label '{label}'"
                    ))
                })
            }
        }
    }

    /// Whether execution pauses before this stage
    pub fn is_interrupt(&self, stage: &str) -> bool {
        self.interrupt_before.contains(stage)
    }
}

/// Builder for [`PipelineGraph`] with build-time validation
pub struct GraphBuilder {
    name: String,
    entry: Option<String>,
    stages: HashMap<String, StageSpec>,
    edges: HashMap<String, Edge>,
    interrupt_before: HashSet<String>,
    registry: ChannelRegistry,
}

impl GraphBuilder {
    /// Start building a pipeline with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry: None,
            stages: HashMap::new(),
            edges: HashMap::new(),
            interrupt_before: HashSet::new(),
            registry: ChannelRegistry::new(),
        }
    }

    /// Register a state channel
    pub fn channel(
        mut self,
        field: impl Into<String>,
        kind: MergeKind,
        default: serde_json::Value,
    ) -> Self {
        self.registry.register(field, kind, default);
        self
    }

    /// Declare a stage
    pub fn stage(mut self, spec: StageSpec) -> Self {
        self.stages.insert(spec.name.clone(), spec);
        self
    }

    /// Set the entry stage
    pub fn entry(mut self, stage: impl Into<String>) -> Self {
        self.entry = Some(stage.into());
        self
    }

    /// Add a direct edge
    pub fn edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.insert(from.into(), Edge::Direct(to.into()));
        self
    }

    /// Add a conditional edge with its branch table
    pub fn conditional_edge<F>(
        mut self,
        from: impl Into<String>,
        router: F,
        branches: HashMap<String, String>,
    ) -> Self
    where
        F: Fn(&WorkflowState) -> String + Send + Sync + 'static,
    {
        self.edges.insert(
            from.into(),
            Edge::Conditional {
                router: Arc::new(router),
                branches,
            },
        );
        self
    }

    /// Mark a stage as an interrupt point
    pub fn interrupt_before(mut self, stage: impl Into<String>) -> Self {
        self.interrupt_before.insert(stage.into());
        self
    }

    /// Validate and produce the graph
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Configuration`] describing the first
    /// violation found. Treat this as fatal to startup.
    pub fn build(self) -> Result<PipelineGraph> {
        let entry = self
            .entry
            .ok_or_else(|| WorkflowError::Configuration("no entry stage set".to_string()))?;

        if !self.stages.contains_key(&entry) {
            return Err(WorkflowError::Configuration(format!(
                "entry stage '{entry}' is not declared"
            )));
        }
        if self.interrupt_before.contains(&entry) {
            return Err(WorkflowError::Configuration(format!(
                "entry stage '{entry}' cannot be an interrupt point"
            )));
        }

        for (from, edge) in &self.edges {
            if !self.stages.contains_key(from) {
                return Err(WorkflowError::Configuration(format!(
                    "edge source '{from}' is not a declared stage"
                )));
            }
            match edge {
                Edge::Direct(to) => {
                    if to != END && !self.stages.contains_key(to) {
                        return Err(WorkflowError::Configuration(format!(
                            "edge target '{to}' is not a declared stage"
                        )));
                    }
                }
                Edge::Conditional { branches, .. } => {
                    if branches.is_empty() {
                        return Err(WorkflowError::Configuration(format!(
                            "conditional edge from '{from}' has no branches"
                        )));
                    }
                    for to in branches.values() {
                        if to != END && !self.stages.contains_key(to) {
                            return Err(WorkflowError::Configuration(format!(
                                "branch target '{to}' is not a declared stage"
                            )));
                        }
                    }
                }
            }
        }

        for stage in self.stages.keys() {
            if !self.edges.contains_key(stage) {
                return Err(WorkflowError::Configuration(format!(
                    "stage '{stage}' has no outgoing edge"
                )));
            }
        }

        for stage in &self.interrupt_before {
            if !self.stages.contains_key(stage) {
                return Err(WorkflowError::Configuration(format!(
                    "interrupt point '{stage}' is not a declared stage"
                )));
            }
        }

        for spec in self.stages.values() {
            for field in &spec.writes {
                if !self.registry.contains(field) {
                    return Err(WorkflowError::Configuration(format!(
                        "stage '{}' writes unregistered channel '{field}'",
                        spec.name
                    )));
                }
            }
        }

        Ok(PipelineGraph {
            name: self.name,
            entry,
            stages: self.stages,
            edges: self.edges,
            interrupt_before: self.interrupt_before,
            registry: self.registry,
        })
    }
}
