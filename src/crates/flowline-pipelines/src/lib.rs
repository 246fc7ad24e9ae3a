//! # flowline-pipelines - Prebuilt content-generation pipelines
//!
//! Two production pipelines built on `flowline-core`, plus the
//! [`TextGenerator`] seam they call for generative text:
//!
//! - [`wireframe_pipeline`] - social-ad wireframes with per-wireframe
//!   human approval
//! - [`article_pipeline`] - long-form articles with editor sign-off on
//!   the outline
//!
//! Both pipelines pause at an approval gate and use the wait-again
//! self-loop: a resume that does not satisfy the gate's requirement
//! simply pauses the thread again.

pub mod article;
pub mod provider;
pub mod wireframe;

pub use article::{article_pipeline, pending_sections};
pub use provider::{CannedGenerator, GeneratorError, TextGenerator, DEFAULT_DEADLINE};
pub use wireframe::{pending_approvals, wireframe_pipeline};
