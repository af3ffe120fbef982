//! Tree-rewriting core of a decompilation pipeline.
//!
//! The host builds a semantically annotated syntax tree from lower-level
//! reconstruction stages; this crate owns the rewrites that raise it to
//! idiomatic density: a structural pattern-matching engine, a steppable
//! transform driver, and the transforms that rebuild declarative query
//! expressions and pin evaluation order with named arguments.
//!
//! # Module Structure
//!
//! - [`arena`]: index-based tree storage with single-parent enforcement and
//!   per-kind null sentinels
//! - [`node`]: node kinds, payloads, and child roles
//! - [`resolver`]: read-only semantic lookup injected by the host
//! - [`pattern`]: composable matchers with captures and backtracking
//! - [`stepper`]: step recording, grouping, and the runaway-rewrite limit
//! - [`pipeline`]: ordered transforms driven to a fixed point
//! - [`transforms`]: the rewrite rules themselves

use thiserror::Error;

pub mod arena;
pub mod node;
pub mod pattern;
pub mod pipeline;
pub mod resolver;
pub mod stepper;
pub mod transforms;

pub use arena::{Arena, NodeId};
pub use node::{NodeData, NodeKind, Role};
pub use pattern::{Captures, Matcher, Pattern};
pub use pipeline::{
    Cancellation, InliningSite, PassSummary, Pipeline, RewriteOptions, Transform,
    TransformContext,
};
pub use resolver::{MemberIdentity, SemanticResolver, TypeIdentity};
pub use stepper::Stepper;

/// Conditions that abort a rewrite run.
///
/// Declining to rewrite is never an error; transforms report it as a `false`
/// change flag. Only the two run-level aborts surface here.
#[derive(Debug, Error)]
pub enum RewriteError {
    /// The configured step limit was reached before the run finished,
    /// bounding a runaway or looping transform.
    #[error("step limit of {limit} reached")]
    StepLimitReached { limit: usize },

    /// The host requested cancellation.
    #[error("rewrite cancelled")]
    Cancelled,
}
