//! Ordered transform pipeline driven to a fixed point.
//!
//! One [`Pipeline`] instance owns one run over one tree: transforms execute
//! in a fixed declared order, once per pass, until a whole pass changes
//! nothing. Named-argument introduction is site-local rather than tree-wide,
//! so the driver applies it once per caller-supplied [`InliningSite`] before
//! the tree-wide passes begin.
//!
//! Cancellation is cooperative: the driver checks at pass granularity, and
//! transforms with potentially long recognition loops check per iteration.
//! A partially rewritten tree is always structurally valid because every
//! node mutation is a single attach/detach.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::arena::{Arena, NodeId};
use crate::resolver::SemanticResolver;
use crate::stepper::Stepper;
use crate::transforms::{named_args, QueryNormalization, QueryReconstruction};
use crate::RewriteError;

// ═══════════════════════════════════════════════════════════════════════════
// Options
// ═══════════════════════════════════════════════════════════════════════════

/// Recognized rewrite options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RewriteOptions {
    /// Reconstruct declarative query expressions from operator chains.
    pub query_expressions: bool,
    /// Introduce named arguments to pin evaluation order.
    pub named_arguments: bool,
    /// Synthesize a discard-bound assignment when a degenerate query is used
    /// as a statement.
    pub discards: bool,
}

impl Default for RewriteOptions {
    fn default() -> Self {
        Self {
            query_expressions: true,
            named_arguments: true,
            discards: true,
        }
    }
}

impl RewriteOptions {
    /// Create a new builder for `RewriteOptions`.
    pub fn builder() -> RewriteOptionsBuilder {
        RewriteOptionsBuilder::default()
    }

    /// Extract options from a host settings object; unrecognized or missing
    /// fields keep their defaults.
    pub fn from_settings(settings: &serde_json::Value) -> Self {
        serde_json::from_value(settings.clone()).unwrap_or_default()
    }
}

/// Builder for `RewriteOptions` with fluent API.
#[derive(Default)]
pub struct RewriteOptionsBuilder {
    query_expressions: Option<bool>,
    named_arguments: Option<bool>,
    discards: Option<bool>,
}

impl RewriteOptionsBuilder {
    pub fn query_expressions(mut self, enabled: bool) -> Self {
        self.query_expressions = Some(enabled);
        self
    }

    pub fn named_arguments(mut self, enabled: bool) -> Self {
        self.named_arguments = Some(enabled);
        self
    }

    pub fn discards(mut self, enabled: bool) -> Self {
        self.discards = Some(enabled);
        self
    }

    pub fn build(self) -> RewriteOptions {
        let defaults = RewriteOptions::default();
        RewriteOptions {
            query_expressions: self.query_expressions.unwrap_or(defaults.query_expressions),
            named_arguments: self.named_arguments.unwrap_or(defaults.named_arguments),
            discards: self.discards.unwrap_or(defaults.discards),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Cancellation
// ═══════════════════════════════════════════════════════════════════════════

/// Cooperative cancellation signal shared between a host and one pipeline
/// run. Cloning yields a handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; the pipeline surfaces it at the next check.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Surface a cancellation condition if one is pending.
    pub fn check(&self) -> Result<(), RewriteError> {
        if self.is_cancelled() {
            Err(RewriteError::Cancelled)
        } else {
            Ok(())
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Transform contract
// ═══════════════════════════════════════════════════════════════════════════

/// Everything a transform may touch during one run: the tree, the injected
/// resolver, the options, the stepper, and the cancellation flag.
pub struct TransformContext<'a> {
    pub arena: &'a mut Arena,
    pub resolver: &'a dyn SemanticResolver,
    pub options: &'a RewriteOptions,
    pub stepper: &'a mut Stepper,
    pub cancel: &'a Cancellation,
    next_local: usize,
}

impl<'a> TransformContext<'a> {
    pub fn new(
        arena: &'a mut Arena,
        resolver: &'a dyn SemanticResolver,
        options: &'a RewriteOptions,
        stepper: &'a mut Stepper,
        cancel: &'a Cancellation,
    ) -> Self {
        Self {
            arena,
            resolver,
            options,
            stepper,
            cancel,
            next_local: 0,
        }
    }

    /// A synthetic local name unique within this run (`v_0`, `v_1`, ...).
    pub fn fresh_local(&mut self) -> String {
        let name = format!("v_{}", self.next_local);
        self.next_local += 1;
        name
    }
}

/// One rewrite rule in the pipeline.
///
/// `run` visits the tree region it cares about and returns whether it changed
/// anything. Declining to rewrite is the normal outcome and is not an error;
/// only step-limit and cancellation conditions propagate.
pub trait Transform {
    fn name(&self) -> &'static str;

    fn run(&mut self, root: NodeId, ctx: &mut TransformContext<'_>) -> Result<bool, RewriteError>;
}

// ═══════════════════════════════════════════════════════════════════════════
// Driver
// ═══════════════════════════════════════════════════════════════════════════

/// A call argument that must be pinned to preserve evaluation order, as
/// reported by the external inlining machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InliningSite {
    /// The invocation being fed.
    pub call: NodeId,
    /// Zero-based index of the argument whose evaluation point must be
    /// pinned.
    pub argument_index: usize,
}

/// What one pipeline run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassSummary {
    /// Tree-wide passes executed, the final no-change pass included.
    pub passes: usize,
    /// Total individual rewrites recorded.
    pub rewrites: usize,
}

/// The ordered transform driver.
pub struct Pipeline {
    transforms: Vec<Box<dyn Transform>>,
}

impl Pipeline {
    /// The standard transform order: query reconstruction, then the
    /// degenerate-query normalization that depends on it having run.
    pub fn standard() -> Self {
        Self {
            transforms: vec![
                Box::new(QueryReconstruction),
                Box::new(QueryNormalization),
            ],
        }
    }

    /// A pipeline over a custom transform list, in the given order.
    pub fn with_transforms(transforms: Vec<Box<dyn Transform>>) -> Self {
        Self { transforms }
    }

    /// Run the pipeline over the tree at `root` to a fixed point.
    ///
    /// Named-argument sites are applied first, once each, in the given
    /// order; then the tree-wide transforms repeat until a whole pass
    /// changes nothing. The mutated tree is the output; the summary reports
    /// pass and rewrite counts.
    pub fn run(
        &mut self,
        ctx: &mut TransformContext<'_>,
        root: NodeId,
        named_argument_sites: &[InliningSite],
    ) -> Result<PassSummary, RewriteError> {
        let steps_before = ctx.stepper.step_count();

        if !named_argument_sites.is_empty() {
            ctx.stepper.start_group("introduce named arguments", None);
            let outcome = self.run_sites(ctx, named_argument_sites);
            ctx.stepper.end_group(false);
            outcome?;
        }

        let mut passes = 0;
        loop {
            ctx.cancel.check()?;
            passes += 1;
            let mut changed = false;
            ctx.stepper.start_group(format!("pass {passes}"), Some(root));
            let outcome = self.run_pass(ctx, root, &mut changed);
            ctx.stepper.end_group(false);
            outcome?;
            debug!(pass = passes, changed, "pipeline pass finished");
            if !changed {
                break;
            }
        }

        Ok(PassSummary {
            passes,
            rewrites: ctx.stepper.step_count() - steps_before,
        })
    }

    fn run_sites(
        &mut self,
        ctx: &mut TransformContext<'_>,
        sites: &[InliningSite],
    ) -> Result<(), RewriteError> {
        for site in sites {
            ctx.cancel.check()?;
            let pinned = named_args::introduce(ctx, *site)?;
            debug!(?site, pinned, "named-argument site processed");
        }
        Ok(())
    }

    fn run_pass(
        &mut self,
        ctx: &mut TransformContext<'_>,
        root: NodeId,
        changed: &mut bool,
    ) -> Result<(), RewriteError> {
        for transform in &mut self.transforms {
            ctx.stepper.start_group(transform.name(), Some(root));
            let outcome = transform.run(root, ctx);
            ctx.stepper.end_group(false);
            *changed |= outcome?;
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
