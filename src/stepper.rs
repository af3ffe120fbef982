//! Step recording for diagnostic replay of the transform pipeline.
//!
//! Every indivisible rewrite announces itself through [`Stepper::step`]
//! immediately before mutating the tree; the stepper only records, it never
//! rewrites. Steps carry a human-readable description, an optional anchor
//! node, and a half-open `[begin, end)` range of global step indices. Groups
//! nest, giving an external observer a hierarchy to replay.
//!
//! The step counter doubles as the runaway guard: when it reaches the
//! configured limit, an optional hook fires (a development-time debugger
//! attachment point) and the current rewrite aborts with
//! [`RewriteError::StepLimitReached`] instead of hanging the pipeline.

use crate::arena::NodeId;
use crate::RewriteError;

/// One recorded step or group of steps.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub description: String,
    /// Node the step happened at, when one is meaningful.
    pub anchor: Option<NodeId>,
    /// First global step index covered by this record.
    pub begin: usize,
    /// One past the last global step index covered by this record.
    pub end: usize,
    /// Nested steps, for group records.
    pub children: Vec<StepRecord>,
}

impl StepRecord {
    fn leaf(description: String, anchor: Option<NodeId>, index: usize) -> Self {
        Self {
            description,
            anchor,
            begin: index,
            end: index + 1,
            children: Vec::new(),
        }
    }

    fn group(description: String, anchor: Option<NodeId>, begin: usize) -> Self {
        Self {
            description,
            anchor,
            begin,
            end: begin,
            children: Vec::new(),
        }
    }
}

/// Hook invoked when the step counter reaches its limit.
pub type LimitHook = Box<dyn FnMut(usize)>;

/// Records numbered steps and nested groups for one decompilation request.
#[derive(Default)]
pub struct Stepper {
    roots: Vec<StepRecord>,
    /// Child-index path to the innermost open group.
    open: Vec<usize>,
    counter: usize,
    limit: Option<usize>,
    on_limit: Option<LimitHook>,
}

impl Stepper {
    /// A stepper with no step limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// A stepper that aborts once `limit` steps have been recorded.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Install a hook to run when the limit is reached, before the abort
    /// surfaces. Replaces the source tradition of breaking into an attached
    /// debugger with something the host controls.
    pub fn on_limit(&mut self, hook: LimitHook) {
        self.on_limit = Some(hook);
    }

    /// Steps recorded so far.
    pub fn step_count(&self) -> usize {
        self.counter
    }

    /// Depth of currently open groups.
    pub fn open_depth(&self) -> usize {
        self.open.len()
    }

    /// The recorded step tree. Top-level records only; nested steps hang off
    /// their groups.
    pub fn records(&self) -> &[StepRecord] {
        &self.roots
    }

    fn list_at(&mut self, path: &[usize]) -> &mut Vec<StepRecord> {
        let mut list = &mut self.roots;
        for &index in path {
            list = &mut list[index].children;
        }
        list
    }

    /// Record one step. Called immediately before an indivisible rewrite.
    pub fn step(
        &mut self,
        description: impl Into<String>,
        anchor: Option<NodeId>,
    ) -> Result<(), RewriteError> {
        if let Some(limit) = self.limit {
            if self.counter >= limit {
                if let Some(hook) = self.on_limit.as_mut() {
                    hook(self.counter);
                }
                return Err(RewriteError::StepLimitReached { limit });
            }
        }
        let record = StepRecord::leaf(description.into(), anchor, self.counter);
        let path = self.open.clone();
        self.list_at(&path).push(record);
        self.counter += 1;
        Ok(())
    }

    /// Open a group; subsequent steps and groups nest under it until the
    /// matching [`Stepper::end_group`].
    pub fn start_group(&mut self, description: impl Into<String>, anchor: Option<NodeId>) {
        let record = StepRecord::group(description.into(), anchor, self.counter);
        let path = self.open.clone();
        let list = self.list_at(&path);
        list.push(record);
        let index = list.len() - 1;
        self.open.push(index);
    }

    /// Close the most recently opened group, recording its end index.
    ///
    /// A group that recorded no child steps is pruned unless `keep_if_empty`.
    /// The pruned group must be the last element of its parent's list: while
    /// it was open nothing could have been appended after it without becoming
    /// its child, so any other position signals a defect in the caller.
    pub fn end_group(&mut self, keep_if_empty: bool) {
        let index = self
            .open
            .pop()
            .expect("end_group called without an open group");
        let counter = self.counter;
        let path = self.open.clone();
        let list = self.list_at(&path);
        list[index].end = counter;
        if list[index].children.is_empty() && !keep_if_empty {
            assert_eq!(
                index,
                list.len() - 1,
                "empty step group must be the last recorded child"
            );
            list.remove(index);
        }
    }
}

impl std::fmt::Debug for Stepper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stepper")
            .field("counter", &self.counter)
            .field("limit", &self.limit)
            .field("open_depth", &self.open.len())
            .field("roots", &self.roots.len())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
