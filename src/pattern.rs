//! Structural pattern matching over the output syntax tree.
//!
//! Patterns are immutable matcher values tested against candidate subtrees;
//! a successful match populates a [`Captures`] table mapping capture names to
//! the nodes that satisfied them. Patterns never mutate the tree.
//!
//! # Determinism
//!
//! Matching is greedy left-to-right; ties are resolved by declaration order,
//! never by node identity or hashing, so a match against the same tree is
//! reproducible across runs.
//!
//! # Backtracking
//!
//! Optional patterns inside a child collection consume one node greedily and
//! record a backtrack point (position plus capture checkpoint). When matching
//! fails deeper in the composite pattern, the engine rewinds to the most
//! recent point and retries the optional as a zero-width match. The capture
//! table is an append-only log, so a checkpoint is just its length and a
//! rollback is truncation.

use crate::arena::{Arena, NodeId};
use crate::node::{NodeData, NodeKind, Role};
use crate::resolver::{SemanticResolver, TypeIdentity};

// ═══════════════════════════════════════════════════════════════════════════
// Captures
// ═══════════════════════════════════════════════════════════════════════════

/// Named bindings produced by one top-level match attempt.
///
/// Keys are unique from the reader's perspective: the last write for a name
/// wins. Internally the table is an append-only log supporting
/// checkpoint/rollback for backtracking.
#[derive(Debug, Clone, Default)]
pub struct Captures {
    log: Vec<(String, NodeId)>,
}

impl Captures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `node` under `name`.
    pub fn record(&mut self, name: &str, node: NodeId) {
        self.log.push((name.to_string(), node));
    }

    /// The node last recorded under `name`.
    pub fn get(&self, name: &str) -> Option<NodeId> {
        self.log
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, id)| *id)
    }

    /// Current log length; pass to [`Captures::rollback`] to undo later
    /// additions.
    pub fn checkpoint(&self) -> usize {
        self.log.len()
    }

    /// Truncate the log back to a checkpoint.
    pub fn rollback(&mut self, checkpoint: usize) {
        self.log.truncate(checkpoint);
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    /// All (name, node) entries in recording order.
    pub fn entries(&self) -> &[(String, NodeId)] {
        &self.log
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Patterns
// ═══════════════════════════════════════════════════════════════════════════

/// Constraint a shape pattern places on one child slot of the candidate.
#[derive(Debug, Clone)]
pub enum ChildPattern {
    /// Match the first child occupying the role (the per-kind null sentinel
    /// when absent). Roles without a constraint are ignored.
    Single(Role, Pattern),
    /// Match the ordered collection of children occupying the role. The
    /// sequence must account for every node in the collection; optionals
    /// inside it backtrack.
    Collection(Role, Vec<Pattern>),
}

/// An immutable matcher value.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Matches a real node of the declared kind whose constrained children
    /// match recursively. Never matches a null sentinel.
    Shape {
        kind: NodeKind,
        children: Vec<ChildPattern>,
    },
    /// Records the candidate under `name` (even when the candidate is a null
    /// sentinel), then delegates to the inner pattern.
    Capture { name: String, inner: Box<Pattern> },
    /// Zero-or-one occurrences. Against a single slot it succeeds trivially
    /// on a null candidate; inside a collection it backtracks.
    Optional(Box<Pattern>),
    /// Matches anything, optionally recording it.
    Any { name: Option<String> },
    /// Matches a type reference whose resolved identity equals the target,
    /// seeing through composed-type wrappers that carry no modifiers.
    ResolvedType(TypeIdentity),
    /// Matches a node whose resolved member identity has the given declaring
    /// type and name, then delegates to the inner pattern for structure.
    ResolvedMember {
        declaring: TypeIdentity,
        name: String,
        inner: Box<Pattern>,
    },
}

/// Shape pattern over `kind` with the given child constraints.
pub fn shape(kind: NodeKind, children: Vec<ChildPattern>) -> Pattern {
    Pattern::Shape { kind, children }
}

/// Constrain one child slot.
pub fn single(role: Role, pattern: Pattern) -> ChildPattern {
    ChildPattern::Single(role, pattern)
}

/// Constrain an ordered child collection.
pub fn collection(role: Role, patterns: Vec<Pattern>) -> ChildPattern {
    ChildPattern::Collection(role, patterns)
}

/// Record whatever matches `inner` under `name`.
pub fn capture(name: &str, inner: Pattern) -> Pattern {
    Pattern::Capture {
        name: name.to_string(),
        inner: Box::new(inner),
    }
}

/// Zero-or-one occurrences of `inner`.
pub fn optional(inner: Pattern) -> Pattern {
    Pattern::Optional(Box::new(inner))
}

/// Match anything.
pub fn any() -> Pattern {
    Pattern::Any { name: None }
}

/// Match anything and record it under `name`.
pub fn any_named(name: &str) -> Pattern {
    Pattern::Any {
        name: Some(name.to_string()),
    }
}

/// Match a type reference resolving to `namespace.name`, tolerating redundant
/// composed-type wrappers introduced elsewhere in the pipeline.
pub fn type_identity(namespace: &str, name: &str) -> Pattern {
    Pattern::ResolvedType(TypeIdentity::new(namespace, name))
}

/// Declaring type of the runtime type-handle lookup.
pub const TYPE_HANDLE_DECLARING: (&str, &str) = ("System", "Type");
/// Member name of the runtime type-handle lookup.
pub const TYPE_HANDLE_LOOKUP: &str = "GetTypeFromHandle";

/// Match the boxed-token idiom: an invocation of the runtime type-handle
/// lookup with exactly one argument, recording that argument under
/// `argument_name`.
pub fn boxed_token_access(argument_name: &str) -> Pattern {
    Pattern::ResolvedMember {
        declaring: TypeIdentity::new(TYPE_HANDLE_DECLARING.0, TYPE_HANDLE_DECLARING.1),
        name: TYPE_HANDLE_LOOKUP.to_string(),
        inner: Box::new(shape(
            NodeKind::Invocation,
            vec![collection(Role::Argument, vec![any_named(argument_name)])],
        )),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Matcher
// ═══════════════════════════════════════════════════════════════════════════

/// Backtrack point: the optional at `pat_idx` consumed `node_idx` greedily;
/// `checkpoint` undoes every capture recorded since.
struct BacktrackPoint {
    pat_idx: usize,
    node_idx: usize,
    checkpoint: usize,
}

/// Runs patterns against a tree, consulting the injected resolver for
/// semantic predicates.
pub struct Matcher<'a> {
    arena: &'a Arena,
    resolver: &'a dyn SemanticResolver,
}

impl<'a> Matcher<'a> {
    pub fn new(arena: &'a Arena, resolver: &'a dyn SemanticResolver) -> Self {
        Self { arena, resolver }
    }

    /// Test `pattern` against `candidate`. On success the capture table holds
    /// every binding recorded along the accepted path.
    pub fn matches(&self, pattern: &Pattern, candidate: NodeId) -> Option<Captures> {
        let mut captures = Captures::new();
        if self.try_match(pattern, candidate, &mut captures) {
            Some(captures)
        } else {
            None
        }
    }

    fn try_match(&self, pattern: &Pattern, node: NodeId, captures: &mut Captures) -> bool {
        match pattern {
            Pattern::Any { name } => {
                if let Some(name) = name {
                    captures.record(name, node);
                }
                true
            }
            Pattern::Capture { name, inner } => {
                // Recorded before delegating so rewrite code can always ask
                // "what matched" by name, null included.
                captures.record(name, node);
                self.try_match(inner, node, captures)
            }
            Pattern::Optional(inner) => {
                if self.arena.is_null(node) {
                    self.bind_absent(inner, captures);
                    return true;
                }
                self.try_match(inner, node, captures)
            }
            Pattern::Shape { kind, children } => {
                if self.arena.is_null(node) || self.arena.kind(node) != *kind {
                    return false;
                }
                for child in children {
                    match child {
                        ChildPattern::Single(role, pat) => {
                            let candidate = self.arena.child_or_null(node, *role);
                            if !self.try_match(pat, candidate, captures) {
                                return false;
                            }
                        }
                        ChildPattern::Collection(role, pats) => {
                            let nodes = self.arena.children_with_role(node, *role);
                            if !self.match_sequence(pats, &nodes, captures) {
                                return false;
                            }
                        }
                    }
                }
                true
            }
            Pattern::ResolvedType(target) => {
                let mut current = node;
                // See through wrappers that add no actual modifiers.
                while let NodeData::ComposedType {
                    has_modifiers: false,
                } = self.arena.data(current)
                {
                    current = self.arena.child_or_null(current, Role::Element);
                }
                if self.arena.is_null(current)
                    || self.arena.kind(current) != NodeKind::TypeReference
                {
                    return false;
                }
                self.resolver.resolve_type(current).as_ref() == Some(target)
            }
            Pattern::ResolvedMember {
                declaring,
                name,
                inner,
            } => match self.resolver.resolve_member(node) {
                Some(member) if member.declaring_type == *declaring && member.name == *name => {
                    self.try_match(inner, node, captures)
                }
                _ => false,
            },
        }
    }

    /// Match an ordered pattern sequence against a child collection. The
    /// sequence must consume the whole collection; optionals are tried
    /// greedily and rewound on later failure.
    fn match_sequence(
        &self,
        patterns: &[Pattern],
        nodes: &[NodeId],
        captures: &mut Captures,
    ) -> bool {
        let mut stack: Vec<BacktrackPoint> = Vec::new();
        let mut pat_idx = 0;
        let mut node_idx = 0;

        loop {
            if pat_idx == patterns.len() {
                if node_idx == nodes.len() {
                    return true;
                }
            } else {
                match &patterns[pat_idx] {
                    Pattern::Optional(inner) => {
                        let mut consumed = false;
                        if node_idx < nodes.len() {
                            let checkpoint = captures.checkpoint();
                            if self.try_match(inner, nodes[node_idx], captures) {
                                stack.push(BacktrackPoint {
                                    pat_idx,
                                    node_idx,
                                    checkpoint,
                                });
                                pat_idx += 1;
                                node_idx += 1;
                                consumed = true;
                            } else {
                                captures.rollback(checkpoint);
                            }
                        }
                        if consumed {
                            continue;
                        }
                        // Zero-width alternative.
                        self.bind_absent(inner, captures);
                        pat_idx += 1;
                        continue;
                    }
                    pattern => {
                        if node_idx < nodes.len() {
                            let checkpoint = captures.checkpoint();
                            if self.try_match(pattern, nodes[node_idx], captures) {
                                pat_idx += 1;
                                node_idx += 1;
                                continue;
                            }
                            captures.rollback(checkpoint);
                        }
                    }
                }
            }

            // Dead end: rewind the most recent greedy optional to zero.
            let Some(point) = stack.pop() else {
                return false;
            };
            captures.rollback(point.checkpoint);
            if let Pattern::Optional(inner) = &patterns[point.pat_idx] {
                self.bind_absent(inner, captures);
            }
            pat_idx = point.pat_idx + 1;
            node_idx = point.node_idx;
        }
    }

    /// Bind captures inside a pattern that matched zero nodes to the
    /// appropriate null sentinel, so rewrite code can still look them up.
    fn bind_absent(&self, pattern: &Pattern, captures: &mut Captures) {
        match pattern {
            Pattern::Any { name: Some(name) } => {
                captures.record(name, self.arena.null(NodeKind::Placeholder));
            }
            Pattern::Any { name: None } => {}
            Pattern::Capture { name, inner } => {
                captures.record(name, self.null_for(inner));
                self.bind_absent(inner, captures);
            }
            Pattern::Optional(inner) => self.bind_absent(inner, captures),
            Pattern::Shape { children, .. } => {
                for child in children {
                    match child {
                        ChildPattern::Single(_, pat) => self.bind_absent(pat, captures),
                        ChildPattern::Collection(_, pats) => {
                            for pat in pats {
                                self.bind_absent(pat, captures);
                            }
                        }
                    }
                }
            }
            Pattern::ResolvedMember { inner, .. } => self.bind_absent(inner, captures),
            Pattern::ResolvedType(_) => {}
        }
    }

    /// The null sentinel a capture over `pattern` binds to when nothing
    /// matched: the declared kind when the pattern names one, otherwise the
    /// placeholder sentinel.
    fn null_for(&self, pattern: &Pattern) -> NodeId {
        match pattern {
            Pattern::Shape { kind, .. } => self.arena.null(*kind),
            Pattern::Capture { inner, .. } | Pattern::Optional(inner) => self.null_for(inner),
            _ => self.arena.null(NodeKind::Placeholder),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
