//! Injected semantic-resolution side channel.
//!
//! The rewriting core never resolves types or members itself; it consults a
//! [`SemanticResolver`] supplied by the host (the layer that read the binary
//! metadata and annotated the tree). Resolvers are read-only collaborators:
//! pattern predicates query them, nothing in this crate mutates them.

use std::collections::HashMap;

use crate::arena::NodeId;

/// Resolved identity of a type: namespace plus simple name, independent of
/// surface syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeIdentity {
    pub namespace: String,
    pub name: String,
}

impl TypeIdentity {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

/// What sort of callable a resolved member is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Method,
    Constructor,
    Operator,
    Accessor,
}

/// What sort of type declares a resolved member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclaringTypeKind {
    Class,
    Struct,
    Interface,
    Delegate,
    AnonymousType,
}

/// Resolved identity of an invoked member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberIdentity {
    pub name: String,
    pub declaring_type: TypeIdentity,
    pub declaring_kind: DeclaringTypeKind,
    pub kind: MemberKind,
    /// Declared parameter names, `None` for a parameter without one.
    pub parameter_names: Vec<Option<String>>,
    pub is_variadic: bool,
    /// Whether calls to this member take a receiver.
    pub is_instance: bool,
}

/// Read-only lookup from tree nodes to semantic identities.
pub trait SemanticResolver {
    /// Resolve the type identity of a type-reference node.
    fn resolve_type(&self, node: NodeId) -> Option<TypeIdentity>;

    /// Resolve the member identity of an invocation node.
    fn resolve_member(&self, node: NodeId) -> Option<MemberIdentity>;
}

/// Table-backed resolver.
///
/// Hosts that already computed identities per node can load them here; tests
/// use it to pin down exactly what the core may see.
#[derive(Debug, Default)]
pub struct MapResolver {
    types: HashMap<NodeId, TypeIdentity>,
    members: HashMap<NodeId, MemberIdentity>,
}

impl MapResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the type identity of `node`.
    pub fn insert_type(&mut self, node: NodeId, identity: TypeIdentity) {
        self.types.insert(node, identity);
    }

    /// Record the member identity of `node`.
    pub fn insert_member(&mut self, node: NodeId, identity: MemberIdentity) {
        self.members.insert(node, identity);
    }
}

impl SemanticResolver for MapResolver {
    fn resolve_type(&self, node: NodeId) -> Option<TypeIdentity> {
        self.types.get(&node).cloned()
    }

    fn resolve_member(&self, node: NodeId) -> Option<MemberIdentity> {
        self.members.get(&node).cloned()
    }
}

/// A resolver that knows nothing. Patterns needing semantic identity simply
/// fail to match under it.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullResolver;

impl SemanticResolver for NullResolver {
    fn resolve_type(&self, _node: NodeId) -> Option<TypeIdentity> {
        None
    }

    fn resolve_member(&self, _node: NodeId) -> Option<MemberIdentity> {
        None
    }
}
