//! The closed set of node kinds making up the output syntax tree.
//!
//! Every node in the tree is one of the `NodeData` variants below. Consumers
//! (pattern engine, transforms, traversal) match exhaustively on `NodeKind`,
//! so adding a kind forces every consumer to handle it.

/// Modifier carried by a lambda or method parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamModifier {
    #[default]
    None,
    Ref,
    Out,
    In,
}

/// The structural slot a child occupies within its parent.
///
/// Children sharing a role form an ordered collection (e.g. the arguments of
/// an invocation); roles holding at most one child (e.g. a lambda body) are
/// looked up directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Callee or member-access target.
    Target,
    /// Invocation argument (ordered collection).
    Argument,
    /// Lambda parameter (ordered collection).
    Parameter,
    /// Lambda body.
    Body,
    /// Assignment or named-argument value.
    Value,
    /// Query clause (ordered collection).
    Clause,
    /// Clause source expression (from/join).
    Source,
    /// Where-clause condition.
    Condition,
    /// Select/let/ordering expression.
    Expression,
    /// Group-clause key.
    Key,
    /// Join-clause outer key.
    On,
    /// Join-clause inner key.
    Equals,
    /// Ordering inside an order clause (ordered collection).
    Ordering,
    /// Statement inside a block (ordered collection).
    Statement,
    /// Final expression of an evaluation block.
    Result,
    /// Element type under a composed-type wrapper.
    Element,
    /// Left operand of a binary expression.
    Left,
    /// Right operand of a binary expression.
    Right,
}

/// Fieldless tag identifying a node kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Identifier,
    Literal,
    MemberAccess,
    Invocation,
    NamedArgument,
    Lambda,
    Parameter,
    TypeReference,
    ComposedType,
    Assignment,
    BinaryOp,
    QueryExpression,
    FromClause,
    LetClause,
    WhereClause,
    SelectClause,
    GroupClause,
    OrderClause,
    Ordering,
    JoinClause,
    Block,
    ExpressionStatement,
    EvalBlock,
    Placeholder,
}

impl NodeKind {
    /// Every kind, in declaration order. Used to seed the per-kind null
    /// sentinels in the arena.
    pub const ALL: &'static [NodeKind] = &[
        NodeKind::Identifier,
        NodeKind::Literal,
        NodeKind::MemberAccess,
        NodeKind::Invocation,
        NodeKind::NamedArgument,
        NodeKind::Lambda,
        NodeKind::Parameter,
        NodeKind::TypeReference,
        NodeKind::ComposedType,
        NodeKind::Assignment,
        NodeKind::BinaryOp,
        NodeKind::QueryExpression,
        NodeKind::FromClause,
        NodeKind::LetClause,
        NodeKind::WhereClause,
        NodeKind::SelectClause,
        NodeKind::GroupClause,
        NodeKind::OrderClause,
        NodeKind::Ordering,
        NodeKind::JoinClause,
        NodeKind::Block,
        NodeKind::ExpressionStatement,
        NodeKind::EvalBlock,
        NodeKind::Placeholder,
    ];

    /// Position of this kind within [`NodeKind::ALL`].
    pub(crate) fn index(self) -> usize {
        Self::ALL
            .iter()
            .position(|k| *k == self)
            .expect("kind missing from NodeKind::ALL")
    }

    /// Whether this kind is a query clause (including orderings).
    pub fn is_query_clause(self) -> bool {
        matches!(
            self,
            NodeKind::FromClause
                | NodeKind::LetClause
                | NodeKind::WhereClause
                | NodeKind::SelectClause
                | NodeKind::GroupClause
                | NodeKind::OrderClause
                | NodeKind::Ordering
                | NodeKind::JoinClause
        )
    }
}

/// Payload of a tree node.
///
/// `Null` marks the per-kind absent-node sentinels owned by the arena; they
/// are never attached to a parent and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeData {
    /// Absent-node sentinel for the given kind.
    Null(NodeKind),
    /// A simple name reference. Children: none.
    Identifier { name: String },
    /// A literal constant, kept as its source text. Children: none.
    Literal { text: String },
    /// `target.name` or `target?.name`. Children: `Target`.
    MemberAccess { name: String, null_conditional: bool },
    /// A call. Children: `Target`, `Argument*`.
    Invocation,
    /// `name: value` in an argument list. Children: `Value`.
    NamedArgument { name: String },
    /// An anonymous function. Children: `Parameter*`, `Body`.
    Lambda,
    /// A lambda parameter. Children: none.
    Parameter {
        name: String,
        modifier: ParamModifier,
        has_attributes: bool,
    },
    /// A surface type reference; semantic identity comes from the resolver.
    /// Children: none.
    TypeReference { name: String },
    /// A type wrapped in surface syntax (array ranks, pointers, nullability).
    /// `has_modifiers == false` means the wrapper is redundant and patterns
    /// must see through it. Children: `Element`.
    ComposedType { has_modifiers: bool },
    /// `target = value`. Children: `Target`, `Value`.
    Assignment,
    /// A binary operator, kept as its source text. Children: `Left`, `Right`.
    BinaryOp { op: String },
    /// A declarative query. Children: `Clause*`.
    QueryExpression,
    /// `from identifier in source`. Children: `Source`.
    FromClause { identifier: String },
    /// `let identifier = expression`. Children: `Expression`.
    LetClause { identifier: String },
    /// `where condition`. Children: `Condition`.
    WhereClause,
    /// `select expression`. Children: `Expression`.
    SelectClause,
    /// `group expression by key`. Children: `Expression`, `Key`.
    GroupClause,
    /// `orderby ...`. Children: `Ordering*`.
    OrderClause,
    /// One key of an order clause. Children: `Expression`.
    Ordering { descending: bool },
    /// `join identifier in source on outer equals inner [into group]`.
    /// Children: `Source`, `On`, `Equals`.
    JoinClause {
        identifier: String,
        into: Option<String>,
    },
    /// A statement list. Children: `Statement*`.
    Block,
    /// An expression used as a statement. Children: `Expression`.
    ExpressionStatement,
    /// An evaluation-pin block introduced by the named-argument transform:
    /// pin statements followed by the call they feed.
    /// Children: `Statement*`, `Result`.
    EvalBlock,
    /// A placeholder token with no semantic content. Children: none.
    Placeholder,
}

impl NodeData {
    /// The kind tag for this payload.
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeData::Null(kind) => *kind,
            NodeData::Identifier { .. } => NodeKind::Identifier,
            NodeData::Literal { .. } => NodeKind::Literal,
            NodeData::MemberAccess { .. } => NodeKind::MemberAccess,
            NodeData::Invocation => NodeKind::Invocation,
            NodeData::NamedArgument { .. } => NodeKind::NamedArgument,
            NodeData::Lambda => NodeKind::Lambda,
            NodeData::Parameter { .. } => NodeKind::Parameter,
            NodeData::TypeReference { .. } => NodeKind::TypeReference,
            NodeData::ComposedType { .. } => NodeKind::ComposedType,
            NodeData::Assignment => NodeKind::Assignment,
            NodeData::BinaryOp { .. } => NodeKind::BinaryOp,
            NodeData::QueryExpression => NodeKind::QueryExpression,
            NodeData::FromClause { .. } => NodeKind::FromClause,
            NodeData::LetClause { .. } => NodeKind::LetClause,
            NodeData::WhereClause => NodeKind::WhereClause,
            NodeData::SelectClause => NodeKind::SelectClause,
            NodeData::GroupClause => NodeKind::GroupClause,
            NodeData::OrderClause => NodeKind::OrderClause,
            NodeData::Ordering { .. } => NodeKind::Ordering,
            NodeData::JoinClause { .. } => NodeKind::JoinClause,
            NodeData::Block => NodeKind::Block,
            NodeData::ExpressionStatement => NodeKind::ExpressionStatement,
            NodeData::EvalBlock => NodeKind::EvalBlock,
            NodeData::Placeholder => NodeKind::Placeholder,
        }
    }

    /// Whether this payload is a null sentinel.
    pub fn is_null(&self) -> bool {
        matches!(self, NodeData::Null(_))
    }

    /// The identifier bound by this node, if it binds one (from/let/join).
    pub fn bound_identifier(&self) -> Option<&str> {
        match self {
            NodeData::FromClause { identifier } | NodeData::LetClause { identifier } => {
                Some(identifier)
            }
            NodeData::JoinClause {
                identifier, into, ..
            } => Some(into.as_deref().unwrap_or(identifier)),
            _ => None,
        }
    }
}
