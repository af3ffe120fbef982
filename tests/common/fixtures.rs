//! Tree builders shared by the integration suites.

#![allow(dead_code)]

use il_rewrite::node::ParamModifier;
use il_rewrite::resolver::{DeclaringTypeKind, MemberKind};
use il_rewrite::{
    Arena, Cancellation, InliningSite, MemberIdentity, NodeData, NodeId, NodeKind, PassSummary,
    Pipeline, RewriteOptions, Role, SemanticResolver, Stepper, TransformContext, TypeIdentity,
};

pub fn ident(arena: &mut Arena, name: &str) -> NodeId {
    arena.new_node(NodeData::Identifier { name: name.into() })
}

pub fn literal(arena: &mut Arena, text: &str) -> NodeId {
    arena.new_node(NodeData::Literal { text: text.into() })
}

/// `param => body` with a plain parameter.
pub fn lambda1(arena: &mut Arena, param: &str, body: NodeId) -> NodeId {
    let lambda = arena.new_node(NodeData::Lambda);
    let p = parameter(arena, param);
    arena.attach(lambda, Role::Parameter, p);
    arena.attach(lambda, Role::Body, body);
    lambda
}

/// `(first, second) => body` with plain parameters.
pub fn lambda2(arena: &mut Arena, first: &str, second: &str, body: NodeId) -> NodeId {
    let lambda = arena.new_node(NodeData::Lambda);
    let p1 = parameter(arena, first);
    let p2 = parameter(arena, second);
    arena.attach(lambda, Role::Parameter, p1);
    arena.attach(lambda, Role::Parameter, p2);
    arena.attach(lambda, Role::Body, body);
    lambda
}

pub fn parameter(arena: &mut Arena, name: &str) -> NodeId {
    arena.new_node(NodeData::Parameter {
        name: name.into(),
        modifier: ParamModifier::None,
        has_attributes: false,
    })
}

/// `receiver.name(args...)`.
pub fn operator_call(arena: &mut Arena, receiver: NodeId, name: &str, args: &[NodeId]) -> NodeId {
    let call = arena.new_node(NodeData::Invocation);
    let member = arena.new_node(NodeData::MemberAccess {
        name: name.into(),
        null_conditional: false,
    });
    arena.attach(member, Role::Target, receiver);
    arena.attach(call, Role::Target, member);
    for &arg in args {
        arena.attach(call, Role::Argument, arg);
    }
    call
}

/// `callee(arg)`: a call body so lambda bodies are not bare identifiers.
pub fn call_body(arena: &mut Arena, callee: &str, arg: &str) -> NodeId {
    let target = ident(arena, callee);
    let argument = ident(arena, arg);
    let call = arena.new_node(NodeData::Invocation);
    arena.attach(call, Role::Target, target);
    arena.attach(call, Role::Argument, argument);
    call
}

/// Wrap `expr` as the argument of an enclosing invocation so a trivial
/// `Select`/`Where` chain still counts as worth converting. Returns the
/// enclosing call, which serves as the rewrite root.
pub fn complex_context(arena: &mut Arena, expr: NodeId) -> NodeId {
    let consume = ident(arena, "consume");
    let outer = arena.new_node(NodeData::Invocation);
    arena.attach(outer, Role::Target, consume);
    arena.attach(outer, Role::Argument, expr);
    outer
}

pub fn clause_kinds(arena: &Arena, query: NodeId) -> Vec<NodeKind> {
    arena
        .children_with_role(query, Role::Clause)
        .iter()
        .map(|&clause| arena.kind(clause))
        .collect()
}

/// An instance-method identity with the given parameter names.
pub fn instance_method(name: &str, parameter_names: &[&str]) -> MemberIdentity {
    MemberIdentity {
        name: name.into(),
        declaring_type: TypeIdentity::new("App", "Service"),
        declaring_kind: DeclaringTypeKind::Class,
        kind: MemberKind::Method,
        parameter_names: parameter_names
            .iter()
            .map(|&param| Some(param.to_string()))
            .collect(),
        is_variadic: false,
        is_instance: true,
    }
}

/// Run the standard pipeline to a fixed point with default options.
pub fn run_standard(
    arena: &mut Arena,
    resolver: &dyn SemanticResolver,
    root: NodeId,
) -> PassSummary {
    let mut stepper = Stepper::new();
    run_with(
        arena,
        resolver,
        &RewriteOptions::default(),
        &mut stepper,
        root,
        &[],
    )
    .expect("run without limit or cancellation cannot abort")
}

/// Run the standard pipeline with explicit options, stepper, and sites.
pub fn run_with(
    arena: &mut Arena,
    resolver: &dyn SemanticResolver,
    options: &RewriteOptions,
    stepper: &mut Stepper,
    root: NodeId,
    sites: &[InliningSite],
) -> Result<PassSummary, il_rewrite::RewriteError> {
    let cancel = Cancellation::new();
    let mut ctx = TransformContext::new(arena, resolver, options, stepper, &cancel);
    Pipeline::standard().run(&mut ctx, root, sites)
}
