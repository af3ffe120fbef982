//! Named-argument introduction.
//!
//! Earlier rewrites can move a value-producing expression past the point
//! where the original program evaluated it. When such a value feeds a call,
//! its evaluation point is pinned by hoisting it into a synthetic local and
//! passing the local as a named argument, which keeps the surface syntax
//! reorderable without changing runtime order.
//!
//! The transform is site-local: the inlining machinery reports each call
//! argument whose evaluation point is at risk, and [`introduce`] handles one
//! such site. Repeated introductions on the same call share one evaluation
//! block, extending it in first-pinned-first-evaluated order.

use tracing::trace;

use crate::arena::{Arena, NodeId};
use crate::node::{NodeData, NodeKind, Role};
use crate::pattern::{boxed_token_access, Matcher};
use crate::pipeline::{InliningSite, TransformContext};
use crate::resolver::{DeclaringTypeKind, MemberIdentity, MemberKind, SemanticResolver};
use crate::RewriteError;

// ═══════════════════════════════════════════════════════════════════════════
// Eligibility
// ═══════════════════════════════════════════════════════════════════════════

/// Whether the resolved callee can be re-expressed with named arguments at
/// all, and if so, the declared name of the parameter at `index`.
///
/// Operator and accessor invocations have no argument-name surface syntax,
/// variadic calls cannot name the expanded parameter, and delegate or
/// anonymous-type constructor calls bind positionally only.
fn eligible_parameter(member: &MemberIdentity, index: usize) -> Option<&str> {
    if matches!(member.kind, MemberKind::Operator | MemberKind::Accessor) {
        return None;
    }
    if member.is_variadic {
        return None;
    }
    if matches!(
        member.declaring_kind,
        DeclaringTypeKind::Delegate | DeclaringTypeKind::AnonymousType
    ) {
        return None;
    }
    member.parameter_names.get(index)?.as_deref()
}

/// Whether evaluating `node` can be reordered freely: no observable effects
/// and no dependency on mutable state between now and the call.
///
/// The boxed-token lookup is the one effectful-looking shape treated as
/// pure; it is a compiler-generated constant-fold target, not a user call.
fn is_reorderable(arena: &Arena, resolver: &dyn SemanticResolver, node: NodeId) -> bool {
    if arena.is_null(node) {
        return true;
    }
    match arena.data(node) {
        NodeData::Identifier { .. } | NodeData::Literal { .. } | NodeData::TypeReference { .. } => {
            true
        }
        NodeData::MemberAccess { .. } => arena
            .child(node, Role::Target)
            .is_none_or(|target| is_reorderable(arena, resolver, target)),
        NodeData::NamedArgument { .. } => arena
            .child(node, Role::Value)
            .is_none_or(|value| is_reorderable(arena, resolver, value)),
        NodeData::Invocation => Matcher::new(arena, resolver)
            .matches(&boxed_token_access("token"), node)
            .is_some(),
        _ => false,
    }
}

/// The evaluation slots of `call` that run before the argument at `index`:
/// the receiver for an instance call, then every earlier argument.
fn earlier_slots(
    arena: &Arena,
    call: NodeId,
    member: &MemberIdentity,
    index: usize,
) -> Vec<NodeId> {
    let mut slots = Vec::new();
    if member.is_instance {
        if let Some(target) = arena.child(call, Role::Target) {
            if let Some(receiver) = arena.child(target, Role::Target) {
                slots.push(receiver);
            }
        }
    }
    let args = arena.children_with_role(call, Role::Argument);
    slots.extend(args.into_iter().take(index));
    slots
}

// ═══════════════════════════════════════════════════════════════════════════
// Introduction
// ═══════════════════════════════════════════════════════════════════════════

/// Pin the evaluation point of one call argument, per the reported site.
///
/// Returns `Ok(false)` when the site needs no pin (every earlier evaluation
/// slot is freely reorderable) or cannot take one (ineligible callee,
/// argument already named, detached or non-invocation call). On a rewrite,
/// one step is recorded and the call ends up inside an evaluation block
/// whose pin statements run in introduction order before the call.
pub fn introduce(
    ctx: &mut TransformContext<'_>,
    site: InliningSite,
) -> Result<bool, RewriteError> {
    if !ctx.options.named_arguments {
        return Ok(false);
    }
    let call = site.call;
    if ctx.arena.kind(call) != NodeKind::Invocation || ctx.arena.parent(call).is_none() {
        return Ok(false);
    }
    let Some(member) = ctx.resolver.resolve_member(call) else {
        return Ok(false);
    };
    let Some(name) = eligible_parameter(&member, site.argument_index) else {
        trace!(?site, callee = %member.name, "callee not expressible with named arguments");
        return Ok(false);
    };
    let name = name.to_string();

    let args = ctx.arena.children_with_role(call, Role::Argument);
    let Some(&argument) = args.get(site.argument_index) else {
        return Ok(false);
    };
    if ctx.arena.kind(argument) == NodeKind::NamedArgument {
        return Ok(false);
    }

    // Nothing earlier can observe the hoist; the value inlines in place.
    if earlier_slots(ctx.arena, call, &member, site.argument_index)
        .into_iter()
        .all(|slot| is_reorderable(ctx.arena, ctx.resolver, slot))
    {
        return Ok(false);
    }

    // An instance call needs its receiver pinned first when the block is
    // created; without a real receiver expression there is nothing to pin
    // against.
    let member_access = ctx.arena.child(call, Role::Target);
    let reuse_block = ctx
        .arena
        .parent(call)
        .filter(|&parent| {
            ctx.arena.kind(parent) == NodeKind::EvalBlock
                && ctx.arena.role(call) == Role::Result
        });
    if member.is_instance && reuse_block.is_none() {
        let has_receiver = member_access.is_some_and(|target| {
            ctx.arena.kind(target) == NodeKind::MemberAccess
                && ctx
                    .arena
                    .child(target, Role::Target)
                    .is_some_and(|receiver| !ctx.arena.is_null(receiver))
        });
        if !has_receiver {
            return Ok(false);
        }
    }

    ctx.stepper
        .step(format!("pin argument `{name}`"), Some(call))?;

    let block = match reuse_block {
        Some(block) => block,
        None => {
            let block = ctx.arena.new_node(NodeData::EvalBlock);
            ctx.arena.replace(call, block);
            ctx.arena.attach(block, Role::Result, call);
            if member.is_instance {
                pin_receiver(ctx, block, call);
            }
            block
        }
    };

    // Hoist the argument and name the local in its slot.
    let local = ctx.fresh_local();
    let named = ctx.arena.new_node(NodeData::NamedArgument { name });
    let value = ctx.arena.replace(argument, named);
    let reference = ctx.arena.new_node(NodeData::Identifier {
        name: local.clone(),
    });
    ctx.arena.attach(named, Role::Value, reference);
    let pin = assignment(ctx.arena, &local, value);
    ctx.arena.insert_before(block, call, Role::Statement, pin);

    Ok(true)
}

/// Hoist the receiver of `call` into the first pin statement of `block` and
/// reference the local in its place.
fn pin_receiver(ctx: &mut TransformContext<'_>, block: NodeId, call: NodeId) {
    let target = ctx
        .arena
        .child(call, Role::Target)
        .expect("receiver presence checked before block creation");
    let receiver = ctx
        .arena
        .child(target, Role::Target)
        .expect("receiver presence checked before block creation");
    let local = ctx.fresh_local();
    let receiver = ctx.arena.detach(receiver);
    let reference = ctx.arena.new_node(NodeData::Identifier {
        name: local.clone(),
    });
    ctx.arena.attach(target, Role::Target, reference);
    let pin = assignment(ctx.arena, &local, receiver);
    ctx.arena.insert_before(block, call, Role::Statement, pin);
}

/// `local = value` as a detached statement.
fn assignment(arena: &mut Arena, local: &str, value: NodeId) -> NodeId {
    let node = arena.new_node(NodeData::Assignment);
    let target = arena.new_node(NodeData::Identifier {
        name: local.to_string(),
    });
    arena.attach(node, Role::Target, target);
    arena.attach(node, Role::Value, value);
    node
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
