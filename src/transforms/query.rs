//! Query-expression reconstruction.
//!
//! Recognizes chains of higher-order operator calls (`Where`, `Select`,
//! `SelectMany`, `GroupBy`, `OrderBy`/`ThenBy`, `Join`/`GroupJoin`) and
//! rewrites them into declarative query nodes with ordered clauses. Chains
//! nest outside-in but queries read source-to-sink, so the outermost call of
//! a chain becomes the last clause.
//!
//! Reconstruction is split in two pipeline entries:
//!
//! 1. [`QueryReconstruction`] converts one operator per visited invocation,
//!    leaving the receiver chain as the from-clause source for later visits
//!    to convert in turn (yielding nested queries).
//! 2. [`QueryNormalization`] merges a nested query into its consumer when
//!    both bind the same identifier, and gives degenerate queries (those
//!    not ending in a projection or group clause) an implicit trailing
//!    projection re-yielding the bound identifier.
//!
//! A chain is abandoned outright when a lambda parameter carries a
//! by-reference modifier or an attribute, when the source is
//! null-conditional, or when a `Select`/`Where` call is not complex enough
//! to read better in query form (it must be the argument of another
//! invocation or already sit under a clause).

use tracing::trace;

use crate::arena::{Arena, NodeId};
use crate::node::{NodeData, NodeKind, ParamModifier, Role};
use crate::pattern::{any_named, capture, shape, single, Matcher, Pattern};
use crate::pipeline::{Cancellation, Transform, TransformContext};
use crate::resolver::SemanticResolver;
use crate::RewriteError;

// ═══════════════════════════════════════════════════════════════════════════
// Operator names
// ═══════════════════════════════════════════════════════════════════════════

const FILTER: &str = "Where";
const PROJECT: &str = "Select";
const PROJECT_MANY: &str = "SelectMany";
const GROUP: &str = "GroupBy";
const ORDER: &str = "OrderBy";
const ORDER_DESC: &str = "OrderByDescending";
const THEN: &str = "ThenBy";
const THEN_DESC: &str = "ThenByDescending";
const JOIN: &str = "Join";
const GROUP_JOIN: &str = "GroupJoin";

/// Identifier a discarded query result is bound to.
const DISCARD_NAME: &str = "_";

// ═══════════════════════════════════════════════════════════════════════════
// Chain recognition
// ═══════════════════════════════════════════════════════════════════════════

/// The member-call shape every recognizer starts from: an invocation of a
/// member access with a real receiver.
fn member_call_pattern() -> Pattern {
    shape(
        NodeKind::Invocation,
        vec![single(
            Role::Target,
            capture(
                "member",
                shape(
                    NodeKind::MemberAccess,
                    vec![single(Role::Target, any_named("receiver"))],
                ),
            ),
        )],
    )
}

struct CallShape {
    name: String,
    receiver: NodeId,
    args: Vec<NodeId>,
}

fn call_shape(
    arena: &Arena,
    resolver: &dyn SemanticResolver,
    pattern: &Pattern,
    call: NodeId,
) -> Option<CallShape> {
    let captures = Matcher::new(arena, resolver).matches(pattern, call)?;
    let member = captures.get("member")?;
    let receiver = captures.get("receiver")?;
    if arena.is_null(receiver) {
        return None;
    }
    let NodeData::MemberAccess {
        name,
        null_conditional,
    } = arena.data(member)
    else {
        return None;
    };
    // A null-propagating chain link cannot become a query source.
    if *null_conditional || is_null_conditional(arena, receiver) {
        return None;
    }
    Some(CallShape {
        name: name.clone(),
        receiver,
        args: arena.children_with_role(call, Role::Argument),
    })
}

fn is_null_conditional(arena: &Arena, node: NodeId) -> bool {
    match arena.data(node) {
        NodeData::MemberAccess {
            null_conditional, ..
        } => *null_conditional,
        NodeData::Invocation => arena
            .child(node, Role::Target)
            .is_some_and(|target| is_null_conditional(arena, target)),
        _ => false,
    }
}

/// A lambda whose parameters are plain identifiers: no by-ref/out modifiers,
/// no attributes. Anything else makes the chain unrepresentable in query
/// form and abandons recognition.
fn clean_params(arena: &Arena, lambda: NodeId) -> Option<Vec<String>> {
    if arena.kind(lambda) != NodeKind::Lambda {
        return None;
    }
    let mut names = Vec::new();
    for param in arena.children_with_role(lambda, Role::Parameter) {
        let NodeData::Parameter {
            name,
            modifier,
            has_attributes,
        } = arena.data(param)
        else {
            return None;
        };
        if *modifier != ParamModifier::None || *has_attributes {
            return None;
        }
        names.push(name.clone());
    }
    Some(names)
}

fn single_param_lambda(arena: &Arena, lambda: NodeId) -> Option<(String, NodeId)> {
    let params = clean_params(arena, lambda)?;
    let [param] = params.as_slice() else {
        return None;
    };
    Some((param.clone(), arena.child(lambda, Role::Body)?))
}

fn two_param_lambda(arena: &Arena, lambda: NodeId) -> Option<(String, String, NodeId)> {
    let params = clean_params(arena, lambda)?;
    let [first, second] = params.as_slice() else {
        return None;
    };
    Some((first.clone(), second.clone(), arena.child(lambda, Role::Body)?))
}

/// A trivial `Select`/`Where` chain reads better as a plain call; convert
/// only when the call feeds another invocation or already sits under a
/// clause.
fn is_complex_enough(arena: &Arena, call: NodeId) -> bool {
    let Some(parent) = arena.parent(call) else {
        return false;
    };
    (arena.kind(parent) == NodeKind::Invocation && arena.role(call) == Role::Argument)
        || arena.kind(parent).is_query_clause()
}

/// Whether `call` is the receiver of a then-by link, meaning an enclosing
/// chain owns it (or was abandoned whole).
fn consumed_by_then_by(arena: &Arena, call: NodeId) -> bool {
    let Some(parent) = arena.parent(call) else {
        return false;
    };
    match arena.data(parent) {
        NodeData::MemberAccess { name, .. } if arena.role(call) == Role::Target => {
            name == THEN || name == THEN_DESC
        }
        _ => false,
    }
}

/// Everything recognition learned about one chain link, gathered without
/// mutating the tree. Node ids point into the chain being replaced; applying
/// the plan detaches them.
enum QueryPlan {
    Filter {
        source: NodeId,
        identifier: String,
        condition: NodeId,
    },
    Projection {
        source: NodeId,
        identifier: String,
        projection: NodeId,
    },
    ProjectionMany {
        source: NodeId,
        identifier: String,
        collection: NodeId,
        second_identifier: String,
        projection: NodeId,
    },
    Grouping {
        source: NodeId,
        identifier: String,
        element: NodeId,
        key: NodeId,
    },
    OrderingChain {
        source: NodeId,
        identifier: String,
        /// Primary ordering first.
        orderings: Vec<(NodeId, bool)>,
    },
    Join {
        source: NodeId,
        identifier: String,
        inner_source: NodeId,
        inner_identifier: String,
        outer_key: NodeId,
        inner_key: NodeId,
        projection: NodeId,
        into: Option<String>,
    },
}

fn recognize(
    arena: &Arena,
    resolver: &dyn SemanticResolver,
    cancel: &Cancellation,
    pattern: &Pattern,
    call: NodeId,
) -> Result<Option<QueryPlan>, RewriteError> {
    let Some(link) = call_shape(arena, resolver, pattern, call) else {
        return Ok(None);
    };

    let plan = match link.name.as_str() {
        FILTER => {
            if !is_complex_enough(arena, call) {
                return Ok(None);
            }
            let [lambda] = link.args.as_slice() else {
                return Ok(None);
            };
            single_param_lambda(arena, *lambda).map(|(identifier, condition)| QueryPlan::Filter {
                source: link.receiver,
                identifier,
                condition,
            })
        }
        PROJECT => {
            if !is_complex_enough(arena, call) {
                return Ok(None);
            }
            let [lambda] = link.args.as_slice() else {
                return Ok(None);
            };
            single_param_lambda(arena, *lambda).map(|(identifier, projection)| {
                QueryPlan::Projection {
                    source: link.receiver,
                    identifier,
                    projection,
                }
            })
        }
        PROJECT_MANY => {
            let [collection_lambda, result_lambda] = link.args.as_slice() else {
                return Ok(None);
            };
            let Some((identifier, collection)) = single_param_lambda(arena, *collection_lambda)
            else {
                return Ok(None);
            };
            let Some((first, second, projection)) = two_param_lambda(arena, *result_lambda) else {
                return Ok(None);
            };
            // The result selector must iterate the same outer identifier.
            if first != identifier {
                return Ok(None);
            }
            Some(QueryPlan::ProjectionMany {
                source: link.receiver,
                identifier,
                collection,
                second_identifier: second,
                projection,
            })
        }
        GROUP => match link.args.as_slice() {
            [key_lambda] => {
                single_param_lambda(arena, *key_lambda).map(|(identifier, key)| {
                    QueryPlan::Grouping {
                        source: link.receiver,
                        identifier,
                        element: arena.null(NodeKind::Placeholder),
                        key,
                    }
                })
            }
            [key_lambda, element_lambda] => {
                let Some((identifier, key)) = single_param_lambda(arena, *key_lambda) else {
                    return Ok(None);
                };
                let Some((element_id, element)) = single_param_lambda(arena, *element_lambda)
                else {
                    return Ok(None);
                };
                if element_id != identifier {
                    return Ok(None);
                }
                Some(QueryPlan::Grouping {
                    source: link.receiver,
                    identifier,
                    element,
                    key,
                })
            }
            _ => None,
        },
        ORDER | ORDER_DESC => {
            if consumed_by_then_by(arena, call) {
                // An enclosing then-by chain owns this link.
                return Ok(None);
            }
            recognize_ordering_chain(arena, resolver, cancel, pattern, link)?
        }
        THEN | THEN_DESC => recognize_ordering_chain(arena, resolver, cancel, pattern, link)?,
        JOIN | GROUP_JOIN => {
            let [inner_source, outer_key_lambda, inner_key_lambda, result_lambda] =
                link.args.as_slice()
            else {
                return Ok(None);
            };
            if is_null_conditional(arena, *inner_source) {
                return Ok(None);
            }
            let Some((identifier, outer_key)) = single_param_lambda(arena, *outer_key_lambda)
            else {
                return Ok(None);
            };
            let Some((inner_identifier, inner_key)) =
                single_param_lambda(arena, *inner_key_lambda)
            else {
                return Ok(None);
            };
            let Some((first, second, projection)) = two_param_lambda(arena, *result_lambda) else {
                return Ok(None);
            };
            if first != identifier {
                return Ok(None);
            }
            let into = if link.name == GROUP_JOIN {
                // The group-join result selector binds the grouped rows.
                Some(second)
            } else if second == inner_identifier {
                None
            } else {
                return Ok(None);
            };
            Some(QueryPlan::Join {
                source: link.receiver,
                identifier,
                inner_source: *inner_source,
                inner_identifier,
                outer_key,
                inner_key,
                projection,
                into,
            })
        }
        _ => None,
    };
    Ok(plan)
}

/// Walk a then-by chain inward to its primary order-by, collecting keys.
/// The whole recognition fails if any link breaks the shared-identifier
/// invariant or is not a clean single-parameter lambda.
fn recognize_ordering_chain(
    arena: &Arena,
    resolver: &dyn SemanticResolver,
    cancel: &Cancellation,
    pattern: &Pattern,
    outermost_link: CallShape,
) -> Result<Option<QueryPlan>, RewriteError> {
    // Collected outermost-first; reversed at the end so the primary
    // (innermost) ordering is listed first.
    let mut collected: Vec<(NodeId, bool)> = Vec::new();
    let mut identifier: Option<String> = None;
    let mut link = outermost_link;

    loop {
        cancel.check()?;
        let descending = matches!(link.name.as_str(), ORDER_DESC | THEN_DESC);
        let [lambda] = link.args.as_slice() else {
            return Ok(None);
        };
        let Some((param, key)) = single_param_lambda(arena, *lambda) else {
            return Ok(None);
        };
        match &identifier {
            Some(expected) if *expected != param => return Ok(None),
            Some(_) => {}
            None => identifier = Some(param),
        }
        collected.push((key, descending));

        match link.name.as_str() {
            ORDER | ORDER_DESC => {
                collected.reverse();
                return Ok(Some(QueryPlan::OrderingChain {
                    source: link.receiver,
                    identifier: identifier.expect("at least one link collected"),
                    orderings: collected,
                }));
            }
            THEN | THEN_DESC => {
                let Some(next) = call_shape(arena, resolver, pattern, link.receiver) else {
                    return Ok(None);
                };
                if !matches!(next.name.as_str(), ORDER | ORDER_DESC | THEN | THEN_DESC) {
                    return Ok(None);
                }
                link = next;
            }
            _ => return Ok(None),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Plan application
// ═══════════════════════════════════════════════════════════════════════════

fn apply(arena: &mut Arena, call: NodeId, plan: QueryPlan) -> NodeId {
    let query = arena.new_node(NodeData::QueryExpression);
    match plan {
        QueryPlan::Filter {
            source,
            identifier,
            condition,
        } => {
            attach_from(arena, query, identifier, source);
            let clause = arena.new_node(NodeData::WhereClause);
            let condition = arena.detach(condition);
            arena.attach(clause, Role::Condition, condition);
            arena.attach(query, Role::Clause, clause);
        }
        QueryPlan::Projection {
            source,
            identifier,
            projection,
        } => {
            attach_from(arena, query, identifier, source);
            attach_select(arena, query, projection);
        }
        QueryPlan::ProjectionMany {
            source,
            identifier,
            collection,
            second_identifier,
            projection,
        } => {
            attach_from(arena, query, identifier, source);
            attach_from(arena, query, second_identifier, collection);
            attach_select(arena, query, projection);
        }
        QueryPlan::Grouping {
            source,
            identifier,
            element,
            key,
        } => {
            attach_from(arena, query, identifier.clone(), source);
            let clause = arena.new_node(NodeData::GroupClause);
            let element = if arena.is_null(element) {
                arena.new_node(NodeData::Identifier { name: identifier })
            } else {
                arena.detach(element)
            };
            arena.attach(clause, Role::Expression, element);
            let key = arena.detach(key);
            arena.attach(clause, Role::Key, key);
            arena.attach(query, Role::Clause, clause);
        }
        QueryPlan::OrderingChain {
            source,
            identifier,
            orderings,
        } => {
            attach_from(arena, query, identifier, source);
            let clause = arena.new_node(NodeData::OrderClause);
            for (key, descending) in orderings {
                let ordering = arena.new_node(NodeData::Ordering { descending });
                let key = arena.detach(key);
                arena.attach(ordering, Role::Expression, key);
                arena.attach(clause, Role::Ordering, ordering);
            }
            arena.attach(query, Role::Clause, clause);
        }
        QueryPlan::Join {
            source,
            identifier,
            inner_source,
            inner_identifier,
            outer_key,
            inner_key,
            projection,
            into,
        } => {
            attach_from(arena, query, identifier, source);
            let clause = arena.new_node(NodeData::JoinClause {
                identifier: inner_identifier,
                into,
            });
            let inner_source = arena.detach(inner_source);
            arena.attach(clause, Role::Source, inner_source);
            let outer_key = arena.detach(outer_key);
            arena.attach(clause, Role::On, outer_key);
            let inner_key = arena.detach(inner_key);
            arena.attach(clause, Role::Equals, inner_key);
            arena.attach(query, Role::Clause, clause);
            attach_select(arena, query, projection);
        }
    }
    arena.replace(call, query);
    query
}

fn attach_from(arena: &mut Arena, query: NodeId, identifier: String, source: NodeId) {
    let clause = arena.new_node(NodeData::FromClause { identifier });
    let source = arena.detach(source);
    arena.attach(clause, Role::Source, source);
    arena.attach(query, Role::Clause, clause);
}

fn attach_select(arena: &mut Arena, query: NodeId, projection: NodeId) {
    let clause = arena.new_node(NodeData::SelectClause);
    let projection = arena.detach(projection);
    arena.attach(clause, Role::Expression, projection);
    arena.attach(query, Role::Clause, clause);
}

// ═══════════════════════════════════════════════════════════════════════════
// Reconstruction transform
// ═══════════════════════════════════════════════════════════════════════════

/// Converts operator-chain invocations into query nodes, one link per visit.
pub struct QueryReconstruction;

impl Transform for QueryReconstruction {
    fn name(&self) -> &'static str {
        "reconstruct query expressions"
    }

    fn run(&mut self, root: NodeId, ctx: &mut TransformContext<'_>) -> Result<bool, RewriteError> {
        if !ctx.options.query_expressions {
            return Ok(false);
        }
        let pattern = member_call_pattern();
        let mut changed = false;
        for node in ctx.arena.preorder(root) {
            ctx.cancel.check()?;
            // Nodes displaced by an earlier rewrite in this pass are stale.
            if !ctx.arena.is_reachable_from(root, node) {
                continue;
            }
            if ctx.arena.kind(node) != NodeKind::Invocation {
                continue;
            }
            // A chain that is itself the rewrite root occupies no parent
            // slot for the query node to take over.
            if ctx.arena.parent(node).is_none() {
                continue;
            }
            let Some(plan) = recognize(ctx.arena, ctx.resolver, ctx.cancel, &pattern, node)?
            else {
                continue;
            };
            ctx.stepper
                .step("rewrite operator chain link into query", Some(node))?;
            let query = apply(ctx.arena, node, plan);
            trace!(?query, "chain link converted");
            changed = true;
        }
        Ok(changed)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Degenerate-query normalization
// ═══════════════════════════════════════════════════════════════════════════

/// A query lacking a terminal projection or group clause.
fn is_degenerate(arena: &Arena, query: NodeId) -> bool {
    match arena.children_with_role(query, Role::Clause).last() {
        Some(&last) => !matches!(
            arena.kind(last),
            NodeKind::SelectClause | NodeKind::GroupClause
        ),
        None => true,
    }
}

/// The identifier the query's rows are bound to: the last clause that binds
/// one.
fn last_bound_identifier(arena: &Arena, query: NodeId) -> Option<String> {
    arena
        .children_with_role(query, Role::Clause)
        .iter()
        .rev()
        .find_map(|&clause| arena.data(clause).bound_identifier().map(String::from))
}

/// A trailing `select x` that merely re-yields the bound identifier; spliced
/// queries drop it.
fn trivial_reyield_select(arena: &Arena, query: NodeId) -> Option<NodeId> {
    let clauses = arena.children_with_role(query, Role::Clause);
    let &last = clauses.last()?;
    if arena.kind(last) != NodeKind::SelectClause {
        return None;
    }
    let expr = arena.child(last, Role::Expression)?;
    let NodeData::Identifier { name } = arena.data(expr) else {
        return None;
    };
    let bound = last_bound_identifier(arena, query)?;
    (*name == bound).then_some(last)
}

struct MergePlan {
    outer_from: NodeId,
    inner_query: NodeId,
    drop_select: Option<NodeId>,
}

/// An outer query whose source is itself a query bound to the same
/// identifier can absorb the inner query's clauses, provided the inner
/// query is degenerate (or ends in a trivial re-yield, which is dropped).
fn plan_merge(arena: &Arena, query: NodeId) -> Option<MergePlan> {
    let clauses = arena.children_with_role(query, Role::Clause);
    let &outer_from = clauses.first()?;
    let NodeData::FromClause { identifier } = arena.data(outer_from) else {
        return None;
    };
    let inner_query = arena.child(outer_from, Role::Source)?;
    if arena.kind(inner_query) != NodeKind::QueryExpression {
        return None;
    }
    if last_bound_identifier(arena, inner_query)? != *identifier {
        return None;
    }
    let drop_select = trivial_reyield_select(arena, inner_query);
    if !is_degenerate(arena, inner_query) && drop_select.is_none() {
        return None;
    }
    Some(MergePlan {
        outer_from,
        inner_query,
        drop_select,
    })
}

fn apply_merge(arena: &mut Arena, query: NodeId, plan: MergePlan) {
    if let Some(select) = plan.drop_select {
        arena.detach(select);
    }
    for clause in arena.children_with_role(plan.inner_query, Role::Clause) {
        arena.detach(clause);
        arena.insert_before(query, plan.outer_from, Role::Clause, clause);
    }
    // The spliced clauses replace the source binding; the inner query node
    // goes with it.
    arena.detach(plan.outer_from);
}

/// Merges nested same-identifier queries and gives degenerate queries their
/// implicit terminal projection.
pub struct QueryNormalization;

impl Transform for QueryNormalization {
    fn name(&self) -> &'static str {
        "normalize degenerate queries"
    }

    fn run(&mut self, root: NodeId, ctx: &mut TransformContext<'_>) -> Result<bool, RewriteError> {
        if !ctx.options.query_expressions {
            return Ok(false);
        }
        let mut changed = false;
        for node in ctx.arena.preorder(root) {
            ctx.cancel.check()?;
            if !ctx.arena.is_reachable_from(root, node) {
                continue;
            }
            if ctx.arena.kind(node) != NodeKind::QueryExpression {
                continue;
            }

            // Worklist fixed point over the source chain; bounded by chain
            // depth.
            while let Some(plan) = plan_merge(ctx.arena, node) {
                ctx.cancel.check()?;
                ctx.stepper
                    .step("splice nested query into consumer", Some(node))?;
                apply_merge(ctx.arena, node, plan);
                changed = true;
            }

            if is_degenerate(ctx.arena, node) {
                let Some(bound) = last_bound_identifier(ctx.arena, node) else {
                    continue;
                };
                ctx.stepper
                    .step("add implicit trailing projection", Some(node))?;
                let reyield = ctx.arena.new_node(NodeData::Identifier { name: bound });
                attach_select_of(ctx.arena, node, reyield);
                changed = true;

                if query_is_statement(ctx.arena, node) && ctx.options.discards {
                    ctx.stepper
                        .step("bind discarded query result", Some(node))?;
                    bind_to_discard(ctx.arena, node);
                }
            }
        }
        Ok(changed)
    }
}

fn attach_select_of(arena: &mut Arena, query: NodeId, expression: NodeId) {
    let clause = arena.new_node(NodeData::SelectClause);
    arena.attach(clause, Role::Expression, expression);
    arena.attach(query, Role::Clause, clause);
}

fn query_is_statement(arena: &Arena, query: NodeId) -> bool {
    arena
        .parent(query)
        .is_some_and(|parent| arena.kind(parent) == NodeKind::ExpressionStatement)
}

fn bind_to_discard(arena: &mut Arena, query: NodeId) {
    let assignment = arena.new_node(NodeData::Assignment);
    arena.replace(query, assignment);
    let discard = arena.new_node(NodeData::Identifier {
        name: DISCARD_NAME.into(),
    });
    arena.attach(assignment, Role::Target, discard);
    arena.attach(assignment, Role::Value, query);
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Pipeline, RewriteOptions};
    use crate::resolver::NullResolver;
    use crate::stepper::Stepper;

    fn ident(arena: &mut Arena, name: &str) -> NodeId {
        arena.new_node(NodeData::Identifier { name: name.into() })
    }

    fn lambda1(arena: &mut Arena, param: &str, body: NodeId) -> NodeId {
        let lambda = arena.new_node(NodeData::Lambda);
        let p = arena.new_node(NodeData::Parameter {
            name: param.into(),
            modifier: ParamModifier::None,
            has_attributes: false,
        });
        arena.attach(lambda, Role::Parameter, p);
        arena.attach(lambda, Role::Body, body);
        lambda
    }

    fn operator_call(arena: &mut Arena, receiver: NodeId, name: &str, args: &[NodeId]) -> NodeId {
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

    /// `P(x)`-style body: a call so the lambda body is not a bare identifier.
    fn predicate_body(arena: &mut Arena, callee: &str, arg: &str) -> NodeId {
        let target = ident(arena, callee);
        let x = ident(arena, arg);
        let call = arena.new_node(NodeData::Invocation);
        arena.attach(call, Role::Target, target);
        arena.attach(call, Role::Argument, x);
        call
    }

    fn run_standard(arena: &mut Arena, root: NodeId) -> usize {
        let options = RewriteOptions::default();
        let mut stepper = Stepper::new();
        let cancel = Cancellation::new();
        let mut ctx =
            TransformContext::new(arena, &NullResolver, &options, &mut stepper, &cancel);
        let summary = Pipeline::standard().run(&mut ctx, root, &[]).unwrap();
        summary.rewrites
    }

    /// Wrap an expression so a `Select`/`Where` chain counts as complex: the
    /// chain becomes the argument of an enclosing invocation.
    fn complex_context(arena: &mut Arena, expr: NodeId) -> NodeId {
        let consume = ident(arena, "consume");
        let outer = arena.new_node(NodeData::Invocation);
        arena.attach(outer, Role::Target, consume);
        arena.attach(outer, Role::Argument, expr);
        outer
    }

    fn clause_kinds(arena: &Arena, query: NodeId) -> Vec<NodeKind> {
        arena
            .children_with_role(query, Role::Clause)
            .iter()
            .map(|&c| arena.kind(c))
            .collect()
    }

    #[test]
    fn where_select_chain_becomes_filter_then_projection() {
        let mut arena = Arena::new();
        let source = ident(&mut arena, "source");
        let p = predicate_body(&mut arena, "P", "x");
        let filter_lambda = lambda1(&mut arena, "x", p);
        let where_call = operator_call(&mut arena, source, FILTER, &[filter_lambda]);
        let f = predicate_body(&mut arena, "F", "x");
        let select_lambda = lambda1(&mut arena, "x", f);
        let select_call = operator_call(&mut arena, where_call, PROJECT, &[select_lambda]);
        let root = complex_context(&mut arena, select_call);

        run_standard(&mut arena, root);

        let query = arena.child(root, Role::Argument).unwrap();
        assert_eq!(arena.kind(query), NodeKind::QueryExpression);
        assert_eq!(
            clause_kinds(&arena, query),
            vec![
                NodeKind::FromClause,
                NodeKind::WhereClause,
                NodeKind::SelectClause
            ]
        );
        // The filter captured P(x), the projection F(x).
        let clauses = arena.children_with_role(query, Role::Clause);
        assert_eq!(arena.child(clauses[1], Role::Condition), Some(p));
        assert_eq!(arena.child(clauses[2], Role::Expression), Some(f));
        // Source binding carries the innermost source.
        assert_eq!(arena.child(clauses[0], Role::Source), Some(source));
        assert_eq!(
            arena.data(clauses[0]),
            &NodeData::FromClause {
                identifier: "x".into()
            }
        );
    }

    #[test]
    fn bare_where_is_not_complex_enough() {
        let mut arena = Arena::new();
        let root = arena.new_node(NodeData::ExpressionStatement);
        let source = ident(&mut arena, "source");
        let p = predicate_body(&mut arena, "P", "x");
        let filter_lambda = lambda1(&mut arena, "x", p);
        let where_call = operator_call(&mut arena, source, FILTER, &[filter_lambda]);
        arena.attach(root, Role::Expression, where_call);

        assert_eq!(run_standard(&mut arena, root), 0);
        assert_eq!(arena.kind(where_call), NodeKind::Invocation);
    }

    #[test]
    fn by_ref_lambda_parameter_abandons_chain() {
        let mut arena = Arena::new();
        let source = ident(&mut arena, "source");
        let p = predicate_body(&mut arena, "P", "x");
        let lambda = arena.new_node(NodeData::Lambda);
        let param = arena.new_node(NodeData::Parameter {
            name: "x".into(),
            modifier: ParamModifier::Ref,
            has_attributes: false,
        });
        arena.attach(lambda, Role::Parameter, param);
        arena.attach(lambda, Role::Body, p);
        let where_call = operator_call(&mut arena, source, FILTER, &[lambda]);
        let root = complex_context(&mut arena, where_call);

        assert_eq!(run_standard(&mut arena, root), 0);
    }

    #[test]
    fn null_conditional_source_abandons_chain() {
        let mut arena = Arena::new();
        let holder = ident(&mut arena, "holder");
        let source = arena.new_node(NodeData::MemberAccess {
            name: "Items".into(),
            null_conditional: true,
        });
        arena.attach(source, Role::Target, holder);
        let f = predicate_body(&mut arena, "F", "x");
        let lambda = lambda1(&mut arena, "x", f);
        let select_call = operator_call(&mut arena, source, PROJECT, &[lambda]);
        let root = complex_context(&mut arena, select_call);

        assert_eq!(run_standard(&mut arena, root), 0);
    }

    #[test]
    fn ordering_chain_emits_primary_first() {
        let mut arena = Arena::new();
        let source = ident(&mut arena, "source");
        let primary_key = predicate_body(&mut arena, "K1", "x");
        let order_lambda = lambda1(&mut arena, "x", primary_key);
        let order_call = operator_call(&mut arena, source, ORDER_DESC, &[order_lambda]);
        let second_key = predicate_body(&mut arena, "K2", "x");
        let then_lambda = lambda1(&mut arena, "x", second_key);
        let then_call = operator_call(&mut arena, order_call, THEN, &[then_lambda]);
        let root = complex_context(&mut arena, then_call);

        run_standard(&mut arena, root);

        let query = arena.child(root, Role::Argument).unwrap();
        assert_eq!(arena.kind(query), NodeKind::QueryExpression);
        let clauses = arena.children_with_role(query, Role::Clause);
        assert_eq!(arena.kind(clauses[1]), NodeKind::OrderClause);
        let orderings = arena.children_with_role(clauses[1], Role::Ordering);
        assert_eq!(orderings.len(), 2);
        // Primary (innermost, descending) first.
        assert_eq!(
            arena.data(orderings[0]),
            &NodeData::Ordering { descending: true }
        );
        assert_eq!(arena.child(orderings[0], Role::Expression), Some(primary_key));
        assert_eq!(
            arena.data(orderings[1]),
            &NodeData::Ordering { descending: false }
        );
        assert_eq!(arena.child(orderings[1], Role::Expression), Some(second_key));
    }

    #[test]
    fn ordering_chain_with_mixed_identifiers_abandons_whole_chain() {
        let mut arena = Arena::new();
        let source = ident(&mut arena, "source");
        let k1 = predicate_body(&mut arena, "K1", "x");
        let order_lambda = lambda1(&mut arena, "x", k1);
        let order_call = operator_call(&mut arena, source, ORDER, &[order_lambda]);
        let k2 = predicate_body(&mut arena, "K2", "y");
        let then_lambda = lambda1(&mut arena, "y", k2);
        let then_call = operator_call(&mut arena, order_call, THEN, &[then_lambda]);
        let root = complex_context(&mut arena, then_call);

        assert_eq!(run_standard(&mut arena, root), 0);
        // The inner order-by was not converted on its own either.
        assert_eq!(arena.kind(order_call), NodeKind::Invocation);
    }

    #[test]
    fn chain_at_the_rewrite_root_is_left_alone() {
        // An ordering chain has no enclosing-complexity rule, so only the
        // missing parent slot keeps it from converting here.
        let mut arena = Arena::new();
        let source = ident(&mut arena, "source");
        let k = predicate_body(&mut arena, "K", "x");
        let order_lambda = lambda1(&mut arena, "x", k);
        let order_call = operator_call(&mut arena, source, ORDER, &[order_lambda]);

        assert_eq!(run_standard(&mut arena, order_call), 0);
        assert_eq!(arena.kind(order_call), NodeKind::Invocation);
        assert_eq!(arena.parent(order_call), None);
    }

    #[test]
    fn degenerate_where_gets_implicit_projection() {
        let mut arena = Arena::new();
        let statement = arena.new_node(NodeData::ExpressionStatement);
        let source = ident(&mut arena, "source");
        let k = predicate_body(&mut arena, "K", "x");
        let order_lambda = lambda1(&mut arena, "x", k);
        // Statement-level ordering chain: converts (no complexity rule for
        // orderings) and comes out degenerate.
        let order_call = operator_call(&mut arena, source, ORDER, &[order_lambda]);
        arena.attach(statement, Role::Expression, order_call);

        let options = RewriteOptions::builder().discards(false).build();
        let mut stepper = Stepper::new();
        let cancel = Cancellation::new();
        let mut ctx = TransformContext::new(
            &mut arena,
            &NullResolver,
            &options,
            &mut stepper,
            &cancel,
        );
        Pipeline::standard().run(&mut ctx, statement, &[]).unwrap();

        let query = arena.child(statement, Role::Expression).unwrap();
        assert_eq!(arena.kind(query), NodeKind::QueryExpression);
        let clauses = arena.children_with_role(query, Role::Clause);
        let last = *clauses.last().unwrap();
        assert_eq!(arena.kind(last), NodeKind::SelectClause);
        let expr = arena.child(last, Role::Expression).unwrap();
        assert_eq!(
            arena.data(expr),
            &NodeData::Identifier { name: "x".into() }
        );
    }

    #[test]
    fn statement_level_degenerate_query_binds_discard() {
        let mut arena = Arena::new();
        let statement = arena.new_node(NodeData::ExpressionStatement);
        let source = ident(&mut arena, "source");
        let k = predicate_body(&mut arena, "K", "x");
        let order_lambda = lambda1(&mut arena, "x", k);
        let order_call = operator_call(&mut arena, source, ORDER, &[order_lambda]);
        arena.attach(statement, Role::Expression, order_call);

        run_standard(&mut arena, statement);

        let assignment = arena.child(statement, Role::Expression).unwrap();
        assert_eq!(arena.kind(assignment), NodeKind::Assignment);
        let target = arena.child(assignment, Role::Target).unwrap();
        assert_eq!(
            arena.data(target),
            &NodeData::Identifier { name: "_".into() }
        );
        let value = arena.child(assignment, Role::Value).unwrap();
        assert_eq!(arena.kind(value), NodeKind::QueryExpression);
    }

    #[test]
    fn nested_same_identifier_queries_merge() {
        // source.Where(x => P(x)).Select(x => F(x)) converts link by link
        // into nested queries; normalization splices them into one.
        let mut arena = Arena::new();
        let source = ident(&mut arena, "source");
        let p = predicate_body(&mut arena, "P", "x");
        let filter_lambda = lambda1(&mut arena, "x", p);
        let where_call = operator_call(&mut arena, source, FILTER, &[filter_lambda]);
        let f = predicate_body(&mut arena, "F", "x");
        let select_lambda = lambda1(&mut arena, "x", f);
        let select_call = operator_call(&mut arena, where_call, PROJECT, &[select_lambda]);
        let root = complex_context(&mut arena, select_call);

        run_standard(&mut arena, root);

        let query = arena.child(root, Role::Argument).unwrap();
        let kinds = clause_kinds(&arena, query);
        assert_eq!(
            kinds,
            vec![
                NodeKind::FromClause,
                NodeKind::WhereClause,
                NodeKind::SelectClause
            ]
        );
        // No query nesting survives in the from-clause source.
        let from = arena.children_with_role(query, Role::Clause)[0];
        assert_eq!(arena.child(from, Role::Source), Some(source));
    }

    #[test]
    fn merge_pass_is_idempotent() {
        let mut arena = Arena::new();
        let source = ident(&mut arena, "source");
        let p = predicate_body(&mut arena, "P", "x");
        let filter_lambda = lambda1(&mut arena, "x", p);
        let where_call = operator_call(&mut arena, source, FILTER, &[filter_lambda]);
        let f = predicate_body(&mut arena, "F", "x");
        let select_lambda = lambda1(&mut arena, "x", f);
        let select_call = operator_call(&mut arena, where_call, PROJECT, &[select_lambda]);
        let root = complex_context(&mut arena, select_call);

        run_standard(&mut arena, root);
        let before = arena.dump(root);

        // A second normalization-only run changes nothing.
        let options = RewriteOptions::default();
        let mut stepper = Stepper::new();
        let cancel = Cancellation::new();
        let mut ctx = TransformContext::new(
            &mut arena,
            &NullResolver,
            &options,
            &mut stepper,
            &cancel,
        );
        let changed = QueryNormalization.run(root, &mut ctx).unwrap();
        assert!(!changed);
        assert_eq!(arena.dump(root), before);
    }

    #[test]
    fn group_join_binds_into_identifier() {
        let mut arena = Arena::new();
        let outer_source = ident(&mut arena, "people");
        let inner_source = ident(&mut arena, "pets");
        let okey = predicate_body(&mut arena, "Key", "person");
        let okey_lambda = lambda1(&mut arena, "person", okey);
        let ikey = predicate_body(&mut arena, "Owner", "pet");
        let ikey_lambda = lambda1(&mut arena, "pet", ikey);

        let result_lambda = arena.new_node(NodeData::Lambda);
        let p1 = arena.new_node(NodeData::Parameter {
            name: "person".into(),
            modifier: ParamModifier::None,
            has_attributes: false,
        });
        let p2 = arena.new_node(NodeData::Parameter {
            name: "ownedPets".into(),
            modifier: ParamModifier::None,
            has_attributes: false,
        });
        let body = predicate_body(&mut arena, "Project", "person");
        arena.attach(result_lambda, Role::Parameter, p1);
        arena.attach(result_lambda, Role::Parameter, p2);
        arena.attach(result_lambda, Role::Body, body);

        let call = operator_call(
            &mut arena,
            outer_source,
            GROUP_JOIN,
            &[inner_source, okey_lambda, ikey_lambda, result_lambda],
        );
        let root = complex_context(&mut arena, call);

        run_standard(&mut arena, root);

        let query = arena.child(root, Role::Argument).unwrap();
        let clauses = arena.children_with_role(query, Role::Clause);
        assert_eq!(arena.kind(clauses[1]), NodeKind::JoinClause);
        assert_eq!(
            arena.data(clauses[1]),
            &NodeData::JoinClause {
                identifier: "pet".into(),
                into: Some("ownedPets".into()),
            }
        );
        assert_eq!(arena.kind(clauses[2]), NodeKind::SelectClause);
    }
}
