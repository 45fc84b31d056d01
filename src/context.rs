//! Disjunctive contexts: the lattice the flow analysis works on.
//!
//! A Tensor holds one tuple of permissions.  A Choice means the analysis may
//! continue with whichever element it likes (the most precise one wins);
//! All means every element has to be good enough (the least precise one wins).
//! True is "nothing usable left" (the top: a failure happened earlier),
//! False is "unreachable" (the bottom).

use crate::ast::MergePoint;
use crate::choice::{ChoiceIds, ChoiceTree};
use crate::ctx::Ctx;
use crate::messages::{error_bare, join_errors, Message};
use crate::tuple::{FailedPack, PermissionTuple};
use std::sync::Arc;

pub const NO_CONTEXT: &str =
    "No available context--usually due to a previous failure or error during packing/unpacking";

#[derive(Debug, PartialEq, Eq)]
pub enum ContextX {
    True(ChoiceIds),
    /// True that remembers why a pack failed
    FailedPack(FailedPack, ChoiceIds),
    False(ChoiceIds),
    Tensor(PermissionTuple, ChoiceIds),
    Choice(Vec<Context>),
    All(Vec<Context>),
}
pub type Context = Arc<ContextX>;

pub fn mk_true(ids: ChoiceIds) -> Context {
    Arc::new(ContextX::True(ids))
}

pub fn mk_false(ids: ChoiceIds) -> Context {
    Arc::new(ContextX::False(ids))
}

pub fn mk_failed_pack(failed: FailedPack, ids: ChoiceIds) -> Context {
    Arc::new(ContextX::FailedPack(failed, ids))
}

pub fn mk_tensor(tuple: PermissionTuple, ids: ChoiceIds) -> Context {
    Arc::new(ContextX::Tensor(tuple, ids))
}

pub fn mk_choice(elems: Vec<Context>) -> Context {
    Arc::new(ContextX::Choice(elems))
}

pub fn mk_all(elems: Vec<Context>) -> Context {
    Arc::new(ContextX::All(elems))
}

/// One tensor per tuple; several tuples make a Choice whose elements get fresh ids under `ids`
pub fn branch(ctx: &Ctx, ids: ChoiceIds, tuples: Vec<PermissionTuple>, purpose: &str) -> Context {
    if tuples.len() == 1 {
        let mut tuples = tuples;
        return mk_tensor(tuples.remove(0), ids);
    }
    mk_choice(tuples.into_iter().map(|t| mk_tensor(t, ctx.fresh_ids(ids, purpose))).collect())
}

pub fn ids(context: &Context) -> Option<ChoiceIds> {
    match &**context {
        ContextX::True(ids)
        | ContextX::FailedPack(_, ids)
        | ContextX::False(ids)
        | ContextX::Tensor(_, ids) => Some(*ids),
        ContextX::Choice(_) | ContextX::All(_) => None,
    }
}

pub fn is_true_context(context: &Context) -> bool {
    match &**context {
        ContextX::True(_) | ContextX::FailedPack(..) => true,
        ContextX::False(_) | ContextX::Tensor(..) => false,
        ContextX::Choice(es) => es.iter().all(is_true_context),
        ContextX::All(es) => es.iter().any(is_true_context),
    }
}

pub fn is_false_context(context: &Context) -> bool {
    match &**context {
        ContextX::False(_) => true,
        ContextX::True(_) | ContextX::FailedPack(..) | ContextX::Tensor(..) => false,
        ContextX::Choice(es) => es.iter().any(is_false_context),
        ContextX::All(es) => es.iter().all(is_false_context),
    }
}

/// Lightweight: only looks at declared impossibility, never runs the solver
pub fn is_impossible(context: &Context) -> bool {
    match &**context {
        ContextX::True(_) | ContextX::FailedPack(..) => true,
        ContextX::False(_) => false,
        ContextX::Tensor(t, _) => t.is_impossible(),
        ContextX::Choice(es) => es.iter().all(is_impossible),
        ContextX::All(es) => es.iter().any(is_impossible),
    }
}

/// Exactly one concrete node
pub fn is_single_context(context: &Context) -> bool {
    match &**context {
        ContextX::Choice(es) | ContextX::All(es) => es.len() == 1 && is_single_context(&es[0]),
        _ => true,
    }
}

/// Rebuild the context with every tensor replaced by f's result
pub fn map_tensors(
    context: &Context,
    f: &mut dyn FnMut(&PermissionTuple, ChoiceIds) -> Context,
) -> Context {
    match &**context {
        ContextX::True(_) | ContextX::FailedPack(..) | ContextX::False(_) => context.clone(),
        ContextX::Tensor(t, ids) => f(t, *ids),
        ContextX::Choice(es) => mk_choice(es.iter().map(|e| map_tensors(e, f)).collect()),
        ContextX::All(es) => mk_all(es.iter().map(|e| map_tensors(e, f)).collect()),
    }
}

/// Simplify: flatten nested nodes of the same kind, drop neutral elements,
/// collapse absorbing ones.  With `freeze`, also drop elements subsumed by a sibling
/// (Choice keeps the most precise, All the least precise).
pub fn compact(context: &Context, freeze: bool) -> Context {
    match &**context {
        ContextX::Choice(es) => compact_list(es, freeze, true),
        ContextX::All(es) => compact_list(es, freeze, false),
        _ => context.clone(),
    }
}

fn compact_list(es: &[Context], freeze: bool, is_choice: bool) -> Context {
    // for Choice: False absorbs and True is neutral; All is the dual
    let absorbing = |c: &Context| if is_choice { is_false_context(c) } else { is_true_context(c) };
    let neutral = |c: &Context| if is_choice { is_true_context(c) } else { is_false_context(c) };
    let mut candidates: Vec<Context> = Vec::new();
    let mut first_neutral: Option<Context> = None;
    for e in es {
        let e = compact(e, freeze);
        if absorbing(&e) {
            return e;
        }
        if neutral(&e) {
            if first_neutral.is_none() {
                first_neutral = Some(e);
            }
            continue;
        }
        match (&*e, is_choice) {
            (ContextX::Choice(inner), true) | (ContextX::All(inner), false) => {
                candidates.extend(inner.iter().cloned())
            }
            _ => candidates.push(e),
        }
    }
    let mut survivors: Vec<Context> = Vec::new();
    for c in candidates {
        // `better(a, b)`: a makes b redundant
        let better = |a: &Context, b: &Context| {
            if is_choice { at_least_as_precise(a, b) } else { at_least_as_precise(b, a) }
        };
        if freeze {
            if survivors.iter().any(|s| better(s, &c)) {
                continue;
            }
            survivors.retain(|s| !better(&c, s));
        } else if survivors.contains(&c) {
            continue;
        }
        survivors.push(c);
    }
    match survivors.len() {
        // keep a neutral element around, it may carry the reason for a failure
        0 => match first_neutral {
            Some(n) => n,
            None if is_choice => mk_choice(Vec::new()),
            None => mk_all(Vec::new()),
        },
        1 => survivors.remove(0),
        _ if is_choice => mk_choice(survivors),
        _ => mk_all(survivors),
    }
}

/// Does `this` carry at least as much information as `other`?
pub fn at_least_as_precise(this: &Context, other: &Context) -> bool {
    match &**this {
        ContextX::False(_) => return true,
        ContextX::All(es) if es.is_empty() => return true,
        _ => {}
    }
    match &**other {
        ContextX::True(_) | ContextX::FailedPack(..) | ContextX::False(_) => true,
        ContextX::Choice(es) => es.iter().all(|e| at_least_as_precise(this, e)),
        ContextX::All(es) => es.is_empty() || es.iter().any(|e| at_least_as_precise(this, e)),
        ContextX::Tensor(t2, _) => match &**this {
            ContextX::Choice(es) => es.iter().any(|e| at_least_as_precise(e, other)),
            ContextX::All(es) => es.iter().all(|e| at_least_as_precise(e, other)),
            ContextX::True(_) | ContextX::FailedPack(..) => false,
            ContextX::False(_) => true,
            ContextX::Tensor(t1, _) => t1.at_least_as_precise(t2),
        },
    }
}

/// Least upper bound at a control-flow merge
pub fn join(ctx: &Ctx, this: &Context, other: &Context, mp: MergePoint) -> Context {
    match (&**this, &**other) {
        (ContextX::True(_), _) | (ContextX::FailedPack(..), _) => this.clone(),
        (_, ContextX::True(_)) | (_, ContextX::FailedPack(..)) => other.clone(),
        (ContextX::False(_), _) => other.clone(),
        (_, ContextX::False(_)) => this.clone(),
        (ContextX::Choice(es), _) => mk_choice(es.iter().map(|e| join(ctx, e, other, mp)).collect()),
        (ContextX::All(es), _) => mk_all(es.iter().map(|e| join(ctx, e, other, mp)).collect()),
        (_, ContextX::Choice(es)) => mk_choice(es.iter().map(|e| join(ctx, this, e, mp)).collect()),
        (_, ContextX::All(es)) => mk_all(es.iter().map(|e| join(ctx, this, e, mp)).collect()),
        (ContextX::Tensor(t1, ids1), ContextX::Tensor(t2, ids2)) => {
            let tuple = t1.join(t2, mp, &ctx.supply);
            let ids = if ids1 == ids2 {
                *ids1
            } else {
                let parent = ctx.choices.common_ancestor(ids1.choice, ids2.choice);
                ChoiceIds { parent, choice: ctx.choices.mint(parent, "join") }
            };
            mk_tensor(tuple, ids)
        }
    }
}

/// The younger of the ids of two concrete nodes
pub fn younger_ids(a: ChoiceIds, b: ChoiceIds) -> ChoiceIds {
    if ChoiceTree::younger(a.choice, b.choice) == a.choice { a } else { b }
}

pub fn failed_pack_message(failed: &FailedPack) -> Message {
    error_bare(format!(
        "Previously attempted to pack to {} but could not because the following invariant was unsatisfiable: {}",
        failed.state, failed.invariant
    ))
}

/// Run a check on every tensor.  A Choice succeeds if any element does,
/// an All if every element does.  Failures are joined with OR / AND.
pub fn check_tensors(
    context: &Context,
    f: &mut dyn FnMut(&PermissionTuple, ChoiceIds) -> Result<(), Message>,
) -> Result<(), Message> {
    match &**context {
        ContextX::True(_) => Err(error_bare(NO_CONTEXT)),
        ContextX::FailedPack(failed, _) => Err(failed_pack_message(failed)),
        ContextX::False(_) => Ok(()),
        ContextX::Tensor(t, ids) => f(t, *ids),
        ContextX::Choice(es) => {
            if es.is_empty() {
                return Err(error_bare(NO_CONTEXT));
            }
            let mut errors = Vec::new();
            for e in es {
                match check_tensors(e, f) {
                    Ok(()) => return Ok(()),
                    Err(err) => errors.push(err),
                }
            }
            Err(join_errors(&errors, " OR ", "[", "]"))
        }
        ContextX::All(es) => {
            let mut errors = Vec::new();
            for e in es {
                if let Err(err) = check_tensors(e, f) {
                    errors.push(err);
                }
            }
            if errors.is_empty() { Ok(()) } else { Err(join_errors(&errors, " AND ", "{", "}")) }
        }
    }
}
