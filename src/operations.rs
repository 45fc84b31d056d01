//! Transfer functions for calls and field accesses, and the checks run before them.
//!
//! A call splits the precondition's permissions off the arguments and merges the
//! postcondition's permissions back in.  Several specification cases make a Choice
//! over the cases; a case that cannot be satisfied drops out of the Choice.

use crate::ast::{Ident, Location, Span};
use crate::choice::ChoiceIds;
use crate::context::{
    check_tensors, compact, is_true_context, map_tensors, mk_choice, mk_false, mk_tensor, mk_true,
    Context,
};
use crate::ctx::Ctx;
use crate::def::{alive, is_arg_target, TARGET_RESULT, TARGET_THIS};
use crate::messages::{error, join_errors, Message};
use crate::signature::{ClassDecl, MethodCase, MethodSignature, Predicate};
use crate::tuple::{fancy_unpack_receiver, wrangle_receiver_into_states, PermissionTuple};
use crate::util::push_unique;

#[derive(Clone, Debug)]
pub struct Invocation {
    pub span: Span,
    pub signature: MethodSignature,
    pub receiver: Option<Location>,
    pub arguments: Vec<Location>,
    /// where the result goes (for `new`, the new object)
    pub target: Option<Location>,
    pub is_super_call: bool,
}

#[derive(Clone, Debug)]
pub struct FieldAccess {
    pub span: Span,
    pub object: Location,
    pub field: Ident,
    /// value written, or location read into
    pub source: Option<Location>,
}

impl Invocation {
    fn resolve(&self, target: &str) -> Option<Location> {
        if target == TARGET_THIS {
            self.receiver
        } else if target == TARGET_RESULT {
            self.target
        } else {
            is_arg_target(target).and_then(|i| self.arguments.get(i).cloned())
        }
    }

    /// Name of the analyzed receiver in the callee's specification, if it is passed
    fn target_of(&self, loc: Location) -> Option<String> {
        if self.receiver == Some(loc) {
            return Some(TARGET_THIS.to_string());
        }
        self.arguments.iter().position(|a| *a == loc).map(|i| crate::def::arg_target(i).to_string())
    }
}

/// How a target is called in diagnostics
pub fn source_string(target: &str, is_post: bool) -> String {
    if target == TARGET_THIS {
        "this".to_string()
    } else if target == TARGET_RESULT {
        "result".to_string()
    } else if let Some(i) = is_arg_target(target) {
        if is_post { format!("formal parameter #{}", i) } else { format!("argument #{}", i) }
    } else {
        target.to_string()
    }
}

/// One specification case applied to one tuple
pub fn handle_invocation(
    ctx: &Ctx,
    tuple: &PermissionTuple,
    ids: ChoiceIds,
    inv: &Invocation,
    case: &MethodCase,
) -> Context {
    let mut b = tuple.to_builder();
    if case.pre.is_void() {
        return mk_true(ids);
    }
    for target in case.pre.targets() {
        let loc = match inv.resolve(&target) {
            Some(loc) => loc,
            None => continue,
        };
        let available = b.get(loc);
        if !available.is_in_states(&case.pre.required_states(&target, false), false)
            || !available.is_in_states(&case.pre.required_states(&target, true), true)
        {
            return mk_true(ids);
        }
        let set = match case.pre.permissions_for(&target, false, &ctx.supply) {
            Ok(Some(set)) => set,
            Ok(None) => continue,
            Err(_) => return mk_true(ids),
        };
        let perms = available.split_off(&set, &ctx.supply);
        if perms.is_unsatisfiable() {
            return mk_true(ids);
        }
        let perms = if case.effect_free { perms } else { perms.forget_state_info() };
        b.set(loc, perms);
    }
    if case.post.is_void() {
        return mk_false(ids);
    }
    for target in case.post.targets() {
        let loc = match inv.resolve(&target) {
            Some(loc) => loc,
            None => continue,
        };
        match case.post.permissions_for(&target, false, &ctx.supply) {
            Ok(Some(set)) => {
                let perms = b.get(loc).merge_in(&set, &ctx.supply);
                b.set(loc, perms);
            }
            Ok(None) => {}
            Err(_) => return mk_true(ids),
        }
    }
    mk_tensor(b.build(), ids)
}

fn handle_cases(ctx: &Ctx, tuple: &PermissionTuple, ids: ChoiceIds, inv: &Invocation) -> Context {
    let cases = &inv.signature.cases;
    if cases.len() == 1 {
        return handle_invocation(ctx, tuple, ids, inv, &cases[0]);
    }
    mk_choice(
        cases
            .iter()
            .map(|case| handle_invocation(ctx, tuple, ctx.fresh_ids(ids, "case"), inv, case))
            .collect(),
    )
}

/// Get the analyzed receiver ready to be passed to a call
fn prepare_receiver(
    ctx: &Ctx,
    class: Option<&ClassDecl>,
    tuple: &PermissionTuple,
    ids: ChoiceIds,
    inv: &Invocation,
) -> Context {
    let (class, recv) = match (class, tuple.receiver()) {
        (Some(class), Some(recv)) => (class, recv),
        _ => return mk_tensor(tuple.clone(), ids),
    };
    if inv.is_super_call {
        if tuple.is_receiver_unpacked() {
            return mk_tensor(tuple.clone(), ids);
        }
        return fancy_unpack_receiver(ctx, class, tuple, ids, &alive(), true);
    }
    let target = match inv.target_of(recv) {
        Some(target) => target,
        None => return mk_tensor(tuple.clone(), ids),
    };
    if !ctx.pack_before_call || !tuple.is_receiver_unpacked() {
        return mk_tensor(tuple.clone(), ids);
    }
    let mut needed = Vec::new();
    for case in inv.signature.cases.iter() {
        for s in case.pre.required_states(&target, true) {
            push_unique(&mut needed, s);
        }
    }
    wrangle_receiver_into_states(ctx, class, tuple, ids, &needed, false)
}

/// A call that cannot go through anywhere makes the rest of the method unreachable,
/// so that one failure is reported once
fn finish_call(result: Context, ids: ChoiceIds) -> Context {
    let result = compact(&result, false);
    if is_true_context(&result) { mk_false(ids) } else { result }
}

pub fn handle_method_call(ctx: &Ctx, class: Option<&ClassDecl>, context: &Context, inv: &Invocation) -> Context {
    ctx.log.borrow_mut().log_call(&inv.signature.name, inv.signature.cases.len());
    ctx.log.borrow_mut().indent();
    let result = map_tensors(context, &mut |t, ids| {
        let prepared = prepare_receiver(ctx, class, t, ids, inv);
        let called = map_tensors(&prepared, &mut |t, ids| handle_cases(ctx, t, ids, inv));
        finish_call(called, ids)
    });
    ctx.log.borrow_mut().unindent();
    compact(&result, false)
}

/// `new C(...)`: the new object is both the receiver and the result
pub fn handle_new_object(ctx: &Ctx, context: &Context, inv: &Invocation) -> Context {
    let inv = Invocation { receiver: inv.target, ..inv.clone() };
    ctx.log.borrow_mut().log_call(&inv.signature.name, inv.signature.cases.len());
    let result = map_tensors(context, &mut |t, ids| finish_call(handle_cases(ctx, t, ids, &inv), ids));
    compact(&result, false)
}

/// `super(...)` or `this(...)` inside a constructor: the analyzed receiver gets the callee's
/// postcondition; it is neither packed nor unpacked for the call
pub fn handle_constructor_call(ctx: &Ctx, context: &Context, inv: &Invocation) -> Context {
    ctx.log.borrow_mut().log_call(&inv.signature.name, inv.signature.cases.len());
    let result = map_tensors(context, &mut |t, ids| {
        let inv = Invocation { receiver: t.receiver(), ..inv.clone() };
        finish_call(handle_cases(ctx, t, ids, &inv), ids)
    });
    compact(&result, false)
}

fn field_access_unpacked(
    class: &ClassDecl,
    tuple: &PermissionTuple,
    ids: ChoiceIds,
    node: &Ident,
    fa: &FieldAccess,
    write: bool,
) -> Context {
    let recv = fa.object;
    let perms = tuple.get(recv);
    let root = match perms.unpacked_permission() {
        Some(u) => u.root().clone(),
        None => return mk_true(ids),
    };
    let space = &class.space;
    let mut b = tuple.to_builder();
    if write {
        if !space.first_bigger_than_second(&root, node) {
            return mk_true(ids);
        }
        b.set(recv, perms.make_unpacked_permission_modifiable());
        if let Some(src) = fa.source {
            b.map_field(&fa.field, src);
        }
    } else {
        if space.are_orthogonal(&root, node) {
            return mk_true(ids);
        }
        if let (Some(src), None) = (fa.source, tuple.field_location(&fa.field)) {
            b.map_field(&fa.field, src);
        }
    }
    mk_tensor(b.build(), ids)
}

fn prepare_for_field_access(
    ctx: &Ctx,
    class: Option<&ClassDecl>,
    context: &Context,
    fa: &FieldAccess,
    write: bool,
) -> Context {
    ctx.log.borrow_mut().log_field(write, &fa.field);
    let class = match class {
        Some(class) => class,
        None => return context.clone(),
    };
    let node = match class.space.field_root_node(&fa.field) {
        Some(node) => node,
        None => return context.clone(),
    };
    let result = map_tensors(context, &mut |t, ids| {
        if t.receiver() != Some(fa.object) {
            ctx.log.borrow_mut().comment(&format!("access to {} of another object: no-op", fa.field));
            return mk_tensor(t.clone(), ids);
        }
        if t.get(fa.object).is_bottom() {
            return mk_tensor(t.clone(), ids);
        }
        if t.is_receiver_unpacked() {
            let root = t.get(fa.object).unpacked_permission().map(|u| u.root().clone());
            let covered = root.map_or(false, |r| class.space.first_bigger_than_second(&r, &node));
            if covered || !write {
                return field_access_unpacked(class, t, ids, &node, fa, write);
            }
        }
        let unpacked = fancy_unpack_receiver(ctx, class, t, ids, &node, false);
        map_tensors(&unpacked, &mut |t, ids| field_access_unpacked(class, t, ids, &node, fa, write))
    });
    compact(&result, false)
}

pub fn prepare_for_field_read(ctx: &Ctx, class: Option<&ClassDecl>, context: &Context, fa: &FieldAccess) -> Context {
    prepare_for_field_access(ctx, class, context, fa, false)
}

pub fn prepare_for_field_write(ctx: &Ctx, class: Option<&ClassDecl>, context: &Context, fa: &FieldAccess) -> Context {
    prepare_for_field_access(ctx, class, context, fa, true)
}

/// Check one predicate against one tuple; the first failure is reported
fn check_predicate(
    ctx: &Ctx,
    tuple: &PermissionTuple,
    pred: &Predicate,
    resolve: &dyn Fn(&str) -> Option<Location>,
    is_post: bool,
    span: &Span,
) -> Result<(), Message> {
    for target in pred.targets() {
        let loc = match resolve(&target) {
            Some(loc) => loc,
            None => continue,
        };
        let perms = tuple.get(loc);
        if perms.is_bottom() {
            continue;
        }
        let who = source_string(&target, is_post);
        for in_frame in [false, true].iter() {
            let states = pred.required_states(&target, *in_frame);
            if !perms.is_in_states(&states, *in_frame) {
                let states: Vec<&str> = states.iter().map(|s| s.as_str()).collect();
                let known: Vec<String> =
                    perms.state_info(*in_frame).iter().map(|s| s.to_string()).collect();
                return Err(error(
                    format!(
                        "{}{} must {} state {} but is in {}",
                        who,
                        if *in_frame { " frame" } else { "" },
                        if is_post { "return in" } else { "be in" },
                        states.join(","),
                        known.join(",")
                    ),
                    span,
                ));
            }
        }
        let set = match pred.permissions_for(&target, false, &ctx.supply)? {
            Some(set) => set,
            None => continue,
        };
        if perms.split_off(&set, &ctx.supply).is_unsatisfiable() {
            return Err(error(
                format!(
                    "{} must {} permissions {} but it has {}",
                    who,
                    if is_post { "return" } else { "have" },
                    set,
                    perms.to_user_string()
                ),
                span,
            ));
        }
    }
    Ok(())
}

/// Can some case of the callee's specification be satisfied in every tensor?
pub fn check_regular_call_precondition(ctx: &Ctx, context: &Context, inv: &Invocation) -> Result<(), Message> {
    check_tensors(context, &mut |t, _| {
        let mut errors = Vec::new();
        for case in inv.signature.cases.iter() {
            let resolve = |target: &str| inv.resolve(target);
            match check_predicate(ctx, t, &case.pre, &resolve, false, &inv.span) {
                Ok(()) => return Ok(()),
                Err(err) => errors.push(err),
            }
        }
        Err(join_errors(&errors, " OR ", "[", "]"))
    })
}

/// Does every tensor satisfy the analyzed method's postcondition?
/// The receiver is packed to the states the postcondition asks for first.
pub fn check_post_condition(
    ctx: &Ctx,
    class: Option<&ClassDecl>,
    context: &Context,
    post: &Predicate,
    params: &[Location],
    result: Option<Location>,
    span: &Span,
) -> Result<(), Message> {
    let needed = post.required_states(TARGET_THIS, true);
    let wrangled = match class {
        Some(class) => map_tensors(context, &mut |t, ids| {
            wrangle_receiver_into_states(ctx, class, t, ids, &needed, false)
        }),
        None => context.clone(),
    };
    check_tensors(&wrangled, &mut |t, _| {
        let resolve = |target: &str| {
            if target == TARGET_THIS {
                t.receiver()
            } else if target == TARGET_RESULT {
                result
            } else {
                is_arg_target(target).and_then(|i| params.get(i).cloned())
            }
        };
        check_predicate(ctx, t, post, &resolve, true, span)
    })
    .map_err(|err| {
        if err.note.contains("Previously attempted to pack") {
            err.help(format!(
                "Could not pack receiver to states {} due to insufficient field permissions for return",
                needed.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(",")
            ))
        } else {
            err
        }
    })
}

/// Is the object at `loc` in all of `states` in every tensor?
pub fn check_states(
    context: &Context,
    loc: Location,
    states: &[Ident],
    in_frame: bool,
    span: &Span,
) -> Result<(), Message> {
    check_tensors(context, &mut |t, _| {
        let perms = t.get(loc);
        if perms.is_in_states(states, in_frame) {
            Ok(())
        } else {
            let states: Vec<&str> = states.iter().map(|s| s.as_str()).collect();
            let known: Vec<String> = perms.state_info(in_frame).iter().map(|s| s.to_string()).collect();
            Err(error(
                format!("{} must be in state {} but is in {}", loc, states.join(","), known.join(",")),
                span,
            ))
        }
    })
}
