use crate::ast::{Ident, Location, MergePoint, Span};
use crate::choice::ChoiceIds;
use crate::context::{
    at_least_as_precise, compact, is_impossible, join, map_tensors, mk_false, mk_tensor, Context,
};
use crate::ctx::Ctx;
use crate::def::{alive, is_arg_target, TARGET_THIS};
use crate::messages::Message;
use crate::operations::{self, FieldAccess, Invocation};
use crate::permission::PermissionFromAnnotation;
use crate::permission_set::PermissionSetFromAnnotations;
use crate::permissions::FractionalPermissions;
use crate::signature::{ClassDecl, Predicate};
use crate::tuple::TupleBuilder;

/// What the analysis knows about the method being analyzed
#[derive(Clone, Debug)]
pub struct MethodEnv {
    /// class of the receiver, if it has a protocol
    pub class: Option<ClassDecl>,
    pub this: Option<Location>,
    pub params: Vec<Location>,
    pub result: Option<Location>,
    /// locations of the receiver's fields
    pub fields: Vec<(Ident, Location)>,
    pub pre: Predicate,
    pub post: Predicate,
}

impl MethodEnv {
    fn class(&self) -> Option<&ClassDecl> {
        self.class.as_ref()
    }
}

/// Lattice element handed to the flow analysis driver; None is bottom
#[derive(Clone, Debug, PartialEq)]
pub struct PluralContext(Option<Context>);

impl PluralContext {
    pub fn bottom() -> Self {
        PluralContext(None)
    }

    pub fn new(context: Context) -> Self {
        PluralContext(Some(context))
    }

    pub fn is_bottom(&self) -> bool {
        self.0.is_none()
    }

    pub fn context(&self) -> Option<&Context> {
        self.0.as_ref()
    }

    pub fn is_impossible(&self) -> bool {
        self.0.as_ref().map_or(false, is_impossible)
    }

    pub fn at_least_as_precise(&self, other: &PluralContext) -> bool {
        match (&self.0, &other.0) {
            (None, _) => true,
            (_, None) => false,
            (Some(c1), Some(c2)) => at_least_as_precise(c1, c2),
        }
    }

    pub fn join(&self, ctx: &Ctx, other: &PluralContext, mp: MergePoint) -> PluralContext {
        let (c1, c2) = match (&self.0, &other.0) {
            (None, _) => return other.clone(),
            (_, None) => return self.clone(),
            (Some(c1), Some(c2)) => (c1, c2),
        };
        ctx.log.borrow_mut().log_join(mp == MergePoint::Loop);
        let joined = compact(&join(ctx, c1, c2, mp), true);
        self.debug_log(ctx, &joined);
        PluralContext::new(joined)
    }

    pub fn freeze(&self) -> PluralContext {
        PluralContext(self.0.as_ref().map(|c| compact(c, true)))
    }

    fn debug_log(&self, ctx: &Ctx, context: &Context) {
        if ctx.debug {
            ctx.log.borrow_mut().log_context(context);
        }
    }

    fn apply<F: FnOnce(&Context) -> Context>(&self, ctx: &Ctx, f: F) -> PluralContext {
        match &self.0 {
            None => self.clone(),
            Some(c) => {
                let result = f(c);
                self.debug_log(ctx, &result);
                PluralContext::new(result)
            }
        }
    }

    fn check<F: FnOnce(&Context) -> Result<(), Message>>(&self, f: F) -> Result<(), Message> {
        match &self.0 {
            None => Ok(()),
            Some(c) => f(c),
        }
    }

    pub fn handle_method_call(&self, ctx: &Ctx, env: &MethodEnv, inv: &Invocation) -> PluralContext {
        self.apply(ctx, |c| operations::handle_method_call(ctx, env.class(), c, inv))
    }

    pub fn handle_new_object(&self, ctx: &Ctx, inv: &Invocation) -> PluralContext {
        self.apply(ctx, |c| operations::handle_new_object(ctx, c, inv))
    }

    pub fn handle_constructor_call(&self, ctx: &Ctx, inv: &Invocation) -> PluralContext {
        self.apply(ctx, |c| operations::handle_constructor_call(ctx, c, inv))
    }

    pub fn prepare_for_field_read(&self, ctx: &Ctx, env: &MethodEnv, fa: &FieldAccess) -> PluralContext {
        self.apply(ctx, |c| operations::prepare_for_field_read(ctx, env.class(), c, fa))
    }

    pub fn prepare_for_field_write(&self, ctx: &Ctx, env: &MethodEnv, fa: &FieldAccess) -> PluralContext {
        self.apply(ctx, |c| operations::prepare_for_field_write(ctx, env.class(), c, fa))
    }

    /// Share and pure permissions lose their state information, e.g. after a call
    /// that may have run other code touching the same objects
    pub fn forget_share_and_pure_states(&self, ctx: &Ctx) -> PluralContext {
        self.apply(ctx, |c| {
            map_tensors(c, &mut |t, ids| {
                let mut b = t.to_builder();
                for (loc, perms) in t.iter() {
                    b.set(*loc, perms.forget_share_and_pure_states());
                }
                mk_tensor(b.build(), ids)
            })
        })
    }

    pub fn check_regular_call_precondition(&self, ctx: &Ctx, inv: &Invocation) -> Result<(), Message> {
        self.check(|c| operations::check_regular_call_precondition(ctx, c, inv))
    }

    pub fn check_post_condition(&self, ctx: &Ctx, env: &MethodEnv, span: &Span) -> Result<(), Message> {
        self.check(|c| {
            operations::check_post_condition(ctx, env.class(), c, &env.post, &env.params, env.result, span)
        })
    }

    pub fn check_states(
        &self,
        loc: Location,
        states: &[Ident],
        in_frame: bool,
        span: &Span,
    ) -> Result<(), Message> {
        self.check(|c| operations::check_states(c, loc, states, in_frame, span))
    }
}

fn entry_tuple(ctx: &Ctx, env: &MethodEnv) -> Result<TupleBuilder, Message> {
    let mut b = TupleBuilder::new();
    if let Some(this) = env.this {
        b.set_receiver(this);
        b.set(this, FractionalPermissions::empty());
    }
    for loc in env.params.iter() {
        b.set(*loc, FractionalPermissions::empty());
    }
    for (field, loc) in env.fields.iter() {
        b.map_field(field, *loc);
    }
    for target in env.pre.targets() {
        let loc = if *target == TARGET_THIS {
            env.this
        } else {
            is_arg_target(&target).and_then(|i| env.params.get(i).cloned())
        };
        let loc = match loc {
            Some(loc) => loc,
            None => continue,
        };
        if let Some(set) = env.pre.permissions_for(&target, ctx.named_fractions, &ctx.supply)? {
            b.set(loc, b.get(loc).merge_in(&set, &ctx.supply));
        }
    }
    Ok(b)
}

/// Context at method entry: the precondition's permissions, with named fractions
pub fn create_initial_method_context(ctx: &Ctx, env: &MethodEnv) -> Result<PluralContext, Message> {
    if env.pre.is_void() {
        return Ok(PluralContext::new(mk_false(ctx.fresh_ids(ChoiceIds::root(), "method"))));
    }
    let b = entry_tuple(ctx, env)?;
    let context = mk_tensor(b.build(), ChoiceIds::root());
    ctx.log.borrow_mut().log_context(&context);
    Ok(PluralContext::new(context))
}

/// Context at constructor entry: the receiver is unpacked at alive, with a unique
/// frame permission nobody else can hold
pub fn create_initial_constructor_context(ctx: &Ctx, env: &MethodEnv) -> Result<PluralContext, Message> {
    if env.pre.is_void() {
        return Ok(PluralContext::new(mk_false(ctx.fresh_ids(ChoiceIds::root(), "constructor"))));
    }
    let mut b = entry_tuple(ctx, env)?;
    if let (Some(this), Some(class)) = (env.this, env.class()) {
        let orphan = PermissionFromAnnotation::unique_orphan(&class.space, &alive(), true, &[]);
        let perms = b.get(this);
        let orphan = PermissionSetFromAnnotations::from_permission(&class.space, orphan);
        let perms = perms.merge_in(&orphan, &ctx.supply);
        b.set(this, perms);
        b.unpack_receiver(ctx, class, &alive());
    }
    let context = mk_tensor(b.build(), ChoiceIds::root());
    ctx.log.borrow_mut().log_context(&context);
    Ok(PluralContext::new(context))
}
