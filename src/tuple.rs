//! Permissions for every location the analysis tracks, plus the packing protocol
//! for the receiver of the analyzed method.
//!
//! Unpacking the receiver to a node hands out the invariants of the states it is known
//! to be in as permissions for its fields.  Packing it to some states takes the
//! invariants of those states back out of the field permissions; if that fails,
//! the pack fails with the unsatisfiable invariant.

use crate::ast::{Ident, Location, MergePoint};
use crate::context::{branch, map_tensors, mk_failed_pack, mk_tensor, mk_true, Context};
use crate::choice::ChoiceIds;
use crate::ctx::Ctx;
use crate::def::alive;
use crate::fraction::FractionSupply;
use crate::permission_set::PermissionSetFromAnnotations;
use crate::permissions::FractionalPermissions;
use crate::signature::{ClassDecl, Predicate, PredicateX};
use crate::util::push_unique;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailedPack {
    pub state: Ident,
    pub invariant: String,
}

pub type PackResult = Result<(), FailedPack>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PermissionTuple {
    perms: im::OrdMap<Location, FractionalPermissions>,
    receiver: Option<Location>,
    fields: im::OrdMap<Ident, Location>,
}

impl PermissionTuple {
    pub fn empty() -> Self {
        PermissionTuple { perms: im::OrdMap::new(), receiver: None, fields: im::OrdMap::new() }
    }

    pub fn to_builder(&self) -> TupleBuilder {
        TupleBuilder { tuple: self.clone() }
    }

    /// Missing locations hold no permissions
    pub fn get(&self, loc: Location) -> FractionalPermissions {
        self.perms.get(&loc).cloned().unwrap_or_else(FractionalPermissions::empty)
    }

    pub fn locations(&self) -> Vec<Location> {
        self.perms.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Location, &FractionalPermissions)> {
        self.perms.iter()
    }

    pub fn receiver(&self) -> Option<Location> {
        self.receiver
    }

    pub fn field_location(&self, field: &Ident) -> Option<Location> {
        self.fields.get(field).cloned()
    }

    pub fn is_receiver_unpacked(&self) -> bool {
        self.receiver.map_or(false, |r| self.get(r).is_unpacked())
    }

    /// Declared impossible somewhere; does not run the solver
    pub fn is_impossible(&self) -> bool {
        self.perms.values().any(|p| p.is_impossible())
    }

    pub fn is_unsatisfiable(&self) -> bool {
        self.perms.values().any(|p| p.is_unsatisfiable())
    }

    pub fn join(&self, other: &PermissionTuple, mp: MergePoint, supply: &FractionSupply) -> Self {
        let mut perms = im::OrdMap::new();
        let mut locs = self.locations();
        for l in other.locations() {
            push_unique(&mut locs, l);
        }
        for l in locs {
            perms.insert(l, self.get(l).join(&other.get(l), mp, supply));
        }
        let fields = self.fields.clone().union(other.fields.clone());
        PermissionTuple { perms, receiver: self.receiver.or(other.receiver), fields }
    }

    pub fn at_least_as_precise(&self, other: &PermissionTuple) -> bool {
        if self == other {
            return true;
        }
        let mut locs = self.locations();
        for l in other.locations() {
            push_unique(&mut locs, l);
        }
        locs.into_iter().all(|l| self.get(l).at_least_as_precise(&other.get(l)))
    }
}

#[derive(Clone, Debug)]
pub struct TupleBuilder {
    tuple: PermissionTuple,
}

impl TupleBuilder {
    pub fn new() -> Self {
        TupleBuilder { tuple: PermissionTuple::empty() }
    }

    pub fn get(&self, loc: Location) -> FractionalPermissions {
        self.tuple.get(loc)
    }

    pub fn set(&mut self, loc: Location, perms: FractionalPermissions) {
        self.tuple.perms.insert(loc, perms);
    }

    pub fn set_receiver(&mut self, loc: Location) {
        self.tuple.receiver = Some(loc);
    }

    /// Location holding the value of a field of the receiver
    pub fn map_field(&mut self, field: &Ident, loc: Location) {
        self.tuple.fields.insert(field.clone(), loc);
    }

    pub fn build(self) -> PermissionTuple {
        self.tuple
    }

    fn receiver_or_panic(&self) -> Location {
        match self.tuple.receiver {
            Some(r) => r,
            None => panic!("internal error: tuple without receiver"),
        }
    }

    /// Unpack the receiver to `root`; the invariants of the states known below `root`
    /// become field permissions
    pub fn unpack_receiver(&mut self, ctx: &Ctx, class: &ClassDecl, root: &Ident) {
        let recv = self.receiver_or_panic();
        let perms = self.get(recv);
        let known: Vec<Ident> = perms
            .state_info(true)
            .into_iter()
            .filter(|s| class.space.first_bigger_than_second(root, s))
            .collect();
        self.set(recv, perms.unpack(&class.space, root, &ctx.supply));
        ctx.log.borrow_mut().log_unpack(recv, root);
        for (_, inv) in get_states_and_invs(class, root, &known) {
            for atom in inv.atoms() {
                if let Some(loc) = self.tuple.field_location(&atom.target) {
                    let set = PermissionSetFromAnnotations::singleton(
                        &atom.space,
                        &atom.spec,
                        false,
                        &ctx.supply,
                    );
                    let merged = self.get(loc).merge_in(&set, &ctx.supply);
                    self.set(loc, merged);
                }
            }
        }
    }

    /// Pack the receiver to `states`, taking their invariants out of the field permissions.
    /// On failure the builder is unchanged.
    pub fn pack_receiver(&mut self, ctx: &Ctx, class: &ClassDecl, states: &[Ident]) -> PackResult {
        let recv = self.receiver_or_panic();
        let perms = self.get(recv);
        let root = match perms.unpacked_permission() {
            Some(u) => u.root().clone(),
            None => panic!("internal error: packing while packed"),
        };
        let states: Vec<Ident> = states
            .iter()
            .filter(|s| class.space.first_bigger_than_second(&root, s))
            .cloned()
            .collect();
        let mut staged = self.tuple.clone();
        for (state, inv) in get_states_and_invs(class, &root, &states) {
            if let Err(failed) = take_invariant(ctx, &mut staged, &state, &inv) {
                ctx.log.borrow_mut().log_pack_failed(&failed.state, &failed.invariant);
                return Err(failed);
            }
        }
        staged.perms.insert(recv, perms.pack(&states, &ctx.supply));
        self.tuple = staged;
        ctx.log.borrow_mut().log_pack(recv, &states);
        Ok(())
    }

    /// Give up on a failed pack: the receiver's permissions become unsatisfiable but packed
    pub fn invalid_pack_receiver(&mut self) {
        let recv = self.receiver_or_panic();
        let perms = self.get(recv);
        self.set(recv, perms.invalid_pack());
    }
}

fn take_invariant(ctx: &Ctx, tuple: &mut PermissionTuple, state: &Ident, inv: &Predicate) -> PackResult {
    let failed = || FailedPack { state: state.clone(), invariant: inv.to_string() };
    match &**inv {
        PredicateX::Void => Err(failed()),
        PredicateX::Atoms(atoms) => {
            for atom in atoms {
                let loc = match tuple.field_location(&atom.target) {
                    Some(loc) => loc,
                    None => return Err(failed()),
                };
                let set = PermissionSetFromAnnotations::singleton(
                    &atom.space,
                    &atom.spec,
                    false,
                    &ctx.supply,
                );
                let available = tuple.get(loc);
                if !available.is_in_states(&atom.spec.states, atom.spec.frame) {
                    return Err(failed());
                }
                let rest = available.split_off(&set, &ctx.supply);
                if rest.is_unsatisfiable() {
                    return Err(failed());
                }
                tuple.perms.insert(loc, rest);
            }
            Ok(())
        }
    }
}

/// Invariants of the states between `root` (inclusive) and each of `states`
pub fn get_states_and_invs(class: &ClassDecl, root: &Ident, states: &[Ident]) -> Vec<(Ident, Predicate)> {
    let mut nodes = vec![root.clone()];
    for s in states {
        for n in class.space.path_between(root, s) {
            push_unique(&mut nodes, n);
        }
    }
    nodes
        .into_iter()
        .filter_map(|n| class.invariant(&n).map(|inv| (n.clone(), inv.clone())))
        .collect()
}

/// Unpack the receiver so that `root` is accessible.
/// Each frame permission that covers `root`, or that `root` covers, is a candidate;
/// the result is a Choice over the candidates (plus the untouched tuple if `keep_packed`).
pub fn fancy_unpack_receiver(
    ctx: &Ctx,
    class: &ClassDecl,
    tuple: &PermissionTuple,
    ids: ChoiceIds,
    root: &Ident,
    keep_packed: bool,
) -> Context {
    let recv = match tuple.receiver() {
        Some(r) => r,
        None => return mk_tensor(tuple.clone(), ids),
    };
    let perms = tuple.get(recv);
    if perms.is_bottom() {
        return mk_tensor(tuple.clone(), ids);
    }
    if let Some(u) = perms.unpacked_permission() {
        if u.covers_node(root) {
            return mk_tensor(tuple.clone(), ids);
        }
        let packed = fancy_pack_receiver_to_best_guess(ctx, class, tuple, ids);
        return map_tensors(&packed, &mut |t, ids| {
            fancy_unpack_receiver(ctx, class, t, ids, root, keep_packed)
        });
    }
    let space = &class.space;
    let mut candidates: Vec<Ident> = Vec::new();
    for r in perms.frame_roots() {
        if space.first_bigger_than_second(&r, root) {
            push_unique(&mut candidates, root.clone());
        } else if space.first_bigger_than_second(root, &r) {
            push_unique(&mut candidates, r);
        }
    }
    if candidates.is_empty() {
        candidates.push(root.clone());
    }
    let mut results = Vec::new();
    if keep_packed {
        results.push(tuple.clone());
    }
    for r in candidates {
        let mut b = tuple.to_builder();
        b.unpack_receiver(ctx, class, &r);
        results.push(b.build());
    }
    branch(ctx, ids, results, "unpack")
}

/// Pack the receiver to whatever states its field permissions allow:
/// first the states it was known to be in, then every single state below the root,
/// and finally just the root.
pub fn fancy_pack_receiver_to_best_guess(
    ctx: &Ctx,
    class: &ClassDecl,
    tuple: &PermissionTuple,
    ids: ChoiceIds,
) -> Context {
    let recv = match tuple.receiver() {
        Some(r) => r,
        None => return mk_tensor(tuple.clone(), ids),
    };
    let perms = tuple.get(recv);
    let u = match perms.unpacked_permission() {
        Some(u) => u.clone(),
        None => return mk_tensor(tuple.clone(), ids),
    };
    let mut first_failure: Option<FailedPack> = None;
    let mut try_pack = |states: &[Ident]| -> Option<PermissionTuple> {
        let mut b = tuple.to_builder();
        match b.pack_receiver(ctx, class, states) {
            Ok(()) => Some(b.build()),
            Err(failed) => {
                if first_failure.is_none() {
                    first_failure = Some(failed);
                }
                None
            }
        }
    };
    if !u.state_info().is_empty() {
        if let Some(t) = try_pack(&u.state_info()[..]) {
            return mk_tensor(t, ids);
        }
    }
    let space = &class.space;
    let mut results = Vec::new();
    for n in space.all_nodes() {
        if *n != *u.root() && u.covers_node(n) && !space.is_dimension(n) {
            if let Some(t) = try_pack(&[n.clone()]) {
                results.push(t);
            }
        }
    }
    if results.is_empty() {
        if let Some(t) = try_pack(&[]) {
            results.push(t);
        }
    }
    if results.is_empty() {
        return match first_failure {
            Some(failed) => mk_failed_pack(failed, ids),
            None => mk_true(ids),
        };
    }
    branch(ctx, ids, results, "pack")
}

/// Get the receiver into the frame states `needed`:
/// pack an unpacked receiver (unless nothing is needed and `need_not_pack`),
/// then, if some needed state is still not known, unpack and re-pack to it.
pub fn wrangle_receiver_into_states(
    ctx: &Ctx,
    class: &ClassDecl,
    tuple: &PermissionTuple,
    ids: ChoiceIds,
    needed: &[Ident],
    need_not_pack: bool,
) -> Context {
    let recv = match tuple.receiver() {
        Some(r) => r,
        None => return mk_tensor(tuple.clone(), ids),
    };
    let perms = tuple.get(recv);
    if perms.is_bottom() {
        return mk_tensor(tuple.clone(), ids);
    }
    if needed.is_empty() {
        if !perms.is_unpacked() || need_not_pack {
            return mk_tensor(tuple.clone(), ids);
        }
        return fancy_pack_receiver_to_best_guess(ctx, class, tuple, ids);
    }
    let space = &class.space;
    let under = |root: &Ident| -> Vec<Ident> {
        needed.iter().filter(|s| space.first_bigger_than_second(root, s)).cloned().collect()
    };
    let mut tuple = tuple.clone();
    if let Some(u) = perms.unpacked_permission() {
        let mut states = under(u.root());
        if states.is_empty() {
            states = u.state_info().to_vec();
        }
        let mut b = tuple.to_builder();
        if let Err(failed) = b.pack_receiver(ctx, class, &states) {
            return mk_failed_pack(failed, ids);
        }
        tuple = b.build();
    }
    let perms = tuple.get(recv);
    let unsatisfied: Vec<Ident> = needed.iter().filter(|s| !perms.is_in_state(s, true)).cloned().collect();
    if unsatisfied.is_empty() {
        return mk_tensor(tuple, ids);
    }
    let mut roots: Vec<Ident> = Vec::new();
    for s in &unsatisfied {
        for r in perms.frame_roots() {
            if space.first_bigger_than_second(&r, s) {
                push_unique(&mut roots, r);
            }
        }
    }
    let root = match roots.len() {
        0 => return mk_true(ids),
        1 => roots[0].clone(),
        _ => alive(),
    };
    let unpacked = fancy_unpack_receiver(ctx, class, &tuple, ids, &root, false);
    map_tensors(&unpacked, &mut |t, ids| {
        let u_root = match t.get(recv).unpacked_permission() {
            Some(u) => u.root().clone(),
            None => return mk_tensor(t.clone(), ids),
        };
        let mut b = t.to_builder();
        match b.pack_receiver(ctx, class, &under(&u_root)) {
            Err(failed) => mk_failed_pack(failed, ids),
            Ok(()) => {
                let t = b.build();
                if t.get(recv).is_in_states(needed, true) { mk_tensor(t, ids) } else { mk_true(ids) }
            }
        }
    })
}
