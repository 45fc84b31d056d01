//! Per-location lattice element: the permissions held for one object
//! together with the fraction constraints they rely on.
//!
//! `None` is bottom: no information, every check trivially succeeds.
//! A set with empty lists is not bottom; it fails most checks.

use crate::ast::{Ident, MergePoint};
use crate::constraints::{ConstraintsBuilder, FractionConstraints};
use crate::def::STATE_ALIVE;
use crate::fraction::FractionSupply;
use crate::fraction_function::FractionFunction;
use crate::messages::{error_bare, Message};
use crate::permission::FractionalPermission;
use crate::permission_set::{
    at_least_as_precise_lists, forget_share_and_pure_states, join_lists, list_state_info,
    merge_in_permission, remove_permission, split_off_list, PermissionSetFromAnnotations,
};
use crate::state_space::StateSpace;
use std::sync::Arc;

pub struct PermissionsX {
    pub(crate) virtuals: Vec<FractionalPermission>,
    pub(crate) frames: Vec<FractionalPermission>,
    pub(crate) unpacked: Option<FractionalPermission>,
    pub(crate) constraints: FractionConstraints,
}

#[derive(Clone)]
pub struct FractionalPermissions(Option<Arc<PermissionsX>>);

impl PartialEq for FractionalPermissions {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (None, None) => true,
            (Some(x), Some(y)) => {
                Arc::ptr_eq(x, y)
                    || (x.virtuals == y.virtuals
                        && x.frames == y.frames
                        && x.unpacked == y.unpacked
                        && x.constraints == y.constraints)
            }
            _ => false,
        }
    }
}

impl Eq for FractionalPermissions {}

impl std::fmt::Debug for FractionalPermissions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            None => write!(f, "bottom"),
            Some(x) => f
                .debug_struct("FractionalPermissions")
                .field("virtuals", &x.virtuals)
                .field("frames", &x.frames)
                .field("unpacked", &x.unpacked)
                .field("constraints", &x.constraints)
                .finish(),
        }
    }
}

fn check_orthogonal(list: &[FractionalPermission]) -> Result<(), Message> {
    for (i, p) in list.iter().enumerate() {
        for q in &list[i + 1..] {
            if !p.space().are_orthogonal(p.root(), q.root()) {
                return Err(error_bare(format!(
                    "permissions for {} and {} are not orthogonal",
                    p.root(),
                    q.root()
                )));
            }
        }
    }
    Ok(())
}

impl FractionalPermissions {
    pub fn bottom() -> Self {
        FractionalPermissions(None)
    }

    pub fn empty() -> Self {
        Self::from_parts(Vec::new(), Vec::new(), None, FractionConstraints::empty())
    }

    pub(crate) fn from_parts(
        virtuals: Vec<FractionalPermission>,
        frames: Vec<FractionalPermission>,
        unpacked: Option<FractionalPermission>,
        constraints: FractionConstraints,
    ) -> Self {
        FractionalPermissions(Some(Arc::new(PermissionsX { virtuals, frames, unpacked, constraints })))
    }

    pub fn new(
        virtuals: Vec<FractionalPermission>,
        frames: Vec<FractionalPermission>,
        unpacked: Option<FractionalPermission>,
        constraints: FractionConstraints,
    ) -> Result<Self, Message> {
        check_orthogonal(&virtuals)?;
        check_orthogonal(&frames)?;
        Ok(Self::from_parts(virtuals, frames, unpacked, constraints))
    }

    fn x(&self) -> Option<&PermissionsX> {
        self.0.as_deref()
    }

    pub fn is_bottom(&self) -> bool {
        self.0.is_none()
    }

    pub fn is_unpacked(&self) -> bool {
        self.x().map_or(false, |x| x.unpacked.is_some())
    }

    pub fn unpacked_permission(&self) -> Option<&FractionalPermission> {
        self.x().and_then(|x| x.unpacked.as_ref())
    }

    pub fn virtuals(&self) -> &[FractionalPermission] {
        self.x().map_or(&[][..], |x| &x.virtuals[..])
    }

    pub fn frames(&self) -> &[FractionalPermission] {
        self.x().map_or(&[][..], |x| &x.frames[..])
    }

    pub fn constraints(&self) -> FractionConstraints {
        self.x().map_or_else(FractionConstraints::empty, |x| x.constraints.clone())
    }

    /// Declared impossible; does not run the solver
    pub fn is_impossible(&self) -> bool {
        self.x().map_or(false, |x| x.constraints.is_impossible())
    }

    pub fn impossible_reason(&self) -> Option<String> {
        self.x().and_then(|x| x.constraints.impossible_reason().map(|r| r.to_string()))
    }

    pub fn is_unsatisfiable(&self) -> bool {
        self.x().map_or(false, |x| x.constraints.is_unsatisfiable())
    }

    fn list(&self, in_frame: bool) -> &[FractionalPermission] {
        if in_frame { self.frames() } else { self.virtuals() }
    }

    fn rebuild(&self, f: impl FnOnce(&mut PermissionsParts)) -> Self {
        match self.x() {
            None => self.clone(),
            Some(x) => {
                let mut parts = PermissionsParts {
                    virtuals: x.virtuals.clone(),
                    frames: x.frames.clone(),
                    unpacked: x.unpacked.clone(),
                    cs: x.constraints.to_builder(),
                };
                f(&mut parts);
                let PermissionsParts { virtuals, frames, unpacked, cs } = parts;
                Self::from_parts(virtuals, frames, unpacked, cs.build())
            }
        }
    }

    /// Split the set's permissions off; what cannot be split makes the result impossible
    pub fn split_off(&self, set: &PermissionSetFromAnnotations, supply: &FractionSupply) -> Self {
        self.rebuild(|parts| {
            parts.cs.add_all(set.constraints());
            let a = parts.cs.solve();
            split_off_list(&mut parts.virtuals, set.virtuals(), &a, &mut parts.cs, supply);
            split_off_list(&mut parts.frames, set.frames(), &a, &mut parts.cs, supply);
        })
    }

    /// Bottom stays bottom; untracked locations start out empty
    pub fn merge_in(&self, set: &PermissionSetFromAnnotations, supply: &FractionSupply) -> Self {
        if self.is_bottom() {
            return self.clone();
        }
        self.rebuild(|parts| {
            parts.cs.add_all(set.constraints());
            let a = parts.cs.solve();
            for p in set.virtuals() {
                merge_in_permission(&mut parts.virtuals, p.permission().clone(), &a, &mut parts.cs, supply);
            }
            for p in set.frames() {
                merge_in_permission(&mut parts.frames, p.permission().clone(), &a, &mut parts.cs, supply);
            }
        })
    }

    /// Permissions for writing to fields mapped under `root`
    pub fn make_modifiable(&self, root: &Ident, in_frame: bool) -> Self {
        self.rebuild(|parts| {
            let list = if in_frame { &mut parts.frames } else { &mut parts.virtuals };
            match remove_permission(list, root, false) {
                None => parts.cs.add_impossible(format!("No permission available for root {}", root)),
                Some(p) => {
                    let p = p.make_modifiable(&mut parts.cs);
                    list.push(p);
                }
            }
        })
    }

    pub fn make_unpacked_permission_modifiable(&self) -> Self {
        if !self.is_unpacked() {
            panic!("internal error: no unpacked permission to make modifiable");
        }
        self.rebuild(|parts| {
            if let Some(u) = &parts.unpacked {
                if u.is_read_only() {
                    parts.unpacked = Some(u.make_modifiable(&mut parts.cs));
                }
            }
        })
    }

    /// Take the frame permission for `root` out of the frame list and hold it as unpacked
    pub fn unpack(&self, space: &StateSpace, root: &Ident, supply: &FractionSupply) -> Self {
        if self.is_unpacked() {
            panic!("internal error: unpacking to {} while already unpacked", root);
        }
        let this = if self.is_bottom() { Self::empty() } else { self.clone() };
        this.rebuild(|parts| match remove_permission(&mut parts.frames, root, false) {
            Some(p) => {
                p.add_is_used_constraint(&mut parts.cs);
                parts.unpacked = Some(p);
            }
            None => {
                parts.cs.add_impossible(format!("No permission available to unpack to {}", root));
                let fake = FractionFunction::variable_all(space, root, supply, false);
                parts.unpacked = Some(FractionalPermission::new(fake, false, true, &[]));
            }
        })
    }

    /// Put the unpacked permission back into the frame list, now in the given states
    pub fn pack(&self, states: &[Ident], supply: &FractionSupply) -> Self {
        if !self.is_unpacked() {
            panic!("internal error: packing while packed");
        }
        self.rebuild(|parts| {
            if let Some(u) = parts.unpacked.take() {
                let u = u.copy_new_state(states);
                let a = parts.cs.solve();
                merge_in_permission(&mut parts.frames, u, &a, &mut parts.cs, supply);
            }
        })
    }

    pub fn invalid_pack(&self) -> Self {
        self.rebuild(|parts| {
            parts.cs.add_impossible("Couldn't pack");
            parts.unpacked = None;
        })
    }

    pub fn is_in_state(&self, state: &Ident, in_frame: bool) -> bool {
        if self.is_bottom() || **state == STATE_ALIVE {
            return true;
        }
        self.list(in_frame).iter().any(|p| p.implies_state(state))
    }

    pub fn is_in_states(&self, needed: &[Ident], in_frame: bool) -> bool {
        needed.iter().all(|s| self.is_in_state(s, in_frame))
    }

    pub fn state_info(&self, in_frame: bool) -> Vec<Ident> {
        list_state_info(self.list(in_frame))
    }

    pub fn frame_roots(&self) -> Vec<Ident> {
        self.frames().iter().map(|p| p.root().clone()).collect()
    }

    /// Record that the object is (temporarily) known to be in `state`
    pub fn learn_temporary_state_info(&self, state: &Ident, in_frame: bool) -> Self {
        self.rebuild(|parts| {
            let list = if in_frame { &mut parts.frames } else { &mut parts.virtuals };
            for p in list.iter_mut() {
                if p.covers_node(state) && p.root() != state {
                    *p = p.add_state_info(state);
                }
            }
        })
    }

    pub fn replace_state_info(&self, states: &[Ident], in_frame: bool) -> Self {
        if in_frame && self.is_unpacked() {
            panic!("internal error: replacing frame state information while unpacked");
        }
        self.rebuild(|parts| {
            let list = if in_frame { &mut parts.frames } else { &mut parts.virtuals };
            for p in list.iter_mut() {
                let covered: Vec<Ident> = states.iter().filter(|s| p.covers_node(s)).cloned().collect();
                *p = p.copy_new_state(&covered);
            }
        })
    }

    pub fn forget_state_info(&self) -> Self {
        self.rebuild(|parts| {
            for p in parts.virtuals.iter_mut().chain(parts.frames.iter_mut()) {
                *p = p.forget_state_info();
            }
        })
    }

    pub fn forget_share_and_pure_states(&self) -> Self {
        self.rebuild(|parts| {
            let a = parts.cs.solve();
            parts.virtuals = forget_share_and_pure_states(&parts.virtuals, &a);
            parts.frames = forget_share_and_pure_states(&parts.frames, &a);
        })
    }

    /// Least upper bound.  At loop heads, if one side's constraints imply the other's,
    /// only the more general side's constraints survive.
    pub fn join(&self, other: &FractionalPermissions, mp: MergePoint, supply: &FractionSupply) -> Self {
        let (x, y) = match (self.x(), other.x()) {
            (None, _) => return other.clone(),
            (_, None) => return self.clone(),
            (Some(x), Some(y)) => (x, y),
        };
        if self == other {
            return self.clone();
        }
        // unsatisfiable is the top of the lattice
        if self.is_unsatisfiable() {
            return self.clone();
        }
        if other.is_unsatisfiable() {
            return other.clone();
        }
        let a = x.constraints.concat(&y.constraints).solve();
        match (&x.unpacked, &y.unpacked) {
            (None, None) => {}
            (Some(u1), Some(u2)) if u1.at_least_as_precise(u2, &a) && u2.at_least_as_precise(u1, &a) => {}
            _ => panic!("internal error: joining permissions with different unpacked permissions"),
        }
        let (base, rest, symmetric) = match mp {
            MergePoint::Loop if y.constraints.at_least_as_precise(&x.constraints) => (x, y, false),
            MergePoint::Loop if x.constraints.at_least_as_precise(&y.constraints) => (y, x, false),
            _ => (x, y, true),
        };
        let mut cs = if symmetric { x.constraints.concat(&y.constraints) } else { base.constraints.to_builder() };
        let virtuals = join_lists(&base.virtuals, &rest.virtuals, &a, &mut cs, symmetric, supply);
        let frames = join_lists(&base.frames, &rest.frames, &a, &mut cs, symmetric, supply);
        let unpacked = match (&base.unpacked, &rest.unpacked) {
            (Some(u1), Some(u2)) => Some(u1.join(u2, &a, &mut cs, symmetric, supply)),
            _ => None,
        };
        Self::from_parts(virtuals, frames, unpacked, cs.build())
    }

    pub fn at_least_as_precise(&self, other: &FractionalPermissions) -> bool {
        let (x, y) = match (self.x(), other.x()) {
            (None, _) => return true,
            (_, None) => return false,
            (Some(x), Some(y)) => (x, y),
        };
        if self == other || other.is_unsatisfiable() {
            return true;
        }
        if self.is_unsatisfiable() {
            return false;
        }
        let a = x.constraints.concat(&y.constraints).solve();
        let unpacked_ok = match (&x.unpacked, &y.unpacked) {
            (None, None) => true,
            (Some(u1), Some(u2)) => u1.at_least_as_precise(u2, &a),
            _ => false,
        };
        unpacked_ok
            && at_least_as_precise_lists(&x.virtuals, &y.virtuals, &a)
            && at_least_as_precise_lists(&x.frames, &y.frames, &a)
    }
}

impl FractionalPermissions {
    /// Short description for diagnostics, e.g. "full(alive) in open, pure(alive) frame"
    pub fn to_user_string(&self) -> String {
        let x = match self.x() {
            None => return "no information".to_string(),
            Some(x) => x,
        };
        let a = x.constraints.assignment();
        let mut parts: Vec<String> = x.virtuals.iter().map(|p| p.to_user_string(a)).collect();
        parts.extend(x.frames.iter().map(|p| p.to_user_string(a)));
        if let Some(u) = &x.unpacked {
            parts.push(format!("unpacked {}", u.to_user_string(a)));
        }
        if parts.is_empty() { "no permissions".to_string() } else { parts.join(", ") }
    }
}

struct PermissionsParts {
    virtuals: Vec<FractionalPermission>,
    frames: Vec<FractionalPermission>,
    unpacked: Option<FractionalPermission>,
    cs: ConstraintsBuilder,
}
