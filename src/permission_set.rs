use crate::assignment::FractionAssignment;
use crate::ast::Ident;
use crate::constraints::{ConstraintsBuilder, FractionConstraints};
use crate::fraction::FractionSupply;
use crate::messages::{error_bare, Message};
use crate::permission::{FractionalPermission, PermissionFromAnnotation, PermissionKind, PermissionSpec};
use crate::permissions::FractionalPermissions;
use crate::state_space::StateSpace;
use crate::util::push_unique;

/// Take the permission for `needed` out of the list.
/// A permission with a bigger root is moved down first and its orthogonal rest stays in the list.
/// With `tolerate_smaller`, a permission for a node below `needed` is also acceptable.
pub fn remove_permission(
    list: &mut Vec<FractionalPermission>,
    needed: &Ident,
    tolerate_smaller: bool,
) -> Option<FractionalPermission> {
    if let Some(i) = list.iter().position(|p| p.root() == needed) {
        return Some(list.remove(i));
    }
    if let Some(i) = list.iter().position(|p| p.covers_node(needed)) {
        let p = list.remove(i);
        let (part, rest) = p.move_down(needed);
        list.extend(rest);
        return Some(part);
    }
    if tolerate_smaller {
        if let Some(i) = list.iter().position(|p| p.space().first_bigger_than_second(needed, p.root())) {
            return Some(list.remove(i));
        }
    }
    None
}

/// Add p to the list, keeping the roots pairwise orthogonal
pub fn merge_in_permission(
    list: &mut Vec<FractionalPermission>,
    p: FractionalPermission,
    a: &FractionAssignment,
    cs: &mut ConstraintsBuilder,
    supply: &FractionSupply,
) {
    let space = p.space().clone();
    if let Some(i) = list.iter().position(|q| q.root() == p.root()) {
        let merged = list[i].merge_in(&p, a, cs, supply);
        list[i] = merged;
        return;
    }
    if let Some(i) = list.iter().position(|q| q.covers_node(p.root())) {
        let q = list.remove(i);
        let (part, rest) = q.move_down(p.root());
        list.extend(rest);
        list.push(part.merge_in(&p, a, cs, supply));
        return;
    }
    if let Some(i) = list.iter().position(|q| p.covers_node(q.root())) {
        let q = list.remove(i);
        let (part, rest) = p.move_down(q.root());
        list.push(q.merge_in(&part, a, cs, supply));
        for r in rest {
            merge_in_permission(list, r, a, cs, supply);
        }
        return;
    }
    if list.iter().all(|q| space.are_orthogonal(q.root(), p.root())) {
        list.push(p);
        return;
    }
    // permissions for mutually exclusive states of one object
    cs.add_impossible(format!(
        "permission for {} conflicts with existing permissions for {}",
        p.root(),
        list.iter().map(|q| q.root().to_string()).collect::<Vec<_>>().join(",")
    ));
}

/// Gather the permissions for every dimension of `root` into one permission for `root`
fn take_combined(
    list: &mut Vec<FractionalPermission>,
    root: &Ident,
    cs: &mut ConstraintsBuilder,
    supply: &FractionSupply,
) -> Option<FractionalPermission> {
    let dims = list.first()?.space().dimensions(root);
    if dims.is_empty() || !dims.iter().all(|d| list.iter().any(|p| p.root() == d)) {
        return None;
    }
    let (parts, rest): (Vec<FractionalPermission>, Vec<FractionalPermission>) =
        list.drain(..).partition(|p| dims.contains(p.root()));
    *list = rest;
    FractionalPermission::combine_up(&parts, root, cs, supply)
}

/// Split each requested permission off the list
pub fn split_off_list(
    list: &mut Vec<FractionalPermission>,
    requested: &[PermissionFromAnnotation],
    a: &FractionAssignment,
    cs: &mut ConstraintsBuilder,
    supply: &FractionSupply,
) {
    for q in requested {
        let taken = match remove_permission(list, q.root(), q.tolerates_smaller_root()) {
            Some(p) => Some(p),
            None => take_combined(list, q.root(), cs, supply),
        };
        match taken {
            None => {
                cs.add_impossible(format!("No permission available to split off {}", q));
            }
            Some(p) => {
                if let Some(remainder) = p.split_off(q, a, cs, supply) {
                    list.push(remainder);
                }
            }
        }
    }
}

/// Permission-wise join; a root that only one side has is dropped
pub fn join_lists(
    l1: &[FractionalPermission],
    l2: &[FractionalPermission],
    a: &FractionAssignment,
    cs: &mut ConstraintsBuilder,
    symmetric: bool,
    supply: &FractionSupply,
) -> Vec<FractionalPermission> {
    let mut result = Vec::new();
    for p in l1 {
        if let Some(q) = l2.iter().find(|q| q.root() == p.root()) {
            result.push(p.join(q, a, cs, symmetric, supply));
        }
    }
    result
}

/// Every permission of l2 is matched by a more precise one in l1
pub fn at_least_as_precise_lists(
    l1: &[FractionalPermission],
    l2: &[FractionalPermission],
    a: &FractionAssignment,
) -> bool {
    l2.iter().all(|q| l1.iter().any(|p| p.at_least_as_precise(q, a)))
}

/// States implied by the permissions of a list
pub fn list_state_info(list: &[FractionalPermission]) -> Vec<Ident> {
    let mut states = Vec::new();
    for p in list {
        push_unique(&mut states, p.root().clone());
        for s in p.state_info().iter() {
            push_unique(&mut states, s.clone());
        }
    }
    states
}

/// Share and pure permissions can be changed by others behind our back
pub fn forget_share_and_pure_states(
    list: &[FractionalPermission],
    a: &FractionAssignment,
) -> Vec<FractionalPermission> {
    list.iter()
        .map(|p| match p.kind(a) {
            PermissionKind::Share | PermissionKind::Pure => p.forget_state_info(),
            _ => p.clone(),
        })
        .collect()
}

/// The permissions one specification clause (pre- or postcondition) gives for one object
#[derive(Clone, Debug)]
pub struct PermissionSetFromAnnotations {
    space: StateSpace,
    virtuals: Vec<PermissionFromAnnotation>,
    frames: Vec<PermissionFromAnnotation>,
    constraints: FractionConstraints,
}

impl PermissionSetFromAnnotations {
    pub fn create_empty(space: &StateSpace) -> Self {
        PermissionSetFromAnnotations {
            space: space.clone(),
            virtuals: Vec::new(),
            frames: Vec::new(),
            constraints: FractionConstraints::empty(),
        }
    }

    pub fn singleton(
        space: &StateSpace,
        spec: &PermissionSpec,
        named: bool,
        supply: &FractionSupply,
    ) -> Self {
        let mut cs = ConstraintsBuilder::new();
        let p = PermissionFromAnnotation::create(space, spec, named, supply, &mut cs);
        let mut set = PermissionSetFromAnnotations::create_empty(space);
        set.constraints = cs.build();
        if spec.frame {
            set.frames.push(p);
        } else {
            set.virtuals.push(p);
        }
        set
    }

    pub fn from_permission(space: &StateSpace, p: PermissionFromAnnotation) -> Self {
        let mut set = PermissionSetFromAnnotations::create_empty(space);
        if p.is_frame() {
            set.frames.push(p);
        } else {
            set.virtuals.push(p);
        }
        set
    }

    /// Union of two sets; roots within each list must stay orthogonal
    pub fn combine(&self, other: &PermissionSetFromAnnotations) -> Result<Self, Message> {
        let check = |l1: &[PermissionFromAnnotation], l2: &[PermissionFromAnnotation]| {
            for p in l1 {
                for q in l2 {
                    if !self.space.are_orthogonal(p.root(), q.root()) {
                        return Err(error_bare(format!(
                            "permissions {} and {} overlap in {}",
                            p, q, self.space.name
                        ))
                        .help("only permissions for orthogonal states can be held together"));
                    }
                }
            }
            Ok(())
        };
        check(&self.virtuals, &other.virtuals)?;
        check(&self.frames, &other.frames)?;
        let mut virtuals = self.virtuals.clone();
        virtuals.extend(other.virtuals.iter().cloned());
        let mut frames = self.frames.clone();
        frames.extend(other.frames.iter().cloned());
        Ok(PermissionSetFromAnnotations {
            space: self.space.clone(),
            virtuals,
            frames,
            constraints: self.constraints.concat(&other.constraints).build(),
        })
    }

    pub fn space(&self) -> &StateSpace {
        &self.space
    }

    pub fn virtuals(&self) -> &[PermissionFromAnnotation] {
        &self.virtuals
    }

    pub fn frames(&self) -> &[PermissionFromAnnotation] {
        &self.frames
    }

    pub fn constraints(&self) -> &FractionConstraints {
        &self.constraints
    }

    pub fn is_empty(&self) -> bool {
        self.virtuals.is_empty() && self.frames.is_empty()
    }

    pub fn is_read_only(&self) -> bool {
        self.virtuals.iter().chain(self.frames.iter()).all(|p| p.is_read_only())
    }

    pub fn state_info(&self, in_frame: bool) -> Vec<Ident> {
        let list = if in_frame { &self.frames } else { &self.virtuals };
        let perms: Vec<FractionalPermission> = list.iter().map(|p| p.permission().clone()).collect();
        list_state_info(&perms)
    }

    pub fn to_lattice_element(&self) -> FractionalPermissions {
        let virtuals = self.virtuals.iter().map(|p| p.permission().clone()).collect();
        let frames = self.frames.iter().map(|p| p.permission().clone()).collect();
        FractionalPermissions::from_parts(virtuals, frames, None, self.constraints.clone())
    }
}

impl std::fmt::Display for PermissionSetFromAnnotations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> =
            self.virtuals.iter().chain(self.frames.iter()).map(|p| p.to_string()).collect();
        write!(f, "{}", parts.join(" * "))
    }
}
