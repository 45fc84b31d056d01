use crate::assignment::FractionAssignment;
use crate::ast::{Ident, Idents};
use crate::constraints::ConstraintsBuilder;
use crate::fraction::{Fraction, FractionSupply, FractionTerm};
use crate::fraction_function::FractionFunction;
use crate::state_space::StateSpace;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PermissionKind {
    Unique,
    Full,
    Share,
    Immutable,
    Pure,
}

/// What is left of a permission after splitting another one off it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SplitRemainder {
    Impossible,
    Nothing,
    Kind(PermissionKind),
}

impl PermissionKind {
    pub fn is_read_only(self) -> bool {
        matches!(self, PermissionKind::Immutable | PermissionKind::Pure)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PermissionKind::Unique => "unique",
            PermissionKind::Full => "full",
            PermissionKind::Share => "share",
            PermissionKind::Immutable => "immutable",
            PermissionKind::Pure => "pure",
        }
    }

    pub fn from_str(s: &str) -> Option<PermissionKind> {
        match s {
            "unique" => Some(PermissionKind::Unique),
            "full" => Some(PermissionKind::Full),
            "share" => Some(PermissionKind::Share),
            "immutable" => Some(PermissionKind::Immutable),
            "pure" => Some(PermissionKind::Pure),
            _ => None,
        }
    }

    pub fn remainder_when_split(self, split: PermissionKind) -> SplitRemainder {
        use PermissionKind::*;
        use SplitRemainder::{Impossible, Kind, Nothing};
        match (self, split) {
            (Unique, Unique) => Nothing,
            (Unique, Full) | (Full, Full) => Kind(Pure),
            (Unique, Share) | (Full, Share) | (Share, Share) | (Share, Pure) => Kind(Share),
            (Unique, Immutable) | (Full, Immutable) => Kind(Immutable),
            (Immutable, Immutable) | (Immutable, Pure) => Kind(Immutable),
            (Unique, Pure) | (Full, Pure) => Kind(Full),
            (Pure, Pure) => Kind(Pure),
            _ => Impossible,
        }
    }
}

impl std::fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A permission as written in a specification, before fractions are chosen
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionSpec {
    pub kind: PermissionKind,
    pub root: Ident,
    pub states: Vec<Ident>,
    pub frame: bool,
}

impl std::fmt::Display for PermissionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.kind, self.root)?;
        if !self.states.is_empty() {
            let states: Vec<&str> = self.states.iter().map(|s| s.as_str()).collect();
            write!(f, " in {}", states.join(","))?;
        }
        if self.frame {
            write!(f, " frame")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FractionalPermission {
    fractions: FractionFunction,
    read_only: bool,
    frame: bool,
    // sorted, no state implied by another
    state_info: Idents,
}

impl FractionalPermission {
    pub fn new(fractions: FractionFunction, read_only: bool, frame: bool, states: &[Ident]) -> Self {
        let state_info = clean_state_info(fractions.space(), states);
        FractionalPermission { fractions, read_only, frame, state_info }
    }

    pub fn space(&self) -> &StateSpace {
        self.fractions.space()
    }

    pub fn root(&self) -> &Ident {
        self.fractions.root()
    }

    pub fn fractions(&self) -> &FractionFunction {
        &self.fractions
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_frame(&self) -> bool {
        self.frame
    }

    pub fn state_info(&self) -> &Idents {
        &self.state_info
    }

    pub fn mentions(&self, f: Fraction) -> bool {
        self.fractions.mentions(f)
    }

    /// Kind as far as the given solution can tell
    pub fn kind(&self, a: &FractionAssignment) -> PermissionKind {
        let below = FractionTerm::Frac(self.fractions.below());
        if self.read_only {
            if a.is_zero(&below) { PermissionKind::Pure } else { PermissionKind::Immutable }
        } else if a.is_one(&below) {
            if a.is_one(&FractionTerm::Frac(self.fractions.root_value())) {
                PermissionKind::Unique
            } else {
                PermissionKind::Full
            }
        } else {
            PermissionKind::Share
        }
    }

    pub fn covers_node(&self, node: &Ident) -> bool {
        self.space().first_bigger_than_second(self.root(), node)
    }

    /// The root and everything above it always hold
    pub fn implies_state(&self, state: &Ident) -> bool {
        let space = self.space();
        space.first_implies_second(self.root(), state)
            || self.state_info.iter().any(|s| space.first_implies_second(s, state))
    }

    pub fn with_frame(&self, frame: bool) -> Self {
        FractionalPermission { frame, ..self.clone() }
    }

    pub fn copy_new_state(&self, states: &[Ident]) -> Self {
        FractionalPermission::new(self.fractions.clone(), self.read_only, self.frame, states)
    }

    pub fn add_state_info(&self, state: &Ident) -> Self {
        let mut states = (*self.state_info).clone();
        // the new state replaces whatever was known in its dimensions
        states.retain(|s| self.space().are_orthogonal(s, state));
        states.push(state.clone());
        self.copy_new_state(&states)
    }

    /// Drop temporary state information; marker states stay
    pub fn forget_state_info(&self) -> Self {
        let states: Vec<Ident> =
            self.state_info.iter().filter(|s| self.space().is_marker(s)).cloned().collect();
        self.copy_new_state(&states)
    }

    pub fn add_is_used_constraint(&self, cs: &mut ConstraintsBuilder) {
        cs.add_non_zero(self.fractions.root_value());
    }

    /// Writes need a non-zero fraction at the root and below it, and a writable permission
    pub fn make_modifiable(&self, cs: &mut ConstraintsBuilder) -> Self {
        cs.add_non_zero(self.fractions.root_value());
        cs.add_non_zero(self.fractions.below());
        if self.read_only {
            cs.add_impossible(format!("read-only permission for {} cannot be modified", self.root()));
        }
        FractionalPermission { read_only: false, ..self.clone() }
    }

    /// Split q off self; q's root must be self's root, or (for pure q) above it.
    /// Returns the remainder, or None if nothing remains.
    pub fn split_off(
        &self,
        q: &PermissionFromAnnotation,
        a: &FractionAssignment,
        cs: &mut ConstraintsBuilder,
        supply: &FractionSupply,
    ) -> Option<FractionalPermission> {
        let self_kind = self.kind(a);
        let remainder = match self_kind.remainder_when_split(q.kind) {
            SplitRemainder::Impossible => {
                cs.add_impossible(format!(
                    "cannot split {}({}) off {}({})",
                    q.kind,
                    q.perm.root(),
                    self_kind,
                    self.root()
                ));
                return Some(self.clone());
            }
            r => r,
        };
        let qf = q.perm.fractions();
        let mut above = Vec::new();
        for (n, p) in self.fractions.values() {
            above.push(split_fraction(*p, qf.get(n), cs, supply));
        }
        let below = split_fraction(self.fractions.below(), qf.below(), cs, supply);
        match remainder {
            SplitRemainder::Kind(k) => {
                let fractions = FractionFunction::new(self.space(), self.root(), above, below);
                Some(FractionalPermission {
                    fractions,
                    read_only: k.is_read_only(),
                    frame: self.frame,
                    state_info: self.state_info.clone(),
                })
            }
            _ => None,
        }
    }

    /// Add other's fractions to self's; both must have the same root
    pub fn merge_in(
        &self,
        other: &FractionalPermission,
        a: &FractionAssignment,
        cs: &mut ConstraintsBuilder,
        supply: &FractionSupply,
    ) -> FractionalPermission {
        assert!(self.root() == other.root(), "internal error: merging permissions with different roots");
        let mut above = Vec::new();
        for (n, p) in self.fractions.values() {
            above.push(merge_fraction(*p, other.fractions.get(n), cs, supply));
        }
        let below = merge_fraction(self.fractions.below(), other.fractions.below(), cs, supply);
        let immutable = self.kind(a) == PermissionKind::Immutable
            || other.kind(a) == PermissionKind::Immutable;
        let read_only = immutable || (self.read_only && other.read_only);
        let mut states = (*self.state_info).clone();
        states.extend(other.state_info.iter().cloned());
        FractionalPermission::new(
            FractionFunction::new(self.space(), self.root(), above, below),
            read_only,
            self.frame,
            &states,
        )
    }

    /// Split self at a node below its root: the part for `node`,
    /// plus parts for the dimensions orthogonal to the path from the root down to `node`
    pub fn move_down(&self, node: &Ident) -> (FractionalPermission, Vec<FractionalPermission>) {
        let space = self.space().clone();
        let root = self.root().clone();
        let rerooted = |new_root: &Ident| -> FractionalPermission {
            let above: Vec<Fraction> = space
                .ancestors(new_root)
                .iter()
                .map(|n| {
                    if space.first_bigger_than_second(&root, n) && *n != root {
                        self.fractions.below()
                    } else {
                        self.fractions.get(n)
                    }
                })
                .collect();
            let states: Vec<Ident> = self
                .state_info
                .iter()
                .filter(|s| {
                    space.first_bigger_than_second(new_root, s)
                        || space.first_bigger_than_second(s, new_root)
                })
                .cloned()
                .collect();
            FractionalPermission::new(
                FractionFunction::new(&space, new_root, above, self.fractions.below()),
                self.read_only,
                self.frame,
                &states,
            )
        };
        let part = rerooted(node);
        let mut rest = Vec::new();
        for m in space.path_between(&root, node) {
            if m == root {
                break;
            }
            if !space.is_dimension(&m) {
                continue;
            }
            if let Some(state) = space.parent(&m) {
                for d in space.dimensions(&state) {
                    if d != m {
                        rest.push(rerooted(&d));
                    }
                }
            }
        }
        (part, rest)
    }

    /// Combine permissions for all the dimensions of `root` into one permission for `root`
    pub fn combine_up(
        perms: &[FractionalPermission],
        root: &Ident,
        cs: &mut ConstraintsBuilder,
        supply: &FractionSupply,
    ) -> Option<FractionalPermission> {
        let first = perms.first()?;
        let space = first.space().clone();
        let dims = space.dimensions(root);
        if dims.is_empty()
            || dims.len() != perms.len()
            || !dims.iter().all(|d| perms.iter().any(|p| p.root() == d))
        {
            return None;
        }
        let weaken = |fs: Vec<Fraction>, cs: &mut ConstraintsBuilder| -> Fraction {
            if fs.iter().all(|f| *f == fs[0]) {
                return fs[0];
            }
            let w = supply.fresh_variable();
            for f in fs {
                cs.add_le(w, f);
            }
            w
        };
        let mut above = Vec::new();
        for n in space.ancestors(root) {
            let fs = perms.iter().map(|p| p.fractions.get(&n)).collect();
            above.push(weaken(fs, cs));
        }
        let below = weaken(perms.iter().map(|p| p.fractions.below()).collect(), cs);
        let read_only = perms.iter().any(|p| p.read_only);
        let states: Vec<Ident> = perms.iter().flat_map(|p| p.state_info.iter().cloned()).collect();
        Some(FractionalPermission::new(
            FractionFunction::new(&space, root, above, below),
            read_only,
            first.frame,
            &states,
        ))
    }

    /// Same root, equivalent fractions under the solution, and at least as much state information
    pub fn at_least_as_precise(&self, other: &FractionalPermission, a: &FractionAssignment) -> bool {
        if self == other {
            return true;
        }
        if self.root() != other.root() || self.frame != other.frame {
            return false;
        }
        if self.read_only && !other.read_only {
            return false;
        }
        let equiv = |x: Fraction, y: Fraction| a.are_equivalent(&x.into(), &y.into());
        if !equiv(self.fractions.below(), other.fractions.below()) {
            return false;
        }
        for (n, f) in self.fractions.values() {
            if !equiv(*f, other.fractions.get(n)) {
                return false;
            }
        }
        other.state_info.iter().all(|s| self.implies_state(s))
    }

    /// Least upper bound of two permissions with the same root.
    /// If `symmetric` is false, only constraints over self's fractions are produced.
    pub fn join(
        &self,
        other: &FractionalPermission,
        a: &FractionAssignment,
        cs: &mut ConstraintsBuilder,
        symmetric: bool,
        supply: &FractionSupply,
    ) -> FractionalPermission {
        let mut join_fraction = |p: Fraction, q: Fraction| -> Fraction {
            let (pt, qt) = (FractionTerm::Frac(p), FractionTerm::Frac(q));
            if a.are_equivalent(&pt, &qt) {
                return p;
            }
            if a.is_zero(&pt) || a.is_zero(&qt) {
                return Fraction::Zero;
            }
            let w = supply.fresh_variable();
            cs.add_le(w, p);
            if symmetric {
                cs.add_le(w, q);
            }
            if a.is_non_zero(&pt) && a.is_non_zero(&qt) {
                cs.add_non_zero(w);
            }
            w
        };
        let mut above = Vec::new();
        for (n, p) in self.fractions.values() {
            above.push(join_fraction(*p, other.fractions.get(n)));
        }
        let below = join_fraction(self.fractions.below(), other.fractions.below());
        let space = self.space();
        let mut states = Vec::new();
        for s1 in self.state_info.iter() {
            for s2 in other.state_info.iter() {
                let s = space.lowest_common_parent(s1, s2);
                if s != *self.root() && space.first_bigger_than_second(self.root(), &s) {
                    states.push(s);
                }
            }
        }
        FractionalPermission::new(
            FractionFunction::new(space, self.root(), above, below),
            self.read_only || other.read_only,
            self.frame,
            &states,
        )
    }

    pub fn to_user_string(&self, a: &FractionAssignment) -> String {
        let mut s = format!("{}({})", self.kind(a), self.root());
        if !self.state_info.is_empty() {
            let states: Vec<&str> = self.state_info.iter().map(|s| s.as_str()).collect();
            s.push_str(&format!(" in {}", states.join(",")));
        }
        if self.frame {
            s.push_str(" frame");
        }
        s
    }
}

fn split_fraction(p: Fraction, q: Fraction, cs: &mut ConstraintsBuilder, supply: &FractionSupply) -> Fraction {
    if q == Fraction::Zero {
        return p;
    }
    if p == q {
        return Fraction::Zero;
    }
    let r = supply.fresh_variable();
    cs.add_eq(p, FractionTerm::sum(&[q, r]));
    r
}

fn merge_fraction(p: Fraction, q: Fraction, cs: &mut ConstraintsBuilder, supply: &FractionSupply) -> Fraction {
    if q == Fraction::Zero {
        return p;
    }
    if p == Fraction::Zero {
        return q;
    }
    let w = supply.fresh_variable();
    cs.add_eq(w, FractionTerm::sum(&[p, q]));
    w
}

/// Keep the most precise states: drop duplicates, alive, and states implied by others
pub(crate) fn clean_state_info(space: &StateSpace, states: &[Ident]) -> Idents {
    let mut result: Vec<Ident> = Vec::new();
    for s in states {
        if **s == *crate::def::STATE_ALIVE || result.contains(s) {
            continue;
        }
        if states.iter().any(|t| t != s && space.first_implies_second(t, s)) {
            continue;
        }
        result.push(s.clone());
    }
    result.sort();
    Arc::new(result)
}

/// A permission instantiated from a specification, with fresh fractions
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PermissionFromAnnotation {
    pub(crate) perm: FractionalPermission,
    pub(crate) kind: PermissionKind,
}

impl PermissionFromAnnotation {
    /// Named fractions are used for permissions a method body receives at entry,
    /// variables for permissions a caller has to provide.
    pub fn create(
        space: &StateSpace,
        spec: &PermissionSpec,
        named: bool,
        supply: &FractionSupply,
        cs: &mut ConstraintsBuilder,
    ) -> Self {
        let root = &spec.root;
        let (fractions, read_only) = match spec.kind {
            PermissionKind::Unique => (FractionFunction::fix_all(space, root, Fraction::One), false),
            PermissionKind::Full => {
                (FractionFunction::fixed_below(space, root, supply, named, Fraction::One), false)
            }
            PermissionKind::Share => (FractionFunction::variable_all(space, root, supply, named), false),
            PermissionKind::Immutable => {
                (FractionFunction::variable_all(space, root, supply, named), true)
            }
            PermissionKind::Pure => {
                (FractionFunction::fixed_below(space, root, supply, named, Fraction::Zero), true)
            }
        };
        let perm = FractionalPermission::new(fractions, read_only, spec.frame, &spec.states);
        perm.add_is_used_constraint(cs);
        if spec.kind == PermissionKind::Immutable {
            cs.add_non_zero(perm.fractions.below());
        }
        PermissionFromAnnotation { perm, kind: spec.kind }
    }

    /// Unique permission that nobody handed out: the receiver of a constructor under construction
    pub fn unique_orphan(space: &StateSpace, root: &Ident, frame: bool, states: &[Ident]) -> Self {
        let fractions = FractionFunction::fix_all(space, root, Fraction::One);
        let perm = FractionalPermission::new(fractions, false, frame, states);
        PermissionFromAnnotation { perm, kind: PermissionKind::Unique }
    }

    pub fn kind(&self) -> PermissionKind {
        self.kind
    }

    pub fn permission(&self) -> &FractionalPermission {
        &self.perm
    }

    pub fn root(&self) -> &Ident {
        self.perm.root()
    }

    pub fn is_frame(&self) -> bool {
        self.perm.frame
    }

    pub fn is_read_only(&self) -> bool {
        self.kind.is_read_only()
    }

    /// Pure requests may be satisfied by a permission with a smaller root
    pub fn tolerates_smaller_root(&self) -> bool {
        self.kind == PermissionKind::Pure
    }
}

impl std::fmt::Display for PermissionFromAnnotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.kind, self.perm.root())?;
        if !self.perm.state_info.is_empty() {
            let states: Vec<&str> = self.perm.state_info.iter().map(|s| s.as_str()).collect();
            write!(f, " in {}", states.join(","))?;
        }
        if self.perm.frame {
            write!(f, " frame")?;
        }
        Ok(())
    }
}
