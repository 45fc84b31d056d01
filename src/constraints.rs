use crate::assignment::FractionAssignment;
use crate::fraction::{Fraction, FractionTerm};
use indexmap::IndexSet;
use std::sync::{Arc, OnceLock};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FractionConstraint {
    /// all terms are equal
    Eq(Arc<Vec<FractionTerm>>),
    Le(FractionTerm, FractionTerm),
    Lt(FractionTerm, FractionTerm),
    NonZero(FractionTerm),
}

impl FractionConstraint {
    pub fn terms(&self) -> Vec<&FractionTerm> {
        match self {
            FractionConstraint::Eq(ts) => ts.iter().collect(),
            FractionConstraint::Le(a, b) | FractionConstraint::Lt(a, b) => vec![a, b],
            FractionConstraint::NonZero(t) => vec![t],
        }
    }

    pub fn mentions(&self, f: Fraction) -> bool {
        self.terms().iter().any(|t| t.fractions().contains(&f))
    }
}

impl std::fmt::Display for FractionConstraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FractionConstraint::Eq(ts) => {
                let parts: Vec<String> = ts.iter().map(|t| t.to_string()).collect();
                write!(f, "{}", parts.join(" = "))
            }
            FractionConstraint::Le(a, b) => write!(f, "{} <= {}", a, b),
            FractionConstraint::Lt(a, b) => write!(f, "{} < {}", a, b),
            FractionConstraint::NonZero(t) => write!(f, "{} > 0", t),
        }
    }
}

pub struct ConstraintsX {
    constraints: IndexSet<FractionConstraint>,
    impossible: Option<Arc<String>>,
    solved: OnceLock<FractionAssignment>,
}

/// Frozen constraint set; build new ones with to_builder/concat
#[derive(Clone)]
pub struct FractionConstraints(Arc<ConstraintsX>);

impl PartialEq for FractionConstraints {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
            || (self.0.impossible == other.0.impossible
                && self.0.constraints == other.0.constraints)
    }
}

impl Eq for FractionConstraints {}

impl std::fmt::Debug for FractionConstraints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut l = f.debug_list();
        if let Some(reason) = &self.0.impossible {
            l.entry(&format!("impossible: {}", reason));
        }
        for c in self.0.constraints.iter() {
            l.entry(&format_args!("{}", c));
        }
        l.finish()
    }
}

impl FractionConstraints {
    pub fn empty() -> Self {
        ConstraintsBuilder::new().build()
    }

    pub fn to_builder(&self) -> ConstraintsBuilder {
        ConstraintsBuilder {
            constraints: self.0.constraints.clone(),
            impossible: self.0.impossible.clone(),
        }
    }

    /// Fresh builder holding the constraints of both sets
    pub fn concat(&self, other: &FractionConstraints) -> ConstraintsBuilder {
        let mut b = self.to_builder();
        b.add_all(other);
        b
    }

    pub fn iter(&self) -> impl Iterator<Item = &FractionConstraint> {
        self.0.constraints.iter()
    }

    pub fn len(&self) -> usize {
        self.0.constraints.len()
    }

    pub fn contains(&self, c: &FractionConstraint) -> bool {
        self.0.constraints.contains(c)
    }

    /// Declared impossible (does not run the solver)
    pub fn is_impossible(&self) -> bool {
        self.0.impossible.is_some()
    }

    pub fn impossible_reason(&self) -> Option<&Arc<String>> {
        self.0.impossible.as_ref()
    }

    /// Solver result, computed on first use
    pub fn assignment(&self) -> &FractionAssignment {
        self.0.solved.get_or_init(|| FractionAssignment::solve(&self.0.constraints))
    }

    pub fn is_consistent(&self) -> bool {
        !self.is_impossible() && self.assignment().is_consistent()
    }

    pub fn is_unsatisfiable(&self) -> bool {
        !self.is_consistent()
    }

    /// Does every solution of self satisfy c?
    pub fn implies(&self, c: &FractionConstraint) -> bool {
        if self.contains(c) {
            return true;
        }
        let a = self.assignment();
        match c {
            FractionConstraint::Eq(ts) => ts.iter().all(|t| a.are_equivalent(&ts[0], t)),
            FractionConstraint::NonZero(t) => a.is_non_zero(t),
            FractionConstraint::Le(x, y) => {
                a.is_zero(x)
                    || a.is_one(y)
                    || a.are_equivalent(x, y)
                    || match (x, y) {
                        (FractionTerm::Frac(f), FractionTerm::Sum(fs)) => fs.contains(f),
                        _ => false,
                    }
            }
            FractionConstraint::Lt(x, y) => a.is_zero(x) && a.is_non_zero(y),
        }
    }

    /// self is at least as precise as other if self implies every constraint in other.
    /// Unsatisfiable constraints imply anything.
    pub fn at_least_as_precise(&self, other: &FractionConstraints) -> bool {
        if Arc::ptr_eq(&self.0, &other.0) || self.is_unsatisfiable() {
            return true;
        }
        if other.is_impossible() {
            return false;
        }
        other.iter().all(|c| self.implies(c))
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConstraintsBuilder {
    constraints: IndexSet<FractionConstraint>,
    impossible: Option<Arc<String>>,
}

impl ConstraintsBuilder {
    pub fn new() -> Self {
        ConstraintsBuilder { constraints: IndexSet::new(), impossible: None }
    }

    pub fn add(&mut self, c: FractionConstraint) {
        self.constraints.insert(c);
    }

    pub fn add_all(&mut self, cs: &FractionConstraints) {
        for c in cs.iter() {
            self.constraints.insert(c.clone());
        }
        if let Some(reason) = &cs.0.impossible {
            if self.impossible.is_none() {
                self.impossible = Some(reason.clone());
            }
        }
    }

    /// Poison the set; the first reason is kept for reporting
    pub fn add_impossible<S: Into<String>>(&mut self, reason: S) {
        if self.impossible.is_none() {
            self.impossible = Some(Arc::new(reason.into()));
        }
    }

    pub fn add_eq<A: Into<FractionTerm>, B: Into<FractionTerm>>(&mut self, a: A, b: B) {
        let (a, b) = (a.into(), b.into());
        if a != b {
            self.add(FractionConstraint::Eq(Arc::new(vec![a, b])));
        }
    }

    pub fn add_le<A: Into<FractionTerm>, B: Into<FractionTerm>>(&mut self, a: A, b: B) {
        let (a, b) = (a.into(), b.into());
        if a != b && a != FractionTerm::Frac(Fraction::Zero) {
            self.add(FractionConstraint::Le(a, b));
        }
    }

    pub fn add_lt<A: Into<FractionTerm>, B: Into<FractionTerm>>(&mut self, a: A, b: B) {
        self.add(FractionConstraint::Lt(a.into(), b.into()));
    }

    pub fn add_non_zero<A: Into<FractionTerm>>(&mut self, a: A) {
        let a = a.into();
        if !matches!(a, FractionTerm::Frac(Fraction::One) | FractionTerm::Frac(Fraction::Named(_))) {
            self.add(FractionConstraint::NonZero(a));
        }
    }

    pub fn add_zero<A: Into<FractionTerm>>(&mut self, a: A) {
        self.add_eq(a, Fraction::Zero);
    }

    pub fn add_one<A: Into<FractionTerm>>(&mut self, a: A) {
        self.add_eq(a, Fraction::One);
    }

    pub fn is_impossible(&self) -> bool {
        self.impossible.is_some()
    }

    pub fn solve(&self) -> FractionAssignment {
        FractionAssignment::solve(&self.constraints)
    }

    pub fn is_consistent(&self) -> bool {
        !self.is_impossible() && self.solve().is_consistent()
    }

    pub fn build(self) -> FractionConstraints {
        let ConstraintsBuilder { constraints, impossible } = self;
        FractionConstraints(Arc::new(ConstraintsX { constraints, impossible, solved: OnceLock::new() }))
    }
}
