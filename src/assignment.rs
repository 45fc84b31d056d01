use crate::constraints::FractionConstraint;
use crate::fraction::{Fraction, FractionTerm};
use indexmap::IndexSet;
use std::collections::HashMap;

/// Equivalence classes of fraction terms (union-find).
/// The Zero and One classes are seeded at construction; One is non-zero.
/// A class is inconsistent if it contains two distinct literals
/// or if it is the Zero class and is marked non-zero.
#[derive(Clone, Debug)]
pub struct FractionAssignment {
    terms: Vec<FractionTerm>,
    index: HashMap<FractionTerm, usize>,
    parent: Vec<usize>,
    // valid at class representatives only:
    non_zero: Vec<bool>,
    literals: Vec<Vec<Fraction>>,
    sums: Vec<usize>,
    conflict: Option<String>,
    changed: bool,
}

impl FractionAssignment {
    pub fn new() -> Self {
        let mut a = FractionAssignment {
            terms: Vec::new(),
            index: HashMap::new(),
            parent: Vec::new(),
            non_zero: Vec::new(),
            literals: Vec::new(),
            sums: Vec::new(),
            conflict: None,
            changed: false,
        };
        a.index_of(&FractionTerm::Frac(Fraction::Zero));
        a.index_of(&FractionTerm::Frac(Fraction::One));
        a
    }

    /// Solve the given constraints by propagating until nothing changes
    pub fn solve(constraints: &IndexSet<FractionConstraint>) -> Self {
        let mut a = FractionAssignment::new();
        for c in constraints.iter() {
            for t in c.terms() {
                a.index_of(t);
            }
        }
        loop {
            a.changed = false;
            for c in constraints.iter() {
                a.apply(c);
            }
            a.propagate_sums();
            if !a.changed || a.conflict.is_some() {
                break;
            }
        }
        a
    }

    fn index_of(&mut self, t: &FractionTerm) -> usize {
        if let Some(i) = self.index.get(t) {
            return *i;
        }
        if let FractionTerm::Sum(fs) = t {
            for f in fs.iter() {
                self.index_of(&FractionTerm::Frac(*f));
            }
        }
        let i = self.terms.len();
        self.terms.push(t.clone());
        self.index.insert(t.clone(), i);
        self.parent.push(i);
        let (non_zero, literals) = match t {
            FractionTerm::Frac(f @ Fraction::Zero) => (false, vec![*f]),
            FractionTerm::Frac(f @ Fraction::One) => (true, vec![*f]),
            FractionTerm::Frac(f @ Fraction::Named(_)) => (true, vec![*f]),
            FractionTerm::Frac(Fraction::Variable(_)) => (false, vec![]),
            FractionTerm::Sum(_) => {
                self.sums.push(i);
                (false, vec![])
            }
        };
        self.non_zero.push(non_zero);
        self.literals.push(literals);
        i
    }

    fn lookup(&self, t: &FractionTerm) -> Option<usize> {
        self.index.get(t).map(|i| self.find(*i))
    }

    fn find(&self, mut i: usize) -> usize {
        while self.parent[i] != i {
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: &FractionTerm, b: &FractionTerm) {
        let ia = self.index_of(a);
        let ib = self.index_of(b);
        let ra = self.find(ia);
        let rb = self.find(ib);
        if ra == rb {
            return;
        }
        self.parent[rb] = ra;
        self.non_zero[ra] = self.non_zero[ra] || self.non_zero[rb];
        let moved = std::mem::take(&mut self.literals[rb]);
        for f in moved {
            if !self.literals[ra].contains(&f) {
                self.literals[ra].push(f);
            }
        }
        self.changed = true;
    }

    pub fn make_equivalent(&mut self, terms: &[FractionTerm]) {
        for t in terms.iter().skip(1) {
            self.union(&terms[0], t);
        }
    }

    pub fn make_zero(&mut self, t: &FractionTerm) {
        self.union(&FractionTerm::Frac(Fraction::Zero), t);
    }

    pub fn make_one(&mut self, t: &FractionTerm) {
        self.union(&FractionTerm::Frac(Fraction::One), t);
    }

    pub fn make_non_zero(&mut self, t: &FractionTerm) {
        let i = self.index_of(t);
        let r = self.find(i);
        if !self.non_zero[r] {
            self.non_zero[r] = true;
            self.changed = true;
        }
    }

    fn class_has_literal(&self, t: &FractionTerm, lit: Fraction) -> Option<bool> {
        self.lookup(t).map(|r| self.literals[r].contains(&lit))
    }

    pub fn is_zero(&self, t: &FractionTerm) -> bool {
        match (self.class_has_literal(t, Fraction::Zero), t) {
            (Some(b), _) => b,
            (None, FractionTerm::Frac(f)) => *f == Fraction::Zero,
            (None, FractionTerm::Sum(fs)) => {
                fs.iter().all(|f| self.is_zero(&FractionTerm::Frac(*f)))
            }
        }
    }

    pub fn is_one(&self, t: &FractionTerm) -> bool {
        match (self.class_has_literal(t, Fraction::One), t) {
            (Some(b), _) => b,
            (None, FractionTerm::Frac(f)) => *f == Fraction::One,
            (None, FractionTerm::Sum(fs)) => fs.iter().any(|f| self.is_one(&FractionTerm::Frac(*f))),
        }
    }

    pub fn is_non_zero(&self, t: &FractionTerm) -> bool {
        match (self.lookup(t), t) {
            (Some(r), _) => self.non_zero[r],
            (None, FractionTerm::Frac(f)) => matches!(f, Fraction::One | Fraction::Named(_)),
            (None, FractionTerm::Sum(fs)) => {
                fs.iter().any(|f| self.is_non_zero(&FractionTerm::Frac(*f)))
            }
        }
    }

    pub fn are_equivalent(&self, a: &FractionTerm, b: &FractionTerm) -> bool {
        if a == b {
            return true;
        }
        match (self.lookup(a), self.lookup(b)) {
            (Some(ra), Some(rb)) if ra == rb => true,
            _ => (self.is_zero(a) && self.is_zero(b)) || (self.is_one(a) && self.is_one(b)),
        }
    }

    /// The literal in f's class, if there is one, otherwise f itself
    pub fn get_representative(&self, f: Fraction) -> Fraction {
        match self.lookup(&FractionTerm::Frac(f)) {
            Some(r) => self.literals[r].first().copied().unwrap_or(f),
            None => f,
        }
    }

    /// Full scan over all classes
    pub fn is_consistent(&self) -> bool {
        if self.conflict.is_some() {
            return false;
        }
        for i in 0..self.terms.len() {
            if self.parent[i] != i {
                continue;
            }
            if self.literals[i].len() > 1 {
                return false;
            }
            if self.non_zero[i] && self.literals[i].contains(&Fraction::Zero) {
                return false;
            }
        }
        true
    }

    pub fn conflict(&self) -> Option<&String> {
        self.conflict.as_ref()
    }

    fn apply(&mut self, c: &FractionConstraint) {
        match c {
            FractionConstraint::Eq(ts) => self.make_equivalent(ts),
            FractionConstraint::NonZero(t) => self.make_non_zero(t),
            FractionConstraint::Le(x, y) => {
                if self.is_zero(y) {
                    self.make_zero(x);
                }
                if self.is_non_zero(x) {
                    self.make_non_zero(y);
                }
                if self.is_one(x) {
                    self.make_one(y);
                }
            }
            FractionConstraint::Lt(x, y) => {
                self.make_non_zero(y);
                if self.is_one(x) || self.are_equivalent(x, y) {
                    self.conflict = Some(format!("{} < {} cannot hold", x, y));
                }
            }
        }
    }

    // every sum is bounded by one
    fn propagate_sums(&mut self) {
        let sums = self.sums.clone();
        for i in sums {
            let s = self.terms[i].clone();
            let summands: Vec<FractionTerm> =
                s.fractions().into_iter().map(FractionTerm::Frac).collect();
            if self.is_zero(&s) {
                for f in summands.iter() {
                    self.make_zero(f);
                }
                continue;
            }
            if let Some(k) = summands.iter().position(|f| self.is_one(f)) {
                self.make_one(&s);
                for (j, f) in summands.iter().enumerate() {
                    if j != k {
                        self.make_zero(f);
                    }
                }
                continue;
            }
            if summands.iter().any(|f| self.is_non_zero(f)) {
                self.make_non_zero(&s);
            }
            let live: Vec<FractionTerm> =
                summands.iter().filter(|f| !self.is_zero(f)).cloned().collect();
            match live.len() {
                0 => self.make_zero(&s),
                1 => self.make_equivalent(&[s.clone(), live[0].clone()]),
                _ => {}
            }
        }
    }
}
