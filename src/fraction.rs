use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::sync::Arc;

/// Symbolic amount of a permission held at one state node.
/// Fractions never change; what they stand for is decided by a FractionAssignment.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Fraction {
    Zero,
    One,
    /// universally quantified constant; distinct named fractions are never equal,
    /// and a named fraction is neither zero nor one
    Named(u64),
    /// existential unknown, solved by the constraints it appears in
    Variable(u64),
}

impl Fraction {
    pub fn is_literal(&self) -> bool {
        !matches!(self, Fraction::Variable(_))
    }
}

impl std::fmt::Display for Fraction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Fraction::Zero => write!(f, "0"),
            Fraction::One => write!(f, "1"),
            Fraction::Named(n) => write!(f, "k{}", n),
            Fraction::Variable(n) => write!(f, "v{}", n),
        }
    }
}

/// A fraction or a sum of fractions.
/// Sums are kept normalized (sorted, no Zero summands, at least two summands),
/// so structurally equal sums are the same term.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FractionTerm {
    Frac(Fraction),
    Sum(Arc<Vec<Fraction>>),
}

impl FractionTerm {
    pub fn sum(fs: &[Fraction]) -> FractionTerm {
        let mut summands: Vec<Fraction> =
            fs.iter().copied().filter(|f| *f != Fraction::Zero).collect();
        summands.sort();
        match summands.len() {
            0 => FractionTerm::Frac(Fraction::Zero),
            1 => FractionTerm::Frac(summands[0]),
            _ => FractionTerm::Sum(Arc::new(summands)),
        }
    }

    pub fn fractions(&self) -> Vec<Fraction> {
        match self {
            FractionTerm::Frac(f) => vec![*f],
            FractionTerm::Sum(fs) => (**fs).clone(),
        }
    }

    pub fn as_fraction(&self) -> Option<Fraction> {
        match self {
            FractionTerm::Frac(f) => Some(*f),
            FractionTerm::Sum(_) => None,
        }
    }
}

impl From<Fraction> for FractionTerm {
    fn from(f: Fraction) -> Self {
        FractionTerm::Frac(f)
    }
}

impl std::fmt::Display for FractionTerm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FractionTerm::Frac(x) => write!(f, "{}", x),
            FractionTerm::Sum(xs) => {
                let parts: Vec<String> = xs.iter().map(|x| x.to_string()).collect();
                write!(f, "({})", parts.join(" + "))
            }
        }
    }
}

/// Source of fresh fractions for one analysis session
pub struct FractionSupply {
    next: Cell<u64>,
}

impl FractionSupply {
    pub fn new() -> Self {
        FractionSupply { next: Cell::new(0) }
    }

    fn next_id(&self) -> u64 {
        let n = self.next.get();
        self.next.set(n + 1);
        n
    }

    pub fn fresh_variable(&self) -> Fraction {
        Fraction::Variable(self.next_id())
    }

    pub fn fresh_named(&self) -> Fraction {
        Fraction::Named(self.next_id())
    }

    pub fn fresh(&self, named: bool) -> Fraction {
        if named { self.fresh_named() } else { self.fresh_variable() }
    }
}
