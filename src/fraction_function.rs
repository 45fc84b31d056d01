use crate::ast::Ident;
use crate::fraction::{Fraction, FractionSupply};
use crate::state_space::StateSpace;
use std::sync::Arc;

/// Total map from the nodes of a state space to fractions.
/// Nodes from the root up to alive have explicit values;
/// everything below the root gets `below`; everything else is Zero.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FractionFunction {
    space: StateSpace,
    root: Ident,
    // ordered from root up to alive
    values: Arc<Vec<(Ident, Fraction)>>,
    below: Fraction,
}

impl FractionFunction {
    pub fn new(space: &StateSpace, root: &Ident, above: Vec<Fraction>, below: Fraction) -> Self {
        let path = space.ancestors(root);
        assert!(path.len() == above.len(), "internal error: fraction function size mismatch");
        let values = path.into_iter().zip(above.into_iter()).collect();
        FractionFunction { space: space.clone(), root: root.clone(), values: Arc::new(values), below }
    }

    /// Same fraction everywhere (unique permissions use One)
    pub fn fix_all(space: &StateSpace, root: &Ident, f: Fraction) -> Self {
        let n = space.ancestors(root).len();
        FractionFunction::new(space, root, vec![f; n], f)
    }

    /// Fresh fractions from the root up, a fixed fraction below
    /// (One for full permissions, Zero for pure ones)
    pub fn fixed_below(
        space: &StateSpace,
        root: &Ident,
        supply: &FractionSupply,
        named: bool,
        below: Fraction,
    ) -> Self {
        let n = space.ancestors(root).len();
        FractionFunction::new(space, root, (0..n).map(|_| supply.fresh(named)).collect(), below)
    }

    /// Fresh fractions everywhere (share and immutable permissions)
    pub fn variable_all(space: &StateSpace, root: &Ident, supply: &FractionSupply, named: bool) -> Self {
        let n = space.ancestors(root).len();
        let above = (0..n).map(|_| supply.fresh(named)).collect();
        FractionFunction::new(space, root, above, supply.fresh(named))
    }

    pub fn space(&self) -> &StateSpace {
        &self.space
    }

    pub fn root(&self) -> &Ident {
        &self.root
    }

    pub fn below(&self) -> Fraction {
        self.below
    }

    pub fn root_value(&self) -> Fraction {
        self.values[0].1
    }

    pub fn values(&self) -> &[(Ident, Fraction)] {
        &self.values
    }

    pub fn get(&self, node: &Ident) -> Fraction {
        if let Some((_, f)) = self.values.iter().find(|(n, _)| n == node) {
            *f
        } else if self.space.first_bigger_than_second(&self.root, node) {
            self.below
        } else {
            Fraction::Zero
        }
    }

    pub fn all_fractions(&self) -> Vec<Fraction> {
        let mut fs: Vec<Fraction> = self.values.iter().map(|(_, f)| *f).collect();
        fs.push(self.below);
        fs
    }

    pub fn mentions(&self, f: Fraction) -> bool {
        self.below == f || self.values.iter().any(|(_, g)| *g == f)
    }

    pub fn with_below(&self, below: Fraction) -> Self {
        FractionFunction { below, ..self.clone() }
    }

    /// Nothing below the root: used for read-only views
    pub fn purify(&self) -> Self {
        self.with_below(Fraction::Zero)
    }

    /// Apply f to every fraction, keeping the shape
    pub fn map<F: FnMut(&Ident, Fraction) -> Fraction>(&self, mut f: F) -> Self {
        let values: Vec<(Ident, Fraction)> =
            self.values.iter().map(|(n, v)| (n.clone(), f(n, *v))).collect();
        let below = f(&self.root, self.below);
        FractionFunction { space: self.space.clone(), root: self.root.clone(), values: Arc::new(values), below }
    }
}
