//! Method specifications and class declarations, as handed in by the driver.

use crate::ast::{Ident, Span};
use crate::fraction::FractionSupply;
use crate::messages::Message;
use crate::permission::PermissionSpec;
use crate::permission_set::PermissionSetFromAnnotations;
use crate::state_space::StateSpace;
use crate::util::push_unique;
use std::sync::Arc;

/// Permission for one target: "this", "#i", "result", or a field name
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PermissionAtom {
    pub target: Ident,
    pub space: StateSpace,
    pub spec: PermissionSpec,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PredicateX {
    /// unsatisfiable, e.g. the postcondition of a method that never returns
    Void,
    /// conjunction of permission atoms
    Atoms(Vec<PermissionAtom>),
}
pub type Predicate = Arc<PredicateX>;

pub fn predicate_true() -> Predicate {
    Arc::new(PredicateX::Atoms(Vec::new()))
}

impl PredicateX {
    pub fn is_void(&self) -> bool {
        matches!(self, PredicateX::Void)
    }

    pub fn atoms(&self) -> &[PermissionAtom] {
        match self {
            PredicateX::Void => &[][..],
            PredicateX::Atoms(atoms) => &atoms[..],
        }
    }

    pub fn targets(&self) -> Vec<Ident> {
        let mut targets = Vec::new();
        for atom in self.atoms() {
            push_unique(&mut targets, atom.target.clone());
        }
        targets
    }

    /// States the target must be in, for its frame or its virtual permissions
    pub fn required_states(&self, target: &str, in_frame: bool) -> Vec<Ident> {
        let mut states = Vec::new();
        for atom in self.atoms() {
            if *atom.target == target && atom.spec.frame == in_frame {
                for s in atom.spec.states.iter() {
                    push_unique(&mut states, s.clone());
                }
            }
        }
        states
    }

    /// The permissions the predicate gives one target, instantiated with fresh fractions.
    /// None if the predicate does not mention the target.
    pub fn permissions_for(
        &self,
        target: &str,
        named: bool,
        supply: &FractionSupply,
    ) -> Result<Option<PermissionSetFromAnnotations>, Message> {
        let mut result: Option<PermissionSetFromAnnotations> = None;
        for atom in self.atoms().iter().filter(|a| *a.target == target) {
            let set = PermissionSetFromAnnotations::singleton(&atom.space, &atom.spec, named, supply);
            result = Some(match result {
                None => set,
                Some(prev) => prev.combine(&set)?,
            });
        }
        Ok(result)
    }
}

impl std::fmt::Display for PredicateX {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PredicateX::Void => write!(f, "false"),
            PredicateX::Atoms(atoms) if atoms.is_empty() => write!(f, "true"),
            PredicateX::Atoms(atoms) => {
                let parts: Vec<String> =
                    atoms.iter().map(|a| format!("{}: {}", a.target, a.spec)).collect();
                write!(f, "{}", parts.join(" * "))
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct MethodCase {
    pub pre: Predicate,
    pub post: Predicate,
    /// the method does not change the state of anything it touches
    pub effect_free: bool,
}

#[derive(Debug)]
pub struct MethodSignatureX {
    pub name: Ident,
    pub span: Span,
    pub cases: Vec<MethodCase>,
    pub is_static: bool,
    pub is_constructor: bool,
}
pub type MethodSignature = Arc<MethodSignatureX>;

pub fn method_signature(
    name: &str,
    span: &Span,
    cases: Vec<MethodCase>,
    is_static: bool,
    is_constructor: bool,
) -> MethodSignature {
    if cases.is_empty() {
        panic!("internal error: method signature {} without cases", name);
    }
    Arc::new(MethodSignatureX {
        name: Arc::new(name.to_string()),
        span: span.clone(),
        cases,
        is_static,
        is_constructor,
    })
}

/// A class with a protocol: its state space and the invariant of each state
#[derive(Debug)]
pub struct ClassDeclX {
    pub name: Ident,
    pub space: StateSpace,
    pub invariants: Vec<(Ident, Predicate)>,
}
pub type ClassDecl = Arc<ClassDeclX>;

impl ClassDeclX {
    pub fn invariant(&self, state: &Ident) -> Option<&Predicate> {
        self.invariants.iter().find(|(s, _)| s == state).map(|(_, p)| p)
    }
}
