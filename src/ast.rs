use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub type AstId = u64;

/// Source position handed in by the driver; only used for reporting
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Span {
    pub id: AstId, // arbitrary identifier chosen by the driver (may be left as 0)
    pub as_string: String,
}

pub type Ident = Arc<String>;
pub type Idents = Arc<Vec<Ident>>;

/// Opaque abstract location computed by alias analysis
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Location(pub u32);

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "l{}", self.0)
    }
}

/// Kind of control-flow merge at which two lattice values are joined
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MergePoint {
    /// ordinary merge after a conditional
    Branch,
    /// loop header: the incoming back edge must not weaken what was known before the loop
    Loop,
}

pub fn str_ident(x: &str) -> Ident {
    Arc::new(x.to_string())
}

pub fn idents(xs: &[&str]) -> Idents {
    Arc::new(xs.iter().map(|x| str_ident(x)).collect())
}
