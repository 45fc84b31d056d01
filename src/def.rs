use crate::ast::Ident;
use std::sync::Arc;

/*
Reserved names that appear in state spaces and predicates:
- every state space is rooted at "alive"
- anonymous dimensions get a generated name: dim$ + counter
- predicate targets
    - this (the receiver's virtual permissions)
    - #0, #1, ... (call arguments)
    - result (the value returned by a call)
- anything else used as a predicate target names a field of the receiver
*/

pub const STATE_ALIVE: &str = "alive";
pub const PREFIX_ANON_DIMENSION: &str = "dim$";
pub const TARGET_THIS: &str = "this";
pub const TARGET_RESULT: &str = "result";
pub const PREFIX_ARG: &str = "#";

pub const TOP_SPACE: &str = "java.lang.Object";

pub fn alive() -> Ident {
    Arc::new(STATE_ALIVE.to_string())
}

pub fn anon_dimension(n: usize) -> Ident {
    Arc::new(format!("{}{}", PREFIX_ANON_DIMENSION, n))
}

pub fn arg_target(i: usize) -> Ident {
    Arc::new(format!("{}{}", PREFIX_ARG, i))
}

pub fn is_arg_target(target: &str) -> Option<usize> {
    if target.starts_with(PREFIX_ARG) { target[PREFIX_ARG.len()..].parse().ok() } else { None }
}
