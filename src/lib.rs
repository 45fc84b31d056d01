//! Fractional permission analysis for typestate protocols.
//!
//! Permissions to objects carry symbolic fractions over the nodes of a per-type
//! state hierarchy.  The analysis lattice is a disjunctive context of permission
//! tuples; calls split and merge permissions according to method specifications,
//! and the receiver of the analyzed method is unpacked and packed against its
//! state invariants.

#[macro_use]
pub mod printer;

pub mod analysis;
pub mod assignment;
pub mod ast;
pub mod choice;
pub mod constraints;
pub mod context;
pub mod ctx;
pub mod def;
pub mod fraction;
pub mod fraction_function;
pub mod messages;
pub mod operations;
pub mod permission;
pub mod permission_set;
pub mod permissions;
pub mod print_parse;
pub mod signature;
pub mod state_space;
pub mod tuple;

mod emitter;
mod util;

#[cfg(test)]
mod tests;
