//! Reading state spaces, permission specifications, predicates and classes from
//! s-expressions.  Used by tests and by drivers that keep protocols in text form:
//!
//!   (space Connection (dimension alive d (open closed)) (field sock open))
//!   (full open (states closed) frame)
//!   (pred (sock Socket full alive (states connected)))
//!   (class Connection (inv open (pred (sock Socket full alive (states connected))))))

use crate::ast::Ident;
use crate::permission::{PermissionKind, PermissionSpec};
use crate::printer::node_to_string;
use crate::signature::{ClassDecl, ClassDeclX, PermissionAtom, Predicate, PredicateX};
use crate::state_space::{StateSpace, StateSpaceBuilder, StateSpaceRepository};
use sise::Node;
use std::sync::Arc;

fn map_nodes_to_vec<A, F>(nodes: &[Node], f: F) -> Result<Vec<A>, String>
where
    F: Fn(&Node) -> Result<A, String>,
{
    let mut v: Vec<A> = Vec::new();
    for node in nodes.iter() {
        v.push(f(node)?);
    }
    Ok(v)
}

fn node_to_ident(node: &Node) -> Result<Ident, String> {
    match node {
        Node::Atom(s) => Ok(Arc::new(s.clone())),
        _ => Err(format!("expected identifier, found: {}", node_to_string(node))),
    }
}

pub fn parse_node(s: &str) -> Result<Node, String> {
    let mut parser = sise::Parser::new(s.as_bytes());
    sise::read_into_tree(&mut parser).map_err(|e| format!("could not parse {}: {:?}", s, e))
}

pub fn node_to_state_space(node: &Node) -> Result<StateSpace, String> {
    let nodes = match node {
        Node::List(nodes) => nodes,
        _ => return Err(format!("expected state space, found: {}", node_to_string(node))),
    };
    match &nodes[..] {
        [Node::Atom(s), Node::Atom(name), decls @ ..] if s == "space" => {
            let mut builder = StateSpaceBuilder::new(name);
            for decl in decls {
                match decl {
                    Node::List(items) => match &items[..] {
                        [Node::Atom(head), Node::Atom(refined), Node::Atom(dim), Node::List(states)]
                            if head == "dimension" || head == "marker" =>
                        {
                            let states = map_nodes_to_vec(states, node_to_ident)?;
                            let states: Vec<&str> = states.iter().map(|s| s.as_str()).collect();
                            let dim = if dim == "_" { None } else { Some(dim.as_str()) };
                            builder
                                .add_dimension(dim, refined, &states, head == "marker")
                                .map_err(|e| e.note.clone())?;
                        }
                        [Node::Atom(head), Node::Atom(state), Node::Atom(refined)] if head == "state" => {
                            builder.add_anonymous_state(state, refined).map_err(|e| e.note.clone())?;
                        }
                        [Node::Atom(head), Node::Atom(field), Node::Atom(n)] if head == "field" => {
                            builder.map_field(field, n).map_err(|e| e.note.clone())?;
                        }
                        _ => return Err(format!("unexpected declaration: {}", node_to_string(decl))),
                    },
                    _ => return Err(format!("unexpected declaration: {}", node_to_string(decl))),
                }
            }
            Ok(builder.build())
        }
        _ => Err(format!("expected state space, found: {}", node_to_string(node))),
    }
}

fn nodes_to_permission_spec(nodes: &[Node]) -> Result<PermissionSpec, String> {
    match nodes {
        [Node::Atom(kind), Node::Atom(root), options @ ..] => {
            let kind = match PermissionKind::from_str(kind) {
                Some(kind) => kind,
                None => return Err(format!("unknown permission kind {}", kind)),
            };
            let mut states = Vec::new();
            let mut frame = false;
            for option in options {
                match option {
                    Node::Atom(s) if s == "frame" => frame = true,
                    Node::List(items) => match &items[..] {
                        [Node::Atom(s), rest @ ..] if s == "states" => {
                            states = map_nodes_to_vec(rest, node_to_ident)?;
                        }
                        _ => return Err(format!("unexpected option: {}", node_to_string(option))),
                    },
                    _ => return Err(format!("unexpected option: {}", node_to_string(option))),
                }
            }
            Ok(PermissionSpec { kind, root: Arc::new(root.clone()), states, frame })
        }
        _ => Err(format!("expected permission, found: {}", node_to_string(&Node::List(nodes.to_vec())))),
    }
}

pub fn node_to_permission_spec(node: &Node) -> Result<PermissionSpec, String> {
    match node {
        Node::List(nodes) => nodes_to_permission_spec(nodes),
        _ => Err(format!("expected permission, found: {}", node_to_string(node))),
    }
}

/// Atoms name their state space; unknown spaces are an error
pub fn node_to_predicate(node: &Node, spaces: &StateSpaceRepository) -> Result<Predicate, String> {
    match node {
        Node::Atom(s) if s == "void" => Ok(Arc::new(PredicateX::Void)),
        Node::List(nodes) => match &nodes[..] {
            [Node::Atom(s), atoms @ ..] if s == "pred" => {
                let atoms = map_nodes_to_vec(atoms, |atom| match atom {
                    Node::List(items) => match &items[..] {
                        [Node::Atom(target), Node::Atom(space), spec @ ..] => {
                            let space = match spaces.get(space) {
                                Some(space) => space,
                                None => return Err(format!("unknown state space {}", space)),
                            };
                            let spec = nodes_to_permission_spec(spec)?;
                            Ok(PermissionAtom { target: Arc::new(target.clone()), space, spec })
                        }
                        _ => Err(format!("expected permission atom, found: {}", node_to_string(atom))),
                    },
                    _ => Err(format!("expected permission atom, found: {}", node_to_string(atom))),
                })?;
                Ok(Arc::new(PredicateX::Atoms(atoms)))
            }
            _ => Err(format!("expected predicate, found: {}", node_to_string(node))),
        },
        _ => Err(format!("expected predicate, found: {}", node_to_string(node))),
    }
}

pub fn node_to_class_decl(node: &Node, spaces: &StateSpaceRepository) -> Result<ClassDecl, String> {
    match node {
        Node::List(nodes) => match &nodes[..] {
            [Node::Atom(s), Node::Atom(name), invs @ ..] if s == "class" => {
                let space = match spaces.get(name) {
                    Some(space) => space,
                    None => return Err(format!("unknown state space {}", name)),
                };
                let invariants = map_nodes_to_vec(invs, |inv| match inv {
                    Node::List(items) => match &items[..] {
                        [Node::Atom(s), Node::Atom(state), pred] if s == "inv" => {
                            Ok((Arc::new(state.clone()), node_to_predicate(pred, spaces)?))
                        }
                        _ => Err(format!("expected invariant, found: {}", node_to_string(inv))),
                    },
                    _ => Err(format!("expected invariant, found: {}", node_to_string(inv))),
                })?;
                Ok(Arc::new(ClassDeclX { name: Arc::new(name.clone()), space, invariants }))
            }
            _ => Err(format!("expected class, found: {}", node_to_string(node))),
        },
        _ => Err(format!("expected class, found: {}", node_to_string(node))),
    }
}
