//! State hierarchies of object protocols.
//!
//! A state space is a tree rooted at "alive".  States are refined by dimensions,
//! and each dimension is partitioned into mutually exclusive states:
//!
//!   alive
//!    └─ conn (dimension)
//!        ├─ open
//!        └─ closed
//!
//! Two nodes are orthogonal if the object can be in both independently,
//! i.e. the paths to them split at two different dimensions of the same state.

use crate::ast::Ident;
use crate::def::{alive, anon_dimension, STATE_ALIVE, TOP_SPACE};
use crate::messages::{error_bare, Message};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

pub type StateSpace = Arc<StateSpaceX>;

pub struct StateSpaceX {
    pub name: Ident,
    parents: HashMap<Ident, Ident>,
    children: HashMap<Ident, Vec<Ident>>,
    dimensions: HashSet<Ident>,
    markers: HashSet<Ident>,
    fields: HashMap<Ident, Ident>,
    nodes: Vec<Ident>,
}

// Spaces are identified by type name
impl PartialEq for StateSpaceX {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for StateSpaceX {}

impl std::fmt::Debug for StateSpaceX {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StateSpace({})", self.name)
    }
}

impl StateSpaceX {
    pub fn root(&self) -> Ident {
        alive()
    }

    pub fn is_known(&self, node: &str) -> bool {
        node == STATE_ALIVE || self.parents.contains_key(&node.to_string())
    }

    /// Unknown nodes are treated as children of alive
    pub fn parent(&self, node: &Ident) -> Option<Ident> {
        if **node == STATE_ALIVE {
            None
        } else {
            Some(self.parents.get(node).cloned().unwrap_or_else(alive))
        }
    }

    /// node and all its ancestors, ending with alive
    pub fn ancestors(&self, node: &Ident) -> Vec<Ident> {
        let mut result = vec![node.clone()];
        let mut cur = node.clone();
        while let Some(p) = self.parent(&cur) {
            result.push(p.clone());
            cur = p;
        }
        result
    }

    /// true iff second is first or a descendant of first
    pub fn first_bigger_than_second(&self, first: &Ident, second: &Ident) -> bool {
        self.ancestors(second).contains(first)
    }

    /// Does being in `known` imply being in `needed`?
    /// Being "in" a dimension means being in the state it refines.
    pub fn first_implies_second(&self, known: &Ident, needed: &Ident) -> bool {
        let needed = if self.is_dimension(needed) {
            self.parent(needed).unwrap_or_else(alive)
        } else {
            needed.clone()
        };
        self.first_bigger_than_second(&needed, known)
    }

    pub fn is_dimension(&self, node: &Ident) -> bool {
        self.dimensions.contains(node)
    }

    pub fn is_marker(&self, node: &Ident) -> bool {
        self.markers.contains(node)
    }

    pub fn children(&self, node: &Ident) -> Vec<Ident> {
        self.children.get(node).cloned().unwrap_or_default()
    }

    pub fn dimensions(&self, state: &Ident) -> Vec<Ident> {
        self.children(state).into_iter().filter(|c| self.is_dimension(c)).collect()
    }

    pub fn all_nodes(&self) -> &[Ident] {
        &self.nodes
    }

    /// Node a field is mapped to, if any
    pub fn field_root_node(&self, field: &Ident) -> Option<Ident> {
        self.fields.get(field).cloned()
    }

    pub fn fields(&self) -> Vec<(Ident, Ident)> {
        let mut fs: Vec<(Ident, Ident)> =
            self.fields.iter().map(|(f, n)| (f.clone(), n.clone())).collect();
        fs.sort();
        fs
    }

    pub fn lowest_common_ancestor(&self, a: &Ident, b: &Ident) -> Ident {
        let above_a = self.ancestors(a);
        for n in self.ancestors(b) {
            if above_a.contains(&n) {
                return n;
            }
        }
        alive()
    }

    /// Lowest common ancestor, lifted to a state if it is a dimension
    pub fn lowest_common_parent(&self, a: &Ident, b: &Ident) -> Ident {
        let lca = self.lowest_common_ancestor(a, b);
        if self.is_dimension(&lca) { self.parent(&lca).unwrap_or_else(alive) } else { lca }
    }

    pub fn least_common_ancestor(&self, nodes: &[Ident]) -> Ident {
        match nodes.split_first() {
            None => alive(),
            Some((first, rest)) => {
                rest.iter().fold(first.clone(), |acc, n| self.lowest_common_ancestor(&acc, n))
            }
        }
    }

    /// Nodes on the way from lower (inclusive) up to upper (inclusive);
    /// empty if upper is not above lower
    pub fn path_between(&self, upper: &Ident, lower: &Ident) -> Vec<Ident> {
        let mut path = Vec::new();
        for n in self.ancestors(lower) {
            path.push(n.clone());
            if n == *upper {
                return path;
            }
        }
        Vec::new()
    }

    pub fn are_orthogonal(&self, a: &Ident, b: &Ident) -> bool {
        if a == b || **a == STATE_ALIVE || **b == STATE_ALIVE {
            return false;
        }
        if self.first_bigger_than_second(a, b) || self.first_bigger_than_second(b, a) {
            return false;
        }
        let lca = self.lowest_common_ancestor(a, b);
        let below = |x: &Ident| -> Option<Ident> {
            let path = self.path_between(&lca, x);
            if path.len() >= 2 { Some(path[path.len() - 2].clone()) } else { None }
        };
        match (below(a), below(b)) {
            // sibling states of one dimension exclude each other
            (Some(ca), Some(cb)) => self.is_dimension(&ca) && self.is_dimension(&cb),
            _ => false,
        }
    }

    pub fn all_orthogonal(&self, nodes: &[Ident]) -> bool {
        for i in 0..nodes.len() {
            for j in i + 1..nodes.len() {
                if !self.are_orthogonal(&nodes[i], &nodes[j]) {
                    return false;
                }
            }
        }
        true
    }
}

pub struct StateSpaceBuilder {
    space: StateSpaceX,
    anon_count: usize,
}

impl StateSpaceBuilder {
    pub fn new(name: &str) -> Self {
        let space = StateSpaceX {
            name: Arc::new(name.to_string()),
            parents: HashMap::new(),
            children: HashMap::new(),
            dimensions: HashSet::new(),
            markers: HashSet::new(),
            fields: HashMap::new(),
            nodes: vec![alive()],
        };
        StateSpaceBuilder { space, anon_count: 0 }
    }

    fn add_node(&mut self, node: Ident, parent: &Ident) -> Result<(), Message> {
        if self.space.is_known(&node) {
            return Err(error_bare(format!(
                "state space {}: duplicate node {}",
                self.space.name, node
            )));
        }
        self.space.parents.insert(node.clone(), parent.clone());
        self.space.children.entry(parent.clone()).or_insert_with(Vec::new).push(node.clone());
        self.space.nodes.push(node);
        Ok(())
    }

    /// Refine `refined` with a dimension holding the given states.
    /// A missing dimension name creates an anonymous dimension.
    pub fn add_dimension(
        &mut self,
        dim: Option<&str>,
        refined: &str,
        states: &[&str],
        marker: bool,
    ) -> Result<Ident, Message> {
        let refined = Arc::new(refined.to_string());
        if !self.space.is_known(&refined) {
            return Err(error_bare(format!(
                "state space {}: unknown state {} refined by a dimension",
                self.space.name, refined
            )));
        }
        if self.space.is_dimension(&refined) {
            return Err(error_bare(format!(
                "state space {}: {} is a dimension and can only be refined by states",
                self.space.name, refined
            )));
        }
        let dim = match dim {
            Some(d) => Arc::new(d.to_string()),
            None => {
                self.anon_count += 1;
                anon_dimension(self.anon_count)
            }
        };
        if dim == refined || states.iter().any(|s| **s == *refined) {
            return Err(error_bare(format!(
                "state space {}: {} refines itself",
                self.space.name, refined
            )));
        }
        self.add_node(dim.clone(), &refined)?;
        self.space.dimensions.insert(dim.clone());
        for s in states {
            let s = Arc::new(s.to_string());
            self.add_node(s.clone(), &dim)?;
            if marker {
                self.space.markers.insert(s);
            }
        }
        Ok(dim)
    }

    /// Add a single state refining `refined` in its own anonymous dimension
    pub fn add_anonymous_state(&mut self, state: &str, refined: &str) -> Result<Ident, Message> {
        self.add_dimension(None, refined, &[state], false)
    }

    pub fn map_field(&mut self, field: &str, node: &str) -> Result<(), Message> {
        if !self.space.is_known(node) {
            return Err(error_bare(format!(
                "state space {}: field {} mapped to unknown node {}",
                self.space.name, field, node
            )));
        }
        self.space.fields.insert(Arc::new(field.to_string()), Arc::new(node.to_string()));
        Ok(())
    }

    pub fn build(self) -> StateSpace {
        Arc::new(self.space)
    }
}

/// Per-type state spaces, computed once and shared by all analyses of a session
pub struct StateSpaceRepository {
    spaces: Mutex<HashMap<Ident, StateSpace>>,
    top: StateSpace,
}

impl StateSpaceRepository {
    pub fn new() -> Self {
        StateSpaceRepository {
            spaces: Mutex::new(HashMap::new()),
            top: StateSpaceBuilder::new(TOP_SPACE).build(),
        }
    }

    /// Space for types without a declared protocol: only alive
    pub fn top(&self) -> StateSpace {
        self.top.clone()
    }

    pub fn register(&self, space: StateSpace) {
        let mut spaces = self.spaces.lock().unwrap_or_else(|e| e.into_inner());
        spaces.insert(space.name.clone(), space);
    }

    pub fn get(&self, name: &str) -> Option<StateSpace> {
        let spaces = self.spaces.lock().unwrap_or_else(|e| e.into_inner());
        spaces.get(&name.to_string()).cloned()
    }

    pub fn get_or_top(&self, name: &str) -> StateSpace {
        self.get(name).unwrap_or_else(|| self.top())
    }

    pub fn get_or_insert_with<F: FnOnce() -> StateSpace>(&self, name: &str, f: F) -> StateSpace {
        let mut spaces = self.spaces.lock().unwrap_or_else(|e| e.into_inner());
        spaces.entry(Arc::new(name.to_string())).or_insert_with(f).clone()
    }
}
