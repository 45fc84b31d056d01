use serde::{Deserialize, Serialize};
use std::cell::RefCell;

/// Index into a ChoiceTree
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChoiceId(pub u32);

pub const ROOT_CHOICE: ChoiceId = ChoiceId(0);

/// Every concrete context node records the choice it was made in
/// and the branch point that choice was made at
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ChoiceIds {
    pub parent: ChoiceId,
    pub choice: ChoiceId,
}

impl ChoiceIds {
    pub fn root() -> Self {
        ChoiceIds { parent: ROOT_CHOICE, choice: ROOT_CHOICE }
    }
}

impl std::fmt::Display for ChoiceIds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "c{}/c{}", self.parent.0, self.choice.0)
    }
}

struct ChoiceNode {
    parent: Option<ChoiceId>,
    purpose: String,
}

/// Arena of choice ids; ids are handed out in increasing order, so a larger id is younger
pub struct ChoiceTree {
    nodes: RefCell<Vec<ChoiceNode>>,
}

impl ChoiceTree {
    pub fn new() -> Self {
        let root = ChoiceNode { parent: None, purpose: "root".to_string() };
        ChoiceTree { nodes: RefCell::new(vec![root]) }
    }

    pub fn mint(&self, parent: ChoiceId, purpose: &str) -> ChoiceId {
        let mut nodes = self.nodes.borrow_mut();
        let id = ChoiceId(nodes.len() as u32);
        nodes.push(ChoiceNode { parent: Some(parent), purpose: purpose.to_string() });
        id
    }

    /// Ids for a new branch under the branch point `ids.choice`
    pub fn fresh_ids(&self, ids: ChoiceIds, purpose: &str) -> ChoiceIds {
        ChoiceIds { parent: ids.choice, choice: self.mint(ids.choice, purpose) }
    }

    pub fn parent(&self, id: ChoiceId) -> Option<ChoiceId> {
        self.nodes.borrow().get(id.0 as usize).and_then(|n| n.parent)
    }

    pub fn purpose(&self, id: ChoiceId) -> String {
        self.nodes.borrow().get(id.0 as usize).map_or_else(String::new, |n| n.purpose.clone())
    }

    pub fn len(&self) -> usize {
        self.nodes.borrow().len()
    }

    pub fn younger(a: ChoiceId, b: ChoiceId) -> ChoiceId {
        if a.0 >= b.0 { a } else { b }
    }

    /// id and its ancestors, ending with the root
    pub fn ancestors(&self, id: ChoiceId) -> Vec<ChoiceId> {
        let mut result = vec![id];
        let mut cur = id;
        while let Some(p) = self.parent(cur) {
            result.push(p);
            cur = p;
        }
        result
    }

    pub fn common_ancestor(&self, a: ChoiceId, b: ChoiceId) -> ChoiceId {
        let above_a = self.ancestors(a);
        self.ancestors(b).into_iter().find(|id| above_a.contains(id)).unwrap_or(ROOT_CHOICE)
    }
}
