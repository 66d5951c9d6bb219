//! Arena-backed local tree.
//!
//! Nodes are addressed by [`NodeId`]; parent and child links are ids, so
//! moving a subtree is a matter of rewriting two index entries. Every
//! change to a node's name or parent goes through [`LocalTree::set_name_parent`],
//! which keeps the primary and alias children indexes consistent.

use std::collections::BTreeSet;

use crate::node::{LocalNode, NodeId, NodeKind};

struct Slot {
    generation: u32,
    node: Option<LocalNode>,
}

/// Outcome of resolving a path against the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Every component matched.
    Found {
        node: NodeId,
        /// Parent of `node` (`None` for the root)
        parent: Option<NodeId>,
    },
    /// Matched down to `parent`; `residual` starts at the first unmatched component.
    Partial { parent: NodeId, residual: String },
    /// The path does not lie under the tree (or the starting node is gone).
    NoMatch,
}

impl Resolution {
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Resolution::Found { node, .. } => Some(*node),
            _ => None,
        }
    }
}

/// Join a path and a component without doubling a trailing separator.
pub(crate) fn join_path(base: &str, sep: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else if base.ends_with(sep) {
        format!("{}{}", base, name)
    } else {
        format!("{}{}{}", base, sep, name)
    }
}

pub struct LocalTree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: NodeId,
    /// Nodes cut loose from their parent but still tracked by identity
    detached: BTreeSet<NodeId>,
    live: usize,
}

impl LocalTree {
    /// Create a tree whose root folder is `root_path`.
    pub fn new(root_path: &str) -> Self {
        let mut tree = Self {
            slots: Vec::new(),
            free: Vec::new(),
            root: NodeId {
                index: 0,
                generation: 0,
            },
            detached: BTreeSet::new(),
            live: 0,
        };
        tree.root = tree.alloc(LocalNode::new(
            NodeKind::Folder,
            root_path.to_string(),
            root_path.to_string(),
            None,
        ));
        tree
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn root_path(&self) -> &str {
        &self.node(self.root).local_name
    }

    /// Number of live nodes, the root and detached nodes included.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn get(&self, id: NodeId) -> Option<&LocalNode> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut LocalNode> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Like `get` for ids known to be live.
    fn node(&self, id: NodeId) -> &LocalNode {
        match self.get(id) {
            Some(node) => node,
            None => unreachable!("stale node id {}", id),
        }
    }

    fn node_mut(&mut self, id: NodeId) -> &mut LocalNode {
        match self.get_mut(id) {
            Some(node) => node,
            None => unreachable!("stale node id {}", id),
        }
    }

    /// All live nodes, detached ones included.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &LocalNode)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.node.as_ref().map(|node| {
                (
                    NodeId {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    node,
                )
            })
        })
    }

    pub fn is_detached(&self, id: NodeId) -> bool {
        self.detached.contains(&id)
    }

    pub fn detached(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.detached.iter().copied()
    }

    fn alloc(&mut self, node: LocalNode) -> NodeId {
        self.live += 1;
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.node = Some(node);
                NodeId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                NodeId {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        }
    }

    /// Add `node` under `parent`. A child already holding the same local
    /// name is detached and returned.
    pub(crate) fn insert(&mut self, parent: NodeId, node: LocalNode) -> (NodeId, Option<NodeId>) {
        let id = self.alloc(node);
        let displaced = self.link(parent, id);
        (id, displaced)
    }

    /// Rename and/or re-parent `id`. Both children indexes of the old and
    /// new parent are updated. Returns a detached former occupant of the name.
    pub(crate) fn set_name_parent(
        &mut self,
        id: NodeId,
        parent: NodeId,
        local_name: String,
        name: String,
        alias: Option<String>,
    ) -> Option<NodeId> {
        self.unlink(id);
        let node = self.node_mut(id);
        node.local_name = local_name;
        node.name = name;
        node.alias = alias;
        self.link(parent, id)
    }

    /// Remove `id` from its parent's indexes and keep it as a detached node.
    pub(crate) fn detach(&mut self, id: NodeId) {
        if id == self.root {
            return;
        }
        self.unlink(id);
        self.detached.insert(id);
    }

    fn link(&mut self, parent: NodeId, id: NodeId) -> Option<NodeId> {
        self.detached.remove(&id);
        let (local_name, alias) = {
            let node = self.node(id);
            (node.local_name.clone(), node.alias.clone())
        };

        let displaced = self
            .node(parent)
            .children
            .get(&local_name)
            .copied()
            .filter(|occupant| *occupant != id);
        if let Some(occupant) = displaced {
            self.detach(occupant);
        }

        let parent_node = self.node_mut(parent);
        parent_node.children.insert(local_name, id);
        if let Some(alias) = alias {
            parent_node.alias_children.entry(alias).or_insert(id);
        }
        self.node_mut(id).parent = Some(parent);
        displaced
    }

    fn unlink(&mut self, id: NodeId) {
        let (parent, local_name, alias) = {
            let node = self.node(id);
            (node.parent, node.local_name.clone(), node.alias.clone())
        };
        self.detached.remove(&id);
        let Some(parent) = parent else {
            return;
        };
        let parent_node = self.node_mut(parent);
        if parent_node.children.get(&local_name) == Some(&id) {
            parent_node.children.remove(&local_name);
        }
        if let Some(alias) = alias {
            if parent_node.alias_children.get(&alias) == Some(&id) {
                parent_node.alias_children.remove(&alias);
            }
        }
        self.node_mut(id).parent = None;
    }

    /// Ids of `id` and everything below it, parents before children.
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(node) = self.get(next) {
                out.push(next);
                stack.extend(node.children.values().copied());
            }
        }
        out
    }

    /// Remove `id` and its subtree from the arena, returning the removed nodes.
    pub(crate) fn remove_subtree(&mut self, id: NodeId) -> Vec<(NodeId, LocalNode)> {
        if id == self.root || !self.contains(id) {
            return Vec::new();
        }
        self.unlink(id);
        let ids = self.subtree(id);
        let mut removed = Vec::with_capacity(ids.len());
        for node_id in ids {
            let slot = &mut self.slots[node_id.index as usize];
            if let Some(node) = slot.node.take() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(node_id.index);
                self.detached.remove(&node_id);
                self.live -= 1;
                removed.push((node_id, node));
            }
        }
        removed
    }

    /// Whether `ancestor` is `id` or lies on its parent chain.
    pub fn is_ancestor_or_self(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(next) = current {
            if next == ancestor {
                return true;
            }
            current = self.get(next).and_then(|n| n.parent);
        }
        false
    }

    /// Whether the parent chain of `id` reaches the root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut current = id;
        loop {
            match self.get(current).map(|n| n.parent) {
                Some(Some(parent)) => current = parent,
                Some(None) => return current == self.root,
                None => return false,
            }
        }
    }

    /// Full filesystem path of an attached node.
    pub fn path_of(&self, id: NodeId, sep: &str) -> Option<String> {
        let mut parts = Vec::new();
        let mut current = id;
        loop {
            let node = self.get(current)?;
            parts.push(node.local_name.as_str());
            match node.parent {
                Some(parent) => current = parent,
                None if current == self.root => break,
                None => return None,
            }
        }
        let mut path = String::new();
        for part in parts.into_iter().rev() {
            path = join_path(&path, sep, part);
        }
        Some(path)
    }

    /// Walk `path` down the tree.
    ///
    /// With an `origin`, `path` is relative to that node; otherwise it must
    /// begin with the root path. Each component is looked up in the primary
    /// children index first, then in the alias index.
    pub fn resolve(&self, origin: Option<NodeId>, path: &str, sep: &str) -> Resolution {
        let (mut current, mut remaining) = match origin {
            Some(id) if self.contains(id) => (id, path),
            Some(_) => return Resolution::NoMatch,
            None => {
                let root_path = self.root_path();
                if path == root_path {
                    return Resolution::Found {
                        node: self.root,
                        parent: None,
                    };
                }
                let rest = path.strip_prefix(root_path).and_then(|rest| {
                    if root_path.ends_with(sep) {
                        Some(rest)
                    } else {
                        rest.strip_prefix(sep)
                    }
                });
                match rest {
                    Some(rest) => (self.root, rest),
                    None => return Resolution::NoMatch,
                }
            }
        };

        if remaining.is_empty() {
            return Resolution::Found {
                node: current,
                parent: self.node(current).parent,
            };
        }

        loop {
            let (component, tail) = match remaining.find(sep) {
                Some(pos) => (&remaining[..pos], Some(&remaining[pos + sep.len()..])),
                None => (remaining, None),
            };
            // Doubled or trailing separators name nothing
            if component.is_empty() {
                return Resolution::NoMatch;
            }

            let Some(child) = self.node(current).child(component) else {
                return Resolution::Partial {
                    parent: current,
                    residual: remaining.to_string(),
                };
            };

            match tail {
                None => {
                    return Resolution::Found {
                        node: child,
                        parent: Some(current),
                    };
                }
                Some(tail) => {
                    current = child;
                    remaining = tail;
                }
            }
        }
    }
}
