//! In-memory node store.
//!
//! # Responsibility
//! - Hold the node map and the ordered root list for the whole tree.
//! - Answer synchronous reads, including symlink resolution for display.
//! - Provide crate-internal structural primitives used by mutation paths.
//!
//! # Invariants
//! - `root_nodes` holds only ids of nodes with `parent == None`, no duplicates.
//! - Only the mutation service edits structure; UI code reads through
//!   `get`/`resolve`.
//! - Traversals are iterative and bounded by the node count.

use crate::model::node::{Node, NodeBody, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Node map keyed by id. Ordered for deterministic persistence and export.
pub type NodeMap = BTreeMap<NodeId, Node>;

/// How a node resolves for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Ordinary content node.
    Plain,
    /// Symlink whose target exists.
    Symlink,
    /// Symlink whose target is missing.
    Broken,
}

/// Display resolution of one node occurrence.
#[derive(Debug, Clone, Copy)]
pub struct Resolved<'a> {
    /// The record at this tree position.
    pub node: &'a Node,
    /// The record providing content and children. `None` when broken.
    pub source: Option<&'a Node>,
    pub state: LinkState,
}

impl<'a> Resolved<'a> {
    /// Content shown for this occurrence. Broken symlinks show nothing.
    pub fn content(&self) -> &'a str {
        self.source
            .and_then(|source| source.own_content())
            .unwrap_or("")
    }

    /// Children shown under this occurrence.
    pub fn children(&self) -> &'a [NodeId] {
        self.source
            .map(|source| source.children.as_slice())
            .unwrap_or(&[])
    }
}

/// Single source of truth for the tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStore {
    nodes: NodeMap,
    root_nodes: Vec<NodeId>,
}

impl NodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from persisted parts without repairing them.
    pub fn from_parts(nodes: NodeMap, root_nodes: Vec<NodeId>) -> Self {
        Self { nodes, root_nodes }
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_map(&self) -> &NodeMap {
        &self.nodes
    }

    pub fn root_nodes(&self) -> &[NodeId] {
        &self.root_nodes
    }

    pub fn first_root(&self) -> Option<NodeId> {
        self.root_nodes.first().copied()
    }

    /// Returns the sibling list a node with `parent` lives in.
    pub fn siblings(&self, parent: Option<NodeId>) -> &[NodeId] {
        match parent {
            Some(parent_id) => self
                .nodes
                .get(&parent_id)
                .map(|node| node.children.as_slice())
                .unwrap_or(&[]),
            None => &self.root_nodes,
        }
    }

    /// Resolves a node for display, following one symlink hop.
    pub fn resolve(&self, id: NodeId) -> Option<Resolved<'_>> {
        let node = self.nodes.get(&id)?;
        let resolved = match node.body {
            NodeBody::Content { .. } => Resolved {
                node,
                source: Some(node),
                state: LinkState::Plain,
            },
            NodeBody::Symlink { target_id } => match self.nodes.get(&target_id) {
                Some(target) => Resolved {
                    node,
                    source: Some(target),
                    state: LinkState::Symlink,
                },
                None => Resolved {
                    node,
                    source: None,
                    state: LinkState::Broken,
                },
            },
        };
        Some(resolved)
    }

    /// Children shown under `id`; a symlink shows its target's children.
    pub fn display_children(&self, id: NodeId) -> &[NodeId] {
        self.resolve(id)
            .map(|resolved| resolved.children())
            .unwrap_or(&[])
    }

    /// Returns `id` and all existing structural descendants in pre-order.
    ///
    /// Missing child ids are skipped. Returns an empty list when `id` is
    /// missing.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut visited = HashSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.get(&current) else {
                continue;
            };
            if !visited.insert(current) {
                continue;
            }
            result.push(current);
            for child in node.children.iter().rev() {
                stack.push(*child);
            }
        }
        result
    }

    /// Returns the structural parent chain of `id`, nearest first.
    ///
    /// Stops at a root, at a missing parent, or when a loop is detected.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut visited = HashSet::from([id]);
        let mut cursor = self.nodes.get(&id).and_then(|node| node.parent);
        while let Some(current) = cursor {
            if !visited.insert(current) {
                break;
            }
            result.push(current);
            cursor = self.nodes.get(&current).and_then(|node| node.parent);
        }
        result
    }

    /// Normalizes `root_nodes` after loading persisted data.
    ///
    /// Drops duplicates, unknown ids and ids that have a parent, then appends
    /// parentless nodes that were missing from the list. Returns the number of
    /// changes.
    pub fn repair_roots(&mut self) -> usize {
        let mut changes = 0;
        let mut seen = HashSet::new();
        let nodes = &self.nodes;
        self.root_nodes.retain(|id| {
            let keep = nodes.get(id).is_some_and(|node| node.parent.is_none()) && seen.insert(*id);
            if !keep {
                changes += 1;
            }
            keep
        });

        let missing: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|node| node.parent.is_none() && !seen.contains(&node.id))
            .map(|node| node.id)
            .collect();
        changes += missing.len();
        self.root_nodes.extend(missing);
        changes
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    pub(crate) fn nodes_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.values_mut()
    }

    /// Inserts a record without attaching it anywhere.
    pub(crate) fn insert(&mut self, node: Node) {
        self.nodes.insert(node.id, node);
    }

    /// Removes a record without touching other records.
    pub(crate) fn remove(&mut self, id: NodeId) -> Option<Node> {
        self.root_nodes.retain(|root| *root != id);
        self.nodes.remove(&id)
    }

    /// Removes `id` from its parent's children (or the root list) and clears
    /// its parent pointer.
    pub(crate) fn detach(&mut self, id: NodeId) {
        let parent = self.nodes.get(&id).and_then(|node| node.parent);
        if let Some(parent_id) = parent {
            if let Some(parent_node) = self.nodes.get_mut(&parent_id) {
                parent_node.children.retain(|child| *child != id);
            }
        }
        self.root_nodes.retain(|root| *root != id);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.parent = None;
        }
    }

    /// Attaches a detached node under `parent` (or as a root) at `index`,
    /// appending when `index` is `None` or out of range.
    ///
    /// Returns `false` when the node or parent is missing.
    pub(crate) fn attach(
        &mut self,
        id: NodeId,
        parent: Option<NodeId>,
        index: Option<usize>,
    ) -> bool {
        if !self.nodes.contains_key(&id) {
            return false;
        }
        let siblings = match parent {
            Some(parent_id) => match self.nodes.get_mut(&parent_id) {
                Some(parent_node) => &mut parent_node.children,
                None => return false,
            },
            None => &mut self.root_nodes,
        };
        let position = index.unwrap_or(siblings.len()).min(siblings.len());
        siblings.insert(position, id);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.parent = parent;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::{LinkState, NodeStore};
    use crate::model::node::Node;
    use uuid::Uuid;

    fn store_with_chain() -> (NodeStore, Uuid, Uuid, Uuid) {
        let mut store = NodeStore::new();
        let a = Node::new_content("A", "", None);
        let b = Node::new_content("B", "", None);
        let c = Node::new_content("C", "", None);
        let (a_id, b_id, c_id) = (a.id, b.id, c.id);
        store.insert(a);
        store.insert(b);
        store.insert(c);
        assert!(store.attach(a_id, None, None));
        assert!(store.attach(b_id, Some(a_id), None));
        assert!(store.attach(c_id, Some(b_id), None));
        (store, a_id, b_id, c_id)
    }

    #[test]
    fn descendants_are_preorder_and_ancestors_nearest_first() {
        let (store, a, b, c) = store_with_chain();
        assert_eq!(store.descendants(a), vec![a, b, c]);
        assert_eq!(store.ancestors(c), vec![b, a]);
        assert!(store.ancestors(a).is_empty());
    }

    #[test]
    fn detach_and_attach_keep_root_list_consistent() {
        let (mut store, a, b, _) = store_with_chain();
        store.detach(b);
        assert!(store.get(a).unwrap().children.is_empty());
        assert!(store.attach(b, None, Some(0)));
        assert_eq!(store.root_nodes(), &[b, a]);
        assert_eq!(store.get(b).unwrap().parent, None);
    }

    #[test]
    fn resolve_reports_broken_symlink() {
        let (mut store, a, _, _) = store_with_chain();
        let link = Node::new_symlink("gone", Uuid::new_v4(), Some(a));
        let link_id = link.id;
        store.insert(link);
        store.attach(link_id, Some(a), None);

        let resolved = store.resolve(link_id).unwrap();
        assert_eq!(resolved.state, LinkState::Broken);
        assert_eq!(resolved.content(), "");
        assert!(resolved.children().is_empty());
    }

    #[test]
    fn repair_roots_removes_duplicates_and_adds_missing() {
        let (store, a, b, _) = store_with_chain();
        let mut nodes = store.node_map().clone();
        let orphan_root = Node::new_content("Loose", "", None);
        let orphan_id = orphan_root.id;
        nodes.insert(orphan_id, orphan_root);

        let mut repaired = NodeStore::from_parts(nodes, vec![a, a, b]);
        let changes = repaired.repair_roots();
        assert_eq!(changes, 3);
        assert_eq!(repaired.root_nodes(), &[a, orphan_id]);
    }
}
