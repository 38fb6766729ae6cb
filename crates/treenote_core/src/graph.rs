//! Graph invariant checks over the node store.
//!
//! # Responsibility
//! - Answer ancestry and cycle questions before any structural mutation.
//! - Report (never repair) referential problems in a loaded store.
//!
//! # Invariants
//! - All functions are pure reads over `NodeStore`.
//! - Parent-chain walks are bounded, so corrupted input cannot loop forever.
//! - Self-targeting (`node == parent`) is the caller's precondition; it is
//!   not folded into these checks.

use crate::model::node::NodeId;
use crate::store::NodeStore;
use std::collections::HashSet;

/// Returns whether `candidate_ancestor_id` appears on the parent chain of
/// `node_id` (the node itself excluded).
pub fn is_ancestor(store: &NodeStore, node_id: NodeId, candidate_ancestor_id: NodeId) -> bool {
    let mut visited = HashSet::new();
    let mut cursor = store.get(node_id).and_then(|node| node.parent);
    while let Some(current) = cursor {
        if current == candidate_ancestor_id {
            return true;
        }
        if !visited.insert(current) {
            return false;
        }
        cursor = store.get(current).and_then(|node| node.parent);
    }
    false
}

/// Returns whether placing a symlink to `target_id` under
/// `proposed_parent_id` would put the target on the symlink's own parent
/// chain.
///
/// True iff the parent equals the target or is a structural descendant of
/// it. A root placement never cycles.
pub fn would_symlink_cycle(
    store: &NodeStore,
    target_id: NodeId,
    proposed_parent_id: Option<NodeId>,
) -> bool {
    let Some(parent_id) = proposed_parent_id else {
        return false;
    };
    if parent_id == target_id {
        return true;
    }
    is_ancestor(store, parent_id, target_id)
}

/// Returns whether moving `moving_node_id` under `new_parent_id` would leave
/// a symlink inside the moved subtree pointing at one of its new ancestors.
///
/// The moving node itself is scanned too, so moving a symlink under a
/// descendant of its own target is rejected.
pub fn would_move_cycle(
    store: &NodeStore,
    moving_node_id: NodeId,
    new_parent_id: Option<NodeId>,
) -> bool {
    let Some(parent_id) = new_parent_id else {
        return false;
    };
    let ancestors = ancestor_set(store, parent_id);
    store
        .descendants(moving_node_id)
        .into_iter()
        .filter_map(|id| store.get(id).and_then(|node| node.target_id()))
        .any(|target_id| ancestors.contains(&target_id))
}

/// Returns `id` plus every node on its parent chain.
pub fn ancestor_set(store: &NodeStore, id: NodeId) -> HashSet<NodeId> {
    let mut set: HashSet<NodeId> = store.ancestors(id).into_iter().collect();
    set.insert(id);
    set
}

/// Referential problems found in a store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    /// Symlinks whose target does not exist.
    pub broken_symlinks: Vec<NodeId>,
    /// `(parent, child)` pairs where the child id does not exist.
    pub missing_children: Vec<(NodeId, NodeId)>,
    /// Nodes whose parent id does not exist.
    pub dangling_parents: Vec<NodeId>,
    /// Nodes not listed in their parent's children.
    pub unlisted_children: Vec<NodeId>,
    /// Symlinks that own children.
    pub symlinks_with_children: Vec<NodeId>,
    /// Nodes whose parent chain loops instead of reaching a root.
    pub structural_cycles: Vec<NodeId>,
    /// Root list entries that are unknown or have a parent.
    pub invalid_roots: Vec<NodeId>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.broken_symlinks.is_empty()
            && self.missing_children.is_empty()
            && self.dangling_parents.is_empty()
            && self.unlisted_children.is_empty()
            && self.symlinks_with_children.is_empty()
            && self.structural_cycles.is_empty()
            && self.invalid_roots.is_empty()
    }

    /// Total number of findings.
    pub fn issue_count(&self) -> usize {
        self.broken_symlinks.len()
            + self.missing_children.len()
            + self.dangling_parents.len()
            + self.unlisted_children.len()
            + self.symlinks_with_children.len()
            + self.structural_cycles.len()
            + self.invalid_roots.len()
    }
}

/// Scans the whole store for referential problems.
pub fn check_integrity(store: &NodeStore) -> IntegrityReport {
    let mut report = IntegrityReport::default();

    for node in store.nodes() {
        if let Some(target_id) = node.target_id() {
            if !store.contains(target_id) {
                report.broken_symlinks.push(node.id);
            }
            if !node.children.is_empty() {
                report.symlinks_with_children.push(node.id);
            }
        }

        for child in &node.children {
            if !store.contains(*child) {
                report.missing_children.push((node.id, *child));
            }
        }

        if let Some(parent_id) = node.parent {
            match store.get(parent_id) {
                None => report.dangling_parents.push(node.id),
                Some(parent) if !parent.children.contains(&node.id) => {
                    report.unlisted_children.push(node.id)
                }
                Some(_) => {}
            }
        }

        if chain_loops(store, node.id) {
            report.structural_cycles.push(node.id);
        }
    }

    let mut seen = HashSet::new();
    for root in store.root_nodes() {
        let valid = store.get(*root).is_some_and(|node| node.parent.is_none());
        if !valid || !seen.insert(*root) {
            report.invalid_roots.push(*root);
        }
    }

    report
}

fn chain_loops(store: &NodeStore, id: NodeId) -> bool {
    let limit = store.len();
    let mut steps = 0;
    let mut cursor = store.get(id).and_then(|node| node.parent);
    while let Some(current) = cursor {
        if current == id || steps > limit {
            return true;
        }
        steps += 1;
        cursor = store.get(current).and_then(|node| node.parent);
    }
    false
}
