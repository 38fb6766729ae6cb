//! Branch isolation filter.
//!
//! # Invariants
//! - A node is in branch iff its structural parent chain (itself included)
//!   reaches the branch root.
//! - Symlinks are classified by their target: missing target is `Broken`,
//!   out-of-branch target is `External`. The two states are distinct.

use crate::model::node::NodeId;
use crate::store::NodeStore;
use std::collections::HashSet;

/// Classification of a symlink relative to the active view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    /// Target exists inside the visible tree.
    Internal,
    /// Target exists but lies outside the branch. Rendered inert.
    External,
    /// Target does not exist. Navigable so it can be deleted.
    Broken,
}

/// Branch-scoped read view over a store.
#[derive(Debug, Clone, Copy)]
pub struct BranchView<'a> {
    store: &'a NodeStore,
    root_id: NodeId,
}

impl<'a> BranchView<'a> {
    pub fn new(store: &'a NodeStore, root_id: NodeId) -> Self {
        Self { store, root_id }
    }

    pub fn root_id(&self) -> NodeId {
        self.root_id
    }

    /// Returns whether `id` is the branch root or structurally below it.
    ///
    /// Missing nodes and chains ending at another root return `false`.
    pub fn is_node_in_branch(&self, id: NodeId) -> bool {
        let mut visited = HashSet::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if current == self.root_id {
                return self.store.contains(current);
            }
            if !visited.insert(current) {
                return false;
            }
            cursor = match self.store.get(current) {
                Some(node) => node.parent,
                None => return false,
            };
        }
        false
    }

    /// Classifies a symlink. `None` when `id` is missing or not a symlink.
    pub fn link_status(&self, id: NodeId) -> Option<LinkStatus> {
        let target_id = self.store.get(id)?.target_id()?;
        Some(if !self.store.contains(target_id) {
            LinkStatus::Broken
        } else if self.is_node_in_branch(target_id) {
            LinkStatus::Internal
        } else {
            LinkStatus::External
        })
    }
}
