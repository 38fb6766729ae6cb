//! Flattened projection of the visible tree.
//!
//! # Responsibility
//! - Turn the node store plus per-occurrence expansion state into the ordered
//!   list of rows a tree widget renders.
//!
//! # Invariants
//! - Rows are emitted depth-first in display order.
//! - External, broken and recursive rows never expand.
//! - Traversal is iterative; recursion through symlinks is cut at the first
//!   repeated source on the display path.

use super::branch::{BranchView, LinkStatus};
use super::instance::{InstanceKey, TreeUiState};
use crate::model::node::{NodeBody, NodeId};
use crate::store::NodeStore;

/// Render state of one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowState {
    Normal,
    /// Symlink showing its target's subtree.
    Symlink,
    /// Symlink leaving the active branch. Inert leaf.
    External,
    /// Symlink with a missing target, or a missing child id.
    Broken,
    /// Symlink whose target is already open above it on this path.
    Recursive,
}

/// One rendered occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibleRow {
    pub key: InstanceKey,
    pub node_id: NodeId,
    /// Node providing content and children. `None` for broken rows.
    pub source_id: Option<NodeId>,
    pub depth: usize,
    pub state: RowState,
    pub has_children: bool,
    pub expanded: bool,
}

struct Frame {
    id: NodeId,
    parent_key: Option<InstanceKey>,
    depth: usize,
    /// Source ids of the enclosing rows.
    path: Vec<NodeId>,
}

/// Flattens the visible tree.
///
/// With `branch_root` set only that node's occurrence is a top-level row and
/// symlinks leaving the branch render as `External`.
pub fn visible_rows(
    store: &NodeStore,
    ui: &TreeUiState,
    branch_root: Option<NodeId>,
) -> Vec<VisibleRow> {
    let branch = branch_root.map(|root_id| BranchView::new(store, root_id));
    let tops: Vec<NodeId> = match branch_root {
        Some(root_id) if store.contains(root_id) => vec![root_id],
        Some(_) => Vec::new(),
        None => store.root_nodes().to_vec(),
    };

    let mut rows = Vec::new();
    let mut stack: Vec<Frame> = tops
        .into_iter()
        .rev()
        .map(|id| Frame {
            id,
            parent_key: None,
            depth: 0,
            path: Vec::new(),
        })
        .collect();

    while let Some(frame) = stack.pop() {
        let key = match &frame.parent_key {
            Some(parent) => InstanceKey::child(frame.id, parent),
            None => InstanceKey::root(frame.id),
        };

        let (state, source_id) = match store.get(frame.id).map(|node| &node.body) {
            None => (RowState::Broken, None),
            Some(NodeBody::Content { .. }) => (RowState::Normal, Some(frame.id)),
            Some(NodeBody::Symlink { target_id }) => {
                let target_id = *target_id;
                let link = match &branch {
                    Some(view) => view.link_status(frame.id),
                    None if store.contains(target_id) => Some(LinkStatus::Internal),
                    None => Some(LinkStatus::Broken),
                };
                let state = match link {
                    Some(LinkStatus::Broken) | None => RowState::Broken,
                    Some(LinkStatus::External) => RowState::External,
                    Some(LinkStatus::Internal) if frame.path.contains(&target_id) => {
                        RowState::Recursive
                    }
                    Some(LinkStatus::Internal) => RowState::Symlink,
                };
                let source = (state != RowState::Broken).then_some(target_id);
                (state, source)
            }
        };

        let children: &[NodeId] = match (state, source_id) {
            (RowState::Normal | RowState::Symlink, Some(source)) => store
                .get(source)
                .map(|node| node.children.as_slice())
                .unwrap_or(&[]),
            _ => &[],
        };
        let has_children = !children.is_empty();
        let expanded = has_children && ui.is_expanded(&key);

        if expanded {
            let mut path = frame.path.clone();
            if let Some(source) = source_id {
                path.push(source);
            }
            for child in children.iter().rev() {
                stack.push(Frame {
                    id: *child,
                    parent_key: Some(key.clone()),
                    depth: frame.depth + 1,
                    path: path.clone(),
                });
            }
        }

        rows.push(VisibleRow {
            key,
            node_id: frame.id,
            source_id,
            depth: frame.depth,
            state,
            has_children,
            expanded,
        });
    }

    rows
}

#[cfg(test)]
mod tests {
    use super::{visible_rows, RowState};
    use crate::model::node::Node;
    use crate::store::NodeStore;
    use crate::view::instance::{InstanceKey, TreeUiState};
    use uuid::Uuid;

    fn add(store: &mut NodeStore, node: Node) -> Uuid {
        let id = node.id;
        let parent = node.parent;
        store.insert(node);
        store.attach(id, parent, None);
        id
    }

    #[test]
    fn collapsed_tree_shows_roots_only() {
        let mut store = NodeStore::new();
        let a = add(&mut store, Node::new_content("A", "", None));
        add(&mut store, Node::new_content("B", "", Some(a)));
        let c = add(&mut store, Node::new_content("C", "", None));

        let rows = visible_rows(&store, &TreeUiState::new(), None);
        let ids: Vec<_> = rows.iter().map(|row| row.node_id).collect();
        assert_eq!(ids, vec![a, c]);
        assert!(rows[0].has_children);
        assert!(!rows[0].expanded);
        assert!(!rows[1].has_children);
    }

    #[test]
    fn symlinked_subtree_renders_twice_with_independent_expansion() {
        let mut store = NodeStore::new();
        let a = add(&mut store, Node::new_content("A", "", None));
        let b = add(&mut store, Node::new_content("B", "", Some(a)));
        let leaf = add(&mut store, Node::new_content("Leaf", "", Some(b)));
        let home = add(&mut store, Node::new_content("Home", "", None));
        let link = add(&mut store, Node::new_symlink("B alias", b, Some(home)));

        let mut ui = TreeUiState::new();
        ui.expand(InstanceKey::root(a));
        ui.expand(InstanceKey::root(home));
        let link_key = InstanceKey::child(link, &InstanceKey::root(home));
        ui.expand(link_key.clone());

        let rows = visible_rows(&store, &ui, None);
        let ids: Vec<_> = rows.iter().map(|row| row.node_id).collect();
        assert_eq!(ids, vec![a, b, home, link, leaf]);

        let link_row = &rows[3];
        assert_eq!(link_row.state, RowState::Symlink);
        assert_eq!(link_row.source_id, Some(b));
        assert!(link_row.expanded);
        assert_eq!(rows[4].key, InstanceKey::child(leaf, &link_key));
        assert_eq!(rows[4].depth, 2);

        // The structural occurrence of B stays collapsed.
        assert!(rows[1].has_children);
        assert!(!rows[1].expanded);
    }

    #[test]
    fn recursive_broken_and_external_links_do_not_expand() {
        let mut store = NodeStore::new();
        let work = add(&mut store, Node::new_content("Work", "", None));
        let project = add(&mut store, Node::new_content("Project", "", Some(work)));
        let other = add(&mut store, Node::new_content("Other", "", None));
        add(&mut store, Node::new_content("Other child", "", Some(other)));
        let back = add(&mut store, Node::new_symlink("up", work, Some(project)));
        let broken = add(&mut store, Node::new_symlink("gone", Uuid::new_v4(), Some(work)));
        let outside = add(&mut store, Node::new_symlink("out", other, Some(work)));

        let mut ui = TreeUiState::new();
        let work_key = InstanceKey::root(work);
        let project_key = InstanceKey::child(project, &work_key);
        ui.expand(work_key.clone());
        ui.expand(project_key.clone());
        ui.expand(InstanceKey::child(back, &project_key));
        ui.expand(InstanceKey::child(outside, &work_key));

        let rows = visible_rows(&store, &ui, Some(work));
        let state_of = |id| rows.iter().find(|row| row.node_id == id).unwrap().state;
        assert_eq!(rows.len(), 5);
        assert_eq!(state_of(back), RowState::Recursive);
        assert_eq!(state_of(broken), RowState::Broken);
        assert_eq!(state_of(outside), RowState::External);
        assert!(rows.iter().all(|row| row.node_id != other));
        assert!(rows
            .iter()
            .filter(|row| row.state != RowState::Normal)
            .all(|row| !row.expanded && !row.has_children));
    }

    #[test]
    fn missing_child_id_is_a_broken_row() {
        let mut store = NodeStore::new();
        let a = add(&mut store, Node::new_content("A", "", None));
        let ghost = Uuid::new_v4();
        store.get_mut(a).unwrap().children.push(ghost);

        let mut ui = TreeUiState::new();
        ui.expand(InstanceKey::root(a));
        let rows = visible_rows(&store, &ui, None);
        assert_eq!(rows[1].node_id, ghost);
        assert_eq!(rows[1].state, RowState::Broken);
        assert_eq!(rows[1].source_id, None);
    }
}
