//! Instance addressing for rendered node occurrences.
//!
//! A node can be rendered at several positions at once when symlinks expose
//! its subtree elsewhere. Each occurrence is addressed by an instance key
//! built from the path of ids leading to it:
//!
//! ```text
//! <root>@root
//! <child>@<root>@root
//! <grandchild>@<child>@<root>@root
//! ```
//!
//! # Invariants
//! - Keys are derived, never stored in the node store.
//! - Every segment of a valid key is a node id; the last one is `root`.
//! - Expansion, focus and active state are keyed by instance key only.

use crate::model::node::NodeId;
use crate::store::NodeStore;
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Marker terminating every instance key.
pub const ROOT_MARKER: &str = "root";
const SEPARATOR: char = '@';

/// Errors from parsing instance key strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceKeyError {
    Empty,
    InvalidSegment(String),
    MissingRootMarker(String),
}

impl Display for InstanceKeyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "instance key is empty"),
            Self::InvalidSegment(segment) => {
                write!(f, "instance key segment is not a node id: `{segment}`")
            }
            Self::MissingRootMarker(value) => {
                write!(f, "instance key does not end with `@{ROOT_MARKER}`: `{value}`")
            }
        }
    }
}

impl Error for InstanceKeyError {}

/// Path-derived identifier of one rendered occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceKey {
    raw: String,
    node_id: NodeId,
}

impl InstanceKey {
    /// Key of a top-level occurrence (a root, or the branch root).
    pub fn root(node_id: NodeId) -> Self {
        Self {
            raw: format!("{node_id}{SEPARATOR}{ROOT_MARKER}"),
            node_id,
        }
    }

    /// Key of `node_id` rendered under the occurrence `parent`.
    pub fn child(node_id: NodeId, parent: &InstanceKey) -> Self {
        Self {
            raw: format!("{node_id}{SEPARATOR}{}", parent.raw),
            node_id,
        }
    }

    /// Builds a key from a top-down path of ids. `None` for an empty path.
    pub fn from_path(path: &[NodeId]) -> Option<Self> {
        let (first, rest) = path.split_first()?;
        let mut key = Self::root(*first);
        for id in rest {
            key = Self::child(*id, &key);
        }
        Some(key)
    }

    /// Parses and validates a key string.
    pub fn parse(value: &str) -> Result<Self, InstanceKeyError> {
        if value.is_empty() {
            return Err(InstanceKeyError::Empty);
        }
        let mut segments = value.split(SEPARATOR).peekable();
        let mut first = None;
        let mut terminated = false;
        while let Some(segment) = segments.next() {
            if segment == ROOT_MARKER && segments.peek().is_none() {
                terminated = true;
                break;
            }
            let id = Uuid::parse_str(segment)
                .map_err(|_| InstanceKeyError::InvalidSegment(segment.to_string()))?;
            first.get_or_insert(id);
        }
        match (first, terminated) {
            (Some(node_id), true) => Ok(Self {
                raw: value.to_string(),
                node_id,
            }),
            _ => Err(InstanceKeyError::MissingRootMarker(value.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The node rendered at this occurrence.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Key of the enclosing occurrence, `None` at top level.
    pub fn parent(&self) -> Option<InstanceKey> {
        let (_, rest) = self.raw.split_once(SEPARATOR)?;
        if rest == ROOT_MARKER {
            return None;
        }
        Self::parse(rest).ok()
    }

    /// Ids from the top-level occurrence down to this one.
    pub fn path(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .raw
            .split(SEPARATOR)
            .filter(|segment| *segment != ROOT_MARKER)
            .filter_map(|segment| Uuid::parse_str(segment).ok())
            .collect();
        ids.reverse();
        ids
    }

    /// Nesting depth, zero at top level.
    pub fn depth(&self) -> usize {
        self.raw.matches(SEPARATOR).count().saturating_sub(1)
    }
}

impl Display for InstanceKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Reconstructs the canonical key of `target_id` from its structural parent
/// chain.
///
/// With `branch_root` set the chain must reach the branch root, which becomes
/// the top-level occurrence; otherwise `None` is returned. Without it the
/// chain must end at a root. Missing parents and loops yield `None`.
pub fn find_instance_key_for_node(
    store: &NodeStore,
    target_id: NodeId,
    branch_root: Option<NodeId>,
) -> Option<InstanceKey> {
    let mut path = vec![target_id];
    let mut visited = HashSet::from([target_id]);
    let mut cursor = target_id;
    loop {
        let node = store.get(cursor)?;
        if branch_root == Some(cursor) {
            break;
        }
        match node.parent {
            Some(parent_id) => {
                if !visited.insert(parent_id) {
                    return None;
                }
                path.push(parent_id);
                cursor = parent_id;
            }
            None if branch_root.is_some() => return None,
            None => break,
        }
    }
    path.reverse();
    InstanceKey::from_path(&path)
}

/// Ephemeral per-occurrence UI state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeUiState {
    expanded: HashSet<InstanceKey>,
    focused: Option<InstanceKey>,
    active: Option<InstanceKey>,
}

impl TreeUiState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_expanded(&self, key: &InstanceKey) -> bool {
        self.expanded.contains(key)
    }

    pub fn expand(&mut self, key: InstanceKey) {
        self.expanded.insert(key);
    }

    pub fn collapse(&mut self, key: &InstanceKey) {
        self.expanded.remove(key);
    }

    /// Flips the expansion of one occurrence and returns the new state.
    pub fn toggle(&mut self, key: &InstanceKey) -> bool {
        if self.expanded.remove(key) {
            return false;
        }
        self.expanded.insert(key.clone());
        true
    }

    pub fn expanded_count(&self) -> usize {
        self.expanded.len()
    }

    /// Expands every enclosing occurrence so `key` becomes visible.
    pub fn reveal(&mut self, key: &InstanceKey) {
        let mut cursor = key.parent();
        while let Some(parent) = cursor {
            cursor = parent.parent();
            self.expanded.insert(parent);
        }
    }

    pub fn focused(&self) -> Option<&InstanceKey> {
        self.focused.as_ref()
    }

    pub fn set_focused(&mut self, key: Option<InstanceKey>) {
        self.focused = key;
    }

    pub fn active(&self) -> Option<&InstanceKey> {
        self.active.as_ref()
    }

    pub fn set_active(&mut self, key: Option<InstanceKey>) {
        self.active = key;
    }

    /// Makes the canonical occurrence of `node_id` active and focused,
    /// revealing it. Used for breadcrumbs and re-selection after mutations.
    pub fn select_node(
        &mut self,
        store: &NodeStore,
        node_id: NodeId,
        branch_root: Option<NodeId>,
    ) -> Option<InstanceKey> {
        let key = find_instance_key_for_node(store, node_id, branch_root)?;
        self.reveal(&key);
        self.active = Some(key.clone());
        self.focused = Some(key.clone());
        Some(key)
    }

    /// Drops state for occurrences whose path references a missing node.
    pub fn prune(&mut self, store: &NodeStore) {
        let alive = |key: &InstanceKey| key.path().iter().all(|id| store.contains(*id));
        self.expanded.retain(|key| alive(key));
        if self.focused.as_ref().is_some_and(|key| !alive(key)) {
            self.focused = None;
        }
        if self.active.as_ref().is_some_and(|key| !alive(key)) {
            self.active = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{find_instance_key_for_node, InstanceKey, InstanceKeyError, TreeUiState};
    use crate::model::node::Node;
    use crate::store::NodeStore;
    use uuid::Uuid;

    fn add(store: &mut NodeStore, node: Node) -> Uuid {
        let id = node.id;
        let parent = node.parent;
        store.insert(node);
        store.attach(id, parent, None);
        id
    }

    #[test]
    fn key_format_and_navigation() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let key = InstanceKey::from_path(&[a, b, c]).unwrap();
        assert_eq!(key.as_str(), format!("{c}@{b}@{a}@root"));
        assert_eq!(key.node_id(), c);
        assert_eq!(key.depth(), 2);
        assert_eq!(key.path(), vec![a, b, c]);
        assert_eq!(key.parent(), InstanceKey::from_path(&[a, b]));
        assert_eq!(InstanceKey::root(a).parent(), None);

        let parsed = InstanceKey::parse(key.as_str()).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn parse_rejects_malformed_keys() {
        let a = Uuid::new_v4();
        assert_eq!(InstanceKey::parse(""), Err(InstanceKeyError::Empty));
        assert!(matches!(
            InstanceKey::parse(&a.to_string()),
            Err(InstanceKeyError::MissingRootMarker(_))
        ));
        assert!(matches!(
            InstanceKey::parse("nope@root"),
            Err(InstanceKeyError::InvalidSegment(_))
        ));
        assert!(matches!(
            InstanceKey::parse(&format!("root@{a}@root")),
            Err(InstanceKeyError::InvalidSegment(_))
        ));
    }

    #[test]
    fn same_node_has_distinct_keys_per_occurrence() {
        let node = Uuid::new_v4();
        let via_first = InstanceKey::child(node, &InstanceKey::root(Uuid::new_v4()));
        let via_second = InstanceKey::child(node, &InstanceKey::root(Uuid::new_v4()));
        assert_ne!(via_first, via_second);
        assert_eq!(via_first.node_id(), via_second.node_id());

        let mut ui = TreeUiState::new();
        ui.expand(via_first.clone());
        assert!(ui.is_expanded(&via_first));
        assert!(!ui.is_expanded(&via_second));
    }

    #[test]
    fn canonical_key_walks_structural_chain_and_respects_branch() {
        let mut store = NodeStore::new();
        let a = add(&mut store, Node::new_content("A", "", None));
        let b = add(&mut store, Node::new_content("B", "", Some(a)));
        let c = add(&mut store, Node::new_content("C", "", Some(b)));
        let other = add(&mut store, Node::new_content("Other", "", None));

        let key = find_instance_key_for_node(&store, c, None).unwrap();
        assert_eq!(key.path(), vec![a, b, c]);

        let branch_key = find_instance_key_for_node(&store, c, Some(b)).unwrap();
        assert_eq!(branch_key.path(), vec![b, c]);
        assert_eq!(branch_key.as_str(), format!("{c}@{b}@root"));

        assert!(find_instance_key_for_node(&store, other, Some(b)).is_none());
        assert!(find_instance_key_for_node(&store, Uuid::new_v4(), None).is_none());
    }

    #[test]
    fn select_reveals_ancestors_and_prune_drops_stale_keys() {
        let mut store = NodeStore::new();
        let a = add(&mut store, Node::new_content("A", "", None));
        let b = add(&mut store, Node::new_content("B", "", Some(a)));
        let c = add(&mut store, Node::new_content("C", "", Some(b)));

        let mut ui = TreeUiState::new();
        let key = ui.select_node(&store, c, None).unwrap();
        assert_eq!(ui.active(), Some(&key));
        assert!(ui.is_expanded(&InstanceKey::from_path(&[a]).unwrap()));
        assert!(ui.is_expanded(&InstanceKey::from_path(&[a, b]).unwrap()));
        assert_eq!(ui.expanded_count(), 2);

        store.detach(b);
        store.remove(c);
        store.remove(b);
        ui.prune(&store);
        assert_eq!(ui.expanded_count(), 1);
        assert!(ui.active().is_none());
        assert!(ui.focused().is_none());
    }
}
