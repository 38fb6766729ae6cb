//! Addressable view state.
//!
//! Encodes the branch root and the current node as a query string
//! (`branch=<id>&node=<id>`) so a view can be restored from an address.

use crate::model::node::NodeId;
use crate::store::NodeStore;
use crate::view::branch::BranchView;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const BRANCH_PARAM: &str = "branch";
const NODE_PARAM: &str = "node";

/// Errors from parsing an addressable view state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewStateError {
    InvalidId { param: String, value: String },
}

impl Display for ViewStateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidId { param, value } => {
                write!(f, "query parameter `{param}` is not a node id: `{value}`")
            }
        }
    }
}

impl Error for ViewStateError {}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewState {
    pub branch_root_id: Option<NodeId>,
    pub current_node_id: Option<NodeId>,
}

impl ViewState {
    /// Renders the state as a query string without the leading `?`.
    pub fn to_query(&self) -> String {
        let mut parts = Vec::new();
        if let Some(branch) = self.branch_root_id {
            parts.push(format!("{BRANCH_PARAM}={branch}"));
        }
        if let Some(node) = self.current_node_id {
            parts.push(format!("{NODE_PARAM}={node}"));
        }
        parts.join("&")
    }

    /// Parses a query string. A leading `?` and unknown parameters are
    /// ignored; empty values count as absent.
    pub fn from_query(query: &str) -> Result<Self, ViewStateError> {
        let mut state = Self::default();
        let query = query.strip_prefix('?').unwrap_or(query);
        for pair in query.split('&').filter(|pair| !pair.is_empty()) {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            let slot = match name {
                BRANCH_PARAM => &mut state.branch_root_id,
                NODE_PARAM => &mut state.current_node_id,
                _ => continue,
            };
            if value.is_empty() {
                *slot = None;
                continue;
            }
            let id = Uuid::parse_str(value).map_err(|_| ViewStateError::InvalidId {
                param: name.to_string(),
                value: value.to_string(),
            })?;
            *slot = Some(id);
        }
        Ok(state)
    }

    /// Node the view should show.
    ///
    /// Falls back to the branch root in branch mode and to the first root
    /// otherwise when the current node is absent, missing, or outside the
    /// branch. A missing branch root disables branch mode.
    pub fn resolve_current(&self, store: &NodeStore) -> Option<NodeId> {
        let branch_root = self.branch_root_id.filter(|id| store.contains(*id));
        let requested = self.current_node_id.filter(|id| store.contains(*id));
        match branch_root {
            Some(root_id) => {
                let view = BranchView::new(store, root_id);
                Some(
                    requested
                        .filter(|id| view.is_node_in_branch(*id))
                        .unwrap_or(root_id),
                )
            }
            None => requested.or_else(|| store.first_root()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ViewState, ViewStateError};
    use crate::model::node::Node;
    use crate::store::NodeStore;
    use uuid::Uuid;

    #[test]
    fn query_roundtrip_and_partial_states() {
        let branch = Uuid::new_v4();
        let node = Uuid::new_v4();
        let state = ViewState {
            branch_root_id: Some(branch),
            current_node_id: Some(node),
        };
        let query = state.to_query();
        assert_eq!(query, format!("branch={branch}&node={node}"));
        assert_eq!(ViewState::from_query(&format!("?{query}")).unwrap(), state);

        assert_eq!(ViewState::default().to_query(), "");
        let only_node = ViewState::from_query(&format!("node={node}&lang=en")).unwrap();
        assert_eq!(only_node.branch_root_id, None);
        assert_eq!(only_node.current_node_id, Some(node));
        assert_eq!(ViewState::from_query("branch=").unwrap(), ViewState::default());
    }

    #[test]
    fn invalid_ids_are_rejected() {
        let err = ViewState::from_query("node=abc").unwrap_err();
        assert_eq!(
            err,
            ViewStateError::InvalidId {
                param: "node".to_string(),
                value: "abc".to_string()
            }
        );
    }

    #[test]
    fn current_node_falls_back_to_branch_root_or_first_root() {
        let mut store = NodeStore::new();
        let a = Node::new_content("A", "", None);
        let b = Node::new_content("B", "", Some(a.id));
        let c = Node::new_content("C", "", None);
        let (a_id, b_id, c_id) = (a.id, b.id, c.id);
        for node in [a, b, c] {
            store.insert(node);
        }
        store.attach(a_id, None, None);
        store.attach(b_id, Some(a_id), None);
        store.attach(c_id, None, None);

        assert_eq!(ViewState::default().resolve_current(&store), Some(a_id));
        let direct = ViewState {
            branch_root_id: None,
            current_node_id: Some(c_id),
        };
        assert_eq!(direct.resolve_current(&store), Some(c_id));

        let outside_branch = ViewState {
            branch_root_id: Some(b_id),
            current_node_id: Some(c_id),
        };
        assert_eq!(outside_branch.resolve_current(&store), Some(b_id));

        let stale = ViewState {
            branch_root_id: Some(Uuid::new_v4()),
            current_node_id: Some(Uuid::new_v4()),
        };
        assert_eq!(stale.resolve_current(&store), Some(a_id));
    }
}
