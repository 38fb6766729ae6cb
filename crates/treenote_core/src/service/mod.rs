//! Use-case services over the node store.
//!
//! # Responsibility
//! - Own the in-memory store and the persistence collaborator together.
//! - Enforce structural invariants before any mutation is applied.
//!
//! # Invariants
//! - A rejected operation leaves the store byte-for-byte unchanged.
//! - Persist failures never roll back in-memory state.

use crate::model::node::{AttachmentId, NodeId};
use crate::storage::StorageError;
use crate::transcode::TranscodeError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod transfer;
pub mod tree_service;

pub use tree_service::{CleanupReport, DropPosition, TreeService};

/// Errors from tree service operations.
#[derive(Debug)]
pub enum TreeServiceError {
    NodeNotFound(NodeId),
    ParentNotFound(NodeId),
    /// Symlink target (or the target of a content edit) does not exist.
    TargetNotFound(NodeId),
    AttachmentNotFound {
        node_id: NodeId,
        attachment_id: AttachmentId,
    },
    /// Tag is blank after trimming.
    InvalidTag(String),
    /// Node would become its own parent.
    SelfReference(NodeId),
    /// Destination parent lies inside the moved subtree.
    DescendantTarget { node_id: NodeId, parent_id: NodeId },
    /// A symlink would end up pointing at one of its own ancestors.
    CycleDetected { node_id: NodeId, parent_id: NodeId },
    /// An equivalent symlink already exists under the same parent.
    DuplicateLink {
        target_id: NodeId,
        parent_id: Option<NodeId>,
        existing_id: NodeId,
    },
    /// Symlinks never own children.
    ParentIsSymlink(NodeId),
    /// The active branch root or one of its ancestors cannot be deleted.
    BranchRootProtected(NodeId),
    Transcode(TranscodeError),
    Storage(StorageError),
}

impl TreeServiceError {
    /// Stable code presented to the user for a rejected operation.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::NodeNotFound(_) | Self::ParentNotFound(_) | Self::TargetNotFound(_) => {
                "not-found"
            }
            Self::AttachmentNotFound { .. } => "attachment-not-found",
            Self::InvalidTag(_) => "invalid-tag",
            Self::SelfReference(_) => "self-reference",
            Self::DescendantTarget { .. } => "descendant-target",
            Self::CycleDetected { .. } => "cycle",
            Self::DuplicateLink { .. } => "duplicate-link",
            Self::ParentIsSymlink(_) => "parent-is-symlink",
            Self::BranchRootProtected(_) => "branch-root-protected",
            Self::Transcode(TranscodeError::WouldCycle { .. }) => "cycle",
            Self::Transcode(_) => "import-invalid",
            Self::Storage(_) => "storage",
        }
    }

    /// Whether this is a structural rejection (as opposed to a missing
    /// reference or an I/O failure).
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::SelfReference(_)
                | Self::DescendantTarget { .. }
                | Self::CycleDetected { .. }
                | Self::DuplicateLink { .. }
                | Self::ParentIsSymlink(_)
                | Self::BranchRootProtected(_)
        )
    }
}

impl Display for TreeServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NodeNotFound(id) => write!(f, "node not found: {id}"),
            Self::ParentNotFound(id) => write!(f, "parent not found: {id}"),
            Self::TargetNotFound(id) => write!(f, "target not found: {id}"),
            Self::AttachmentNotFound {
                node_id,
                attachment_id,
            } => write!(f, "attachment {attachment_id} not found on node {node_id}"),
            Self::InvalidTag(tag) => write!(f, "tag must not be blank: `{tag}`"),
            Self::SelfReference(id) => write!(f, "node {id} cannot be its own parent"),
            Self::DescendantTarget { node_id, parent_id } => write!(
                f,
                "cannot move node {node_id} under its own descendant {parent_id}"
            ),
            Self::CycleDetected { node_id, parent_id } => write!(
                f,
                "placing {node_id} under {parent_id} would make a symlink point at its own ancestor"
            ),
            Self::DuplicateLink {
                target_id,
                existing_id,
                ..
            } => write!(
                f,
                "symlink {existing_id} to {target_id} already exists under this parent"
            ),
            Self::ParentIsSymlink(id) => write!(f, "symlink {id} cannot have children"),
            Self::BranchRootProtected(id) => {
                write!(f, "node {id} protects the active branch and cannot be deleted")
            }
            Self::Transcode(err) => write!(f, "{err}"),
            Self::Storage(err) => write!(f, "{err}"),
        }
    }
}

impl Error for TreeServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Transcode(err) => Some(err),
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StorageError> for TreeServiceError {
    fn from(value: StorageError) -> Self {
        Self::Storage(value)
    }
}

impl From<TranscodeError> for TreeServiceError {
    fn from(value: TranscodeError) -> Self {
        match value {
            TranscodeError::NodeNotFound(id) => Self::NodeNotFound(id),
            other => Self::Transcode(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::TreeServiceError;
    use crate::transcode::TranscodeError;
    use uuid::Uuid;

    #[test]
    fn reason_codes_are_stable() {
        let id = Uuid::new_v4();
        let cases = [
            (TreeServiceError::SelfReference(id), "self-reference"),
            (
                TreeServiceError::DescendantTarget {
                    node_id: id,
                    parent_id: id,
                },
                "descendant-target",
            ),
            (
                TreeServiceError::CycleDetected {
                    node_id: id,
                    parent_id: id,
                },
                "cycle",
            ),
            (
                TreeServiceError::DuplicateLink {
                    target_id: id,
                    parent_id: None,
                    existing_id: id,
                },
                "duplicate-link",
            ),
            (TreeServiceError::BranchRootProtected(id), "branch-root-protected"),
            (TreeServiceError::ParentIsSymlink(id), "parent-is-symlink"),
        ];
        for (err, code) in cases {
            assert_eq!(err.reason_code(), code);
            assert!(err.is_structural());
        }
        assert!(!TreeServiceError::NodeNotFound(id).is_structural());
    }

    #[test]
    fn transcode_not_found_maps_to_node_not_found() {
        let id = Uuid::new_v4();
        let err: TreeServiceError = TranscodeError::NodeNotFound(id).into();
        assert!(matches!(err, TreeServiceError::NodeNotFound(found) if found == id));
        let err: TreeServiceError = TranscodeError::UnsupportedVersion(3).into();
        assert_eq!(err.reason_code(), "import-invalid");
    }
}
