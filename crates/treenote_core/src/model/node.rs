//! Node domain model.
//!
//! # Responsibility
//! - Define the canonical record for content nodes and symlinks.
//! - Normalize user-provided titles and tags.
//!
//! # Invariants
//! - `id` is stable and never reused for another node.
//! - A symlink never owns children; its `children` list stays empty.
//! - `type` is mandatory on deserialization.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Stable identifier for every node in the tree.
pub type NodeId = Uuid;

/// Identifier of an externally stored attachment blob.
pub type AttachmentId = Uuid;

/// Title used when a caller provides a blank one.
pub const UNTITLED: &str = "Untitled";

/// Lightweight node type discriminator, mirrors the serialized `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Node,
    Symlink,
}

impl NodeKind {
    /// Returns the serialized type name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Symlink => "symlink",
        }
    }

    /// Parses a serialized type name.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "node" => Some(Self::Node),
            "symlink" => Some(Self::Symlink),
            _ => None,
        }
    }
}

/// Type-specific part of a node record.
///
/// Serialized inline with the node as `"type": "node" | "symlink"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeBody {
    /// Ordinary node owning its markdown body.
    #[serde(rename = "node")]
    Content {
        #[serde(default)]
        content: String,
    },
    /// Reference node. Content reads and writes go to the target.
    Symlink {
        #[serde(rename = "targetId")]
        target_id: NodeId,
    },
}

/// Metadata of one attachment. The bytes live in the storage collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentMeta {
    pub id: AttachmentId,
    /// Original file name as provided by the user.
    pub name: String,
    pub mime_type: String,
    /// Blob size in bytes.
    pub size: u64,
}

/// Canonical node record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    #[serde(flatten)]
    pub body: NodeBody,
    /// Display title. For symlinks this is independent of the target title.
    pub title: String,
    /// Structural parent. `None` means the node is a root.
    #[serde(default)]
    pub parent: Option<NodeId>,
    /// Ordered structural children. Always empty for symlinks.
    #[serde(default)]
    pub children: Vec<NodeId>,
    /// Normalized (lowercase, trimmed) labels.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentMeta>,
    /// Epoch milliseconds.
    pub created: i64,
    /// Epoch milliseconds. Bumped on every edit of this record.
    pub modified: i64,
}

impl Node {
    /// Creates a content node with a generated id.
    pub fn new_content(
        title: impl Into<String>,
        content: impl Into<String>,
        parent: Option<NodeId>,
    ) -> Self {
        Self::with_body(
            Uuid::new_v4(),
            NodeBody::Content {
                content: content.into(),
            },
            title,
            parent,
        )
    }

    /// Creates a symlink node with a generated id.
    pub fn new_symlink(title: impl Into<String>, target_id: NodeId, parent: Option<NodeId>) -> Self {
        Self::with_body(
            Uuid::new_v4(),
            NodeBody::Symlink { target_id },
            title,
            parent,
        )
    }

    /// Creates a node with a caller-provided id.
    ///
    /// Used by import and duplication paths that allocate ids up front.
    pub fn with_body(
        id: NodeId,
        body: NodeBody,
        title: impl Into<String>,
        parent: Option<NodeId>,
    ) -> Self {
        let now = now_epoch_ms();
        Self {
            id,
            body,
            title: normalize_title(title.into()),
            parent,
            children: Vec::new(),
            tags: BTreeSet::new(),
            attachments: Vec::new(),
            created: now,
            modified: now,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self.body {
            NodeBody::Content { .. } => NodeKind::Node,
            NodeBody::Symlink { .. } => NodeKind::Symlink,
        }
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self.body, NodeBody::Symlink { .. })
    }

    /// Returns the symlink target, `None` for content nodes.
    pub fn target_id(&self) -> Option<NodeId> {
        match self.body {
            NodeBody::Symlink { target_id } => Some(target_id),
            NodeBody::Content { .. } => None,
        }
    }

    /// Returns the own body, `None` for symlinks.
    pub fn own_content(&self) -> Option<&str> {
        match &self.body {
            NodeBody::Content { content } => Some(content.as_str()),
            NodeBody::Symlink { .. } => None,
        }
    }

    /// Marks the record as modified now.
    pub fn touch(&mut self) {
        self.modified = now_epoch_ms();
    }
}

/// Current wall clock in epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

/// Trims a title and substitutes [`UNTITLED`] for blank input.
pub fn normalize_title(value: String) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return UNTITLED.to_string();
    }
    if trimmed.len() == value.len() {
        return value;
    }
    trimmed.to_string()
}

/// Normalizes one tag: trimmed, lowercase. Blank input yields `None`.
pub fn normalize_tag(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_lowercase())
}

/// Normalizes and deduplicates a tag list.
pub fn normalize_tags(values: &[String]) -> BTreeSet<String> {
    values
        .iter()
        .filter_map(|value| normalize_tag(value))
        .collect()
}
