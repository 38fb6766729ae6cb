//! Export document shape and validation.

use super::{TranscodeError, TranscodeResult};
use crate::model::node::{now_epoch_ms, AttachmentId, Node, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Value of the `format` marker.
pub const DOCUMENT_FORMAT: &str = "treenote-export";
/// Newest document version this build reads and the one it writes.
pub const DOCUMENT_VERSION: u32 = 1;

/// Portable document holding one exported closure.
///
/// Document roots always have `parent == null`; for a branch export the
/// branch root is detached from its live parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub format: String,
    pub version: u32,
    pub node_count: usize,
    /// Branch root for branch exports, `null` for whole-forest exports.
    pub root_or_branch_id: Option<NodeId>,
    /// Ordered top-level nodes of the document.
    pub root_ids: Vec<NodeId>,
    pub nodes: BTreeMap<NodeId, Node>,
    /// Attachments referenced by exported node metadata, sorted.
    #[serde(default)]
    pub attachment_ids: Vec<AttachmentId>,
    pub exported_at: i64,
}

impl ExportDocument {
    pub(crate) fn new(
        root_or_branch_id: Option<NodeId>,
        root_ids: Vec<NodeId>,
        nodes: BTreeMap<NodeId, Node>,
        attachment_ids: Vec<AttachmentId>,
    ) -> Self {
        Self {
            format: DOCUMENT_FORMAT.to_string(),
            version: DOCUMENT_VERSION,
            node_count: nodes.len(),
            root_or_branch_id,
            root_ids,
            nodes,
            attachment_ids,
            exported_at: now_epoch_ms(),
        }
    }

    /// Parses a document, checking the format marker and version before the
    /// node records.
    pub fn from_json(text: &str) -> TranscodeResult<Self> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let format = value
            .get("format")
            .and_then(|format| format.as_str())
            .unwrap_or_default();
        if format != DOCUMENT_FORMAT {
            return Err(TranscodeError::WrongDocumentType(format.to_string()));
        }
        let version = value
            .get("version")
            .and_then(|version| version.as_u64())
            .ok_or_else(|| TranscodeError::InvalidDocument("missing `version`".to_string()))?;
        if version > u64::from(DOCUMENT_VERSION) {
            return Err(TranscodeError::UnsupportedVersion(
                u32::try_from(version).unwrap_or(u32::MAX),
            ));
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_json(&self) -> TranscodeResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks size, referential consistency and acyclicity.
    ///
    /// Symlink targets are not required to be inside the document.
    pub fn validate(&self, max_nodes: usize) -> TranscodeResult<()> {
        let actual = self.nodes.len();
        if self.node_count != actual {
            return Err(TranscodeError::NodeCountMismatch {
                declared: self.node_count,
                actual,
            });
        }
        if actual > max_nodes {
            return Err(TranscodeError::TooManyNodes {
                count: actual,
                limit: max_nodes,
            });
        }
        if self.root_ids.is_empty() && actual > 0 {
            return Err(invalid("document has nodes but no root ids"));
        }

        let mut roots = HashSet::new();
        for root_id in &self.root_ids {
            let root = self
                .nodes
                .get(root_id)
                .ok_or_else(|| invalid(format!("root id {root_id} is not in the document")))?;
            if root.parent.is_some() {
                return Err(invalid(format!("root {root_id} has a parent")));
            }
            if !roots.insert(*root_id) {
                return Err(invalid(format!("root id {root_id} is listed twice")));
            }
        }

        for (key, node) in &self.nodes {
            if *key != node.id {
                return Err(invalid(format!("node keyed {key} carries id {}", node.id)));
            }
            if node.is_symlink() && !node.children.is_empty() {
                return Err(invalid(format!("symlink {key} has children")));
            }
            match node.parent {
                None if !roots.contains(key) => {
                    return Err(invalid(format!("parentless node {key} is not a root")));
                }
                None => {}
                Some(parent_id) => {
                    let listed = self
                        .nodes
                        .get(&parent_id)
                        .is_some_and(|parent| parent.children.contains(key));
                    if !listed {
                        return Err(invalid(format!(
                            "node {key} is not listed by its parent {parent_id}"
                        )));
                    }
                }
            }
            let mut seen = HashSet::new();
            for child_id in &node.children {
                if !seen.insert(*child_id) {
                    return Err(invalid(format!("node {key} lists child {child_id} twice")));
                }
                let child = self.nodes.get(child_id).ok_or_else(|| {
                    invalid(format!("child {child_id} of {key} is not in the document"))
                })?;
                if child.parent != Some(*key) {
                    return Err(invalid(format!(
                        "child {child_id} of {key} points at another parent"
                    )));
                }
            }
        }

        for id in self.nodes.keys() {
            if self.parent_chain_loops(*id) {
                return Err(TranscodeError::StructuralCycle(*id));
            }
        }
        Ok(())
    }

    fn parent_chain_loops(&self, id: NodeId) -> bool {
        let limit = self.nodes.len();
        let mut steps = 0;
        let mut cursor = self.nodes.get(&id).and_then(|node| node.parent);
        while let Some(current) = cursor {
            if current == id || steps > limit {
                return true;
            }
            steps += 1;
            cursor = self.nodes.get(&current).and_then(|node| node.parent);
        }
        false
    }
}

fn invalid(message: impl Into<String>) -> TranscodeError {
    TranscodeError::InvalidDocument(message.into())
}
