//! Two-pass import preparation.
//!
//! Pass one allocates fresh ids for every node and attachment in the
//! document. Pass two rewrites every reference through those tables. The
//! result is a detached set of records the service inserts in one step.

use super::document::ExportDocument;
use super::refs::rewrite_refs;
use super::{TranscodeError, TranscodeResult};
use crate::config::DEFAULT_MAX_IMPORT_NODES;
use crate::model::node::{AttachmentId, Node, NodeBody, NodeId};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportOptions {
    pub max_nodes: usize,
    /// Strip attachment metadata whose blob could not be materialized.
    pub sweep_orphans: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            max_nodes: DEFAULT_MAX_IMPORT_NODES,
            sweep_orphans: true,
        }
    }
}

/// Outcome of a committed import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// New ids of the imported top-level nodes, in document order.
    pub root_ids: Vec<NodeId>,
    pub node_count: usize,
    pub attachments_restored: usize,
    /// Metadata entries stripped because no blob materialized.
    pub attachments_dropped: usize,
    /// Imported symlinks whose target lies outside the document.
    pub external_links: usize,
}

/// Remapped, not yet inserted, import payload.
#[derive(Debug, Clone)]
pub struct PreparedImport {
    /// Records in pre-order; roots carry `parent == None`.
    pub nodes: Vec<Node>,
    pub root_ids: Vec<NodeId>,
    pub node_ids: HashMap<NodeId, NodeId>,
    pub attachment_ids: HashMap<AttachmentId, AttachmentId>,
    /// `(new symlink id, target id)` for targets outside the document.
    pub external_links: Vec<(NodeId, NodeId)>,
}

/// Validates `document` and remaps every id. Never touches a live store.
pub fn prepare_import(
    document: &ExportDocument,
    options: &ImportOptions,
) -> TranscodeResult<PreparedImport> {
    document.validate(options.max_nodes)?;

    let node_ids: HashMap<NodeId, NodeId> = document
        .nodes
        .keys()
        .map(|old| (*old, Uuid::new_v4()))
        .collect();
    let mut attachment_ids: HashMap<AttachmentId, AttachmentId> = HashMap::new();
    for meta in document.nodes.values().flat_map(|node| node.attachments.iter()) {
        attachment_ids.entry(meta.id).or_insert_with(Uuid::new_v4);
    }

    let remap = |id: &NodeId| {
        node_ids
            .get(id)
            .copied()
            .ok_or_else(|| TranscodeError::InvalidDocument(format!("unmapped node id {id}")))
    };

    let mut nodes = Vec::with_capacity(document.nodes.len());
    let mut external_links = Vec::new();
    let mut stack: Vec<NodeId> = document.root_ids.iter().rev().copied().collect();
    while let Some(old_id) = stack.pop() {
        let source = document
            .nodes
            .get(&old_id)
            .ok_or_else(|| TranscodeError::InvalidDocument(format!("missing node {old_id}")))?;
        stack.extend(source.children.iter().rev().copied());

        let mut node = source.clone();
        node.id = remap(&old_id)?;
        node.parent = source.parent.as_ref().map(remap).transpose()?;
        node.children = source
            .children
            .iter()
            .map(remap)
            .collect::<TranscodeResult<_>>()?;
        node.body = match &source.body {
            NodeBody::Content { content } => NodeBody::Content {
                content: rewrite_refs(content, &node_ids, &attachment_ids),
            },
            NodeBody::Symlink { target_id } => match node_ids.get(target_id) {
                Some(mapped) => NodeBody::Symlink {
                    target_id: *mapped,
                },
                None => {
                    external_links.push((node.id, *target_id));
                    NodeBody::Symlink {
                        target_id: *target_id,
                    }
                }
            },
        };
        for meta in &mut node.attachments {
            if let Some(mapped) = attachment_ids.get(&meta.id) {
                meta.id = *mapped;
            }
        }
        nodes.push(node);
    }

    let root_ids = document
        .root_ids
        .iter()
        .map(remap)
        .collect::<TranscodeResult<_>>()?;

    Ok(PreparedImport {
        nodes,
        root_ids,
        node_ids,
        attachment_ids,
        external_links,
    })
}
