//! Export of the forest or one branch.

use super::document::ExportDocument;
use super::{TranscodeError, TranscodeResult};
use crate::model::node::{AttachmentId, AttachmentMeta, NodeId};
use crate::store::NodeStore;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use uuid::Uuid;

/// Archive entry name of the document inside a bundle.
pub const ARCHIVE_DOCUMENT_PATH: &str = "document.json";
const ARCHIVE_ATTACHMENT_DIR: &str = "attachments/";

/// What to export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportScope {
    /// Every root in order.
    Forest,
    /// One node and its structural descendants.
    Branch(NodeId),
}

/// Collects the structural closure of `scope` into a document.
///
/// Child ids that do not resolve are dropped from the exported child lists,
/// so the document is always self-consistent.
pub fn export_document(store: &NodeStore, scope: ExportScope) -> TranscodeResult<ExportDocument> {
    let (root_or_branch_id, root_ids) = match scope {
        ExportScope::Forest => (None, store.root_nodes().to_vec()),
        ExportScope::Branch(branch_id) => {
            if !store.contains(branch_id) {
                return Err(TranscodeError::NodeNotFound(branch_id));
            }
            (Some(branch_id), vec![branch_id])
        }
    };

    let mut nodes = BTreeMap::new();
    for root_id in &root_ids {
        for id in store.descendants(*root_id) {
            if let Some(node) = store.get(id) {
                let mut exported = node.clone();
                exported.children.retain(|child| store.contains(*child));
                nodes.insert(id, exported);
            }
        }
    }
    for root_id in &root_ids {
        if let Some(root) = nodes.get_mut(root_id) {
            root.parent = None;
        }
    }

    let attachment_ids: BTreeSet<AttachmentId> = nodes
        .values()
        .flat_map(|node| node.attachments.iter().map(|meta| meta.id))
        .collect();

    Ok(ExportDocument::new(
        root_or_branch_id,
        root_ids,
        nodes,
        attachment_ids.into_iter().collect(),
    ))
}

/// One attachment carried in a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundledAttachment {
    pub meta: AttachmentMeta,
    pub bytes: Vec<u8>,
}

/// A document plus the attachment blobs it references.
///
/// Blobs missing from storage at export time are simply absent; import then
/// strips their metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportBundle {
    pub document: ExportDocument,
    pub attachments: Vec<BundledAttachment>,
}

impl ExportBundle {
    /// Archive entry name of one attachment:
    /// `attachments/{attachmentId}_{originalFilename}`.
    pub fn archive_path(meta: &AttachmentMeta) -> String {
        let name: String = meta
            .name
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' => '_',
                other => other,
            })
            .collect();
        format!("{ARCHIVE_ATTACHMENT_DIR}{}_{name}", meta.id)
    }

    /// Parses the attachment id out of an archive entry name.
    pub fn parse_archive_path(path: &str) -> Option<AttachmentId> {
        let rest = path.strip_prefix(ARCHIVE_ATTACHMENT_DIR)?;
        let (id, _name) = rest.split_once('_')?;
        Uuid::parse_str(id).ok()
    }

    /// `(entry name, bytes)` pairs, document first.
    pub fn archive_entries(&self) -> TranscodeResult<Vec<(String, Vec<u8>)>> {
        let mut entries = vec![(
            ARCHIVE_DOCUMENT_PATH.to_string(),
            self.document.to_json()?.into_bytes(),
        )];
        for attachment in &self.attachments {
            entries.push((Self::archive_path(&attachment.meta), attachment.bytes.clone()));
        }
        Ok(entries)
    }

    /// Rebuilds a bundle from archive entries. Unknown entries are ignored.
    pub fn from_archive_entries(
        entries: impl IntoIterator<Item = (String, Vec<u8>)>,
    ) -> TranscodeResult<Self> {
        let mut document = None;
        let mut blobs = HashMap::new();
        for (path, bytes) in entries {
            if path == ARCHIVE_DOCUMENT_PATH {
                let text = String::from_utf8(bytes).map_err(|_| {
                    TranscodeError::InvalidDocument("document entry is not utf-8".to_string())
                })?;
                document = Some(ExportDocument::from_json(&text)?);
            } else if let Some(id) = Self::parse_archive_path(&path) {
                blobs.insert(id, bytes);
            }
        }
        let document = document.ok_or_else(|| {
            TranscodeError::InvalidDocument(format!("archive has no `{ARCHIVE_DOCUMENT_PATH}`"))
        })?;

        let mut attachments = Vec::new();
        let mut seen = BTreeSet::new();
        for meta in document.nodes.values().flat_map(|node| node.attachments.iter()) {
            if !seen.insert(meta.id) {
                continue;
            }
            if let Some(bytes) = blobs.remove(&meta.id) {
                attachments.push(BundledAttachment {
                    meta: meta.clone(),
                    bytes,
                });
            }
        }
        Ok(Self {
            document,
            attachments,
        })
    }

    pub fn blob(&self, id: AttachmentId) -> Option<&[u8]> {
        self.attachments
            .iter()
            .find(|attachment| attachment.meta.id == id)
            .map(|attachment| attachment.bytes.as_slice())
    }
}
