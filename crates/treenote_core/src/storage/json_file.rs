//! Plain-document fallback storage.
//!
//! # Responsibility
//! - Persist the whole node map as one JSON document on disk.
//! - Keep attachment blobs as individual files next to the document.
//!
//! # Invariants
//! - Document writes go to a temp file first and are renamed into place, so a
//!   crash mid-write never leaves a truncated document.
//! - A missing document loads as an empty store.

use super::{next_revision, NodeStorage, StorageError, StorageResult};
use crate::model::node::{AttachmentId, NodeId};
use crate::store::{NodeMap, NodeStore};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const DOCUMENT_VERSION: u32 = 1;
const BLOB_EXTENSION: &str = "bin";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DocumentRef<'a> {
    version: u32,
    revision: u64,
    nodes: &'a NodeMap,
    root_nodes: &'a [NodeId],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Document {
    version: u32,
    #[serde(default)]
    revision: u64,
    #[serde(default)]
    nodes: NodeMap,
    #[serde(default)]
    root_nodes: Vec<NodeId>,
}

/// JSON file storage rooted at one document path.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    document_path: PathBuf,
    attachments_dir: PathBuf,
}

impl JsonFileStorage {
    /// Uses `document_path` for nodes and `<document_path>.attachments/` for
    /// blobs.
    pub fn new(document_path: impl Into<PathBuf>) -> Self {
        let document_path = document_path.into();
        let mut dir_name = document_path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        dir_name.push(".attachments");
        let attachments_dir = document_path.with_file_name(dir_name);
        Self {
            document_path,
            attachments_dir,
        }
    }

    pub fn document_path(&self) -> &Path {
        &self.document_path
    }

    pub fn attachments_dir(&self) -> &Path {
        &self.attachments_dir
    }

    /// `Ok(None)` when no document was written yet.
    fn read_document(&self) -> StorageResult<Option<Document>> {
        let bytes = match fs::read(&self.document_path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let document: Document = serde_json::from_slice(&bytes)?;
        if document.version > DOCUMENT_VERSION {
            return Err(StorageError::InvalidData(format!(
                "fallback document version {} is newer than supported {DOCUMENT_VERSION}",
                document.version
            )));
        }
        Ok(Some(document))
    }

    fn blob_path(&self, id: AttachmentId) -> PathBuf {
        self.attachments_dir
            .join(format!("{id}.{BLOB_EXTENSION}"))
    }
}

impl NodeStorage for JsonFileStorage {
    fn save_all(&mut self, nodes: &NodeMap, root_nodes: &[NodeId]) -> StorageResult<()> {
        if let Some(parent) = self.document_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let document = DocumentRef {
            version: DOCUMENT_VERSION,
            revision: next_revision(self.revision()?),
            nodes,
            root_nodes,
        };
        let bytes = serde_json::to_vec(&document)?;
        write_atomically(&self.document_path, &bytes)
    }

    fn load_all(&self) -> StorageResult<NodeStore> {
        Ok(self
            .read_document()?
            .map(|document| NodeStore::from_parts(document.nodes, document.root_nodes))
            .unwrap_or_default())
    }

    fn save_attachment_blob(&mut self, id: AttachmentId, bytes: &[u8]) -> StorageResult<()> {
        fs::create_dir_all(&self.attachments_dir)?;
        write_atomically(&self.blob_path(id), bytes)
    }

    fn load_attachment_blob(&self, id: AttachmentId) -> StorageResult<Option<Vec<u8>>> {
        match fs::read(self.blob_path(id)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn delete_attachment_blob(&mut self, id: AttachmentId) -> StorageResult<()> {
        match fs::remove_file(self.blob_path(id)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn list_attachment_ids(&self) -> StorageResult<Vec<AttachmentId>> {
        let entries = match fs::read_dir(&self.attachments_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(BLOB_EXTENSION) {
                continue;
            }
            let parsed = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| Uuid::parse_str(stem).ok());
            if let Some(id) = parsed {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn revision(&self) -> StorageResult<u64> {
        Ok(self
            .read_document()?
            .map_or(0, |document| document.revision))
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    let mut tmp_name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, bytes)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}
