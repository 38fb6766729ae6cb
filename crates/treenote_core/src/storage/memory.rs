//! In-memory storage for tests and ephemeral sessions.

use super::{next_revision, NodeStorage, StorageError, StorageResult};
use crate::model::node::{AttachmentId, NodeId};
use crate::store::{NodeMap, NodeStore};
use std::collections::BTreeMap;

/// Storage that keeps the last saved snapshot in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    nodes: NodeMap,
    root_nodes: Vec<NodeId>,
    blobs: BTreeMap<AttachmentId, Vec<u8>>,
    fail_writes: bool,
    save_count: usize,
    revision: u64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail with `StorageError::Unavailable`.
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    /// Number of successful `save_all` calls.
    pub fn save_count(&self) -> usize {
        self.save_count
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.fail_writes {
            return Err(StorageError::Unavailable(
                "memory storage writes disabled".to_string(),
            ));
        }
        Ok(())
    }
}

impl NodeStorage for MemoryStorage {
    fn save_all(&mut self, nodes: &NodeMap, root_nodes: &[NodeId]) -> StorageResult<()> {
        self.check_writable()?;
        self.nodes = nodes.clone();
        self.root_nodes = root_nodes.to_vec();
        self.save_count += 1;
        self.revision = next_revision(self.revision);
        Ok(())
    }

    fn load_all(&self) -> StorageResult<NodeStore> {
        Ok(NodeStore::from_parts(
            self.nodes.clone(),
            self.root_nodes.clone(),
        ))
    }

    fn save_attachment_blob(&mut self, id: AttachmentId, bytes: &[u8]) -> StorageResult<()> {
        self.check_writable()?;
        self.blobs.insert(id, bytes.to_vec());
        Ok(())
    }

    fn load_attachment_blob(&self, id: AttachmentId) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.blobs.get(&id).cloned())
    }

    fn delete_attachment_blob(&mut self, id: AttachmentId) -> StorageResult<()> {
        self.check_writable()?;
        self.blobs.remove(&id);
        Ok(())
    }

    fn list_attachment_ids(&self) -> StorageResult<Vec<AttachmentId>> {
        Ok(self.blobs.keys().copied().collect())
    }

    fn revision(&self) -> StorageResult<u64> {
        Ok(self.revision)
    }
}
