//! Primary/secondary storage combinator.
//!
//! # Invariants
//! - Writes go to the primary; on failure they are retried on the fallback
//!   and the primary failure is logged, never surfaced when the fallback
//!   succeeds.
//! - Reads follow the newest write. Within one process that is whichever
//!   side took the last successful save; across processes the side with the
//!   higher snapshot revision wins, the primary on a tie.
//! - `reconcile` copies a newer fallback snapshot back into the primary.
//! - Blob reads consult the fallback when the primary fails or lacks the
//!   requested blob.

use super::{NodeStorage, StorageResult};
use crate::model::node::{AttachmentId, NodeId};
use crate::store::{NodeMap, NodeStore};
use log::{error, info, warn};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Primary,
    Fallback,
}

/// Storage that falls back to a secondary collaborator on primary failure.
pub struct FallbackStorage<P: NodeStorage, F: NodeStorage> {
    primary: P,
    fallback: F,
    used_fallback: bool,
    last_write: Option<Side>,
}

impl<P: NodeStorage, F: NodeStorage> FallbackStorage<P, F> {
    pub fn new(primary: P, fallback: F) -> Self {
        Self {
            primary,
            fallback,
            used_fallback: false,
            last_write: None,
        }
    }

    /// Whether any write has landed in the fallback since creation.
    pub fn used_fallback(&self) -> bool {
        self.used_fallback
    }

    pub fn primary(&self) -> &P {
        &self.primary
    }

    pub fn fallback(&self) -> &F {
        &self.fallback
    }

    /// Side holding the newest snapshot.
    fn current_side(&self) -> Side {
        if let Some(side) = self.last_write {
            return side;
        }
        // An unreadable fallback revision means nothing usable was saved there.
        let fallback_revision = self.fallback.revision().unwrap_or(0);
        if fallback_revision == 0 {
            return Side::Primary;
        }
        match self.primary.revision() {
            Ok(primary_revision) if primary_revision >= fallback_revision => Side::Primary,
            Ok(_) => Side::Fallback,
            Err(err) => {
                warn!("event=storage_revision module=storage status=fallback error={err}");
                Side::Fallback
            }
        }
    }

    fn load_side(&self, side: Side) -> StorageResult<NodeStore> {
        match side {
            Side::Primary => self.primary.load_all(),
            Side::Fallback => self.fallback.load_all(),
        }
    }
}

impl<P: NodeStorage, F: NodeStorage> NodeStorage for FallbackStorage<P, F> {
    fn save_all(&mut self, nodes: &NodeMap, root_nodes: &[NodeId]) -> StorageResult<()> {
        match self.primary.save_all(nodes, root_nodes) {
            Ok(()) => {
                self.last_write = Some(Side::Primary);
                Ok(())
            }
            Err(err) => {
                warn!(
                    "event=storage_save module=storage status=fallback nodes={} error={err}",
                    nodes.len()
                );
                self.used_fallback = true;
                self.fallback.save_all(nodes, root_nodes).inspect_err(|fallback_err| {
                    error!(
                        "event=storage_save module=storage status=error target=fallback error={fallback_err}"
                    );
                })?;
                self.last_write = Some(Side::Fallback);
                Ok(())
            }
        }
    }

    fn load_all(&self) -> StorageResult<NodeStore> {
        let side = self.current_side();
        match self.load_side(side) {
            Ok(store) => Ok(store),
            Err(err) if side == Side::Primary => {
                warn!("event=storage_load module=storage status=fallback error={err}");
                self.fallback.load_all()
            }
            Err(err) => {
                warn!("event=storage_load module=storage status=primary error={err}");
                self.primary.load_all()
            }
        }
    }

    fn save_attachment_blob(&mut self, id: AttachmentId, bytes: &[u8]) -> StorageResult<()> {
        match self.primary.save_attachment_blob(id, bytes) {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(
                    "event=blob_save module=storage status=fallback attachment_id={id} error={err}"
                );
                self.used_fallback = true;
                self.fallback.save_attachment_blob(id, bytes)
            }
        }
    }

    fn load_attachment_blob(&self, id: AttachmentId) -> StorageResult<Option<Vec<u8>>> {
        match self.primary.load_attachment_blob(id) {
            Ok(Some(bytes)) => Ok(Some(bytes)),
            Ok(None) => self.fallback.load_attachment_blob(id),
            Err(err) => {
                warn!(
                    "event=blob_load module=storage status=fallback attachment_id={id} error={err}"
                );
                self.fallback.load_attachment_blob(id)
            }
        }
    }

    fn delete_attachment_blob(&mut self, id: AttachmentId) -> StorageResult<()> {
        let primary = self.primary.delete_attachment_blob(id);
        if let Err(err) = self.fallback.delete_attachment_blob(id) {
            warn!(
                "event=blob_delete module=storage status=error target=fallback attachment_id={id} error={err}"
            );
        }
        primary
    }

    fn list_attachment_ids(&self) -> StorageResult<Vec<AttachmentId>> {
        let mut ids: BTreeSet<AttachmentId> = match self.primary.list_attachment_ids() {
            Ok(ids) => ids.into_iter().collect(),
            Err(err) => {
                warn!("event=blob_list module=storage status=fallback error={err}");
                BTreeSet::new()
            }
        };
        ids.extend(self.fallback.list_attachment_ids()?);
        Ok(ids.into_iter().collect())
    }

    fn revision(&self) -> StorageResult<u64> {
        let primary = self.primary.revision().unwrap_or(0);
        Ok(primary.max(self.fallback.revision()?))
    }

    fn reconcile(&mut self) -> StorageResult<()> {
        if self.current_side() == Side::Primary {
            return Ok(());
        }
        let store = self.fallback.load_all()?;
        let mut copied_blobs = 0usize;
        for id in self.fallback.list_attachment_ids()? {
            if self.primary.load_attachment_blob(id).ok().flatten().is_some() {
                continue;
            }
            if let Some(bytes) = self.fallback.load_attachment_blob(id)? {
                if self.primary.save_attachment_blob(id, &bytes).is_ok() {
                    copied_blobs += 1;
                }
            }
        }
        match self.primary.save_all(store.node_map(), store.root_nodes()) {
            Ok(()) => {
                self.last_write = Some(Side::Primary);
                info!(
                    "event=storage_reconcile module=storage status=ok nodes={} blobs={copied_blobs}",
                    store.len()
                );
            }
            Err(err) => {
                self.last_write = Some(Side::Fallback);
                warn!("event=storage_reconcile module=storage status=skipped error={err}");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::FallbackStorage;
    use crate::model::node::Node;
    use crate::storage::{MemoryStorage, NodeStorage};
    use crate::store::NodeMap;
    use uuid::Uuid;

    #[test]
    fn failed_primary_write_lands_in_fallback() {
        let mut primary = MemoryStorage::new();
        primary.set_fail_writes(true);
        let mut storage = FallbackStorage::new(primary, MemoryStorage::new());

        let node = Node::new_content("A", "", None);
        let mut nodes = NodeMap::new();
        nodes.insert(node.id, node.clone());
        storage.save_all(&nodes, &[node.id]).unwrap();

        assert!(storage.used_fallback());
        assert_eq!(storage.fallback().save_count(), 1);
        assert_eq!(storage.primary().save_count(), 0);
    }

    fn single_node_map(title: &str) -> (Node, NodeMap) {
        let node = Node::new_content(title, "", None);
        let mut nodes = NodeMap::new();
        nodes.insert(node.id, node.clone());
        (node, nodes)
    }

    #[test]
    fn reads_follow_the_side_that_took_the_last_write() {
        let mut storage = FallbackStorage::new(MemoryStorage::new(), MemoryStorage::new());
        let (older, older_nodes) = single_node_map("Older");
        storage.save_all(&older_nodes, &[older.id]).unwrap();

        storage.primary.set_fail_writes(true);
        let (newer, newer_nodes) = single_node_map("Newer");
        storage.save_all(&newer_nodes, &[newer.id]).unwrap();
        assert!(storage.load_all().unwrap().contains(newer.id));

        storage.primary.set_fail_writes(false);
        storage.save_all(&older_nodes, &[older.id]).unwrap();
        assert!(storage.load_all().unwrap().contains(older.id));
    }

    #[test]
    fn newer_fallback_snapshot_is_copied_back_on_reconcile() {
        let mut primary = MemoryStorage::new();
        let (stale, stale_nodes) = single_node_map("Stale");
        primary.save_all(&stale_nodes, &[stale.id]).unwrap();

        let mut fallback = MemoryStorage::new();
        let (fresh, fresh_nodes) = single_node_map("Fresh");
        // Two saves push the fallback revision strictly past the primary's.
        fallback.save_all(&fresh_nodes, &[fresh.id]).unwrap();
        fallback.save_all(&fresh_nodes, &[fresh.id]).unwrap();
        let blob_id = Uuid::new_v4();
        fallback.save_attachment_blob(blob_id, b"blob").unwrap();

        let mut storage = FallbackStorage::new(primary, fallback);
        assert!(storage.load_all().unwrap().contains(fresh.id));

        storage.reconcile().unwrap();
        let primary = storage.primary().load_all().unwrap();
        assert!(primary.contains(fresh.id));
        assert!(!primary.contains(stale.id));
        assert_eq!(
            storage.primary().load_attachment_blob(blob_id).unwrap(),
            Some(b"blob".to_vec())
        );
        assert!(storage.primary().revision().unwrap() >= storage.fallback().revision().unwrap());
        assert!(storage.load_all().unwrap().contains(fresh.id));
    }

    #[test]
    fn reconcile_keeps_reading_fallback_while_primary_rejects_writes() {
        let mut primary = MemoryStorage::new();
        primary.set_fail_writes(true);
        let mut fallback = MemoryStorage::new();
        let (fresh, fresh_nodes) = single_node_map("Fresh");
        fallback.save_all(&fresh_nodes, &[fresh.id]).unwrap();

        let mut storage = FallbackStorage::new(primary, fallback);
        storage.reconcile().unwrap();
        assert!(storage.primary().load_all().unwrap().is_empty());
        assert!(storage.load_all().unwrap().contains(fresh.id));
    }

    #[test]
    fn blob_lookup_falls_through_to_fallback() {
        let mut fallback = MemoryStorage::new();
        let id = Uuid::new_v4();
        fallback.save_attachment_blob(id, b"x").unwrap();
        let storage = FallbackStorage::new(MemoryStorage::new(), fallback);

        assert_eq!(storage.load_attachment_blob(id).unwrap(), Some(b"x".to_vec()));
        assert_eq!(storage.list_attachment_ids().unwrap(), vec![id]);
    }
}
