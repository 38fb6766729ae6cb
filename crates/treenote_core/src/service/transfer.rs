//! Export and import through the tree service.
//!
//! # Invariants
//! - Import validates and remaps the whole document before the first node
//!   is inserted; any failure before insertion leaves the store untouched.
//! - Blobs are materialized under their new ids before metadata referencing
//!   them is committed.

use super::tree_service::{rejected, TreeService};
use super::TreeServiceError;
use crate::graph::ancestor_set;
use crate::model::node::{AttachmentId, NodeId};
use crate::storage::NodeStorage;
use crate::transcode::{
    export_document, prepare_import, BundledAttachment, ExportBundle, ExportDocument, ExportScope,
    ImportOptions, ImportReport, TranscodeError,
};
use log::{info, warn};
use std::collections::HashSet;

type ServiceResult<T> = Result<T, TreeServiceError>;

impl<S: NodeStorage> TreeService<S> {
    /// Exports the forest or one branch.
    pub fn export(&self, scope: ExportScope) -> ServiceResult<ExportDocument> {
        let document = export_document(&self.store, scope)?;
        info!(
            "event=export module=service status=ok nodes={} attachments={}",
            document.node_count,
            document.attachment_ids.len()
        );
        Ok(document)
    }

    /// Exports with attachment blobs. Missing blobs are skipped.
    pub fn export_bundle(&self, scope: ExportScope) -> ServiceResult<ExportBundle> {
        let document = self.export(scope)?;
        let mut attachments = Vec::new();
        let mut seen = HashSet::new();
        for meta in document
            .nodes
            .values()
            .flat_map(|node| node.attachments.iter())
        {
            if !seen.insert(meta.id) {
                continue;
            }
            match self.storage.load_attachment_blob(meta.id)? {
                Some(bytes) => attachments.push(BundledAttachment {
                    meta: meta.clone(),
                    bytes,
                }),
                None => warn!(
                    "event=export_bundle module=service status=missing_blob attachment_id={}",
                    meta.id
                ),
            }
        }
        Ok(ExportBundle {
            document,
            attachments,
        })
    }

    /// Imports a document under `parent_id` (or as new roots).
    ///
    /// Attachment bytes are copied from this service's storage under the
    /// document's original ids, which covers re-importing into the same
    /// database.
    pub fn import_document(
        &mut self,
        document: &ExportDocument,
        parent_id: Option<NodeId>,
        options: &ImportOptions,
    ) -> ServiceResult<ImportReport> {
        self.import_with_blobs(document, parent_id, options, |_| None)
    }

    /// Imports a bundle, preferring its bundled blobs over stored ones.
    pub fn import_bundle(
        &mut self,
        bundle: &ExportBundle,
        parent_id: Option<NodeId>,
        options: &ImportOptions,
    ) -> ServiceResult<ImportReport> {
        self.import_with_blobs(&bundle.document, parent_id, options, |id| {
            bundle.blob(id).map(<[u8]>::to_vec)
        })
    }

    fn import_with_blobs(
        &mut self,
        document: &ExportDocument,
        parent_id: Option<NodeId>,
        options: &ImportOptions,
        bundled: impl Fn(AttachmentId) -> Option<Vec<u8>>,
    ) -> ServiceResult<ImportReport> {
        self.check_import_destination(parent_id)
            .map_err(|err| rejected("import", err))?;
        let prepared =
            prepare_import(document, options).map_err(|err| rejected("import", err.into()))?;

        if let Some(parent_id) = parent_id {
            let ancestors = ancestor_set(&self.store, parent_id);
            if let Some((symlink_id, target_id)) = prepared
                .external_links
                .iter()
                .find(|(_, target_id)| ancestors.contains(target_id))
            {
                return Err(rejected(
                    "import",
                    TranscodeError::WouldCycle {
                        symlink_id: *symlink_id,
                        target_id: *target_id,
                    }
                    .into(),
                ));
            }
        }

        let mut restored = HashSet::new();
        for (old_id, new_id) in &prepared.attachment_ids {
            let bytes = match bundled(*old_id) {
                Some(bytes) => Some(bytes),
                None => self.storage.load_attachment_blob(*old_id).unwrap_or_else(|err| {
                    warn!(
                        "event=import module=service status=blob_unavailable attachment_id={old_id} error={err}"
                    );
                    None
                }),
            };
            let Some(bytes) = bytes else {
                continue;
            };
            match self.storage.save_attachment_blob(*new_id, &bytes) {
                Ok(()) => {
                    restored.insert(*new_id);
                }
                Err(err) => warn!(
                    "event=import module=service status=blob_failed attachment_id={new_id} error={err}"
                ),
            }
        }

        let mut report = ImportReport {
            root_ids: prepared.root_ids.clone(),
            node_count: prepared.nodes.len(),
            attachments_restored: restored.len(),
            external_links: prepared.external_links.len(),
            ..ImportReport::default()
        };

        for mut node in prepared.nodes {
            if options.sweep_orphans {
                let before = node.attachments.len();
                node.attachments.retain(|meta| restored.contains(&meta.id));
                report.attachments_dropped += before - node.attachments.len();
            }
            self.store.insert(node);
        }
        for root_id in &prepared.root_ids {
            self.store.attach(*root_id, parent_id, None);
        }
        if let Some(parent_id) = parent_id {
            self.touch(parent_id);
        }

        info!(
            "event=import module=service status=ok nodes={} attachments={} dropped={} external_links={}",
            report.node_count,
            report.attachments_restored,
            report.attachments_dropped,
            report.external_links
        );
        self.persist("import");
        Ok(report)
    }

    fn check_import_destination(&self, parent_id: Option<NodeId>) -> ServiceResult<()> {
        self.check_parent(parent_id).map_err(|err| match err {
            TreeServiceError::ParentNotFound(id) => TranscodeError::NodeNotFound(id).into(),
            TreeServiceError::ParentIsSymlink(id) => {
                TreeServiceError::Transcode(TranscodeError::DestinationIsSymlink(id))
            }
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::model::node::NodeBody;
    use crate::service::{TreeService, TreeServiceError};
    use crate::storage::MemoryStorage;
    use crate::store::NodeStore;
    use crate::transcode::{ExportScope, ImportOptions, TranscodeError};

    fn service() -> TreeService<MemoryStorage> {
        TreeService::with_store(NodeStore::new(), MemoryStorage::new())
    }

    #[test]
    fn bundle_roundtrip_restores_blobs_under_new_ids() {
        let mut source = service();
        let a = source.create_root("A");
        let meta = source.add_attachment(a, "a.txt", "text/plain", b"hello").unwrap();
        source
            .update_content(a, format!("see attachment:{}", meta.id))
            .unwrap();
        let bundle = source.export_bundle(ExportScope::Branch(a)).unwrap();
        assert_eq!(bundle.attachments.len(), 1);

        let mut target = service();
        let dest = target.create_root("Inbox");
        let report = target
            .import_bundle(&bundle, Some(dest), &ImportOptions::default())
            .unwrap();
        assert_eq!(report.node_count, 1);
        assert_eq!(report.attachments_restored, 1);
        assert_eq!(report.attachments_dropped, 0);

        let imported = target.store().get(report.root_ids[0]).unwrap();
        assert_eq!(imported.parent, Some(dest));
        let new_meta = &imported.attachments[0];
        assert_ne!(new_meta.id, meta.id);
        assert_eq!(
            imported.body,
            NodeBody::Content {
                content: format!("see attachment:{}", new_meta.id)
            }
        );
        assert_eq!(
            target.attachment_bytes(new_meta.id).unwrap().as_deref(),
            Some(&b"hello"[..])
        );
    }

    #[test]
    fn missing_blobs_are_swept_after_import() {
        let mut source = service();
        let a = source.create_root("A");
        source.add_attachment(a, "a.txt", "text/plain", b"x").unwrap();
        let document = source.export(ExportScope::Forest).unwrap();

        let mut target = service();
        let report = target
            .import_document(&document, None, &ImportOptions::default())
            .unwrap();
        assert_eq!(report.attachments_dropped, 1);
        assert!(target
            .store()
            .get(report.root_ids[0])
            .unwrap()
            .attachments
            .is_empty());
    }

    #[test]
    fn import_rejects_external_target_on_destination_path() {
        let mut svc = service();
        let r = svc.create_root("R");
        let d = svc.create_child(r, "D").unwrap();
        let x = svc.create_root("X");
        let c = svc.create_child(x, "C").unwrap();
        svc.create_symlink(r, Some(c)).unwrap();

        // The branch under C holds a symlink to R, which is outside it.
        let document = svc.export(ExportScope::Branch(c)).unwrap();
        let before = svc.store().clone();
        let err = svc
            .import_document(&document, Some(d), &ImportOptions::default())
            .unwrap_err();
        assert_eq!(err.reason_code(), "cycle");
        assert_eq!(svc.store(), &before);

        let report = svc
            .import_document(&document, None, &ImportOptions::default())
            .unwrap();
        assert_eq!(report.external_links, 1);
    }

    #[test]
    fn import_destination_must_exist_and_not_be_symlink() {
        let mut svc = service();
        let a = svc.create_root("A");
        let link = svc.create_symlink(a, None).unwrap();
        let document = svc.export(ExportScope::Branch(a)).unwrap();

        assert!(matches!(
            svc.import_document(&document, Some(link), &ImportOptions::default()),
            Err(TreeServiceError::Transcode(TranscodeError::DestinationIsSymlink(_)))
        ));
        assert!(matches!(
            svc.import_document(&document, Some(uuid::Uuid::new_v4()), &ImportOptions::default()),
            Err(TreeServiceError::NodeNotFound(_))
        ));
    }
}
