use std::collections::HashSet;
use treenote_core::transcode::refs::{inline_refs, RefKind};
use treenote_core::{
    check_integrity, ExportBundle, ExportDocument, ExportScope, ImportOptions, MemoryStorage,
    NodeStore, TranscodeError, TreeService, TreeServiceError,
};

fn setup() -> TreeService<MemoryStorage> {
    TreeService::with_store(NodeStore::new(), MemoryStorage::new())
}

/// Project with nested children, an internal symlink, an inline node
/// reference and one attachment.
fn seeded() -> TreeService<MemoryStorage> {
    let mut service = setup();
    let project = service.create_root("Project");
    let design = service.create_child(project, "Design").unwrap();
    let tasks = service.create_child(project, "Tasks").unwrap();
    service.create_child(tasks, "Write parser").unwrap();
    service.create_symlink(design, Some(tasks)).unwrap();
    let meta = service
        .add_attachment(design, "diagram.png", "image/png", &[1, 2, 3])
        .unwrap();
    service
        .update_content(
            design,
            format!("see ![d](attachment:{}) and [tasks](node:{tasks})", meta.id),
        )
        .unwrap();
    service.create_root("Scratch");
    service
}

#[test]
fn forest_roundtrip_preserves_shape_with_fresh_ids() {
    let source = seeded();
    let document = source.export(ExportScope::Forest).unwrap();
    assert_eq!(document.root_or_branch_id, None);
    assert_eq!(document.node_count, source.store().len());

    let json = document.to_json().unwrap();
    let parsed = ExportDocument::from_json(&json).unwrap();
    assert_eq!(parsed, document);

    let mut target = setup();
    let report = target
        .import_document(&parsed, None, &ImportOptions::default())
        .unwrap();
    assert_eq!(report.node_count, source.store().len());
    assert_eq!(report.root_ids.len(), 2);
    assert_eq!(report.external_links, 0);
    assert_eq!(target.store().len(), source.store().len());

    let old_ids: HashSet<_> = source.store().node_map().keys().copied().collect();
    let new_ids: HashSet<_> = target.store().node_map().keys().copied().collect();
    assert!(old_ids.is_disjoint(&new_ids));
    assert!(check_integrity(target.store()).is_clean());
}

#[test]
fn every_reference_resolves_inside_the_imported_set() {
    let source = seeded();
    let bundle = source.export_bundle(ExportScope::Forest).unwrap();

    let mut target = setup();
    let inbox = target.create_root("Inbox");
    let report = target
        .import_bundle(&bundle, Some(inbox), &ImportOptions::default())
        .unwrap();
    assert_eq!(report.attachments_restored, 1);

    let mut imported = HashSet::new();
    let mut stack = report.root_ids.clone();
    while let Some(id) = stack.pop() {
        imported.insert(id);
        stack.extend(target.store().get(id).unwrap().children.iter().copied());
    }
    assert_eq!(imported.len(), report.node_count);

    let attachment_ids: HashSet<_> = imported
        .iter()
        .flat_map(|id| target.store().get(*id).unwrap().attachments.iter())
        .map(|meta| meta.id)
        .collect();
    for id in &imported {
        let node = target.store().get(*id).unwrap();
        if let Some(parent) = node.parent {
            assert!(parent == inbox || imported.contains(&parent));
        }
        if let Some(target_id) = node.target_id() {
            assert!(imported.contains(&target_id));
        }
        for (kind, referenced) in inline_refs(node.own_content().unwrap_or_default()) {
            match kind {
                RefKind::Node => assert!(imported.contains(&referenced)),
                RefKind::Attachment => assert!(attachment_ids.contains(&referenced)),
            }
        }
    }
    for attachment_id in attachment_ids {
        assert!(target.attachment_bytes(attachment_id).unwrap().is_some());
    }
}

#[test]
fn archive_entries_rebuild_the_same_bundle() {
    let source = seeded();
    let bundle = source.export_bundle(ExportScope::Forest).unwrap();
    let entries = bundle.archive_entries().unwrap();
    assert_eq!(entries[0].0, "document.json");
    assert!(entries[1].0.starts_with("attachments/"));
    assert!(entries[1].0.ends_with("_diagram.png"));

    let rebuilt = ExportBundle::from_archive_entries(entries).unwrap();
    assert_eq!(rebuilt, bundle);
}

#[test]
fn branch_export_imports_as_a_single_subtree() {
    let mut service = seeded();
    let project = service.store().root_nodes()[0];
    let tasks = service.store().get(project).unwrap().children[1];
    let document = service.export(ExportScope::Branch(tasks)).unwrap();
    assert_eq!(document.root_or_branch_id, Some(tasks));
    assert_eq!(document.node_count, 3);

    let scratch = service.store().root_nodes()[1];
    let report = service
        .import_document(&document, Some(scratch), &ImportOptions::default())
        .unwrap();
    assert_eq!(report.root_ids.len(), 1);
    // The link to Design points outside the branch and is kept as-is.
    assert_eq!(report.external_links, 1);
    assert_eq!(
        service.store().get(scratch).unwrap().children,
        report.root_ids
    );
    assert!(check_integrity(service.store()).is_clean());
}

#[test]
fn malformed_documents_are_rejected_without_side_effects() {
    let mut service = seeded();
    let before = service.store().clone();

    let wrong_type = r#"{"format":"something-else","version":1}"#;
    assert!(matches!(
        ExportDocument::from_json(wrong_type),
        Err(TranscodeError::WrongDocumentType(_))
    ));
    let future = r#"{"format":"treenote-export","version":9}"#;
    assert!(matches!(
        ExportDocument::from_json(future),
        Err(TranscodeError::UnsupportedVersion(9))
    ));

    let mut document = service.export(ExportScope::Forest).unwrap();
    document.node_count += 5;
    let err = service
        .import_document(&document, None, &ImportOptions::default())
        .unwrap_err();
    assert_eq!(err.reason_code(), "import-invalid");

    let document = service.export(ExportScope::Forest).unwrap();
    let options = ImportOptions {
        max_nodes: 2,
        ..ImportOptions::default()
    };
    assert!(matches!(
        service.import_document(&document, None, &options),
        Err(TreeServiceError::Transcode(TranscodeError::TooManyNodes { .. }))
    ));
    assert_eq!(service.store(), &before);
}
