//! Tree mutation service.
//!
//! # Responsibility
//! - Apply create, move, reorder, link, duplicate and delete operations.
//! - Apply content edits (title, content, tags, attachments).
//! - Persist after every committed change and notify other contexts.
//!
//! # Invariants
//! - Every precondition is checked before the first write to the store.
//! - The structural forest stays acyclic and symlinks never own children.
//! - No symlink ends up on a path below its own target.
//! - In branch mode the branch root and its ancestors cannot be deleted.

use super::TreeServiceError;
use crate::graph::{ancestor_set, is_ancestor, would_move_cycle, would_symlink_cycle};
use crate::model::node::{
    normalize_tag, normalize_title, AttachmentId, AttachmentMeta, Node, NodeBody, NodeId,
};
use crate::storage::NodeStorage;
use crate::store::NodeStore;
use crate::sync::notifier::{ChangeEvent, ChangeNotifier};
use crate::view::branch::BranchView;
use crate::view::instance::{find_instance_key_for_node, InstanceKey, TreeUiState};
use crate::view::rows::{visible_rows, VisibleRow};
use log::{error, info, warn};
use std::collections::{BTreeSet, HashMap, HashSet};
use uuid::Uuid;

type ServiceResult<T> = Result<T, TreeServiceError>;

const COPY_SUFFIX: &str = " (copy)";

/// Where to drop a node relative to a sibling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropPosition {
    Before,
    After,
}

/// Outcome of an orphan cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Nodes unreachable from any root.
    pub removed_nodes: Vec<NodeId>,
    /// Blobs no node referenced.
    pub removed_blobs: Vec<AttachmentId>,
    /// Metadata entries stripped because their blob was missing.
    pub stripped_attachments: usize,
}

impl CleanupReport {
    pub fn is_empty(&self) -> bool {
        self.removed_nodes.is_empty()
            && self.removed_blobs.is_empty()
            && self.stripped_attachments == 0
    }
}

/// Mutation facade owning the store and its persistence collaborator.
pub struct TreeService<S: NodeStorage> {
    pub(super) store: NodeStore,
    pub(super) storage: S,
    notifier: Option<Box<dyn ChangeNotifier>>,
    branch_root: Option<NodeId>,
    unsaved_changes: bool,
}

impl<S: NodeStorage> TreeService<S> {
    /// Loads the persisted tree and normalizes its root list.
    pub fn open(mut storage: S) -> ServiceResult<Self> {
        storage.reconcile().map_err(|err| {
            error!("event=tree_load module=service status=error stage=reconcile error={err}");
            err
        })?;
        let mut store = storage.load_all().map_err(|err| {
            error!("event=tree_load module=service status=error error={err}");
            err
        })?;
        let repaired = store.repair_roots();
        info!(
            "event=tree_load module=service status=ok nodes={} roots={} repaired_roots={}",
            store.len(),
            store.root_nodes().len(),
            repaired
        );
        Ok(Self::with_store(store, storage))
    }

    /// Wraps an existing store without loading.
    pub fn with_store(store: NodeStore, storage: S) -> Self {
        Self {
            store,
            storage,
            notifier: None,
            branch_root: None,
            unsaved_changes: false,
        }
    }

    pub fn with_notifier(mut self, notifier: Box<dyn ChangeNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn store(&self) -> &NodeStore {
        &self.store
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    /// Whether the last persist attempt failed.
    pub fn has_unsaved_changes(&self) -> bool {
        self.unsaved_changes
    }

    /// Retries persistence, returning the storage error instead of logging.
    pub fn flush(&mut self) -> ServiceResult<()> {
        self.storage
            .save_all(self.store.node_map(), self.store.root_nodes())?;
        self.unsaved_changes = false;
        Ok(())
    }

    /// Replaces the in-memory tree with the persisted one.
    ///
    /// Used when another context announced a change. Leaves branch mode if
    /// the branch root no longer exists.
    pub fn reload(&mut self) -> ServiceResult<()> {
        let mut store = self.storage.load_all()?;
        store.repair_roots();
        self.store = store;
        self.unsaved_changes = false;
        if self
            .branch_root
            .is_some_and(|root_id| !self.store.contains(root_id))
        {
            self.branch_root = None;
        }
        info!(
            "event=tree_reload module=service status=ok nodes={}",
            self.store.len()
        );
        Ok(())
    }

    // ---- branch mode -------------------------------------------------

    pub fn branch_root(&self) -> Option<NodeId> {
        self.branch_root
    }

    pub fn enter_branch(&mut self, root_id: NodeId) -> ServiceResult<()> {
        if !self.store.contains(root_id) {
            return Err(TreeServiceError::NodeNotFound(root_id));
        }
        self.branch_root = Some(root_id);
        info!("event=branch_enter module=service status=ok branch_root={root_id}");
        Ok(())
    }

    pub fn exit_branch(&mut self) {
        self.branch_root = None;
    }

    pub fn branch_view(&self) -> Option<BranchView<'_>> {
        self.branch_root
            .map(|root_id| BranchView::new(&self.store, root_id))
    }

    /// Rows for the current view (branch-scoped in branch mode).
    pub fn visible_rows(&self, ui: &TreeUiState) -> Vec<VisibleRow> {
        visible_rows(&self.store, ui, self.branch_root)
    }

    /// Canonical occurrence of `node_id` in the current view.
    pub fn find_instance_key(&self, node_id: NodeId) -> Option<InstanceKey> {
        find_instance_key_for_node(&self.store, node_id, self.branch_root)
    }

    // ---- structure ---------------------------------------------------

    /// Appends a new empty content node to the root list.
    pub fn create_root(&mut self, title: impl Into<String>) -> NodeId {
        let node = Node::new_content(title, "", None);
        let id = node.id;
        self.store.insert(node);
        self.store.attach(id, None, None);
        info!("event=node_create module=service status=ok node_id={id} parent_id=none");
        self.persist("node_create");
        id
    }

    /// Appends a new empty content node under `parent_id`.
    pub fn create_child(
        &mut self,
        parent_id: NodeId,
        title: impl Into<String>,
    ) -> ServiceResult<NodeId> {
        self.check_parent(Some(parent_id))
            .map_err(|err| rejected("node_create", err))?;

        let node = Node::new_content(title, "", Some(parent_id));
        let id = node.id;
        self.store.insert(node);
        self.store.attach(id, Some(parent_id), None);
        self.touch(parent_id);
        info!("event=node_create module=service status=ok node_id={id} parent_id={parent_id}");
        self.persist("node_create");
        Ok(id)
    }

    /// Moves `node_id` under `new_parent_id` (or to the root list) at
    /// `index`, appending when `index` is `None` or past the end.
    ///
    /// `index` counts siblings after the node has been removed from its old
    /// position.
    pub fn move_node(
        &mut self,
        node_id: NodeId,
        new_parent_id: Option<NodeId>,
        index: Option<usize>,
    ) -> ServiceResult<()> {
        self.check_move(node_id, new_parent_id)
            .map_err(|err| rejected("node_move", err))?;
        self.relocate(node_id, new_parent_id, |_| index);
        info!(
            "event=node_move module=service status=ok node_id={node_id} parent_id={}",
            display_parent(new_parent_id)
        );
        self.persist("node_move");
        Ok(())
    }

    /// Places `node_id` right before or after `target_id`, adopting the
    /// target's parent.
    pub fn reorder(
        &mut self,
        node_id: NodeId,
        target_id: NodeId,
        position: DropPosition,
    ) -> ServiceResult<()> {
        let target_parent = self
            .store
            .get(target_id)
            .map(|target| target.parent)
            .ok_or(TreeServiceError::NodeNotFound(target_id))
            .map_err(|err| rejected("node_reorder", err))?;
        if node_id == target_id {
            return Err(rejected(
                "node_reorder",
                TreeServiceError::SelfReference(node_id),
            ));
        }
        self.check_move(node_id, target_parent)
            .map_err(|err| rejected("node_reorder", err))?;

        self.relocate(node_id, target_parent, |siblings| {
            siblings
                .iter()
                .position(|id| *id == target_id)
                .map(|index| match position {
                    DropPosition::Before => index,
                    DropPosition::After => index + 1,
                })
        });
        info!(
            "event=node_reorder module=service status=ok node_id={node_id} target_id={target_id}"
        );
        self.persist("node_reorder");
        Ok(())
    }

    /// Creates a symlink to `target_id` under `parent_id`.
    ///
    /// Linking to a symlink links to its resolved target instead.
    pub fn create_symlink(
        &mut self,
        target_id: NodeId,
        parent_id: Option<NodeId>,
    ) -> ServiceResult<NodeId> {
        let (target_id, title) = self
            .check_symlink(target_id, parent_id)
            .map_err(|err| rejected("symlink_create", err))?;

        let link = Node::new_symlink(title, target_id, parent_id);
        let id = link.id;
        self.store.insert(link);
        self.store.attach(id, parent_id, None);
        if let Some(parent_id) = parent_id {
            self.touch(parent_id);
        }
        info!(
            "event=symlink_create module=service status=ok node_id={id} target_id={target_id} parent_id={}",
            display_parent(parent_id)
        );
        self.persist("symlink_create");
        Ok(id)
    }

    /// Deep-copies `node_id` under `new_parent_id` with fresh ids.
    ///
    /// A symlink duplicates into a content node holding its target's
    /// content. Symlinks nested in a copied subtree stay symlinks; those
    /// pointing inside the subtree are redirected to the copies.
    pub fn duplicate(
        &mut self,
        node_id: NodeId,
        new_parent_id: Option<NodeId>,
    ) -> ServiceResult<NodeId> {
        let copies = self
            .plan_duplicate(node_id, new_parent_id)
            .map_err(|err| rejected("node_duplicate", err))?;
        let Some(root_copy) = copies.first().map(|node| node.id) else {
            return Err(rejected(
                "node_duplicate",
                TreeServiceError::NodeNotFound(node_id),
            ));
        };

        let count = copies.len();
        for copy in copies {
            self.store.insert(copy);
        }
        self.store.attach(root_copy, new_parent_id, None);
        if let Some(parent_id) = new_parent_id {
            self.touch(parent_id);
        }
        info!(
            "event=node_duplicate module=service status=ok node_id={node_id} copy_id={root_copy} nodes={count}"
        );
        self.persist("node_duplicate");
        Ok(root_copy)
    }

    /// Deletes a symlink alone, or a content node with its whole subtree.
    ///
    /// Symlinks elsewhere that pointed into the subtree become broken.
    /// Returns the former parent so callers can pick the next selection.
    pub fn delete(&mut self, node_id: NodeId) -> ServiceResult<Option<NodeId>> {
        let node = self
            .store
            .get(node_id)
            .ok_or(TreeServiceError::NodeNotFound(node_id))
            .map_err(|err| rejected("node_delete", err))?;
        let parent_id = node.parent;
        let is_symlink = node.is_symlink();

        if let Some(root_id) = self.branch_root {
            if node_id == root_id || is_ancestor(&self.store, root_id, node_id) {
                return Err(rejected(
                    "node_delete",
                    TreeServiceError::BranchRootProtected(node_id),
                ));
            }
        }

        let doomed = if is_symlink {
            vec![node_id]
        } else {
            self.store.descendants(node_id)
        };
        self.store.detach(node_id);
        for id in &doomed {
            self.store.remove(*id);
        }
        if let Some(parent_id) = parent_id {
            self.touch(parent_id);
        }
        info!(
            "event=node_delete module=service status=ok node_id={node_id} removed={}",
            doomed.len()
        );
        self.persist("node_delete");
        Ok(parent_id)
    }

    // ---- content edits -----------------------------------------------

    pub fn update_title(&mut self, node_id: NodeId, title: impl Into<String>) -> ServiceResult<()> {
        let node = self
            .store
            .get_mut(node_id)
            .ok_or_else(|| rejected("node_title", TreeServiceError::NodeNotFound(node_id)))?;
        node.title = normalize_title(title.into());
        node.touch();
        info!("event=node_title module=service status=ok node_id={node_id}");
        self.persist("node_title");
        Ok(())
    }

    /// Writes content to the node, or through a symlink to its target.
    pub fn update_content(
        &mut self,
        node_id: NodeId,
        content: impl Into<String>,
    ) -> ServiceResult<()> {
        let source_id = self
            .content_source(node_id)
            .map_err(|err| rejected("node_content", err))?;
        if let Some(source) = self.store.get_mut(source_id) {
            source.body = NodeBody::Content {
                content: content.into(),
            };
            source.touch();
        }
        info!(
            "event=node_content module=service status=ok node_id={node_id} source_id={source_id}"
        );
        self.persist("node_content");
        Ok(())
    }

    /// Replaces the node's tags. Blank tags are rejected.
    pub fn set_tags(&mut self, node_id: NodeId, tags: &[String]) -> ServiceResult<()> {
        let mut normalized = BTreeSet::new();
        for tag in tags {
            let value = normalize_tag(tag)
                .ok_or_else(|| rejected("node_tags", TreeServiceError::InvalidTag(tag.clone())))?;
            normalized.insert(value);
        }
        let node = self
            .store
            .get_mut(node_id)
            .ok_or_else(|| rejected("node_tags", TreeServiceError::NodeNotFound(node_id)))?;
        let count = normalized.len();
        node.tags = normalized;
        node.touch();
        info!("event=node_tags module=service status=ok node_id={node_id} tags={count}");
        self.persist("node_tags");
        Ok(())
    }

    /// Stores the blob, then records its metadata on the content source.
    ///
    /// A blob write failure is returned and nothing is recorded.
    pub fn add_attachment(
        &mut self,
        node_id: NodeId,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: &[u8],
    ) -> ServiceResult<AttachmentMeta> {
        let source_id = self
            .content_source(node_id)
            .map_err(|err| rejected("attachment_add", err))?;
        let meta = AttachmentMeta {
            id: Uuid::new_v4(),
            name: name.into(),
            mime_type: mime_type.into(),
            size: bytes.len() as u64,
        };
        self.storage
            .save_attachment_blob(meta.id, bytes)
            .map_err(|err| {
                error!(
                    "event=attachment_add module=service status=error node_id={node_id} error={err}"
                );
                err
            })?;
        if let Some(source) = self.store.get_mut(source_id) {
            source.attachments.push(meta.clone());
            source.touch();
        }
        info!(
            "event=attachment_add module=service status=ok node_id={source_id} attachment_id={} size={}",
            meta.id, meta.size
        );
        self.persist("attachment_add");
        Ok(meta)
    }

    /// Strips attachment metadata. The blob is left to orphan cleanup.
    pub fn remove_attachment(
        &mut self,
        node_id: NodeId,
        attachment_id: AttachmentId,
    ) -> ServiceResult<()> {
        let source_id = self
            .content_source(node_id)
            .map_err(|err| rejected("attachment_remove", err))?;
        let source = self.store.get_mut(source_id).ok_or_else(|| {
            rejected("attachment_remove", TreeServiceError::NodeNotFound(source_id))
        })?;
        let before = source.attachments.len();
        source.attachments.retain(|meta| meta.id != attachment_id);
        if source.attachments.len() == before {
            return Err(rejected(
                "attachment_remove",
                TreeServiceError::AttachmentNotFound {
                    node_id: source_id,
                    attachment_id,
                },
            ));
        }
        source.touch();
        info!(
            "event=attachment_remove module=service status=ok node_id={source_id} attachment_id={attachment_id}"
        );
        self.persist("attachment_remove");
        Ok(())
    }

    /// Loads one attachment blob, `None` when it is missing.
    pub fn attachment_bytes(&self, attachment_id: AttachmentId) -> ServiceResult<Option<Vec<u8>>> {
        Ok(self.storage.load_attachment_blob(attachment_id)?)
    }

    // ---- maintenance -------------------------------------------------

    /// Deletes unreachable nodes and unreferenced blobs, and strips metadata
    /// whose blob is missing.
    ///
    /// Reachability follows children and symlink-target edges from the root
    /// list. Nodes kept only through a symlink whose parent was removed are
    /// promoted to roots.
    pub fn cleanup_orphans(&mut self) -> ServiceResult<CleanupReport> {
        let stored_blobs: HashSet<AttachmentId> =
            self.storage.list_attachment_ids()?.into_iter().collect();

        let mut reachable = HashSet::new();
        let mut stack: Vec<NodeId> = self.store.root_nodes().to_vec();
        while let Some(id) = stack.pop() {
            let Some(node) = self.store.get(id) else {
                continue;
            };
            if !reachable.insert(id) {
                continue;
            }
            stack.extend(node.children.iter().copied());
            if let Some(target_id) = node.target_id() {
                stack.push(target_id);
            }
        }

        let mut report = CleanupReport {
            removed_nodes: self
                .store
                .nodes()
                .map(|node| node.id)
                .filter(|id| !reachable.contains(id))
                .collect(),
            ..CleanupReport::default()
        };
        for id in &report.removed_nodes {
            self.store.remove(*id);
        }
        let promoted: Vec<NodeId> = self
            .store
            .nodes()
            .filter(|node| {
                node.parent
                    .is_some_and(|parent_id| !self.store.contains(parent_id))
            })
            .map(|node| node.id)
            .collect();
        for id in &promoted {
            if let Some(node) = self.store.get_mut(*id) {
                node.parent = None;
            }
            self.store.attach(*id, None, None);
        }
        let removed: HashSet<NodeId> = report.removed_nodes.iter().copied().collect();
        for node in self.store.nodes_mut() {
            node.children.retain(|child| !removed.contains(child));
        }

        let referenced: HashSet<AttachmentId> = self
            .store
            .nodes()
            .flat_map(|node| node.attachments.iter().map(|meta| meta.id))
            .collect();
        let mut orphan_blobs: Vec<AttachmentId> = stored_blobs
            .iter()
            .filter(|id| !referenced.contains(id))
            .copied()
            .collect();
        orphan_blobs.sort();
        for blob_id in orphan_blobs {
            match self.storage.delete_attachment_blob(blob_id) {
                Ok(()) => report.removed_blobs.push(blob_id),
                Err(err) => warn!(
                    "event=orphan_cleanup module=service status=error attachment_id={blob_id} error={err}"
                ),
            }
        }

        for node in self.store.nodes_mut() {
            let before = node.attachments.len();
            node.attachments.retain(|meta| stored_blobs.contains(&meta.id));
            let stripped = before - node.attachments.len();
            if stripped > 0 {
                report.stripped_attachments += stripped;
                node.touch();
            }
        }

        info!(
            "event=orphan_cleanup module=service status=ok nodes={} blobs={} stripped={} promoted={}",
            report.removed_nodes.len(),
            report.removed_blobs.len(),
            report.stripped_attachments,
            promoted.len()
        );
        if !report.removed_nodes.is_empty() || report.stripped_attachments > 0 {
            self.persist("orphan_cleanup");
        }
        Ok(report)
    }

    /// Deletes every symlink whose target is missing. Returns their ids.
    pub fn remove_broken_symlinks(&mut self) -> Vec<NodeId> {
        let broken: Vec<NodeId> = self
            .store
            .nodes()
            .filter(|node| {
                node.target_id()
                    .is_some_and(|target_id| !self.store.contains(target_id))
            })
            .map(|node| node.id)
            .collect();
        for id in &broken {
            let parent_id = self.store.get(*id).and_then(|node| node.parent);
            self.store.detach(*id);
            self.store.remove(*id);
            if let Some(parent_id) = parent_id {
                self.touch(parent_id);
            }
        }
        info!(
            "event=broken_symlink_cleanup module=service status=ok removed={}",
            broken.len()
        );
        if !broken.is_empty() {
            self.persist("broken_symlink_cleanup");
        }
        broken
    }

    // ---- internals ---------------------------------------------------

    /// Saves the whole store. Failures are logged and flagged, never
    /// returned, and in-memory state is kept.
    pub(super) fn persist(&mut self, event: &'static str) {
        match self
            .storage
            .save_all(self.store.node_map(), self.store.root_nodes())
        {
            Ok(()) => {
                self.unsaved_changes = false;
                if let Some(notifier) = &self.notifier {
                    notifier.publish(ChangeEvent::data_changed());
                }
            }
            Err(err) => {
                self.unsaved_changes = true;
                error!(
                    "event=persist module=service status=error trigger={event} nodes={} error={err}",
                    self.store.len()
                );
            }
        }
    }

    pub(super) fn touch(&mut self, id: NodeId) {
        if let Some(node) = self.store.get_mut(id) {
            node.touch();
        }
    }

    /// Destination must exist and may not be a symlink.
    pub(super) fn check_parent(&self, parent_id: Option<NodeId>) -> ServiceResult<()> {
        let Some(parent_id) = parent_id else {
            return Ok(());
        };
        match self.store.get(parent_id) {
            None => Err(TreeServiceError::ParentNotFound(parent_id)),
            Some(parent) if parent.is_symlink() => {
                Err(TreeServiceError::ParentIsSymlink(parent_id))
            }
            Some(_) => Ok(()),
        }
    }

    fn check_move(&self, node_id: NodeId, new_parent_id: Option<NodeId>) -> ServiceResult<()> {
        if !self.store.contains(node_id) {
            return Err(TreeServiceError::NodeNotFound(node_id));
        }
        let Some(parent_id) = new_parent_id else {
            return Ok(());
        };
        if parent_id == node_id {
            return Err(TreeServiceError::SelfReference(node_id));
        }
        self.check_parent(Some(parent_id))?;
        if is_ancestor(&self.store, parent_id, node_id) {
            return Err(TreeServiceError::DescendantTarget { node_id, parent_id });
        }
        if would_move_cycle(&self.store, node_id, Some(parent_id)) {
            return Err(TreeServiceError::CycleDetected { node_id, parent_id });
        }
        Ok(())
    }

    /// Detaches `node_id` and reattaches it at the index chosen from the
    /// destination's sibling list (as seen after detaching).
    fn relocate(
        &mut self,
        node_id: NodeId,
        new_parent_id: Option<NodeId>,
        choose_index: impl FnOnce(&[NodeId]) -> Option<usize>,
    ) {
        let old_parent = self.store.get(node_id).and_then(|node| node.parent);
        self.store.detach(node_id);
        let index = choose_index(self.store.siblings(new_parent_id));
        self.store.attach(node_id, new_parent_id, index);
        self.touch(node_id);
        for parent_id in [old_parent, new_parent_id].into_iter().flatten() {
            self.touch(parent_id);
        }
    }

    /// Resolves the final target and symlink title, rejecting cycles and
    /// duplicates.
    fn check_symlink(
        &self,
        target_id: NodeId,
        parent_id: Option<NodeId>,
    ) -> ServiceResult<(NodeId, String)> {
        let target = self
            .store
            .get(target_id)
            .ok_or(TreeServiceError::TargetNotFound(target_id))?;
        let final_target = match target.target_id() {
            Some(next) => self
                .store
                .get(next)
                .ok_or(TreeServiceError::TargetNotFound(next))?,
            None => target,
        };
        let target_id = final_target.id;

        self.check_parent(parent_id)?;
        if let Some(parent_id) = parent_id {
            if would_symlink_cycle(&self.store, target_id, Some(parent_id)) {
                return Err(TreeServiceError::CycleDetected {
                    node_id: target_id,
                    parent_id,
                });
            }
        }
        let existing = self.store.siblings(parent_id).iter().find(|sibling| {
            self.store
                .get(**sibling)
                .and_then(|node| node.target_id())
                == Some(target_id)
        });
        if let Some(existing_id) = existing {
            return Err(TreeServiceError::DuplicateLink {
                target_id,
                parent_id,
                existing_id: *existing_id,
            });
        }
        Ok((target_id, final_target.title.clone()))
    }

    /// Builds detached copies, root copy first, without touching the store.
    fn plan_duplicate(
        &self,
        node_id: NodeId,
        new_parent_id: Option<NodeId>,
    ) -> ServiceResult<Vec<Node>> {
        let original = self
            .store
            .get(node_id)
            .ok_or(TreeServiceError::NodeNotFound(node_id))?;
        self.check_parent(new_parent_id)?;

        if let Some(target_id) = original.target_id() {
            let target = self
                .store
                .get(target_id)
                .ok_or(TreeServiceError::TargetNotFound(target_id))?;
            let mut copy = Node::new_content(
                format!("{}{COPY_SUFFIX}", original.title),
                target.own_content().unwrap_or_default(),
                None,
            );
            copy.tags = original.tags.clone();
            copy.attachments = target.attachments.clone();
            return Ok(vec![copy]);
        }

        let subtree = self.store.descendants(node_id);
        let ids: HashMap<NodeId, NodeId> =
            subtree.iter().map(|old| (*old, Uuid::new_v4())).collect();

        if let Some(parent_id) = new_parent_id {
            let destination_ancestors = ancestor_set(&self.store, parent_id);
            for old in &subtree {
                let external = self
                    .store
                    .get(*old)
                    .and_then(|node| node.target_id())
                    .filter(|target_id| !ids.contains_key(target_id));
                if external.is_some_and(|target_id| destination_ancestors.contains(&target_id)) {
                    return Err(TreeServiceError::CycleDetected { node_id, parent_id });
                }
            }
        }

        let mut copies = Vec::with_capacity(subtree.len());
        for old in &subtree {
            let Some(source) = self.store.get(*old) else {
                continue;
            };
            let Some(new_id) = ids.get(old).copied() else {
                continue;
            };
            let body = match &source.body {
                NodeBody::Symlink { target_id } => NodeBody::Symlink {
                    target_id: ids.get(target_id).copied().unwrap_or(*target_id),
                },
                content => content.clone(),
            };
            let (title, parent) = if *old == node_id {
                (format!("{}{COPY_SUFFIX}", source.title), None)
            } else {
                (
                    source.title.clone(),
                    source.parent.and_then(|parent| ids.get(&parent).copied()),
                )
            };
            let mut copy = Node::with_body(new_id, body, title, parent);
            copy.children = source
                .children
                .iter()
                .filter_map(|child| ids.get(child).copied())
                .collect();
            copy.tags = source.tags.clone();
            copy.attachments = source.attachments.clone();
            copies.push(copy);
        }
        Ok(copies)
    }

    /// Node whose content an edit on `node_id` goes to.
    fn content_source(&self, node_id: NodeId) -> ServiceResult<NodeId> {
        let node = self
            .store
            .get(node_id)
            .ok_or(TreeServiceError::NodeNotFound(node_id))?;
        match node.target_id() {
            Some(target_id) if self.store.contains(target_id) => Ok(target_id),
            Some(target_id) => Err(TreeServiceError::TargetNotFound(target_id)),
            None => Ok(node_id),
        }
    }
}

/// Logs a rejected operation with its reason code.
pub(super) fn rejected(event: &'static str, err: TreeServiceError) -> TreeServiceError {
    warn!(
        "event={event} module=service status=rejected reason={}",
        err.reason_code()
    );
    err
}

fn display_parent(parent_id: Option<NodeId>) -> String {
    parent_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "none".to_string())
}
