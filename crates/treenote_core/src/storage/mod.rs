//! Persistence collaborators for the node store.
//!
//! # Responsibility
//! - Define the storage contract the tree service persists through.
//! - Provide a SQLite primary store, a plain JSON document fallback, an
//!   in-memory store, and a combinator that falls back on write failure.
//!
//! # Invariants
//! - `save_all` replaces the whole persisted node map (last write wins).
//! - Every successful `save_all` advances the store's snapshot revision, an
//!   epoch-millisecond stamp that never moves backwards.
//! - Attachment blobs have a lifecycle independent of node records.

use crate::db::DbError;
use crate::model::node::{now_epoch_ms, AttachmentId, NodeId};
use crate::store::{NodeMap, NodeStore};
use std::error::Error;
use std::fmt::{Display, Formatter};

mod fallback;
mod json_file;
mod memory;
mod sqlite;

pub use fallback::FallbackStorage;
pub use json_file::JsonFileStorage;
pub use memory::MemoryStorage;
pub use sqlite::SqliteNodeStorage;

/// Result type used by storage collaborators.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors from persistence collaborators.
#[derive(Debug)]
pub enum StorageError {
    /// SQLite/bootstrap failure.
    Db(DbError),
    /// File-system failure in file-backed storage.
    Io(std::io::Error),
    /// Serialization failure of persisted documents or columns.
    Json(serde_json::Error),
    /// Persisted data cannot be converted into a valid node record.
    InvalidData(String),
    /// Storage refuses writes (not migrated, read-only, simulated outage).
    Unavailable(String),
}

impl Display for StorageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Io(err) => write!(f, "storage io error: {err}"),
            Self::Json(err) => write!(f, "storage serialization error: {err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted node data: {message}"),
            Self::Unavailable(message) => write!(f, "storage unavailable: {message}"),
        }
    }
}

impl Error for StorageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Io(err) => Some(err),
            Self::Json(err) => Some(err),
            Self::InvalidData(_) => None,
            Self::Unavailable(_) => None,
        }
    }
}

impl From<DbError> for StorageError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<std::io::Error> for StorageError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

/// Storage contract for node records and attachment blobs.
pub trait NodeStorage {
    /// Persists the full node map and root order.
    fn save_all(&mut self, nodes: &NodeMap, root_nodes: &[NodeId]) -> StorageResult<()>;
    /// Loads the full node map and root order.
    fn load_all(&self) -> StorageResult<NodeStore>;
    /// Stores one blob, replacing any existing bytes for `id`.
    fn save_attachment_blob(&mut self, id: AttachmentId, bytes: &[u8]) -> StorageResult<()>;
    /// Loads one blob. `Ok(None)` when it does not exist.
    fn load_attachment_blob(&self, id: AttachmentId) -> StorageResult<Option<Vec<u8>>>;
    /// Deletes one blob. Deleting a missing blob is not an error.
    fn delete_attachment_blob(&mut self, id: AttachmentId) -> StorageResult<()>;
    /// Lists ids of all stored blobs.
    fn list_attachment_ids(&self) -> StorageResult<Vec<AttachmentId>>;
    /// Revision of the persisted snapshot. `0` when nothing was saved yet.
    fn revision(&self) -> StorageResult<u64>;
    /// Brings replicas up to date before the first load. No-op by default.
    fn reconcile(&mut self) -> StorageResult<()> {
        Ok(())
    }
}

/// Next snapshot revision after `previous`.
pub(crate) fn next_revision(previous: u64) -> u64 {
    let now = u64::try_from(now_epoch_ms()).unwrap_or(0);
    now.max(previous.saturating_add(1))
}

impl<T: NodeStorage + ?Sized> NodeStorage for Box<T> {
    fn save_all(&mut self, nodes: &NodeMap, root_nodes: &[NodeId]) -> StorageResult<()> {
        (**self).save_all(nodes, root_nodes)
    }

    fn load_all(&self) -> StorageResult<NodeStore> {
        (**self).load_all()
    }

    fn save_attachment_blob(&mut self, id: AttachmentId, bytes: &[u8]) -> StorageResult<()> {
        (**self).save_attachment_blob(id, bytes)
    }

    fn load_attachment_blob(&self, id: AttachmentId) -> StorageResult<Option<Vec<u8>>> {
        (**self).load_attachment_blob(id)
    }

    fn delete_attachment_blob(&mut self, id: AttachmentId) -> StorageResult<()> {
        (**self).delete_attachment_blob(id)
    }

    fn list_attachment_ids(&self) -> StorageResult<Vec<AttachmentId>> {
        (**self).list_attachment_ids()
    }

    fn revision(&self) -> StorageResult<u64> {
        (**self).revision()
    }

    fn reconcile(&mut self) -> StorageResult<()> {
        (**self).reconcile()
    }
}

#[cfg(test)]
mod tests {
    use super::next_revision;

    #[test]
    fn revisions_strictly_increase() {
        let first = next_revision(0);
        assert!(first > 0);
        assert!(next_revision(first) > first);
        assert_eq!(next_revision(u64::MAX - 1), u64::MAX);
    }
}
