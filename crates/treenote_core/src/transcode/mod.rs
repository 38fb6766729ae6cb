//! Import/export of portable tree documents.
//!
//! # Responsibility
//! - Serialize the forest or one branch to a self-describing JSON document.
//! - Validate incoming documents and remap every id before anything touches
//!   the live store.
//!
//! # Invariants
//! - Import is two-pass: all id tables are built and every reference is
//!   rewritten first; insertion happens afterwards in one step.
//! - A document that fails validation leaves the live store untouched.
//! - Export never inlines nodes outside the exported closure; out-of-closure
//!   symlink targets are kept as dangling references.

use crate::model::node::NodeId;
use std::error::Error;
use std::fmt::{Display, Formatter};

mod document;
mod export;
mod import;
pub mod refs;

pub use document::{ExportDocument, DOCUMENT_FORMAT, DOCUMENT_VERSION};
pub use export::{export_document, BundledAttachment, ExportBundle, ExportScope, ARCHIVE_DOCUMENT_PATH};
pub use import::{prepare_import, ImportOptions, ImportReport, PreparedImport};

/// Result type for transcoder APIs.
pub type TranscodeResult<T> = Result<T, TranscodeError>;

/// Transcoder failures. Every variant aborts the whole operation.
#[derive(Debug)]
pub enum TranscodeError {
    Json(serde_json::Error),
    /// The `format` marker is missing or names another document type.
    WrongDocumentType(String),
    UnsupportedVersion(u32),
    NodeCountMismatch { declared: usize, actual: usize },
    TooManyNodes { count: usize, limit: usize },
    /// Referential problem inside the document.
    InvalidDocument(String),
    StructuralCycle(NodeId),
    /// Requested export root or import destination does not exist.
    NodeNotFound(NodeId),
    DestinationIsSymlink(NodeId),
    /// An out-of-document symlink target is an ancestor of the destination.
    WouldCycle { symlink_id: NodeId, target_id: NodeId },
}

impl Display for TranscodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json(err) => write!(f, "document is not valid json: {err}"),
            Self::WrongDocumentType(found) => {
                write!(f, "not a {DOCUMENT_FORMAT} document (format `{found}`)")
            }
            Self::UnsupportedVersion(version) => write!(
                f,
                "document version {version} is newer than supported version {DOCUMENT_VERSION}"
            ),
            Self::NodeCountMismatch { declared, actual } => write!(
                f,
                "document declares {declared} nodes but contains {actual}"
            ),
            Self::TooManyNodes { count, limit } => {
                write!(f, "document has {count} nodes, limit is {limit}")
            }
            Self::InvalidDocument(message) => write!(f, "invalid document: {message}"),
            Self::StructuralCycle(id) => {
                write!(f, "document parent chain loops at node {id}")
            }
            Self::NodeNotFound(id) => write!(f, "node not found: {id}"),
            Self::DestinationIsSymlink(id) => {
                write!(f, "cannot import under symlink {id}")
            }
            Self::WouldCycle {
                symlink_id,
                target_id,
            } => write!(
                f,
                "imported symlink {symlink_id} would target ancestor {target_id} of the destination"
            ),
        }
    }
}

impl Error for TranscodeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for TranscodeError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}
