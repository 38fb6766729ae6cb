//! Core of the TreeNote hierarchical notes engine.
//!
//! Owns the node tree with symlink semantics: invariant checks, mutations,
//! branch-scoped views, instance addressing and document transcoding. UI
//! shells and persistence backends plug in through the types exported here.

pub mod config;
pub mod db;
pub mod graph;
pub mod logging;
pub mod model;
pub mod search;
pub mod service;
pub mod storage;
pub mod store;
pub mod sync;
pub mod transcode;
pub mod view;

pub use config::{ConfigError, CoreConfig};
pub use graph::{
    check_integrity, is_ancestor, would_move_cycle, would_symlink_cycle, IntegrityReport,
};
pub use logging::{
    default_log_level, init_from_config, init_logging, logging_status, LoggingError,
};
pub use model::node::{AttachmentId, AttachmentMeta, Node, NodeBody, NodeId, NodeKind};
pub use search::{find_by_tag, list_tags, search_text, SearchError, SearchHit, TagCount, TextQuery};
pub use service::{CleanupReport, DropPosition, TreeService, TreeServiceError};
pub use storage::{
    FallbackStorage, JsonFileStorage, MemoryStorage, NodeStorage, SqliteNodeStorage, StorageError,
    StorageResult,
};
pub use store::{LinkState, NodeMap, NodeStore, Resolved};
pub use sync::notifier::{ChangeBus, ChangeEvent, ChangeNotifier};
pub use transcode::{
    ExportBundle, ExportDocument, ExportScope, ImportOptions, ImportReport, TranscodeError,
};
pub use view::branch::{BranchView, LinkStatus};
pub use view::instance::{find_instance_key_for_node, InstanceKey, InstanceKeyError, TreeUiState};
pub use view::rows::{visible_rows, RowState, VisibleRow};
pub use view::state::{ViewState, ViewStateError};

/// Minimal health-check API for shells.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
