//! Ordered schema history for the node database.
//!
//! # Schema
//! - `0001_nodes`: one row per node. A `CHECK` ties `kind` to `target_id`, so
//!   content nodes never carry a target and symlinks always do. Root order
//!   lives in `root_nodes`, keyed by position, with each node listed once.
//! - `0002_attachment_blobs`: blob bytes keyed by attachment id, independent
//!   of node rows.
//! - `0003_node_indexes`: lookups by parent and by symlink target.
//! - `0004_store_meta`: the snapshot revision written with every save.
//!
//! # Invariants
//! - `version` values must remain monotonic.
//! - Applied migration version is mirrored to `PRAGMA user_version`.
//! - Pending migrations are applied in one transaction.

use crate::db::{DbError, DbResult};
use log::info;
use rusqlite::Connection;

#[derive(Debug, Clone, Copy)]
struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "nodes",
        sql: include_str!("0001_nodes.sql"),
    },
    Migration {
        version: 2,
        name: "attachment_blobs",
        sql: include_str!("0002_attachment_blobs.sql"),
    },
    Migration {
        version: 3,
        name: "node_indexes",
        sql: include_str!("0003_node_indexes.sql"),
    },
    Migration {
        version: 4,
        name: "store_meta",
        sql: include_str!("0004_store_meta.sql"),
    },
];

/// Tables node storage expects once every migration has run.
pub const NODE_STORE_TABLES: &[&str] = &["nodes", "root_nodes", "attachment_blobs", "store_meta"];

/// Returns the latest migration version known by this binary.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

/// Applies all pending migrations on the provided connection.
///
/// A database stamped with a newer version than this binary knows is
/// refused rather than opened read-write.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    let current_version = current_user_version(conn)?;
    let latest = latest_version();

    if current_version > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: current_version,
            latest_supported: latest,
        });
    }

    if current_version == latest {
        return Ok(());
    }

    let tx = conn.transaction()?;
    let pending = MIGRATIONS
        .iter()
        .filter(|migration| migration.version > current_version);
    for migration in pending {
        tx.execute_batch(migration.sql)?;
        tx.execute_batch(&format!("PRAGMA user_version = {};", migration.version))?;
        info!(
            "event=db_migrate module=db status=applied version={} name={}",
            migration.version, migration.name
        );
    }
    tx.commit()?;

    Ok(())
}

fn current_user_version(conn: &Connection) -> DbResult<u32> {
    let version = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    Ok(version)
}
