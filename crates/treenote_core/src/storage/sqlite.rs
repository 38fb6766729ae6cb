//! SQLite-backed primary node storage.
//!
//! # Invariants
//! - `save_all` rewrites `nodes` and `root_nodes` in one immediate
//!   transaction; a failed write leaves the previous snapshot intact.
//! - Read paths reject invalid persisted rows instead of masking them.
//! - `children`, `tags` and `attachments` columns hold JSON arrays.
//! - The snapshot revision in `store_meta` advances inside the same
//!   transaction as the node rows.

use super::{next_revision, NodeStorage, StorageError, StorageResult};
use crate::db::migrations::{latest_version, NODE_STORE_TABLES};
use crate::model::node::{AttachmentId, AttachmentMeta, Node, NodeBody, NodeId, NodeKind};
use crate::store::{NodeMap, NodeStore};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::collections::BTreeSet;
use uuid::Uuid;

const NODE_COLUMNS: &[&str] = &[
    "id",
    "kind",
    "parent_id",
    "target_id",
    "title",
    "content",
    "children",
    "tags",
    "attachments",
    "created_at",
    "modified_at",
];

/// SQLite-backed node storage over a migrated connection.
pub struct SqliteNodeStorage<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteNodeStorage<'conn> {
    /// Creates storage from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> StorageResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl NodeStorage for SqliteNodeStorage<'_> {
    fn save_all(&mut self, nodes: &NodeMap, root_nodes: &[NodeId]) -> StorageResult<()> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        tx.execute("DELETE FROM root_nodes;", [])?;
        tx.execute("DELETE FROM nodes;", [])?;

        {
            let mut insert = tx.prepare(
                "INSERT INTO nodes (
                    id,
                    kind,
                    parent_id,
                    target_id,
                    title,
                    content,
                    children,
                    tags,
                    attachments,
                    created_at,
                    modified_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11);",
            )?;
            for node in nodes.values() {
                let (content, target_id) = match &node.body {
                    NodeBody::Content { content } => (Some(content.as_str()), None),
                    NodeBody::Symlink { target_id } => (None, Some(target_id.to_string())),
                };
                insert.execute(params![
                    node.id.to_string(),
                    node.kind().as_str(),
                    node.parent.map(|value| value.to_string()),
                    target_id,
                    node.title,
                    content,
                    serde_json::to_string(&node.children)?,
                    serde_json::to_string(&node.tags)?,
                    serde_json::to_string(&node.attachments)?,
                    node.created,
                    node.modified,
                ])?;
            }

            let mut insert_root =
                tx.prepare("INSERT INTO root_nodes (position, node_id) VALUES (?1, ?2);")?;
            for (position, id) in root_nodes.iter().enumerate() {
                insert_root.execute(params![position as i64, id.to_string()])?;
            }
        }

        let revision = next_revision(read_revision(&tx)?);
        tx.execute(
            "INSERT INTO store_meta (key, value) VALUES ('revision', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
            [revision_to_sql(revision)],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn load_all(&self) -> StorageResult<NodeStore> {
        let mut nodes = NodeMap::new();
        let mut stmt = self.conn.prepare(
            "SELECT
                id,
                kind,
                parent_id,
                target_id,
                title,
                content,
                children,
                tags,
                attachments,
                created_at,
                modified_at
             FROM nodes;",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let node = parse_node_row(row)?;
            nodes.insert(node.id, node);
        }

        let mut root_nodes = Vec::new();
        let mut stmt = self
            .conn
            .prepare("SELECT node_id FROM root_nodes ORDER BY position ASC;")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let value: String = row.get(0)?;
            root_nodes.push(parse_uuid(&value, "root_nodes.node_id")?);
        }

        Ok(NodeStore::from_parts(nodes, root_nodes))
    }

    fn save_attachment_blob(&mut self, id: AttachmentId, bytes: &[u8]) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO attachment_blobs (id, bytes, size)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET bytes = excluded.bytes, size = excluded.size;",
            params![id.to_string(), bytes, bytes.len() as i64],
        )?;
        Ok(())
    }

    fn load_attachment_blob(&self, id: AttachmentId) -> StorageResult<Option<Vec<u8>>> {
        let bytes = self
            .conn
            .query_row(
                "SELECT bytes FROM attachment_blobs WHERE id = ?1;",
                [id.to_string()],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(bytes)
    }

    fn delete_attachment_blob(&mut self, id: AttachmentId) -> StorageResult<()> {
        self.conn.execute(
            "DELETE FROM attachment_blobs WHERE id = ?1;",
            [id.to_string()],
        )?;
        Ok(())
    }

    fn list_attachment_ids(&self) -> StorageResult<Vec<AttachmentId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM attachment_blobs ORDER BY id ASC;")?;
        let mut rows = stmt.query([])?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            let value: String = row.get(0)?;
            ids.push(parse_uuid(&value, "attachment_blobs.id")?);
        }
        Ok(ids)
    }

    fn revision(&self) -> StorageResult<u64> {
        read_revision(self.conn)
    }
}

fn read_revision(conn: &Connection) -> StorageResult<u64> {
    let value = conn
        .query_row(
            "SELECT value FROM store_meta WHERE key = 'revision';",
            [],
            |row| row.get::<_, i64>(0),
        )
        .optional()?
        .unwrap_or(0);
    u64::try_from(value).map_err(|_| {
        StorageError::InvalidData(format!("negative revision `{value}` in store_meta"))
    })
}

fn revision_to_sql(revision: u64) -> i64 {
    i64::try_from(revision).unwrap_or(i64::MAX)
}

fn parse_node_row(row: &Row<'_>) -> StorageResult<Node> {
    let id_text: String = row.get("id")?;
    let id = parse_uuid(&id_text, "nodes.id")?;

    let kind_text: String = row.get("kind")?;
    let kind = NodeKind::parse(&kind_text).ok_or_else(|| {
        StorageError::InvalidData(format!("invalid node kind `{kind_text}` in nodes.kind"))
    })?;

    let parent = row
        .get::<_, Option<String>>("parent_id")?
        .map(|value| parse_uuid(&value, "nodes.parent_id"))
        .transpose()?;
    let target_id = row
        .get::<_, Option<String>>("target_id")?
        .map(|value| parse_uuid(&value, "nodes.target_id"))
        .transpose()?;

    let body = match (kind, target_id) {
        (NodeKind::Node, None) => NodeBody::Content {
            content: row.get::<_, Option<String>>("content")?.unwrap_or_default(),
        },
        (NodeKind::Symlink, Some(target_id)) => NodeBody::Symlink { target_id },
        (NodeKind::Node, Some(_)) => {
            return Err(StorageError::InvalidData(format!(
                "content node `{id}` carries a target id"
            )));
        }
        (NodeKind::Symlink, None) => {
            return Err(StorageError::InvalidData(format!(
                "symlink `{id}` has no target id"
            )));
        }
    };

    let children: Vec<NodeId> = parse_json_column(row, "children")?;
    let tags: BTreeSet<String> = parse_json_column(row, "tags")?;
    let attachments: Vec<AttachmentMeta> = parse_json_column(row, "attachments")?;

    Ok(Node {
        id,
        body,
        title: row.get("title")?,
        parent,
        children,
        tags,
        attachments,
        created: row.get("created_at")?,
        modified: row.get("modified_at")?,
    })
}

fn parse_json_column<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    column: &'static str,
) -> StorageResult<T> {
    let text: String = row.get(column)?;
    serde_json::from_str(&text)
        .map_err(|err| StorageError::InvalidData(format!("invalid json in nodes.{column}: {err}")))
}

fn parse_uuid(value: &str, column: &'static str) -> StorageResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| StorageError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}

fn ensure_connection_ready(conn: &Connection) -> StorageResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(StorageError::Unavailable(format!(
            "node storage requires schema version {expected_version}, got {actual_version}"
        )));
    }

    for table in NODE_STORE_TABLES {
        if !table_exists(conn, table)? {
            return Err(StorageError::Unavailable(format!(
                "node storage requires table `{table}`"
            )));
        }
    }

    for column in NODE_COLUMNS {
        if !table_has_column(conn, "nodes", column)? {
            return Err(StorageError::Unavailable(format!(
                "node storage requires column `{column}` in table `nodes`"
            )));
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> StorageResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> StorageResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}
