use rusqlite::Connection;
use treenote_core::db::migrations::latest_version;
use treenote_core::db::{open_db, open_db_in_memory, DbError};
use treenote_core::{NodeStorage, SqliteNodeStorage, StorageError};

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "nodes");
    assert_table_exists(&conn, "root_nodes");
    assert_table_exists(&conn, "attachment_blobs");
    assert_table_exists(&conn, "store_meta");
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("treenote.db");

    let conn_first = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    assert_table_exists(&conn_second, "nodes");
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn node_storage_refuses_unmigrated_connection() {
    let conn = Connection::open_in_memory().unwrap();
    assert!(matches!(
        SqliteNodeStorage::try_new(&conn),
        Err(StorageError::Unavailable(_))
    ));

    let conn = open_db_in_memory().unwrap();
    let storage = SqliteNodeStorage::try_new(&conn).unwrap();
    assert!(storage.load_all().unwrap().is_empty());
    assert_eq!(storage.revision().unwrap(), 0);
}

#[test]
fn node_row_kind_must_match_target_column() {
    let conn = open_db_in_memory().unwrap();
    let insert = |kind: &str, target: Option<&str>| {
        conn.execute(
            "INSERT INTO nodes (id, kind, target_id, title, created_at, modified_at)
             VALUES (lower(hex(randomblob(16))), ?1, ?2, 'x', 0, 0);",
            rusqlite::params![kind, target],
        )
    };

    assert!(insert("node", None).is_ok());
    assert!(insert("symlink", Some("target")).is_ok());
    assert!(insert("node", Some("target")).is_err());
    assert!(insert("symlink", None).is_err());
    assert!(insert("folder", None).is_err());
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
