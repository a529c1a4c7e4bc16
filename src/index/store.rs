//! SQLite schema and connection bootstrap for the live index: a
//! `SCHEMA_VERSION` stamped into a `meta` table, WAL mode, and a
//! delete-and-recreate fallback when the on-disk schema doesn't match.

use std::path::{Path, PathBuf};

use rusqlite::Connection;

use crate::error::IndexError;

pub const SCHEMA_VERSION: u32 = 1;

const CREATE_TABLES_SQL: &str = "
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS devices (
    stable_id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    last_seen INTEGER NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS storages (
    stable_id TEXT NOT NULL,
    storage_id INTEGER NOT NULL,
    description TEXT NOT NULL,
    capacity INTEGER NOT NULL,
    free INTEGER NOT NULL,
    read_only INTEGER NOT NULL,
    PRIMARY KEY (stable_id, storage_id)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS objects (
    stable_id TEXT NOT NULL,
    storage_id INTEGER NOT NULL,
    handle INTEGER NOT NULL,
    parent_handle INTEGER,
    name TEXT NOT NULL,
    path_key TEXT NOT NULL,
    size INTEGER,
    mtime INTEGER,
    format INTEGER NOT NULL,
    is_folder INTEGER NOT NULL,
    change_counter INTEGER NOT NULL,
    stale INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (stable_id, storage_id, handle)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_objects_parent
    ON objects (stable_id, storage_id, parent_handle);

CREATE TABLE IF NOT EXISTS change_log (
    stable_id TEXT NOT NULL,
    counter INTEGER NOT NULL,
    kind TEXT NOT NULL,
    handle INTEGER NOT NULL,
    snapshot BLOB,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (stable_id, counter)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_change_log_device_counter
    ON change_log (stable_id, counter);

CREATE TABLE IF NOT EXISTS counters (
    stable_id TEXT PRIMARY KEY,
    next_counter INTEGER NOT NULL
) WITHOUT ROWID;
";

fn apply_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "cache_size", -65536)?;
    Ok(())
}

fn create_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(CREATE_TABLES_SQL)?;
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?1)",
        [SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

fn stamped_schema_version(conn: &Connection) -> rusqlite::Result<Option<u32>> {
    conn.query_row("SELECT value FROM meta WHERE key = 'schema_version'", [], |row| {
        row.get::<_, String>(0)
    })
    .map(|v| v.parse().ok())
    .or_else(|e| if matches!(e, rusqlite::Error::QueryReturnedNoRows) { Ok(None) } else { Err(e) })
}

/// Owns the on-disk database file and the single read-path connection.
/// Write access goes exclusively through [`super::writer::IndexWriter`].
pub struct IndexStore {
    pub db_path: PathBuf,
}

impl IndexStore {
    /// Opens (creating if absent) the database at `db_path`, falling back
    /// to delete-and-recreate when the schema doesn't match.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self, IndexError> {
        let db_path = db_path.into();
        match Self::try_open(&db_path) {
            Ok(()) => Ok(Self { db_path }),
            Err(_) => {
                Self::delete_and_recreate(&db_path)?;
                Self::try_open(&db_path)?;
                Ok(Self { db_path })
            }
        }
    }

    fn try_open(db_path: &Path) -> Result<(), IndexError> {
        let conn = Connection::open(db_path)?;
        apply_pragmas(&conn)?;
        create_tables(&conn)?;
        match stamped_schema_version(&conn)? {
            Some(v) if v == SCHEMA_VERSION => Ok(()),
            Some(found) => Err(IndexError::SchemaMismatch {
                expected: SCHEMA_VERSION,
                found,
            }),
            None => Ok(()),
        }
    }

    fn delete_and_recreate(db_path: &Path) -> Result<(), IndexError> {
        for suffix in ["", "-wal", "-shm"] {
            let sidecar = db_path.with_extension(format!("db{suffix}"));
            let _ = std::fs::remove_file(sidecar);
        }
        let _ = std::fs::remove_file(db_path);
        Ok(())
    }

    /// Opens a fresh read-only-intent connection. Multiple readers may be
    /// open concurrently; only the writer thread ever opens for writing.
    pub fn open_read_connection(&self) -> Result<Connection, IndexError> {
        let conn = Connection::open(&self.db_path)?;
        apply_pragmas(&conn)?;
        Ok(conn)
    }

    pub fn open_write_connection(&self) -> Result<Connection, IndexError> {
        let conn = Connection::open(&self.db_path)?;
        apply_pragmas(&conn)?;
        create_tables(&conn)?;
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_tables_and_stamps_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::open(dir.path().join("index.db")).unwrap();
        let conn = store.open_read_connection().unwrap();
        let version = stamped_schema_version(&conn).unwrap();
        assert_eq!(version, Some(SCHEMA_VERSION));
    }

    #[test]
    fn schema_mismatch_triggers_delete_and_recreate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        {
            let conn = Connection::open(&path).unwrap();
            apply_pragmas(&conn).unwrap();
            create_tables(&conn).unwrap();
            conn.execute("UPDATE meta SET value = '999' WHERE key = 'schema_version'", [])
                .unwrap();
        }
        let store = IndexStore::open(&path).unwrap();
        let conn = store.open_read_connection().unwrap();
        assert_eq!(stamped_schema_version(&conn).unwrap(), Some(SCHEMA_VERSION));
    }
}
