//! Durable transfer records, persisted in their own SQLite database with
//! their own dedicated writer thread, mirroring the live index's
//! writer-actor pattern without sharing its connection: transfer writes and
//! index writes have independent contention and failure domains, so one
//! writer thread per database keeps them from blocking each other.

use rusqlite::{params, Connection};

use crate::error::JournalError;

pub const JOURNAL_SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS transfers (
    id TEXT PRIMARY KEY,
    stable_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    handle INTEGER,
    parent_handle INTEGER,
    name TEXT NOT NULL,
    total_bytes INTEGER,
    committed_bytes INTEGER NOT NULL,
    supports_partial INTEGER NOT NULL,
    local_temp_path TEXT NOT NULL,
    remote_path TEXT NOT NULL,
    state TEXT NOT NULL,
    updated_at INTEGER NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_transfers_device_state
    ON transfers (stable_id, state);
";

pub fn create_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(JOURNAL_SCHEMA_SQL)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Read,
    Write,
}

impl TransferKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }

    fn from_str(s: &str) -> Self {
        if s == "write" {
            Self::Write
        } else {
            Self::Read
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Active,
    Failed,
    Completed,
}

impl TransferState {
    fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Failed => "failed",
            Self::Completed => "completed",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "failed" => Self::Failed,
            "completed" => Self::Completed,
            _ => Self::Active,
        }
    }
}

/// One row of the `transfers` table. `handle` is `None` until a write
/// transfer's `SendObjectInfo` phase has minted one; for a read transfer it
/// is known up front.
#[derive(Debug, Clone)]
pub struct TransferRecord {
    pub id: String,
    pub stable_id: String,
    pub kind: TransferKind,
    pub handle: Option<u32>,
    pub parent_handle: Option<u32>,
    pub name: String,
    pub total_bytes: Option<u64>,
    pub committed_bytes: u64,
    pub supports_partial: bool,
    pub local_temp_path: String,
    pub remote_path: String,
    pub state: TransferState,
    pub updated_at: i64,
}

pub fn insert_transfer(conn: &Connection, record: &TransferRecord) -> Result<(), JournalError> {
    conn.execute(
        "INSERT INTO transfers (id, stable_id, kind, handle, parent_handle, name, total_bytes, committed_bytes,
                                 supports_partial, local_temp_path, remote_path, state, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            record.id,
            record.stable_id,
            record.kind.as_str(),
            record.handle,
            record.parent_handle,
            record.name,
            record.total_bytes.map(|v| v as i64),
            record.committed_bytes as i64,
            record.supports_partial as i32,
            record.local_temp_path,
            record.remote_path,
            record.state.as_str(),
            record.updated_at,
        ],
    )?;
    Ok(())
}

pub fn update_progress(conn: &Connection, id: &str, committed_bytes: u64, handle: Option<u32>, updated_at: i64) -> Result<(), JournalError> {
    conn.execute(
        "UPDATE transfers SET committed_bytes = ?1, handle = COALESCE(?2, handle), updated_at = ?3 WHERE id = ?4",
        params![committed_bytes as i64, handle, updated_at, id],
    )?;
    Ok(())
}

pub fn set_state(conn: &Connection, id: &str, state: TransferState, updated_at: i64) -> Result<(), JournalError> {
    conn.execute(
        "UPDATE transfers SET state = ?1, updated_at = ?2 WHERE id = ?3",
        params![state.as_str(), updated_at, id],
    )?;
    Ok(())
}

/// A transfer is resumable while it is still `active`, or after it has been
/// marked `failed` mid-transfer — §4.8 keeps a failed record "for resume"
/// rather than discarding it, so a caller can pick a partially-committed
/// upload/download back up after the failure that interrupted it. Only
/// `completed` transfers (and anything that never supported partial
/// transfer) are excluded.
pub fn load_resumable(conn: &Connection, stable_id: &str) -> Result<Vec<TransferRecord>, JournalError> {
    let mut stmt = conn.prepare(
        "SELECT id, stable_id, kind, handle, parent_handle, name, total_bytes, committed_bytes,
                supports_partial, local_temp_path, remote_path, state, updated_at
         FROM transfers WHERE stable_id = ?1 AND state IN ('active', 'failed') AND supports_partial = 1",
    )?;
    let rows = stmt
        .query_map(params![stable_id], |row| {
            Ok(TransferRecord {
                id: row.get(0)?,
                stable_id: row.get(1)?,
                kind: TransferKind::from_str(&row.get::<_, String>(2)?),
                handle: row.get(3)?,
                parent_handle: row.get(4)?,
                name: row.get(5)?,
                total_bytes: row.get::<_, Option<i64>>(6)?.map(|v| v as u64),
                committed_bytes: row.get::<_, i64>(7)? as u64,
                supports_partial: row.get::<_, i32>(8)? != 0,
                local_temp_path: row.get(9)?,
                remote_path: row.get(10)?,
                state: TransferState::from_str(&row.get::<_, String>(11)?),
                updated_at: row.get(12)?,
            })
        })?
        .collect::<Result<_, _>>()?;
    Ok(rows)
}

pub fn prune_completed(conn: &Connection, stable_id: &str, older_than: i64) -> Result<(), JournalError> {
    conn.execute(
        "DELETE FROM transfers WHERE stable_id = ?1 AND state IN ('completed', 'failed') AND updated_at < ?2",
        params![stable_id, older_than],
    )?;
    Ok(())
}
