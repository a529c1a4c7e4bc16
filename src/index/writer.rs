//! Single dedicated writer thread owning the live index's write connection,
//! so no caller ever holds a read lock while awaiting I/O. A `Clone`-able
//! mailbox handle, a background `std::thread` (not a tokio task, since
//! `rusqlite::Connection` doesn't pair well with an async executor's
//! work-stealing), and a two-phase priority drain loop.

use std::sync::mpsc;
use std::thread::JoinHandle;

use log::{debug, error};
use rusqlite::{params, Connection};
use tokio::sync::oneshot;

use crate::error::IndexError;

use super::store::IndexStore;

#[derive(Debug, Clone)]
pub struct UpsertObjectRequest {
    pub stable_id: String,
    pub storage_id: u32,
    pub handle: u32,
    pub parent_handle: Option<u32>,
    pub name: String,
    pub path_key: String,
    pub size: Option<u64>,
    pub mtime: Option<i64>,
    pub format: u16,
    pub is_folder: bool,
}

pub enum WriteMessage {
    /// Priority: issued once per folder before a re-crawl begins, so it
    /// must run ahead of any upserts already queued for that folder.
    MarkStaleChildren {
        stable_id: String,
        storage_id: u32,
        parent_handle: Option<u32>,
    },
    UpsertObject(UpsertObjectRequest),
    SweepStale {
        stable_id: String,
        storage_id: u32,
        parent_handle: Option<u32>,
    },
    UpsertStorage {
        stable_id: String,
        storage_id: u32,
        description: String,
        capacity: u64,
        free: u64,
        read_only: bool,
    },
    UpsertDevice {
        stable_id: String,
        display_name: String,
        last_seen: i64,
    },
    PruneChangeLog {
        stable_id: String,
        older_than: i64,
    },
    GetNextCounter {
        stable_id: String,
        reply: oneshot::Sender<u64>,
    },
    Shutdown,
}

/// Clone-able handle to the writer thread's mailbox.
#[derive(Clone)]
pub struct IndexWriter {
    sender: mpsc::Sender<WriteMessage>,
}

impl IndexWriter {
    pub fn spawn(store: &IndexStore) -> Result<(Self, JoinHandle<()>), IndexError> {
        let conn = store.open_write_connection()?;
        let (sender, receiver) = mpsc::channel();
        let handle = std::thread::Builder::new()
            .name("mtp-index-writer".to_string())
            .spawn(move || writer_loop(conn, receiver))
            .expect("failed to spawn index writer thread");
        Ok((Self { sender }, handle))
    }

    pub fn send(&self, message: WriteMessage) -> Result<(), IndexError> {
        self.sender.send(message).map_err(|_| IndexError::WriterGone)
    }

    pub fn shutdown(&self) {
        let _ = self.sender.send(WriteMessage::Shutdown);
    }
}

/// Two-phase priority drain: fully drain every queued `MarkStaleChildren`
/// via `try_recv` before handling one normal message via a blocking `recv`,
/// so stale-marking never races behind a backlog of upserts from a prior
/// crawl.
fn writer_loop(conn: Connection, receiver: mpsc::Receiver<WriteMessage>) {
    loop {
        let mut drained_priority = false;
        while let Ok(message) = receiver.try_recv() {
            if matches!(message, WriteMessage::MarkStaleChildren { .. }) {
                drained_priority = true;
                if apply(&conn, message).is_none() {
                    return;
                }
            } else {
                match apply(&conn, message) {
                    Some(()) => {}
                    None => return,
                }
                break;
            }
        }
        if drained_priority {
            continue;
        }

        match receiver.recv() {
            Ok(message) => {
                if apply(&conn, message).is_none() {
                    return;
                }
            }
            Err(_) => return,
        }
    }
}

/// Returns `None` to signal the loop should exit (shutdown requested).
fn apply(conn: &Connection, message: WriteMessage) -> Option<()> {
    let result = match message {
        WriteMessage::Shutdown => {
            debug!("index writer: shutdown requested");
            return None;
        }
        WriteMessage::MarkStaleChildren {
            stable_id,
            storage_id,
            parent_handle,
        } => mark_stale_children(conn, &stable_id, storage_id, parent_handle),
        WriteMessage::UpsertObject(req) => upsert_object(conn, &req),
        WriteMessage::SweepStale {
            stable_id,
            storage_id,
            parent_handle,
        } => sweep_stale(conn, &stable_id, storage_id, parent_handle),
        WriteMessage::UpsertStorage {
            stable_id,
            storage_id,
            description,
            capacity,
            free,
            read_only,
        } => conn
            .execute(
                "INSERT INTO storages (stable_id, storage_id, description, capacity, free, read_only)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(stable_id, storage_id) DO UPDATE SET
                    description = excluded.description,
                    capacity = excluded.capacity,
                    free = excluded.free,
                    read_only = excluded.read_only",
                params![stable_id, storage_id, description, capacity as i64, free as i64, read_only as i32],
            )
            .map(|_| ())
            .map_err(IndexError::from),
        WriteMessage::UpsertDevice {
            stable_id,
            display_name,
            last_seen,
        } => conn
            .execute(
                "INSERT INTO devices (stable_id, display_name, last_seen) VALUES (?1, ?2, ?3)
                 ON CONFLICT(stable_id) DO UPDATE SET display_name = excluded.display_name, last_seen = excluded.last_seen",
                params![stable_id, display_name, last_seen],
            )
            .map(|_| ())
            .map_err(IndexError::from),
        WriteMessage::PruneChangeLog { stable_id, older_than } => conn
            .execute(
                "DELETE FROM change_log WHERE stable_id = ?1 AND created_at < ?2",
                params![stable_id, older_than],
            )
            .map(|_| ())
            .map_err(IndexError::from),
        WriteMessage::GetNextCounter { stable_id, reply } => {
            let counter = next_counter(conn, &stable_id);
            let _ = reply.send(counter.unwrap_or(0));
            return Some(());
        }
    };

    if let Err(e) = result {
        error!("index writer: {e}");
    }
    Some(())
}

fn next_counter(conn: &Connection, stable_id: &str) -> rusqlite::Result<u64> {
    conn.execute(
        "INSERT INTO counters (stable_id, next_counter) VALUES (?1, 1)
         ON CONFLICT(stable_id) DO UPDATE SET next_counter = next_counter + 1",
        params![stable_id],
    )?;
    conn.query_row("SELECT next_counter FROM counters WHERE stable_id = ?1", params![stable_id], |row| {
        row.get::<_, i64>(0)
    })
    .map(|v| v as u64)
}

fn mark_stale_children(conn: &Connection, stable_id: &str, storage_id: u32, parent_handle: Option<u32>) -> Result<(), IndexError> {
    conn.execute(
        "UPDATE objects SET stale = 1
         WHERE stable_id = ?1 AND storage_id = ?2 AND parent_handle IS ?3",
        params![stable_id, storage_id, parent_handle],
    )?;
    Ok(())
}

fn upsert_object(conn: &Connection, req: &UpsertObjectRequest) -> Result<(), IndexError> {
    let changed: bool = conn
        .query_row(
            "SELECT name != ?4 OR parent_handle IS NOT ?5 OR size IS NOT ?6 OR mtime IS NOT ?7
                    OR format != ?8 OR is_folder != ?9 OR stale = 1
             FROM objects WHERE stable_id = ?1 AND storage_id = ?2 AND handle = ?3",
            params![
                req.stable_id,
                req.storage_id,
                req.handle,
                req.name,
                req.parent_handle,
                req.size.map(|v| v as i64),
                req.mtime,
                req.format,
                req.is_folder as i32,
            ],
            |row| row.get::<_, bool>(0),
        )
        .unwrap_or(true); // no existing row: treat as changed (first sighting)

    conn.execute(
        "INSERT INTO objects (stable_id, storage_id, handle, parent_handle, name, path_key, size, mtime, format, is_folder, change_counter, stale)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, 0)
         ON CONFLICT(stable_id, storage_id, handle) DO UPDATE SET
            parent_handle = excluded.parent_handle,
            name = excluded.name,
            path_key = excluded.path_key,
            size = excluded.size,
            mtime = excluded.mtime,
            format = excluded.format,
            is_folder = excluded.is_folder,
            stale = 0",
        params![
            req.stable_id,
            req.storage_id,
            req.handle,
            req.parent_handle,
            req.name,
            req.path_key,
            req.size.map(|v| v as i64),
            req.mtime,
            req.format,
            req.is_folder as i32,
        ],
    )?;

    if changed {
        bump_change_log(conn, &req.stable_id, req.handle, "upserted", Some(req))?;
    }
    Ok(())
}

fn sweep_stale(conn: &Connection, stable_id: &str, storage_id: u32, parent_handle: Option<u32>) -> Result<(), IndexError> {
    let mut stmt = conn.prepare(
        "SELECT handle FROM objects WHERE stable_id = ?1 AND storage_id = ?2 AND parent_handle IS ?3 AND stale = 1",
    )?;
    let handles: Vec<u32> = stmt
        .query_map(params![stable_id, storage_id, parent_handle], |row| row.get(0))?
        .collect::<Result<_, _>>()?;
    drop(stmt);

    for handle in handles {
        bump_change_log(conn, stable_id, handle, "deleted", None)?;
        conn.execute(
            "DELETE FROM objects WHERE stable_id = ?1 AND storage_id = ?2 AND handle = ?3",
            params![stable_id, storage_id, handle],
        )?;
    }
    Ok(())
}

fn bump_change_log(conn: &Connection, stable_id: &str, handle: u32, kind: &str, snapshot: Option<&UpsertObjectRequest>) -> Result<(), IndexError> {
    let counter = next_counter(conn, stable_id)?;
    let snapshot_blob = snapshot.and_then(|s| serde_json::to_vec(&SnapshotView::from(s)).ok());
    let now = chrono::Utc::now().timestamp();
    conn.execute(
        "INSERT INTO change_log (stable_id, counter, kind, handle, snapshot, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![stable_id, counter as i64, kind, handle, snapshot_blob, now],
    )?;
    conn.execute(
        "UPDATE objects SET change_counter = ?1 WHERE stable_id = ?2 AND handle = ?3",
        params![counter as i64, stable_id, handle],
    )?;
    Ok(())
}

#[derive(serde::Serialize)]
struct SnapshotView {
    handle: u32,
    name: String,
    parent_handle: Option<u32>,
    size: Option<u64>,
}

impl From<&UpsertObjectRequest> for SnapshotView {
    fn from(req: &UpsertObjectRequest) -> Self {
        Self {
            handle: req.handle,
            name: req.name.clone(),
            parent_handle: req.parent_handle,
            size: req.size,
        }
    }
}
