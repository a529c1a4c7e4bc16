//! Live index: a persistent mirror of a device's object graph with change
//! counters and mark-stale-then-sweep re-crawl reconciliation.

mod store;
mod writer;

pub use store::{IndexStore, SCHEMA_VERSION};
pub use writer::{IndexWriter, UpsertObjectRequest, WriteMessage};

use std::thread::JoinHandle;

use rusqlite::params;

use crate::error::IndexError;

/// Opaque, alignment-safe serialization of a change counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SyncAnchor(pub u64);

impl SyncAnchor {
    pub fn encode(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub fn decode(bytes: [u8; 8]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }

    pub const ZERO: SyncAnchor = SyncAnchor(0);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Upserted,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedObject {
    pub storage_id: u32,
    pub handle: u32,
    pub parent_handle: Option<u32>,
    pub name: String,
    pub path_key: String,
    pub size: Option<u64>,
    pub mtime: Option<i64>,
    pub format: u16,
    pub is_folder: bool,
    pub change_counter: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeLogEntry {
    pub counter: u64,
    pub kind: ChangeKind,
    pub handle: u32,
}

/// Façade over the writer actor and the read-path connections for one
/// device's live index. Construct one per open session; it outlives the
/// session so re-crawls can reconcile against the prior snapshot.
pub struct LiveIndex {
    store: IndexStore,
    writer: IndexWriter,
    writer_thread: Option<JoinHandle<()>>,
}

impl LiveIndex {
    pub fn open(db_path: impl Into<std::path::PathBuf>) -> Result<Self, IndexError> {
        let store = IndexStore::open(db_path)?;
        let (writer, writer_thread) = IndexWriter::spawn(&store)?;
        Ok(Self {
            store,
            writer,
            writer_thread: Some(writer_thread),
        })
    }

    pub fn writer(&self) -> &IndexWriter {
        &self.writer
    }

    /// Marks every current child of `(storage_id, parent_handle)` stale
    /// before a re-crawl begins.
    pub fn mark_stale_children(&self, stable_id: &str, storage_id: u32, parent_handle: Option<u32>) -> Result<(), IndexError> {
        self.writer.send(WriteMessage::MarkStaleChildren {
            stable_id: stable_id.to_string(),
            storage_id,
            parent_handle,
        })
    }

    pub fn upsert_object(&self, request: UpsertObjectRequest) -> Result<(), IndexError> {
        self.writer.send(WriteMessage::UpsertObject(request))
    }

    /// Sweeps any child still marked stale after a crawl completes: each is
    /// recorded as `deleted` in the change log and removed from `objects`.
    pub fn sweep_stale(&self, stable_id: &str, storage_id: u32, parent_handle: Option<u32>) -> Result<(), IndexError> {
        self.writer.send(WriteMessage::SweepStale {
            stable_id: stable_id.to_string(),
            storage_id,
            parent_handle,
        })
    }

    pub fn prune_change_log(&self, stable_id: &str, older_than_unix: i64) -> Result<(), IndexError> {
        self.writer.send(WriteMessage::PruneChangeLog {
            stable_id: stable_id.to_string(),
            older_than: older_than_unix,
        })
    }

    /// Children of `parent_handle` with `stale = 0`.
    pub fn children_of(&self, stable_id: &str, storage_id: u32, parent_handle: Option<u32>) -> Result<Vec<IndexedObject>, IndexError> {
        let conn = self.store.open_read_connection()?;
        let mut stmt = conn.prepare(
            "SELECT storage_id, handle, parent_handle, name, path_key, size, mtime, format, is_folder, change_counter
             FROM objects
             WHERE stable_id = ?1 AND storage_id = ?2 AND parent_handle IS ?3 AND stale = 0",
        )?;
        let rows = stmt
            .query_map(params![stable_id, storage_id, parent_handle], |row| {
                Ok(IndexedObject {
                    storage_id: row.get(0)?,
                    handle: row.get(1)?,
                    parent_handle: row.get(2)?,
                    name: row.get(3)?,
                    path_key: row.get(4)?,
                    size: row.get::<_, Option<i64>>(5)?.map(|v| v as u64),
                    mtime: row.get(6)?,
                    format: row.get(7)?,
                    is_folder: row.get::<_, i32>(8)? != 0,
                    change_counter: row.get::<_, i64>(9)? as u64,
                })
            })?
            .collect::<Result<_, _>>()?;
        Ok(rows)
    }

    /// Entries with `counter > anchor`, deduplicated to the last counter per
    /// handle so an upsert-then-delete sequence within the window reports
    /// only its terminal state.
    pub fn changes_since(&self, stable_id: &str, anchor: SyncAnchor) -> Result<Vec<ChangeLogEntry>, IndexError> {
        let conn = self.store.open_read_connection()?;
        let mut stmt = conn.prepare(
            "SELECT counter, kind, handle FROM change_log
             WHERE stable_id = ?1 AND counter > ?2
             ORDER BY counter ASC",
        )?;
        let rows: Vec<(u64, String, u32)> = stmt
            .query_map(params![stable_id, anchor.0 as i64], |row| {
                Ok((row.get::<_, i64>(0)? as u64, row.get(1)?, row.get(2)?))
            })?
            .collect::<Result<_, _>>()?;

        let mut last_per_handle: std::collections::HashMap<u32, (u64, ChangeKind)> = std::collections::HashMap::new();
        for (counter, kind, handle) in rows {
            let kind = if kind == "deleted" { ChangeKind::Deleted } else { ChangeKind::Upserted };
            last_per_handle.insert(handle, (counter, kind));
        }

        let mut entries: Vec<ChangeLogEntry> = last_per_handle
            .into_iter()
            .map(|(handle, (counter, kind))| ChangeLogEntry { counter, kind, handle })
            .collect();
        entries.sort_by_key(|e| e.counter);
        Ok(entries)
    }
}

impl Drop for LiveIndex {
    fn drop(&mut self) {
        self.writer.shutdown();
        if let Some(handle) = self.writer_thread.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request(handle: u32, name: &str) -> UpsertObjectRequest {
        UpsertObjectRequest {
            stable_id: "dev-1".to_string(),
            storage_id: 1,
            handle,
            parent_handle: None,
            name: name.to_string(),
            path_key: format!("/{name}"),
            size: Some(10),
            mtime: None,
            format: 0x3000,
            is_folder: false,
        }
    }

    fn wait_for_writer() {
        std::thread::sleep(std::time::Duration::from_millis(50));
    }

    #[test]
    fn children_of_excludes_stale_rows() {
        let dir = tempfile::tempdir().unwrap();
        let index = LiveIndex::open(dir.path().join("index.db")).unwrap();

        index.upsert_object(sample_request(1, "a.txt")).unwrap();
        index.upsert_object(sample_request(2, "b.txt")).unwrap();
        wait_for_writer();

        let children = index.children_of("dev-1", 1, None).unwrap();
        assert_eq!(children.len(), 2);

        index.mark_stale_children("dev-1", 1, None).unwrap();
        wait_for_writer();
        let children = index.children_of("dev-1", 1, None).unwrap();
        assert!(children.is_empty(), "all children should be marked stale");
    }

    #[test]
    fn re_crawl_detects_deletion_via_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let index = LiveIndex::open(dir.path().join("index.db")).unwrap();

        index.upsert_object(sample_request(1, "keep.txt")).unwrap();
        index.upsert_object(sample_request(2, "remove.txt")).unwrap();
        wait_for_writer();

        let anchor = SyncAnchor(
            index
                .changes_since("dev-1", SyncAnchor::ZERO)
                .unwrap()
                .iter()
                .map(|e| e.counter)
                .max()
                .unwrap_or(0),
        );

        // Re-crawl observes only "keep.txt".
        index.mark_stale_children("dev-1", 1, None).unwrap();
        index.upsert_object(sample_request(1, "keep.txt")).unwrap();
        index.sweep_stale("dev-1", 1, None).unwrap();
        wait_for_writer();

        let changes = index.changes_since("dev-1", anchor).unwrap();
        let deleted: Vec<_> = changes.iter().filter(|c| c.kind == ChangeKind::Deleted).collect();
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].handle, 2);
    }

    #[test]
    fn sync_anchor_round_trips_through_its_byte_encoding() {
        let anchor = SyncAnchor(0x0102030405060708);
        assert_eq!(SyncAnchor::decode(anchor.encode()), anchor);
    }

    #[test]
    fn changes_since_never_reports_a_handle_twice() {
        let dir = tempfile::tempdir().unwrap();
        let index = LiveIndex::open(dir.path().join("index.db")).unwrap();

        index.upsert_object(sample_request(1, "a.txt")).unwrap();
        index.upsert_object(sample_request(1, "a-renamed.txt")).unwrap();
        wait_for_writer();

        let changes = index.changes_since("dev-1", SyncAnchor::ZERO).unwrap();
        let occurrences = changes.iter().filter(|c| c.handle == 1).count();
        assert_eq!(occurrences, 1);
    }
}
