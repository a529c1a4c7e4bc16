//! Transfer journal: durable begin/progress/fail/complete records enabling
//! resume-after-interruption for large transfers.

mod store;
mod writer;

pub use store::{TransferKind, TransferRecord, TransferState};
pub use writer::{JournalMessage, JournalWriter};

use std::path::PathBuf;
use std::thread::JoinHandle;

use rusqlite::Connection;
use uuid::Uuid;

use crate::error::JournalError;

fn apply_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(())
}

/// Façade over the journal's writer actor and read-path connection. Shares
/// its SQLite file with a device's [`crate::index::LiveIndex`] but owns an
/// independent writer thread and connection, since the two write at
/// unrelated cadences (object upserts vs. transfer progress) and gaining
/// nothing from serializing through one thread.
pub struct TransferJournal {
    db_path: PathBuf,
    writer: JournalWriter,
    writer_thread: Option<JoinHandle<()>>,
}

impl TransferJournal {
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self, JournalError> {
        let db_path = db_path.into();
        let write_conn = Connection::open(&db_path)?;
        apply_pragmas(&write_conn)?;
        store::create_tables(&write_conn)?;
        let (writer, writer_thread) = JournalWriter::spawn(write_conn);
        Ok(Self {
            db_path,
            writer,
            writer_thread: Some(writer_thread),
        })
    }

    fn read_connection(&self) -> Result<Connection, JournalError> {
        let conn = Connection::open(&self.db_path)?;
        apply_pragmas(&conn)?;
        Ok(conn)
    }

    pub fn begin_read(&self, stable_id: &str, handle: u32, name: &str, total_bytes: Option<u64>, local_temp_path: &str, remote_path: &str, now: i64) -> Result<String, JournalError> {
        let id = Uuid::new_v4().to_string();
        let record = TransferRecord {
            id: id.clone(),
            stable_id: stable_id.to_string(),
            kind: TransferKind::Read,
            handle: Some(handle),
            parent_handle: None,
            name: name.to_string(),
            total_bytes,
            committed_bytes: 0,
            supports_partial: true,
            local_temp_path: local_temp_path.to_string(),
            remote_path: remote_path.to_string(),
            state: TransferState::Active,
            updated_at: now,
        };
        self.writer.send(JournalMessage::Insert(record))?;
        Ok(id)
    }

    /// Begins a write transfer. `handle` is `None` until `SendObjectInfo`
    /// mints one; the first [`Self::update_progress`] call supplies it.
    pub fn begin_write(&self, stable_id: &str, parent_handle: Option<u32>, name: &str, total_bytes: Option<u64>, local_temp_path: &str, remote_path: &str, now: i64) -> Result<String, JournalError> {
        let id = Uuid::new_v4().to_string();
        let record = TransferRecord {
            id: id.clone(),
            stable_id: stable_id.to_string(),
            kind: TransferKind::Write,
            handle: None,
            parent_handle,
            name: name.to_string(),
            total_bytes,
            committed_bytes: 0,
            supports_partial: true,
            local_temp_path: local_temp_path.to_string(),
            remote_path: remote_path.to_string(),
            state: TransferState::Active,
            updated_at: now,
        };
        self.writer.send(JournalMessage::Insert(record))?;
        Ok(id)
    }

    pub fn update_progress(&self, id: &str, committed_bytes: u64, handle: Option<u32>, now: i64) -> Result<(), JournalError> {
        self.writer.send(JournalMessage::UpdateProgress {
            id: id.to_string(),
            committed_bytes,
            handle,
            updated_at: now,
        })
    }

    pub fn fail(&self, id: &str, now: i64) -> Result<(), JournalError> {
        self.writer.send(JournalMessage::SetState {
            id: id.to_string(),
            state: TransferState::Failed,
            updated_at: now,
        })
    }

    pub fn complete(&self, id: &str, now: i64) -> Result<(), JournalError> {
        self.writer.send(JournalMessage::SetState {
            id: id.to_string(),
            state: TransferState::Completed,
            updated_at: now,
        })
    }

    pub fn prune_completed(&self, stable_id: &str, older_than: i64) -> Result<(), JournalError> {
        self.writer.send(JournalMessage::Prune {
            stable_id: stable_id.to_string(),
            older_than,
        })
    }

    pub fn load_resumables(&self, stable_id: &str) -> Result<Vec<TransferRecord>, JournalError> {
        let conn = self.read_connection()?;
        store::load_resumable(&conn, stable_id)
    }

    /// Filters a resumable set down to those whose local temp file still
    /// exists and whose on-disk size matches `committed_bytes`. Anything
    /// else is stale: the local state and the journal's bookkeeping have
    /// diverged, so it is not safe to resume from `committed_bytes` and the
    /// record is reported as not resumable rather than guessed at.
    pub fn clear_stale_temps(&self, records: Vec<TransferRecord>) -> Vec<TransferRecord> {
        records
            .into_iter()
            .filter(|r| match std::fs::metadata(&r.local_temp_path) {
                Ok(meta) => meta.len() == r.committed_bytes,
                Err(_) => r.committed_bytes == 0,
            })
            .collect()
    }
}

impl Drop for TransferJournal {
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

    fn wait_for_writer() {
        std::thread::sleep(std::time::Duration::from_millis(50));
    }

    #[test]
    fn write_transfer_resumes_when_temp_file_size_matches_committed_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let journal = TransferJournal::open(dir.path().join("journal.db")).unwrap();
        let temp_path = dir.path().join("video.mp4.part");
        std::fs::write(&temp_path, vec![0u8; 500]).unwrap();

        let id = journal
            .begin_write("dev-1", None, "video.mp4", Some(1000), temp_path.to_str().unwrap(), "/DCIM/video.mp4", 1000)
            .unwrap();
        journal.update_progress(&id, 500, Some(42), 1050).unwrap();
        wait_for_writer();

        let resumable = journal.load_resumables("dev-1").unwrap();
        let resumable = journal.clear_stale_temps(resumable);
        assert_eq!(resumable.len(), 1);
        assert_eq!(resumable[0].committed_bytes, 500);
    }

    #[test]
    fn mismatched_temp_file_size_is_excluded_from_resumables() {
        let dir = tempfile::tempdir().unwrap();
        let journal = TransferJournal::open(dir.path().join("journal.db")).unwrap();
        let temp_path = dir.path().join("video.mp4.part");
        std::fs::write(&temp_path, vec![0u8; 200]).unwrap(); // diverged from committed_bytes

        let id = journal
            .begin_write("dev-1", None, "video.mp4", Some(1000), temp_path.to_str().unwrap(), "/DCIM/video.mp4", 1000)
            .unwrap();
        journal.update_progress(&id, 500, Some(42), 1050).unwrap();
        wait_for_writer();

        let resumable = journal.load_resumables("dev-1").unwrap();
        let resumable = journal.clear_stale_temps(resumable);
        assert!(resumable.is_empty());
    }

    #[test]
    fn a_transfer_failed_mid_upload_stays_resumable_at_its_committed_offset() {
        let dir = tempfile::tempdir().unwrap();
        let journal = TransferJournal::open(dir.path().join("journal.db")).unwrap();
        let temp_path = dir.path().join("movie.mp4.part");
        let five_mb = 5 * 1024 * 1024;
        std::fs::write(&temp_path, vec![0u8; five_mb]).unwrap();

        let id = journal
            .begin_write("dev-1", None, "movie.mp4", Some(10 * 1024 * 1024), temp_path.to_str().unwrap(), "/DCIM/movie.mp4", 1000)
            .unwrap();
        journal.update_progress(&id, five_mb as u64, Some(7), 1050).unwrap();
        journal.fail(&id, 1060).unwrap();
        wait_for_writer();

        let resumable = journal.load_resumables("dev-1").unwrap();
        assert_eq!(resumable.len(), 1);
        assert_eq!(resumable[0].committed_bytes, five_mb as u64);
        assert_eq!(resumable[0].state, TransferState::Failed);

        let resumable = journal.clear_stale_temps(resumable);
        assert_eq!(resumable.len(), 1);
    }

    #[test]
    fn completing_a_transfer_removes_it_from_resumables() {
        let dir = tempfile::tempdir().unwrap();
        let journal = TransferJournal::open(dir.path().join("journal.db")).unwrap();
        let id = journal
            .begin_read("dev-1", 7, "photo.jpg", Some(100), "/tmp/photo.jpg.part", "/DCIM/photo.jpg", 1000)
            .unwrap();
        journal.complete(&id, 1100).unwrap();
        wait_for_writer();

        assert!(journal.load_resumables("dev-1").unwrap().is_empty());
    }
}
