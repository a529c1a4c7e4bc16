//! Dedicated writer thread for the transfer journal, mirroring
//! [`crate::index::writer`]'s actor shape: `rusqlite::Connection` isn't
//! friendly to holding across `.await` points, so the journal gets its own
//! thread-owned connection rather than a tokio task.

use std::sync::mpsc;
use std::thread::JoinHandle;

use log::error;
use rusqlite::Connection;

use crate::error::JournalError;

use super::store::{self, TransferRecord, TransferState};

pub enum JournalMessage {
    Insert(TransferRecord),
    UpdateProgress {
        id: String,
        committed_bytes: u64,
        handle: Option<u32>,
        updated_at: i64,
    },
    SetState {
        id: String,
        state: TransferState,
        updated_at: i64,
    },
    Prune {
        stable_id: String,
        older_than: i64,
    },
    Shutdown,
}

#[derive(Clone)]
pub struct JournalWriter {
    sender: mpsc::Sender<JournalMessage>,
}

impl JournalWriter {
    pub fn spawn(conn: Connection) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel();
        let handle = std::thread::Builder::new()
            .name("mtp-journal-writer".to_string())
            .spawn(move || writer_loop(conn, receiver))
            .expect("failed to spawn journal writer thread");
        (Self { sender }, handle)
    }

    pub fn send(&self, message: JournalMessage) -> Result<(), JournalError> {
        self.sender.send(message).map_err(|_| JournalError::WriterGone)
    }

    pub fn shutdown(&self) {
        let _ = self.sender.send(JournalMessage::Shutdown);
    }
}

fn writer_loop(conn: Connection, receiver: mpsc::Receiver<JournalMessage>) {
    while let Ok(message) = receiver.recv() {
        let result = match message {
            JournalMessage::Shutdown => return,
            JournalMessage::Insert(record) => store::insert_transfer(&conn, &record),
            JournalMessage::UpdateProgress {
                id,
                committed_bytes,
                handle,
                updated_at,
            } => store::update_progress(&conn, &id, committed_bytes, handle, updated_at),
            JournalMessage::SetState { id, state, updated_at } => store::set_state(&conn, &id, state, updated_at),
            JournalMessage::Prune { stable_id, older_than } => store::prune_completed(&conn, &stable_id, older_than),
        };
        if let Err(e) = result {
            error!("journal writer: {e}");
        }
    }
}
