//! Archive store and the finish/archive migration
//!
//! Finished dialogs are copied into a second sqlite database and only then
//! deleted from the hot store. A failure while writing the archive leaves the
//! hot store untouched so the migration can be retried; readers therefore
//! observe either the full pre-archival message set or none of it.

use crate::db::{
    parse_message_row, Database, DbError, DbResult, Dialog, Message, SCHEMA,
};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Durable cold storage for finished dialogs. Same shapes as the hot store,
/// append-mostly, read back only for inspection.
#[derive(Clone)]
pub struct ArchiveStore {
    conn: Arc<Mutex<Connection>>,
}

impl ArchiveStore {
    /// Open or create the archive database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory archive (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Write a dialog and its messages as one batch, preserving ids, roles
    /// and original timestamps.
    ///
    /// Uses `INSERT OR REPLACE` so a retry after a failed hot-store delete
    /// does not duplicate rows.
    pub fn insert_dialog(&self, dialog: &Dialog, messages: &[Message]) -> DbResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT OR REPLACE INTO dialogs (id, user_id, status, started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                dialog.id,
                dialog.user_id,
                dialog.status.as_str(),
                dialog.started_at.to_rfc3339(),
                dialog.finished_at.map(|dt| dt.to_rfc3339()),
            ],
        )?;

        for message in messages {
            tx.execute(
                "INSERT OR REPLACE INTO messages (id, dialog_id, role, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    message.id,
                    message.dialog_id,
                    message.role.as_str(),
                    message.content,
                    message.created_at.to_rfc3339(),
                ],
            )?;
        }

        tx.commit().map_err(DbError::from)
    }

    /// Read back an archived dialog's messages in creation order
    #[allow(dead_code)] // Archive inspection; exercised in tests
    pub fn get_messages(&self, dialog_id: i64) -> DbResult<Vec<Message>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, dialog_id, role, content, created_at
             FROM messages WHERE dialog_id = ?1
             ORDER BY created_at ASC, id ASC",
        )?;

        let rows = stmt.query_map(params![dialog_id], parse_message_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }
}

/// Outcome of an archival attempt
#[derive(Debug, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// Dialog and messages migrated to the archive store
    Archived { dialog_id: i64, messages: usize },
    /// The finished dialog had no messages; nothing was written to the
    /// archive and the empty hot-store row was dropped
    NothingToArchive { dialog_id: i64 },
    /// No finished dialog exists for this user
    NoFinishedDialog,
}

/// Moves finished dialogs from the hot store into the archive
#[derive(Clone)]
pub struct Archiver {
    hot: Database,
    archive: ArchiveStore,
}

impl Archiver {
    pub fn new(hot: Database, archive: ArchiveStore) -> Self {
        Self { hot, archive }
    }

    /// Archive the user's finished dialog, if any.
    ///
    /// Copy must fully commit before the hot-store delete runs; no further
    /// writers can append to a finished dialog, so the copy is stable.
    pub fn archive_finished_dialog(&self, user_id: i64) -> DbResult<ArchiveOutcome> {
        let Some(dialog) = self.hot.get_finished_dialog(user_id)? else {
            return Ok(ArchiveOutcome::NoFinishedDialog);
        };

        let messages = self.hot.get_messages(dialog.id)?;
        if messages.is_empty() {
            self.hot.remove_dialog(dialog.id)?;
            return Ok(ArchiveOutcome::NothingToArchive { dialog_id: dialog.id });
        }

        self.archive.insert_dialog(&dialog, &messages)?;
        self.hot.remove_dialog(dialog.id)?;

        tracing::info!(
            user_id,
            dialog_id = dialog.id,
            messages = messages.len(),
            "dialog archived"
        );

        Ok(ArchiveOutcome::Archived {
            dialog_id: dialog.id,
            messages: messages.len(),
        })
    }

    /// Sweep every finished dialog into the archive. Run at startup so a
    /// crash between finish and archive self-heals.
    pub fn archive_all_finished(&self) -> DbResult<usize> {
        let mut archived = 0;
        for user_id in self.hot.users_with_finished_dialogs()? {
            // One user may have accumulated several finished dialogs
            while !matches!(
                self.archive_finished_dialog(user_id)?,
                ArchiveOutcome::NoFinishedDialog
            ) {
                archived += 1;
            }
        }
        Ok(archived)
    }
}
