//! Hot store for dialogs and messages
//!
//! Holds active and recently finished dialogs. Finished dialogs are migrated
//! to the archive store and removed from here (see `crate::archive`).

mod schema;

pub use schema::*;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("storage unavailable: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("dialog not found: {0}")]
    DialogNotFound(i64),
    #[error("user {0} already has an active dialog")]
    ActiveDialogExists(i64),
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // ==================== Dialog Operations ====================

    /// Create a new active dialog for a user.
    ///
    /// Does not finish an existing active dialog; callers are responsible
    /// for that. The unique partial index on active rows is the backstop:
    /// a second concurrent insert fails with `ActiveDialogExists` instead
    /// of double-activating the user.
    pub fn create_dialog(&self, user_id: i64) -> DbResult<Dialog> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO dialogs (user_id, status, started_at) VALUES (?1, 'active', ?2)",
            params![user_id, now.to_rfc3339()],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                DbError::ActiveDialogExists(user_id)
            }
            other => DbError::Sqlite(other),
        })?;

        Ok(Dialog {
            id: conn.last_insert_rowid(),
            user_id,
            status: DialogStatus::Active,
            started_at: now,
            finished_at: None,
        })
    }

    /// Get the user's active dialog, if any
    pub fn get_active_dialog(&self, user_id: i64) -> DbResult<Option<Dialog>> {
        self.get_dialog_by_status(user_id, DialogStatus::Active)
    }

    /// Get the user's finished (not yet archived) dialog, if any
    pub fn get_finished_dialog(&self, user_id: i64) -> DbResult<Option<Dialog>> {
        self.get_dialog_by_status(user_id, DialogStatus::Finished)
    }

    fn get_dialog_by_status(
        &self,
        user_id: i64,
        status: DialogStatus,
    ) -> DbResult<Option<Dialog>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, status, started_at, finished_at
             FROM dialogs WHERE user_id = ?1 AND status = ?2
             ORDER BY id DESC LIMIT 1",
        )?;

        stmt.query_row(params![user_id, status.as_str()], parse_dialog_row)
            .optional()
            .map_err(DbError::from)
    }

    /// Finish the user's active dialog with a single atomic statement.
    ///
    /// Returns the number of rows transitioned (0 when no active dialog
    /// exists; finishing is idempotent, not an error).
    pub fn finish_dialog(&self, user_id: i64) -> DbResult<usize> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();

        let updated = conn.execute(
            "UPDATE dialogs SET status = 'finished', finished_at = ?1
             WHERE user_id = ?2 AND status = 'active'",
            params![now.to_rfc3339(), user_id],
        )?;
        Ok(updated)
    }

    /// Delete a dialog and its messages in one transaction.
    ///
    /// Used by the archiver after the archive copy has been committed.
    pub fn remove_dialog(&self, dialog_id: i64) -> DbResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM messages WHERE dialog_id = ?1", params![dialog_id])?;
        let deleted = tx.execute("DELETE FROM dialogs WHERE id = ?1", params![dialog_id])?;
        tx.commit()?;

        if deleted == 0 {
            return Err(DbError::DialogNotFound(dialog_id));
        }
        Ok(())
    }

    /// User ids that have a finished dialog awaiting archival
    pub fn users_with_finished_dialogs(&self) -> DbResult<Vec<i64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT DISTINCT user_id FROM dialogs WHERE status = 'finished'")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    // ==================== Message Operations ====================

    /// Append a message to a dialog with `created_at = now`
    pub fn append_message(&self, dialog_id: i64, role: Role, content: &str) -> DbResult<Message> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO messages (dialog_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![dialog_id, role.as_str(), content, now.to_rfc3339()],
        )?;

        Ok(Message {
            id: conn.last_insert_rowid(),
            dialog_id,
            role,
            content: content.to_string(),
            created_at: now,
        })
    }

    /// Get all messages for a dialog in creation order
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

    /// Count messages in a dialog
    #[allow(dead_code)] // Used in tests
    pub fn count_messages(&self, dialog_id: i64) -> DbResult<i64> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE dialog_id = ?1",
            params![dialog_id],
            |row| row.get(0),
        )
        .map_err(DbError::from)
    }
}

fn parse_dialog_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Dialog> {
    let status: String = row.get(2)?;
    let status = if status == "finished" {
        DialogStatus::Finished
    } else {
        DialogStatus::Active
    };
    Ok(Dialog {
        id: row.get(0)?,
        user_id: row.get(1)?,
        status,
        started_at: parse_datetime(3, &row.get::<_, String>(3)?)?,
        finished_at: row
            .get::<_, Option<String>>(4)?
            .map(|s| parse_datetime(4, &s))
            .transpose()?,
    })
}

pub(crate) fn parse_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let role_str: String = row.get(2)?;
    let role = Role::parse(&role_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("invalid message role: {role_str}").into(),
        )
    })?;
    Ok(Message {
        id: row.get(0)?,
        dialog_id: row.get(1)?,
        role,
        content: row.get(3)?,
        created_at: parse_datetime(4, &row.get::<_, String>(4)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_get_active_dialog() {
        let db = Database::open_in_memory().unwrap();

        let dialog = db.create_dialog(42).unwrap();
        assert_eq!(dialog.user_id, 42);
        assert_eq!(dialog.status, DialogStatus::Active);
        assert!(dialog.finished_at.is_none());

        let active = db.get_active_dialog(42).unwrap().unwrap();
        assert_eq!(active.id, dialog.id);

        assert!(db.get_active_dialog(7).unwrap().is_none());
    }

    #[test]
    fn test_finish_dialog_is_idempotent() {
        let db = Database::open_in_memory().unwrap();

        assert_eq!(db.finish_dialog(42).unwrap(), 0);

        db.create_dialog(42).unwrap();
        assert_eq!(db.finish_dialog(42).unwrap(), 1);
        assert_eq!(db.finish_dialog(42).unwrap(), 0);

        assert!(db.get_active_dialog(42).unwrap().is_none());
        let finished = db.get_finished_dialog(42).unwrap().unwrap();
        assert_eq!(finished.status, DialogStatus::Finished);
        assert!(finished.finished_at.is_some());
    }

    #[test]
    fn test_dialog_ids_are_monotonic() {
        let db = Database::open_in_memory().unwrap();

        let first = db.create_dialog(1).unwrap();
        db.finish_dialog(1).unwrap();
        let second = db.create_dialog(1).unwrap();

        assert!(second.id > first.id);
    }

    #[test]
    fn test_store_rejects_second_active_dialog() {
        let db = Database::open_in_memory().unwrap();

        db.create_dialog(42).unwrap();
        assert!(matches!(
            db.create_dialog(42),
            Err(DbError::ActiveDialogExists(42))
        ));

        // Exactly one active row survives, and finishing unblocks the user
        let active = db.get_active_dialog(42).unwrap();
        assert!(active.is_some());
        db.finish_dialog(42).unwrap();
        db.create_dialog(42).unwrap();

        // Other users are unaffected
        db.create_dialog(7).unwrap();
    }

    #[test]
    fn test_corrupt_timestamp_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conversations.db");

        let db = Database::open(&path).unwrap();
        let dialog = db.create_dialog(1).unwrap();
        db.append_message(dialog.id, Role::User, "x").unwrap();

        let raw = rusqlite::Connection::open(&path).unwrap();
        raw.execute("UPDATE messages SET created_at = 'not-a-timestamp'", [])
            .unwrap();
        drop(raw);

        assert!(db.get_messages(dialog.id).is_err());
    }

    #[test]
    fn test_append_and_get_messages_in_order() {
        let db = Database::open_in_memory().unwrap();
        let dialog = db.create_dialog(1).unwrap();

        db.append_message(dialog.id, Role::User, "line stopped after cutting")
            .unwrap();
        db.append_message(dialog.id, Role::Bot, "did you hear a click?")
            .unwrap();
        db.append_message(dialog.id, Role::User, "yes, one loud click")
            .unwrap();

        let messages = db.get_messages(dialog.id).unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Bot);
        assert_eq!(messages[2].content, "yes, one loud click");
        assert_eq!(db.count_messages(dialog.id).unwrap(), 3);
    }

    #[test]
    fn test_remove_dialog_deletes_messages() {
        let db = Database::open_in_memory().unwrap();
        let dialog = db.create_dialog(1).unwrap();
        db.append_message(dialog.id, Role::User, "hello").unwrap();

        db.remove_dialog(dialog.id).unwrap();

        assert!(db.get_active_dialog(1).unwrap().is_none());
        assert_eq!(db.count_messages(dialog.id).unwrap(), 0);

        assert!(matches!(
            db.remove_dialog(dialog.id),
            Err(DbError::DialogNotFound(_))
        ));
    }

    #[test]
    fn test_reopen_preserves_dialogs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conversations.db");

        let dialog_id = {
            let db = Database::open(&path).unwrap();
            let dialog = db.create_dialog(42).unwrap();
            db.append_message(dialog.id, Role::User, "hello").unwrap();
            dialog.id
        };

        let db = Database::open(&path).unwrap();
        let active = db.get_active_dialog(42).unwrap().unwrap();
        assert_eq!(active.id, dialog_id);
        assert_eq!(db.count_messages(dialog_id).unwrap(), 1);
    }

    #[test]
    fn test_users_with_finished_dialogs() {
        let db = Database::open_in_memory().unwrap();
        db.create_dialog(1).unwrap();
        db.create_dialog(2).unwrap();
        db.finish_dialog(2).unwrap();

        assert_eq!(db.users_with_finished_dialogs().unwrap(), vec![2]);
    }
}
