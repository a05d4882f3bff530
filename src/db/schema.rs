//! Database schema and row types shared by the hot and archive stores

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// SQL schema for initialization.
///
/// Both stores use the same shapes; the archive store inserts explicit ids
/// carried over from the hot store, which AUTOINCREMENT permits.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS dialogs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    started_at TEXT NOT NULL,
    finished_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_dialogs_user_status ON dialogs(user_id, status);

-- The single-active invariant is a store-level constraint, not something
-- callers are trusted to uphold: two racing inserts cannot both land an
-- active row for one user.
CREATE UNIQUE INDEX IF NOT EXISTS idx_dialogs_one_active
    ON dialogs(user_id) WHERE status = 'active';

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    dialog_id INTEGER NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL,

    FOREIGN KEY (dialog_id) REFERENCES dialogs(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_dialog ON messages(dialog_id, created_at);
"#;

/// Dialog lifecycle status. Archived dialogs are deleted from the hot store
/// rather than getting a third status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialogStatus {
    Active,
    Finished,
}

impl DialogStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DialogStatus::Active => "active",
            DialogStatus::Finished => "finished",
        }
    }
}

impl fmt::Display for DialogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message author role. Exactly two roles exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Bot,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Bot => "bot",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "bot" => Some(Role::Bot),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dialog record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dialog {
    pub id: i64,
    pub user_id: i64,
    pub status: DialogStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Message record, immutable once written
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub dialog_id: i64,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Parse a stored RFC3339 timestamp. An unparsable value is surfaced as a
/// conversion failure rather than silently replaced; message ordering
/// depends on these timestamps, so corruption must not be papered over.
pub(crate) fn parse_datetime(column: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
        })
}
