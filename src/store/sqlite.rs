// src/store/sqlite.rs
//! SQLite-backed message store
//!
//! One `messages` table keyed by the local id, with a unique remote id.
//! The connection sits behind a mutex so the store can be shared between
//! sessions.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use log::{debug, info};
use once_cell::sync::OnceCell;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::MessageStore;
use crate::error::{SyncError, SyncResult};
use crate::models::Message;

const MESSAGE_COLUMNS: &str =
    "local_id, remote_id, sender_id, receiver_id, message_text, timestamp, is_read";

static DB_PATH_OVERRIDE: OnceCell<PathBuf> = OnceCell::new();

/// Use `path` for every store opened without an explicit path
pub fn set_db_path_override(path: PathBuf) {
    let _ = DB_PATH_OVERRIDE.set(path);
}

/// Storage for conversation messages
pub struct SqliteMessageStore {
    conn: Mutex<Connection>,
}

impl SqliteMessageStore {
    /// Open (or create) the store.
    ///
    /// Without a path the override set by [`set_db_path_override`] is used,
    /// then `<data dir>/chatsync/messages.db`.
    pub fn open(path: Option<PathBuf>) -> SyncResult<Self> {
        let path = match path {
            Some(p) => p,
            None => Self::default_path()?,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    SyncError::StoreUnavailable(format!(
                        "Could not create {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(&path)?;
        Self::create_tables(&conn)?;
        info!("Opened message store at {}", path.display());

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a throwaway store that lives as long as this value
    pub fn open_in_memory() -> SyncResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::create_tables(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_at(path: &Path) -> SyncResult<Self> {
        Self::open(Some(path.to_path_buf()))
    }

    fn default_path() -> SyncResult<PathBuf> {
        if let Some(path) = DB_PATH_OVERRIDE.get() {
            return Ok(path.clone());
        }
        let mut path = dirs::data_dir().ok_or_else(|| {
            SyncError::StoreUnavailable("Could not determine data directory".to_string())
        })?;
        path.push("chatsync");
        path.push("messages.db");
        Ok(path)
    }

    fn create_tables(conn: &Connection) -> SyncResult<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                local_id TEXT PRIMARY KEY,
                remote_id TEXT UNIQUE,
                sender_id TEXT NOT NULL,
                receiver_id TEXT NOT NULL,
                message_text TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_participants
                ON messages (sender_id, receiver_id)",
            [],
        )?;

        Ok(())
    }

    fn lock(&self) -> SyncResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| SyncError::StoreUnavailable("database connection lock poisoned".to_string()))
    }
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        local_id: row.get(0)?,
        remote_id: row.get(1)?,
        sender_id: row.get(2)?,
        receiver_id: row.get(3)?,
        message_text: row.get(4)?,
        timestamp: row.get(5)?,
        is_read: row.get(6)?,
    })
}

impl MessageStore for SqliteMessageStore {
    fn get_messages(&self, current_user_id: &str, peer_id: &str) -> SyncResult<Vec<Message>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM messages
             WHERE (sender_id = ?1 AND receiver_id = ?2)
                OR (sender_id = ?2 AND receiver_id = ?1)",
            MESSAGE_COLUMNS
        ))?;

        let rows = stmt.query_map(params![current_user_id, peer_id], row_to_message)?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    fn save_message(&self, message: &Message) -> SyncResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        // A known remote id wins over the local id: the same remote message
        // may arrive with a local id this device never saw
        let existing: Option<String> = match &message.remote_id {
            Some(remote_id) => tx
                .query_row(
                    "SELECT local_id FROM messages WHERE remote_id = ?1",
                    params![remote_id],
                    |row| row.get(0),
                )
                .optional()?,
            None => None,
        };
        match existing {
            Some(key) => {
                tx.execute(
                    "UPDATE messages SET is_read = MAX(is_read, ?2) WHERE local_id = ?1",
                    params![key, message.is_read],
                )?;
                debug!("Updated message {} ({:?})", key, message.remote_id);
            }
            None => {
                // No row holds this remote id, so only the local id can collide
                tx.execute(
                    "INSERT INTO messages (local_id, remote_id, sender_id, receiver_id, message_text, timestamp, is_read)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(local_id) DO UPDATE SET
                        remote_id = COALESCE(messages.remote_id, excluded.remote_id),
                        is_read = MAX(messages.is_read, excluded.is_read)",
                    params![
                        message.local_id,
                        message.remote_id,
                        message.sender_id,
                        message.receiver_id,
                        message.message_text,
                        message.timestamp,
                        message.is_read,
                    ],
                )?;
                debug!("Saved message {} ({:?})", message.local_id, message.remote_id);
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn mark_messages_as_read(&self, current_user_id: &str, peer_id: &str) -> SyncResult<usize> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE messages SET is_read = 1
             WHERE sender_id = ?1 AND receiver_id = ?2 AND is_read = 0",
            params![peer_id, current_user_id],
        )?;
        Ok(changed)
    }

    fn pending_messages(&self, sender_id: &str) -> SyncResult<Vec<Message>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM messages
             WHERE sender_id = ?1 AND remote_id IS NULL
             ORDER BY timestamp ASC",
            MESSAGE_COLUMNS
        ))?;

        let rows = stmt.query_map(params![sender_id], row_to_message)?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    fn unread_count(&self, current_user_id: &str, peer_id: &str) -> SyncResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages
             WHERE sender_id = ?1 AND receiver_id = ?2 AND is_read = 0",
            params![peer_id, current_user_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_id_is_never_replaced() {
        let store = SqliteMessageStore::open_in_memory().unwrap();
        let mut msg = Message::outgoing("alice", "bob", "hello", 200);
        store.save_message(&msg).unwrap();

        msg.remote_id = Some("r9".to_string());
        store.save_message(&msg).unwrap();

        msg.remote_id = Some("r10".to_string());
        store.save_message(&msg).unwrap();

        let messages = store.get_messages("alice", "bob").unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].remote_id.as_deref(), Some("r9"));
    }

    #[test]
    fn test_read_flag_is_never_cleared() {
        let store = SqliteMessageStore::open_in_memory().unwrap();
        let mut msg = Message::outgoing("bob", "alice", "hi", 100);
        msg.remote_id = Some("r1".to_string());
        msg.is_read = true;
        store.save_message(&msg).unwrap();

        msg.is_read = false;
        store.save_message(&msg).unwrap();

        assert_eq!(store.unread_count("alice", "bob").unwrap(), 0);
    }
}
