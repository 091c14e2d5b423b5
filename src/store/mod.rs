//! Local message storage
//!
//! The local store is the source of truth for offline viewing. Several
//! sessions may share one store (unread badges, other conversations), so
//! every implementation must be `Send + Sync` and its upsert must converge
//! when two writers save the same message.

use crate::error::SyncResult;
use crate::models::Message;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryMessageStore;
pub use sqlite::{set_db_path_override, SqliteMessageStore};

/// Storage contract for conversation messages
pub trait MessageStore: Send + Sync {
    /// All messages exchanged between the two users, in no particular order
    fn get_messages(&self, current_user_id: &str, peer_id: &str) -> SyncResult<Vec<Message>>;

    /// Idempotent upsert.
    ///
    /// Records are matched by remote id when the message has one, then by
    /// local id. Unknown messages are appended. A stored remote id is never
    /// replaced and a stored read flag is never cleared.
    fn save_message(&self, message: &Message) -> SyncResult<()>;

    /// Mark every unread message from `peer_id` to `current_user_id` as read.
    /// Returns how many records changed.
    fn mark_messages_as_read(&self, current_user_id: &str, peer_id: &str) -> SyncResult<usize>;

    /// Messages authored by `sender_id` that were never acknowledged remotely,
    /// oldest first
    fn pending_messages(&self, sender_id: &str) -> SyncResult<Vec<Message>>;

    /// Number of unread messages from `peer_id` to `current_user_id`
    fn unread_count(&self, current_user_id: &str, peer_id: &str) -> SyncResult<usize>;
}

/// Fold a saved copy of a message into the record already stored for it
pub(crate) fn merge_record(existing: &mut Message, incoming: &Message) {
    if existing.remote_id.is_none() {
        existing.remote_id = incoming.remote_id.clone();
    }
    existing.is_read |= incoming.is_read;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_keeps_first_remote_id_and_read_flag() {
        let mut stored = Message::outgoing("bob", "alice", "hi", 100);
        stored.remote_id = Some("r1".to_string());
        stored.is_read = true;

        let mut replay = stored.clone();
        replay.remote_id = Some("r2".to_string());
        replay.is_read = false;

        merge_record(&mut stored, &replay);
        assert_eq!(stored.remote_id.as_deref(), Some("r1"));
        assert!(stored.is_read);
    }

    #[test]
    fn test_merge_promotes_pending_record() {
        let mut stored = Message::outgoing("alice", "bob", "hello", 200);
        let mut acked = stored.clone();
        acked.remote_id = Some("r9".to_string());

        merge_record(&mut stored, &acked);
        assert_eq!(stored.remote_id.as_deref(), Some("r9"));
        assert!(!stored.is_pending());
    }
}
