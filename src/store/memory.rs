//! In-memory message store, used for ephemeral sessions and tests

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::debug;

use super::{merge_record, MessageStore};
use crate::error::{SyncError, SyncResult};
use crate::models::Message;

#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    records: RwLock<Vec<Message>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, across all conversations
    pub fn len(&self) -> usize {
        self.read().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> SyncResult<RwLockReadGuard<'_, Vec<Message>>> {
        self.records
            .read()
            .map_err(|_| SyncError::StoreUnavailable("message store lock poisoned".to_string()))
    }

    fn write(&self) -> SyncResult<RwLockWriteGuard<'_, Vec<Message>>> {
        self.records
            .write()
            .map_err(|_| SyncError::StoreUnavailable("message store lock poisoned".to_string()))
    }
}

fn is_unread_from(message: &Message, current_user_id: &str, peer_id: &str) -> bool {
    message.sender_id == peer_id && message.receiver_id == current_user_id && !message.is_read
}

impl MessageStore for MemoryMessageStore {
    fn get_messages(&self, current_user_id: &str, peer_id: &str) -> SyncResult<Vec<Message>> {
        let records = self.read()?;
        Ok(records
            .iter()
            .filter(|m| {
                (m.sender_id == current_user_id && m.receiver_id == peer_id)
                    || (m.sender_id == peer_id && m.receiver_id == current_user_id)
            })
            .cloned()
            .collect())
    }

    fn save_message(&self, message: &Message) -> SyncResult<()> {
        let mut records = self.write()?;

        let by_remote = message.remote_id.as_ref().and_then(|remote_id| {
            records
                .iter()
                .position(|m| m.remote_id.as_ref() == Some(remote_id))
        });
        let existing = by_remote.or_else(|| records.iter().position(|m| m.local_id == message.local_id));

        match existing {
            Some(index) => merge_record(&mut records[index], message),
            None => {
                debug!("Storing new message {} ({:?})", message.local_id, message.remote_id);
                records.push(message.clone());
            }
        }
        Ok(())
    }

    fn mark_messages_as_read(&self, current_user_id: &str, peer_id: &str) -> SyncResult<usize> {
        let mut records = self.write()?;
        let mut changed = 0;
        for message in records.iter_mut() {
            if is_unread_from(message, current_user_id, peer_id) {
                message.is_read = true;
                changed += 1;
            }
        }
        Ok(changed)
    }

    fn pending_messages(&self, sender_id: &str) -> SyncResult<Vec<Message>> {
        let records = self.read()?;
        let mut pending: Vec<Message> = records
            .iter()
            .filter(|m| m.sender_id == sender_id && m.is_pending())
            .cloned()
            .collect();
        pending.sort_by_key(|m| m.timestamp);
        Ok(pending)
    }

    fn unread_count(&self, current_user_id: &str, peer_id: &str) -> SyncResult<usize> {
        let records = self.read()?;
        Ok(records
            .iter()
            .filter(|m| is_unread_from(m, current_user_id, peer_id))
            .count())
    }
}
