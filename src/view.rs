// Ordered, observable message list for one conversation

use log::debug;
use tokio::sync::broadcast;

use crate::models::Message;

/// A mutation of the conversation view, published to observers
#[derive(Debug, Clone, PartialEq)]
pub enum ViewChange {
    /// The whole list was replaced
    Reset { len: usize },
    Inserted { index: usize, message: Message },
    Updated { index: usize, message: Message },
}

/// Messages of one conversation, always sorted by timestamp ascending.
///
/// Every mutation is published on a broadcast channel. Publishing never
/// blocks and is skipped when nobody is listening.
#[derive(Debug)]
pub struct ConversationView {
    messages: Vec<Message>,
    changes: broadcast::Sender<ViewChange>,
}

impl ConversationView {
    pub fn new(changes: broadcast::Sender<ViewChange>) -> Self {
        ConversationView {
            messages: Vec::new(),
            changes,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ViewChange> {
        self.changes.subscribe()
    }

    /// Replace the contents, sorting by timestamp (stable)
    pub fn replace_all(&mut self, mut messages: Vec<Message>) {
        messages.sort_by_key(|m| m.timestamp);
        self.messages = messages;
        self.publish(ViewChange::Reset {
            len: self.messages.len(),
        });
    }

    /// Insert at the first position for the message's timestamp, ahead of
    /// entries with an equal timestamp. Returns the index.
    pub fn insert_sorted(&mut self, message: Message) -> usize {
        let index = self
            .messages
            .partition_point(|m| m.timestamp < message.timestamp);
        self.insert_at(index, message)
    }

    /// Insert after every entry not newer than the message. For a fresh
    /// outgoing message this is the tail.
    pub fn insert_latest(&mut self, message: Message) -> usize {
        let index = self
            .messages
            .partition_point(|m| m.timestamp <= message.timestamp);
        self.insert_at(index, message)
    }

    fn insert_at(&mut self, index: usize, message: Message) -> usize {
        self.messages.insert(index, message.clone());
        debug!("View insert at {} of {}", index, self.messages.len());
        self.publish(ViewChange::Inserted { index, message });
        index
    }

    /// Index of an entry with the same (timestamp, sender, text)
    pub fn position_by_content(&self, message: &Message) -> Option<usize> {
        self.messages.iter().position(|m| m.same_content(message))
    }

    pub fn position_by_local_id(&self, local_id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.local_id == local_id)
    }

    /// Set the remote id of the entry with `local_id`.
    ///
    /// An entry that already has a remote id keeps it. Returns the index of
    /// the patched entry.
    pub fn patch_remote_id(&mut self, local_id: &str, remote_id: &str) -> Option<usize> {
        let index = self.position_by_local_id(local_id)?;
        let entry = &mut self.messages[index];
        if entry.remote_id.is_some() {
            return None;
        }
        entry.remote_id = Some(remote_id.to_string());
        let message = entry.clone();
        self.publish(ViewChange::Updated { index, message });
        Some(index)
    }

    /// Flag every unread message from `sender_id` as read. Returns how many
    /// entries changed.
    pub fn mark_read_from(&mut self, sender_id: &str) -> usize {
        let mut updated = Vec::new();
        for (index, entry) in self.messages.iter_mut().enumerate() {
            if entry.sender_id == sender_id && !entry.is_read {
                entry.is_read = true;
                updated.push(ViewChange::Updated {
                    index,
                    message: entry.clone(),
                });
            }
        }
        let count = updated.len();
        for change in updated {
            self.publish(change);
        }
        count
    }

    fn publish(&self, change: ViewChange) {
        // Err only means there are no observers right now
        let _ = self.changes.send(change);
    }
}
