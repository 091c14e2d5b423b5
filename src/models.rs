use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};

/// Current wall clock time in milliseconds since the epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn new_local_id() -> String {
    Uuid::new_v4().to_string()
}

/// A single chat message.
///
/// The serialized form is the payload stored in the remote log. The remote
/// id is the log key, so it never travels inside the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub sender_id: String,
    pub receiver_id: String,
    pub message_text: String,
    pub timestamp: i64, // milliseconds since epoch
    #[serde(default = "new_local_id")]
    pub local_id: String,
    #[serde(skip)]
    pub remote_id: Option<String>,
    #[serde(default)]
    pub is_read: bool,
}

impl Message {
    /// Build a fresh outgoing message with a new local id
    pub fn outgoing(sender_id: &str, receiver_id: &str, text: &str, timestamp: i64) -> Self {
        Message {
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            message_text: text.to_string(),
            timestamp,
            local_id: new_local_id(),
            remote_id: None,
            is_read: false,
        }
    }

    /// Parse a remote payload and attach the key it was stored under
    pub fn from_payload(remote_id: &str, payload: &serde_json::Value) -> SyncResult<Self> {
        let mut message: Message = serde_json::from_value(payload.clone()).map_err(|e| {
            SyncError::MalformedPayload {
                remote_id: remote_id.to_string(),
                reason: e.to_string(),
            }
        })?;
        message.remote_id = Some(remote_id.to_string());
        Ok(message)
    }

    pub fn to_payload(&self) -> serde_json::Value {
        // Serializing a struct of strings and integers cannot fail
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// True until the remote log has acknowledged the message
    pub fn is_pending(&self) -> bool {
        self.remote_id.is_none()
    }

    /// Content identity used before a remote id is known
    pub fn same_content(&self, other: &Message) -> bool {
        self.timestamp == other.timestamp
            && self.sender_id == other.sender_id
            && self.message_text == other.message_text
    }
}

/// The two participants that scope a single conversation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationPair {
    pub current_user: String,
    pub peer: String,
}

impl ConversationPair {
    pub fn new(current_user: &str, peer: &str) -> Self {
        ConversationPair {
            current_user: current_user.to_string(),
            peer: peer.to_string(),
        }
    }

    /// Whether the message was exchanged between exactly these two users
    pub fn contains(&self, message: &Message) -> bool {
        (message.sender_id == self.current_user && message.receiver_id == self.peer)
            || (message.sender_id == self.peer && message.receiver_id == self.current_user)
    }

    /// Whether the peer authored the message
    pub fn is_incoming(&self, message: &Message) -> bool {
        message.sender_id == self.peer
    }
}

/// One event from a remote feed subscription
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Added {
        remote_id: String,
        payload: serde_json::Value,
    },
    Changed {
        remote_id: String,
    },
    Removed {
        remote_id: String,
    },
    Error(String),
}
