// Outgoing messages: optimistic append, delivery, delivery outcome.
// The remote push runs off the session task; only its result comes back
// through the reconciler.

use log::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::feed::RemoteFeed;
use crate::models::Message;
use crate::store::MessageStore;

/// Write `message` to the remote log and record the assigned remote id in
/// the local store.
///
/// Persisting here keeps the store correct even when the session that sent
/// the message is gone by the time the write completes.
pub async fn deliver(
    feed: &dyn RemoteFeed,
    store: &dyn MessageStore,
    message: &Message,
) -> SyncResult<String> {
    let remote_id = feed.push(message).await?;

    let mut delivered = message.clone();
    delivered.remote_id = Some(remote_id.clone());
    store.save_message(&delivered)?;

    debug!("Delivered {} as {}", message.local_id, remote_id);
    Ok(remote_id)
}

impl super::Reconciler {
    /// Show and persist a new outgoing message.
    ///
    /// Whitespace-only text is ignored and returns `None`. The entry lands
    /// at the tail of the view unless a clock-skewed entry is newer.
    pub fn begin_send(&mut self, text: &str, timestamp: i64) -> SyncResult<Option<Message>> {
        let text = text.trim();
        if text.is_empty() {
            debug!("Ignoring empty outgoing message");
            return Ok(None);
        }

        let message = Message::outgoing(&self.pair.current_user, &self.pair.peer, text, timestamp);
        let index = self.view.insert_latest(message.clone());
        if index + 1 != self.view.len() {
            warn!(
                "Outgoing message {} is older than the newest shown message",
                message.local_id
            );
        }

        self.store.save_message(&message)?;
        info!("Queued message {} to {}", message.local_id, self.pair.peer);
        Ok(Some(message))
    }

    /// Apply a successful delivery to the view.
    ///
    /// Patches the entry with the remote id and marks the id processed so
    /// the echo from the feed is not inserted again. Messages of other
    /// conversations (resent from here) leave the view alone. Returns true
    /// when the view changed.
    pub fn complete_delivery(&mut self, message: &Message, remote_id: &str) -> bool {
        if !self.pair.contains(message) {
            return false;
        }

        self.processed_ids.insert(remote_id.to_string());
        let patched = self
            .view
            .patch_remote_id(&message.local_id, remote_id)
            .is_some();
        info!("Message {} sent successfully as {}", message.local_id, remote_id);
        patched
    }

    /// A failed delivery leaves the message pending for the next resend pass
    pub fn delivery_failed(&self, message: &Message, err: &SyncError) {
        warn!(
            "Message {} failed to send, will retry on next resend: {}",
            message.local_id, err
        );
    }

    /// Every message of the current user still waiting for a remote id,
    /// across all conversations
    pub fn pending_outgoing(&self) -> SyncResult<Vec<Message>> {
        self.store.pending_messages(&self.pair.current_user)
    }
}
