// Remote feed events
// Added events are parsed, filtered and merged into the view; changes and
// removals are only logged.

use log::{debug, error, warn};

use crate::error::{SyncError, SyncResult};
use crate::models::{FeedEvent, Message};

/// What happened to one remote message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Inserted into the view at this index
    Inserted(usize),
    /// Stored, but the view already held the same content
    AlreadyPresent,
    /// The remote id was merged before
    AlreadyProcessed,
    /// Belongs to another conversation
    Foreign,
    /// Payload could not be parsed
    Malformed,
    /// Not an `Added` event
    Ignored,
}

impl super::Reconciler {
    /// Dispatch one feed event.
    ///
    /// Only a store failure is returned as an error; everything else is
    /// reported through the outcome and the log.
    pub fn handle_feed_event(&mut self, event: FeedEvent) -> SyncResult<ApplyOutcome> {
        match event {
            FeedEvent::Added { remote_id, payload } => {
                match Message::from_payload(&remote_id, &payload) {
                    Ok(message) => self.apply_remote(message),
                    Err(e) => {
                        warn!("Dropping remote message: {}", e);
                        Ok(ApplyOutcome::Malformed)
                    }
                }
            }
            FeedEvent::Changed { remote_id } => {
                debug!("Remote message changed: {}", remote_id);
                Ok(ApplyOutcome::Ignored)
            }
            FeedEvent::Removed { remote_id } => {
                debug!("Remote message removed: {}", remote_id);
                Ok(ApplyOutcome::Ignored)
            }
            FeedEvent::Error(reason) => {
                error!("Feed subscription error: {}", reason);
                Ok(ApplyOutcome::Ignored)
            }
        }
    }

    /// Merge a message observed on the remote feed.
    ///
    /// The message must carry its remote id.
    pub fn apply_remote(&mut self, mut message: Message) -> SyncResult<ApplyOutcome> {
        let remote_id = match &message.remote_id {
            Some(id) => id.clone(),
            None => {
                return Err(SyncError::MalformedPayload {
                    remote_id: String::new(),
                    reason: "remote message without a remote id".to_string(),
                })
            }
        };

        if !self.pair.contains(&message) {
            return Ok(ApplyOutcome::Foreign);
        }

        if self.processed_ids.contains(&remote_id) {
            debug!("Skipping already processed message {}", remote_id);
            return Ok(ApplyOutcome::AlreadyProcessed);
        }

        // The conversation is open, so anything from the peer has been seen
        if self.pair.is_incoming(&message) {
            message.is_read = true;
        }

        self.store.save_message(&message)?;

        // A copy loaded from the store before its remote id was known
        let outcome = if self.view.position_by_content(&message).is_some() {
            debug!("Message {} already shown, not inserting", remote_id);
            ApplyOutcome::AlreadyPresent
        } else {
            let index = self.view.insert_sorted(message);
            debug!("New message {} added from feed at {}", remote_id, index);
            ApplyOutcome::Inserted(index)
        };

        self.processed_ids.insert(remote_id);
        Ok(outcome)
    }
}
