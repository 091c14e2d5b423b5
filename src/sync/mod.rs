// Conversation reconciliation
// Merges the local store and the remote feed into one ordered view.
// Split by concern: remote feed events, outgoing messages, read state.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, info};
use tokio::sync::broadcast;

use crate::error::SyncResult;
use crate::models::ConversationPair;
use crate::store::MessageStore;
use crate::view::{ConversationView, ViewChange};

pub mod read_state;
pub mod remote;
pub mod send;

pub use remote::ApplyOutcome;
pub use send::deliver;

/// Owns the view and the set of remote ids already merged into it.
///
/// Not thread safe by intent: exactly one task (the chat session) drives a
/// reconciler, and every producer hands its work to that task.
pub struct Reconciler {
    pair: ConversationPair,
    store: Arc<dyn MessageStore>,
    view: ConversationView,
    processed_ids: HashSet<String>,
}

impl Reconciler {
    pub fn new(
        pair: ConversationPair,
        store: Arc<dyn MessageStore>,
        changes: broadcast::Sender<ViewChange>,
    ) -> Self {
        Reconciler {
            pair,
            store,
            view: ConversationView::new(changes),
            processed_ids: HashSet::new(),
        }
    }

    pub fn pair(&self) -> &ConversationPair {
        &self.pair
    }

    pub fn view(&self) -> &ConversationView {
        &self.view
    }

    pub fn store(&self) -> Arc<dyn MessageStore> {
        self.store.clone()
    }

    pub fn is_processed(&self, remote_id: &str) -> bool {
        self.processed_ids.contains(remote_id)
    }

    pub fn processed_count(&self) -> usize {
        self.processed_ids.len()
    }

    /// Populate the view from the local store and remember every remote id
    /// it already holds, so the feed does not insert them again.
    ///
    /// Returns the number of messages loaded.
    pub fn load_local(&mut self) -> SyncResult<usize> {
        let messages = self
            .store
            .get_messages(&self.pair.current_user, &self.pair.peer)?;
        info!(
            "Loading {} local messages for conversation with {}",
            messages.len(),
            self.pair.peer
        );

        for remote_id in messages.iter().filter_map(|m| m.remote_id.as_ref()) {
            self.processed_ids.insert(remote_id.clone());
        }
        debug!("Seeded {} processed remote ids", self.processed_ids.len());

        let count = messages.len();
        self.view.replace_all(messages);
        Ok(count)
    }
}
