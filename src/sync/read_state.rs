use log::debug;

use crate::error::SyncResult;

impl super::Reconciler {
    /// Mark the peer's unread messages as read in the store and mirror the
    /// change in the view. Returns the store's count; zero leaves the view
    /// untouched.
    pub fn mark_all_read(&mut self) -> SyncResult<usize> {
        let count = self
            .store
            .mark_messages_as_read(&self.pair.current_user, &self.pair.peer)?;

        if count > 0 {
            let updated = self.view.mark_read_from(&self.pair.peer);
            debug!(
                "Marked {} messages as read from {} ({} shown)",
                count, self.pair.peer, updated
            );
        }
        Ok(count)
    }

    pub fn unread_count(&self) -> SyncResult<usize> {
        self.store
            .unread_count(&self.pair.current_user, &self.pair.peer)
    }
}
