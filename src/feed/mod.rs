// Remote feed: a windowed, live view over the shared message log

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::SyncResult;
use crate::models::{FeedEvent, Message};

pub mod memory;

pub use memory::MemoryFeed;

/// Messages older than this are outside the live window
pub const RETENTION_HORIZON: Duration = Duration::from_secs(24 * 60 * 60);

/// Maximum number of messages delivered for the initial window
pub const FEED_LIMIT: usize = 100;

/// Window parameters for a feed subscription, ordered by timestamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedQuery {
    pub start_at: i64, // inclusive lower bound, milliseconds since epoch
    pub limit: usize,
}

impl FeedQuery {
    pub fn new() -> Self {
        FeedQuery {
            start_at: 0,
            limit: FEED_LIMIT,
        }
    }

    /// The last `FEED_LIMIT` messages no older than `retention` before `now_ms`.
    /// A retention too long to represent reaches back to the earliest time.
    pub fn recent(now_ms: i64, retention: Duration) -> Self {
        let retention_ms = i64::try_from(retention.as_millis()).unwrap_or(i64::MAX);
        Self::new().with_start_at(now_ms.saturating_sub(retention_ms))
    }

    pub fn with_start_at(mut self, start_at: i64) -> Self {
        self.start_at = start_at;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn admits(&self, timestamp: i64) -> bool {
        timestamp >= self.start_at
    }
}

impl Default for FeedQuery {
    fn default() -> Self {
        Self::new()
    }
}

/// A live subscription. Dropping it stops delivery.
#[derive(Debug)]
pub struct FeedSubscription {
    task: Option<JoinHandle<()>>,
}

impl FeedSubscription {
    pub fn new(task: JoinHandle<()>) -> Self {
        FeedSubscription { task: Some(task) }
    }

    /// Stop delivery. No event is sent by this subscription afterwards.
    pub fn detach(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            debug!("Detaching feed subscription");
            task.abort();
        }
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Shared remote message log
#[async_trait]
pub trait RemoteFeed: Send + Sync {
    /// Deliver the current window as `Added` events, then live events,
    /// until the returned subscription is detached.
    async fn subscribe(
        &self,
        query: FeedQuery,
        events: mpsc::Sender<FeedEvent>,
    ) -> SyncResult<FeedSubscription>;

    /// Durably write a message and return the key it was stored under
    async fn push(&self, message: &Message) -> SyncResult<String>;
}
