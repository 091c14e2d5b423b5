// Conversation sync: keeps one chat view consistent between a local
// message store and a live remote feed.
pub mod config;
pub mod error;
pub mod feed;
pub mod models;
pub mod session;
pub mod store;
pub mod sync;
pub mod view;

// Re-export main types for convenience
pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use feed::{FeedQuery, FeedSubscription, MemoryFeed, RemoteFeed};
pub use models::*;
pub use session::ChatSession;
pub use store::{MemoryMessageStore, MessageStore, SqliteMessageStore};
pub use sync::{ApplyOutcome, Reconciler};
pub use view::{ConversationView, ViewChange};
