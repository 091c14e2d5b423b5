// Common test utilities for integration tests
// This module contains shared code for all integration tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;

use anyhow::{anyhow, Result};
use log::LevelFilter;
use serde_json::{json, Value};
use tokio::time::{sleep, Duration as TokioDuration, Instant};

use chatsync::{
    ChatSession, MemoryMessageStore, Message, MessageStore, SyncError, SyncResult,
};

// Initialize logging once
static INIT_LOGGER: Once = Once::new();

/// Set up the logger for the tests
pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .try_init();
    });
}

/// A message as it would come back from the remote log
pub fn remote_message(sender: &str, receiver: &str, text: &str, ts: i64, remote_id: &str) -> Message {
    let mut message = Message::outgoing(sender, receiver, text, ts);
    message.remote_id = Some(remote_id.to_string());
    message
}

/// A remote payload written by another client
pub fn payload(sender: &str, receiver: &str, text: &str, ts: i64) -> Value {
    json!({
        "senderId": sender,
        "receiverId": receiver,
        "messageText": text,
        "timestamp": ts,
        "isRead": false
    })
}

pub fn timestamps(messages: &[Message]) -> Vec<i64> {
    messages.iter().map(|m| m.timestamp).collect()
}

pub fn is_sorted(messages: &[Message]) -> bool {
    messages.windows(2).all(|w| w[0].timestamp <= w[1].timestamp)
}

/// Poll the session view until `predicate` holds
pub async fn wait_for_view<F>(session: &ChatSession, predicate: F, timeout_secs: u64) -> Result<Vec<Message>>
where
    F: Fn(&[Message]) -> bool,
{
    let deadline = Instant::now() + TokioDuration::from_secs(timeout_secs);
    loop {
        let snapshot = session.snapshot().await?;
        if predicate(&snapshot) {
            return Ok(snapshot);
        }
        if Instant::now() > deadline {
            return Err(anyhow!("View never reached the expected state: {:?}", snapshot));
        }
        sleep(TokioDuration::from_millis(20)).await;
    }
}

/// Poll until `condition` holds
pub async fn wait_until<F>(condition: F, timeout_secs: u64) -> Result<()>
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + TokioDuration::from_secs(timeout_secs);
    while !condition() {
        if Instant::now() > deadline {
            return Err(anyhow!("Condition not met within {}s", timeout_secs));
        }
        sleep(TokioDuration::from_millis(20)).await;
    }
    Ok(())
}

/// Memory store that can be switched off to simulate an unreadable database
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryMessageStore,
    unavailable: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &MemoryMessageStore {
        &self.inner
    }

    fn check(&self) -> SyncResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SyncError::StoreUnavailable("disk I/O error".to_string()));
        }
        Ok(())
    }
}

impl MessageStore for FlakyStore {
    fn get_messages(&self, current_user_id: &str, peer_id: &str) -> SyncResult<Vec<Message>> {
        self.check()?;
        self.inner.get_messages(current_user_id, peer_id)
    }

    fn save_message(&self, message: &Message) -> SyncResult<()> {
        self.check()?;
        self.inner.save_message(message)
    }

    fn mark_messages_as_read(&self, current_user_id: &str, peer_id: &str) -> SyncResult<usize> {
        self.check()?;
        self.inner.mark_messages_as_read(current_user_id, peer_id)
    }

    fn pending_messages(&self, sender_id: &str) -> SyncResult<Vec<Message>> {
        self.check()?;
        self.inner.pending_messages(sender_id)
    }

    fn unread_count(&self, current_user_id: &str, peer_id: &str) -> SyncResult<usize> {
        self.check()?;
        self.inner.unread_count(current_user_id, peer_id)
    }
}
