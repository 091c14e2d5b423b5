// SQLite message store tests
// Persistence across reopen, upsert convergence, and the store under a session

mod common;
use common::{payload, remote_message, setup_logging, wait_for_view};

use std::sync::Arc;
use std::thread;

use anyhow::Result;
use tempfile::tempdir;
use tokio::sync::broadcast;

use chatsync::{
    now_millis, ApplyOutcome, ChatSession, ConversationPair, FeedEvent, MemoryFeed, Message,
    MessageStore, Reconciler, SqliteMessageStore, SyncConfig,
};

const ME: &str = "alice";
const PEER: &str = "bob";

#[test]
fn test_messages_survive_reopen() -> Result<()> {
    setup_logging();
    let dir = tempdir()?;
    let path = dir.path().join("chat").join("messages.db");

    let pending = Message::outgoing(ME, PEER, "unsent", 300);
    {
        let store = SqliteMessageStore::open_at(&path)?;
        store.save_message(&remote_message(PEER, ME, "hi", 100, "r1"))?;
        store.save_message(&remote_message(ME, PEER, "hey", 200, "r2"))?;
        store.save_message(&pending)?;
    }

    let store = SqliteMessageStore::open_at(&path)?;
    let mut messages = store.get_messages(ME, PEER)?;
    messages.sort_by_key(|m| m.timestamp);
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0].remote_id.as_deref(), Some("r1"));
    assert_eq!(messages[2], pending);

    let queued = store.pending_messages(ME)?;
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].local_id, pending.local_id);
    Ok(())
}

#[test]
fn test_conversations_are_isolated() -> Result<()> {
    let store = SqliteMessageStore::open_in_memory()?;
    store.save_message(&remote_message(PEER, ME, "to alice", 100, "r1"))?;
    store.save_message(&remote_message(PEER, "carol", "to carol", 100, "r2"))?;
    store.save_message(&remote_message("carol", ME, "carol to alice", 100, "r3"))?;

    let messages = store.get_messages(ME, PEER)?;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].message_text, "to alice");

    assert_eq!(store.unread_count(ME, PEER)?, 1);
    assert_eq!(store.mark_messages_as_read(ME, PEER)?, 1);
    assert_eq!(store.mark_messages_as_read(ME, PEER)?, 0);
    assert_eq!(store.unread_count("carol", PEER)?, 1);
    assert_eq!(store.unread_count(ME, "carol")?, 1);
    Ok(())
}

#[test]
fn test_concurrent_writers_converge() -> Result<()> {
    let store = Arc::new(SqliteMessageStore::open_in_memory()?);
    let original = Message::outgoing(ME, PEER, "shared", 100);
    store.save_message(&original)?;

    // Several screens saving the same acknowledged message at once
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let store = store.clone();
            let mut copy = original.clone();
            copy.remote_id = Some("r1".to_string());
            copy.is_read = i % 2 == 0;
            thread::spawn(move || store.save_message(&copy))
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer thread panicked")?;
    }

    // Same remote id arriving under a fresh local id from the feed
    store.save_message(&remote_message(ME, PEER, "shared", 100, "r1"))?;

    let messages = store.get_messages(ME, PEER)?;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].local_id, original.local_id);
    assert_eq!(messages[0].remote_id.as_deref(), Some("r1"));
    assert!(messages[0].is_read);
    assert!(store.pending_messages(ME)?.is_empty());
    Ok(())
}

#[test]
fn test_reconciler_over_sqlite_skips_known_remote_id() -> Result<()> {
    setup_logging();
    let store = Arc::new(SqliteMessageStore::open_in_memory()?);
    store.save_message(&remote_message("A", ME, "hi", 100, "r1"))?;

    let (changes, _rx) = broadcast::channel(16);
    let mut reconciler = Reconciler::new(ConversationPair::new(ME, "A"), store.clone(), changes);
    reconciler.load_local()?;

    let replay = FeedEvent::Added {
        remote_id: "r1".to_string(),
        payload: payload("A", ME, "hi", 100),
    };
    assert_eq!(reconciler.handle_feed_event(replay)?, ApplyOutcome::AlreadyProcessed);

    let fresh = FeedEvent::Added {
        remote_id: "r2".to_string(),
        payload: payload("A", ME, "again", 50),
    };
    assert_eq!(reconciler.handle_feed_event(fresh)?, ApplyOutcome::Inserted(0));
    assert_eq!(reconciler.view().len(), 2);
    assert_eq!(store.get_messages(ME, "A")?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_delivered_message_is_not_pending_after_reopen() -> Result<()> {
    setup_logging();
    let dir = tempdir()?;
    let path = dir.path().join("messages.db");
    let feed = Arc::new(MemoryFeed::new());

    {
        let store = Arc::new(SqliteMessageStore::open_at(&path)?);
        let session = ChatSession::open(
            ConversationPair::new(ME, PEER),
            store,
            feed.clone(),
            SyncConfig::default(),
        )?;
        session.on_became_visible().await?;
        session.send_message("persist me").await?;
        wait_for_view(&session, |v| v.len() == 1 && !v[0].is_pending(), 5).await?;
        session.close().await?;
    }

    let store = SqliteMessageStore::open_at(&path)?;
    assert!(store.pending_messages(ME)?.is_empty());
    let messages = store.get_messages(ME, PEER)?;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].message_text, "persist me");
    assert!(messages[0].timestamp <= now_millis());
    Ok(())
}
