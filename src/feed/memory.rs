// In-process message log implementing RemoteFeed
//
// Stands in for a hosted realtime database: entries are JSON payloads
// under generated keys, and every change is fanned out to live
// subscribers over a broadcast channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;

use super::{FeedQuery, FeedSubscription, RemoteFeed};
use crate::error::{SyncError, SyncResult};
use crate::models::{FeedEvent, Message};

const LIVE_CAPACITY: usize = 256;

struct FeedEntry {
    key: String,
    payload: Value,
}

#[derive(Default)]
struct FeedLog {
    entries: Vec<FeedEntry>,
    next_seq: u64,
}

pub struct MemoryFeed {
    log: Mutex<FeedLog>,
    live: broadcast::Sender<FeedEvent>,
    offline: AtomicBool,
    latency: Duration,
}

fn timestamp_of(payload: &Value) -> Option<i64> {
    payload.get("timestamp").and_then(Value::as_i64)
}

impl MemoryFeed {
    pub fn new() -> Self {
        let (live, _) = broadcast::channel(LIVE_CAPACITY);
        MemoryFeed {
            log: Mutex::new(FeedLog::default()),
            live,
            offline: AtomicBool::new(false),
            latency: Duration::ZERO,
        }
    }

    /// Delay every push by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// While offline, pushes and new subscriptions fail
    pub fn set_offline(&self, offline: bool) {
        info!("Memory feed is now {}", if offline { "offline" } else { "online" });
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// Append a raw payload as another client would, returning its key
    pub fn insert_payload(&self, payload: Value) -> SyncResult<String> {
        let mut log = self.lock()?;
        log.next_seq += 1;
        let key = format!("-{:016}", log.next_seq);
        log.entries.push(FeedEntry {
            key: key.clone(),
            payload: payload.clone(),
        });

        // Sent under the lock so subscribers see log order
        let _ = self.live.send(FeedEvent::Added {
            remote_id: key.clone(),
            payload,
        });
        debug!("Appended {} to memory feed", key);
        Ok(key)
    }

    /// Replace the payload under `key`. Returns false for unknown keys.
    pub fn update_payload(&self, key: &str, payload: Value) -> SyncResult<bool> {
        let mut log = self.lock()?;
        match log.entries.iter_mut().find(|e| e.key == key) {
            Some(entry) => {
                entry.payload = payload;
                let _ = self.live.send(FeedEvent::Changed {
                    remote_id: key.to_string(),
                });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn remove(&self, key: &str) -> SyncResult<bool> {
        let mut log = self.lock()?;
        let before = log.entries.len();
        log.entries.retain(|e| e.key != key);
        if log.entries.len() == before {
            return Ok(false);
        }
        let _ = self.live.send(FeedEvent::Removed {
            remote_id: key.to_string(),
        });
        Ok(true)
    }

    /// Fail every live subscription with `reason`
    pub fn report_error(&self, reason: &str) {
        warn!("Memory feed reporting error to subscribers: {}", reason);
        let _ = self.live.send(FeedEvent::Error(reason.to_string()));
    }

    pub fn payload(&self, key: &str) -> Option<Value> {
        let log = self.lock().ok()?;
        log.entries
            .iter()
            .find(|e| e.key == key)
            .map(|e| e.payload.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().map(|log| log.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> SyncResult<MutexGuard<'_, FeedLog>> {
        self.log
            .lock()
            .map_err(|_| SyncError::Subscription("feed log lock poisoned".to_string()))
    }
}

impl Default for MemoryFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteFeed for MemoryFeed {
    async fn subscribe(
        &self,
        query: FeedQuery,
        events: mpsc::Sender<FeedEvent>,
    ) -> SyncResult<FeedSubscription> {
        if self.is_offline() {
            return Err(SyncError::Subscription("feed is offline".to_string()));
        }

        // Snapshot and live receiver are taken together so no entry is missed
        let (window, mut live_rx) = {
            let log = self.lock()?;
            let mut window: Vec<(i64, String, Value)> = log
                .entries
                .iter()
                .filter_map(|e| {
                    let ts = timestamp_of(&e.payload)?;
                    query
                        .admits(ts)
                        .then(|| (ts, e.key.clone(), e.payload.clone()))
                })
                .collect();
            window.sort_by_key(|(ts, _, _)| *ts);
            let skip = window.len().saturating_sub(query.limit);
            (window.split_off(skip), self.live.subscribe())
        };

        debug!(
            "Feed subscription from {} delivering {} initial entries",
            query.start_at,
            window.len()
        );

        let task = tokio::spawn(async move {
            for (_, key, payload) in window {
                let event = FeedEvent::Added {
                    remote_id: key,
                    payload,
                };
                if events.send(event).await.is_err() {
                    return;
                }
            }

            loop {
                let event = match live_rx.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        // Skipped adds are gone; end so the owner re-attaches and replays the window
                        warn!("Feed subscriber lagged, {} events skipped", skipped);
                        let reason = format!("subscriber lagged, {} events skipped", skipped);
                        let _ = events.send(FeedEvent::Error(reason)).await;
                        break;
                    }
                    Err(RecvError::Closed) => break,
                };

                if let FeedEvent::Added { payload, .. } = &event {
                    if !timestamp_of(payload).map_or(false, |ts| query.admits(ts)) {
                        continue;
                    }
                }

                let is_error = matches!(event, FeedEvent::Error(_));
                if events.send(event).await.is_err() || is_error {
                    break;
                }
            }
        });

        Ok(FeedSubscription::new(task))
    }

    async fn push(&self, message: &Message) -> SyncResult<String> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.is_offline() {
            return Err(SyncError::Delivery("feed is offline".to_string()));
        }
        self.insert_payload(message.to_payload())
            .map_err(|e| SyncError::Delivery(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::time::timeout;

    fn payload(ts: i64, text: &str) -> Value {
        json!({
            "senderId": "bob",
            "receiverId": "alice",
            "messageText": text,
            "timestamp": ts
        })
    }

    async fn next_event(rx: &mut mpsc::Receiver<FeedEvent>) -> FeedEvent {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for feed event")
            .expect("feed channel closed")
    }

    #[tokio::test]
    async fn test_initial_window_is_bounded_and_ordered() {
        let feed = MemoryFeed::new();
        feed.insert_payload(payload(50, "too old")).unwrap();
        feed.insert_payload(payload(300, "c")).unwrap();
        feed.insert_payload(payload(100, "a")).unwrap();
        feed.insert_payload(payload(200, "b")).unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let query = FeedQuery::new().with_start_at(100).with_limit(2);
        let _sub = feed.subscribe(query, tx).await.unwrap();

        let mut texts = Vec::new();
        for _ in 0..2 {
            if let FeedEvent::Added { payload, .. } = next_event(&mut rx).await {
                texts.push(payload["messageText"].as_str().unwrap().to_string());
            }
        }
        assert_eq!(texts, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_live_events_and_detach() {
        let feed = MemoryFeed::new();
        let (tx, mut rx) = mpsc::channel(16);
        let sub = feed.subscribe(FeedQuery::new(), tx).await.unwrap();

        let key = feed.insert_payload(payload(10, "live")).unwrap();
        assert!(matches!(next_event(&mut rx).await, FeedEvent::Added { remote_id, .. } if remote_id == key));

        feed.update_payload(&key, payload(10, "edited")).unwrap();
        assert_eq!(next_event(&mut rx).await, FeedEvent::Changed { remote_id: key.clone() });

        feed.remove(&key).unwrap();
        assert_eq!(next_event(&mut rx).await, FeedEvent::Removed { remote_id: key });

        sub.detach();
        feed.insert_payload(payload(20, "after detach")).unwrap();
        // The sender was dropped with the aborted task
        assert!(timeout(Duration::from_secs(1), rx.recv()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lagged_subscriber_reports_error_and_ends() {
        let feed = MemoryFeed::new();
        let (tx, mut rx) = mpsc::channel(1);
        let _sub = feed.subscribe(FeedQuery::new(), tx).await.unwrap();

        // Nobody drains the subscriber while the live channel overflows
        for ts in 0..(LIVE_CAPACITY as i64 + 44) {
            feed.insert_payload(payload(ts, "burst")).unwrap();
        }

        let mut added = 0;
        let mut last = None;
        while let Some(event) = timeout(Duration::from_secs(2), rx.recv()).await.unwrap() {
            if matches!(event, FeedEvent::Added { .. }) {
                added += 1;
            }
            last = Some(event);
        }
        assert!(added < LIVE_CAPACITY + 44);
        assert!(matches!(last, Some(FeedEvent::Error(_))));
    }

    #[tokio::test]
    async fn test_offline_feed_rejects_push_and_subscribe() {
        let feed = MemoryFeed::new();
        feed.set_offline(true);

        let msg = Message::outgoing("alice", "bob", "hi", 1);
        assert!(matches!(feed.push(&msg).await, Err(SyncError::Delivery(_))));

        let (tx, _rx) = mpsc::channel(1);
        assert!(matches!(
            feed.subscribe(FeedQuery::new(), tx).await,
            Err(SyncError::Subscription(_))
        ));

        feed.set_offline(false);
        let key = feed.push(&msg).await.unwrap();
        assert_eq!(feed.payload(&key).unwrap()["messageText"], "hi");
    }
}
