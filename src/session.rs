// Chat session: the single task that owns one conversation view.
//
// Screen code talks to it through `ChatSession`; feed events and delivery
// results are forwarded onto the same command queue, so the view and the
// processed-id set only ever change on this task.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::feed::{FeedSubscription, RemoteFeed};
use crate::models::{now_millis, ConversationPair, FeedEvent, Message};
use crate::store::MessageStore;
use crate::sync::{self, Reconciler};
use crate::view::ViewChange;

const VIEW_CHANGE_CAPACITY: usize = 256;

enum Command {
    Send {
        text: String,
        reply: oneshot::Sender<SyncResult<Option<String>>>,
    },
    BecameVisible {
        reply: oneshot::Sender<SyncResult<()>>,
    },
    BecameHidden {
        reply: oneshot::Sender<SyncResult<()>>,
    },
    Feed {
        generation: u64,
        event: FeedEvent,
    },
    Delivered {
        message: Message,
        outcome: SyncResult<String>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<Message>>,
    },
    ProcessedCount {
        reply: oneshot::Sender<usize>,
    },
    Close,
}

/// Handle to a running conversation
pub struct ChatSession {
    commands: mpsc::Sender<Command>,
    changes: broadcast::Sender<ViewChange>,
    task: JoinHandle<SyncResult<()>>,
}

impl ChatSession {
    /// Open the conversation: load the stored messages, mark the peer's
    /// messages read and start the session task, which resends pending
    /// messages. Call [`ChatSession::on_became_visible`] to go live.
    ///
    /// Must be called inside a tokio runtime.
    pub fn open(
        pair: ConversationPair,
        store: Arc<dyn MessageStore>,
        feed: Arc<dyn RemoteFeed>,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        config.validate()?;
        let (changes, _) = broadcast::channel(VIEW_CHANGE_CAPACITY);
        let mut reconciler = Reconciler::new(pair, store, changes.clone());
        reconciler.load_local()?;
        reconciler.mark_all_read()?;

        let (commands, commands_rx) = mpsc::channel(config.command_buffer);
        let actor = SessionActor {
            reconciler,
            feed,
            config,
            commands: commands.downgrade(),
            attached: None,
            generation: 0,
            in_flight: HashSet::new(),
        };
        let task = tokio::spawn(actor.run(commands_rx));

        Ok(ChatSession {
            commands,
            changes,
            task,
        })
    }

    /// Every later mutation of the view
    pub fn view_changes(&self) -> BroadcastStream<ViewChange> {
        BroadcastStream::new(self.changes.subscribe())
    }

    /// The current ordered view
    pub async fn snapshot(&self) -> SyncResult<Vec<Message>> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Send `text` to the peer. Returns the local id of the new entry, or
    /// `None` when the text is empty.
    pub async fn send_message(&self, text: &str) -> SyncResult<Option<String>> {
        let text = text.to_string();
        self.request(|reply| Command::Send { text, reply }).await?
    }

    /// Resend pending messages, attach the remote feed and mark the peer's
    /// messages read
    pub async fn on_became_visible(&self) -> SyncResult<()> {
        self.request(|reply| Command::BecameVisible { reply }).await?
    }

    /// Detach the remote feed. No feed event is applied after this returns.
    pub async fn on_became_hidden(&self) -> SyncResult<()> {
        self.request(|reply| Command::BecameHidden { reply }).await?
    }

    /// Number of remote ids merged into the view so far
    pub async fn processed_count(&self) -> SyncResult<usize> {
        self.request(|reply| Command::ProcessedCount { reply }).await
    }

    /// Stop the session task. Returns the error that ended it early, if any.
    pub async fn close(self) -> SyncResult<()> {
        let _ = self.commands.send(Command::Close).await;
        match self.task.await {
            Ok(result) => result,
            Err(e) => {
                error!("Chat session task failed: {}", e);
                Err(SyncError::SessionClosed)
            }
        }
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> SyncResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| SyncError::SessionClosed)?;
        response.await.map_err(|_| SyncError::SessionClosed)
    }
}

/// A live feed subscription and the task tagging its events
struct AttachedFeed {
    generation: u64,
    _subscription: FeedSubscription,
    forwarder: JoinHandle<()>,
}

impl Drop for AttachedFeed {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

struct SessionActor {
    reconciler: Reconciler,
    feed: Arc<dyn RemoteFeed>,
    config: SyncConfig,
    commands: mpsc::WeakSender<Command>,
    attached: Option<AttachedFeed>,
    generation: u64,
    in_flight: HashSet<String>, // local ids with a delivery running
}

/// Hand `result` to the caller; a store failure also ends the session
fn settle<T>(reply: oneshot::Sender<SyncResult<T>>, result: SyncResult<T>) -> SyncResult<()> {
    match result {
        Err(e @ SyncError::StoreUnavailable(_)) => {
            let _ = reply.send(Err(e.clone()));
            Err(e)
        }
        other => {
            let _ = reply.send(other);
            Ok(())
        }
    }
}

impl SessionActor {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) -> SyncResult<()> {
        let peer = self.reconciler.pair().peer.clone();
        info!("Chat session with {} started", peer);

        let result = self.serve(&mut commands).await;
        self.attached = None;

        match &result {
            Ok(()) => info!("Chat session with {} closed", peer),
            Err(e) => error!("Chat session with {} stopped: {}", peer, e),
        }
        result
    }

    async fn serve(&mut self, commands: &mut mpsc::Receiver<Command>) -> SyncResult<()> {
        self.resend_pending()?;

        while let Some(command) = commands.recv().await {
            match command {
                Command::Close => break,
                command => self.handle(command).await?,
            }
        }
        Ok(())
    }

    async fn handle(&mut self, command: Command) -> SyncResult<()> {
        match command {
            Command::Send { text, reply } => {
                let result = self.reconciler.begin_send(&text, now_millis());
                let result = result.map(|queued| {
                    queued.map(|message| {
                        let local_id = message.local_id.clone();
                        self.deliver(message);
                        local_id
                    })
                });
                settle(reply, result)
            }
            Command::BecameVisible { reply } => {
                let result = self.became_visible().await;
                settle(reply, result)
            }
            Command::BecameHidden { reply } => {
                self.detach();
                settle(reply, Ok(()))
            }
            Command::Feed { generation, event } => self.feed_event(generation, event),
            Command::Delivered { message, outcome } => {
                self.in_flight.remove(&message.local_id);
                match outcome {
                    Ok(remote_id) => {
                        self.reconciler.complete_delivery(&message, &remote_id);
                        Ok(())
                    }
                    Err(e @ SyncError::StoreUnavailable(_)) => Err(e),
                    Err(e) => {
                        self.reconciler.delivery_failed(&message, &e);
                        Ok(())
                    }
                }
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.reconciler.view().messages().to_vec());
                Ok(())
            }
            Command::ProcessedCount { reply } => {
                let _ = reply.send(self.reconciler.processed_count());
                Ok(())
            }
            Command::Close => Ok(()),
        }
    }

    async fn became_visible(&mut self) -> SyncResult<()> {
        self.resend_pending()?;
        let attached = self.attach().await;
        self.reconciler.mark_all_read()?;
        attached
    }

    async fn attach(&mut self) -> SyncResult<()> {
        if self.attached.is_some() {
            debug!("Feed already attached");
            return Ok(());
        }

        self.generation += 1;
        let generation = self.generation;
        let (events_tx, mut events_rx) = mpsc::channel(self.config.command_buffer);
        let query = self.config.feed_query(now_millis());

        let subscription = match self.feed.subscribe(query, events_tx).await {
            Ok(subscription) => subscription,
            Err(e) => {
                error!("Failed to attach message feed: {}", e);
                return Err(e);
            }
        };

        let commands = self.commands.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                let Some(commands) = commands.upgrade() else {
                    break;
                };
                if commands.send(Command::Feed { generation, event }).await.is_err() {
                    break;
                }
            }
        });

        self.attached = Some(AttachedFeed {
            generation,
            _subscription: subscription,
            forwarder,
        });
        info!("Message feed attached (generation {})", generation);
        Ok(())
    }

    fn detach(&mut self) {
        if let Some(attached) = self.attached.take() {
            info!("Message feed detached (generation {})", attached.generation);
        }
    }

    fn feed_event(&mut self, generation: u64, event: FeedEvent) -> SyncResult<()> {
        let current = self.attached.as_ref().map(|a| a.generation);
        if current != Some(generation) {
            debug!("Dropping event from detached feed generation {}", generation);
            return Ok(());
        }

        if let FeedEvent::Error(reason) = event {
            // No automatic resubscribe; the next visibility change re-attaches
            error!("Message feed cancelled: {}", reason);
            self.attached = None;
            return Ok(());
        }

        self.reconciler.handle_feed_event(event)?;
        Ok(())
    }

    fn resend_pending(&mut self) -> SyncResult<()> {
        let pending = self.reconciler.pending_outgoing()?;
        if !pending.is_empty() {
            info!("Resending {} pending messages", pending.len());
        }
        for message in pending {
            self.deliver(message);
        }
        Ok(())
    }

    /// Push `message` on its own task; the outcome comes back as a command
    fn deliver(&mut self, message: Message) {
        if !self.in_flight.insert(message.local_id.clone()) {
            debug!("Message {} is already being delivered", message.local_id);
            return;
        }

        let feed = self.feed.clone();
        let store = self.reconciler.store();
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let outcome = sync::deliver(feed.as_ref(), store.as_ref(), &message).await;
            match commands.upgrade() {
                Some(commands) => {
                    let _ = commands.send(Command::Delivered { message, outcome }).await;
                }
                None => {
                    if let Err(e) = outcome {
                        warn!("Message {} not delivered before session closed: {}", message.local_id, e);
                    }
                }
            }
        });
    }
}
