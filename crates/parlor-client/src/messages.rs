//! The message stream: materializes the shared room's history and owns
//! the send / reply-context operations.
//!
//! The subscription is ordered by the server-assigned `timestamp`
//! child; every snapshot wholesale-replaces the materialized list.  The
//! server's ordering is authoritative; the client re-sorts only to
//! guard against placeholder values, never to impose its own clock.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use parlor_shared::types::{Message, MessageId, ReactionMap, Timestamp};
use parlor_shared::Identity;
use parlor_store::client::Snapshot;
use parlor_store::{path, StoreClient, StoreError, Subscription};

use crate::events::{emit, ClientEvent, EventSender};

/// Snapshot of the message a pending send will reply to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyContext {
    pub id: MessageId,
    pub text: String,
    pub sender_label: String,
}

/// Materialized view of the room plus the send/reply operations.
#[derive(Debug)]
pub struct MessageStream {
    store: StoreClient,
    identity: Identity,
    list_rx: watch::Receiver<Vec<Message>>,
    events_tx: EventSender,
    pending_reply: Arc<Mutex<Option<ReplyContext>>>,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl MessageStream {
    /// Subscribe to the room and start materializing.
    pub async fn spawn(
        store: StoreClient,
        identity: Identity,
        events_tx: EventSender,
    ) -> Result<Self, StoreError> {
        let sub = store
            .subscribe_ordered_by(&path::messages_root(), "timestamp")
            .await?;
        let (list_tx, list_rx) = watch::channel(Vec::new());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let pending_reply = Arc::new(Mutex::new(None));

        let task = tokio::spawn(run(
            sub,
            list_tx,
            events_tx.clone(),
            Arc::clone(&pending_reply),
            shutdown_rx,
        ));

        Ok(Self {
            store,
            identity,
            list_rx,
            events_tx,
            pending_reply,
            shutdown_tx,
            task,
        })
    }

    /// The materialized, time-ordered message list.
    pub fn messages(&self) -> watch::Receiver<Vec<Message>> {
        self.list_rx.clone()
    }

    /// Look a message up by id in the current materialized list.  A
    /// reply whose target has left the list simply finds nothing.
    pub fn find(&self, id: &MessageId) -> Option<Message> {
        self.list_rx.borrow().iter().find(|m| &m.id == id).cloned()
    }

    /// Send a message.  Whitespace-only input is a no-op.  A pending
    /// reply is attached as a denormalized snapshot and cleared, whether
    /// or not the write succeeds.
    pub async fn send(&self, text: &str) -> Result<Option<MessageId>, StoreError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }

        let reply = lock_reply(&self.pending_reply).take();
        let message = Message {
            id: MessageId::default(),
            text: text.to_string(),
            sender_email: self.identity.email.clone(),
            uid: self.identity.uid.clone(),
            timestamp: Timestamp::Server,
            sender_name: Some(self.identity.display_label()),
            sender_photo_url: self.identity.photo_url.clone(),
            reactions: ReactionMap::new(),
            reply_to: reply.as_ref().map(|r| r.id.clone()),
            reply_to_text: reply.as_ref().map(|r| r.text.clone()),
            reply_to_sender: reply.map(|r| r.sender_label),
        };

        let key = self
            .store
            .push(&path::messages_root(), serde_json::to_value(&message)?)
            .await?;
        debug!(message_id = %key, "message sent");
        Ok(Some(MessageId(key)))
    }

    /// Capture `message` as the target of the next send and ask the
    /// view to focus the composer.
    pub fn begin_reply(&self, message: &Message) {
        *lock_reply(&self.pending_reply) = Some(ReplyContext {
            id: message.id.clone(),
            text: message.text.clone(),
            sender_label: message.sender_label(),
        });
        emit(&self.events_tx, ClientEvent::FocusComposer);
    }

    /// Drop the pending reply, if any.
    pub fn cancel_reply(&self) {
        lock_reply(&self.pending_reply).take();
    }

    /// The reply the next send would attach.
    pub fn reply_target(&self) -> Option<ReplyContext> {
        lock_reply(&self.pending_reply).clone()
    }

    /// Release the subscription and stop materializing.
    pub async fn shutdown(self) {
        if self.shutdown_tx.send(()).is_ok() {
            let _ = self.task.await;
        } else {
            self.task.abort();
        }
    }
}

async fn run(
    mut sub: Subscription,
    list_tx: watch::Sender<Vec<Message>>,
    events_tx: EventSender,
    pending_reply: Arc<Mutex<Option<ReplyContext>>>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut sub_open = true;
    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                sub.release().await;
                debug!("message stream stopped");
                break;
            }
            snapshot = sub.recv(), if sub_open => {
                match snapshot {
                    Some(snapshot) => {
                        let _ = list_tx.send(materialize(snapshot));
                        // Scrolling would yank focus away from the reply
                        // banner, so it is suppressed while replying.
                        if lock_reply(&pending_reply).is_none() {
                            emit(&events_tx, ClientEvent::ScrollToLatest);
                        }
                    }
                    // Closed stream: stay on last-known state.
                    None => sub_open = false,
                }
            }
        }
    }
}

fn materialize(snapshot: Snapshot) -> Vec<Message> {
    let mut list = Vec::with_capacity(snapshot.entries.len());
    for (key, value) in snapshot.entries {
        match serde_json::from_value::<Message>(value) {
            Ok(mut message) => {
                message.id = MessageId(key);
                list.push(message);
            }
            Err(e) => warn!(message_id = %key, error = %e, "skipping malformed message"),
        }
    }
    list.sort_by(|a, b| {
        let ka = a.timestamp.millis().unwrap_or(i64::MAX);
        let kb = b.timestamp.millis().unwrap_or(i64::MAX);
        ka.cmp(&kb).then_with(|| a.id.cmp(&b.id))
    });
    list
}

fn lock_reply(pending: &Mutex<Option<ReplyContext>>) -> MutexGuard<'_, Option<ReplyContext>> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
