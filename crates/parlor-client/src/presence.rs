//! Presence: publishes this client's online/offline status and mirrors
//! everyone's status records into local state.
//!
//! The protocol rides the store's connection signal.  On every
//! transition to connected, the tracker first registers the deferred
//! "set me offline" write (the dead-man's-switch) and waits for the
//! store to acknowledge it, and only then writes "online": a crash
//! between the two must never leave the record stuck online.  The store
//! consumes registrations when the connection drops, so the
//! registration is redone on every reconnect.  A drop itself needs no
//! local action.

use std::collections::HashMap;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use parlor_shared::types::{PresenceRecord, UserId};
use parlor_store::client::Snapshot;
use parlor_store::{path, StoreClient, StoreError, Subscription};

/// Publishes the local identity's status and mirrors the status tree.
#[derive(Debug)]
pub struct PresenceTracker {
    statuses_rx: watch::Receiver<HashMap<UserId, PresenceRecord>>,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl PresenceTracker {
    /// Start tracking for `uid`.  If the store is currently connected,
    /// the online handshake completes before this returns.
    pub async fn spawn(store: StoreClient, uid: UserId) -> Result<Self, StoreError> {
        let sub = store.subscribe(&path::status_root()).await?;
        let (statuses_tx, statuses_rx) = watch::channel(HashMap::new());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let mut connected_rx = store.connection_state();
        if *connected_rx.borrow_and_update() {
            go_online(&store, &uid).await?;
        }

        let task = tokio::spawn(run(
            store,
            uid,
            sub,
            connected_rx,
            statuses_tx,
            shutdown_rx,
        ));

        Ok(Self {
            statuses_rx,
            shutdown_tx,
            task,
        })
    }

    /// Mirrored status records for every participant, replaced wholesale
    /// on each store change.
    pub fn statuses(&self) -> watch::Receiver<HashMap<UserId, PresenceRecord>> {
        self.statuses_rx.clone()
    }

    /// Whether a participant currently shows as online.
    pub fn is_online(&self, uid: &UserId) -> bool {
        self.statuses_rx
            .borrow()
            .get(uid)
            .is_some_and(PresenceRecord::is_online)
    }

    /// Clean teardown: writes offline, releases the status subscription,
    /// then returns.  The offline record is durable before the
    /// subscription is gone.
    pub async fn shutdown(self) {
        if self.shutdown_tx.send(()).is_ok() {
            let _ = self.task.await;
        } else {
            self.task.abort();
        }
    }
}

async fn run(
    store: StoreClient,
    uid: UserId,
    mut sub: Subscription,
    mut connected_rx: watch::Receiver<bool>,
    statuses_tx: watch::Sender<HashMap<UserId, PresenceRecord>>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut sub_open = true;
    let mut conn_open = true;

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                if let Err(e) = write_status(&store, &uid, PresenceRecord::offline()).await {
                    error!(uid = %uid, error = %e, "failed to write offline status");
                }
                sub.release().await;
                debug!(uid = %uid, "presence tracker stopped");
                break;
            }
            changed = connected_rx.changed(), if conn_open => {
                match changed {
                    Ok(()) => {
                        if *connected_rx.borrow_and_update() {
                            if let Err(e) = go_online(&store, &uid).await {
                                error!(uid = %uid, error = %e, "presence handshake failed");
                            }
                        }
                        // Disconnected: nothing to do locally; the
                        // deferred write covers a permanent loss.
                    }
                    Err(_) => conn_open = false,
                }
            }
            snapshot = sub.recv(), if sub_open => {
                match snapshot {
                    Some(snapshot) => {
                        let _ = statuses_tx.send(mirror(snapshot));
                    }
                    // Closed stream: stay on last-known state.
                    None => sub_open = false,
                }
            }
        }
    }
}

/// Register the deferred offline write, await the store's ack, then
/// announce online.  Order matters.
async fn go_online(store: &StoreClient, uid: &UserId) -> Result<(), StoreError> {
    let status = path::status(uid);
    store
        .on_disconnect_set(&status, serde_json::to_value(PresenceRecord::offline())?)
        .await?;
    write_status(store, uid, PresenceRecord::online()).await?;
    debug!(uid = %uid, "presence online");
    Ok(())
}

async fn write_status(
    store: &StoreClient,
    uid: &UserId,
    record: PresenceRecord,
) -> Result<(), StoreError> {
    store
        .set(&path::status(uid), serde_json::to_value(record)?)
        .await
}

fn mirror(snapshot: Snapshot) -> HashMap<UserId, PresenceRecord> {
    let mut statuses = HashMap::new();
    for (uid, value) in snapshot.entries {
        match serde_json::from_value::<PresenceRecord>(value) {
            Ok(record) => {
                statuses.insert(UserId(uid), record);
            }
            Err(e) => debug!(uid = %uid, error = %e, "skipping malformed status record"),
        }
    }
    statuses
}
