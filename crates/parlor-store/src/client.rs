//! The store client handle and its command protocol.
//!
//! Every backend is a task that services [`StoreCommand`]s from a
//! bounded channel, in arrival order.  [`StoreClient`] is the cheap,
//! cloneable handle the application holds; each call sends one command
//! and awaits its oneshot reply, so callers suspend without blocking the
//! thread.
//!
//! Subscriptions are owned resources: [`Subscription::release`] awaits
//! the backend's acknowledgement, which callers use to guarantee a new
//! identity never observes snapshots addressed to the old one.

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::{Result, StoreError};
use crate::path::TreePath;

/// A monotonically increasing per-path write counter, used by the
/// optimistic-concurrency primitives.
pub type Version = u64;

/// How many times a transaction re-reads and retries before giving up.
pub const TRANSACTION_MAX_RETRIES: usize = 25;

/// One emission of a subscription: the subscribed node's children, as
/// `(key, value)` pairs in the subscription's requested order.  The
/// whole snapshot replaces whatever the consumer materialized before.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub entries: Vec<(String, Value)>,
}

/// Commands serviced by a store backend.
#[derive(Debug)]
pub enum StoreCommand {
    /// Read the value at a path (`None` when the node does not exist).
    Get {
        path: TreePath,
        reply: oneshot::Sender<Option<Value>>,
    },
    /// Write (`Some`) or delete (`None`) the node at a path.
    Set {
        path: TreePath,
        value: Option<Value>,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Insert a child under `path` with a store-generated key; keys sort
    /// lexicographically in creation order.
    Push {
        path: TreePath,
        value: Value,
        reply: oneshot::Sender<Result<String>>,
    },
    /// Read a value together with its current write version.
    GetVersioned {
        path: TreePath,
        reply: oneshot::Sender<(Option<Value>, Version)>,
    },
    /// Write only if the path's version is still `expected`.  Replies
    /// `Ok(false)` when a concurrent writer got there first.
    CompareAndSet {
        path: TreePath,
        expected: Version,
        value: Option<Value>,
        reply: oneshot::Sender<Result<bool>>,
    },
    /// Register a deferred write the store applies by itself if this
    /// client disconnects without cancelling.  The reply is the store's
    /// acknowledgement that the registration is durable.
    OnDisconnectSet {
        path: TreePath,
        value: Value,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Open a subscription on a collection node.  The current snapshot
    /// is emitted immediately, then one snapshot per change under the
    /// path.  `order_child` sorts entries by that child field ascending;
    /// otherwise entries come in key order.
    Subscribe {
        path: TreePath,
        order_child: Option<String>,
        reply: oneshot::Sender<(u64, mpsc::UnboundedReceiver<Snapshot>)>,
    },
    /// Close a subscription.  `reply` is `Some` when the caller wants to
    /// wait for the backend to confirm the release.
    Unsubscribe {
        id: u64,
        reply: Option<oneshot::Sender<()>>,
    },
}

/// Handle to a store backend task.
#[derive(Debug, Clone)]
pub struct StoreClient {
    cmd_tx: mpsc::Sender<StoreCommand>,
    connected_rx: watch::Receiver<bool>,
}

impl StoreClient {
    /// Wrap the channels a backend hands out at spawn time.
    pub fn new(cmd_tx: mpsc::Sender<StoreCommand>, connected_rx: watch::Receiver<bool>) -> Self {
        Self {
            cmd_tx,
            connected_rx,
        }
    }

    /// The store's connection-state stream (the `.info/connected`
    /// equivalent).  `true` while the backend considers this client
    /// connected.
    pub fn connection_state(&self) -> watch::Receiver<bool> {
        self.connected_rx.clone()
    }

    pub async fn get(&self, path: &TreePath) -> Result<Option<Value>> {
        let (reply, rx) = oneshot::channel();
        self.send(StoreCommand::Get {
            path: path.clone(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| StoreError::BackendClosed)
    }

    pub async fn set(&self, path: &TreePath, value: Value) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(StoreCommand::Set {
            path: path.clone(),
            value: Some(value),
            reply,
        })
        .await?;
        rx.await.map_err(|_| StoreError::BackendClosed)?
    }

    pub async fn remove(&self, path: &TreePath) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(StoreCommand::Set {
            path: path.clone(),
            value: None,
            reply,
        })
        .await?;
        rx.await.map_err(|_| StoreError::BackendClosed)?
    }

    /// Insert a child with a generated key and return the key.
    pub async fn push(&self, path: &TreePath, value: Value) -> Result<String> {
        let (reply, rx) = oneshot::channel();
        self.send(StoreCommand::Push {
            path: path.clone(),
            value,
            reply,
        })
        .await?;
        rx.await.map_err(|_| StoreError::BackendClosed)?
    }

    pub async fn get_versioned(&self, path: &TreePath) -> Result<(Option<Value>, Version)> {
        let (reply, rx) = oneshot::channel();
        self.send(StoreCommand::GetVersioned {
            path: path.clone(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| StoreError::BackendClosed)
    }

    pub async fn compare_and_set(
        &self,
        path: &TreePath,
        expected: Version,
        value: Option<Value>,
    ) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(StoreCommand::CompareAndSet {
            path: path.clone(),
            expected,
            value,
            reply,
        })
        .await?;
        rx.await.map_err(|_| StoreError::BackendClosed)?
    }

    /// Register the dead-man's-switch write for `path`.  Resolves once
    /// the store has acknowledged the registration; callers that must
    /// order a subsequent write after it (the presence handshake) simply
    /// await this first.
    pub async fn on_disconnect_set(&self, path: &TreePath, value: Value) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(StoreCommand::OnDisconnectSet {
            path: path.clone(),
            value,
            reply,
        })
        .await?;
        rx.await.map_err(|_| StoreError::BackendClosed)?
    }

    /// Subscribe to a collection node, entries in key order.
    pub async fn subscribe(&self, path: &TreePath) -> Result<Subscription> {
        self.subscribe_inner(path, None).await
    }

    /// Subscribe to a collection node, entries ordered ascending by the
    /// given child field.
    pub async fn subscribe_ordered_by(&self, path: &TreePath, child: &str) -> Result<Subscription> {
        self.subscribe_inner(path, Some(child.to_string())).await
    }

    async fn subscribe_inner(
        &self,
        path: &TreePath,
        order_child: Option<String>,
    ) -> Result<Subscription> {
        let (reply, rx) = oneshot::channel();
        self.send(StoreCommand::Subscribe {
            path: path.clone(),
            order_child,
            reply,
        })
        .await?;
        let (id, snapshots) = rx.await.map_err(|_| StoreError::BackendClosed)?;
        Ok(Subscription {
            id,
            cmd_tx: self.cmd_tx.clone(),
            snapshots,
            released: false,
        })
    }

    /// Atomic read-modify-write with optimistic retries.
    ///
    /// `apply` must be pure: it maps the current value (`None` when the
    /// node is absent) to the desired value (`None` deletes the node).
    /// When a concurrent writer invalidates the read, the combinator
    /// re-reads and re-applies, up to [`TRANSACTION_MAX_RETRIES`] times.
    /// Returns the value that was committed.
    pub async fn transact<F>(&self, path: &TreePath, mut apply: F) -> Result<Option<Value>>
    where
        F: FnMut(Option<Value>) -> Option<Value>,
    {
        for attempt in 1..=TRANSACTION_MAX_RETRIES {
            let (current, version) = self.get_versioned(path).await?;
            let next = apply(current);
            if self.compare_and_set(path, version, next.clone()).await? {
                return Ok(next);
            }
            tracing::debug!(path = %path, attempt, "transaction conflict, retrying");
        }
        Err(StoreError::TransactionContention(TRANSACTION_MAX_RETRIES))
    }

    async fn send(&self, cmd: StoreCommand) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| StoreError::BackendClosed)
    }
}

/// An open subscription.  Dropping the handle asks the backend to close
/// it on a best-effort basis; [`Subscription::release`] waits for the
/// backend's confirmation.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    cmd_tx: mpsc::Sender<StoreCommand>,
    snapshots: mpsc::UnboundedReceiver<Snapshot>,
    released: bool,
}

impl Subscription {
    /// Next snapshot, or `None` once the stream is closed.  A closed
    /// stream is not surfaced as an error: the consumer simply stays on
    /// its last materialized state.
    pub async fn recv(&mut self) -> Option<Snapshot> {
        self.snapshots.recv().await
    }

    /// Close the subscription and wait until the backend has stopped
    /// delivering to it.
    pub async fn release(mut self) {
        self.released = true;
        let (reply, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(StoreCommand::Unsubscribe {
                id: self.id,
                reply: Some(reply),
            })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.released {
            let _ = self.cmd_tx.try_send(StoreCommand::Unsubscribe {
                id: self.id,
                reply: None,
            });
        }
    }
}
