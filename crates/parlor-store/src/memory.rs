//! In-memory reference backend.
//!
//! Implements the whole [`StoreCommand`](crate::client::StoreCommand)
//! protocol in a single tokio task: a JSON tree with per-path write
//! versions, creation-order push keys, a strictly monotonic server
//! clock, subscription fan-out, and deferred on-disconnect writes.
//!
//! [`MemoryStoreHandle`] simulates the connection signal a hosted store
//! feeds its clients.  Dropping the connection fires (and consumes) the
//! registered deferred writes, exactly like an uncommunicated
//! disconnect; commands keep being serviced either way so tests can
//! inspect state while "offline".

use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use parlor_shared::constants::COMMAND_CHANNEL_CAPACITY;

use crate::client::{Snapshot, StoreClient, StoreCommand, Version};
use crate::path::TreePath;
use crate::value::resolve_server_timestamps;

/// Base-64 alphabet whose ASCII order matches its value order, so push
/// keys sort lexicographically in creation order.
const PUSH_ALPHABET: &[u8; 64] =
    b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

enum CtrlCommand {
    SetConnected {
        connected: bool,
        reply: oneshot::Sender<()>,
    },
}

/// Test/control handle for the simulated connection.
#[derive(Debug, Clone)]
pub struct MemoryStoreHandle {
    ctrl_tx: mpsc::Sender<CtrlCommand>,
}

impl MemoryStoreHandle {
    /// Flip the simulated connection.  Transitioning to `false` applies
    /// and clears every registered deferred write, like a dropped
    /// connection the client never got to announce.
    pub async fn set_connected(&self, connected: bool) {
        let (reply, rx) = oneshot::channel();
        if self
            .ctrl_tx
            .send(CtrlCommand::SetConnected { connected, reply })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }
}

/// Spawns the backend task.
pub struct MemoryStoreBackend;

impl MemoryStoreBackend {
    /// Start a fresh, empty store.  The simulated connection starts out
    /// up.
    pub fn spawn() -> (StoreClient, MemoryStoreHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (ctrl_tx, ctrl_rx) = mpsc::channel(8);
        let (connected_tx, connected_rx) = watch::channel(true);

        tokio::spawn(Backend::new(connected_tx).run(cmd_rx, ctrl_rx));

        (
            StoreClient::new(cmd_tx, connected_rx),
            MemoryStoreHandle { ctrl_tx },
        )
    }
}

struct SubEntry {
    path: TreePath,
    order_child: Option<String>,
    tx: mpsc::UnboundedSender<Snapshot>,
}

struct Backend {
    root: Value,
    versions: HashMap<TreePath, Version>,
    subs: HashMap<u64, SubEntry>,
    next_sub_id: u64,
    deferred: Vec<(TreePath, Value)>,
    connected_tx: watch::Sender<bool>,
    clock_last_ms: i64,
    push_last_ms: i64,
    push_seq: u64,
}

impl Backend {
    fn new(connected_tx: watch::Sender<bool>) -> Self {
        Self {
            root: Value::Object(Map::new()),
            versions: HashMap::new(),
            subs: HashMap::new(),
            next_sub_id: 0,
            deferred: Vec::new(),
            connected_tx,
            clock_last_ms: 0,
            push_last_ms: 0,
            push_seq: 0,
        }
    }

    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<StoreCommand>,
        mut ctrl_rx: mpsc::Receiver<CtrlCommand>,
    ) {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                ctrl = ctrl_rx.recv() => match ctrl {
                    Some(CtrlCommand::SetConnected { connected, reply }) => {
                        self.set_connected(connected);
                        let _ = reply.send(());
                    }
                    None => break,
                },
            }
        }
        debug!("memory store backend terminated");
    }

    fn handle_command(&mut self, cmd: StoreCommand) {
        match cmd {
            StoreCommand::Get { path, reply } => {
                let _ = reply.send(node_at(&self.root, &path).cloned());
            }
            StoreCommand::Set { path, value, reply } => {
                self.write(&path, value);
                let _ = reply.send(Ok(()));
            }
            StoreCommand::Push { path, value, reply } => {
                let now = self.now_ms();
                let key = self.next_push_id(now);
                let mut value = value;
                resolve_server_timestamps(&mut value, now);
                self.write_resolved(&path.child(&key), Some(value));
                let _ = reply.send(Ok(key));
            }
            StoreCommand::GetVersioned { path, reply } => {
                // Materialize the counter so later ancestor writes are
                // guaranteed to advance it.
                self.versions.entry(path.clone()).or_insert(0);
                let value = node_at(&self.root, &path).cloned();
                let version = self.versions[&path];
                let _ = reply.send((value, version));
            }
            StoreCommand::CompareAndSet {
                path,
                expected,
                value,
                reply,
            } => {
                let current = self.versions.get(&path).copied().unwrap_or(0);
                if current != expected {
                    let _ = reply.send(Ok(false));
                } else {
                    self.write(&path, value);
                    let _ = reply.send(Ok(true));
                }
            }
            StoreCommand::OnDisconnectSet { path, value, reply } => {
                // One pending write per path; a re-registration replaces
                // the previous one.
                self.deferred.retain(|(p, _)| p != &path);
                self.deferred.push((path, value));
                let _ = reply.send(Ok(()));
            }
            StoreCommand::Subscribe {
                path,
                order_child,
                reply,
            } => {
                let (tx, rx) = mpsc::unbounded_channel();
                let id = self.next_sub_id;
                self.next_sub_id += 1;
                let entry = SubEntry {
                    path,
                    order_child,
                    tx,
                };
                // Initial snapshot fires immediately.
                let _ = entry.tx.send(self.snapshot_for(&entry));
                self.subs.insert(id, entry);
                let _ = reply.send((id, rx));
            }
            StoreCommand::Unsubscribe { id, reply } => {
                self.subs.remove(&id);
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
            }
        }
    }

    fn set_connected(&mut self, connected: bool) {
        let was = *self.connected_tx.borrow();
        if connected == was {
            return;
        }
        if !connected {
            // The dead-man's-switch: registrations fire once, then are
            // consumed.  Clients must re-register after reconnecting.
            let pending = std::mem::take(&mut self.deferred);
            debug!(count = pending.len(), "connection dropped, firing deferred writes");
            for (path, value) in pending {
                self.write(&path, Some(value));
            }
        }
        self.connected_tx.send_replace(connected);
    }

    /// Resolve placeholders, apply, bump versions, fan out snapshots.
    fn write(&mut self, path: &TreePath, value: Option<Value>) {
        let value = match value {
            Some(mut v) => {
                let now = self.now_ms();
                resolve_server_timestamps(&mut v, now);
                // Writing null is a delete, same as the hosted store.
                if v.is_null() {
                    None
                } else {
                    Some(v)
                }
            }
            None => None,
        };
        self.write_resolved(path, value);
    }

    fn write_resolved(&mut self, path: &TreePath, value: Option<Value>) {
        let segments: Vec<&str> = path.segments().collect();
        match value {
            Some(v) => {
                debug!(path = %path, "set");
                insert_at(&mut self.root, &segments, v);
            }
            None => {
                debug!(path = %path, "remove");
                remove_at(&mut self.root, &segments);
            }
        }
        self.bump_versions(path);
        self.notify(path);
    }

    /// A write at `path` changes the subtree of every ancestor and the
    /// value of every descendant; all of their versions advance.
    fn bump_versions(&mut self, path: &TreePath) {
        let mut cursor = Some(path.clone());
        while let Some(p) = cursor {
            *self.versions.entry(p.clone()).or_insert(0) += 1;
            cursor = p.parent();
        }
        for (p, v) in self.versions.iter_mut() {
            if path.contains(p) && p != path {
                *v += 1;
            }
        }
    }

    fn notify(&mut self, written: &TreePath) {
        let mut dead = Vec::new();
        let snapshots: Vec<(u64, Snapshot)> = self
            .subs
            .iter()
            .filter(|(_, sub)| sub.path.contains(written) || written.contains(&sub.path))
            .map(|(id, sub)| (*id, self.snapshot_for(sub)))
            .collect();
        for (id, snapshot) in snapshots {
            if let Some(sub) = self.subs.get(&id) {
                if sub.tx.send(snapshot).is_err() {
                    dead.push(id);
                }
            }
        }
        for id in dead {
            self.subs.remove(&id);
        }
    }

    fn snapshot_for(&self, sub: &SubEntry) -> Snapshot {
        let mut entries: Vec<(String, Value)> = match node_at(&self.root, &sub.path) {
            Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            _ => Vec::new(),
        };
        match &sub.order_child {
            Some(child) => entries.sort_by(|a, b| {
                cmp_order(a.1.get(child), b.1.get(child)).then_with(|| a.0.cmp(&b.0))
            }),
            None => entries.sort_by(|a, b| a.0.cmp(&b.0)),
        }
        Snapshot { entries }
    }

    /// Strictly monotonic server clock, so concurrent writers always get
    /// a total order.
    fn now_ms(&mut self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        self.clock_last_ms = now.max(self.clock_last_ms + 1);
        self.clock_last_ms
    }

    /// 20-character creation-ordered key: 8 characters of encoded server
    /// time plus a 12-character tiebreaker.
    fn next_push_id(&mut self, now_ms: i64) -> String {
        if now_ms == self.push_last_ms {
            self.push_seq += 1;
        } else {
            self.push_last_ms = now_ms;
            self.push_seq = 0;
        }
        let mut id = [0u8; 20];
        let mut ms = now_ms;
        for slot in id[..8].iter_mut().rev() {
            *slot = PUSH_ALPHABET[(ms % 64) as usize];
            ms /= 64;
        }
        let mut seq = self.push_seq;
        for slot in id[8..].iter_mut().rev() {
            *slot = PUSH_ALPHABET[(seq % 64) as usize];
            seq /= 64;
        }
        id.iter().map(|&b| b as char).collect()
    }
}

fn node_at<'a>(root: &'a Value, path: &TreePath) -> Option<&'a Value> {
    let mut cursor = root;
    for segment in path.segments() {
        cursor = cursor.as_object()?.get(segment)?;
    }
    Some(cursor)
}

fn insert_at(node: &mut Value, segments: &[&str], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *node = value;
        return;
    };
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let child = map.entry(first.to_string()).or_insert(Value::Null);
        insert_at(child, rest, value);
    }
}

/// Remove the node at `segments`, pruning object ancestors left empty.
/// An empty collection node does not exist, it is gone.
fn remove_at(node: &mut Value, segments: &[&str]) -> bool {
    let Some((first, rest)) = segments.split_first() else {
        *node = Value::Object(Map::new());
        return true;
    };
    let Value::Object(map) = node else {
        return false;
    };
    if rest.is_empty() {
        map.remove(*first).is_some()
    } else {
        let Some(child) = map.get_mut(*first) else {
            return false;
        };
        let removed = remove_at(child, rest);
        if removed && child.as_object().is_some_and(|m| m.is_empty()) {
            map.remove(*first);
        }
        removed
    }
}

fn cmp_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => cmp_values(x, y),
    }
}

fn cmp_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path;
    use crate::value::server_timestamp;
    use parlor_shared::types::{MessageId, UserId};
    use serde_json::json;

    #[tokio::test]
    async fn set_get_remove_roundtrip() {
        let (store, _handle) = MemoryStoreBackend::spawn();
        let path = TreePath::new("status/u1");

        store.set(&path, json!({"state": "online"})).await.unwrap();
        assert_eq!(
            store.get(&path).await.unwrap(),
            Some(json!({"state": "online"}))
        );

        store.remove(&path).await.unwrap();
        assert_eq!(store.get(&path).await.unwrap(), None);
        // The emptied parent collection is pruned too.
        assert_eq!(store.get(&TreePath::new("status")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn push_keys_sort_in_creation_order() {
        let (store, _handle) = MemoryStoreBackend::spawn();
        let root = path::messages_root();

        let mut keys = Vec::new();
        for i in 0..5 {
            keys.push(store.push(&root, json!({ "n": i })).await.unwrap());
        }

        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert_eq!(keys.iter().collect::<std::collections::HashSet<_>>().len(), 5);
    }

    #[tokio::test]
    async fn server_timestamps_resolve_monotonically() {
        let (store, _handle) = MemoryStoreBackend::spawn();
        let root = path::messages_root();

        let a = store
            .push(&root, json!({ "timestamp": server_timestamp() }))
            .await
            .unwrap();
        let b = store
            .push(&root, json!({ "timestamp": server_timestamp() }))
            .await
            .unwrap();

        let ts = |key: &str| {
            let root = path::messages_root();
            let store = store.clone();
            let key = key.to_string();
            async move {
                store.get(&root.child(&key)).await.unwrap().unwrap()["timestamp"]
                    .as_i64()
                    .unwrap()
            }
        };
        assert!(ts(&a).await < ts(&b).await);
    }

    #[tokio::test]
    async fn subscription_emits_initial_and_updated_snapshots() {
        let (store, _handle) = MemoryStoreBackend::spawn();
        let root = path::status_root();

        let mut sub = store.subscribe(&root).await.unwrap();
        let initial = sub.recv().await.unwrap();
        assert!(initial.entries.is_empty());

        store
            .set(&root.child("u1"), json!({"state": "online"}))
            .await
            .unwrap();
        let snap = sub.recv().await.unwrap();
        assert_eq!(snap.entries.len(), 1);
        assert_eq!(snap.entries[0].0, "u1");

        sub.release().await;
        store
            .set(&root.child("u2"), json!({"state": "online"}))
            .await
            .unwrap();
        // Released subscription no longer receives; only the write above
        // proves the backend is still alive.
        assert!(store.get(&root.child("u2")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn ordered_subscription_sorts_by_child() {
        let (store, _handle) = MemoryStoreBackend::spawn();
        let root = path::messages_root();

        // Insert out of order on purpose, with explicit timestamps.
        store.set(&root.child("b"), json!({"timestamp": 200})).await.unwrap();
        store.set(&root.child("a"), json!({"timestamp": 300})).await.unwrap();
        store.set(&root.child("c"), json!({"timestamp": 100})).await.unwrap();

        let mut sub = store.subscribe_ordered_by(&root, "timestamp").await.unwrap();
        let snap = sub.recv().await.unwrap();
        let keys: Vec<&str> = snap.entries.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["c", "b", "a"]);
    }

    #[tokio::test]
    async fn compare_and_set_detects_conflicts() {
        let (store, _handle) = MemoryStoreBackend::spawn();
        let path = path::reaction(&MessageId("m1".into()), "👍");

        let (value, version) = store.get_versioned(&path).await.unwrap();
        assert!(value.is_none());

        // A concurrent writer lands in between.
        store.set(&path, json!(["intruder"])).await.unwrap();

        let stale = store
            .compare_and_set(&path, version, Some(json!(["me"])))
            .await
            .unwrap();
        assert!(!stale);

        let (value, version) = store.get_versioned(&path).await.unwrap();
        assert_eq!(value, Some(json!(["intruder"])));
        let fresh = store
            .compare_and_set(&path, version, Some(json!(["intruder", "me"])))
            .await
            .unwrap();
        assert!(fresh);
    }

    #[tokio::test]
    async fn ancestor_write_invalidates_leaf_transaction() {
        let (store, _handle) = MemoryStoreBackend::spawn();
        let message = path::message(&MessageId("m1".into()));
        let leaf = path::reaction(&MessageId("m1".into()), "👍");

        let (_, version) = store.get_versioned(&leaf).await.unwrap();
        // Rewriting the whole message subtree must conflict with the
        // pending leaf transaction.
        store.set(&message, json!({"text": "rewritten"})).await.unwrap();

        let ok = store
            .compare_and_set(&leaf, version, Some(json!(["me"])))
            .await
            .unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn transact_retries_until_committed() {
        let (store, _handle) = MemoryStoreBackend::spawn();
        let path = path::reaction(&MessageId("m1".into()), "❤️");

        let committed = store
            .transact(&path, |current| {
                let mut list: Vec<String> = current
                    .and_then(|v| serde_json::from_value(v).ok())
                    .unwrap_or_default();
                list.push("u1".into());
                Some(json!(list))
            })
            .await
            .unwrap();

        assert_eq!(committed, Some(json!(["u1"])));
        assert_eq!(store.get(&path).await.unwrap(), Some(json!(["u1"])));
    }

    #[tokio::test]
    async fn deferred_write_fires_on_disconnect_and_is_consumed() {
        let (store, handle) = MemoryStoreBackend::spawn();
        let uid = UserId("u1".into());
        let status = path::status(&uid);

        store
            .on_disconnect_set(&status, json!({"state": "offline"}))
            .await
            .unwrap();
        store.set(&status, json!({"state": "online"})).await.unwrap();

        handle.set_connected(false).await;
        assert_eq!(
            store.get(&status).await.unwrap(),
            Some(json!({"state": "offline"}))
        );

        // Registration was consumed: going online again without
        // re-registering leaves the record alone on the next drop.
        handle.set_connected(true).await;
        store.set(&status, json!({"state": "online"})).await.unwrap();
        handle.set_connected(false).await;
        assert_eq!(
            store.get(&status).await.unwrap(),
            Some(json!({"state": "online"}))
        );
    }

    #[tokio::test]
    async fn connection_watch_tracks_control_handle() {
        let (store, handle) = MemoryStoreBackend::spawn();
        let mut connected = store.connection_state();
        assert!(*connected.borrow());

        handle.set_connected(false).await;
        connected.changed().await.unwrap();
        assert!(!*connected.borrow());

        handle.set_connected(true).await;
        connected.changed().await.unwrap();
        assert!(*connected.borrow());
    }
}
