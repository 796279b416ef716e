//! In-process graph replica
//!
//! `MemoryGraph` keeps the node map behind a `parking_lot::RwLock` and fans
//! writes out to watchers over unbounded mpsc channels. When built with a
//! [`Storage`] every write is mirrored to the redb `graph_nodes` table and the
//! table is replayed on construction.
//!
//! Several `ChatEngine`s sharing one `Arc<MemoryGraph>` behave like peers
//! whose replicas have converged.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::path::GraphPath;
use super::primitive::{Ack, EventReceiver, GraphEvent, GraphPrimitive, SubscriptionId, WatchMode};
use crate::error::ChatError;
use crate::storage::Storage;

struct Watcher {
    path: GraphPath,
    tx: mpsc::UnboundedSender<GraphEvent>,
}

pub struct MemoryGraph {
    nodes: RwLock<BTreeMap<GraphPath, Value>>,
    watchers: RwLock<HashMap<SubscriptionId, Watcher>>,
    next_id: AtomicU64,
    storage: Option<Storage>,
    /// Simulated transport state for `connect`
    online: AtomicBool,
    sessions: RwLock<HashSet<String>>,
}

impl Default for MemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGraph {
    /// Volatile replica: nothing survives the process.
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(BTreeMap::new()),
            watchers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            storage: None,
            online: AtomicBool::new(true),
            sessions: RwLock::new(HashSet::new()),
        }
    }

    /// Replica backed by a redb disk cache. Cached nodes are replayed first.
    pub fn with_storage(storage: Storage) -> Result<Self, ChatError> {
        let mut nodes = BTreeMap::new();
        for (raw, value) in storage.list_nodes()? {
            match GraphPath::parse(&raw) {
                Ok(path) => {
                    nodes.insert(path, value);
                }
                Err(e) => warn!(path = %raw, error = %e, "Skipping unparseable cached node"),
            }
        }
        info!(count = nodes.len(), "Replayed graph disk cache");

        Ok(Self {
            nodes: RwLock::new(nodes),
            storage: Some(storage),
            ..Self::new()
        })
    }

    /// Toggle whether `connect` reaches its peers.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn has_session(&self, public_key: &str) -> bool {
        self.sessions.read().contains(public_key)
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.read().len()
    }

    fn snapshot(nodes: &BTreeMap<GraphPath, Value>, path: &GraphPath) -> Vec<GraphEvent> {
        let mut events = Vec::new();
        if let Some(value) = nodes.get(path).filter(|v| !v.is_null()) {
            events.push(GraphEvent {
                path: path.clone(),
                value: value.clone(),
            });
        }
        events.extend(Self::live_children(nodes, path).map(|(p, v)| GraphEvent {
            path: p.clone(),
            value: v.clone(),
        }));
        events
    }

    fn live_children<'a>(
        nodes: &'a BTreeMap<GraphPath, Value>,
        path: &'a GraphPath,
    ) -> impl Iterator<Item = (&'a GraphPath, &'a Value)> + 'a {
        nodes
            .range(path.clone()..)
            .take_while(move |(p, _)| p.segments().starts_with(path.segments()))
            .filter(move |(p, v)| path.is_parent_of(p) && !v.is_null())
    }

    fn notify(&self, event: &GraphEvent) {
        let mut dead = Vec::new();
        {
            let watchers = self.watchers.read();
            for (id, watcher) in watchers.iter() {
                let interested =
                    watcher.path == event.path || watcher.path.is_parent_of(&event.path);
                if interested && watcher.tx.send(event.clone()).is_err() {
                    dead.push(*id);
                }
            }
        }

        if !dead.is_empty() {
            let mut watchers = self.watchers.write();
            for id in dead {
                debug!(%id, "Dropping watcher with closed receiver");
                watchers.remove(&id);
            }
        }
    }
}

/// Field-wise merge of `incoming` into `existing` for object nodes.
fn merge(existing: Option<&Value>, incoming: Value) -> Value {
    match (existing, incoming) {
        (Some(Value::Object(current)), Value::Object(update)) => {
            let mut merged = current.clone();
            merged.extend(update);
            Value::Object(merged)
        }
        (_, incoming) => incoming,
    }
}

#[async_trait]
impl GraphPrimitive for MemoryGraph {
    async fn read(&self, path: &GraphPath) -> Result<Option<Value>, ChatError> {
        Ok(self
            .nodes
            .read()
            .get(path)
            .filter(|v| !v.is_null())
            .cloned())
    }

    async fn write(&self, path: &GraphPath, value: Value) -> Result<Ack, ChatError> {
        // Persist and notify under the node lock: watchers and the disk cache
        // must see merges in the order they were applied.
        let mut nodes = self.nodes.write();
        let merged = merge(nodes.get(path), value);
        nodes.insert(path.clone(), merged.clone());

        if let Some(storage) = &self.storage {
            if let Err(e) = storage.save_node(&path.to_string(), &merged) {
                warn!(%path, error = %e, "Failed to persist graph node");
            }
        }

        self.notify(&GraphEvent {
            path: path.clone(),
            value: merged.clone(),
        });
        drop(nodes);

        Ok(Ack {
            path: path.clone(),
            value: merged,
        })
    }

    async fn children(&self, path: &GraphPath) -> Result<Vec<(GraphPath, Value)>, ChatError> {
        let nodes = self.nodes.read();
        Ok(Self::live_children(&nodes, path)
            .map(|(p, v)| (p.clone(), v.clone()))
            .collect())
    }

    async fn watch(
        &self,
        path: &GraphPath,
        mode: WatchMode,
    ) -> Result<(SubscriptionId, EventReceiver), ChatError> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = mpsc::unbounded_channel();

        // Register while holding the node lock so no write slips between the
        // snapshot and the registration. Duplicates are possible, gaps are not.
        {
            let nodes = self.nodes.read();
            for event in Self::snapshot(&nodes, path) {
                let _ = tx.send(event);
            }
            if mode == WatchMode::Continuous {
                self.watchers.write().insert(
                    id,
                    Watcher {
                        path: path.clone(),
                        tx,
                    },
                );
            }
        }

        debug!(%id, %path, ?mode, "Watch registered");
        Ok((id, rx))
    }

    async fn unwatch(&self, id: SubscriptionId) {
        if self.watchers.write().remove(&id).is_some() {
            debug!(%id, "Watch released");
        }
    }

    async fn connect(&self, peers: &[String]) -> Result<usize, ChatError> {
        if peers.is_empty() || !self.online.load(Ordering::SeqCst) {
            return Ok(0);
        }
        Ok(peers.len())
    }

    async fn attach_session(&self, public_key: &str) -> Result<(), ChatError> {
        self.sessions.write().insert(public_key.to_string());
        Ok(())
    }

    async fn release_session(&self, public_key: &str) -> Result<(), ChatError> {
        self.sessions.write().remove(public_key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn path(s: &str) -> GraphPath {
        GraphPath::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_write_merges_object_fields() {
        let graph = MemoryGraph::new();
        graph
            .write(&path("~a/chats/c1"), json!({"name": "Bob", "unreadCount": 0}))
            .await
            .unwrap();
        let ack = graph
            .write(&path("~a/chats/c1"), json!({"unreadCount": 2}))
            .await
            .unwrap();

        assert_eq!(ack.value, json!({"name": "Bob", "unreadCount": 2}));
        assert_eq!(graph.read(&path("~a/chats/c1")).await.unwrap(), Some(ack.value));
    }

    #[tokio::test]
    async fn test_null_write_tombstones() {
        let graph = MemoryGraph::new();
        graph.write(&path("users/bob"), json!({"username": "bob"})).await.unwrap();
        graph.write(&path("users/bob"), Value::Null).await.unwrap();

        assert_eq!(graph.read(&path("users/bob")).await.unwrap(), None);
        assert!(graph.children(&GraphPath::users()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_children_are_direct_only() {
        let graph = MemoryGraph::new();
        graph.write(&path("~a/chats/c1"), json!({"id": "c1"})).await.unwrap();
        graph.write(&path("~a/chats/c1/messages/m1"), json!({"id": "m1"})).await.unwrap();
        graph.write(&path("~a/chats/c2"), json!({"id": "c2"})).await.unwrap();
        graph.write(&path("~ab/chats/c3"), json!({"id": "c3"})).await.unwrap();

        let keys: Vec<String> = graph
            .children(&path("~a/chats"))
            .await
            .unwrap()
            .into_iter()
            .map(|(p, _)| p.key().to_string())
            .collect();
        assert_eq!(keys, vec!["c1", "c2"]);
    }

    #[tokio::test]
    async fn test_once_watch_fires_existing_then_ends() {
        let graph = MemoryGraph::new();
        graph.write(&path("users/a"), json!({"username": "a"})).await.unwrap();
        graph.write(&path("users/b"), json!({"username": "b"})).await.unwrap();

        let (_, mut rx) = graph.watch(&GraphPath::users(), WatchMode::Once).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().key(), "a");
        assert_eq!(rx.recv().await.unwrap().key(), "b");
        assert!(rx.recv().await.is_none());
        assert_eq!(graph.watcher_count(), 0);
    }

    #[tokio::test]
    async fn test_continuous_watch_sees_existing_and_future() {
        let graph = MemoryGraph::new();
        graph.write(&path("users/a"), json!({"username": "a"})).await.unwrap();

        let (id, mut rx) = graph
            .watch(&GraphPath::users(), WatchMode::Continuous)
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().key(), "a");

        graph.write(&path("users/b"), json!({"username": "b"})).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.key(), "b");
        assert_eq!(event.value, json!({"username": "b"}));

        graph.unwatch(id).await;
        graph.write(&path("users/c"), json!({"username": "c"})).await.unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_watch_ignores_grandchildren_and_siblings() {
        let graph = MemoryGraph::new();
        let (_, mut rx) = graph
            .watch(&path("~a/chats"), WatchMode::Continuous)
            .await
            .unwrap();

        graph.write(&path("~a/chats/c1/messages/m1"), json!({"id": "m1"})).await.unwrap();
        graph.write(&path("~a/contacts/b"), json!({"username": "b"})).await.unwrap();
        graph.write(&path("~a/chats/c1"), json!({"id": "c1"})).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().key(), "c1");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_pruned() {
        let graph = MemoryGraph::new();
        let (_, rx) = graph.watch(&GraphPath::users(), WatchMode::Continuous).await.unwrap();
        drop(rx);

        graph.write(&path("users/a"), json!({"username": "a"})).await.unwrap();
        assert_eq!(graph.watcher_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_reports_reachable_peers() {
        let graph = MemoryGraph::new();
        let peers = vec!["http://peer-1/gun".to_string(), "http://peer-2/gun".to_string()];

        assert_eq!(graph.connect(&[]).await.unwrap(), 0);
        assert_eq!(graph.connect(&peers).await.unwrap(), 2);

        graph.set_online(false);
        assert_eq!(graph.connect(&peers).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sessions() {
        let graph = MemoryGraph::new();
        graph.attach_session("abc").await.unwrap();
        assert!(graph.has_session("abc"));
        graph.release_session("abc").await.unwrap();
        assert!(!graph.has_session("abc"));
    }

    #[tokio::test]
    async fn test_disk_cache_replays() {
        let temp = TempDir::new().unwrap();
        let db_path = temp.path().join("graph.redb");

        {
            let graph = MemoryGraph::with_storage(Storage::new(&db_path).unwrap()).unwrap();
            graph.write(&path("users/a"), json!({"username": "a"})).await.unwrap();
            graph.write(&path("users/b"), json!({"username": "b"})).await.unwrap();
            graph.write(&path("users/b"), Value::Null).await.unwrap();
        }

        let graph = MemoryGraph::with_storage(Storage::new(&db_path).unwrap()).unwrap();
        assert_eq!(
            graph.read(&path("users/a")).await.unwrap(),
            Some(json!({"username": "a"}))
        );
        assert_eq!(graph.read(&path("users/b")).await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_field_writes_notify_in_merge_order() {
        const FIELDS: usize = 16;

        for round in 0..100 {
            let temp = TempDir::new().unwrap();
            let storage = Storage::new(temp.path().join("graph.redb")).unwrap();
            let graph = std::sync::Arc::new(MemoryGraph::with_storage(storage.clone()).unwrap());
            let chat = path("~a/chats/c1");
            let (_, mut rx) = graph.watch(&chat, WatchMode::Continuous).await.unwrap();

            let writers: Vec<_> = (0..FIELDS)
                .map(|i| {
                    let graph = graph.clone();
                    let chat = chat.clone();
                    tokio::spawn(async move {
                        graph.write(&chat, json!({ format!("f{}", i): i })).await.unwrap();
                    })
                })
                .collect();
            for writer in writers {
                writer.await.unwrap();
            }

            let mut last = None;
            let mut sizes = Vec::new();
            while let Ok(event) = rx.try_recv() {
                sizes.push(event.value.as_object().unwrap().len());
                last = Some(event.value);
            }
            assert_eq!(sizes.len(), FIELDS, "round {}", round);
            assert!(sizes.windows(2).all(|w| w[0] < w[1]), "round {}: {:?}", round, sizes);

            let last = last.unwrap();
            assert_eq!(last.as_object().unwrap().len(), FIELDS);
            assert_eq!(graph.read(&chat).await.unwrap(), Some(last.clone()));
            let persisted = storage.load_node(&chat.to_string()).unwrap();
            assert_eq!(persisted, Some(last));
        }
    }
}
