//! GraphStore adapter: lifecycle and typed access over a [`GraphPrimitive`]
//!
//! `initialize` is idempotent and `teardown` makes it callable again. Peer
//! reachability follows the injected [`BackoffPolicy`]; an unreachable peer
//! set only downgrades the store to local-cache mode.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::path::GraphPath;
use super::primitive::{
    Ack, EventReceiver, GraphEvent, GraphPrimitive, SubscriptionId, WatchMode,
};
use crate::config::BackoffPolicy;
use crate::error::ChatError;

/// Snapshot of the connection lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub initialized: bool,
    pub peers: Vec<String>,
    /// Peers that answered during the last `initialize`
    pub reachable: usize,
    pub peer_discovery: bool,
}

impl ConnectionState {
    /// True when peers were configured but none answered.
    pub fn is_local_only(&self) -> bool {
        self.reachable == 0
    }
}

/// A live watch. Pass `id` to [`GraphStore::unsubscribe`] to release it.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub path: GraphPath,
    pub events: EventReceiver,
}

impl Subscription {
    /// Pull every event already queued without waiting.
    pub fn drain_pending(&mut self) -> Vec<GraphEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// A subscription consumed by a background task.
#[derive(Debug)]
pub struct WatchTask {
    id: SubscriptionId,
    path: GraphPath,
    task: JoinHandle<()>,
}

impl WatchTask {
    /// Feed every event of `subscription` to `handler` on a spawned task.
    pub fn spawn<F, Fut>(subscription: Subscription, mut handler: F) -> Self
    where
        F: FnMut(GraphEvent) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Subscription {
            id,
            path,
            mut events,
        } = subscription;
        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                handler(event).await;
            }
        });
        Self { id, path, task }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn path(&self) -> &GraphPath {
        &self.path
    }

    /// Release the watch and stop the task.
    pub async fn stop(self, graph: &GraphStore) {
        graph.unsubscribe(self.id).await;
        self.task.abort();
    }
}

pub struct GraphStore {
    handle: RwLock<Option<Arc<dyn GraphPrimitive>>>,
    state: RwLock<ConnectionState>,
    subscriptions: Mutex<HashSet<SubscriptionId>>,
    init_lock: tokio::sync::Mutex<()>,
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphStore {
    pub fn new() -> Self {
        Self {
            handle: RwLock::new(None),
            state: RwLock::new(ConnectionState::default()),
            subscriptions: Mutex::new(HashSet::new()),
            init_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Bring the store up, or return the existing handle if already up.
    ///
    /// `open` constructs the primitive; its failure is the only fatal error.
    /// Peers are then tried up to `policy.max_attempts` times.
    pub async fn initialize<F>(
        &self,
        peers: &[String],
        peer_discovery: bool,
        policy: &BackoffPolicy,
        open: F,
    ) -> Result<Arc<dyn GraphPrimitive>, ChatError>
    where
        F: FnOnce() -> Result<Arc<dyn GraphPrimitive>, ChatError>,
    {
        let _guard = self.init_lock.lock().await;

        let existing = self.handle.read().clone();
        if let Some(existing) = existing {
            debug!("Graph store already initialized");
            return Ok(existing);
        }

        let primitive = open()?;
        let reachable = Self::reach_peers(primitive.as_ref(), peers, policy).await;

        *self.state.write() = ConnectionState {
            initialized: true,
            peers: peers.to_vec(),
            reachable,
            peer_discovery,
        };
        *self.handle.write() = Some(primitive.clone());

        info!(
            peers = peers.len(),
            reachable, peer_discovery, "Graph store initialized"
        );
        Ok(primitive)
    }

    async fn reach_peers(
        primitive: &dyn GraphPrimitive,
        peers: &[String],
        policy: &BackoffPolicy,
    ) -> usize {
        if peers.is_empty() {
            info!("No peers configured, running on local replica");
            return 0;
        }

        for attempt in 1..=policy.max_attempts {
            match primitive.connect(peers).await {
                Ok(reachable) if reachable > 0 => return reachable,
                Ok(_) => warn!(attempt, max = policy.max_attempts, "No peers reachable"),
                Err(e) => warn!(attempt, error = %e, "Peer connection failed"),
            }
            if attempt < policy.max_attempts {
                tokio::time::sleep(policy.retry_delay).await;
            }
        }

        warn!(
            peers = peers.len(),
            "Giving up on peers, continuing with local cache"
        );
        0
    }

    /// Release every live watch and the primitive handle.
    pub async fn teardown(&self) {
        let _guard = self.init_lock.lock().await;

        let handle = self.handle.write().take();
        let Some(primitive) = handle else {
            return;
        };
        let ids: Vec<SubscriptionId> = self.subscriptions.lock().drain().collect();
        for id in &ids {
            primitive.unwatch(*id).await;
        }
        *self.state.write() = ConnectionState::default();
        info!(released = ids.len(), "Graph store torn down");
    }

    pub fn is_initialized(&self) -> bool {
        self.handle.read().is_some()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.read().clone()
    }

    pub fn primitive(&self) -> Result<Arc<dyn GraphPrimitive>, ChatError> {
        self.handle.read().clone().ok_or(ChatError::NotInitialized)
    }

    /// Root of `public_key`'s sub-tree. Mirrored writes go through here.
    pub fn user_node(&self, public_key: &str) -> Result<GraphPath, ChatError> {
        GraphPath::user(public_key)
    }

    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.lock().len()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Graph Operations
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn read(&self, path: &GraphPath) -> Result<Option<Value>, ChatError> {
        self.primitive()?.read(path).await
    }

    /// Read and deserialize a node. A node of the wrong shape reads as `None`.
    pub async fn read_as<T: DeserializeOwned>(
        &self,
        path: &GraphPath,
    ) -> Result<Option<T>, ChatError> {
        let Some(value) = self.read(path).await? else {
            return Ok(None);
        };
        match serde_json::from_value(value) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                debug!(%path, error = %e, "Node does not match expected shape");
                Ok(None)
            }
        }
    }

    pub async fn write(&self, path: &GraphPath, value: Value) -> Result<Ack, ChatError> {
        self.primitive()?.write(path, value).await
    }

    /// Serialize `record` and merge it into the node at `path`.
    pub async fn put<T: Serialize>(&self, path: &GraphPath, record: &T) -> Result<Ack, ChatError> {
        let value = serde_json::to_value(record)?;
        self.write(path, value).await
    }

    /// Tombstone the node at `path`.
    pub async fn remove(&self, path: &GraphPath) -> Result<Ack, ChatError> {
        self.write(path, Value::Null).await
    }

    pub async fn children(&self, path: &GraphPath) -> Result<Vec<(GraphPath, Value)>, ChatError> {
        self.primitive()?.children(path).await
    }

    pub async fn watch(&self, path: &GraphPath, mode: WatchMode) -> Result<Subscription, ChatError> {
        let (id, events) = self.primitive()?.watch(path, mode).await?;
        if mode == WatchMode::Continuous {
            self.subscriptions.lock().insert(id);
        }
        Ok(Subscription {
            id,
            path: path.clone(),
            events,
        })
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) {
        self.subscriptions.lock().remove(&id);
        if let Ok(primitive) = self.primitive() {
            primitive.unwatch(id).await;
        }
    }
}
