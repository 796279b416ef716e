//! The replicated graph primitive
//!
//! ```text
//! GraphStore (adapter: lifecycle, typed paths, subscriptions)
//!       |
//!       v
//! GraphPrimitive (trait)
//!       |
//!       +---> MemoryGraph (in-process replica, optional redb cache)
//!       |
//!       +---> (network replica; replication is the primitive's job)
//! ```

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use super::path::GraphPath;
use crate::error::ChatError;

/// Handle identifying one live watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchMode {
    /// Fire once for the current value (or each existing child), then end.
    Once,
    /// Fire for the current state and for every later change until unwatched.
    Continuous,
}

/// One observed value at `path`. A `Value::Null` is a tombstone.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphEvent {
    pub path: GraphPath,
    pub value: Value,
}

impl GraphEvent {
    /// Key of the node within its parent (chat id, message id, alias, ...).
    pub fn key(&self) -> &str {
        self.path.key()
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_null()
    }
}

/// Acknowledgement of a write against the local replica.
#[derive(Debug, Clone, PartialEq)]
pub struct Ack {
    pub path: GraphPath,
    /// Node value after the merge.
    pub value: Value,
}

pub type EventReceiver = mpsc::UnboundedReceiver<GraphEvent>;

/// Key-path addressable, eventually consistent graph.
///
/// Writing an object merges it field-wise into the existing node. Writing
/// `null` tombstones the node. Watching a path observes the node itself and
/// its direct children.
#[async_trait]
pub trait GraphPrimitive: Send + Sync {
    async fn read(&self, path: &GraphPath) -> Result<Option<Value>, ChatError>;

    async fn write(&self, path: &GraphPath, value: Value) -> Result<Ack, ChatError>;

    /// Live (non-tombstoned) direct children of `path`, ordered by key.
    async fn children(&self, path: &GraphPath) -> Result<Vec<(GraphPath, Value)>, ChatError>;

    async fn watch(
        &self,
        path: &GraphPath,
        mode: WatchMode,
    ) -> Result<(SubscriptionId, EventReceiver), ChatError>;

    /// Stop delivering events for `id`. Unknown ids are ignored.
    async fn unwatch(&self, id: SubscriptionId);

    /// Try to reach `peers`; returns how many answered.
    async fn connect(&self, peers: &[String]) -> Result<usize, ChatError>;

    /// Bind an authenticated identity to this replica.
    async fn attach_session(&self, public_key: &str) -> Result<(), ChatError>;

    /// Drop the identity bound by [`GraphPrimitive::attach_session`].
    async fn release_session(&self, public_key: &str) -> Result<(), ChatError>;
}
