//! User discovery and presence
//!
//! A search watches the public `users` and `aliases` sub-trees and streams
//! matches into `search_results`. The loading flag only gates the first
//! `search_window`; matches that replicate in later are still appended.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::types::{AliasRecord, Contact, UserRecord, STATUS_OFFLINE, STATUS_ONLINE};
use crate::error::ChatError;
use crate::graph::{GraphEvent, GraphPath, GraphStore, WatchMode, WatchTask};
use crate::identity::{IdentityManager, Session};
use crate::projection::ChatStore;

/// Queries shorter than this never touch the graph.
pub const MIN_QUERY_CHARS: usize = 3;

struct ActiveSearch {
    generation: u64,
    watches: Mutex<Vec<WatchTask>>,
    timer: Mutex<Option<JoinHandle<()>>>,
    graph: Arc<GraphStore>,
    store: ChatStore,
    current: Arc<AtomicU64>,
}

impl ActiveSearch {
    async fn cancel(&self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
        let watches: Vec<WatchTask> = self.watches.lock().drain(..).collect();
        for watch in watches {
            watch.stop(&self.graph).await;
        }
        if self.current.load(Ordering::SeqCst) == self.generation {
            self.store.is_loading_contacts.set(false);
        }
    }
}

/// Handle to a running search. Dropping it leaves the search running.
#[derive(Clone)]
pub struct SearchHandle {
    inner: Option<Arc<ActiveSearch>>,
}

impl SearchHandle {
    fn inert() -> Self {
        Self { inner: None }
    }

    /// False for queries below the length floor.
    pub fn is_active(&self) -> bool {
        self.inner
            .as_ref()
            .map(|s| !s.watches.lock().is_empty())
            .unwrap_or(false)
    }

    /// Release both watches. Results found so far stay in the projection.
    pub async fn cancel(&self) {
        if let Some(search) = &self.inner {
            search.cancel().await;
        }
    }
}

pub struct ContactDirectory {
    graph: Arc<GraphStore>,
    identity: Arc<IdentityManager>,
    store: ChatStore,
    search_window: Duration,
    generation: Arc<AtomicU64>,
    active: Mutex<Option<Arc<ActiveSearch>>>,
}

impl ContactDirectory {
    pub fn new(
        graph: Arc<GraphStore>,
        identity: Arc<IdentityManager>,
        store: ChatStore,
        search_window: Duration,
    ) -> Self {
        Self {
            graph,
            identity,
            store,
            search_window,
            generation: Arc::new(AtomicU64::new(0)),
            active: Mutex::new(None),
        }
    }

    /// Start a search for users whose name contains `query`.
    ///
    /// Any previous search is cancelled first.
    pub async fn search(&self, query: &str) -> Result<SearchHandle, ChatError> {
        let query = query.trim().to_lowercase();
        if query.chars().count() < MIN_QUERY_CHARS {
            self.stop().await;
            self.store.search_results.set(Vec::new());
            self.store.is_loading_contacts.set(false);
            return Ok(SearchHandle::inert());
        }

        let session = self.identity.require_session()?;
        self.stop().await;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.store.search_results.set(Vec::new());
        self.store.is_loading_contacts.set(true);

        let search = Arc::new(ActiveSearch {
            generation,
            watches: Mutex::new(Vec::new()),
            timer: Mutex::new(None),
            graph: self.graph.clone(),
            store: self.store.clone(),
            current: self.generation.clone(),
        });
        *self.active.lock() = Some(search.clone());

        let me = session.public_key();
        for path in [GraphPath::users(), GraphPath::aliases()] {
            let mut subscription = match self.graph.watch(&path, WatchMode::Continuous).await {
                Ok(subscription) => subscription,
                Err(e) => {
                    search.cancel().await;
                    return Err(e);
                }
            };
            for event in subscription.drain_pending() {
                offer_match(&self.store, &path, &query, &me, &event);
            }

            let store = self.store.clone();
            let query = query.clone();
            let me = me.clone();
            let watched = path.clone();
            let task = WatchTask::spawn(subscription, move |event| {
                offer_match(&store, &watched, &query, &me, &event);
                async {}
            });
            search.watches.lock().push(task);
        }

        let store = self.store.clone();
        let current = self.generation.clone();
        let window = self.search_window;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if current.load(Ordering::SeqCst) == generation {
                store.is_loading_contacts.set(false);
            }
        });
        *search.timer.lock() = Some(timer);

        debug!(%query, generation, "Search started");
        Ok(SearchHandle {
            inner: Some(search),
        })
    }

    /// Cancel the running search, if any.
    pub async fn stop(&self) {
        let active = self.active.lock().take();
        if let Some(search) = active {
            search.cancel().await;
        }
    }

    /// Write the caller's status and `lastSeen` to `users/<alias>`.
    pub async fn publish_presence(&self, online: bool) -> Result<(), ChatError> {
        let session = self.identity.require_session()?;
        self.publish_presence_as(&session, online).await
    }

    /// Presence for an explicit session, which may already have ended.
    pub async fn publish_presence_as(&self, session: &Session, online: bool) -> Result<(), ChatError> {
        let record = UserRecord {
            username: session.alias().to_string(),
            public_key: Some(session.public_key()),
            status: Some(if online { STATUS_ONLINE } else { STATUS_OFFLINE }.to_string()),
            last_seen: Some(chrono::Utc::now().timestamp_millis()),
        };
        self.graph
            .put(&GraphPath::user_entry(session.alias())?, &record)
            .await?;
        info!(alias = %session.alias(), online, "Presence published");
        Ok(())
    }
}

fn offer_match(store: &ChatStore, watched: &GraphPath, query: &str, me: &str, event: &GraphEvent) {
    if event.is_tombstone() || !watched.is_parent_of(&event.path) {
        return;
    }

    let contact = match watched.key() {
        crate::graph::USERS => serde_json::from_value::<UserRecord>(event.value.clone())
            .ok()
            .and_then(|r| Contact::from_user(&r)),
        _ => serde_json::from_value::<AliasRecord>(event.value.clone())
            .ok()
            .and_then(|r| Contact::from_alias(&r)),
    };
    let Some(contact) = contact else {
        return;
    };

    if contact.public_key == me || !contact.username.to_lowercase().contains(query) {
        return;
    }
    if store.push_search_result(contact) {
        debug!(key = %event.key(), "Search match");
    }
}
