//! ChatEngine - the explicit context the presentation layer talks to
//!
//! ChatEngine owns the graph connection, the session and every projection:
//! - `initialize` connects the graph store and resumes a recalled session
//! - actions (`login`, `send_message`, `search_users`, ...) drive the components
//! - `teardown` releases every watch so the engine can be initialized again
//!
//! # Example
//!
//! ```ignore
//! use meshchat_core::{ChatConfig, ChatEngine};
//!
//! let engine = ChatEngine::new(ChatConfig::default(), "~/.meshchat").await?;
//! engine.initialize().await?;
//! engine.login("alice", "correct horse").await?;
//!
//! let chat_id = engine.create_private_chat(&bob_key, "bob").await?;
//! engine.load_messages(&chat_id).await?;
//! engine.send_message(&chat_id, "hello", None).await;
//!
//! let mut messages = engine.store().sorted_messages.subscribe();
//! ```

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chat::{ChannelSubscription, Chat, ChatRegistry, MessageChannel, MirrorReport};
use crate::config::ChatConfig;
use crate::contacts::{ContactDirectory, SearchHandle};
use crate::error::ChatError;
use crate::graph::{ConnectionState, GraphPrimitive, GraphStore, MemoryGraph};
use crate::identity::{IdentityManager, Session};
use crate::projection::ChatStore;
use crate::storage::Storage;

/// File name of the redb database inside the data directory
pub const DATABASE_FILE: &str = "meshchat.redb";

type Opener = Arc<dyn Fn() -> Result<Arc<dyn GraphPrimitive>, ChatError> + Send + Sync>;

pub struct ChatEngine {
    config: ChatConfig,
    /// Builds the graph primitive on (re)initialization
    opener: Opener,
    graph: Arc<GraphStore>,
    identity: Arc<IdentityManager>,
    store: ChatStore,
    registry: ChatRegistry,
    channel: MessageChannel,
    directory: Arc<ContactDirectory>,
    /// Stream behind `messages`, replaced by every `load_messages`
    open_channel: Mutex<Option<ChannelSubscription>>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl ChatEngine {
    /// Engine backed by a data directory.
    ///
    /// The redb database there holds recall artifacts and, with
    /// `persist_to_disk`, the graph disk cache.
    ///
    /// # Errors
    ///
    /// Returns `ChatError::InvalidConfig` for a rejected config and
    /// `ChatError::Io` / `ChatError::Database` if the directory or database
    /// cannot be opened.
    pub async fn new(config: ChatConfig, data_dir: impl AsRef<Path>) -> Result<Self, ChatError> {
        config.validate()?;
        let data_dir = data_dir.as_ref();
        info!(?data_dir, persist = config.persist_to_disk, "Opening chat engine");

        std::fs::create_dir_all(data_dir)?;
        let storage = Storage::new(data_dir.join(DATABASE_FILE))?;

        let opener: Opener = if config.persist_to_disk {
            let cache = storage.clone();
            Arc::new(move || {
                let graph = MemoryGraph::with_storage(cache.clone())?;
                Ok(Arc::new(graph) as Arc<dyn GraphPrimitive>)
            })
        } else {
            let graph: Arc<dyn GraphPrimitive> = Arc::new(MemoryGraph::new());
            Arc::new(move || Ok(graph.clone()))
        };

        Ok(Self::assemble(config, opener, Some(storage)))
    }

    /// Engine over an existing primitive, without cross-process recall.
    ///
    /// Engines sharing one primitive see each other's writes immediately.
    pub fn with_primitive(
        config: ChatConfig,
        primitive: Arc<dyn GraphPrimitive>,
    ) -> Result<Self, ChatError> {
        config.validate()?;
        let opener: Opener = Arc::new(move || Ok(primitive.clone()));
        Ok(Self::assemble(config, opener, None))
    }

    fn assemble(config: ChatConfig, opener: Opener, recall_store: Option<Storage>) -> Self {
        let graph = Arc::new(GraphStore::new());
        let identity = Arc::new(IdentityManager::new(graph.clone(), recall_store, config.kdf));
        let store = ChatStore::new();

        Self {
            registry: ChatRegistry::new(graph.clone(), identity.clone(), store.clone()),
            channel: MessageChannel::new(
                graph.clone(),
                identity.clone(),
                store.clone(),
                config.features,
            ),
            directory: Arc::new(ContactDirectory::new(
                graph.clone(),
                identity.clone(),
                store.clone(),
                config.search_window,
            )),
            config,
            opener,
            graph,
            identity,
            store,
            open_channel: Mutex::new(None),
            heartbeat: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Every projection the presentation layer can subscribe to.
    pub fn store(&self) -> &ChatStore {
        &self.store
    }

    pub fn graph(&self) -> &Arc<GraphStore> {
        &self.graph
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.graph.connection_state()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    /// Connect the graph store and resume a recalled session, if any.
    ///
    /// Idempotent. Unreachable peers only downgrade to local-cache mode.
    pub async fn initialize(&self) -> Result<(), ChatError> {
        self.connect().await?;
        if self.identity.session().is_none() {
            if let Some(session) = self.identity.recall().await? {
                self.on_session_started(&session).await;
            }
        }
        Ok(())
    }

    async fn connect(&self) -> Result<(), ChatError> {
        let opener = self.opener.clone();
        self.graph
            .initialize(
                &self.config.peers,
                self.config.peer_discovery,
                &self.config.backoff,
                move || opener(),
            )
            .await?;
        Ok(())
    }

    /// Release every watch and the graph handle. The session is kept.
    pub async fn teardown(&self) {
        self.stop_background().await;
        self.graph.teardown().await;
        debug!("Chat engine torn down");
    }

    async fn stop_background(&self) {
        let heartbeat = self.heartbeat.lock().take();
        if let Some(heartbeat) = heartbeat {
            heartbeat.abort();
        }
        let channel = self.open_channel.lock().take();
        if let Some(channel) = channel {
            channel.close().await;
        }
        self.registry.stop().await;
        self.directory.stop().await;
    }

    async fn on_session_started(&self, session: &Session) {
        if let Err(e) = self.registry.watch_chats().await {
            warn!(error = %e, "Could not watch chats");
        }
        if let Err(e) = self.registry.watch_contacts().await {
            warn!(error = %e, "Could not watch contacts");
        }
        if let Err(e) = self.directory.publish_presence(true).await {
            warn!(error = %e, "Could not publish presence");
        }
        self.start_heartbeat();
        info!(alias = %session.alias(), chats = self.store.chats.get().len(), "Session ready");
    }

    /// Re-publish presence every `poll_interval` while the session lasts.
    fn start_heartbeat(&self) {
        let directory = self.directory.clone();
        let interval = self.config.backoff.poll_interval;
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if let Err(e) = directory.publish_presence(true).await {
                    debug!(error = %e, "Presence heartbeat skipped");
                }
            }
        });
        if let Some(previous) = self.heartbeat.lock().replace(task) {
            previous.abort();
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Identity Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Create an account. Does not log in; returns the new public key.
    pub async fn create_account(&self, username: &str, password: &str) -> Result<String, ChatError> {
        self.connect().await?;
        self.identity.create_account(username, password).await
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Arc<Session>, ChatError> {
        self.connect().await?;
        if self.identity.is_authenticated() {
            self.stop_background().await;
            self.store.reset();
        }
        let session = self.identity.login(username, password).await?;
        self.on_session_started(&session).await;
        Ok(session)
    }

    /// Resume a session from the local recall artifact. Returns true on success.
    pub async fn recall(&self) -> Result<bool, ChatError> {
        self.connect().await?;
        let already = self.identity.is_authenticated();
        match self.identity.recall().await? {
            Some(session) => {
                if !already {
                    self.on_session_started(&session).await;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// End the session and clear every projection.
    ///
    /// Never fails; each step logs its own errors. `initialize` is allowed again
    /// afterwards.
    pub async fn logout(&self) {
        let session = self.identity.end_session();
        self.stop_background().await;
        if let Some(session) = &session {
            if let Err(e) = self.directory.publish_presence_as(session, false).await {
                warn!(error = %e, "Could not publish offline presence");
            }
        }
        self.identity.release(session.as_deref()).await;
        self.store.reset();
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_authenticated()
    }

    pub fn session(&self) -> Option<Arc<Session>> {
        self.identity.session()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Chat Operations
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn create_private_chat(
        &self,
        contact_pub: &str,
        contact_username: &str,
    ) -> Result<String, ChatError> {
        self.registry
            .create_private_chat(contact_pub, contact_username)
            .await
    }

    pub async fn create_group_chat(
        &self,
        name: &str,
        participants: &[String],
    ) -> Result<String, ChatError> {
        self.registry.create_group_chat(name, participants).await
    }

    pub fn select_chat(&self, chat_id: &str) -> Result<Chat, ChatError> {
        self.registry.select_chat(chat_id)
    }

    pub async fn check_mirror(&self, chat_id: &str) -> Result<MirrorReport, ChatError> {
        self.registry.check_mirror(chat_id).await
    }

    pub async fn repair_mirror(&self, chat_id: &str) -> Result<usize, ChatError> {
        self.registry.repair_mirror(chat_id).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Message Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Point `messages` at `chat_id`, closing the previous stream.
    pub async fn load_messages(&self, chat_id: &str) -> Result<(), ChatError> {
        let previous = self.open_channel.lock().take();
        if let Some(previous) = previous {
            previous.close().await;
        }
        let subscription = self.channel.subscribe(chat_id).await?;
        *self.open_channel.lock() = Some(subscription);
        Ok(())
    }

    /// Send `text` to `chat_id`. Failures are logged and reported as `false`.
    pub async fn send_message(&self, chat_id: &str, text: &str, reply_to: Option<&str>) -> bool {
        match self.channel.send(chat_id, text, reply_to).await {
            Ok(_) => true,
            Err(e) => {
                warn!(%chat_id, error = %e, "Message not sent");
                false
            }
        }
    }

    pub async fn mark_read(&self, chat_id: &str, message_id: &str) -> Result<bool, ChatError> {
        self.channel.mark_read(chat_id, message_id).await
    }

    pub async fn mark_delivered(&self, chat_id: &str, message_id: &str) -> Result<(), ChatError> {
        self.channel.mark_delivered(chat_id, message_id).await
    }

    pub async fn clear_unread(&self, chat_id: &str) -> Result<(), ChatError> {
        self.channel.clear_unread(chat_id).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Contact Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Stream users matching `query` into `search_results`.
    pub async fn search_users(&self, query: &str) -> Result<SearchHandle, ChatError> {
        self.directory.search(query).await
    }

    pub async fn publish_presence(&self, online: bool) -> Result<(), ChatError> {
        self.directory.publish_presence(online).await
    }
}
