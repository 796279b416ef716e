//! Chat creation, the chat list and mirror bookkeeping
//!
//! A private chat lives twice: once under each participant's `~<pub>/chats`.
//! The creator writes both copies; [`ChatRegistry::check_mirror`] reports a
//! copy that never landed and [`ChatRegistry::repair_mirror`] rewrites it.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::id::{group_chat_id, now_millis, private_chat_id, recipient_from_chat_id};
use super::types::{Chat, ChatKind, ChatRecord};
use crate::contacts::{Contact, ContactRecord, UserRecord, STATUS_ONLINE};
use crate::crypto;
use crate::error::ChatError;
use crate::graph::{GraphEvent, GraphPath, GraphStore, WatchMode, WatchTask, CHATS, CONTACTS};
use crate::identity::{IdentityManager, KeyPair, Session};
use crate::projection::ChatStore;

/// Which counterpart sub-trees are missing a chat record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorReport {
    pub chat_id: String,
    /// Public keys whose `chats/<chatId>` node does not exist
    pub missing: Vec<String>,
}

impl MirrorReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

pub struct ChatRegistry {
    graph: Arc<GraphStore>,
    identity: Arc<IdentityManager>,
    store: ChatStore,
    chat_watch: Mutex<Option<WatchTask>>,
    contact_watch: Mutex<Option<WatchTask>>,
}

impl ChatRegistry {
    pub fn new(graph: Arc<GraphStore>, identity: Arc<IdentityManager>, store: ChatStore) -> Self {
        Self {
            graph,
            identity,
            store,
            chat_watch: Mutex::new(None),
            contact_watch: Mutex::new(None),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Creation
    // ═══════════════════════════════════════════════════════════════════════

    /// Open (or create) the private chat with `contact_pub` and make it current.
    pub async fn create_private_chat(
        &self,
        contact_pub: &str,
        contact_username: &str,
    ) -> Result<String, ChatError> {
        let session = self.identity.require_session()?;
        let me = session.public_key();
        if contact_pub == me {
            return Err(ChatError::Identity("cannot open a chat with yourself".to_string()));
        }
        let chat_id = private_chat_id(&me, contact_pub);

        if let Some(chat) = self.store.find_chat(&chat_id) {
            debug!(%chat_id, "Private chat already known");
            self.store.set_current_chat(Some(chat));
            return Ok(chat_id);
        }

        let own_path = GraphPath::chat(&me, &chat_id)?;
        let record = match self.graph.read_as::<ChatRecord>(&own_path).await? {
            Some(existing) => existing,
            None => {
                let record = ChatRecord {
                    kind: ChatKind::Private,
                    name: contact_username.to_string(),
                    last_message: String::new(),
                    timestamp: now_millis(),
                    unread: 0,
                    participants: None,
                    admin: None,
                };
                self.graph.put(&own_path, &record).await?;
                record
            }
        };

        if !self.store.has_contact(contact_pub) {
            let contact = ContactRecord {
                username: contact_username.to_string(),
                public_key: contact_pub.to_string(),
                added_at: now_millis(),
            };
            self.graph
                .put(&GraphPath::contact(&me, contact_pub)?, &contact)
                .await?;
            self.store.upsert_contact(Contact::from_record(&contact));
        }

        if let Err(e) = self.write_private_mirror(&session, contact_pub, &chat_id, &record).await {
            warn!(%chat_id, counterpart = %contact_pub, error = %e, "Mirrored chat write failed");
        }

        let preview = decrypt_preview(&record.last_message, session.keys());
        let chat = Chat::from_record(&chat_id, &record, preview);
        self.store.upsert_chat(chat.clone());
        self.store.set_current_chat(Some(chat));

        info!(%chat_id, contact = %contact_username, "Private chat opened");
        Ok(chat_id)
    }

    /// Counterpart copy of a private chat plus the reciprocal contact entry.
    ///
    /// An existing counterpart record is left alone so its preview and unread
    /// counter survive.
    async fn write_private_mirror(
        &self,
        session: &Session,
        contact_pub: &str,
        chat_id: &str,
        own: &ChatRecord,
    ) -> Result<(), ChatError> {
        let counterpart = self.graph.user_node(contact_pub)?;
        let mirror_path = counterpart.child(CHATS)?.child(chat_id)?;

        if self.graph.read(&mirror_path).await?.is_none() {
            let mirror = ChatRecord {
                name: session.alias().to_string(),
                unread: 0,
                ..own.clone()
            };
            self.graph.put(&mirror_path, &mirror).await?;
        }

        let contact_path = counterpart.child(CONTACTS)?.child(&session.public_key())?;
        if self.graph.read(&contact_path).await?.is_none() {
            let contact = ContactRecord {
                username: session.alias().to_string(),
                public_key: session.public_key(),
                added_at: now_millis(),
            };
            self.graph.put(&contact_path, &contact).await?;
        }
        Ok(())
    }

    /// Create a group chat administered by the caller.
    ///
    /// The record is written to the caller and every participant; a failed
    /// participant copy is logged and shows up in [`Self::check_mirror`].
    pub async fn create_group_chat(
        &self,
        name: &str,
        participants: &[String],
    ) -> Result<String, ChatError> {
        let session = self.identity.require_session()?;
        let me = session.public_key();
        let name = name.trim();
        if name.is_empty() {
            return Err(ChatError::InvalidConfig("group name cannot be empty".to_string()));
        }

        let mut members = vec![me.clone()];
        for participant in participants {
            if !participant.is_empty() && !members.contains(participant) {
                members.push(participant.clone());
            }
        }

        let chat_id = group_chat_id();
        let record = ChatRecord {
            kind: ChatKind::Group,
            name: name.to_string(),
            last_message: String::new(),
            timestamp: now_millis(),
            unread: 0,
            participants: Some(members.clone()),
            admin: Some(me.clone()),
        };

        self.graph.put(&GraphPath::chat(&me, &chat_id)?, &record).await?;
        for member in members.iter().filter(|m| **m != me) {
            let path = self.graph.user_node(member)?.child(CHATS)?.child(&chat_id)?;
            if let Err(e) = self.graph.put(&path, &record).await {
                warn!(%chat_id, participant = %member, error = %e, "Group chat copy failed");
            }
        }

        let chat = Chat::from_record(&chat_id, &record, String::new());
        self.store.upsert_chat(chat.clone());
        self.store.set_current_chat(Some(chat));

        info!(%chat_id, members = members.len(), "Group chat created");
        Ok(chat_id)
    }

    pub fn select_chat(&self, chat_id: &str) -> Result<Chat, ChatError> {
        let chat = self
            .store
            .find_chat(chat_id)
            .ok_or_else(|| ChatError::ChatNotFound(chat_id.to_string()))?;
        self.store.set_current_chat(Some(chat.clone()));
        Ok(chat)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Mirrors
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn check_mirror(&self, chat_id: &str) -> Result<MirrorReport, ChatError> {
        let session = self.identity.require_session()?;
        let record = self.own_record(&session, chat_id).await?;

        let mut missing = Vec::new();
        for member in counterparts(&session, chat_id, &record) {
            let path = self.graph.user_node(&member)?.child(CHATS)?.child(chat_id)?;
            if self.graph.read(&path).await?.is_none() {
                missing.push(member);
            }
        }

        Ok(MirrorReport {
            chat_id: chat_id.to_string(),
            missing,
        })
    }

    /// Rewrite every missing counterpart copy. Returns how many were written.
    pub async fn repair_mirror(&self, chat_id: &str) -> Result<usize, ChatError> {
        let report = self.check_mirror(chat_id).await?;
        if report.is_complete() {
            return Ok(0);
        }

        let session = self.identity.require_session()?;
        let record = self.own_record(&session, chat_id).await?;

        for member in &report.missing {
            match record.kind {
                ChatKind::Private => {
                    self.write_private_mirror(&session, member, chat_id, &record)
                        .await?
                }
                ChatKind::Group => {
                    let path = self.graph.user_node(member)?.child(CHATS)?.child(chat_id)?;
                    self.graph.put(&path, &record).await?;
                }
            }
        }

        info!(%chat_id, repaired = report.missing.len(), "Chat mirror repaired");
        Ok(report.missing.len())
    }

    async fn own_record(&self, session: &Session, chat_id: &str) -> Result<ChatRecord, ChatError> {
        self.graph
            .read_as(&GraphPath::chat(&session.public_key(), chat_id)?)
            .await?
            .ok_or_else(|| ChatError::ChatNotFound(chat_id.to_string()))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Watches
    // ═══════════════════════════════════════════════════════════════════════

    /// Follow `~<me>/chats`, merging every chat by id into the projection.
    ///
    /// Chats already in the graph are applied before this returns.
    pub async fn watch_chats(&self) -> Result<(), ChatError> {
        let session = self.identity.require_session()?;
        let path = GraphPath::chats(&session.public_key())?;
        let mut subscription = self.graph.watch(&path, WatchMode::Continuous).await?;

        for event in subscription.drain_pending() {
            apply_chat_event(&self.store, &session, &path, &event);
        }

        let store = self.store.clone();
        let task = WatchTask::spawn(subscription, move |event| {
            apply_chat_event(&store, &session, &path, &event);
            async {}
        });

        let previous = self.chat_watch.lock().replace(task);
        if let Some(previous) = previous {
            previous.stop(&self.graph).await;
        }
        Ok(())
    }

    /// Follow `~<me>/contacts` into `active_contacts`, with presence.
    pub async fn watch_contacts(&self) -> Result<(), ChatError> {
        let session = self.identity.require_session()?;
        let path = GraphPath::contacts(&session.public_key())?;

        self.store.is_loading_contacts.set(true);
        let mut subscription = match self.graph.watch(&path, WatchMode::Continuous).await {
            Ok(subscription) => subscription,
            Err(e) => {
                self.store.is_loading_contacts.set(false);
                return Err(e);
            }
        };

        for event in subscription.drain_pending() {
            apply_contact_event(&self.graph, &self.store, &path, event).await;
        }
        self.store.is_loading_contacts.set(false);

        let graph = self.graph.clone();
        let store = self.store.clone();
        let task = WatchTask::spawn(subscription, move |event| {
            let graph = graph.clone();
            let store = store.clone();
            let path = path.clone();
            async move { apply_contact_event(&graph, &store, &path, event).await }
        });

        let previous = self.contact_watch.lock().replace(task);
        if let Some(previous) = previous {
            previous.stop(&self.graph).await;
        }
        Ok(())
    }

    /// Stop the chat and contact watches.
    pub async fn stop(&self) {
        let tasks = [self.chat_watch.lock().take(), self.contact_watch.lock().take()];
        for task in tasks.into_iter().flatten() {
            task.stop(&self.graph).await;
        }
    }
}

fn counterparts(session: &Session, chat_id: &str, record: &ChatRecord) -> Vec<String> {
    let me = session.public_key();
    match record.kind {
        ChatKind::Private => vec![recipient_from_chat_id(chat_id, &me)],
        ChatKind::Group => record
            .participants
            .iter()
            .flatten()
            .filter(|p| **p != me)
            .cloned()
            .collect(),
    }
}

/// Plaintext of a stored preview; legacy plaintext passes through.
pub(crate) fn decrypt_preview(raw: &str, keys: &KeyPair) -> String {
    if crypto::is_ciphertext(raw) {
        crypto::decrypt(raw, keys).unwrap_or_default()
    } else {
        raw.to_string()
    }
}

fn apply_chat_event(store: &ChatStore, session: &Session, watched: &GraphPath, event: &GraphEvent) {
    if event.is_tombstone() || !watched.is_parent_of(&event.path) {
        return;
    }
    let record: ChatRecord = match serde_json::from_value(event.value.clone()) {
        Ok(record) => record,
        Err(e) => {
            debug!(path = %event.path, error = %e, "Skipping incomplete chat node");
            return;
        }
    };
    let preview = decrypt_preview(&record.last_message, session.keys());
    if store.upsert_chat(Chat::from_record(event.key(), &record, preview)) {
        debug!(chat_id = %event.key(), "Chat discovered");
    }
}

async fn apply_contact_event(
    graph: &GraphStore,
    store: &ChatStore,
    watched: &GraphPath,
    event: GraphEvent,
) {
    if event.is_tombstone() || !watched.is_parent_of(&event.path) {
        return;
    }
    let record: ContactRecord = match serde_json::from_value(event.value) {
        Ok(record) => record,
        Err(e) => {
            debug!(path = %event.path, error = %e, "Skipping malformed contact");
            return;
        }
    };

    let mut contact = Contact::from_record(&record);
    let presence = match GraphPath::user_entry(&record.username) {
        Ok(path) => graph.read_as::<UserRecord>(&path).await.ok().flatten(),
        Err(_) => None,
    };
    if let Some(user) = presence.filter(|u| u.public_key.as_deref() == Some(record.public_key.as_str())) {
        contact.online = user.status.as_deref() == Some(STATUS_ONLINE);
        contact.last_seen = user.last_seen.unwrap_or(0);
    }
    store.upsert_contact(contact);
}
