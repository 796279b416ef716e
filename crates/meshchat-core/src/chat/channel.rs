//! Message streams for one conversation
//!
//! Incoming events from `~<me>/chats/<chatId>/messages` go through
//! [`ingest`]: tombstones are ignored, undecryptable records dropped, and a
//! known id never inserts twice. Other peers may only advance `delivered`
//! and `read`.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::id::{message_id, now_millis, recipient_from_chat_id};
use super::types::{preview_text, ChatRecord, ChatKind, Message, MessageRecord};
use crate::config::FeatureFlags;
use crate::crypto;
use crate::error::ChatError;
use crate::graph::{GraphPath, GraphStore, WatchMode, WatchTask, CHATS, MESSAGES};
use crate::identity::{IdentityManager, IdentityRecord, KeyPair, Session};
use crate::projection::{ChatStore, MessageMerge};

/// What happened to one incoming message event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Empty value or tombstone
    Ignored,
    /// Malformed or undecryptable
    Dropped,
    Duplicate,
    Inserted,
    /// Known id whose delivered/read flag advanced
    Updated,
}

/// A live message stream. Call [`ChannelSubscription::close`] to release it.
pub struct ChannelSubscription {
    chat_id: String,
    task: WatchTask,
    graph: Arc<GraphStore>,
}

impl ChannelSubscription {
    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub async fn close(self) {
        debug!(chat_id = %self.chat_id, "Closing message stream");
        self.task.stop(&self.graph).await;
    }
}

pub struct MessageChannel {
    graph: Arc<GraphStore>,
    identity: Arc<IdentityManager>,
    store: ChatStore,
    features: FeatureFlags,
}

impl MessageChannel {
    pub fn new(
        graph: Arc<GraphStore>,
        identity: Arc<IdentityManager>,
        store: ChatStore,
        features: FeatureFlags,
    ) -> Self {
        Self {
            graph,
            identity,
            store,
            features,
        }
    }

    /// Replace the message projection with the stream of `chat_id`.
    ///
    /// Messages already in the graph are ingested before this returns, so
    /// `is_loading_messages` is false again by then.
    pub async fn subscribe(&self, chat_id: &str) -> Result<ChannelSubscription, ChatError> {
        let session = self.identity.require_session()?;
        let path = GraphPath::messages(&session.public_key(), chat_id)?;

        self.store.is_loading_messages.set(true);
        self.store.load_chat_messages(chat_id);

        let mut subscription = match self.graph.watch(&path, WatchMode::Continuous).await {
            Ok(subscription) => subscription,
            Err(e) => {
                self.store.is_loading_messages.set(false);
                return Err(e);
            }
        };

        let backlog = subscription.drain_pending();
        let mut loaded = 0;
        for event in &backlog {
            if path.is_parent_of(&event.path)
                && ingest(&self.store, session.keys(), event.key(), &event.value)
                    == IngestOutcome::Inserted
            {
                loaded += 1;
            }
        }
        self.store.is_loading_messages.set(false);
        debug!(%chat_id, loaded, "Message backlog loaded");

        let store = self.store.clone();
        let watched = path.clone();
        let task = WatchTask::spawn(subscription, move |event| {
            if watched.is_parent_of(&event.path) {
                ingest(&store, session.keys(), event.key(), &event.value);
            }
            async {}
        });

        Ok(ChannelSubscription {
            chat_id: chat_id.to_string(),
            task,
            graph: self.graph.clone(),
        })
    }

    /// Offer one event to the projection under the current session's keys.
    pub fn ingest(&self, message_id: &str, value: &Value) -> Result<IngestOutcome, ChatError> {
        let session = self.identity.require_session()?;
        Ok(ingest(&self.store, session.keys(), message_id, value))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Sending
    // ═══════════════════════════════════════════════════════════════════════

    /// Encrypt and post a message to a private chat. Returns the message id.
    pub async fn send(
        &self,
        chat_id: &str,
        plaintext: &str,
        reply_to: Option<&str>,
    ) -> Result<String, ChatError> {
        let session = self.identity.require_session()?;
        let chat = self
            .store
            .find_chat(chat_id)
            .ok_or_else(|| ChatError::ChatNotFound(chat_id.to_string()))?;
        if chat.is_group() {
            return Err(ChatError::NotImplemented(
                "group chat encryption".to_string(),
            ));
        }

        let me = session.public_key();
        let my_epub = session.encryption_public_key();
        let recipient = recipient_from_chat_id(chat_id, &me);
        let recipient_epub = self.resolve_epub(&recipient).await?;

        let id = message_id();
        let timestamp = now_millis();
        let record = MessageRecord {
            sender: me.clone(),
            content: crypto::encrypt_for(plaintext, &[&recipient_epub, &my_epub])?,
            timestamp,
            delivered: false,
            read: false,
            reply_to: reply_to.map(str::to_string),
        };

        let recipient_chat = self.graph.user_node(&recipient)?.child(CHATS)?.child(chat_id)?;
        self.graph
            .put(&GraphPath::message(&me, chat_id, &id)?, &record)
            .await?;
        self.graph
            .put(&recipient_chat.child(MESSAGES)?.child(&id)?, &record)
            .await?;

        let preview = preview_text(plaintext);
        let sealed_preview = crypto::encrypt_for(&preview, &[&recipient_epub, &my_epub])?;
        self.graph
            .write(
                &GraphPath::chat(&me, chat_id)?,
                json!({ "lastMessage": sealed_preview, "timestamp": timestamp }),
            )
            .await?;
        self.bump_recipient_chat(&session, &recipient_chat, &sealed_preview, timestamp)
            .await?;

        if self.store.is_loaded(chat_id) {
            self.store
                .merge_message(Message::from_record(&id, &record, plaintext.to_string()));
        }
        self.store.update_chat(chat_id, |chat| {
            chat.last_message_preview = preview;
            chat.last_message_timestamp = timestamp;
        });

        info!(%chat_id, message_id = %id, "Message sent");
        Ok(id)
    }

    async fn resolve_epub(&self, recipient: &str) -> Result<String, ChatError> {
        let path = GraphPath::user(recipient)
            .map_err(|_| ChatError::RecipientKeyUnresolved(recipient.to_string()))?;
        self.graph
            .read_as::<IdentityRecord>(&path)
            .await?
            .map(|identity| identity.epub)
            .filter(|epub| !epub.is_empty())
            .ok_or_else(|| ChatError::RecipientKeyUnresolved(recipient.to_string()))
    }

    /// Preview and unread counter on the recipient's copy of the chat.
    ///
    /// A missing copy is written whole so it never exists half-formed.
    async fn bump_recipient_chat(
        &self,
        session: &Session,
        path: &GraphPath,
        sealed_preview: &str,
        timestamp: i64,
    ) -> Result<(), ChatError> {
        match self.graph.read_as::<ChatRecord>(path).await? {
            Some(existing) => {
                self.graph
                    .write(
                        path,
                        json!({
                            "lastMessage": sealed_preview,
                            "timestamp": timestamp,
                            "unread": existing.unread.saturating_add(1),
                        }),
                    )
                    .await?;
            }
            None => {
                let record = ChatRecord {
                    kind: ChatKind::Private,
                    name: session.alias().to_string(),
                    last_message: sealed_preview.to_string(),
                    timestamp,
                    unread: 1,
                    participants: None,
                    admin: None,
                };
                self.graph.put(path, &record).await?;
            }
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Receipts
    // ═══════════════════════════════════════════════════════════════════════

    /// Flag a message as read in both sub-trees.
    ///
    /// Returns `Ok(false)` without writing when read receipts are switched off.
    pub async fn mark_read(&self, chat_id: &str, message_id: &str) -> Result<bool, ChatError> {
        if !self.features.read_receipts {
            debug!(%chat_id, "Read receipts disabled");
            return Ok(false);
        }
        self.flag_message(chat_id, message_id, "read").await?;
        if self.store.is_loaded(chat_id) {
            self.store.update_message(message_id, |m| m.read = true);
        }
        Ok(true)
    }

    pub async fn mark_delivered(&self, chat_id: &str, message_id: &str) -> Result<(), ChatError> {
        self.flag_message(chat_id, message_id, "delivered").await?;
        if self.store.is_loaded(chat_id) {
            self.store.update_message(message_id, |m| m.delivered = true);
        }
        Ok(())
    }

    /// Set `field` to true on every existing copy of the message.
    async fn flag_message(&self, chat_id: &str, message_id: &str, field: &str) -> Result<(), ChatError> {
        let session = self.identity.require_session()?;
        let me = session.public_key();

        let mut owners = vec![me.clone()];
        if let Some(chat) = self.store.find_chat(chat_id) {
            match chat.kind {
                ChatKind::Private => owners.push(recipient_from_chat_id(chat_id, &me)),
                ChatKind::Group => owners.extend(
                    chat.participants
                        .iter()
                        .flatten()
                        .filter(|p| **p != me)
                        .cloned(),
                ),
            }
        }

        let mut written = 0;
        for owner in owners {
            let path = self
                .graph
                .user_node(&owner)?
                .child(CHATS)?
                .child(chat_id)?
                .child(MESSAGES)?
                .child(message_id)?;
            if self.graph.read(&path).await?.is_some() {
                self.graph.write(&path, json!({ field: true })).await?;
                written += 1;
            }
        }

        if written == 0 {
            warn!(%chat_id, %message_id, field, "No copy of message to flag");
        }
        Ok(())
    }

    /// Reset the caller's unread counter for `chat_id`.
    pub async fn clear_unread(&self, chat_id: &str) -> Result<(), ChatError> {
        let session = self.identity.require_session()?;
        let path = GraphPath::chat(&session.public_key(), chat_id)?;
        if self.graph.read(&path).await?.is_none() {
            return Err(ChatError::ChatNotFound(chat_id.to_string()));
        }
        self.graph.write(&path, json!({ "unread": 0 })).await?;
        self.store.update_chat(chat_id, |chat| chat.unread_count = 0);
        Ok(())
    }
}

/// Merge one stored message into `store`.
pub fn ingest(store: &ChatStore, keys: &KeyPair, message_id: &str, value: &Value) -> IngestOutcome {
    let empty = match value {
        Value::Null => true,
        Value::Object(fields) => fields.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    };
    if empty {
        return IngestOutcome::Ignored;
    }

    let record: MessageRecord = match serde_json::from_value(value.clone()) {
        Ok(record) => record,
        Err(e) => {
            debug!(%message_id, error = %e, "Dropping malformed message");
            return IngestOutcome::Dropped;
        }
    };

    if store.has_message(message_id) {
        let flags = Message::from_record(message_id, &record, String::new());
        return match store.merge_message(flags) {
            MessageMerge::Updated => IngestOutcome::Updated,
            _ => IngestOutcome::Duplicate,
        };
    }

    let Some(content) = crypto::decrypt(&record.content, keys) else {
        warn!(%message_id, sender = %record.sender, "Could not decrypt message, dropping");
        return IngestOutcome::Dropped;
    };

    match store.merge_message(Message::from_record(message_id, &record, content)) {
        MessageMerge::Inserted => IngestOutcome::Inserted,
        MessageMerge::Updated => IngestOutcome::Updated,
        MessageMerge::Duplicate => IngestOutcome::Duplicate,
    }
}
