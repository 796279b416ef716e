//! Reactive projections for the presentation layer
//!
//! Every projection is a `tokio::sync::watch` cell. Mutations go through
//! `send_modify`, which serializes read-modify-write at the mutation point.
//! The sorted views are recomputed inside the same mutation as their source,
//! so a subscriber never observes `sorted_chats` out of step with `chats`.

use std::sync::Arc;

use tokio::sync::watch;

use crate::chat::{Chat, Message};
use crate::contacts::Contact;

/// A read-only, subscribable view of one piece of state.
pub struct Projection<T> {
    tx: Arc<watch::Sender<T>>,
}

impl<T> Clone for Projection<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Clone> Projection<T> {
    pub fn new(initial: T) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Snapshot of the current value.
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }

    pub(crate) fn set(&self, value: T) {
        self.tx.send_replace(value);
    }

    pub(crate) fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut T),
    {
        self.tx.send_modify(f);
    }

    /// Like [`Projection::update`] but only notifies when `f` returns true.
    pub(crate) fn update_if<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut T) -> bool,
    {
        self.tx.send_if_modified(f)
    }

    /// Read without cloning the whole value.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.tx.borrow())
    }
}

/// Chats by `last_message_timestamp`, newest first. Stable for ties.
pub fn sort_chats(chats: &[Chat]) -> Vec<Chat> {
    let mut sorted = chats.to_vec();
    sorted.sort_by(|a, b| b.last_message_timestamp.cmp(&a.last_message_timestamp));
    sorted
}

/// Messages by `timestamp`, oldest first. Stable for ties.
pub fn sort_messages(messages: &[Message]) -> Vec<Message> {
    let mut sorted = messages.to_vec();
    sorted.sort_by_key(|m| m.timestamp);
    sorted
}

/// Outcome of offering a message to the projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageMerge {
    Inserted,
    /// Known id; delivered/read flags advanced
    Updated,
    /// Known id, nothing new
    Duplicate,
}

/// All projections, owned by the engine and shared with its components.
#[derive(Clone)]
pub struct ChatStore {
    pub chats: Projection<Vec<Chat>>,
    pub sorted_chats: Projection<Vec<Chat>>,
    pub current_chat: Projection<Option<Chat>>,
    /// Chat whose messages `messages` and `sorted_messages` hold
    pub loaded_chat: Projection<Option<String>>,
    pub messages: Projection<Vec<Message>>,
    pub sorted_messages: Projection<Vec<Message>>,
    pub active_contacts: Projection<Vec<Contact>>,
    pub search_results: Projection<Vec<Contact>>,
    pub is_loading_messages: Projection<bool>,
    pub is_loading_contacts: Projection<bool>,
}

impl Default for ChatStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatStore {
    pub fn new() -> Self {
        Self {
            chats: Projection::new(Vec::new()),
            sorted_chats: Projection::new(Vec::new()),
            current_chat: Projection::new(None),
            loaded_chat: Projection::new(None),
            messages: Projection::new(Vec::new()),
            sorted_messages: Projection::new(Vec::new()),
            active_contacts: Projection::new(Vec::new()),
            search_results: Projection::new(Vec::new()),
            is_loading_messages: Projection::new(false),
            is_loading_contacts: Projection::new(false),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Chats
    // ═══════════════════════════════════════════════════════════════════════

    pub fn find_chat(&self, chat_id: &str) -> Option<Chat> {
        self.chats
            .with(|chats| chats.iter().find(|c| c.id == chat_id).cloned())
    }

    /// Insert or replace a chat by id. Returns true if it was new.
    pub(crate) fn upsert_chat(&self, chat: Chat) -> bool {
        let mut inserted = false;
        self.chats.update(|chats| {
            match chats.iter_mut().find(|c| c.id == chat.id) {
                Some(existing) => *existing = chat.clone(),
                None => {
                    chats.push(chat.clone());
                    inserted = true;
                }
            }
            self.sorted_chats.set(sort_chats(chats));
        });
        self.refresh_current_chat(&chat);
        inserted
    }

    /// Apply `f` to the chat with `chat_id`, if present.
    pub(crate) fn update_chat<F>(&self, chat_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut Chat),
    {
        let mut updated = None;
        self.chats.update_if(|chats| {
            let Some(chat) = chats.iter_mut().find(|c| c.id == chat_id) else {
                return false;
            };
            f(chat);
            updated = Some(chat.clone());
            self.sorted_chats.set(sort_chats(chats));
            true
        });
        match updated {
            Some(chat) => {
                self.refresh_current_chat(&chat);
                true
            }
            None => false,
        }
    }

    fn refresh_current_chat(&self, chat: &Chat) {
        self.current_chat.update_if(|current| match current {
            Some(c) if c.id == chat.id && c != chat => {
                *c = chat.clone();
                true
            }
            _ => false,
        });
    }

    pub(crate) fn set_current_chat(&self, chat: Option<Chat>) {
        self.current_chat.set(chat);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Messages
    // ═══════════════════════════════════════════════════════════════════════

    pub fn has_message(&self, message_id: &str) -> bool {
        self.messages
            .with(|messages| messages.iter().any(|m| m.id == message_id))
    }

    /// Add a message, or advance the flags of a known one.
    ///
    /// A known id is never inserted twice and its content never changes;
    /// `delivered` and `read` only move from false to true.
    pub(crate) fn merge_message(&self, message: Message) -> MessageMerge {
        let mut outcome = MessageMerge::Duplicate;
        self.messages.update_if(|messages| {
            match messages.iter_mut().find(|m| m.id == message.id) {
                Some(existing) => {
                    let delivered = message.delivered && !existing.delivered;
                    let read = message.read && !existing.read;
                    if !delivered && !read {
                        return false;
                    }
                    existing.delivered |= delivered;
                    existing.read |= read;
                    outcome = MessageMerge::Updated;
                }
                None => {
                    messages.push(message);
                    outcome = MessageMerge::Inserted;
                }
            }
            self.sorted_messages.set(sort_messages(messages));
            true
        });
        outcome
    }

    /// Apply `f` to a known message. Returns false if the id is unknown.
    pub(crate) fn update_message<F>(&self, message_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut Message),
    {
        self.messages.update_if(|messages| {
            let Some(message) = messages.iter_mut().find(|m| m.id == message_id) else {
                return false;
            };
            f(message);
            self.sorted_messages.set(sort_messages(messages));
            true
        })
    }

    pub fn is_loaded(&self, chat_id: &str) -> bool {
        self.loaded_chat.with(|loaded| loaded.as_deref() == Some(chat_id))
    }

    /// Point the message projections at `chat_id`, starting empty.
    pub(crate) fn load_chat_messages(&self, chat_id: &str) {
        self.clear_messages();
        self.loaded_chat.set(Some(chat_id.to_string()));
    }

    pub(crate) fn clear_messages(&self) {
        self.messages.update(|messages| {
            messages.clear();
            self.sorted_messages.set(Vec::new());
        });
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Contacts
    // ═══════════════════════════════════════════════════════════════════════

    pub(crate) fn upsert_contact(&self, contact: Contact) {
        self.active_contacts.update(|contacts| {
            match contacts.iter_mut().find(|c| c.public_key == contact.public_key) {
                Some(existing) => *existing = contact,
                None => contacts.push(contact),
            }
        });
    }

    pub fn has_contact(&self, public_key: &str) -> bool {
        self.active_contacts
            .with(|contacts| contacts.iter().any(|c| c.public_key == public_key))
    }

    /// Append a search hit, deduplicated by public key.
    ///
    /// A repeat hit only refreshes presence in place; order is append-only.
    pub(crate) fn push_search_result(&self, contact: Contact) -> bool {
        let mut appended = false;
        self.search_results.update_if(|results| {
            match results.iter_mut().find(|c| c.public_key == contact.public_key) {
                Some(existing) => {
                    let fresher = contact.last_seen > existing.last_seen
                        || (contact.online && !existing.online);
                    if fresher {
                        existing.online = contact.online;
                        existing.last_seen = existing.last_seen.max(contact.last_seen);
                    }
                    fresher
                }
                None => {
                    results.push(contact);
                    appended = true;
                    true
                }
            }
        });
        appended
    }

    /// Drop all session-scoped state (logout).
    pub(crate) fn reset(&self) {
        self.chats.update(|chats| {
            chats.clear();
            self.sorted_chats.set(Vec::new());
        });
        self.current_chat.set(None);
        self.clear_messages();
        self.loaded_chat.set(None);
        self.active_contacts.set(Vec::new());
        self.search_results.set(Vec::new());
        self.is_loading_messages.set(false);
        self.is_loading_contacts.set(false);
    }
}
