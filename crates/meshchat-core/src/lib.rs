//! meshchat Core Library
//!
//! End-to-end encrypted chat over a replicated graph store.
//!
//! ## Overview
//!
//! Every participant owns a sub-tree `~<pub>` of a key-path-addressable graph.
//! Chats and messages are written into both participants' sub-trees (mirrored
//! writes); message content and chat previews only ever hit the graph as
//! ciphertext. The presentation layer observes `tokio::sync::watch`
//! projections and calls actions on [`ChatEngine`].
//!
//! ## Core Principles
//!
//! - **No plaintext in the graph**: content is sealed to recipient and sender
//! - **Local-first**: unreachable peers downgrade to the local replica
//! - **Idempotent merges**: echo events and duplicate deliveries collapse by id
//!
//! ## Quick Start
//!
//! ```ignore
//! use meshchat_core::{ChatConfig, ChatEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = ChatEngine::new(ChatConfig::from_env()?, "~/.meshchat").await?;
//!     engine.initialize().await?;
//!
//!     if !engine.is_authenticated() {
//!         engine.login("alice", "correct horse").await?;
//!     }
//!
//!     for chat in engine.store().sorted_chats.get() {
//!         println!("{} ({} unread): {}", chat.name, chat.unread_count, chat.last_message_preview);
//!     }
//!
//!     engine.logout().await;
//!     Ok(())
//! }
//! ```

pub mod chat;
pub mod config;
pub mod contacts;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod graph;
pub mod identity;
pub mod logging;
pub mod projection;
pub mod storage;

// Re-exports
pub use chat::{
    private_chat_id, ChannelSubscription, Chat, ChatKind, IngestOutcome, Message, MirrorReport,
};
pub use config::{BackoffPolicy, ChatConfig, FeatureFlags, KdfParams};
pub use contacts::{Contact, SearchHandle};
pub use engine::ChatEngine;
pub use error::{ChatError, ChatResult};
pub use graph::{ConnectionState, GraphPath, GraphPrimitive, GraphStore, MemoryGraph, WatchMode};
pub use identity::{KeyPair, Session};
pub use projection::{ChatStore, Projection};
pub use storage::Storage;
