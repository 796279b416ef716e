//! Conversations: identifiers, records, the chat list and message streams
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  ChatRegistry                                                   │
//! │  - create private/group chats, mirrored into each participant   │
//! │  - watch ~<me>/chats and ~<me>/contacts into the projections    │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  MessageChannel                                                 │
//! │  - subscribe: ~<me>/chats/<id>/messages -> sorted_messages      │
//! │  - send: encrypt, write both sub-trees, update both previews    │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  GraphStore (graph module)                                      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

mod channel;
mod id;
mod registry;
mod types;

pub use channel::{ingest, ChannelSubscription, IngestOutcome, MessageChannel};
pub use id::{
    group_chat_id, is_private_chat_id, message_id, private_chat_id, recipient_from_chat_id,
};
pub use registry::{ChatRegistry, MirrorReport};
pub use types::{preview_text, Chat, ChatKind, ChatRecord, Message, MessageRecord, PREVIEW_CHARS};
