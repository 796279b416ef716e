//! Chat and message types
//!
//! Each type comes in two shapes: the projection type handed to the
//! presentation layer (plaintext, typed) and the `*Record` stored in the graph
//! (ciphertext, wire field names).

use serde::{Deserialize, Serialize};

/// Preview length before truncation with `...`
pub const PREVIEW_CHARS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Private,
    Group,
}

/// A conversation as shown in the chat list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub kind: ChatKind,
    pub name: String,
    pub last_message_preview: String,
    /// Unix millis of the last message (or of creation)
    pub last_message_timestamp: i64,
    pub unread_count: u32,
    /// Group members, creator included
    pub participants: Option<Vec<String>>,
    /// Group creator
    pub admin: Option<String>,
}

impl Chat {
    pub fn is_group(&self) -> bool {
        self.kind == ChatKind::Group
    }

    /// Build from a graph record whose preview has already been decrypted.
    pub fn from_record(id: &str, record: &ChatRecord, preview: String) -> Self {
        Self {
            id: id.to_string(),
            kind: record.kind,
            name: record.name.clone(),
            last_message_preview: preview,
            last_message_timestamp: record.timestamp,
            unread_count: record.unread,
            participants: record.participants.clone(),
            admin: record.admin.clone(),
        }
    }
}

/// `~<pub>/chats/<chatId>`
///
/// `lastMessage` holds an encrypted preview (or `""` before the first message).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRecord {
    #[serde(rename = "type")]
    pub kind: ChatKind,
    pub name: String,
    #[serde(rename = "lastMessage", default)]
    pub last_message: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub unread: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participants: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin: Option<String>,
}

/// A decrypted message in the open conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender: String,
    pub content: String,
    /// Unix millis
    pub timestamp: i64,
    pub delivered: bool,
    pub read: bool,
    pub reply_to: Option<String>,
}

impl Message {
    pub fn from_record(id: &str, record: &MessageRecord, content: String) -> Self {
        Self {
            id: id.to_string(),
            sender: record.sender.clone(),
            content,
            timestamp: record.timestamp,
            delivered: record.delivered,
            read: record.read,
            reply_to: record.reply_to.clone(),
        }
    }
}

/// `~<pub>/chats/<chatId>/messages/<messageId>`; `content` is ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub sender: String,
    pub content: String,
    pub timestamp: i64,
    #[serde(default)]
    pub delivered: bool,
    #[serde(default)]
    pub read: bool,
    #[serde(rename = "replyTo", default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

/// First [`PREVIEW_CHARS`] characters of `content`, `...` appended when cut.
pub fn preview_text(content: &str) -> String {
    if content.chars().count() > PREVIEW_CHARS {
        let cut: String = content.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", cut)
    } else {
        content.to_string()
    }
}
