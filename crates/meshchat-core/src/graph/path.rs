//! Typed graph paths
//!
//! Paths are `/`-joined segments. Every constructor validates its segments so a
//! public key, alias or chat id can never smuggle in an extra level.

use std::fmt;

use crate::error::ChatError;

pub const USERS: &str = "users";
pub const ALIASES: &str = "aliases";
pub const CHATS: &str = "chats";
pub const MESSAGES: &str = "messages";
pub const CONTACTS: &str = "contacts";

/// Address of a node in the graph store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphPath(Vec<String>);

impl GraphPath {
    /// Parse a `/`-joined path. Empty paths and empty segments are rejected.
    pub fn parse(path: &str) -> Result<Self, ChatError> {
        let segments = path
            .split('/')
            .map(|s| validate_segment(s).map(str::to_string))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self(segments))
    }

    pub fn root(segment: &str) -> Result<Self, ChatError> {
        Ok(Self(vec![validate_segment(segment)?.to_string()]))
    }

    /// Append one segment.
    pub fn child(&self, segment: &str) -> Result<Self, ChatError> {
        let mut segments = self.0.clone();
        segments.push(validate_segment(segment)?.to_string());
        Ok(Self(segments))
    }

    pub fn parent(&self) -> Option<Self> {
        if self.0.len() < 2 {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    /// Last segment: the node's key within its parent.
    pub fn key(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or_default()
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_parent_of(&self, other: &GraphPath) -> bool {
        other.parent().as_ref() == Some(self)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Well-known locations
    // ═══════════════════════════════════════════════════════════════════════

    /// `~<pub>`: public identity record and root of the user's sub-tree
    pub fn user(public_key: &str) -> Result<Self, ChatError> {
        validate_segment(public_key)?;
        Self::root(&format!("~{}", public_key))
    }

    /// `~@<alias>`: account record holding the password-sealed key pair
    pub fn account(alias: &str) -> Result<Self, ChatError> {
        validate_segment(alias)?;
        Self::root(&format!("~@{}", alias))
    }

    pub fn chats(public_key: &str) -> Result<Self, ChatError> {
        Self::user(public_key)?.child(CHATS)
    }

    pub fn chat(public_key: &str, chat_id: &str) -> Result<Self, ChatError> {
        Self::chats(public_key)?.child(chat_id)
    }

    pub fn messages(public_key: &str, chat_id: &str) -> Result<Self, ChatError> {
        Self::chat(public_key, chat_id)?.child(MESSAGES)
    }

    pub fn message(public_key: &str, chat_id: &str, message_id: &str) -> Result<Self, ChatError> {
        Self::messages(public_key, chat_id)?.child(message_id)
    }

    pub fn contacts(public_key: &str) -> Result<Self, ChatError> {
        Self::user(public_key)?.child(CONTACTS)
    }

    pub fn contact(public_key: &str, contact_key: &str) -> Result<Self, ChatError> {
        Self::contacts(public_key)?.child(contact_key)
    }

    /// `users`: discoverable user records keyed by alias
    pub fn users() -> Self {
        Self(vec![USERS.to_string()])
    }

    pub fn user_entry(alias: &str) -> Result<Self, ChatError> {
        Self::users().child(alias)
    }

    /// `aliases`: alias index keyed by alias
    pub fn aliases() -> Self {
        Self(vec![ALIASES.to_string()])
    }

    pub fn alias_entry(alias: &str) -> Result<Self, ChatError> {
        Self::aliases().child(alias)
    }
}

impl fmt::Display for GraphPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

fn validate_segment(segment: &str) -> Result<&str, ChatError> {
    if segment.is_empty() {
        return Err(ChatError::InvalidPath("empty segment".to_string()));
    }
    if segment.contains('/') {
        return Err(ChatError::InvalidPath(format!(
            "segment contains '/': {}",
            segment
        )));
    }
    Ok(segment)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        assert_eq!(GraphPath::user("abc").unwrap().to_string(), "~abc");
        assert_eq!(GraphPath::account("alice").unwrap().to_string(), "~@alice");
        assert_eq!(
            GraphPath::message("abc", "private_a_b", "1_x").unwrap().to_string(),
            "~abc/chats/private_a_b/messages/1_x"
        );
        assert_eq!(
            GraphPath::contact("abc", "def").unwrap().to_string(),
            "~abc/contacts/def"
        );
        assert_eq!(GraphPath::user_entry("bob").unwrap().to_string(), "users/bob");
        assert_eq!(GraphPath::alias_entry("bob").unwrap().to_string(), "aliases/bob");
    }

    #[test]
    fn test_parse_roundtrip() {
        let path = GraphPath::parse("~abc/chats/private_a_b").unwrap();
        assert_eq!(path, GraphPath::chat("abc", "private_a_b").unwrap());
        assert_eq!(path.key(), "private_a_b");
        assert_eq!(path.segments().len(), 3);
    }

    #[test]
    fn test_rejects_bad_segments() {
        assert!(matches!(GraphPath::parse(""), Err(ChatError::InvalidPath(_))));
        assert!(GraphPath::parse("users//bob").is_err());
        assert!(GraphPath::user("a/b").is_err());
        assert!(GraphPath::users().child("").is_err());
    }

    #[test]
    fn test_parent() {
        let chat = GraphPath::chat("abc", "c1").unwrap();
        let chats = GraphPath::chats("abc").unwrap();

        assert_eq!(chat.parent(), Some(chats.clone()));
        assert!(chats.is_parent_of(&chat));
        assert!(!chat.is_parent_of(&chats));
        assert_eq!(GraphPath::users().parent(), None);
    }
}
