//! Contact and discoverable-user records

use serde::{Deserialize, Serialize};

/// Presence status strings as written to `users/<alias>`.
pub const STATUS_ONLINE: &str = "Online";
pub const STATUS_OFFLINE: &str = "Offline";

/// A known or discovered user, as shown in contact lists and search results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub public_key: String,
    pub username: String,
    pub online: bool,
    /// Unix millis, 0 when never seen
    pub last_seen: i64,
    /// Unix millis the contact was added, for contact-list entries
    pub added_at: Option<i64>,
}

impl Contact {
    pub fn from_user(record: &UserRecord) -> Option<Self> {
        let public_key = record.public_key.clone().filter(|k| !k.is_empty())?;
        Some(Self {
            public_key,
            username: record.username.clone(),
            online: record.status.as_deref() == Some(STATUS_ONLINE),
            last_seen: record.last_seen.unwrap_or(0),
            added_at: None,
        })
    }

    pub fn from_alias(record: &AliasRecord) -> Option<Self> {
        if record.public_key.is_empty() {
            return None;
        }
        Some(Self {
            public_key: record.public_key.clone(),
            username: record.username.clone(),
            online: false,
            last_seen: 0,
            added_at: None,
        })
    }

    pub fn from_record(record: &ContactRecord) -> Self {
        Self {
            public_key: record.public_key.clone(),
            username: record.username.clone(),
            online: false,
            last_seen: 0,
            added_at: Some(record.added_at),
        }
    }
}

/// `~<pub>/contacts/<contactPub>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRecord {
    pub username: String,
    #[serde(rename = "publicKey")]
    pub public_key: String,
    #[serde(rename = "addedAt", default)]
    pub added_at: i64,
}

/// `users/<alias>`: discoverable user with presence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    #[serde(rename = "publicKey", default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(rename = "lastSeen", default)]
    pub last_seen: Option<i64>,
}

/// `aliases/<alias>`: alias index entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasRecord {
    pub username: String,
    #[serde(rename = "publicKey")]
    pub public_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_user_record_wire_names() {
        let record: UserRecord = serde_json::from_value(json!({
            "username": "alice",
            "publicKey": "abc",
            "status": "Online",
            "lastSeen": 42
        }))
        .unwrap();

        let contact = Contact::from_user(&record).unwrap();
        assert_eq!(contact.public_key, "abc");
        assert!(contact.online);
        assert_eq!(contact.last_seen, 42);
    }

    #[test]
    fn test_user_without_key_is_not_a_contact() {
        let record: UserRecord = serde_json::from_value(json!({"username": "ghost"})).unwrap();
        assert!(Contact::from_user(&record).is_none());
    }

    #[test]
    fn test_contact_record_roundtrip_names() {
        let record = ContactRecord {
            username: "bob".to_string(),
            public_key: "def".to_string(),
            added_at: 7,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value, json!({"username": "bob", "publicKey": "def", "addedAt": 7}));
    }
}
