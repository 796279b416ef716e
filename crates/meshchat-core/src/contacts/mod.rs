//! Contacts, discovery and presence

mod directory;
mod types;

pub use directory::{ContactDirectory, SearchHandle, MIN_QUERY_CHARS};
pub use types::{AliasRecord, Contact, ContactRecord, UserRecord, STATUS_OFFLINE, STATUS_ONLINE};
