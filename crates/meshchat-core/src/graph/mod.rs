//! Replicated graph store
//!
//! [`GraphPrimitive`] is the replication boundary; [`GraphStore`] is the typed
//! adapter the rest of the crate talks to.

mod memory;
mod path;
mod primitive;
mod store;

pub use memory::MemoryGraph;
pub use path::{GraphPath, ALIASES, CHATS, CONTACTS, MESSAGES, USERS};
pub use primitive::{
    Ack, EventReceiver, GraphEvent, GraphPrimitive, SubscriptionId, WatchMode,
};
pub use store::{ConnectionState, GraphStore, Subscription, WatchTask};
