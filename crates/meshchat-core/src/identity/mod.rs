//! Identity: key pairs, accounts and the authenticated session
//!
//! ## Overview
//!
//! - **KeyPair**: Ed25519 signing key (its base58 public half is the identity
//!   handle) plus an X25519 encryption key published as `epub`.
//! - **IdentityManager**: account creation, login, recall and logout.
//! - **Session**: the logged-in identity, shared by the chat components.
//!
//! ## Example
//!
//! ```ignore
//! let public_key = identity.create_account("alice", "correct horse").await?;
//! let session = identity.login("alice", "correct horse").await?;
//! assert_eq!(session.public_key(), public_key);
//! ```

mod keypair;
mod manager;

pub use keypair::{decode_encryption_key, decode_verifying_key, KeyPair, KEY_PAIR_BYTES};
pub use manager::{IdentityManager, IdentityRecord, Session};
