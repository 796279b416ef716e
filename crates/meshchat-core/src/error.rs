//! Error types for meshchat

use thiserror::Error;

/// Main error type for meshchat core operations
#[derive(Error, Debug)]
pub enum ChatError {
    /// An operation that needs a session was called without one
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The operation is recognised but deliberately unsupported
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Chat was not found in the local projection
    #[error("Chat not found: {0}")]
    ChatNotFound(String),

    /// The recipient's public or encryption key could not be determined
    #[error("Could not resolve recipient key: {0}")]
    RecipientKeyUnresolved(String),

    /// Cryptographic operation failed
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Decryption failed (wrong key, tampered data, or malformed input)
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error during storage operations (redb)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Database creation/opening error
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// Table error
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    /// Storage operation error
    #[error("Storage operation error: {0}")]
    StorageOp(#[from] redb::StorageError),

    /// Commit error
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Identity-related error (malformed keys or key material)
    #[error("Identity error: {0}")]
    Identity(String),

    /// Graph path could not be built or parsed
    #[error("Invalid graph path: {0}")]
    InvalidPath(String),

    /// Username/password did not open the stored key pair
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// An account with this alias already exists
    #[error("Alias already taken: {0}")]
    AliasTaken(String),

    /// Configuration value is missing or malformed
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The graph store has not been initialized (or was torn down)
    #[error("Graph store not initialized")]
    NotInitialized,
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Serialization(err.to_string())
    }
}

/// Result type alias using ChatError
pub type ChatResult<T> = Result<T, ChatError>;
