//! Accounts and the authenticated session
//!
//! An account is a key pair sealed under an Argon2id key derived from the
//! password and stored at `~@<alias>`; anyone can fetch it, only the password
//! opens it. Logging in opens the sealed pair and keeps it in memory as the
//! [`Session`]. A recall artifact in the local `session` table lets the next
//! process resume without the password. The artifact holds the key pair, so it
//! is sealed with the storage's device key and never written in the clear.

use std::sync::Arc;

use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use parking_lot::RwLock;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::keypair::KeyPair;
use crate::config::KdfParams;
use crate::contacts::{AliasRecord, UserRecord, STATUS_ONLINE};
use crate::crypto::SecretCipher;
use crate::error::ChatError;
use crate::graph::{GraphPath, GraphStore};
use crate::storage::Storage;

const SALT_LEN: usize = 16;
const RECALL_KEY: &str = "recall";

/// `~<pub>`: what every peer needs to address us.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    #[serde(rename = "pub")]
    pub public_key: String,
    /// X25519 encryption key, base58
    pub epub: String,
    pub alias: String,
}

/// `~@<alias>`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccountRecord {
    #[serde(rename = "pub")]
    public_key: String,
    /// hex
    salt: String,
    /// base64 of nonce + sealed key pair
    auth: String,
    kdf: KdfParams,
}

#[derive(Serialize, Deserialize)]
struct RecallArtifact {
    alias: String,
    /// hex of [`KeyPair::to_bytes`]
    key_pair: String,
}

/// The authenticated identity's live handle.
#[derive(Debug, Clone)]
pub struct Session {
    alias: String,
    keys: KeyPair,
}

impl Session {
    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn public_key(&self) -> String {
        self.keys.public_key()
    }

    pub fn encryption_public_key(&self) -> String {
        self.keys.encryption_public_key()
    }

    pub fn keys(&self) -> &KeyPair {
        &self.keys
    }
}

pub struct IdentityManager {
    graph: Arc<GraphStore>,
    recall_store: Option<Storage>,
    kdf: KdfParams,
    session: RwLock<Option<Arc<Session>>>,
}

impl IdentityManager {
    /// `recall_store` of `None` disables recall across processes.
    pub fn new(graph: Arc<GraphStore>, recall_store: Option<Storage>, kdf: KdfParams) -> Self {
        Self {
            graph,
            recall_store,
            kdf,
            session: RwLock::new(None),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Account Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Create an account and publish it. Does not log in.
    ///
    /// Returns the new identity's public key.
    pub async fn create_account(&self, username: &str, password: &str) -> Result<String, ChatError> {
        let alias = normalize_alias(username)?;
        if password.is_empty() {
            return Err(ChatError::AuthFailed("password cannot be empty".to_string()));
        }

        let account_path = GraphPath::account(&alias)?;
        let alias_path = GraphPath::alias_entry(&alias)?;
        if self.graph.read(&account_path).await?.is_some()
            || self.graph.read(&alias_path).await?.is_some()
        {
            return Err(ChatError::AliasTaken(alias));
        }

        let keys = KeyPair::generate();
        let public_key = keys.public_key();

        let mut salt = [0u8; SALT_LEN];
        rand::rng().fill_bytes(&mut salt);
        let key = derive_password_key(password, &salt, &self.kdf)?;
        let sealed = SecretCipher::new(&key).encrypt(&keys.to_bytes())?;

        let identity = IdentityRecord {
            public_key: public_key.clone(),
            epub: keys.encryption_public_key(),
            alias: alias.clone(),
        };
        let account = AccountRecord {
            public_key: public_key.clone(),
            salt: hex::encode(salt),
            auth: BASE64.encode(sealed),
            kdf: self.kdf,
        };

        self.graph.put(&GraphPath::user(&public_key)?, &identity).await?;
        self.graph.put(&account_path, &account).await?;
        self.graph
            .put(
                &GraphPath::user_entry(&alias)?,
                &UserRecord {
                    username: alias.clone(),
                    public_key: Some(public_key.clone()),
                    status: Some(STATUS_ONLINE.to_string()),
                    last_seen: Some(chrono::Utc::now().timestamp_millis()),
                },
            )
            .await?;
        self.graph
            .put(
                &alias_path,
                &AliasRecord {
                    username: alias.clone(),
                    public_key: public_key.clone(),
                },
            )
            .await?;

        info!(%alias, %public_key, "Account created");
        Ok(public_key)
    }

    /// Open the sealed key pair for `username` and start a session.
    pub async fn login(&self, username: &str, password: &str) -> Result<Arc<Session>, ChatError> {
        let alias = normalize_alias(username)?;
        let account: AccountRecord = self
            .graph
            .read_as(&GraphPath::account(&alias)?)
            .await?
            .ok_or_else(|| ChatError::AuthFailed(format!("no account for {}", alias)))?;

        let salt = hex::decode(&account.salt)
            .map_err(|_| ChatError::AuthFailed("corrupt account salt".to_string()))?;
        let sealed = BASE64
            .decode(&account.auth)
            .map_err(|_| ChatError::AuthFailed("corrupt account record".to_string()))?;

        let key = derive_password_key(password, &salt, &account.kdf)?;
        let opened = SecretCipher::new(&key)
            .decrypt(&sealed)
            .map_err(|_| ChatError::AuthFailed("wrong username or password".to_string()))?;
        let keys = KeyPair::from_bytes(&opened)?;

        if keys.public_key() != account.public_key {
            return Err(ChatError::AuthFailed(
                "account key does not match its public key".to_string(),
            ));
        }

        let session = self.start_session(alias, keys).await?;
        self.save_recall(&session);
        Ok(session)
    }

    /// Resume from the local recall artifact, if there is one.
    ///
    /// Returns the existing session when already authenticated.
    pub async fn recall(&self) -> Result<Option<Arc<Session>>, ChatError> {
        if let Some(session) = self.session() {
            return Ok(Some(session));
        }
        let Some(store) = &self.recall_store else {
            return Ok(None);
        };
        let Some(data) = store.load_session(RECALL_KEY)? else {
            debug!("No recall artifact");
            return Ok(None);
        };

        let cipher = SecretCipher::new(&store.device_key()?);
        let keys = cipher
            .decrypt(&data)
            .ok()
            .and_then(|plain| serde_json::from_slice::<RecallArtifact>(&plain).ok())
            .and_then(|artifact| {
                let bytes = hex::decode(&artifact.key_pair).ok()?;
                let keys = KeyPair::from_bytes(&bytes).ok()?;
                Some((artifact.alias, keys))
            });
        let Some((alias, keys)) = keys else {
            warn!("Discarding unreadable recall artifact");
            if let Err(e) = store.clear_sessions() {
                warn!(error = %e, "Failed to clear recall artifact");
            }
            return Ok(None);
        };

        let session = self.start_session(alias, keys).await?;
        info!(alias = %session.alias(), "Session recalled");
        Ok(Some(session))
    }

    /// End the session. Every step runs even if an earlier one fails.
    ///
    /// 1. clear the in-memory session
    /// 2. release the session with the graph primitive
    /// 3. purge local recall artifacts
    /// 4. tear the graph store down so it can be initialized again
    pub async fn logout(&self) {
        let session = self.end_session();
        self.release(session.as_deref()).await;
    }

    /// Step 1 of [`logout`](Self::logout): forget the session in memory and
    /// hand back the snapshot. `is_authenticated` is false from here on.
    pub fn end_session(&self) -> Option<Arc<Session>> {
        self.session.write().take()
    }

    /// Steps 2 to 4 of [`logout`](Self::logout) for a session already ended
    /// with [`end_session`](Self::end_session).
    pub async fn release(&self, session: Option<&Session>) {
        if let Some(session) = session {
            match self.graph.primitive() {
                Ok(primitive) => {
                    if let Err(e) = primitive.release_session(&session.public_key()).await {
                        warn!(error = %e, "Failed to release graph session");
                    }
                }
                Err(e) => warn!(error = %e, "No graph handle to release session on"),
            }
        }

        if let Some(store) = &self.recall_store {
            match store.clear_sessions() {
                Ok(removed) => debug!(removed, "Recall artifacts purged"),
                Err(e) => warn!(error = %e, "Failed to purge recall artifacts"),
            }
        }

        self.graph.teardown().await;

        info!(alias = ?session.map(|s| s.alias()), "Logged out");
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Session Queries
    // ═══════════════════════════════════════════════════════════════════════

    pub fn is_authenticated(&self) -> bool {
        self.session.read().is_some()
    }

    pub fn session(&self) -> Option<Arc<Session>> {
        self.session.read().clone()
    }

    pub fn require_session(&self) -> Result<Arc<Session>, ChatError> {
        self.session().ok_or(ChatError::NotAuthenticated)
    }

    async fn start_session(&self, alias: String, keys: KeyPair) -> Result<Arc<Session>, ChatError> {
        self.graph
            .primitive()?
            .attach_session(&keys.public_key())
            .await?;

        let session = Arc::new(Session { alias, keys });
        *self.session.write() = Some(session.clone());
        info!(alias = %session.alias(), public_key = %session.public_key(), "Session started");
        Ok(session)
    }

    fn save_recall(&self, session: &Session) {
        let Some(store) = &self.recall_store else {
            return;
        };
        let artifact = RecallArtifact {
            alias: session.alias().to_string(),
            key_pair: hex::encode(session.keys().to_bytes()),
        };
        let result = serde_json::to_vec(&artifact)
            .map_err(ChatError::from)
            .and_then(|plain| {
                let cipher = SecretCipher::new(&store.device_key()?);
                cipher.encrypt(&plain)
            })
            .and_then(|sealed| store.save_session(RECALL_KEY, &sealed));
        if let Err(e) = result {
            warn!(error = %e, "Failed to store recall artifact");
        }
    }
}

fn normalize_alias(username: &str) -> Result<String, ChatError> {
    let alias = username.trim();
    if alias.is_empty() {
        return Err(ChatError::AuthFailed("username cannot be empty".to_string()));
    }
    if alias.contains('/') {
        return Err(ChatError::AuthFailed(format!(
            "username cannot contain '/': {}",
            alias
        )));
    }
    Ok(alias.to_string())
}

/// Derive the 32-byte sealing key from a password using Argon2id.
fn derive_password_key(password: &str, salt: &[u8], kdf: &KdfParams) -> Result<[u8; 32], ChatError> {
    let params = Params::new(kdf.memory_kib, kdf.iterations, 1, Some(32))
        .map_err(|e| ChatError::Crypto(format!("Invalid Argon2 params: {}", e)))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = [0u8; 32];
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| ChatError::Crypto(format!("Key derivation failed: {}", e)))?;
    Ok(key)
}
