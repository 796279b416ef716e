//! Identity key pair: Ed25519 for signing, X25519 for encryption
//!
//! The base58 Ed25519 verifying key is the identity handle used in graph
//! paths and chat ids. The X25519 half is published next to it so peers can
//! seal messages to us.

use crate::error::ChatError;
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519StaticSecret};

/// Serialized key pair length: ed25519 seed + x25519 secret
pub const KEY_PAIR_BYTES: usize = 64;

/// Local identity key pair.
///
/// Private halves never leave the device except sealed under the account
/// password (see [`crate::identity::IdentityManager::create_account`]).
pub struct KeyPair {
    signing: SigningKey,
    encryption: X25519StaticSecret,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        getrandom::getrandom(&mut seed).expect("Failed to get random bytes");
        let signing = SigningKey::from_bytes(&seed);

        let mut x25519_seed = [0u8; 32];
        getrandom::getrandom(&mut x25519_seed).expect("Failed to get random bytes");
        let encryption = X25519StaticSecret::from(x25519_seed);

        Self {
            signing,
            encryption,
        }
    }

    /// Identity handle: base58 of the Ed25519 verifying key
    pub fn public_key(&self) -> String {
        bs58::encode(self.signing.verifying_key().as_bytes()).into_string()
    }

    /// Base58 of the X25519 public key
    pub fn encryption_public_key(&self) -> String {
        bs58::encode(X25519PublicKey::from(&self.encryption).as_bytes()).into_string()
    }

    pub(crate) fn encryption_secret(&self) -> &X25519StaticSecret {
        &self.encryption
    }

    /// Sign raw bytes with the Ed25519 key
    pub fn sign_bytes(&self, message: &[u8]) -> ed25519_dalek::Signature {
        self.signing.sign(message)
    }

    /// Serialize the private key material.
    ///
    /// Format: `[ed25519 seed: 32][x25519 secret: 32]`
    pub fn to_bytes(&self) -> [u8; KEY_PAIR_BYTES] {
        let mut bytes = [0u8; KEY_PAIR_BYTES];
        bytes[..32].copy_from_slice(self.signing.as_bytes());
        bytes[32..].copy_from_slice(self.encryption.as_bytes());
        bytes
    }

    /// Deserialize a key pair from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ChatError> {
        if bytes.len() != KEY_PAIR_BYTES {
            return Err(ChatError::Identity(format!(
                "Key pair must be {} bytes, got {}",
                KEY_PAIR_BYTES,
                bytes.len()
            )));
        }

        let seed: [u8; 32] = bytes[..32]
            .try_into()
            .map_err(|_| ChatError::Identity("Invalid Ed25519 seed".to_string()))?;
        let secret: [u8; 32] = bytes[32..]
            .try_into()
            .map_err(|_| ChatError::Identity("Invalid X25519 secret".to_string()))?;

        Ok(Self {
            signing: SigningKey::from_bytes(&seed),
            encryption: X25519StaticSecret::from(secret),
        })
    }
}

impl Clone for KeyPair {
    fn clone(&self) -> Self {
        Self {
            signing: SigningKey::from_bytes(self.signing.as_bytes()),
            encryption: X25519StaticSecret::from(self.encryption.to_bytes()),
        }
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key())
            .field("encryption_public_key", &self.encryption_public_key())
            .finish_non_exhaustive()
    }
}

/// Decode a base58 identity handle into an Ed25519 verifying key.
pub fn decode_verifying_key(public_key: &str) -> Result<VerifyingKey, ChatError> {
    let bytes: [u8; 32] = decode_32(public_key)?;
    VerifyingKey::from_bytes(&bytes)
        .map_err(|_| ChatError::Identity(format!("Invalid Ed25519 public key: {}", public_key)))
}

/// Decode a base58 X25519 public key.
pub fn decode_encryption_key(encryption_public_key: &str) -> Result<X25519PublicKey, ChatError> {
    Ok(X25519PublicKey::from(decode_32(encryption_public_key)?))
}

fn decode_32(encoded: &str) -> Result<[u8; 32], ChatError> {
    let bytes = bs58::decode(encoded)
        .into_vec()
        .map_err(|_| ChatError::Identity(format!("Invalid base58 key: {}", encoded)))?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| ChatError::Identity(format!("Key must be 32 bytes: {}", encoded)))
}
