//! Sealed boxes: per-recipient encryption over X25519
//!
//! ```text
//! SEAL (per recipient):
//! 1. ephemeral (esk, epk)
//! 2. shared = X25519(esk, recipient_epub)
//! 3. wrap_key = HKDF-SHA256(shared, "meshchat-seal-v1")
//! 4. sealed_key = ChaCha20Poly1305(wrap_key, content_key)
//! CONTENT:
//!    ciphertext = ChaCha20Poly1305(content_key, nonce, plaintext)
//! ```

use super::cipher::{SecretCipher, NONCE_SIZE};
use crate::error::ChatError;
use crate::identity::{decode_encryption_key, KeyPair};

use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519StaticSecret};

/// Domain separation string for HKDF
const HKDF_INFO: &[u8] = b"meshchat-seal-v1";

/// Content key wrapped for one recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedKey {
    /// Recipient's base58 X25519 public key (for lookup)
    pub recipient: String,
    /// Ephemeral X25519 public key used for this recipient
    pub ephemeral_pk: [u8; 32],
    /// Content key encrypted under the derived wrap key (nonce prepended)
    pub encrypted_key: Vec<u8>,
}

impl SealedKey {
    pub fn seal_for_recipient(
        content_key: &[u8; 32],
        recipient_epub: &str,
    ) -> Result<Self, ChatError> {
        let recipient_public = decode_encryption_key(recipient_epub)?;

        let mut ephemeral_seed = [0u8; 32];
        getrandom::getrandom(&mut ephemeral_seed)
            .map_err(|e| ChatError::Crypto(format!("Failed to generate ephemeral key: {}", e)))?;
        let ephemeral_secret = X25519StaticSecret::from(ephemeral_seed);
        let ephemeral_public = X25519PublicKey::from(&ephemeral_secret);

        let shared = ephemeral_secret.diffie_hellman(&recipient_public);
        let wrap_key = derive_key(shared.as_bytes(), b"wrap")?;
        let encrypted_key = SecretCipher::new(&wrap_key).encrypt(content_key)?;

        Ok(Self {
            recipient: recipient_epub.to_string(),
            ephemeral_pk: *ephemeral_public.as_bytes(),
            encrypted_key,
        })
    }

    pub fn unseal(&self, keys: &KeyPair) -> Result<[u8; 32], ChatError> {
        let ephemeral_public = X25519PublicKey::from(self.ephemeral_pk);
        let shared = keys.encryption_secret().diffie_hellman(&ephemeral_public);
        let wrap_key = derive_key(shared.as_bytes(), b"wrap")?;

        let key = SecretCipher::new(&wrap_key).decrypt(&self.encrypted_key)?;
        key.as_slice()
            .try_into()
            .map_err(|_| ChatError::DecryptionFailed("Unsealed key has wrong length".to_string()))
    }
}

/// Derive a 32-byte key from a shared secret using HKDF-SHA256.
pub(crate) fn derive_key(shared_secret: &[u8], context: &[u8]) -> Result<[u8; 32], ChatError> {
    let mut info = Vec::with_capacity(HKDF_INFO.len() + context.len());
    info.extend_from_slice(HKDF_INFO);
    info.extend_from_slice(context);

    let hkdf = Hkdf::<Sha256>::new(None, shared_secret);
    let mut output = [0u8; 32];
    hkdf.expand(&info, &mut output)
        .map_err(|e| ChatError::Crypto(format!("HKDF expand failed: {}", e)))?;
    Ok(output)
}

/// Content encrypted once, with the content key sealed for each recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedBox {
    pub sealed_keys: Vec<SealedKey>,
    pub nonce: [u8; NONCE_SIZE],
    pub ciphertext: Vec<u8>,
}

impl SealedBox {
    pub fn seal(plaintext: &[u8], recipients: &[&str]) -> Result<Self, ChatError> {
        if recipients.is_empty() {
            return Err(ChatError::Crypto("Cannot seal to zero recipients".to_string()));
        }

        let content_key = SecretCipher::generate_key();
        let sealed_keys = recipients
            .iter()
            .map(|r| SealedKey::seal_for_recipient(&content_key, r))
            .collect::<Result<Vec<_>, _>>()?;

        let nonce = SecretCipher::generate_nonce();
        let ciphertext = SecretCipher::new(&content_key).encrypt_with_nonce(plaintext, &nonce)?;

        Ok(Self {
            sealed_keys,
            nonce,
            ciphertext,
        })
    }

    /// Open the box with the recipient's key pair.
    pub fn open(&self, keys: &KeyPair) -> Result<Vec<u8>, ChatError> {
        let my_epub = keys.encryption_public_key();
        let sealed_key = self
            .sealed_keys
            .iter()
            .find(|sk| sk.recipient == my_epub)
            .ok_or_else(|| ChatError::DecryptionFailed("No sealed key for this recipient".to_string()))?;

        let content_key = sealed_key.unseal(keys)?;
        SecretCipher::new(&content_key).decrypt_with_nonce(&self.ciphertext, &self.nonce)
    }

    pub fn is_addressed_to(&self, epub: &str) -> bool {
        self.sealed_keys.iter().any(|sk| sk.recipient == epub)
    }
}
