//! Crypto codec: the security primitive every message passes through
//!
//! All values that end up in the graph store are strings, so every output of
//! this module is a prefixed, base64-encoded string:
//!
//! | Prefix | Content |
//! |--------|---------|
//! | `mc1:` | postcard [`SealedBox`] (per-recipient encryption) |
//! | `mcs1:` | nonce + ChaCha20-Poly1305 ciphertext under a shared secret |
//! | `mcsig1:` | postcard signed blob (payload + Ed25519 signature) |
//!
//! Decryption and verification return `Option`: a `None` means "drop it",
//! never "crash". Callers log the drop.

mod cipher;
mod sealed;

pub use cipher::{SecretCipher, NONCE_SIZE};
pub use sealed::{SealedBox, SealedKey};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signature, Verifier};
use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::identity::{decode_encryption_key, decode_verifying_key, KeyPair};

pub const CIPHERTEXT_PREFIX: &str = "mc1:";
pub const SECRET_CIPHERTEXT_PREFIX: &str = "mcs1:";
pub const SIGNED_PREFIX: &str = "mcsig1:";

/// Generate a fresh identity key pair.
pub fn generate_key_pair() -> KeyPair {
    KeyPair::generate()
}

/// Encrypt `plaintext` so only the holder of `recipient_epub` can read it.
pub fn encrypt(plaintext: &str, recipient_epub: &str) -> Result<String, ChatError> {
    encrypt_for(plaintext, &[recipient_epub])
}

/// Encrypt `plaintext` once, readable by each listed encryption key.
pub fn encrypt_for(plaintext: &str, recipient_epubs: &[&str]) -> Result<String, ChatError> {
    let sealed = SealedBox::seal(plaintext.as_bytes(), recipient_epubs)?;
    let bytes =
        postcard::to_allocvec(&sealed).map_err(|e| ChatError::Serialization(e.to_string()))?;
    Ok(format!("{}{}", CIPHERTEXT_PREFIX, BASE64.encode(bytes)))
}

/// Decrypt a value produced by [`encrypt`] / [`encrypt_for`].
pub fn decrypt(ciphertext: &str, keys: &KeyPair) -> Option<String> {
    let encoded = ciphertext.strip_prefix(CIPHERTEXT_PREFIX)?;
    let bytes = BASE64.decode(encoded).ok()?;
    let sealed: SealedBox = postcard::from_bytes(&bytes).ok()?;
    let plaintext = sealed.open(keys).ok()?;
    String::from_utf8(plaintext).ok()
}

/// Whether a graph value looks like output of this codec.
pub fn is_ciphertext(value: &str) -> bool {
    value.starts_with(CIPHERTEXT_PREFIX) || value.starts_with(SECRET_CIPHERTEXT_PREFIX)
}

/// Symmetric key agreed between two identities.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedSecret([u8; 32]);

impl SharedSecret {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

/// Static X25519 agreement between our key pair and another identity's
/// encryption key. Both sides derive the same secret.
pub fn derive_shared_secret(keys: &KeyPair, other_epub: &str) -> Result<SharedSecret, ChatError> {
    let other = decode_encryption_key(other_epub)?;
    let shared = keys.encryption_secret().diffie_hellman(&other);
    Ok(SharedSecret(sealed::derive_key(shared.as_bytes(), b"shared")?))
}

pub fn encrypt_with_secret(plaintext: &str, secret: &SharedSecret) -> Result<String, ChatError> {
    let data = SecretCipher::new(secret.as_bytes()).encrypt(plaintext.as_bytes())?;
    Ok(format!("{}{}", SECRET_CIPHERTEXT_PREFIX, BASE64.encode(data)))
}

pub fn decrypt_with_secret(ciphertext: &str, secret: &SharedSecret) -> Option<String> {
    let encoded = ciphertext.strip_prefix(SECRET_CIPHERTEXT_PREFIX)?;
    let data = BASE64.decode(encoded).ok()?;
    let plaintext = SecretCipher::new(secret.as_bytes()).decrypt(&data).ok()?;
    String::from_utf8(plaintext).ok()
}

#[derive(Serialize, Deserialize)]
struct SignedBlob {
    payload: String,
    signer: String,
    signature: Vec<u8>,
}

/// Sign `payload`, producing a self-contained blob.
pub fn sign(payload: &str, keys: &KeyPair) -> Result<String, ChatError> {
    let blob = SignedBlob {
        payload: payload.to_string(),
        signer: keys.public_key(),
        signature: keys.sign_bytes(payload.as_bytes()).to_bytes().to_vec(),
    };
    let bytes = postcard::to_allocvec(&blob).map_err(|e| ChatError::Serialization(e.to_string()))?;
    Ok(format!("{}{}", SIGNED_PREFIX, BASE64.encode(bytes)))
}

/// Verify a blob from [`sign`] against `public_key`; returns the payload.
pub fn verify(signed: &str, public_key: &str) -> Option<String> {
    let encoded = signed.strip_prefix(SIGNED_PREFIX)?;
    let bytes = BASE64.decode(encoded).ok()?;
    let blob: SignedBlob = postcard::from_bytes(&bytes).ok()?;
    if blob.signer != public_key {
        return None;
    }

    let verifying = decode_verifying_key(public_key).ok()?;
    let signature_bytes: [u8; 64] = blob.signature.as_slice().try_into().ok()?;
    let signature = Signature::from_bytes(&signature_bytes);
    verifying
        .verify(blob.payload.as_bytes(), &signature)
        .ok()
        .map(|_| blob.payload)
}
