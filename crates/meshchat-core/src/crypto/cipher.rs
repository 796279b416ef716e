//! Symmetric layer using ChaCha20-Poly1305 AEAD
//!
//! Every asymmetric operation in this crate ends in a 32-byte symmetric key
//! (sealed content keys, shared secrets, password-derived keys); this is the
//! cipher those keys drive.

use crate::error::ChatError;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;

/// Nonce size for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_SIZE: usize = 12;

/// ChaCha20-Poly1305 cipher bound to one 32-byte key.
///
/// # Wire Format
///
/// `encrypt` output: `[nonce (12 bytes)] + [ciphertext + auth_tag (16 bytes)]`
pub struct SecretCipher {
    cipher: ChaCha20Poly1305,
}

impl SecretCipher {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(key.into()),
        }
    }

    /// Generate a new random 32-byte key.
    pub fn generate_key() -> [u8; 32] {
        let mut key = [0u8; 32];
        rand::rng().fill_bytes(&mut key);
        key
    }

    /// Generate a random 12-byte nonce.
    pub fn generate_nonce() -> [u8; NONCE_SIZE] {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce);
        nonce
    }

    /// Encrypt with a fresh random nonce prepended to the output.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, ChatError> {
        let nonce_bytes = Self::generate_nonce();
        let ciphertext = self.encrypt_with_nonce(plaintext, &nonce_bytes)?;

        let mut result = nonce_bytes.to_vec();
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    /// Decrypt data produced by [`SecretCipher::encrypt`].
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, ChatError> {
        if data.len() < NONCE_SIZE {
            return Err(ChatError::DecryptionFailed(
                "Data too short to contain nonce".to_string(),
            ));
        }

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&data[..NONCE_SIZE]);
        self.decrypt_with_nonce(&data[NONCE_SIZE..], &nonce)
    }

    /// Encrypt with a caller-supplied nonce (not prepended).
    pub fn encrypt_with_nonce(
        &self,
        plaintext: &[u8],
        nonce: &[u8; NONCE_SIZE],
    ) -> Result<Vec<u8>, ChatError> {
        self.cipher
            .encrypt(Nonce::from_slice(nonce), plaintext)
            .map_err(|e| ChatError::Crypto(format!("Encryption failed: {}", e)))
    }

    /// Decrypt with a caller-supplied nonce.
    pub fn decrypt_with_nonce(
        &self,
        ciphertext: &[u8],
        nonce: &[u8; NONCE_SIZE],
    ) -> Result<Vec<u8>, ChatError> {
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| ChatError::DecryptionFailed(format!("{}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let cipher = SecretCipher::new(&SecretCipher::generate_key());
        let ciphertext = cipher.encrypt(b"Hello, World!").unwrap();
        assert_eq!(cipher.decrypt(&ciphertext).unwrap(), b"Hello, World!");
    }

    #[test]
    fn test_ciphertext_includes_nonce_and_tag() {
        let cipher = SecretCipher::new(&SecretCipher::generate_key());
        let ciphertext = cipher.encrypt(b"Test").unwrap();
        assert_eq!(ciphertext.len(), 4 + NONCE_SIZE + 16);
    }

    #[test]
    fn test_same_plaintext_different_ciphertext() {
        let cipher = SecretCipher::new(&SecretCipher::generate_key());
        let a = cipher.encrypt(b"same").unwrap();
        let b = cipher.encrypt(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let a = SecretCipher::new(&SecretCipher::generate_key());
        let b = SecretCipher::new(&SecretCipher::generate_key());
        let ciphertext = a.encrypt(b"Secret").unwrap();
        assert!(matches!(b.decrypt(&ciphertext), Err(ChatError::DecryptionFailed(_))));
    }

    #[test]
    fn test_tampered_data_fails() {
        let cipher = SecretCipher::new(&SecretCipher::generate_key());
        let mut ciphertext = cipher.encrypt(b"Original message").unwrap();
        ciphertext[NONCE_SIZE] ^= 0xFF;
        assert!(cipher.decrypt(&ciphertext).is_err());
    }

    #[test]
    fn test_truncated_data_fails() {
        let cipher = SecretCipher::new(&SecretCipher::generate_key());
        let result = cipher.decrypt(&[1, 2, 3]);
        match result {
            Err(ChatError::DecryptionFailed(msg)) => assert!(msg.contains("too short")),
            other => panic!("Expected DecryptionFailed, got {:?}", other),
        }
    }
}
