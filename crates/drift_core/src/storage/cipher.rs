//! Pluggable at-rest encryption for stored sync payloads.
//!
//! The storage backends serialize collection snapshots to JSON and pass the
//! bytes through a [`PayloadCipher`] before writing. The cipher is injected
//! at construction time so tests and unencrypted profiles use
//! [`PlaintextCipher`] while production profiles use [`AesGcmCipher`].

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use rand::rngs::OsRng;

use crate::error::{DriftError, Result};

/// Number of random nonce bytes prefixed to every AES-GCM ciphertext.
const NONCE_LEN: usize = 12;

/// Transforms payload bytes on their way to and from durable storage.
pub trait PayloadCipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// Identity cipher: stores payloads as-is.
#[derive(Debug, Default)]
pub struct PlaintextCipher;

impl PayloadCipher for PlaintextCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        Ok(ciphertext.to_vec())
    }
}

/// AES-256-GCM cipher. Each ciphertext carries its own random nonce as a
/// 12-byte prefix.
pub struct AesGcmCipher {
    cipher: Aes256Gcm,
}

impl AesGcmCipher {
    /// Build from a 32-byte key.
    pub fn new(key: &[u8; 32]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }
}

impl PayloadCipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| DriftError::Cipher(format!("encrypt failed: {e}")))?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < NONCE_LEN {
            return Err(DriftError::Cipher("ciphertext too short".to_string()));
        }
        let (nonce_bytes, body) = ciphertext.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, body)
            .map_err(|e| DriftError::Cipher(format!("decrypt failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plaintext_roundtrip() {
        let cipher = PlaintextCipher;
        let data = b"hello sync";
        assert_eq!(cipher.decrypt(&cipher.encrypt(data).unwrap()).unwrap(), data);
    }

    #[test]
    fn test_aes_gcm_roundtrip() {
        let cipher = AesGcmCipher::new(&[7u8; 32]);
        let data = br#"{"history":[]}"#;
        let enc = cipher.encrypt(data).unwrap();
        assert_ne!(enc, data.to_vec());
        assert_eq!(cipher.decrypt(&enc).unwrap(), data);
    }

    #[test]
    fn test_aes_gcm_nonces_differ() {
        let cipher = AesGcmCipher::new(&[7u8; 32]);
        let a = cipher.encrypt(b"x").unwrap();
        let b = cipher.encrypt(b"x").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_aes_gcm_rejects_wrong_key() {
        let enc = AesGcmCipher::new(&[1u8; 32]).encrypt(b"secret").unwrap();
        assert!(AesGcmCipher::new(&[2u8; 32]).decrypt(&enc).is_err());
    }

    #[test]
    fn test_aes_gcm_rejects_truncated() {
        let cipher = AesGcmCipher::new(&[1u8; 32]);
        assert!(cipher.decrypt(&[0u8; 4]).is_err());
    }
}
