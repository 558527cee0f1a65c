//! Pluggable encryption of stored secrets.
//!
//! A deployment registers every cipher it knows about in a
//! [`CipherRegistry`] and selects exactly one by identifier at startup.
//! Selection failure is a misconfiguration and aborts startup; it is never
//! downgraded to cleartext storage.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use rand::RngCore;

use crate::error::{StoreError, StoreResult};

/// Nonce size for AES-GCM (96 bits).
const NONCE_SIZE: usize = 12;

/// Key size for AES-256 (256 bits).
pub const KEY_SIZE: usize = 32;

/// Encrypts and decrypts individual secret strings.
pub trait StorageCipher: Send + Sync {
    /// Identifier used to select this cipher and recorded next to every
    /// value it seals.
    fn id(&self) -> &str;

    /// Encrypt a secret.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Cipher`] if encryption fails.
    fn encrypt(&self, plaintext: &str) -> StoreResult<String>;

    /// Decrypt a secret produced by [`encrypt`](Self::encrypt).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Cipher`] if the value was tampered with, was
    /// sealed with another key, or is not valid ciphertext.
    fn decrypt(&self, ciphertext: &str) -> StoreResult<String>;
}

/// AES-256-GCM with a random nonce per value.
///
/// Output format is `base64(nonce || ciphertext || tag)`.
pub struct SymmetricKeyCipher {
    key: [u8; KEY_SIZE],
}

impl SymmetricKeyCipher {
    pub const ID: &'static str = "SymmetricKeyCipher";

    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Builds a cipher from a hex or base64 encoded 256-bit key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidKey`] when the key is not 32 bytes in
    /// either encoding.
    pub fn from_encoded_key(encoded: &str) -> StoreResult<Self> {
        Self::parse_key(encoded).map(Self::new)
    }

    /// Builds a cipher with a fresh random key.
    pub fn generate() -> Self {
        Self::new(Self::generate_key())
    }

    pub fn generate_key() -> [u8; KEY_SIZE] {
        let mut key = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        key
    }

    /// Base64 form of the key, suitable for configuration files.
    pub fn encoded_key(&self) -> String {
        BASE64.encode(self.key)
    }

    fn parse_key(key_str: &str) -> StoreResult<[u8; KEY_SIZE]> {
        let key_str = key_str.trim();
        if key_str.len() == KEY_SIZE * 2
            && let Ok(bytes) = hex::decode(key_str)
        {
            let mut key = [0u8; KEY_SIZE];
            key.copy_from_slice(&bytes);
            return Ok(key);
        }

        let bytes = BASE64
            .decode(key_str)
            .map_err(|e| StoreError::invalid_key(format!("Invalid base64 key: {e}")))?;

        if bytes.len() != KEY_SIZE {
            return Err(StoreError::invalid_key(format!(
                "Key must be {} bytes, got {}",
                KEY_SIZE,
                bytes.len()
            )));
        }

        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&bytes);
        Ok(key)
    }

    fn aead(&self) -> StoreResult<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| StoreError::cipher(format!("Failed to create cipher: {e}")))
    }
}

impl StorageCipher for SymmetricKeyCipher {
    fn id(&self) -> &str {
        Self::ID
    }

    fn encrypt(&self, plaintext: &str) -> StoreResult<String> {
        let cipher = self.aead()?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| StoreError::cipher(format!("Encryption failed: {e}")))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(sealed))
    }

    fn decrypt(&self, ciphertext: &str) -> StoreResult<String> {
        let sealed = BASE64
            .decode(ciphertext)
            .map_err(|e| StoreError::cipher(format!("Invalid ciphertext base64: {e}")))?;

        if sealed.len() <= NONCE_SIZE {
            return Err(StoreError::cipher("Ciphertext too short"));
        }

        let (nonce_bytes, body) = sealed.split_at(NONCE_SIZE);
        let plaintext = self
            .aead()?
            .decrypt(Nonce::from_slice(nonce_bytes), body)
            .map_err(|e| StoreError::cipher(format!("Decryption failed: {e}")))?;

        String::from_utf8(plaintext)
            .map_err(|e| StoreError::cipher(format!("Invalid UTF-8 in decrypted value: {e}")))
    }
}

impl fmt::Debug for SymmetricKeyCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymmetricKeyCipher")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Ciphers available to a deployment, keyed by identifier.
#[derive(Default, Clone)]
pub struct CipherRegistry {
    ciphers: HashMap<String, Arc<dyn StorageCipher>>,
}

impl CipherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a cipher, replacing any previous cipher with the same identifier.
    pub fn register(&mut self, cipher: Arc<dyn StorageCipher>) -> &mut Self {
        self.ciphers.insert(cipher.id().to_string(), cipher);
        self
    }

    /// Picks the cipher whose identifier equals `target`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CipherNotFound`] when nothing matches.
    pub fn select(&self, target: &str) -> StoreResult<Arc<dyn StorageCipher>> {
        match self.ciphers.get(target) {
            Some(cipher) => {
                tracing::debug!(cipher = target, "Selected storage cipher");
                Ok(Arc::clone(cipher))
            }
            None => Err(StoreError::CipherNotFound {
                target: target.to_string(),
            }),
        }
    }

    /// Registered identifiers, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.ciphers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl fmt::Debug for CipherRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherRegistry")
            .field("ciphers", &self.ids())
            .finish()
    }
}
