//! ChaCha20-Poly1305 payload encryption
//!
//! Each payload is sealed under a fresh random nonce. The sealed form is
//! `nonce (12 bytes) || ciphertext with tag`.

use std::fmt;

use chacha20poly1305::{
    ChaCha20Poly1305, Key, Nonce,
    aead::{Aead, KeyInit},
};
use rand::RngCore;
use txlog_core::{Encryption, ProviderError, ProviderKey, ProviderResult};

pub const CHACHA_KEY: ProviderKey = ProviderKey::new(*b"chacha20");

/// Size of the symmetric key (256 bits)
pub const CHACHA_KEY_SIZE: usize = 32;

/// Size of the nonce prefixed to every sealed payload
pub const NONCE_SIZE: usize = 12;

#[derive(Clone)]
pub struct ChaChaEncryption {
    cipher: ChaCha20Poly1305,
}

impl ChaChaEncryption {
    pub fn new(key: [u8; CHACHA_KEY_SIZE]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key)),
        }
    }

    /// Create a provider with a random key, returning the key alongside it
    pub fn generate() -> (Self, [u8; CHACHA_KEY_SIZE]) {
        let mut key = [0u8; CHACHA_KEY_SIZE];
        rand::rng().fill_bytes(&mut key);
        (Self::new(key), key)
    }
}

impl fmt::Debug for ChaChaEncryption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChaChaEncryption").finish_non_exhaustive()
    }
}

impl Encryption for ChaChaEncryption {
    fn key(&self) -> ProviderKey {
        CHACHA_KEY
    }

    fn encrypt(&self, plaintext: &[u8]) -> ProviderResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| ProviderError::Encrypt(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn decrypt(&self, sealed: &[u8]) -> ProviderResult<Vec<u8>> {
        if sealed.len() < NONCE_SIZE {
            return Err(ProviderError::Decrypt(
                "Data too short for nonce".to_string(),
            ));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| ProviderError::Decrypt(e.to_string()))
    }
}
