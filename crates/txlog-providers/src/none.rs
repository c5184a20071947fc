//! Identity encryption

use txlog_core::{Encryption, ProviderKey, ProviderResult};

pub const NONE_KEY: ProviderKey = ProviderKey::new(*b"none\0\0\0\0");

/// Passes payload bytes through unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct NoneEncryption;

impl NoneEncryption {
    pub fn new() -> Self {
        Self
    }
}

impl Encryption for NoneEncryption {
    fn key(&self) -> ProviderKey {
        NONE_KEY
    }

    fn encrypt(&self, plaintext: &[u8]) -> ProviderResult<Vec<u8>> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> ProviderResult<Vec<u8>> {
        Ok(ciphertext.to_vec())
    }
}
