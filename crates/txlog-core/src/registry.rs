//! Provider registry
//!
//! Maps provider keys to the encoding and encryption implementations that
//! understand them. The registry is built once and validated up front: a
//! default key that matches no registered provider is a construction error.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::{ProviderError, ProviderResult};
use crate::provider::{Encoding, Encryption, ProviderKey, Value, ValueKind};
use crate::transaction::Transaction;

/// Lookup table of encoding and encryption providers
pub struct ProviderRegistry {
    encodings: HashMap<ProviderKey, Arc<dyn Encoding>>,
    encryptions: HashMap<ProviderKey, Arc<dyn Encryption>>,
    default_encoding: Arc<dyn Encoding>,
    default_encryption: Arc<dyn Encryption>,
}

impl ProviderRegistry {
    pub fn builder() -> ProviderRegistryBuilder {
        ProviderRegistryBuilder::default()
    }

    pub fn default_encoding(&self) -> &Arc<dyn Encoding> {
        &self.default_encoding
    }

    pub fn default_encryption(&self) -> &Arc<dyn Encryption> {
        &self.default_encryption
    }

    pub fn encoding(&self, key: &ProviderKey) -> ProviderResult<&Arc<dyn Encoding>> {
        self.encodings
            .get(key)
            .ok_or(ProviderError::UnknownProvider(*key))
    }

    pub fn encryption(&self, key: &ProviderKey) -> ProviderResult<&Arc<dyn Encryption>> {
        self.encryptions
            .get(key)
            .ok_or(ProviderError::UnknownProvider(*key))
    }

    /// Stamp the default provider keys on `tx` and set its payload to the
    /// encrypted encoding of `value`
    pub fn seal_into(&self, value: &Value, tx: &mut Transaction) -> ProviderResult<()> {
        tx.set_encoding_key(self.default_encoding.key());
        tx.set_encryption_key(self.default_encryption.key());
        let encoded = self.default_encoding.encode(value)?;
        let sealed = self.default_encryption.encrypt(&encoded)?;
        tx.set_payload(&sealed);
        Ok(())
    }

    /// Decrypt a record's payload with the provider named in its header
    pub fn plaintext(&self, tx: &Transaction) -> ProviderResult<Vec<u8>> {
        self.encryption(&tx.encryption_key())?.decrypt(tx.payload())
    }

    /// Decrypt and decode a record's payload
    pub fn open(&self, tx: &Transaction, hint: Option<&ValueKind>) -> ProviderResult<Value> {
        let plaintext = self.plaintext(tx)?;
        self.encoding(&tx.encoding_key())?.decode(&plaintext, hint)
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut encodings: Vec<_> = self.encodings.keys().collect();
        encodings.sort();
        let mut encryptions: Vec<_> = self.encryptions.keys().collect();
        encryptions.sort();
        f.debug_struct("ProviderRegistry")
            .field("encodings", &encodings)
            .field("encryptions", &encryptions)
            .field("default_encoding", &self.default_encoding.key())
            .field("default_encryption", &self.default_encryption.key())
            .finish()
    }
}

/// Builder for [`ProviderRegistry`]
#[derive(Default)]
pub struct ProviderRegistryBuilder {
    encodings: Vec<Arc<dyn Encoding>>,
    encryptions: Vec<Arc<dyn Encryption>>,
    default_encoding: Option<ProviderKey>,
    default_encryption: Option<ProviderKey>,
}

impl ProviderRegistryBuilder {
    pub fn encoding(mut self, provider: Arc<dyn Encoding>) -> Self {
        self.encodings.push(provider);
        self
    }

    pub fn encryption(mut self, provider: Arc<dyn Encryption>) -> Self {
        self.encryptions.push(provider);
        self
    }

    /// Key of the encoding used for new records; defaults to the first registered
    pub fn default_encoding(mut self, key: ProviderKey) -> Self {
        self.default_encoding = Some(key);
        self
    }

    /// Key of the encryption used for new records; defaults to the first registered
    pub fn default_encryption(mut self, key: ProviderKey) -> Self {
        self.default_encryption = Some(key);
        self
    }

    pub fn build(self) -> ProviderResult<ProviderRegistry> {
        let mut encodings = HashMap::with_capacity(self.encodings.len());
        for provider in &self.encodings {
            let key = provider.key();
            if encodings.insert(key, Arc::clone(provider)).is_some() {
                return Err(ProviderError::DuplicateProvider {
                    kind: "encoding",
                    key,
                });
            }
        }

        let mut encryptions = HashMap::with_capacity(self.encryptions.len());
        for provider in &self.encryptions {
            let key = provider.key();
            if encryptions.insert(key, Arc::clone(provider)).is_some() {
                return Err(ProviderError::DuplicateProvider {
                    kind: "encryption",
                    key,
                });
            }
        }

        let encoding_key = self
            .default_encoding
            .or_else(|| self.encodings.first().map(|p| p.key()))
            .unwrap_or_default();
        let default_encoding = encodings
            .get(&encoding_key)
            .cloned()
            .ok_or(ProviderError::MissingDefault {
                kind: "encoding",
                key: encoding_key,
            })?;

        let encryption_key = self
            .default_encryption
            .or_else(|| self.encryptions.first().map(|p| p.key()))
            .unwrap_or_default();
        let default_encryption = encryptions
            .get(&encryption_key)
            .cloned()
            .ok_or(ProviderError::MissingDefault {
                kind: "encryption",
                key: encryption_key,
            })?;

        debug!(
            encodings = encodings.len(),
            encryptions = encryptions.len(),
            default_encoding = %encoding_key,
            default_encryption = %encryption_key,
            "Provider registry built"
        );

        Ok(ProviderRegistry {
            encodings,
            encryptions,
            default_encoding,
            default_encryption,
        })
    }
}
