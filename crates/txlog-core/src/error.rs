//! Error types for txlog-core
//!
//! Framing errors come from the record codec; provider errors come from the
//! pluggable encoding and encryption transforms.

use thiserror::Error;

use crate::provider::ProviderKey;

/// Errors raised while encoding or decoding a transaction record
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Fewer than 8 bytes were available for the length prefix
    #[error("did not read expected amount of data for the size of the transaction")]
    InsufficientLengthPrefix,

    /// The stream ended before the declared record length was read
    #[error("did not read expected amount of data (expected {expected} bytes, got {actual})")]
    InsufficientData { expected: u64, actual: u64 },

    /// Bytes remained after a complete framed record
    #[error("unexpected {extra} trailing bytes after record")]
    TrailingData { extra: usize },

    /// The record carries a format version this build cannot interpret
    #[error("unknown transaction format version: {0}")]
    UnknownVersion(u8),

    /// The record body is shorter than the fixed header of its format
    #[error("record header too short: expected at least {expected} bytes, got {actual}")]
    HeaderTooShort { expected: usize, actual: usize },

    /// The action byte is not one of `+`, `-`, `*`
    #[error("invalid action byte: {0:#04x}")]
    InvalidAction(u8),

    /// Underlying reader or writer failed
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for CodecError {
    fn from(err: std::io::Error) -> Self {
        CodecError::Io(err.to_string())
    }
}

impl CodecError {
    /// True when the error only says that no further record begins here
    pub fn is_end_of_records(&self) -> bool {
        matches!(self, CodecError::InsufficientLengthPrefix)
    }
}

/// Errors raised by encoding/encryption providers and the registry
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Encoding failed: {0}")]
    Encode(String),

    #[error("Decoding failed: {0}")]
    Decode(String),

    #[error("Encryption failed: {0}")]
    Encrypt(String),

    #[error("Decryption failed: {0}")]
    Decrypt(String),

    #[error("Unsupported value: {0}")]
    Unsupported(String),

    /// No provider is registered under this key
    #[error("No provider registered for key {0}")]
    UnknownProvider(ProviderKey),

    /// Two providers of the same kind share a key
    #[error("Duplicate {kind} provider key {key}")]
    DuplicateProvider { kind: &'static str, key: ProviderKey },

    /// The configured default key matches no registered provider
    #[error("Could not find default {kind} provider {key}")]
    MissingDefault { kind: &'static str, key: ProviderKey },

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ProviderError {
    fn from(err: std::io::Error) -> Self {
        ProviderError::Io(err.to_string())
    }
}

/// Result type for codec operations
pub type CodecResult<T> = Result<T, CodecError>;

/// Result type for provider operations
pub type ProviderResult<T> = Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_prefix_message() {
        let err = CodecError::InsufficientLengthPrefix;
        assert!(err.to_string().contains("for the size of the transaction"));
        assert!(err.is_end_of_records());
    }

    #[test]
    fn test_insufficient_data_message() {
        let err = CodecError::InsufficientData {
            expected: 28,
            actual: 18,
        };
        assert!(err.to_string().contains("did not read expected amount of data"));
        assert!(!err.is_end_of_records());
    }

    #[test]
    fn test_missing_default_display() {
        let err = ProviderError::MissingDefault {
            kind: "encryption",
            key: ProviderKey::new(*b"none\0\0\0\0"),
        };
        let msg = err.to_string();
        assert!(msg.contains("encryption"));
        assert!(msg.contains("none"));
    }
}
