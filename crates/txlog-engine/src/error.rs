//! Error types for the log engine

use thiserror::Error;
use txlog_core::{CodecError, ProviderError};
use txlog_storage::StorageError;

use crate::compaction::CompactionStage;

/// Errors that can occur in the log engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// Record framing error outside a bucket replay
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Encoding or encryption provider failure
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Storage backend error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A bucket replay stopped in the middle of a record
    #[error("Bucket {bucket} is corrupt at offset {offset}: {reason}")]
    Corruption {
        bucket: String,
        offset: u64,
        reason: String,
    },

    /// Verified transaction count differs from the expected count
    #[error("Bucket {bucket} holds {actual} transactions, expected {expected}")]
    CountMismatch {
        bucket: String,
        expected: u64,
        actual: u64,
    },

    /// The master has no current bucket
    #[error("No current bucket")]
    NoCurrentBucket,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Engine already started
    #[error("Engine already started")]
    AlreadyStarted,

    /// A compaction stage failed; later stages did not run
    #[error("Compaction stage {stage} failed: {source}")]
    Compaction {
        stage: CompactionStage,
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    pub fn corruption(bucket: impl Into<String>, offset: u64, reason: impl Into<String>) -> Self {
        Self::Corruption {
            bucket: bucket.into(),
            offset,
            reason: reason.into(),
        }
    }

    pub fn compaction(stage: CompactionStage, source: EngineError) -> Self {
        Self::Compaction {
            stage,
            source: Box::new(source),
        }
    }

    /// True for count mismatches, which indicate a bug rather than a transient fault
    pub fn is_invariant_violation(&self) -> bool {
        match self {
            EngineError::CountMismatch { .. } => true,
            EngineError::Compaction { source, .. } => source.is_invariant_violation(),
            _ => false,
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Io(e.to_string())
    }
}

impl From<postcard::Error> for EngineError {
    fn from(e: postcard::Error) -> Self {
        EngineError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Serialization(e.to_string())
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(e: tokio::task::JoinError) -> Self {
        EngineError::Io(format!("Blocking task failed: {}", e))
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
