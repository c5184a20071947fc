//! Error types for txlog-storage

use thiserror::Error;

/// Errors that can occur in storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// Empty, `.` or `..`, or a name that normalises to nothing
    #[error("Invalid filename: {0:?}")]
    InvalidFilename(String),

    /// The name resolves to a location outside the storage root
    #[error("Filename escapes storage root: {0:?}")]
    OutsideRoot(String),

    /// The name refers to a directory, not a file
    #[error("Is a directory: {0}")]
    IsDirectory(String),

    #[error("no filenames given to concat")]
    NoSources,

    /// A concat destination also appears among its sources
    #[error("Concat destination is also a source: {0}")]
    SourceIsDestination(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The configured root is missing or not a directory
    #[error("Invalid storage root: {0}")]
    InvalidRoot(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl StorageError {
    pub fn not_found(item: impl Into<String>) -> Self {
        Self::NotFound(item.into())
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }

    /// True for errors caused by the requested name rather than by I/O
    pub fn is_rejected_name(&self) -> bool {
        matches!(
            self,
            StorageError::InvalidFilename(_)
                | StorageError::OutsideRoot(_)
                | StorageError::IsDirectory(_)
        )
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
