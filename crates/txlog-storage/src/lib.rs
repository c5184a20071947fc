//! # txlog storage
//!
//! Object storage consumed by the compaction pipeline: upload, download,
//! concatenate and delete by filename.
//!
//! Every backend applies the same filename rules (see [`normalize_name`]):
//! empty names, `.` and `..`, absolute paths and anything escaping the
//! storage root are rejected before any I/O happens, and directories are
//! never valid targets.
//!
//! ## Backends
//!
//! - [`FileStorage`]: a directory on the local filesystem
//! - [`InMemoryStorage`]: a concurrent map, for tests and simulation

use std::path::Path;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

pub mod error;
pub mod file;
pub mod memory;
pub mod names;

pub use error::{StorageError, StorageResult};
pub use file::{FileStorage, FileStorageConfig};
pub use memory::InMemoryStorage;
pub use names::normalize_name;

/// Filename-addressed object storage
#[async_trait]
pub trait Storage: Send + Sync {
    /// Store everything `reader` yields under `filename`, replacing any
    /// existing object. Returns the number of bytes stored.
    async fn upload(
        &self,
        filename: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> StorageResult<u64>;

    /// Write the object stored under `filename` into `writer`
    async fn download(
        &self,
        filename: &str,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> StorageResult<u64>;

    /// Store the concatenation of `filenames`, in order, under `destination`
    async fn concat(&self, destination: &str, filenames: &[String]) -> StorageResult<()>;

    async fn delete(&self, filename: &str) -> StorageResult<()>;

    /// Local directory objects are stored in, for backends that have one
    fn local_root(&self) -> Option<&Path> {
        None
    }
}
