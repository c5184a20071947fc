//! Local filesystem storage
//!
//! Objects are plain files below a root directory. Writes go to a sibling
//! temp file which is renamed into place once complete.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, instrument, warn};

use crate::Storage;
use crate::error::{StorageError, StorageResult};
use crate::names::normalize_name;

/// Configuration for [`FileStorage`]
#[derive(Debug, Clone)]
pub struct FileStorageConfig {
    /// Directory all objects live under; must already exist
    pub root: PathBuf,
}

impl FileStorageConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for FileStorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data/storage"),
        }
    }
}

/// Storage sandboxed to one directory
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub async fn new(config: FileStorageConfig) -> StorageResult<Self> {
        let root = fs::canonicalize(&config.root).await.map_err(|e| {
            StorageError::InvalidRoot(format!("{}: {}", config.root.display(), e))
        })?;
        let meta = fs::metadata(&root).await?;
        if !meta.is_dir() {
            return Err(StorageError::InvalidRoot(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        info!(path = %root.display(), "File storage initialized");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a filename to its path under the root
    pub fn resolve(&self, filename: &str) -> StorageResult<PathBuf> {
        let relative = normalize_name(filename)?;
        Ok(self.root.join(relative))
    }

    /// Resolve `filename` and reject it if it currently names a directory
    async fn resolve_file(&self, filename: &str) -> StorageResult<PathBuf> {
        let path = self.resolve(filename)?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => Err(StorageError::IsDirectory(filename.to_string())),
            Ok(_) => Ok(path),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(path),
            Err(e) => Err(e.into()),
        }
    }

    async fn open_existing(&self, filename: &str) -> StorageResult<(PathBuf, File)> {
        let path = self.resolve_file(filename).await?;
        let file = File::open(&path).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                StorageError::not_found(filename)
            } else {
                StorageError::Io(e.to_string())
            }
        })?;
        Ok((path, file))
    }

    /// Create `path`'s parent directories and a temp file beside it
    async fn create_temp(path: &Path) -> StorageResult<(PathBuf, File)> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let mut temp = path.as_os_str().to_owned();
        temp.push(format!(".upload.{}", nanos));
        let temp = PathBuf::from(temp);
        let file = File::create(&temp).await?;
        Ok((temp, file))
    }

    async fn commit(temp: &Path, mut file: File, path: &Path) -> StorageResult<()> {
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        if let Err(e) = fs::rename(temp, path).await {
            Self::discard(temp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn discard(temp: &Path) {
        if let Err(e) = fs::remove_file(temp).await {
            warn!(path = %temp.display(), error = %e, "Failed to remove temp file");
        }
    }
}

#[async_trait]
impl Storage for FileStorage {
    #[instrument(skip(self, reader), fields(root = %self.root.display()))]
    async fn upload(
        &self,
        filename: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> StorageResult<u64> {
        let path = self.resolve_file(filename).await?;
        let (temp, mut file) = Self::create_temp(&path).await?;

        let written = match tokio::io::copy(reader, &mut file).await {
            Ok(n) => n,
            Err(e) => {
                drop(file);
                Self::discard(&temp).await;
                return Err(e.into());
            }
        };
        Self::commit(&temp, file, &path).await?;

        debug!(bytes = written, "Uploaded file");
        Ok(written)
    }

    #[instrument(skip(self, writer), fields(root = %self.root.display()))]
    async fn download(
        &self,
        filename: &str,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> StorageResult<u64> {
        let (_, mut file) = self.open_existing(filename).await?;
        let read = tokio::io::copy(&mut file, writer).await?;
        writer.flush().await?;
        debug!(bytes = read, "Downloaded file");
        Ok(read)
    }

    #[instrument(skip(self, filenames), fields(sources = filenames.len()))]
    async fn concat(&self, destination: &str, filenames: &[String]) -> StorageResult<()> {
        if filenames.is_empty() {
            return Err(StorageError::NoSources);
        }

        let path = self.resolve_file(destination).await?;
        let mut sources = Vec::with_capacity(filenames.len());
        for name in filenames {
            let (source, file) = self.open_existing(name).await?;
            if source == path {
                return Err(StorageError::SourceIsDestination(destination.to_string()));
            }
            sources.push(file);
        }

        let (temp, mut out) = Self::create_temp(&path).await?;
        let mut total = 0u64;
        for mut source in sources {
            match tokio::io::copy(&mut source, &mut out).await {
                Ok(n) => total += n,
                Err(e) => {
                    drop(out);
                    Self::discard(&temp).await;
                    return Err(e.into());
                }
            }
        }
        Self::commit(&temp, out, &path).await?;

        debug!(bytes = total, "Concatenated files");
        Ok(())
    }

    #[instrument(skip(self), fields(root = %self.root.display()))]
    async fn delete(&self, filename: &str) -> StorageResult<()> {
        let path = self.resolve_file(filename).await?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Deleted file");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::not_found(filename)),
            Err(e) => Err(e.into()),
        }
    }

    fn local_root(&self) -> Option<&Path> {
        Some(&self.root)
    }
}
