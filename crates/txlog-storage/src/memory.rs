//! In-memory storage backend
//!
//! Useful for testing and simulation; nothing is persisted.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::Storage;
use crate::error::{StorageError, StorageResult};
use crate::names::normalize_name;

/// Concurrent map of normalised filename to contents
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    objects: DashMap<String, Bytes>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Contents stored under `filename`, if any
    pub fn get(&self, filename: &str) -> Option<Bytes> {
        let key = normalize_name(filename).ok()?;
        self.objects.get(&key).map(|entry| entry.value().clone())
    }

    /// All stored names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.objects.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Resolve `filename`, rejecting names that act as a directory prefix
    fn key(&self, filename: &str) -> StorageResult<String> {
        let key = normalize_name(filename)?;
        let prefix = format!("{}/", key);
        if self.objects.iter().any(|e| e.key().starts_with(&prefix)) {
            return Err(StorageError::IsDirectory(filename.to_string()));
        }
        Ok(key)
    }

    fn load(&self, filename: &str) -> StorageResult<Bytes> {
        let key = self.key(filename)?;
        self.objects
            .get(&key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StorageError::not_found(filename))
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn upload(
        &self,
        filename: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> StorageResult<u64> {
        let key = self.key(filename)?;
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;
        let size = data.len() as u64;
        self.objects.insert(key, Bytes::from(data));
        debug!(filename, bytes = size, "Stored object in memory");
        Ok(size)
    }

    async fn download(
        &self,
        filename: &str,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> StorageResult<u64> {
        // Clone out of the map so no shard guard is held across the await
        let data = self.load(filename)?;
        writer.write_all(&data).await?;
        writer.flush().await?;
        Ok(data.len() as u64)
    }

    async fn concat(&self, destination: &str, filenames: &[String]) -> StorageResult<()> {
        if filenames.is_empty() {
            return Err(StorageError::NoSources);
        }
        let key = self.key(destination)?;

        let mut joined = Vec::new();
        for name in filenames {
            if normalize_name(name)? == key {
                return Err(StorageError::SourceIsDestination(destination.to_string()));
            }
            joined.extend_from_slice(&self.load(name)?);
        }
        self.objects.insert(key, Bytes::from(joined));
        Ok(())
    }

    async fn delete(&self, filename: &str) -> StorageResult<()> {
        let key = self.key(filename)?;
        self.objects
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found(filename))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_and_download() {
        let storage = InMemoryStorage::new();
        let mut reader: &[u8] = b"payload";
        assert_eq!(storage.upload("dir/./obj", &mut reader).await.unwrap(), 7);
        assert_eq!(storage.names(), vec!["dir/obj".to_string()]);

        let mut out = Vec::new();
        storage.download("dir/obj", &mut out).await.unwrap();
        assert_eq!(out, b"payload");
        assert_eq!(storage.get("dir/obj").unwrap().as_ref(), b"payload");
    }

    #[tokio::test]
    async fn test_same_name_rules_as_files() {
        let storage = InMemoryStorage::new();
        for name in [".", "..", "", "../x", "/abs"] {
            let mut reader: &[u8] = b"x";
            assert!(storage.upload(name, &mut reader).await.is_err());
        }
        assert!(storage.is_empty());

        let mut reader: &[u8] = b"x";
        storage.upload("a/b", &mut reader).await.unwrap();
        assert!(matches!(
            storage.delete("a").await,
            Err(StorageError::IsDirectory(_))
        ));
    }

    #[tokio::test]
    async fn test_concat_and_delete() {
        let storage = InMemoryStorage::new();
        for (name, data) in [("x", &b"12"[..]), ("y", &b"34"[..])] {
            let mut reader = data;
            storage.upload(name, &mut reader).await.unwrap();
        }

        assert!(matches!(
            storage.concat("xy", &[]).await,
            Err(StorageError::NoSources)
        ));
        storage
            .concat("xy", &["y".to_string(), "x".to_string()])
            .await
            .unwrap();
        assert_eq!(storage.get("xy").unwrap().as_ref(), b"3412");

        storage.delete("x").await.unwrap();
        assert!(matches!(
            storage.delete("x").await,
            Err(StorageError::NotFound(_))
        ));
        assert_eq!(storage.len(), 2);
    }
}
