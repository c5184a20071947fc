//! Buckets: one log segment file plus its metadata
//!
//! The current bucket is never written in place. A flush clones it into a
//! [`CandidateBucket`], appends to the clone, verifies it and renames it
//! over the parent's file.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};
use txlog_core::Transaction;

use crate::error::EngineResult;
use crate::reader::{BucketReader, Replay};

/// Infix of in-flight clone names: `<bucket>.temp.<nanos>`
pub const TEMP_INFIX: &str = ".temp.";

/// Persisted description of a bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketMeta {
    pub file_name: String,
    /// blake3 of the contents, set when the bucket is finalized
    pub hash: Option<String>,
    /// blake3 of the compressed artifact this bucket was uploaded in
    pub compressed_hash: Option<String>,
    pub compression_algo: Option<String>,
    pub mod_time: DateTime<Utc>,
    /// Bumped on every clone-and-replace
    pub version: u32,
    /// Recomputed by verification, never read from disk
    #[serde(skip)]
    pub transaction_count: u64,
    pub size: u64,
    /// No further records will be written to a finalized bucket
    pub finalized: bool,
    /// Name of the uploaded artifact holding this bucket
    pub archive: Option<String>,
}

impl BucketMeta {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            hash: None,
            compressed_hash: None,
            compression_algo: None,
            mod_time: Utc::now(),
            version: 0,
            transaction_count: 0,
            size: 0,
            finalized: false,
            archive: None,
        }
    }

    pub fn is_archived(&self) -> bool {
        self.archive.is_some()
    }
}

/// An open bucket file guarded by a reader/writer lock
#[derive(Debug)]
pub struct Bucket {
    path: PathBuf,
    file: RwLock<File>,
    meta: Mutex<BucketMeta>,
}

impl Bucket {
    /// Create a new empty bucket file; fails if it already exists
    pub async fn create(path: PathBuf, meta: BucketMeta) -> EngineResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        file.sync_all().await?;
        debug!(bucket = %meta.file_name, "Created bucket");
        Ok(Self::from_file(path, file, meta))
    }

    pub async fn open(path: PathBuf, meta: BucketMeta) -> EngineResult<Self> {
        let file = File::open(&path).await?;
        Ok(Self::from_file(path, file, meta))
    }

    fn from_file(path: PathBuf, file: File, meta: BucketMeta) -> Self {
        Self {
            path,
            file: RwLock::new(file),
            meta: Mutex::new(meta),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> String {
        self.meta.lock().file_name.clone()
    }

    pub fn meta(&self) -> BucketMeta {
        self.meta.lock().clone()
    }

    pub fn update_meta(&self, update: impl FnOnce(&mut BucketMeta)) {
        update(&mut self.meta.lock());
    }

    pub fn transaction_count(&self) -> u64 {
        self.meta.lock().transaction_count
    }

    pub fn version(&self) -> u32 {
        self.meta.lock().version
    }

    /// Exclusive access to the underlying stream; released on drop
    pub async fn lock(&self) -> RwLockWriteGuard<'_, File> {
        self.file.write().await
    }

    pub async fn read_lock(&self) -> RwLockReadGuard<'_, File> {
        self.file.read().await
    }

    /// Copy the whole bucket into `writer` while holding the exclusive lock
    pub async fn copy_to<W>(&self, writer: &mut W) -> EngineResult<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut file = self.lock().await;
        file.seek(SeekFrom::Start(0)).await?;
        let copied = tokio::io::copy(&mut *file, writer).await?;
        Ok(copied)
    }

    /// Replay the bucket and store the authoritative count and size
    pub async fn verify(&self, scratch: &mut Transaction) -> EngineResult<Replay> {
        let name = self.name();
        let replay = {
            let mut file = self.lock().await;
            file.seek(SeekFrom::Start(0)).await?;
            let replay = BucketReader::new(name, &mut *file).replay(scratch).await?;
            file.seek(SeekFrom::End(0)).await?;
            replay
        };
        self.update_meta(|meta| {
            meta.transaction_count = replay.count;
            meta.size = replay.size;
        });
        Ok(replay)
    }

    /// Open an independent reader positioned at the first record
    pub async fn reader(&self) -> EngineResult<BucketReader<File>> {
        let _guard = self.read_lock().await;
        BucketReader::open(&self.path).await
    }

    /// Hash the contents and mark the bucket finalized
    pub async fn finalize(&self) -> EngineResult<BucketMeta> {
        let hash = {
            let mut file = self.lock().await;
            file.seek(SeekFrom::Start(0)).await?;
            hash_stream(&mut *file).await?
        };
        self.update_meta(|meta| {
            meta.hash = Some(hash);
            meta.finalized = true;
            meta.mod_time = Utc::now();
        });
        Ok(self.meta())
    }
}

/// A clone of the current bucket being populated by a flush
#[derive(Debug)]
pub struct CandidateBucket {
    temp_path: PathBuf,
    file: File,
    meta: BucketMeta,
}

impl CandidateBucket {
    /// Clone `parent` into `<parent>.temp.<nanos>` with the next version
    pub async fn clone_of(parent: &Bucket) -> EngineResult<Self> {
        let mut meta = parent.meta();
        meta.version = meta.version.wrapping_add(1);

        let temp_path = temp_path_for(parent.path());
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .await?;

        match parent.copy_to(&mut file).await {
            Ok(copied) => meta.size = copied,
            Err(e) => {
                drop(file);
                remove_quietly(&temp_path).await;
                return Err(e);
            }
        }

        Ok(Self {
            temp_path,
            file,
            meta,
        })
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub fn meta(&self) -> &BucketMeta {
        &self.meta
    }

    /// Stream positioned for appending records
    pub fn writer(&mut self) -> &mut File {
        &mut self.file
    }

    /// Flush buffered writes, optionally fsync, then replay from the start
    pub async fn verify(&mut self, sync: bool, scratch: &mut Transaction) -> EngineResult<Replay> {
        self.file.flush().await?;
        if sync {
            self.file.sync_data().await?;
        }
        self.file.seek(SeekFrom::Start(0)).await?;
        let replay = BucketReader::new(self.meta.file_name.clone(), &mut self.file)
            .replay(scratch)
            .await?;
        self.file.seek(SeekFrom::End(0)).await?;
        self.meta.transaction_count = replay.count;
        self.meta.size = replay.size;
        Ok(replay)
    }

    /// Rename the clone over `path` and turn it into a live bucket
    pub async fn promote(self, path: PathBuf) -> EngineResult<Bucket> {
        let Self {
            temp_path,
            file,
            mut meta,
        } = self;
        if let Err(e) = fs::rename(&temp_path, &path).await {
            drop(file);
            remove_quietly(&temp_path).await;
            return Err(e.into());
        }
        meta.mod_time = Utc::now();
        Ok(Bucket::from_file(path, file, meta))
    }

    /// Delete the clone
    pub async fn discard(self) -> EngineResult<()> {
        let Self { temp_path, file, .. } = self;
        drop(file);
        fs::remove_file(&temp_path).await?;
        Ok(())
    }
}

/// `<path>.temp.<nanos>`
pub fn temp_path_for(path: &Path) -> PathBuf {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let mut name = path.as_os_str().to_owned();
    name.push(format!("{}{}", TEMP_INFIX, nanos));
    PathBuf::from(name)
}

pub fn is_temp_name(name: &str) -> bool {
    name.contains(TEMP_INFIX)
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        warn!(path = %path.display(), error = %e, "Failed to remove temp bucket");
    }
}

/// Hex blake3 of everything `reader` yields
pub async fn hash_stream<R>(reader: &mut R) -> EngineResult<String>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize().as_bytes()))
}

pub async fn hash_file(path: &Path) -> EngineResult<String> {
    let mut file = File::open(path).await?;
    hash_stream(&mut file).await
}

pub fn hash_bytes(data: &[u8]) -> String {
    hex::encode(blake3::hash(data).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use txlog_core::{Action, ProviderKey, TransactionId};

    fn record(payload: &[u8]) -> Vec<u8> {
        Transaction::new(TransactionId::generate(), Action::Add)
            .with_keys(ProviderKey::default(), ProviderKey::default())
            .with_payload(payload)
            .encode()
    }

    #[tokio::test]
    async fn test_clone_verify_promote() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bucket-1");
        let parent = Bucket::create(path.clone(), BucketMeta::new("bucket-1"))
            .await
            .unwrap();

        let mut candidate = CandidateBucket::clone_of(&parent).await.unwrap();
        assert!(
            candidate
                .temp_path()
                .to_string_lossy()
                .contains("bucket-1.temp.")
        );
        assert_eq!(candidate.meta().version, 1);

        candidate.writer().write_all(&record(b"a")).await.unwrap();
        candidate.writer().write_all(&record(b"b")).await.unwrap();
        let replay = candidate
            .verify(false, &mut Transaction::default())
            .await
            .unwrap();
        assert_eq!(replay.count, 2);

        let temp_path = candidate.temp_path().to_path_buf();
        let promoted = candidate.promote(path.clone()).await.unwrap();
        assert!(!temp_path.exists());
        assert_eq!(promoted.transaction_count(), 2);
        assert_eq!(promoted.version(), 1);

        let again = promoted.verify(&mut Transaction::default()).await.unwrap();
        assert_eq!(again.count, 2);
    }

    #[tokio::test]
    async fn test_clone_copies_parent_contents() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bucket-1");
        fs::write(&path, [record(b"x"), record(b"y")].concat())
            .await
            .unwrap();
        let parent = Bucket::open(path, BucketMeta::new("bucket-1")).await.unwrap();
        parent.verify(&mut Transaction::default()).await.unwrap();

        let mut candidate = CandidateBucket::clone_of(&parent).await.unwrap();
        candidate.writer().write_all(&record(b"z")).await.unwrap();
        let replay = candidate
            .verify(false, &mut Transaction::default())
            .await
            .unwrap();
        assert_eq!(replay.count, 3);

        let temp_path = candidate.temp_path().to_path_buf();
        candidate.discard().await.unwrap();
        assert!(!temp_path.exists());
        assert_eq!(parent.transaction_count(), 2);
    }

    #[tokio::test]
    async fn test_finalize_hashes_contents() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bucket-1");
        let data = record(b"final");
        fs::write(&path, &data).await.unwrap();

        let bucket = Bucket::open(path, BucketMeta::new("bucket-1")).await.unwrap();
        let meta = bucket.finalize().await.unwrap();
        assert!(meta.finalized);
        assert_eq!(meta.hash, Some(hash_bytes(&data)));
    }

    #[test]
    fn test_temp_names() {
        let path = temp_path_for(Path::new("/data/bucket-00000000000000000001"));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(is_temp_name(&name));
        assert!(name.starts_with("bucket-00000000000000000001.temp."));
        assert!(!is_temp_name("bucket-00000000000000000001"));
    }
}
