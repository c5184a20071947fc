//! Master index of buckets
//!
//! Holds every known [`BucketMeta`], the single current bucket and every
//! artifact uploaded so far. The
//! in-memory master lives behind the engine's global lock; it is persisted
//! to `<data_dir>/master` with postcard, written to a temp file and renamed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};
use txlog_core::Transaction;

use crate::bucket::{Bucket, BucketMeta, is_temp_name, temp_path_for};
use crate::compaction::Artifact;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};

/// Prefix of engine-assigned bucket names
pub const BUCKET_PREFIX: &str = "bucket-";

/// Name of the bucket with sequence number `seq`
pub fn bucket_name(seq: u64) -> String {
    format!("{}{:020}", BUCKET_PREFIX, seq)
}

/// On-disk form of the master
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct MasterRecord {
    buckets: Vec<BucketMeta>,
    current: Option<String>,
    next_sequence: u64,
    artifacts: Vec<Artifact>,
}

#[derive(Debug)]
pub struct Master {
    path: PathBuf,
    data_dir: PathBuf,
    buckets: Vec<BucketMeta>,
    current: Option<Arc<Bucket>>,
    next_sequence: u64,
    artifacts: Vec<Artifact>,
}

impl Master {
    /// Load the master from `config.data_dir`, creating a first bucket if
    /// none exists. The current bucket is re-verified before use.
    #[instrument(skip(config), fields(data_dir = %config.data_dir.display()))]
    pub async fn open(config: &EngineConfig) -> EngineResult<Self> {
        fs::create_dir_all(&config.data_dir).await?;
        fs::create_dir_all(config.upload_dir()).await?;
        fs::create_dir_all(config.client_dir()).await?;
        remove_stale_temp_files(&config.data_dir).await?;

        let path = config.master_path();
        let record = match fs::read(&path).await {
            Ok(bytes) => postcard::from_bytes::<MasterRecord>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => MasterRecord::default(),
            Err(e) => return Err(e.into()),
        };

        let mut master = Self {
            path,
            data_dir: config.data_dir.clone(),
            buckets: record.buckets,
            current: None,
            next_sequence: record.next_sequence,
            artifacts: record.artifacts,
        };

        match record.current {
            Some(name) => {
                let meta = master
                    .bucket(&name)
                    .cloned()
                    .unwrap_or_else(|| BucketMeta::new(name.clone()));
                let bucket = Bucket::open(master.data_dir.join(&name), meta).await?;
                let replay = bucket.verify(&mut Transaction::default()).await?;
                info!(
                    bucket = %name,
                    transactions = replay.count,
                    size = replay.size,
                    version = bucket.version(),
                    "Loaded current bucket"
                );
                master.save_bucket(bucket.meta());
                master.current = Some(Arc::new(bucket));
            }
            None => {
                let bucket = master.create_bucket().await?;
                master.current = Some(bucket);
                master.persist().await?;
            }
        }

        Ok(master)
    }

    /// The actively written bucket
    pub fn current_bucket(&self) -> EngineResult<&Arc<Bucket>> {
        self.current.as_ref().ok_or(EngineError::NoCurrentBucket)
    }

    pub fn buckets(&self) -> &[BucketMeta] {
        &self.buckets
    }

    pub fn bucket(&self, file_name: &str) -> Option<&BucketMeta> {
        self.buckets.iter().find(|b| b.file_name == file_name)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Upsert by filename: replace if known, append otherwise
    pub fn save_bucket(&mut self, meta: BucketMeta) {
        match self
            .buckets
            .iter_mut()
            .find(|b| b.file_name == meta.file_name)
        {
            Some(existing) => *existing = meta,
            None => self.buckets.push(meta),
        }
    }

    /// Replace the current bucket, returning the previous one
    pub fn set_current(&mut self, bucket: Arc<Bucket>) -> Option<Arc<Bucket>> {
        self.save_bucket(bucket.meta());
        self.current.replace(bucket)
    }

    /// Create an empty bucket with the next sequence number
    pub async fn create_bucket(&mut self) -> EngineResult<Arc<Bucket>> {
        let name = bucket_name(self.next_sequence);
        self.next_sequence += 1;
        let bucket = Bucket::create(self.data_dir.join(&name), BucketMeta::new(name)).await?;
        self.save_bucket(bucket.meta());
        Ok(Arc::new(bucket))
    }

    /// Finalized buckets whose contents have not been uploaded yet
    pub fn pending_archive(&self) -> Vec<BucketMeta> {
        self.buckets
            .iter()
            .filter(|b| b.finalized && !b.is_archived())
            .cloned()
            .collect()
    }

    /// Artifacts uploaded by earlier compaction ticks, oldest first
    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    /// Upsert uploaded artifacts by compressed name
    pub fn record_artifacts(&mut self, artifacts: &[Artifact]) {
        for artifact in artifacts {
            match self
                .artifacts
                .iter_mut()
                .find(|a| a.compressed_name == artifact.compressed_name)
            {
                Some(existing) => *existing = artifact.clone(),
                None => self.artifacts.push(artifact.clone()),
            }
        }
    }

    /// Write the master file atomically
    pub async fn persist(&self) -> EngineResult<()> {
        let record = MasterRecord {
            buckets: self.buckets.clone(),
            current: self.current.as_ref().map(|b| b.name()),
            next_sequence: self.next_sequence,
            artifacts: self.artifacts.clone(),
        };
        let bytes = postcard::to_allocvec(&record)?;

        let temp = temp_path_for(&self.path);
        let mut file = File::create(&temp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp, &self.path).await?;

        debug!(buckets = record.buckets.len(), "Persisted master");
        Ok(())
    }
}

async fn remove_stale_temp_files(data_dir: &Path) -> EngineResult<()> {
    let mut entries = fs::read_dir(data_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if is_temp_name(&name) && entry.file_type().await?.is_file() {
            warn!(file = %name, "Removing stale temp file from interrupted write");
            fs::remove_file(entry.path()).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_bucket_name_sorts_by_sequence() {
        assert_eq!(bucket_name(7), "bucket-00000000000000000007");
        assert!(bucket_name(9) < bucket_name(10));
    }

    #[tokio::test]
    async fn test_open_creates_layout_and_first_bucket() {
        let temp = TempDir::new().unwrap();
        let config = EngineConfig::with_data_dir(temp.path().join("data"));
        let master = Master::open(&config).await.unwrap();

        assert!(config.upload_dir().is_dir());
        assert!(config.client_dir().is_dir());
        assert!(config.master_path().is_file());

        let current = master.current_bucket().unwrap();
        assert_eq!(current.name(), bucket_name(0));
        assert_eq!(current.transaction_count(), 0);
        assert_eq!(master.buckets().len(), 1);
    }

    #[tokio::test]
    async fn test_save_bucket_upserts() {
        let temp = TempDir::new().unwrap();
        let config = EngineConfig::with_data_dir(temp.path());
        let mut master = Master::open(&config).await.unwrap();

        let mut meta = BucketMeta::new("extra");
        master.save_bucket(meta.clone());
        meta.version = 4;
        master.save_bucket(meta);

        assert_eq!(master.buckets().len(), 2);
        assert_eq!(master.bucket("extra").unwrap().version, 4);
    }

    #[tokio::test]
    async fn test_reopen_restores_master() {
        let temp = TempDir::new().unwrap();
        let config = EngineConfig::with_data_dir(temp.path());
        {
            let mut master = Master::open(&config).await.unwrap();
            let next = master.create_bucket().await.unwrap();
            master.set_current(next);
            master.persist().await.unwrap();
        }

        let master = Master::open(&config).await.unwrap();
        assert_eq!(master.current_bucket().unwrap().name(), bucket_name(1));
        assert_eq!(master.buckets().len(), 2);
    }

    #[tokio::test]
    async fn test_recorded_artifacts_survive_reopen() {
        let temp = TempDir::new().unwrap();
        let config = EngineConfig::with_data_dir(temp.path());
        let artifact = Artifact {
            name: bucket_name(0),
            hash: "abc".into(),
            transaction_count: 3,
            size: 90,
            compressed_name: format!("{}.zst", bucket_name(0)),
            compressed_hash: Some("def".into()),
            compression_algo: "zstd".into(),
            sources: Vec::new(),
        };
        {
            let mut master = Master::open(&config).await.unwrap();
            master.record_artifacts(std::slice::from_ref(&artifact));
            master.record_artifacts(std::slice::from_ref(&artifact));
            master.persist().await.unwrap();
        }

        let master = Master::open(&config).await.unwrap();
        assert_eq!(master.artifacts(), std::slice::from_ref(&artifact));
    }

    #[tokio::test]
    async fn test_open_removes_stale_temp_files() {
        let temp = TempDir::new().unwrap();
        let config = EngineConfig::with_data_dir(temp.path());
        Master::open(&config).await.unwrap();

        let stale = temp.path().join(format!("{}.temp.123", bucket_name(0)));
        fs::write(&stale, b"half written").await.unwrap();
        Master::open(&config).await.unwrap();
        assert!(!stale.exists());
    }

    #[tokio::test]
    async fn test_open_rejects_corrupt_current_bucket() {
        let temp = TempDir::new().unwrap();
        let config = EngineConfig::with_data_dir(temp.path());
        Master::open(&config).await.unwrap();

        fs::write(temp.path().join(bucket_name(0)), [9u8, 0, 0, 0, 0, 0, 0, 0, 1])
            .await
            .unwrap();
        assert!(matches!(
            Master::open(&config).await,
            Err(EngineError::Corruption { .. })
        ));
    }
}
