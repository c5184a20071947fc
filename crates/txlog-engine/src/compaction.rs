//! Compaction and upload pipeline
//!
//! Each tick runs the stages in order and stops at the first failure:
//!
//! 1. **stage**: copy finalized, unarchived buckets into the upload dir
//! 2. **concat**: optionally join them into one `compacted-<nanos>` artifact
//! 3. **master**: write the `master.json` manifest describing every artifact
//!    uploaded so far plus this tick's
//! 4. **compress**: zstd every artifact to `<name>.zst`
//! 5. **verify**: decompress, check the content hash and replay the records
//! 6. **upload**: hand the compressed artifacts and manifest to storage,
//!    then mark the source buckets archived
//!
//! The upload dir is cleared at the start of every tick, so a failed tick
//! is retried from scratch.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File};
use tracing::{debug, info, instrument, warn};
use txlog_core::Transaction;
use txlog_storage::{FileStorage, FileStorageConfig, Storage};

use crate::Shared;
use crate::bucket::{hash_bytes, hash_file};
use crate::error::{EngineError, EngineResult};
use crate::reader::BucketReader;

/// Name of the manifest uploaded after the artifacts
pub const MANIFEST_NAME: &str = "master.json";

pub const COMPRESSION_ALGO: &str = "zstd";

/// Prefix of concatenated artifacts
pub const COMPACTED_PREFIX: &str = "compacted-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompactionStage {
    Stage,
    Concat,
    Master,
    Compress,
    Verify,
    Upload,
}

impl fmt::Display for CompactionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompactionStage::Stage => "stage",
            CompactionStage::Concat => "concat",
            CompactionStage::Master => "master",
            CompactionStage::Compress => "compress",
            CompactionStage::Verify => "verify",
            CompactionStage::Upload => "upload",
        };
        f.write_str(name)
    }
}

/// A bucket version contained in an artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSource {
    pub file_name: String,
    pub version: u32,
    pub transaction_count: u64,
}

/// One file produced by the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    /// blake3 of the uncompressed contents
    pub hash: String,
    pub transaction_count: u64,
    pub size: u64,
    pub compressed_name: String,
    /// Known once the compress stage has run
    pub compressed_hash: Option<String>,
    pub compression_algo: String,
    pub sources: Vec<ArtifactSource>,
}

impl Artifact {
    fn new(
        name: String,
        hash: String,
        transaction_count: u64,
        size: u64,
        sources: Vec<ArtifactSource>,
    ) -> Self {
        Self {
            compressed_name: format!("{}.zst", name),
            name,
            hash,
            transaction_count,
            size,
            compressed_hash: None,
            compression_algo: COMPRESSION_ALGO.to_string(),
            sources,
        }
    }
}

/// Upload-facing description of every artifact in storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadManifest {
    pub generated_at: DateTime<Utc>,
    pub artifacts: Vec<Artifact>,
}

/// What one compaction tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionReport {
    /// Buckets copied into the upload dir
    pub staged: Vec<String>,
    pub artifacts: Vec<Artifact>,
    /// Names handed to storage, manifest last
    pub uploaded: Vec<String>,
}

impl CompactionReport {
    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }
}

#[instrument(skip(shared))]
pub(crate) async fn compact(shared: &Shared) -> EngineResult<CompactionReport> {
    let upload_dir = shared.config.upload_dir();

    let staged = stage(shared, &upload_dir)
        .await
        .map_err(|e| EngineError::compaction(CompactionStage::Stage, e))?;
    if staged.is_empty() {
        debug!("Nothing to compact");
        return Ok(CompactionReport::default());
    }
    let staged_names = staged.iter().map(|a| a.name.clone()).collect();

    let mut artifacts = concat(shared, &upload_dir, staged)
        .await
        .map_err(|e| EngineError::compaction(CompactionStage::Concat, e))?;

    let previous = shared.master.lock().await.artifacts().to_vec();
    write_manifest(&upload_dir, previous, &artifacts)
        .await
        .map_err(|e| EngineError::compaction(CompactionStage::Master, e))?;

    compress(&upload_dir, &mut artifacts, shared.config.compression_level)
        .await
        .map_err(|e| EngineError::compaction(CompactionStage::Compress, e))?;

    verify(&upload_dir, &artifacts)
        .await
        .map_err(|e| EngineError::compaction(CompactionStage::Verify, e))?;

    let uploaded = upload(shared, &upload_dir, &artifacts)
        .await
        .map_err(|e| EngineError::compaction(CompactionStage::Upload, e))?;

    info!(
        artifacts = artifacts.len(),
        uploaded = uploaded.len(),
        "Compaction finished"
    );
    Ok(CompactionReport {
        staged: staged_names,
        artifacts,
        uploaded,
    })
}

async fn clear_dir(dir: &Path) -> EngineResult<()> {
    fs::create_dir_all(dir).await?;
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            fs::remove_dir_all(entry.path()).await?;
        } else {
            fs::remove_file(entry.path()).await?;
        }
    }
    Ok(())
}

async fn stage(shared: &Shared, upload_dir: &Path) -> EngineResult<Vec<Artifact>> {
    clear_dir(upload_dir).await?;

    let pending = {
        let master = shared.master.lock().await;
        let pending = master.pending_archive();
        for meta in &pending {
            fs::copy(
                shared.config.bucket_path(&meta.file_name),
                upload_dir.join(&meta.file_name),
            )
            .await?;
        }
        pending
    };

    let mut scratch = shared.pool.acquire();
    let mut staged = Vec::with_capacity(pending.len());
    for meta in pending {
        let path = upload_dir.join(&meta.file_name);
        let hash = hash_file(&path).await?;
        if let Some(expected) = &meta.hash {
            if *expected != hash {
                return Err(EngineError::corruption(
                    meta.file_name.clone(),
                    0,
                    format!("content hash {} does not match recorded {}", hash, expected),
                ));
            }
        }
        let replay = BucketReader::open(&path).await?.replay(&mut scratch).await?;
        debug!(bucket = %meta.file_name, transactions = replay.count, "Staged bucket");

        let source = ArtifactSource {
            file_name: meta.file_name.clone(),
            version: meta.version,
            transaction_count: replay.count,
        };
        staged.push(Artifact::new(
            meta.file_name,
            hash,
            replay.count,
            replay.size,
            vec![source],
        ));
    }
    Ok(staged)
}

async fn concat(
    shared: &Shared,
    upload_dir: &Path,
    staged: Vec<Artifact>,
) -> EngineResult<Vec<Artifact>> {
    if !shared.config.concat || staged.len() < 2 {
        return Ok(staged);
    }

    let storage = FileStorage::new(FileStorageConfig::new(upload_dir)).await?;
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let name = format!("{}{}", COMPACTED_PREFIX, nanos);
    let inputs: Vec<String> = staged.iter().map(|a| a.name.clone()).collect();
    storage.concat(&name, &inputs).await?;

    let path = upload_dir.join(&name);
    let mut scratch = Transaction::default();
    let replay = BucketReader::open(&path).await?.replay(&mut scratch).await?;
    let expected: u64 = staged.iter().map(|a| a.transaction_count).sum();
    if replay.count != expected {
        return Err(EngineError::CountMismatch {
            bucket: name,
            expected,
            actual: replay.count,
        });
    }

    let hash = hash_file(&path).await?;
    let sources = staged.into_iter().flat_map(|a| a.sources).collect();
    debug!(artifact = %name, transactions = replay.count, "Concatenated staged buckets");
    Ok(vec![Artifact::new(name, hash, replay.count, replay.size, sources)])
}

async fn write_manifest(
    upload_dir: &Path,
    mut previous: Vec<Artifact>,
    artifacts: &[Artifact],
) -> EngineResult<()> {
    previous.extend_from_slice(artifacts);
    let manifest = UploadManifest {
        generated_at: Utc::now(),
        artifacts: previous,
    };
    let json = serde_json::to_vec_pretty(&manifest)?;
    fs::write(upload_dir.join(MANIFEST_NAME), json).await?;
    Ok(())
}

async fn compress(upload_dir: &Path, artifacts: &mut [Artifact], level: i32) -> EngineResult<()> {
    for artifact in artifacts.iter_mut() {
        let data = fs::read(upload_dir.join(&artifact.name)).await?;
        let compressed =
            tokio::task::spawn_blocking(move || zstd::encode_all(&data[..], level)).await??;
        fs::write(upload_dir.join(&artifact.compressed_name), &compressed).await?;
        artifact.compressed_hash = Some(hash_bytes(&compressed));
        debug!(
            artifact = %artifact.compressed_name,
            size = artifact.size,
            compressed = compressed.len(),
            "Compressed artifact"
        );
    }
    Ok(())
}

async fn verify(upload_dir: &Path, artifacts: &[Artifact]) -> EngineResult<()> {
    let mut scratch = Transaction::default();
    for artifact in artifacts {
        let compressed = fs::read(upload_dir.join(&artifact.compressed_name)).await?;
        let data = tokio::task::spawn_blocking(move || zstd::decode_all(&compressed[..])).await??;

        let hash = hash_bytes(&data);
        if hash != artifact.hash {
            return Err(EngineError::corruption(
                artifact.compressed_name.clone(),
                0,
                format!("decompressed hash {} does not match {}", hash, artifact.hash),
            ));
        }

        let replay = BucketReader::new(artifact.compressed_name.clone(), data.as_slice())
            .replay(&mut scratch)
            .await?;
        if replay.count != artifact.transaction_count {
            return Err(EngineError::CountMismatch {
                bucket: artifact.compressed_name.clone(),
                expected: artifact.transaction_count,
                actual: replay.count,
            });
        }
    }
    Ok(())
}

async fn upload(
    shared: &Shared,
    upload_dir: &Path,
    artifacts: &[Artifact],
) -> EngineResult<Vec<String>> {
    let mut uploaded = Vec::with_capacity(artifacts.len() + 1);
    for artifact in artifacts {
        let mut file = File::open(upload_dir.join(&artifact.compressed_name)).await?;
        shared
            .storage
            .upload(&artifact.compressed_name, &mut file)
            .await?;
        uploaded.push(artifact.compressed_name.clone());
    }
    let mut manifest = File::open(upload_dir.join(MANIFEST_NAME)).await?;
    shared.storage.upload(MANIFEST_NAME, &mut manifest).await?;
    uploaded.push(MANIFEST_NAME.to_string());

    let archived: Vec<String> = {
        let mut master = shared.master.lock().await;
        let mut archived = Vec::new();
        for artifact in artifacts {
            for source in &artifact.sources {
                if let Some(mut meta) = master.bucket(&source.file_name).cloned() {
                    meta.archive = Some(artifact.compressed_name.clone());
                    meta.compressed_hash = artifact.compressed_hash.clone();
                    meta.compression_algo = Some(artifact.compression_algo.clone());
                    master.save_bucket(meta);
                    archived.push(source.file_name.clone());
                }
            }
        }
        master.record_artifacts(artifacts);
        master.persist().await?;
        archived
    };

    if shared.config.destructive_compact {
        for name in &archived {
            let path = shared.config.bucket_path(name);
            if let Err(e) = fs::remove_file(&path).await {
                warn!(bucket = %name, error = %e, "Failed to delete archived bucket");
            }
        }
    }

    Ok(uploaded)
}
