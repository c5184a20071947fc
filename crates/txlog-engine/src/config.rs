//! Configuration for the log engine

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::DEFAULT_ARCHIVE_DIR_NAME;
use crate::error::{EngineError, EngineResult};
use crate::master::BUCKET_PREFIX;

/// Default size at which the current bucket is finalized and rotated
pub const DEFAULT_MAX_BUCKET_SIZE: u64 = 64 * 1024 * 1024;

/// Name of the persisted master index inside the data directory
pub const MASTER_FILE_NAME: &str = "master";

/// Configuration for an [`Engine`](crate::Engine)
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding buckets and the master file
    pub data_dir: PathBuf,
    /// Staging directory for compaction, relative to `data_dir`
    pub upload_dir_name: String,
    /// Directory for client-facing bucket copies, relative to `data_dir`
    pub client_dir_name: String,
    pub flush_interval: Duration,
    pub expiry_interval: Duration,
    pub compaction_interval: Duration,
    /// Size in bytes at which the current bucket is finalized
    pub max_bucket_size: u64,
    /// Idle records kept by the transaction pool
    pub pool_capacity: usize,
    /// Concatenate staged buckets into one artifact before compressing
    pub concat: bool,
    /// Delete local bucket files once they are uploaded
    pub destructive_compact: bool,
    /// zstd level for compacted artifacts
    pub compression_level: i32,
    /// fsync each candidate bucket before verifying it
    pub sync_on_flush: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::with_data_dir("./txlog-data")
    }
}

impl EngineConfig {
    /// Create a configuration with a custom data directory
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            upload_dir_name: "upload".to_string(),
            client_dir_name: "client_buckets".to_string(),
            flush_interval: Duration::from_secs(1),
            expiry_interval: Duration::from_secs(1),
            compaction_interval: Duration::from_secs(60),
            max_bucket_size: DEFAULT_MAX_BUCKET_SIZE,
            pool_capacity: 1024,
            concat: false,
            destructive_compact: false,
            compression_level: 3,
            sync_on_flush: true,
        }
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_expiry_interval(mut self, interval: Duration) -> Self {
        self.expiry_interval = interval;
        self
    }

    pub fn with_compaction_interval(mut self, interval: Duration) -> Self {
        self.compaction_interval = interval;
        self
    }

    pub fn with_max_bucket_size(mut self, size: u64) -> Self {
        self.max_bucket_size = size;
        self
    }

    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    pub fn with_concat(mut self, concat: bool) -> Self {
        self.concat = concat;
        self
    }

    pub fn with_destructive_compact(mut self, destructive: bool) -> Self {
        self.destructive_compact = destructive;
        self
    }

    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    pub fn with_sync_on_flush(mut self, sync: bool) -> Self {
        self.sync_on_flush = sync;
        self
    }

    pub fn with_upload_dir_name(mut self, name: impl Into<String>) -> Self {
        self.upload_dir_name = name.into();
        self
    }

    pub fn with_client_dir_name(mut self, name: impl Into<String>) -> Self {
        self.client_dir_name = name.into();
        self
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.data_dir.join(&self.upload_dir_name)
    }

    pub fn client_dir(&self) -> PathBuf {
        self.data_dir.join(&self.client_dir_name)
    }

    pub fn master_path(&self) -> PathBuf {
        self.data_dir.join(MASTER_FILE_NAME)
    }

    /// Path of a bucket file inside the data directory
    pub fn bucket_path(&self, file_name: &str) -> PathBuf {
        self.data_dir.join(file_name)
    }

    pub fn validate(&self) -> EngineResult<()> {
        for (name, interval) in [
            ("flush_interval", self.flush_interval),
            ("expiry_interval", self.expiry_interval),
            ("compaction_interval", self.compaction_interval),
        ] {
            if interval.is_zero() {
                return Err(EngineError::Config(format!("{} must be non-zero", name)));
            }
        }

        for (name, dir) in [
            ("upload_dir_name", &self.upload_dir_name),
            ("client_dir_name", &self.client_dir_name),
        ] {
            if !is_plain_dir_name(dir) || dir == MASTER_FILE_NAME {
                return Err(EngineError::Config(format!(
                    "{} must be a single directory name, got {:?}",
                    name, dir
                )));
            }
            // Either would share a directory with buckets or archived artifacts
            if dir == DEFAULT_ARCHIVE_DIR_NAME || dir.starts_with(BUCKET_PREFIX) {
                return Err(EngineError::Config(format!(
                    "{} {:?} collides with an engine-managed name",
                    name, dir
                )));
            }
        }
        if self.upload_dir_name == self.client_dir_name {
            return Err(EngineError::Config(
                "upload and client directories must differ".to_string(),
            ));
        }

        if !zstd::compression_level_range().contains(&self.compression_level) {
            return Err(EngineError::Config(format!(
                "compression level {} outside {:?}",
                self.compression_level,
                zstd::compression_level_range()
            )));
        }
        Ok(())
    }
}

fn is_plain_dir_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(std::path::Component::Normal(_)), None)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::with_data_dir("/tmp/txlog");
        assert_eq!(config.flush_interval, Duration::from_secs(1));
        assert_eq!(config.compaction_interval, Duration::from_secs(60));
        assert_eq!(config.upload_dir(), PathBuf::from("/tmp/txlog/upload"));
        assert_eq!(
            config.client_dir(),
            PathBuf::from("/tmp/txlog/client_buckets")
        );
        assert_eq!(config.master_path(), PathBuf::from("/tmp/txlog/master"));
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let base = EngineConfig::with_data_dir("/tmp/txlog");
        assert!(
            base.clone()
                .with_flush_interval(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(
            base.clone()
                .with_upload_dir_name("../up")
                .validate()
                .is_err()
        );
        assert!(
            base.clone()
                .with_client_dir_name("upload")
                .validate()
                .is_err()
        );
        assert!(base.with_compression_level(1000).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_engine_managed_names() {
        let base = EngineConfig::with_data_dir("/tmp/txlog");
        for dir in [DEFAULT_ARCHIVE_DIR_NAME, "bucket-uploads"] {
            assert!(
                matches!(
                    base.clone().with_upload_dir_name(dir).validate(),
                    Err(EngineError::Config(_))
                ),
                "upload dir {dir:?} accepted"
            );
            assert!(
                matches!(
                    base.clone().with_client_dir_name(dir).validate(),
                    Err(EngineError::Config(_))
                ),
                "client dir {dir:?} accepted"
            );
        }
        base.with_upload_dir_name("staging").validate().unwrap();
    }
}
