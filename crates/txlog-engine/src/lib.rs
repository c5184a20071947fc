//! # txlog engine
//!
//! An embeddable, append-only transaction log.
//!
//! Writes are enqueued in memory and flushed in batches. Every flush clones
//! the current bucket, appends the batch to the clone, replays the clone to
//! verify its framing and count, and only then swaps it in. A failed flush
//! leaves the current bucket untouched and puts the batch back at the
//! front of the queue.
//!
//! Full buckets are finalized and handed to the compaction pipeline, which
//! stages, optionally concatenates, compresses, verifies and uploads them
//! through a [`Storage`] backend.
//!
//! ## Example
//!
//! ```rust,ignore
//! use txlog_engine::{Engine, EngineConfig};
//!
//! let engine = Engine::builder(EngineConfig::with_data_dir("./log"))
//!     .open()
//!     .await?;
//! engine.start().await?;
//!
//! engine.add("hello");
//! engine.remove("hello");
//!
//! engine.stop().await?;
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tokio::fs::File;
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use txlog_core::{Action, ProviderRegistry, Transaction, TransactionPool, Value};
use txlog_storage::{FileStorage, FileStorageConfig, Storage};

pub mod bucket;
pub mod compaction;
pub mod config;
pub mod error;
pub mod expiry;
pub mod flush;
pub mod handler;
pub mod master;
pub mod queue;
pub mod reader;
mod tasks;

pub use bucket::{Bucket, BucketMeta, CandidateBucket};
pub use compaction::{
    Artifact, ArtifactSource, COMPACTED_PREFIX, COMPRESSION_ALGO, CompactionReport,
    CompactionStage, MANIFEST_NAME, UploadManifest,
};
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use expiry::{ExpiryPolicy, NoExpiry, TtlExpiry};
pub use flush::{FlushOutcome, FlushReport};
pub use handler::{ErrorHandler, TracingErrorHandler};
pub use master::{Master, bucket_name};
pub use queue::{PendingEntry, WriteQueue};
pub use reader::{BucketReader, Replay};

/// Directory under the data dir used when no storage backend is given
pub const DEFAULT_ARCHIVE_DIR_NAME: &str = "archive";

/// State shared between the engine handle and its background loops
pub(crate) struct Shared {
    pub(crate) config: EngineConfig,
    pub(crate) registry: Arc<ProviderRegistry>,
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) expiry: Arc<dyn ExpiryPolicy>,
    pub(crate) errors: Arc<dyn ErrorHandler>,
    pub(crate) queue: WriteQueue,
    pub(crate) pool: Arc<TransactionPool>,
    /// Global lock over the current bucket pointer and bucket metadata
    pub(crate) master: Mutex<Master>,
}

impl Shared {
    /// Hand `error` to the error handler
    pub(crate) fn report(&self, context: &'static str, error: &EngineError) {
        if error.is_invariant_violation() {
            self.errors.invariant_violation(context, error);
        } else {
            self.errors.handle(context, error);
        }
    }

    /// Run the expiry policy over every record still on local disk and
    /// enqueue the negations it asks for. Archived buckets count while
    /// their local file exists.
    pub(crate) async fn negate_expired(&self) -> EngineResult<usize> {
        let mut readers = Vec::new();
        {
            let master = self.master.lock().await;
            let current = master.current_bucket()?;
            let current_name = current.name();
            for meta in master.buckets() {
                let reader = if meta.file_name == current_name {
                    current.reader().await?
                } else {
                    let path = self.config.bucket_path(&meta.file_name);
                    if meta.is_archived() && !tokio::fs::try_exists(&path).await? {
                        continue;
                    }
                    BucketReader::open(&path).await?
                };
                readers.push(reader);
            }
        }

        // Open handles keep reading the version they were opened on
        let mut records: Vec<Transaction> = Vec::new();
        for mut reader in readers {
            records.extend(reader.read_all().await?);
        }

        let negations = self
            .expiry
            .expired(&records, &self.registry, Utc::now())
            .await?;
        let count = negations.len();
        for (action, value) in negations {
            self.queue.push(PendingEntry::new(action, value));
        }

        if count > 0 {
            info!(negated = count, records = records.len(), "Enqueued expiry negations");
        }
        Ok(count)
    }

    pub(crate) async fn compact(&self) -> EngineResult<CompactionReport> {
        let result = compaction::compact(self).await;
        if let Err(e) = &result {
            self.report("compaction", e);
        }
        result
    }
}

/// Configures optional collaborators before opening an [`Engine`]
pub struct EngineBuilder {
    config: EngineConfig,
    registry: Option<Arc<ProviderRegistry>>,
    storage: Option<Arc<dyn Storage>>,
    expiry: Option<Arc<dyn ExpiryPolicy>>,
    errors: Option<Arc<dyn ErrorHandler>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            registry: None,
            storage: None,
            expiry: None,
            errors: None,
        }
    }

    /// Providers used to seal new records and open existing ones.
    /// Defaults to [`txlog_providers::default_registry`].
    pub fn registry(mut self, registry: Arc<ProviderRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Upload target of the compaction pipeline. Defaults to a
    /// [`FileStorage`] in `<data_dir>/archive`.
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn expiry(mut self, expiry: Arc<dyn ExpiryPolicy>) -> Self {
        self.expiry = Some(expiry);
        self
    }

    pub fn error_handler(mut self, errors: Arc<dyn ErrorHandler>) -> Self {
        self.errors = Some(errors);
        self
    }

    /// Validate the configuration and load or create the on-disk state
    #[instrument(skip(self), fields(data_dir = %self.config.data_dir.display()))]
    pub async fn open(self) -> EngineResult<Engine> {
        self.config.validate()?;

        let registry = match self.registry {
            Some(registry) => registry,
            None => Arc::new(txlog_providers::default_registry()?),
        };

        let master = Master::open(&self.config).await?;

        let storage: Arc<dyn Storage> = match self.storage {
            Some(storage) => storage,
            None => {
                let root = self.config.data_dir.join(DEFAULT_ARCHIVE_DIR_NAME);
                tokio::fs::create_dir_all(&root).await?;
                Arc::new(FileStorage::new(FileStorageConfig::new(root)).await?)
            }
        };

        if let Some(root) = storage.local_root() {
            for dir in [self.config.upload_dir(), self.config.client_dir()] {
                if tokio::fs::canonicalize(&dir).await?.as_path() == root {
                    return Err(EngineError::Config(format!(
                        "storage root {} is an engine-managed directory",
                        root.display()
                    )));
                }
            }
        }

        let shared = Shared {
            pool: TransactionPool::new(self.config.pool_capacity),
            registry,
            storage,
            expiry: self.expiry.unwrap_or_else(|| Arc::new(NoExpiry)),
            errors: self.errors.unwrap_or_else(|| Arc::new(TracingErrorHandler)),
            queue: WriteQueue::new(),
            master: Mutex::new(master),
            config: self.config,
        };

        let (shutdown_tx, _) = broadcast::channel(1);
        info!("Engine opened");
        Ok(Engine {
            shared: Arc::new(shared),
            shutdown_tx,
            background_tasks: RwLock::new(Vec::new()),
            started: AtomicBool::new(false),
        })
    }
}

/// Remove snapshots of `bucket` other than `keep`
async fn prune_snapshots(client_dir: &Path, bucket: &str, keep: u32) -> EngineResult<()> {
    let prefix = format!("{}.v", bucket);
    let mut entries = tokio::fs::read_dir(client_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(version) = name
            .to_str()
            .and_then(|n| n.strip_prefix(&prefix))
            .and_then(|v| v.parse::<u32>().ok())
        else {
            continue;
        };
        if version != keep {
            tokio::fs::remove_file(entry.path()).await?;
            debug!(bucket, version, "Pruned client snapshot");
        }
    }
    Ok(())
}

/// Handle to an open transaction log
pub struct Engine {
    shared: Arc<Shared>,
    shutdown_tx: broadcast::Sender<()>,
    background_tasks: RwLock<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Open with explicit providers and storage, default expiry and error
    /// handling
    pub async fn new(
        config: EngineConfig,
        registry: Arc<ProviderRegistry>,
        storage: Arc<dyn Storage>,
    ) -> EngineResult<Self> {
        EngineBuilder::new(config)
            .registry(registry)
            .storage(storage)
            .open()
            .await
    }

    /// Open with every default
    pub async fn open(config: EngineConfig) -> EngineResult<Self> {
        EngineBuilder::new(config).open().await
    }

    /// Start the flush, expiry and compaction loops
    #[instrument(skip(self))]
    pub async fn start(&self) -> EngineResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(EngineError::AlreadyStarted);
        }

        let flush_task = tasks::spawn_flush(Arc::clone(&self.shared), self.shutdown_tx.subscribe());
        let expiry_task = tasks::spawn_expiry(Arc::clone(&self.shared), self.shutdown_tx.subscribe());
        let compaction_task =
            tasks::spawn_compaction(Arc::clone(&self.shared), self.shutdown_tx.subscribe());

        {
            let mut tasks = self.background_tasks.write().await;
            tasks.push(flush_task);
            tasks.push(expiry_task);
            tasks.push(compaction_task);
        }

        info!("Engine started");
        Ok(())
    }

    /// Stop the background loops and flush whatever is still queued
    #[instrument(skip(self))]
    pub async fn stop(&self) -> EngineResult<()> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Ok(()); // Already stopped
        }

        // Signal shutdown
        let _ = self.shutdown_tx.send(());

        let mut tasks = self.background_tasks.write().await;
        for task in tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        drop(tasks);

        flush::flush(&self.shared).await?;
        info!("Engine stopped");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Queue a record for the next flush
    pub fn enqueue(&self, action: Action, value: impl Into<Value>) {
        self.shared.queue.push(PendingEntry::new(action, value));
    }

    pub fn add(&self, value: impl Into<Value>) {
        self.enqueue(Action::Add, value);
    }

    pub fn remove(&self, value: impl Into<Value>) {
        self.enqueue(Action::Remove, value);
    }

    /// Queue a record that cancels everything before it
    pub fn clear(&self) {
        self.enqueue(Action::Clear, Value::Bytes(Vec::new()));
    }

    /// Number of queued records not yet flushed
    pub fn pending(&self) -> usize {
        self.shared.queue.len()
    }

    /// Copy of the queued records, oldest first
    pub fn pending_entries(&self) -> Vec<PendingEntry> {
        self.shared.queue.snapshot()
    }

    /// Flush the queue once
    pub async fn flush(&self) -> EngineResult<FlushOutcome> {
        flush::flush(&self.shared).await
    }

    /// Run the expiry policy once, returning how many negations were queued
    pub async fn negate_expired(&self) -> EngineResult<usize> {
        let result = self.shared.negate_expired().await;
        if let Err(e) = &result {
            self.shared.report("negate expired", e);
        }
        result
    }

    /// Run the compaction pipeline once
    pub async fn compact(&self) -> EngineResult<CompactionReport> {
        self.shared.compact().await
    }

    /// Copy the current bucket to `<client_dir>/<bucket>.v<version>`
    pub async fn client_snapshot(&self) -> EngineResult<PathBuf> {
        let master = self.shared.master.lock().await;
        let current = master.current_bucket()?;
        let meta = current.meta();
        let path = self
            .shared
            .config
            .client_dir()
            .join(format!("{}.v{}", meta.file_name, meta.version));

        let mut file = File::create(&path).await?;
        let copied = current.copy_to(&mut file).await?;
        file.sync_all().await?;
        debug!(path = %path.display(), bytes = copied, "Wrote client snapshot");

        prune_snapshots(&self.shared.config.client_dir(), &meta.file_name, meta.version).await?;
        Ok(path)
    }

    /// Metadata of the current bucket
    pub async fn current_bucket(&self) -> EngineResult<BucketMeta> {
        let master = self.shared.master.lock().await;
        Ok(master.current_bucket()?.meta())
    }

    pub async fn buckets(&self) -> Vec<BucketMeta> {
        self.shared.master.lock().await.buckets().to_vec()
    }

    /// Every record of the current bucket, in log order
    pub async fn read_current(&self) -> EngineResult<Vec<Transaction>> {
        let mut reader = {
            let master = self.shared.master.lock().await;
            master.current_bucket()?.reader().await?
        };
        reader.read_all().await
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.shared.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.started.load(Ordering::SeqCst) {
            let _ = self.shutdown_tx.send(());
        }
    }
}
