//! Flush step: copy, populate, verify, swap
//!
//! The queue is drained only after the global lock is held, so batches land
//! in enqueue order. Any failure before the swap puts the whole batch back
//! at the front of the queue and deletes the clone.

use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument, warn};
use txlog_core::TransactionId;

use crate::Shared;
use crate::bucket::{Bucket, CandidateBucket};
use crate::error::{EngineError, EngineResult};
use crate::master::Master;
use crate::queue::PendingEntry;

/// Result of one flush tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The queue was empty
    Idle,
    Flushed(FlushReport),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushReport {
    pub bucket: String,
    pub version: u32,
    /// Records appended by this flush
    pub records: usize,
    /// Verified records in the bucket after the swap
    pub transaction_count: u64,
    /// Bucket that became current if the flushed one was finalized
    pub rotated_to: Option<String>,
}

#[instrument(skip(shared))]
pub(crate) async fn flush(shared: &Shared) -> EngineResult<FlushOutcome> {
    if shared.queue.is_empty() {
        return Ok(FlushOutcome::Idle);
    }

    let mut master = shared.master.lock().await;
    let parent = Arc::clone(master.current_bucket()?);
    let batch = shared.queue.drain();
    if batch.is_empty() {
        return Ok(FlushOutcome::Idle);
    }

    let candidate = match populate(shared, &parent, &batch).await {
        Ok(candidate) => candidate,
        Err(e) => {
            shared.queue.requeue_front(batch);
            shared.report("flush", &e);
            return Err(e);
        }
    };

    let bucket = match candidate.promote(parent.path().to_path_buf()).await {
        Ok(bucket) => Arc::new(bucket),
        Err(e) => {
            shared.queue.requeue_front(batch);
            shared.report("flush", &e);
            return Err(e);
        }
    };

    let meta = bucket.meta();
    let old = master.set_current(Arc::clone(&bucket));
    if let Err(e) = master.persist().await {
        shared.errors.handle("persist master after swap", &e);
    }

    let rotated_to = if meta.size >= shared.config.max_bucket_size {
        match rotate(&mut master, &bucket).await {
            Ok(name) => Some(name),
            Err(e) => {
                shared.errors.handle("rotate bucket", &e);
                None
            }
        }
    } else {
        None
    };
    drop(master);
    drop(old);

    info!(
        bucket = %meta.file_name,
        version = meta.version,
        records = batch.len(),
        transactions = meta.transaction_count,
        "Flushed batch"
    );

    Ok(FlushOutcome::Flushed(FlushReport {
        bucket: meta.file_name,
        version: meta.version,
        records: batch.len(),
        transaction_count: meta.transaction_count,
        rotated_to,
    }))
}

/// Clone the parent, append the batch and verify the result
async fn populate(
    shared: &Shared,
    parent: &Bucket,
    batch: &[PendingEntry],
) -> EngineResult<CandidateBucket> {
    let mut candidate = CandidateBucket::clone_of(parent).await?;
    let parent_count = parent.transaction_count();

    match write_and_verify(shared, &mut candidate, batch, parent_count).await {
        Ok(()) => Ok(candidate),
        Err(e) => {
            let temp = candidate.temp_path().display().to_string();
            if let Err(discard_err) = candidate.discard().await {
                warn!(path = %temp, error = %discard_err, "Failed to discard candidate bucket");
                shared.errors.handle("discard candidate bucket", &discard_err);
            }
            Err(e)
        }
    }
}

async fn write_and_verify(
    shared: &Shared,
    candidate: &mut CandidateBucket,
    batch: &[PendingEntry],
    parent_count: u64,
) -> EngineResult<()> {
    {
        let mut writer = BufWriter::new(candidate.writer());
        for entry in batch {
            let mut tx = shared.pool.acquire();
            tx.set_id(TransactionId::generate());
            tx.set_action(entry.action);
            shared.registry.seal_into(&entry.value, &mut tx)?;
            tx.write_to_async(&mut writer).await?;
        }
        writer.flush().await?;
    }

    let mut scratch = shared.pool.acquire();
    let replay = candidate
        .verify(shared.config.sync_on_flush, &mut scratch)
        .await?;

    let expected = parent_count + batch.len() as u64;
    if replay.count != expected {
        return Err(EngineError::CountMismatch {
            bucket: candidate.meta().file_name.clone(),
            expected,
            actual: replay.count,
        });
    }

    debug!(
        bucket = %candidate.meta().file_name,
        transactions = replay.count,
        size = replay.size,
        "Candidate bucket verified"
    );
    Ok(())
}

/// Finalize `bucket` and make a fresh empty bucket current
async fn rotate(master: &mut Master, bucket: &Bucket) -> EngineResult<String> {
    let finalized = bucket.finalize().await?;
    master.save_bucket(finalized.clone());

    let next = match master.create_bucket().await {
        Ok(next) => next,
        Err(e) => {
            // Keep writing to the old bucket until a new one can be created
            bucket.update_meta(|meta| {
                meta.finalized = false;
                meta.hash = None;
            });
            master.save_bucket(bucket.meta());
            return Err(e);
        }
    };
    let name = next.name();
    master.set_current(next);
    master.persist().await?;

    info!(
        finalized = %finalized.file_name,
        size = finalized.size,
        current = %name,
        "Rotated bucket"
    );
    Ok(name)
}
