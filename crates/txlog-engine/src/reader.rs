//! Sequential bucket replay
//!
//! A replay decodes one record at a time and watches how far the stream
//! moved. A decode failure that consumed nothing is the clean end of the
//! bucket; a failure after consuming part of a record is corruption.

use std::io;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::fs::File;
use tokio::io::{AsyncRead, BufReader, ReadBuf};
use txlog_core::{Action, CodecError, ProviderRegistry, Transaction, TransactionId, Value, ValueKind};

use crate::error::{EngineError, EngineResult};

/// Outcome of a full replay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Replay {
    pub count: u64,
    /// Bytes consumed, equal to the bucket size on success
    pub size: u64,
}

/// Reader wrapper that tracks the logical stream position
#[derive(Debug)]
struct Positioned<R> {
    inner: R,
    position: u64,
}

impl<R: AsyncRead + Unpin> AsyncRead for Positioned<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let this = &mut *self;
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = poll {
            this.position += (buf.filled().len() - before) as u64;
        }
        poll
    }
}

/// Iterates the records of one bucket from its start
#[derive(Debug)]
pub struct BucketReader<R> {
    stream: Positioned<BufReader<R>>,
    bucket: String,
    count: u64,
}

impl BucketReader<File> {
    /// Open an independent read handle on a bucket file
    pub async fn open(path: &Path) -> EngineResult<Self> {
        let file = File::open(path).await?;
        let bucket = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::new(bucket, file))
    }
}

impl<R: AsyncRead + Unpin> BucketReader<R> {
    /// Wrap a stream positioned at the first record
    pub fn new(bucket: impl Into<String>, reader: R) -> Self {
        Self {
            stream: Positioned {
                inner: BufReader::new(reader),
                position: 0,
            },
            bucket: bucket.into(),
            count: 0,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Bytes consumed so far
    pub fn position(&self) -> u64 {
        self.stream.position
    }

    /// Records decoded so far
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Decode the next record into `tx`; `Ok(false)` at the clean end
    pub async fn next_into(&mut self, tx: &mut Transaction) -> EngineResult<bool> {
        let before = self.stream.position;
        match tx.read_from_async(&mut self.stream).await {
            Ok(()) => {
                self.count += 1;
                Ok(true)
            }
            Err(CodecError::Io(msg)) => Err(EngineError::Io(msg)),
            Err(_) if self.stream.position == before => Ok(false),
            Err(e) => Err(EngineError::corruption(
                self.bucket.clone(),
                before,
                e.to_string(),
            )),
        }
    }

    pub async fn next_transaction(&mut self) -> EngineResult<Option<Transaction>> {
        let mut tx = Transaction::default();
        Ok(self.next_into(&mut tx).await?.then_some(tx))
    }

    /// Replay to the end, reusing `scratch` for every record
    pub async fn replay(mut self, scratch: &mut Transaction) -> EngineResult<Replay> {
        while self.next_into(scratch).await? {}
        Ok(Replay {
            count: self.count,
            size: self.stream.position,
        })
    }

    /// Decode every remaining record
    pub async fn read_all(&mut self) -> EngineResult<Vec<Transaction>> {
        let mut records = Vec::new();
        while let Some(tx) = self.next_transaction().await? {
            records.push(tx);
        }
        Ok(records)
    }

    /// Decode every remaining record and open its payload through `registry`
    pub async fn open_values(
        &mut self,
        registry: &ProviderRegistry,
        hint: Option<&ValueKind>,
    ) -> EngineResult<Vec<(TransactionId, Action, Value)>> {
        let mut values = Vec::new();
        while let Some(tx) = self.next_transaction().await? {
            let value = registry.open(&tx, hint)?;
            values.push((tx.id(), tx.action(), value));
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use txlog_core::{ProviderKey, TransactionId};

    fn record(payload: &[u8]) -> Vec<u8> {
        Transaction::new(TransactionId::generate(), Action::Add)
            .with_keys(
                ProviderKey::new(*b"msgpack\0"),
                ProviderKey::new(*b"none\0\0\0\0"),
            )
            .with_payload(payload)
            .encode()
    }

    fn bucket_bytes(n: usize) -> Vec<u8> {
        (0..n).flat_map(|i| record(&[i as u8; 3])).collect()
    }

    #[tokio::test]
    async fn test_replay_counts_well_formed_records() {
        let bytes = bucket_bytes(4);
        let replay = BucketReader::new("b", bytes.as_slice())
            .replay(&mut Transaction::default())
            .await
            .unwrap();
        assert_eq!(replay.count, 4);
        assert_eq!(replay.size, bytes.len() as u64);
    }

    #[tokio::test]
    async fn test_empty_bucket_is_clean() {
        let replay = BucketReader::new("b", &[][..])
            .replay(&mut Transaction::default())
            .await
            .unwrap();
        assert_eq!(replay, Replay::default());
    }

    #[tokio::test]
    async fn test_truncated_tail_is_corruption() {
        let mut bytes = bucket_bytes(3);
        let good_len = bytes.len() as u64;
        let extra = record(b"partial");
        bytes.extend_from_slice(&extra[..extra.len() - 2]);

        let err = BucketReader::new("bucket-7", bytes.as_slice())
            .replay(&mut Transaction::default())
            .await
            .unwrap_err();
        match err {
            EngineError::Corruption { bucket, offset, .. } => {
                assert_eq!(bucket, "bucket-7");
                assert_eq!(offset, good_len);
            }
            other => panic!("expected corruption, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_partial_length_prefix_is_corruption() {
        let mut bytes = bucket_bytes(1);
        bytes.extend_from_slice(&[5, 0, 0]);
        let result = BucketReader::new("b", bytes.as_slice())
            .replay(&mut Transaction::default())
            .await;
        assert!(matches!(result, Err(EngineError::Corruption { .. })));
    }

    #[tokio::test]
    async fn test_read_all_yields_records_in_order() {
        let bytes = bucket_bytes(3);
        let mut reader = BucketReader::new("b", bytes.as_slice());
        let records = reader.read_all().await.unwrap();
        let payloads: Vec<_> = records.iter().map(|tx| tx.payload().to_vec()).collect();
        assert_eq!(payloads, vec![vec![0; 3], vec![1; 3], vec![2; 3]]);
        assert_eq!(reader.count(), 3);
    }
}
