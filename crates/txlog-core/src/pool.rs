//! Bounded pool of reusable transaction records
//!
//! The ingest and verification paths decode or build one record at a time;
//! pooling keeps their payload buffers alive between records.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::transaction::Transaction;

/// Free list of idle records, capped at `capacity`
#[derive(Debug)]
pub struct TransactionPool {
    idle: Mutex<Vec<Transaction>>,
    capacity: usize,
}

impl TransactionPool {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            idle: Mutex::new(Vec::with_capacity(capacity.min(64))),
            capacity,
        })
    }

    /// Take a record from the pool; it is reset before being handed out
    pub fn acquire(self: &Arc<Self>) -> PooledTransaction {
        let mut tx = self.idle.lock().pop().unwrap_or_default();
        tx.reset();
        PooledTransaction {
            inner: Some(tx),
            pool: Arc::clone(self),
        }
    }

    /// Number of idle records currently held
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn release(&self, tx: Transaction) {
        let mut idle = self.idle.lock();
        if idle.len() < self.capacity {
            idle.push(tx);
        }
    }
}

/// A record on loan from a [`TransactionPool`], returned on drop
#[derive(Debug)]
pub struct PooledTransaction {
    inner: Option<Transaction>,
    pool: Arc<TransactionPool>,
}

impl PooledTransaction {
    /// Detach the record from the pool
    pub fn into_inner(mut self) -> Transaction {
        self.inner.take().unwrap_or_default()
    }
}

impl Deref for PooledTransaction {
    type Target = Transaction;

    fn deref(&self) -> &Transaction {
        // `inner` is only `None` after `into_inner`, which consumes the guard
        match &self.inner {
            Some(tx) => tx,
            None => unreachable!("pooled transaction accessed after detach"),
        }
    }
}

impl DerefMut for PooledTransaction {
    fn deref_mut(&mut self) -> &mut Transaction {
        match &mut self.inner {
            Some(tx) => tx,
            None => unreachable!("pooled transaction accessed after detach"),
        }
    }
}

impl Drop for PooledTransaction {
    fn drop(&mut self) {
        if let Some(tx) = self.inner.take() {
            self.pool.release(tx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::provider::ProviderKey;
    use crate::transaction::TransactionId;

    #[test]
    fn test_acquire_release_reuses_record() {
        let pool = TransactionPool::new(4);
        {
            let mut tx = pool.acquire();
            tx.set_payload(&[1, 2, 3]);
        }
        assert_eq!(pool.idle(), 1);

        let tx = pool.acquire();
        assert_eq!(pool.idle(), 0);
        assert!(tx.payload().is_empty());
    }

    #[test]
    fn test_acquire_resets_every_field() {
        let pool = TransactionPool::new(1);
        {
            let mut tx = pool.acquire();
            tx.set_id(TransactionId::generate());
            tx.set_action(Action::Clear);
            tx.set_encoding_key(ProviderKey::new(*b"msgpack\0"));
            tx.set_encryption_key(ProviderKey::new(*b"chacha20"));
            tx.set_payload(b"leftover");
        }
        let tx = pool.acquire();
        assert_eq!(*tx, Transaction::default());
    }

    #[test]
    fn test_pool_is_bounded() {
        let pool = TransactionPool::new(2);
        let loans: Vec<_> = (0..5).map(|_| pool.acquire()).collect();
        drop(loans);
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn test_into_inner_detaches() {
        let pool = TransactionPool::new(2);
        let mut tx = pool.acquire();
        tx.set_payload(b"keep");
        let owned = tx.into_inner();
        assert_eq!(owned.payload(), b"keep");
        assert_eq!(pool.idle(), 0);
    }
}
