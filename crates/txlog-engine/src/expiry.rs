//! Expiry policies
//!
//! An [`ExpiryPolicy`] looks at the replayed log and names the values that
//! should be negated. The engine enqueues a record for each; negation goes
//! through the normal flush path.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;
use txlog_core::{Action, ProviderRegistry, Transaction, TransactionId, Value, ValueKind};

use crate::error::{EngineError, EngineResult};

#[async_trait]
pub trait ExpiryPolicy: Send + Sync {
    /// Entries to enqueue so that expired records are negated.
    ///
    /// `records` are every record still on local disk, in log order.
    async fn expired(
        &self,
        records: &[Transaction],
        registry: &ProviderRegistry,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<(Action, Value)>>;
}

/// Never expires anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoExpiry;

#[async_trait]
impl ExpiryPolicy for NoExpiry {
    async fn expired(
        &self,
        _records: &[Transaction],
        _registry: &ProviderRegistry,
        _now: DateTime<Utc>,
    ) -> EngineResult<Vec<(Action, Value)>> {
        Ok(Vec::new())
    }
}

/// Removes added values once their record is older than `ttl`.
///
/// A `Remove` cancels the earliest live `Add` with the same plaintext and a
/// `Clear` cancels everything before it. Age comes from the time-ordered
/// record id; records with counter ids never expire.
#[derive(Debug)]
pub struct TtlExpiry {
    ttl: Duration,
    hint: Option<ValueKind>,
    negated: Mutex<HashSet<TransactionId>>,
}

impl TtlExpiry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            hint: None,
            negated: Mutex::new(HashSet::new()),
        }
    }

    /// Decode hint for encodings that carry no schema
    pub fn with_hint(mut self, hint: ValueKind) -> Self {
        self.hint = Some(hint);
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[async_trait]
impl ExpiryPolicy for TtlExpiry {
    async fn expired(
        &self,
        records: &[Transaction],
        registry: &ProviderRegistry,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<(Action, Value)>> {
        let ttl = chrono::Duration::from_std(self.ttl)
            .map_err(|e| EngineError::Config(format!("ttl out of range: {}", e)))?;

        let mut live: Vec<(&Transaction, Vec<u8>)> = Vec::new();
        for tx in records {
            match tx.action() {
                Action::Add => live.push((tx, registry.plaintext(tx)?)),
                Action::Remove => {
                    let plaintext = registry.plaintext(tx)?;
                    if let Some(pos) = live.iter().position(|(_, p)| *p == plaintext) {
                        live.remove(pos);
                    }
                }
                Action::Clear => live.clear(),
            }
        }

        let mut negated = self.negated.lock();
        // Once the negation has landed its source is no longer live
        negated.retain(|id| live.iter().any(|(tx, _)| tx.id() == *id));

        let mut removals = Vec::new();
        for (tx, _) in &live {
            let Some(created_at) = tx.created_at() else {
                continue;
            };
            if created_at + ttl > now || negated.contains(&tx.id()) {
                continue;
            }
            let value = registry.open(tx, self.hint.as_ref())?;
            negated.insert(tx.id());
            removals.push((Action::Remove, value));
        }

        if !removals.is_empty() {
            debug!(expired = removals.len(), live = live.len(), "Expired records found");
        }
        Ok(removals)
    }
}
