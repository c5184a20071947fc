//! Pending write queue
//!
//! Producers push from any thread; the flush step detaches the whole queue
//! as one batch. The lock is never held across I/O.

use std::collections::VecDeque;

use parking_lot::Mutex;
use txlog_core::{Action, Value};

/// One `(action, value)` pair waiting to be flushed
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntry {
    pub action: Action,
    pub value: Value,
}

impl PendingEntry {
    pub fn new(action: Action, value: impl Into<Value>) -> Self {
        Self {
            action,
            value: value.into(),
        }
    }
}

#[derive(Debug, Default)]
pub struct WriteQueue {
    entries: Mutex<VecDeque<PendingEntry>>,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: PendingEntry) {
        self.entries.lock().push_back(entry);
    }

    /// Detach every pending entry in enqueue order
    pub fn drain(&self) -> Vec<PendingEntry> {
        let mut entries = self.entries.lock();
        entries.drain(..).collect()
    }

    /// Put a failed batch back ahead of anything enqueued since it was drained
    pub fn requeue_front(&self, batch: Vec<PendingEntry>) {
        let mut entries = self.entries.lock();
        for entry in batch.into_iter().rev() {
            entries.push_front(entry);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Copy of the pending entries, front first
    pub fn snapshot(&self) -> Vec<PendingEntry> {
        self.entries.lock().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_preserves_order() {
        let queue = WriteQueue::new();
        for i in 0..5u32 {
            queue.push(PendingEntry::new(Action::Add, i));
        }
        let batch = queue.drain();
        assert!(queue.is_empty());
        let values: Vec<_> = batch.iter().map(|e| e.value.clone()).collect();
        assert_eq!(values, (0..5u32).map(Value::from).collect::<Vec<_>>());
    }

    #[test]
    fn test_requeue_goes_ahead_of_newer_entries() {
        let queue = WriteQueue::new();
        queue.push(PendingEntry::new(Action::Add, 1u8));
        queue.push(PendingEntry::new(Action::Remove, 2u8));
        let batch = queue.drain();

        queue.push(PendingEntry::new(Action::Add, 3u8));
        queue.requeue_front(batch);

        let order: Vec<_> = queue.drain().into_iter().map(|e| e.value).collect();
        assert_eq!(order, vec![Value::U8(1), Value::U8(2), Value::U8(3)]);
    }
}
