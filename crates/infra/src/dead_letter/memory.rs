//! In-memory dead-letter buffer
//!
//! Keeps the most recent records up to a capacity, evicting the oldest
//! first. Nothing survives a restart.

use std::collections::VecDeque;

use async_trait::async_trait;
use bulwark_core::{DeadLetterError, DeadLetterSink};
use bulwark_domain::{DeadLetterRecord, TargetId};
use parking_lot::Mutex;

/// Default number of records retained
pub const DEFAULT_CAPACITY: usize = 1_000;

#[derive(Debug)]
pub struct InMemoryDeadLetterSink {
    capacity: usize,
    records: Mutex<VecDeque<DeadLetterRecord>>,
}

impl Default for InMemoryDeadLetterSink {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// A capacity of zero is treated as one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { capacity, records: Mutex::new(VecDeque::with_capacity(capacity.min(64))) }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Copy of the buffered records, oldest first.
    pub fn records(&self) -> Vec<DeadLetterRecord> {
        self.records.lock().iter().cloned().collect()
    }

    pub fn records_for(&self, target: &TargetId) -> Vec<DeadLetterRecord> {
        self.records.lock().iter().filter(|r| &r.target == target).cloned().collect()
    }

    /// Remove and return every buffered record, oldest first.
    pub fn drain(&self) -> Vec<DeadLetterRecord> {
        self.records.lock().drain(..).collect()
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterSink {
    async fn accept(&self, record: DeadLetterRecord) -> Result<(), DeadLetterError> {
        let mut records = self.records.lock();
        if records.len() == self.capacity {
            if let Some(evicted) = records.pop_front() {
                tracing::debug!(id = %evicted.id, "Evicted oldest dead letter");
            }
        }
        records.push_back(record);
        Ok(())
    }
}
