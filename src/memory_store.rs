use crate::event::LogEvent;
use crate::record::LogRecord;
use crate::store::{BoxError, LogFilter, LogQuery, LogStore};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Mutex, PoisonError, RwLock};

/// In-process store keeping every persisted record in a `Vec`.
///
/// Used as the default backend when no DSN is configured and by the tests.
/// It also records the size of every batch it received, which makes flush
/// behavior observable.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<Vec<LogRecord>>,
    batches: Mutex<Vec<usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all records in insertion order.
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Sizes of the batches received so far, in call order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl LogStore for MemoryStore {
    async fn insert_batch(&self, batch: &[LogEvent]) -> Result<(), BoxError> {
        let inserted_at = Utc::now();
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let first_id = records.len() as i64 + 1;
        records.extend(
            batch
                .iter()
                .enumerate()
                .map(|(i, event)| LogRecord::from_event(first_id + i as i64, inserted_at, event)),
        );
        drop(records);

        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(batch.len());
        Ok(())
    }
}

#[async_trait]
impl LogQuery for MemoryStore {
    async fn query(&self, filter: &LogFilter) -> Result<Vec<LogRecord>, BoxError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let mut hits: Vec<LogRecord> = records.iter().filter(|r| filter.matches(r)).cloned().collect();
        drop(records);

        hits.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        hits.truncate(filter.limit);
        Ok(hits)
    }
}
