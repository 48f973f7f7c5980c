use crate::event::LogEvent;
use crate::record::LogRecord;
use crate::store::{BoxError, LogFilter, LogQuery, LogStore};
use async_trait::async_trait;

/// A store that accepts and discards every batch.
///
/// Useful for measuring the overhead of the buffer and emitter without any
/// external I/O. Queries always come back empty.
#[derive(Clone, Default)]
pub struct NoopStore;

#[async_trait]
impl LogStore for NoopStore {
    async fn insert_batch(&self, _batch: &[LogEvent]) -> Result<(), BoxError> {
        Ok(())
    }
}

#[async_trait]
impl LogQuery for NoopStore {
    async fn query(&self, _filter: &LogFilter) -> Result<Vec<LogRecord>, BoxError> {
        Ok(Vec::new())
    }
}
