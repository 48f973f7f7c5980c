use crate::event::LogEvent;
use crate::level::LogLevel;
use crate::record::LogRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::error::Error;
use std::sync::Arc;

pub type BoxError = Box<dyn Error + Send + Sync>;

/// Durable destination for drained batches of [`LogEvent`]s.
///
/// Implementations transport a whole batch to a concrete backend
/// (ClickHouse, Postgres, memory). The buffer calls `insert_batch` with a
/// timeout around it and never retries: a failed batch is reported and
/// dropped.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Store an ordered batch of events.
    ///
    /// **Returns**
    /// - `Ok(())` if the backend accepted the whole batch.
    /// - `Err(..)` if it did not. Partial success is not reported; the
    ///   batch counts as failed as a unit.
    async fn insert_batch(&self, batch: &[LogEvent]) -> Result<(), BoxError>;
}

/// Equality filter on one field, compared on the field's lookup form
/// (see [`FieldValue::lookup_form`](crate::value::FieldValue::lookup_form)).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correlation {
    pub key: String,
    pub value: String,
}

/// Read-side filter handed to a [`LogQuery`]. Built and validated by
/// [`QuerySurface`](crate::query::QuerySurface).
#[derive(Debug, Clone, PartialEq)]
pub struct LogFilter {
    pub since: DateTime<Utc>,
    pub level: Option<LogLevel>,
    pub correlation: Option<Correlation>,
    pub limit: usize,
}

impl LogFilter {
    pub fn since(since: DateTime<Utc>, limit: usize) -> Self {
        LogFilter { since, level: None, correlation: None, limit }
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn with_correlation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.correlation = Some(Correlation { key: key.into(), value: value.into() });
        self
    }

    /// Whether a record passes the filter, ignoring `limit`.
    pub fn matches(&self, record: &LogRecord) -> bool {
        if record.timestamp < self.since {
            return false;
        }
        if let Some(level) = self.level {
            if record.level != level {
                return false;
            }
        }
        match &self.correlation {
            Some(c) => record
                .field(&c.key)
                .map(|v| v.lookup_form() == c.value)
                .unwrap_or(false),
            None => true,
        }
    }
}

/// Read access to persisted records.
#[async_trait]
pub trait LogQuery: Send + Sync {
    /// Records matching `filter`, newest `timestamp` first, at most
    /// `filter.limit` of them. An empty result is not an error.
    async fn query(&self, filter: &LogFilter) -> Result<Vec<LogRecord>, BoxError>;
}

/// A backend seen through both of its faces.
#[derive(Clone)]
pub struct Backend {
    pub store: Arc<dyn LogStore>,
    pub query: Arc<dyn LogQuery>,
}

impl Backend {
    pub fn new<T>(backend: Arc<T>) -> Self
    where
        T: LogStore + LogQuery + 'static,
    {
        Backend { store: backend.clone(), query: backend }
    }
}
