use crate::level::LogLevel;
use crate::record::LogRecord;
use crate::store::{BoxError, LogFilter, LogQuery};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;

/// Lookback used when a query omits it.
pub const DEFAULT_LOOKBACK_HOURS: i64 = 24;
/// Result count used when a query omits it.
pub const DEFAULT_LIMIT: i64 = 100;
/// Larger limits are clamped to this.
pub const MAX_LIMIT: i64 = 1000;

#[derive(thiserror::Error, Debug)]
pub enum QueryError {
    #[error("invalid query parameter: {0}")]
    InvalidParameter(String),

    #[error("log store query failed: {0}")]
    Store(#[source] BoxError),
}

/// Optional lookback/limit pair as it arrives from an operator-facing
/// endpoint (`?hours=6&limit=50`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct QueryParams {
    pub hours: Option<i64>,
    pub limit: Option<i64>,
}

impl QueryParams {
    /// Turn the params into a `(since, limit)` pair relative to `now`,
    /// filling in [`DEFAULT_LOOKBACK_HOURS`] and [`DEFAULT_LIMIT`].
    pub fn resolve(&self, now: DateTime<Utc>) -> Result<(DateTime<Utc>, i64), QueryError> {
        let hours = self.hours.unwrap_or(DEFAULT_LOOKBACK_HOURS);
        if hours <= 0 {
            return Err(QueryError::InvalidParameter(format!(
                "hours must be positive, got {}",
                hours
            )));
        }
        let lookback = Duration::try_hours(hours).ok_or_else(|| {
            QueryError::InvalidParameter(format!("hours out of range: {}", hours))
        })?;
        let since = now.checked_sub_signed(lookback).ok_or_else(|| {
            QueryError::InvalidParameter(format!("hours out of range: {}", hours))
        })?;
        Ok((since, self.limit.unwrap_or(DEFAULT_LIMIT)))
    }
}

/// Operator-facing reads over persisted events.
///
/// Every read takes a lower time bound and a result limit, validates them
/// and returns matches newest first. An empty result is a valid answer.
#[derive(Clone)]
pub struct QuerySurface {
    store: Arc<dyn LogQuery>,
}

impl QuerySurface {
    pub fn new(store: Arc<dyn LogQuery>) -> Self {
        QuerySurface { store }
    }

    /// Everything with `timestamp >= since`.
    pub async fn recent(&self, since: DateTime<Utc>, limit: i64) -> Result<Vec<LogRecord>, QueryError> {
        let filter = base_filter(since, limit)?;
        self.run(filter).await
    }

    /// Events of exactly `level`.
    pub async fn by_level(
        &self,
        level: LogLevel,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<LogRecord>, QueryError> {
        let filter = base_filter(since, limit)?.with_level(level);
        self.run(filter).await
    }

    /// [`by_level`](Self::by_level) with a level name taken from a request.
    pub async fn by_level_str(
        &self,
        level: &str,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<LogRecord>, QueryError> {
        let level = level
            .parse::<LogLevel>()
            .map_err(|e| QueryError::InvalidParameter(e.to_string()))?;
        self.by_level(level, since, limit).await
    }

    /// Events whose field `key` has the lookup form `value`.
    pub async fn by_correlation_key(
        &self,
        key: &str,
        value: &str,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<LogRecord>, QueryError> {
        if key.trim().is_empty() {
            return Err(QueryError::InvalidParameter("correlation key must not be empty".into()));
        }
        let filter = base_filter(since, limit)?.with_correlation(key, value);
        self.run(filter).await
    }

    async fn run(&self, filter: LogFilter) -> Result<Vec<LogRecord>, QueryError> {
        self.store.query(&filter).await.map_err(QueryError::Store)
    }
}

fn base_filter(since: DateTime<Utc>, limit: i64) -> Result<LogFilter, QueryError> {
    if limit <= 0 {
        return Err(QueryError::InvalidParameter(format!(
            "limit must be positive, got {}",
            limit
        )));
    }
    if since > Utc::now() {
        return Err(QueryError::InvalidParameter(format!(
            "since {} is in the future",
            since.to_rfc3339()
        )));
    }
    Ok(LogFilter::since(since, limit.min(MAX_LIMIT) as usize))
}
