use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use buffered_log_sink::{
    event::LogEvent,
    init::{Pipeline, PipelineConfig},
    record::LogRecord,
    store::{Backend, BoxError, LogFilter, LogQuery, LogStore},
};
use chrono::{Duration, Utc};

/// Example of integrating a completely custom backend by implementing
/// [`LogStore`] and [`LogQuery`] directly. Imagine this talks to some
/// proprietary DB for which this crate does not provide a built-in
/// store.
#[derive(Default)]
struct MyCustomDbStore {
    rows: Mutex<Vec<LogRecord>>,
}

#[async_trait]
impl LogStore for MyCustomDbStore {
    async fn insert_batch(&self, batch: &[LogEvent]) -> Result<(), BoxError> {
        // Here you would call your own client library for the target DB.
        println!("[my-custom-db] inserting {} events", batch.len());
        let mut rows = self.rows.lock().map_err(|_| "custom db lock poisoned")?;
        let now = Utc::now();
        for event in batch {
            let id = rows.len() as i64 + 1;
            rows.push(LogRecord::from_event(id, now, event));
        }
        Ok(())
    }
}

#[async_trait]
impl LogQuery for MyCustomDbStore {
    async fn query(&self, filter: &LogFilter) -> Result<Vec<LogRecord>, BoxError> {
        let rows = self.rows.lock().map_err(|_| "custom db lock poisoned")?;
        let mut found: Vec<LogRecord> = rows.iter().filter(|r| filter.matches(r)).cloned().collect();
        found.reverse();
        found.truncate(filter.limit);
        Ok(found)
    }
}

#[tokio::main]
async fn main() {
    let backend = Backend::new(Arc::new(MyCustomDbStore::default()));
    let pipeline = Pipeline::start(backend, &PipelineConfig::development()).expect("failed to start pipeline");
    let logger = pipeline.logger();

    logger.info("custom backend example started").emit().await.expect("valid event");
    logger
        .error("simulated error sent via custom backend")
        .field("db", "my-custom-db")
        .field("user_id", "42")
        .emit()
        .await
        .expect("valid event");

    pipeline.shutdown().await.expect("final flush failed");

    let since = Utc::now() - Duration::hours(1);
    let found = pipeline
        .queries()
        .by_correlation_key("user_id", "42", since, 10)
        .await
        .expect("query failed");
    println!("events for user 42: {}", found.len());
}
