use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use buffered_log_sink::buffer::{LogBuffer, PersistError};
use buffered_log_sink::console::ConsoleWriter;
use buffered_log_sink::event::{EventError, LogEvent};
use buffered_log_sink::init::{Pipeline, PipelineConfig};
use buffered_log_sink::level::LogLevel;
use buffered_log_sink::memory_store::MemoryStore;
use buffered_log_sink::schedule::FlushSchedule;
use buffered_log_sink::store::{Backend, BoxError, LogStore};
use chrono::Utc;
use tokio::time::Duration;

/// Store whose inserts fail while `failing` is set.
#[derive(Default)]
struct FlakyStore {
    failing: AtomicBool,
    calls: AtomicUsize,
    inner: MemoryStore,
}

#[async_trait]
impl LogStore for FlakyStore {
    async fn insert_batch(&self, batch: &[LogEvent]) -> Result<(), BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err("connection refused".into());
        }
        self.inner.insert_batch(batch).await
    }
}

fn quiet_pipeline(store: Arc<MemoryStore>, schedule: FlushSchedule) -> Pipeline {
    let config = PipelineConfig {
        flush_schedule: schedule,
        min_level: LogLevel::Debug,
        enable_stdout: false,
        ..PipelineConfig::default()
    };
    let console = Arc::new(ConsoleWriter::new(std::io::sink(), false));
    Pipeline::start_with_console(Backend::new(store), console, &config).unwrap()
}

fn event(i: usize) -> LogEvent {
    LogEvent::builder(LogLevel::Info, format!("event {}", i))
        .field("seq", i as i64)
        .build()
        .unwrap()
}

#[tokio::test]
async fn threshold_flush_happens_exactly_at_capacity() {
    let store = Arc::new(MemoryStore::new());
    let buffer = LogBuffer::new(store.clone(), 100);

    for i in 0..99 {
        buffer.append(event(i)).await;
    }
    assert_eq!(buffer.len(), 99);
    assert!(store.batch_sizes().is_empty());

    buffer.append(event(99)).await;
    assert_eq!(buffer.len(), 0);
    assert_eq!(store.batch_sizes(), vec![100]);

    assert_eq!(buffer.drain_and_persist().await.unwrap(), 0);
    assert_eq!(store.batch_sizes(), vec![100]);
}

#[tokio::test]
async fn failed_persist_empties_buffer_and_it_stays_usable() {
    let store = Arc::new(FlakyStore::default());
    store.failing.store(true, Ordering::SeqCst);
    let buffer = LogBuffer::new(store.clone(), 10);

    for i in 0..4 {
        buffer.append(event(i)).await;
    }
    match buffer.drain_and_persist().await {
        Err(err @ PersistError::Store { .. }) => assert_eq!(err.lost(), 4),
        other => panic!("expected store failure, got {:?}", other),
    }
    assert!(buffer.is_empty());

    store.failing.store(false, Ordering::SeqCst);
    buffer.append(event(4)).await;
    assert_eq!(buffer.len(), 1);
    assert_eq!(buffer.drain_and_persist().await.unwrap(), 1);
    assert_eq!(store.inner.len(), 1);
    assert_eq!(store.calls.load(Ordering::SeqCst), 2);

    let stats = buffer.stats();
    assert_eq!(stats.lost, 4);
    assert_eq!(stats.persisted, 1);
}

#[tokio::test(start_paused = true)]
async fn stop_persists_pending_events_in_one_batch() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = quiet_pipeline(store.clone(), FlushSchedule::every(Duration::from_secs(300)));

    for i in 0..3 {
        pipeline.logger().info(format!("step {}", i)).emit().await.unwrap();
    }
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(store.batch_sizes().is_empty());

    assert_eq!(pipeline.shutdown().await.unwrap(), 3);
    assert_eq!(store.batch_sizes(), vec![3]);
    assert!(pipeline.buffer().is_empty());
}

#[tokio::test(start_paused = true)]
async fn schedule_flushes_between_thresholds() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = quiet_pipeline(store.clone(), FlushSchedule::every(Duration::from_secs(60)));

    pipeline.logger().warn("disk almost full").emit().await.unwrap();
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(store.batch_sizes(), vec![1]);

    assert_eq!(pipeline.shutdown().await.unwrap(), 0);
    assert_eq!(store.batch_sizes(), vec![1]);
}

#[tokio::test]
async fn unknown_level_is_rejected_before_buffering() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = quiet_pipeline(store.clone(), FlushSchedule::default());

    match pipeline.logger().event_str("critical", "reactor overheating") {
        Err(EventError::InvalidLevel(level)) => assert_eq!(level, "critical"),
        Err(other) => panic!("unexpected error {:?}", other),
        Ok(_) => panic!("critical must not be accepted"),
    }
    assert!(pipeline.buffer().is_empty());

    assert_eq!(pipeline.shutdown().await.unwrap(), 0);
    assert!(store.is_empty());
}

#[tokio::test]
async fn correlation_key_round_trip() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = quiet_pipeline(store.clone(), FlushSchedule::default());
    let since = Utc::now() - chrono::Duration::minutes(1);

    let logger = pipeline.logger();
    logger.info("login").field("user_id", "42").emit().await.unwrap();
    logger.error("payment declined").field("user_id", "42").emit().await.unwrap();
    logger.info("login").field("user_id", "7").emit().await.unwrap();
    logger.debug("cache miss").emit().await.unwrap();
    pipeline.shutdown().await.unwrap();

    let queries = pipeline.queries();
    let found = queries.by_correlation_key("user_id", "42", since, 10).await.unwrap();
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].message, "payment declined");
    assert_eq!(found[1].message, "login");

    let errors = queries.by_level(LogLevel::Error, since, 10).await.unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors.iter().all(|r| r.level == LogLevel::Error && r.timestamp >= since));
    assert!(errors[0].stack_trace.is_some());

    let recent = queries.recent(since, 3).await.unwrap();
    assert_eq!(recent.len(), 3);
}

#[tokio::test]
async fn events_below_min_level_reach_no_sink() {
    let store = Arc::new(MemoryStore::new());
    let config = PipelineConfig { enable_stdout: false, ..PipelineConfig::default() };
    let console = Arc::new(ConsoleWriter::new(std::io::sink(), false));
    let pipeline = Pipeline::start_with_console(Backend::new(store.clone()), console, &config).unwrap();

    pipeline.logger().debug("noise").emit().await.unwrap();
    pipeline.logger().info("signal").emit().await.unwrap();
    assert_eq!(pipeline.buffer().len(), 1);

    pipeline.shutdown().await.unwrap();
    assert_eq!(store.len(), 1);
}

#[test]
fn concurrent_producers_lose_nothing_across_thresholds() {
    let store = Arc::new(MemoryStore::new());
    let buffer = Arc::new(LogBuffer::new(store.clone(), 100));

    let threads: Vec<_> = (0..8)
        .map(|t| {
            let buffer = Arc::clone(&buffer);
            std::thread::spawn(move || {
                for i in 0..125 {
                    buffer.append_blocking(event(t * 1000 + i));
                    assert!(buffer.len() < buffer.capacity());
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    let persisted: usize = store.batch_sizes().iter().sum();
    assert_eq!(persisted + buffer.len(), 1000);
    assert!(store.batch_sizes().iter().all(|&n| n == 100));
}
