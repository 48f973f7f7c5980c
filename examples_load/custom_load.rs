use std::sync::Arc;
use std::time::Instant;
use tokio::time::Duration;

use buffered_log_sink::init::{Pipeline, PipelineConfig};
use buffered_log_sink::level::LogLevel;
use buffered_log_sink::noop_store::NoopStore;
use buffered_log_sink::schedule::FlushSchedule;
use buffered_log_sink::store::Backend;

#[tokio::main]
async fn main() {
    let backend = Backend::new(Arc::new(NoopStore));

    let config = PipelineConfig {
        buffer_capacity: 1_000,
        flush_schedule: FlushSchedule::every(Duration::from_millis(200)),
        min_level: LogLevel::Info,
        persist_timeout: Duration::from_secs(1),
        enable_stdout: false,
        console_ansi: false,
        capture_stack_traces: false,
    };

    let pipeline = Pipeline::start(backend, &config).expect("failed to start pipeline");
    let logger = pipeline.logger().clone();

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        logger
            .error("custom load test error")
            .field("iteration", i)
            .emit()
            .await
            .expect("valid event");
    }

    let elapsed = start.elapsed();
    let stats = pipeline.buffer().stats();
    println!("custom config: sent {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );
    println!("batches: {}, persisted: {}, lost: {}", stats.batches, stats.persisted, stats.lost);

    pipeline.shutdown().await.expect("final flush failed");
}
