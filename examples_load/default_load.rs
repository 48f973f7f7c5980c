use std::sync::Arc;
use std::time::Instant;
use tracing::error;

use buffered_log_sink::init::{init_tracing, Pipeline, PipelineConfig};
use buffered_log_sink::noop_store::NoopStore;
use buffered_log_sink::store::Backend;

#[tokio::main]
async fn main() {
    let backend = Backend::new(Arc::new(NoopStore));
    let pipeline = Pipeline::start(backend, &PipelineConfig::default()).expect("failed to start pipeline");
    init_tracing(&pipeline).expect("global subscriber already set");

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        error!(iteration = i, "default load test error");
    }

    let elapsed = start.elapsed();
    let stats = pipeline.buffer().stats();
    println!("default config: sent {} events in {:?} (~{:.0} ev/s), {} threshold flushes",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64(),
        stats.threshold_flushes
    );

    let flushed = pipeline.shutdown().await.expect("final flush failed");
    println!("final flush persisted {} events", flushed);
}
