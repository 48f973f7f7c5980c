//! Buffered, leveled logging with scheduled persistence.
//!
//! Every event goes to the console synchronously and to an in-memory
//! [`LogBuffer`](buffer::LogBuffer). The buffer is flushed to a
//! [`LogStore`](store::LogStore) when it fills up, on a recurring
//! [`FlushSchedule`](schedule::FlushSchedule), and once more on shutdown.
//! Persisted events can be read back through a
//! [`QuerySurface`](query::QuerySurface).

pub mod level;
pub mod value;
pub mod event;
pub mod record;
pub mod store;
pub mod memory_store;
pub mod noop_store;
pub mod buffer;
pub mod schedule;
pub mod flusher;
pub mod console;
pub mod emitter;
pub mod query;
pub mod layer;
pub mod env;
pub mod backend;
pub mod init;

#[cfg(feature = "clickhouse")]
pub mod clickhouse;

#[cfg(feature = "postgres")]
pub mod postgres;

/// Target of this crate's own diagnostics. The tracing bridge prints these
/// to the console but never buffers them.
pub const INTERNAL_TARGET: &str = "buffered_log_sink::internal";

pub use event::{EventError, LogEvent};
pub use init::{Pipeline, PipelineConfig};
pub use level::LogLevel;
pub use value::FieldValue;
