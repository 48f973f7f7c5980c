use crate::buffer::LogBuffer;
use crate::console::ConsoleSink;
use crate::event::{EventBuilder, EventError, LogEvent};
use crate::level::LogLevel;
use crate::value::FieldValue;
use serde::Serialize;
use std::backtrace::Backtrace;
use std::panic::Location;
use std::sync::Arc;

/// Fans every accepted event out to the console and to the persisted path.
///
/// A `Logger` is an ordinary value: build one at startup and hand clones
/// (or an `Arc`) to whatever needs to log. Level filtering happens once,
/// before fan-out, so both sinks see the same stream. The console write
/// always happens first and never waits on persistence.
#[derive(Clone)]
pub struct Logger {
    min_level: LogLevel,
    console: Arc<dyn ConsoleSink>,
    buffer: Arc<LogBuffer>,
    capture_stack_traces: bool,
}

impl Logger {
    pub fn new(buffer: Arc<LogBuffer>, console: Arc<dyn ConsoleSink>, min_level: LogLevel) -> Self {
        Logger {
            min_level,
            console,
            buffer,
            capture_stack_traces: false,
        }
    }

    /// Capture a backtrace for events of level `error` and above created
    /// through [`Logger::event`] and friends.
    pub fn with_stack_traces(mut self, enabled: bool) -> Self {
        self.capture_stack_traces = enabled;
        self
    }

    pub fn min_level(&self) -> LogLevel {
        self.min_level
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.min_level
    }

    pub fn buffer(&self) -> &Arc<LogBuffer> {
        &self.buffer
    }

    /// Emit a finished event from async code. May wait for a threshold
    /// flush.
    pub async fn emit(&self, event: LogEvent) {
        if !self.enabled(event.level()) {
            return;
        }
        self.console.write_event(&event);
        self.buffer.append(event).await;
    }

    /// Emit a finished event from synchronous code.
    pub fn emit_blocking(&self, event: LogEvent) {
        if !self.enabled(event.level()) {
            return;
        }
        self.console.write_event(&event);
        self.buffer.append_blocking(event);
    }

    /// Render to the console without persisting.
    pub fn console_only(&self, event: &LogEvent) {
        if self.enabled(event.level()) {
            self.console.write_event(event);
        }
    }

    /// Start an event at `level`, tagged with the caller's location.
    #[track_caller]
    pub fn event(&self, level: LogLevel, message: impl Into<String>) -> Emit<'_> {
        let location = Location::caller();
        let mut builder = LogEvent::builder(level, message)
            .caller(format!("{}:{}", location.file(), location.line()));

        if self.capture_stack_traces && level.wants_stack_trace() && self.enabled(level) {
            builder = builder.stack_trace(Backtrace::force_capture().to_string());
        }
        Emit { logger: self, builder }
    }

    /// Like [`Logger::event`] with a level name from outside the process.
    #[track_caller]
    pub fn event_str(&self, level: &str, message: impl Into<String>) -> Result<Emit<'_>, EventError> {
        let level = level.parse::<LogLevel>()?;
        Ok(self.event(level, message))
    }

    #[track_caller]
    pub fn debug(&self, message: impl Into<String>) -> Emit<'_> {
        self.event(LogLevel::Debug, message)
    }

    #[track_caller]
    pub fn info(&self, message: impl Into<String>) -> Emit<'_> {
        self.event(LogLevel::Info, message)
    }

    #[track_caller]
    pub fn warn(&self, message: impl Into<String>) -> Emit<'_> {
        self.event(LogLevel::Warn, message)
    }

    #[track_caller]
    pub fn error(&self, message: impl Into<String>) -> Emit<'_> {
        self.event(LogLevel::Error, message)
    }

    #[track_caller]
    pub fn fatal(&self, message: impl Into<String>) -> Emit<'_> {
        self.event(LogLevel::Fatal, message)
    }
}

/// An event under construction, bound to the [`Logger`] that will emit it.
///
/// ```ignore
/// logger.info("request completed")
///     .field("user_id", user_id)
///     .field("status", 200)
///     .emit()
///     .await?;
/// ```
#[must_use = "an event does nothing until it is emitted"]
pub struct Emit<'a> {
    logger: &'a Logger,
    builder: EventBuilder,
}

impl<'a> Emit<'a> {
    pub fn field<V: Serialize>(mut self, key: impl Into<String>, value: V) -> Self {
        self.builder = self.builder.field(key, value);
        self
    }

    pub fn field_value(mut self, key: impl Into<String>, value: FieldValue) -> Self {
        self.builder = self.builder.field_value(key, value);
        self
    }

    pub fn stack_trace(mut self, trace: impl Into<String>) -> Self {
        self.builder = self.builder.stack_trace(trace);
        self
    }

    /// Build without emitting.
    pub fn build(self) -> Result<LogEvent, EventError> {
        self.builder.build()
    }

    pub async fn emit(self) -> Result<(), EventError> {
        if !self.logger.enabled(self.builder.level()) {
            return Ok(());
        }
        let event = self.builder.build()?;
        self.logger.emit(event).await;
        Ok(())
    }

    pub fn emit_blocking(self) -> Result<(), EventError> {
        if !self.logger.enabled(self.builder.level()) {
            return Ok(());
        }
        let event = self.builder.build()?;
        self.logger.emit_blocking(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CapturedConsole {
        lines: Mutex<Vec<String>>,
    }

    impl CapturedConsole {
        fn messages(&self) -> Vec<String> {
            self.lines.lock().unwrap().clone()
        }
    }

    impl ConsoleSink for CapturedConsole {
        fn write_event(&self, event: &LogEvent) {
            self.lines.lock().unwrap().push(event.message().to_string());
        }
    }

    fn setup(min_level: LogLevel, capacity: usize) -> (Arc<MemoryStore>, Arc<CapturedConsole>, Logger) {
        let store = Arc::new(MemoryStore::new());
        let console = Arc::new(CapturedConsole::default());
        let buffer = Arc::new(LogBuffer::new(store.clone(), capacity));
        let logger = Logger::new(buffer, console.clone(), min_level);
        (store, console, logger)
    }

    #[tokio::test]
    async fn both_sinks_see_the_same_filtered_stream() {
        let (_, console, logger) = setup(LogLevel::Info, 100);

        logger.debug("hidden").emit().await.unwrap();
        logger.info("shown").field("user_id", "42").emit().await.unwrap();
        logger.error("failed").emit().await.unwrap();

        assert_eq!(console.messages(), vec!["shown", "failed"]);
        let buffered: Vec<String> = logger
            .buffer()
            .drain()
            .into_iter()
            .map(|e| e.message().to_string())
            .collect();
        assert_eq!(buffered, vec!["shown", "failed"]);
    }

    #[tokio::test]
    async fn caller_location_is_recorded() {
        let (_, _, logger) = setup(LogLevel::Debug, 100);
        let event = logger.info("here").build().unwrap();
        let caller = event.caller().unwrap();
        assert!(caller.contains("emitter.rs:"), "{}", caller);
    }

    #[tokio::test]
    async fn unknown_level_is_rejected_before_anything_is_written() {
        let (store, console, logger) = setup(LogLevel::Debug, 1);

        assert!(matches!(
            logger.event_str("critical", "nope"),
            Err(EventError::InvalidLevel(_))
        ));
        assert!(console.messages().is_empty());
        assert!(logger.buffer().is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let (_, console, logger) = setup(LogLevel::Debug, 100);
        let err = logger.warn("").emit().await.unwrap_err();
        assert_eq!(err, EventError::EmptyMessage);
        assert!(console.messages().is_empty());
    }

    #[tokio::test]
    async fn console_is_written_even_when_persistence_fails() {
        use crate::store::{BoxError, LogStore};
        use async_trait::async_trait;

        struct DownStore;

        #[async_trait]
        impl LogStore for DownStore {
            async fn insert_batch(&self, _batch: &[LogEvent]) -> Result<(), BoxError> {
                Err("down".into())
            }
        }

        let console = Arc::new(CapturedConsole::default());
        let buffer = Arc::new(LogBuffer::new(Arc::new(DownStore), 1));
        let logger = Logger::new(buffer, console.clone(), LogLevel::Info);

        logger.info("one").emit().await.unwrap();
        logger.info("two").emit().await.unwrap();

        assert_eq!(console.messages(), vec!["one", "two"]);
        assert_eq!(logger.buffer().stats().lost, 2);
    }

    #[tokio::test]
    async fn stack_traces_captured_for_errors_when_enabled() {
        let (_, _, logger) = setup(LogLevel::Debug, 100);
        let logger = logger.with_stack_traces(true);

        let err = logger.error("boom").build().unwrap();
        assert!(err.stack_trace().is_some());

        let info = logger.info("fine").build().unwrap();
        assert!(info.stack_trace().is_none());
    }

    #[test]
    fn blocking_emit_outside_runtime_flushes_at_threshold() {
        let (store, console, logger) = setup(LogLevel::Info, 2);

        logger.info("a").emit_blocking().unwrap();
        logger.info("b").emit_blocking().unwrap();

        assert_eq!(console.messages(), vec!["a", "b"]);
        assert_eq!(store.batch_sizes(), vec![2]);
        assert!(logger.buffer().is_empty());
    }
}
