use crate::emitter::Logger;
use crate::event::LogEvent;
use crate::level::LogLevel;
use crate::value::FieldValue;
use crate::INTERNAL_TARGET;
use std::collections::BTreeMap;
use std::sync::{Arc, atomic::{AtomicU64, Ordering}};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// `tracing_subscriber` layer that turns `tracing` events into
/// [`LogEvent`]s and emits them through a [`Logger`].
///
/// Lets code that already uses `tracing::info!` and friends feed the same
/// console + buffered pipeline as direct [`Logger`] calls. Events below the
/// logger's minimum level are ignored. This crate's own diagnostics are
/// printed to the console only, so a failing flush cannot feed itself.
pub struct PipelineLayer {
    logger: Logger,
    /// Total events seen by the layer (before filtering by level).
    pub total_events: Arc<AtomicU64>,
    /// Handed to the logger.
    pub forwarded_events: Arc<AtomicU64>,
    /// Could not be turned into a valid event.
    pub rejected_events: Arc<AtomicU64>,
}

impl PipelineLayer {
    pub fn new(logger: Logger) -> Self {
        PipelineLayer {
            logger,
            total_events: Arc::new(AtomicU64::new(0)),
            forwarded_events: Arc::new(AtomicU64::new(0)),
            rejected_events: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl<S> Layer<S> for PipelineLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event, _ctx: Context<'_, S>) {
        self.total_events.fetch_add(1, Ordering::Relaxed);

        let meta = event.metadata();
        let level = LogLevel::from(*meta.level());
        if !self.logger.enabled(level) {
            return;
        }

        let mut fields = BTreeMap::new();
        let mut message: Option<String> = None;
        let mut visitor = FieldVisitor { fields: &mut fields, message: &mut message };
        event.record(&mut visitor);

        let caller = match (meta.file(), meta.line()) {
            (Some(file), Some(line)) => Some(format!("{}:{}", file, line)),
            _ => meta.module_path().map(str::to_string),
        };

        let mut builder = LogEvent::builder(level, message.unwrap_or_else(|| meta.name().to_string()))
            .field_value("target", FieldValue::from(meta.target()));
        if let Some(caller) = caller {
            builder = builder.caller(caller);
        }
        for (key, value) in fields {
            builder = builder.field_value(key, value);
        }

        let record = match builder.build() {
            Ok(record) => record,
            Err(_) => {
                self.rejected_events.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        if meta.target().starts_with(INTERNAL_TARGET) {
            self.logger.console_only(&record);
        } else {
            self.logger.emit_blocking(record);
            self.forwarded_events.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Collects an event's fields, pulling `message` out separately.
pub struct FieldVisitor<'a> {
    pub fields: &'a mut BTreeMap<String, FieldValue>,
    pub message: &'a mut Option<String>,
}

impl<'a> Visit for FieldVisitor<'a> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            *self.message = Some(value.to_string());
        } else {
            self.fields.insert(field.name().to_string(), FieldValue::from(value));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), FieldValue::Int(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        let value = i64::try_from(value)
            .map(FieldValue::Int)
            .unwrap_or(FieldValue::Float(value as f64));
        self.fields.insert(field.name().to_string(), value);
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), FieldValue::Float(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), FieldValue::Bool(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.fields.insert(field.name().to_string(), FieldValue::String(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        // `message` arrives here when the format string has arguments.
        if field.name() == "message" {
            *self.message = Some(format!("{:?}", value));
        } else {
            self.fields.insert(field.name().to_string(), FieldValue::String(format!("{:?}", value)));
        }
    }
}
