use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::level::LogLevel;
use crate::value::FieldValue;
use crate::INTERNAL_TARGET;

/// Field added to an event when some of its fields could not be serialized.
/// Holds the names of the dropped keys.
pub const SERIALIZATION_DROPPED_FIELD: &str = "serialization_dropped";

/// Errors raised while constructing a [`LogEvent`].
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum EventError {
    #[error("invalid log level: {0:?}")]
    InvalidLevel(String),

    #[error("log message must not be empty")]
    EmptyMessage,

    /// Not fatal: the event is still built, minus the listed fields.
    #[error("dropped non-serializable fields: {}", keys.join(", "))]
    SerializationDropped { keys: Vec<String> },
}

/// One immutable log occurrence.
///
/// Built through [`EventBuilder`]; there are no setters, so an event can be
/// cloned and shared across threads freely once it exists.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEvent {
    level: LogLevel,
    message: String,
    timestamp: DateTime<Utc>,
    caller: Option<String>,
    stack_trace: Option<String>,
    fields: BTreeMap<String, FieldValue>,
}

impl LogEvent {
    pub fn builder(level: LogLevel, message: impl Into<String>) -> EventBuilder {
        EventBuilder {
            level,
            message: message.into(),
            timestamp: None,
            caller: None,
            stack_trace: None,
            fields: BTreeMap::new(),
            dropped: Vec::new(),
        }
    }

    /// Like [`LogEvent::builder`], but validates a level name coming from
    /// outside the process (config, HTTP, another logging facade).
    pub fn parse_builder(level: &str, message: impl Into<String>) -> Result<EventBuilder, EventError> {
        let level = level.parse::<LogLevel>()?;
        Ok(Self::builder(level, message))
    }

    /// Shorthand for an event without fields.
    pub fn new(level: LogLevel, message: impl Into<String>) -> Result<Self, EventError> {
        Self::builder(level, message).build()
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn caller(&self) -> Option<&str> {
        self.caller.as_deref()
    }

    pub fn stack_trace(&self) -> Option<&str> {
        self.stack_trace.as_deref()
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    /// Names of fields that were dropped during construction, if any.
    pub fn dropped_fields(&self) -> Vec<&str> {
        match self.fields.get(SERIALIZATION_DROPPED_FIELD) {
            Some(FieldValue::List(keys)) => keys.iter().filter_map(FieldValue::as_str).collect(),
            _ => Vec::new(),
        }
    }
}

/// Accumulates the parts of a [`LogEvent`]. Nothing is validated until
/// [`EventBuilder::build`].
#[derive(Debug, Clone)]
pub struct EventBuilder {
    level: LogLevel,
    message: String,
    timestamp: Option<DateTime<Utc>>,
    caller: Option<String>,
    stack_trace: Option<String>,
    fields: BTreeMap<String, FieldValue>,
    dropped: Vec<String>,
}

impl EventBuilder {
    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }

    /// Kept only when the level is `error` or above.
    pub fn stack_trace(mut self, trace: impl Into<String>) -> Self {
        self.stack_trace = Some(trace.into());
        self
    }

    /// Use a timestamp recorded elsewhere instead of the build time, e.g.
    /// when importing events from another process.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Attach a structured field. Values that fail to serialize, or that
    /// serialize to `null`, are dropped and reported under
    /// [`SERIALIZATION_DROPPED_FIELD`].
    pub fn field<V: Serialize>(mut self, key: impl Into<String>, value: V) -> Self {
        let key = key.into();
        match serde_json::to_value(&value).ok().and_then(FieldValue::from_json) {
            Some(value) => self.insert(key, value),
            None => self.drop_field(key),
        }
        self
    }

    /// Attach an already-typed field.
    pub fn field_value(mut self, key: impl Into<String>, value: FieldValue) -> Self {
        let key = key.into();
        match value {
            FieldValue::Float(f) if !f.is_finite() => self.drop_field(key),
            value => self.insert(key, value),
        }
        self
    }

    pub fn fields<K, V, I>(mut self, fields: I) -> Self
    where
        K: Into<String>,
        V: Serialize,
        I: IntoIterator<Item = (K, V)>,
    {
        for (key, value) in fields {
            self = self.field(key, value);
        }
        self
    }

    fn insert(&mut self, key: String, value: FieldValue) {
        self.dropped.retain(|k| k != &key);
        self.fields.insert(key, value);
    }

    fn drop_field(&mut self, key: String) {
        self.fields.remove(&key);
        if !self.dropped.contains(&key) {
            self.dropped.push(key);
        }
    }

    /// Finish the event, stamping it with the current time.
    pub fn build(self) -> Result<LogEvent, EventError> {
        if self.message.trim().is_empty() {
            return Err(EventError::EmptyMessage);
        }

        let mut fields = self.fields;
        if !self.dropped.is_empty() {
            let err = EventError::SerializationDropped { keys: self.dropped.clone() };
            tracing::warn!(target: INTERNAL_TARGET, error = %err, event_message = %self.message, "log event degraded");
            fields.insert(
                SERIALIZATION_DROPPED_FIELD.to_string(),
                FieldValue::List(self.dropped.into_iter().map(FieldValue::String).collect()),
            );
        }

        let stack_trace = self.stack_trace.filter(|_| self.level.wants_stack_trace());

        Ok(LogEvent {
            level: self.level,
            message: self.message,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            caller: self.caller,
            stack_trace,
            fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::ser::{Serializer, Error as _};

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("not today"))
        }
    }

    #[test]
    fn builds_event_with_fields() {
        let before = Utc::now();
        let event = LogEvent::builder(LogLevel::Info, "request completed")
            .caller("src/handlers.rs:42")
            .field("user_id", "42")
            .field("status", 200)
            .field("duration_ms", 12.5)
            .build()
            .unwrap();

        assert_eq!(event.level(), LogLevel::Info);
        assert_eq!(event.message(), "request completed");
        assert_eq!(event.caller(), Some("src/handlers.rs:42"));
        assert!(event.timestamp() >= before);
        assert_eq!(event.field("user_id"), Some(&FieldValue::from("42")));
        assert_eq!(event.field("status"), Some(&FieldValue::Int(200)));
        assert!(event.dropped_fields().is_empty());
    }

    #[test]
    fn rejects_invalid_level_string() {
        let err = LogEvent::parse_builder("critical", "boom").unwrap_err();
        assert_eq!(err, EventError::InvalidLevel("critical".to_string()));
    }

    #[test]
    fn rejects_empty_message() {
        let err = LogEvent::new(LogLevel::Warn, "   ").unwrap_err();
        assert_eq!(err, EventError::EmptyMessage);
    }

    #[test]
    fn drops_unserializable_fields_individually() {
        let event = LogEvent::builder(LogLevel::Error, "partial")
            .field("ok", true)
            .field("bad", Unserializable)
            .field("nan", f64::NAN)
            .build()
            .unwrap();

        assert_eq!(event.field("ok"), Some(&FieldValue::Bool(true)));
        assert!(event.field("bad").is_none());
        assert!(event.field("nan").is_none());
        assert_eq!(event.dropped_fields(), vec!["bad", "nan"]);
    }

    #[test]
    fn overwriting_dropped_field_clears_marker() {
        let event = LogEvent::builder(LogLevel::Info, "retry")
            .field("payload", Unserializable)
            .field("payload", "fallback")
            .build()
            .unwrap();

        assert_eq!(event.field("payload"), Some(&FieldValue::from("fallback")));
        assert!(event.field(SERIALIZATION_DROPPED_FIELD).is_none());
    }

    #[test]
    fn stack_trace_kept_only_for_errors() {
        let warn = LogEvent::builder(LogLevel::Warn, "slow")
            .stack_trace("frame 0")
            .build()
            .unwrap();
        assert_eq!(warn.stack_trace(), None);

        let fatal = LogEvent::builder(LogLevel::Fatal, "dead")
            .stack_trace("frame 0")
            .build()
            .unwrap();
        assert_eq!(fatal.stack_trace(), Some("frame 0"));
    }

    #[test]
    fn explicit_timestamp_is_kept() {
        let ts = Utc::now() - chrono::Duration::hours(3);
        let event = LogEvent::builder(LogLevel::Debug, "imported")
            .timestamp(ts)
            .build()
            .unwrap();
        assert_eq!(event.timestamp(), ts);
    }
}
