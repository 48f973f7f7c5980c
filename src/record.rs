use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::event::LogEvent;
use crate::level::LogLevel;
use crate::value::FieldValue;

/// A persisted [`LogEvent`] as read back from a store.
///
/// `id` and `inserted_at` are assigned by the store; everything else is the
/// event as it was emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: i64,
    pub inserted_at: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub caller: Option<String>,
    pub stack_trace: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl LogRecord {
    pub fn from_event(id: i64, inserted_at: DateTime<Utc>, event: &LogEvent) -> Self {
        LogRecord {
            id,
            inserted_at,
            level: event.level(),
            message: event.message().to_string(),
            timestamp: event.timestamp(),
            caller: event.caller().map(str::to_string),
            stack_trace: event.stack_trace().map(str::to_string),
            fields: event.fields().clone(),
        }
    }

    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }
}
