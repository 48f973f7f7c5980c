use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Structured payload value attached to a [`LogEvent`](crate::event::LogEvent).
///
/// Serializes as plain JSON (no tag), so a persisted `fields` object looks
/// like `{"user_id": "42", "status": 500, "slow": true}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<FieldValue>),
    Map(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    /// Convert an arbitrary JSON value.
    ///
    /// Returns `None` for `null`, which has no representation here. Nulls
    /// nested inside lists or maps are skipped.
    pub fn from_json(value: serde_json::Value) -> Option<Self> {
        use serde_json::Value;

        match value {
            Value::Null => None,
            Value::Bool(b) => Some(FieldValue::Bool(b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(FieldValue::Int(i)),
                None => n.as_f64().filter(|f| f.is_finite()).map(FieldValue::Float),
            },
            Value::String(s) => Some(FieldValue::String(s)),
            Value::Array(items) => Some(FieldValue::List(
                items.into_iter().filter_map(FieldValue::from_json).collect(),
            )),
            Value::Object(map) => Some(FieldValue::Map(
                map.into_iter()
                    .filter_map(|(k, v)| FieldValue::from_json(v).map(|v| (k, v)))
                    .collect(),
            )),
        }
    }

    /// The string this value is compared against in correlation-key lookups.
    ///
    /// Strings compare by their raw content, everything else by its compact
    /// JSON text. `FieldValue::Int(42)` and `FieldValue::String("42")` both
    /// have the lookup form `42`.
    pub fn lookup_form(&self) -> String {
        match self {
            FieldValue::String(s) => s.clone(),
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Int(i) => i.to_string(),
            other => serde_json::to_string(other).unwrap_or_default(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.lookup_form())
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Int(v as i64)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::Int(v as i64)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}
