//! Values shared by bound parameters and materialized rows.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::ser::{Serialize, SerializeMap, Serializer};
use smallvec::SmallVec;

// Re-export serde_json::Value for JSON support
pub use serde_json::Value as JsonValue;

/// A typed SQL value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    /// Arrays and objects, or JSON columns
    Json(JsonValue),
}

impl SqlValue {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Float(f) => Some(*f),
            SqlValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Untyped conversion of a raw request value.
    pub fn from_json(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => SqlValue::Null,
            JsonValue::Bool(b) => SqlValue::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Int(i),
                None => SqlValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => SqlValue::Text(s),
            other => SqlValue::Json(other),
        }
    }

    /// Render as JSON for result payloads.
    pub fn to_json(&self) -> JsonValue {
        match self {
            SqlValue::Null => JsonValue::Null,
            SqlValue::Bool(b) => JsonValue::Bool(*b),
            SqlValue::Int(i) => JsonValue::from(*i),
            SqlValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            SqlValue::Text(s) => JsonValue::String(s.clone()),
            SqlValue::Bytes(b) => JsonValue::String(BASE64.encode(b)),
            SqlValue::Date(d) => JsonValue::String(d.format("%Y-%m-%d").to_string()),
            SqlValue::Time(t) => JsonValue::String(t.format("%H:%M:%S%.f").to_string()),
            SqlValue::Timestamp(ts) => {
                JsonValue::String(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
            }
            SqlValue::Json(v) => v.clone(),
        }
    }
}

impl Serialize for SqlValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SqlValue::Null => serializer.serialize_unit(),
            SqlValue::Bool(b) => serializer.serialize_bool(*b),
            SqlValue::Int(i) => serializer.serialize_i64(*i),
            SqlValue::Float(f) if f.is_finite() => serializer.serialize_f64(*f),
            SqlValue::Float(_) => serializer.serialize_unit(),
            SqlValue::Text(s) => serializer.serialize_str(s),
            SqlValue::Json(v) => v.serialize(serializer),
            other => other.to_json().serialize(serializer),
        }
    }
}

/// Column names shared by every row of one result.
pub type SharedColumns = Arc<Vec<String>>;

/// One materialized row: column name → value, in engine column order.
///
/// Uses SmallVec to keep rows with ≤16 columns inline.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: SharedColumns,
    values: SmallVec<[SqlValue; 16]>,
}

impl Row {
    pub fn new(columns: SharedColumns, values: impl IntoIterator<Item = SqlValue>) -> Self {
        Self {
            columns,
            values: values.into_iter().collect(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    /// Look up a value by column name (last one wins on duplicates).
    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .zip(self.values.iter())
            .rev()
            .find(|(column, _)| column.as_str() == name)
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.values.len().min(self.columns.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (column, value) in self.iter() {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}
