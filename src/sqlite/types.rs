//! SQLite type encoding and decoding.
//!
//! SQLite has five storage classes. Parameters without a native class
//! (booleans, dates, times, timestamps, JSON) are stored the way SQLite's
//! own date and JSON functions expect them: integers and ISO-8601 text.

use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef};

use crate::value::SqlValue;

/// A SQLite value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqliteValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqliteValue {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, SqliteValue::Null)
    }

    /// Convert from rusqlite ValueRef.
    pub fn from_value_ref(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => SqliteValue::Null,
            ValueRef::Integer(i) => SqliteValue::Integer(i),
            ValueRef::Real(f) => SqliteValue::Real(f),
            ValueRef::Text(s) => SqliteValue::Text(String::from_utf8_lossy(s).into_owned()),
            ValueRef::Blob(b) => SqliteValue::Blob(b.to_vec()),
        }
    }

    /// Convert to the shared value model.
    pub fn into_sql_value(self) -> SqlValue {
        match self {
            SqliteValue::Null => SqlValue::Null,
            SqliteValue::Integer(i) => SqlValue::Int(i),
            SqliteValue::Real(f) => SqlValue::Float(f),
            SqliteValue::Text(s) => SqlValue::Text(s),
            SqliteValue::Blob(b) => SqlValue::Bytes(b),
        }
    }
}

impl From<&SqlValue> for SqliteValue {
    fn from(value: &SqlValue) -> Self {
        match value {
            SqlValue::Null => SqliteValue::Null,
            SqlValue::Bool(b) => SqliteValue::Integer(i64::from(*b)),
            SqlValue::Int(i) => SqliteValue::Integer(*i),
            SqlValue::Float(f) => SqliteValue::Real(*f),
            SqlValue::Text(s) => SqliteValue::Text(s.clone()),
            SqlValue::Bytes(b) => SqliteValue::Blob(b.clone()),
            SqlValue::Date(d) => SqliteValue::Text(d.format("%Y-%m-%d").to_string()),
            SqlValue::Time(t) => SqliteValue::Text(t.format("%H:%M:%S%.f").to_string()),
            SqlValue::Timestamp(ts) => SqliteValue::Text(ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
            SqlValue::Json(j) => SqliteValue::Text(j.to_string()),
        }
    }
}

impl ToSql for SqliteValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqliteValue::Null => ToSqlOutput::Owned(Value::Null),
            SqliteValue::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            SqliteValue::Real(f) => ToSqlOutput::Owned(Value::Real(*f)),
            // Borrowed to avoid copying text and blobs into SQLite's binding
            SqliteValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqliteValue::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

impl FromSql for SqliteValue {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(SqliteValue::from_value_ref(value))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime};

    use super::*;

    #[test]
    fn test_storage_classes_map_to_sql_values() {
        assert_eq!(SqliteValue::Null.into_sql_value(), SqlValue::Null);
        assert_eq!(SqliteValue::Integer(42).into_sql_value(), SqlValue::Int(42));
        assert_eq!(SqliteValue::Real(1.5).into_sql_value(), SqlValue::Float(1.5));
        assert_eq!(
            SqliteValue::Blob(vec![1, 2]).into_sql_value(),
            SqlValue::Bytes(vec![1, 2])
        );
    }

    #[test]
    fn test_params_without_storage_class() {
        assert_eq!(SqliteValue::from(&SqlValue::Bool(true)), SqliteValue::Integer(1));

        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(
            SqliteValue::from(&SqlValue::Date(date)),
            SqliteValue::Text("2024-02-29".to_string())
        );

        let ts = date.and_time(NaiveTime::from_hms_opt(8, 5, 0).unwrap());
        assert_eq!(
            SqliteValue::from(&SqlValue::Timestamp(ts)),
            SqliteValue::Text("2024-02-29 08:05:00".to_string())
        );

        assert_eq!(
            SqliteValue::from(&SqlValue::Json(serde_json::json!([1, 2]))),
            SqliteValue::Text("[1,2]".to_string())
        );
    }
}
