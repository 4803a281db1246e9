//! MySQL value conversions.
//!
//! Statements run over the binary protocol, so integers and temporal values
//! arrive typed while strings, decimals and JSON arrive as bytes. The
//! column metadata decides how those bytes are read.

use chrono::{Datelike, NaiveDate, NaiveTime, Timelike};
use mysql_async::consts::ColumnType;
use mysql_async::{Column, Value};

use crate::value::SqlValue;

/// Character set number MySQL reports for binary columns.
const BINARY_CHARSET: u16 = 63;

/// Encode a bound parameter.
pub fn to_mysql(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::NULL,
        SqlValue::Bool(b) => Value::Int(i64::from(*b)),
        SqlValue::Int(i) => Value::Int(*i),
        SqlValue::Float(f) => Value::Double(*f),
        SqlValue::Text(s) => Value::Bytes(s.as_bytes().to_vec()),
        SqlValue::Bytes(b) => Value::Bytes(b.clone()),
        SqlValue::Date(d) => Value::Date(d.year() as u16, d.month() as u8, d.day() as u8, 0, 0, 0, 0),
        SqlValue::Time(t) => Value::Time(
            false,
            0,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
            t.nanosecond() / 1_000,
        ),
        SqlValue::Timestamp(ts) => Value::Date(
            ts.year() as u16,
            ts.month() as u8,
            ts.day() as u8,
            ts.hour() as u8,
            ts.minute() as u8,
            ts.second() as u8,
            ts.nanosecond() / 1_000,
        ),
        SqlValue::Json(j) => Value::Bytes(j.to_string().into_bytes()),
    }
}

/// Decode one result cell using its column metadata.
pub fn from_mysql(value: Value, column: &Column) -> SqlValue {
    decode(value, column.column_type(), column.character_set())
}

fn decode(value: Value, column_type: ColumnType, charset: u16) -> SqlValue {
    match value {
        Value::NULL => SqlValue::Null,
        Value::Int(i) => SqlValue::Int(i),
        Value::UInt(u) => i64::try_from(u)
            .map(SqlValue::Int)
            .unwrap_or_else(|_| SqlValue::Text(u.to_string())),
        Value::Float(f) => SqlValue::Float(f64::from(f)),
        Value::Double(f) => SqlValue::Float(f),
        Value::Bytes(bytes) => decode_bytes(bytes, column_type, charset),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            let date = NaiveDate::from_ymd_opt(i32::from(year), u32::from(month), u32::from(day));
            let time = NaiveTime::from_hms_micro_opt(
                u32::from(hour),
                u32::from(minute),
                u32::from(second),
                micros,
            );
            match (date, time) {
                (Some(date), _) if column_type == ColumnType::MYSQL_TYPE_DATE => SqlValue::Date(date),
                (Some(date), Some(time)) => SqlValue::Timestamp(date.and_time(time)),
                // Zero dates such as 0000-00-00 have no calendar value
                _ => SqlValue::Text(format!(
                    "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                    year, month, day, hour, minute, second
                )),
            }
        }
        Value::Time(negative, days, hours, minutes, seconds, micros) => {
            let time = NaiveTime::from_hms_micro_opt(
                u32::from(hours),
                u32::from(minutes),
                u32::from(seconds),
                micros,
            );
            match time {
                Some(time) if !negative && days == 0 => SqlValue::Time(time),
                _ => {
                    let total_hours = days * 24 + u32::from(hours);
                    let sign = if negative { "-" } else { "" };
                    SqlValue::Text(format!("{}{:02}:{:02}:{:02}", sign, total_hours, minutes, seconds))
                }
            }
        }
    }
}

fn decode_bytes(bytes: Vec<u8>, column_type: ColumnType, charset: u16) -> SqlValue {
    match column_type {
        ColumnType::MYSQL_TYPE_NEWDECIMAL | ColumnType::MYSQL_TYPE_DECIMAL => {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            match text.parse::<f64>() {
                Ok(f) => SqlValue::Float(f),
                Err(_) => SqlValue::Text(text),
            }
        }
        ColumnType::MYSQL_TYPE_JSON => match serde_json::from_slice(&bytes) {
            Ok(json) => SqlValue::Json(json),
            Err(_) => SqlValue::Text(String::from_utf8_lossy(&bytes).into_owned()),
        },
        ColumnType::MYSQL_TYPE_BIT => SqlValue::Bytes(bytes),
        _ if charset == BINARY_CHARSET => SqlValue::Bytes(bytes),
        _ => match String::from_utf8(bytes) {
            Ok(text) => SqlValue::Text(text),
            Err(e) => SqlValue::Bytes(e.into_bytes()),
        },
    }
}
