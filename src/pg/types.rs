//! PostgreSQL type encoding and decoding.
//!
//! Parameters go out in binary format except untyped literals, which are
//! sent as text with an unspecified OID so the server infers their type.
//! Result columns are requested in binary when a decoder exists here and
//! in text otherwise.
//! Reference: https://www.postgresql.org/docs/current/protocol-overview.html#PROTOCOL-FORMAT-CODES

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use super::error::{PgError, PgResult};
use super::protocol::Format;
use crate::value::SqlValue;

// ============================================================================
// Type OIDs
// ============================================================================

/// PostgreSQL type object identifiers (OIDs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Oid(pub i32);

impl Oid {
    /// Let the server infer the parameter type
    pub const UNSPECIFIED: Oid = Oid(0);

    pub const BOOL: Oid = Oid(16);
    pub const BYTEA: Oid = Oid(17);
    pub const CHAR: Oid = Oid(18);
    pub const NAME: Oid = Oid(19);
    pub const INT8: Oid = Oid(20);
    pub const INT2: Oid = Oid(21);
    pub const INT4: Oid = Oid(23);
    pub const TEXT: Oid = Oid(25);
    pub const OID_TYPE: Oid = Oid(26);
    pub const JSON: Oid = Oid(114);
    pub const FLOAT4: Oid = Oid(700);
    pub const FLOAT8: Oid = Oid(701);
    pub const MONEY: Oid = Oid(790);
    pub const BPCHAR: Oid = Oid(1042);
    pub const VARCHAR: Oid = Oid(1043);
    pub const DATE: Oid = Oid(1082);
    pub const TIME: Oid = Oid(1083);
    pub const TIMESTAMP: Oid = Oid(1114);
    pub const TIMESTAMPTZ: Oid = Oid(1184);
    pub const INTERVAL: Oid = Oid(1186);
    pub const TIMETZ: Oid = Oid(1266);
    pub const NUMERIC: Oid = Oid(1700);
    pub const UUID: Oid = Oid(2950);
    pub const JSONB: Oid = Oid(3802);

    #[inline]
    pub fn from_i32(oid: i32) -> Self {
        Oid(oid)
    }

    #[inline]
    pub fn as_i32(self) -> i32 {
        self.0
    }

    pub fn is_text_like(self) -> bool {
        matches!(
            self,
            Oid::TEXT | Oid::VARCHAR | Oid::BPCHAR | Oid::CHAR | Oid::NAME
        )
    }

    /// Whether `PgValue::decode_binary` understands this type.
    ///
    /// Columns of any other type are fetched in text format.
    pub fn has_binary_decoder(self) -> bool {
        self.is_text_like()
            || matches!(
                self,
                Oid::BOOL
                    | Oid::BYTEA
                    | Oid::INT2
                    | Oid::INT4
                    | Oid::INT8
                    | Oid::OID_TYPE
                    | Oid::FLOAT4
                    | Oid::FLOAT8
                    | Oid::DATE
                    | Oid::TIME
                    | Oid::TIMETZ
                    | Oid::TIMESTAMP
                    | Oid::TIMESTAMPTZ
                    | Oid::UUID
                    | Oid::JSON
                    | Oid::JSONB
            )
    }

    /// Result format to request for a column of this type.
    pub fn result_format(self) -> Format {
        if self.has_binary_decoder() {
            Format::Binary
        } else {
            Format::Text
        }
    }
}

// ============================================================================
// Epochs
// ============================================================================

/// PostgreSQL counts dates and timestamps from 2000-01-01.
fn pg_epoch_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).expect("2000-01-01 is a valid date")
}

fn pg_epoch() -> NaiveDateTime {
    pg_epoch_date().and_time(NaiveTime::MIN)
}

const MICROS_PER_SECOND: i64 = 1_000_000;

// ============================================================================
// PostgreSQL Values
// ============================================================================

/// A PostgreSQL value with type information.
#[derive(Debug, Clone, PartialEq)]
pub enum PgValue {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Text(String),
    /// A literal whose type the server infers (sent in text format)
    Untyped(String),
    Bytea(Vec<u8>),
    Uuid([u8; 16]),
    /// Microseconds since 2000-01-01 00:00:00
    Timestamp(i64),
    /// Microseconds since 2000-01-01 00:00:00 UTC
    TimestampTz(i64),
    /// Days since 2000-01-01
    Date(i32),
    /// Microseconds since midnight
    Time(i64),
    Json(String),
    /// Text rendering of an arbitrary-precision number
    Numeric(String),
    // For types we don't handle specially - store raw bytes
    Raw { oid: Oid, data: Vec<u8> },
}

impl PgValue {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, PgValue::Null)
    }

    /// Wire format this value is encoded in.
    pub fn format(&self) -> Format {
        match self {
            PgValue::Untyped(_) | PgValue::Numeric(_) => Format::Text,
            _ => Format::Binary,
        }
    }

    /// Encode this value in its wire format.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            PgValue::Null => vec![],
            PgValue::Bool(v) => vec![u8::from(*v)],
            PgValue::Int2(v) => v.to_be_bytes().to_vec(),
            PgValue::Int4(v) => v.to_be_bytes().to_vec(),
            PgValue::Int8(v) => v.to_be_bytes().to_vec(),
            PgValue::Float4(v) => v.to_be_bytes().to_vec(),
            PgValue::Float8(v) => v.to_be_bytes().to_vec(),
            PgValue::Text(v) | PgValue::Untyped(v) | PgValue::Numeric(v) => v.as_bytes().to_vec(),
            PgValue::Bytea(v) => v.clone(),
            PgValue::Uuid(v) => v.to_vec(),
            PgValue::Timestamp(v) | PgValue::TimestampTz(v) => v.to_be_bytes().to_vec(),
            PgValue::Date(v) => v.to_be_bytes().to_vec(),
            PgValue::Time(v) => v.to_be_bytes().to_vec(),
            PgValue::Json(v) => v.as_bytes().to_vec(),
            PgValue::Raw { data, .. } => data.clone(),
        }
    }

    /// OID sent in Parse for this value's parameter slot.
    pub fn type_oid(&self) -> Oid {
        match self {
            PgValue::Null | PgValue::Untyped(_) => Oid::UNSPECIFIED,
            PgValue::Bool(_) => Oid::BOOL,
            PgValue::Int2(_) => Oid::INT2,
            PgValue::Int4(_) => Oid::INT4,
            PgValue::Int8(_) => Oid::INT8,
            PgValue::Float4(_) => Oid::FLOAT4,
            PgValue::Float8(_) => Oid::FLOAT8,
            PgValue::Text(_) => Oid::TEXT,
            PgValue::Bytea(_) => Oid::BYTEA,
            PgValue::Uuid(_) => Oid::UUID,
            PgValue::Timestamp(_) => Oid::TIMESTAMP,
            PgValue::TimestampTz(_) => Oid::TIMESTAMPTZ,
            PgValue::Date(_) => Oid::DATE,
            PgValue::Time(_) => Oid::TIME,
            // JSON's binary format is its text
            PgValue::Json(_) => Oid::JSON,
            PgValue::Numeric(_) => Oid::NUMERIC,
            PgValue::Raw { oid, .. } => *oid,
        }
    }

    /// Decode a value from binary format.
    pub fn decode_binary(oid: Oid, data: &[u8]) -> PgResult<Self> {
        match oid {
            Oid::BOOL => match data.first() {
                Some(b) => Ok(PgValue::Bool(*b != 0)),
                None => Err(PgError::Type("Empty data for BOOL".to_string())),
            },
            Oid::INT2 => Ok(PgValue::Int2(i16::from_be_bytes(fixed(data, "INT2")?))),
            Oid::INT4 => Ok(PgValue::Int4(i32::from_be_bytes(fixed(data, "INT4")?))),
            Oid::INT8 => Ok(PgValue::Int8(i64::from_be_bytes(fixed(data, "INT8")?))),
            Oid::OID_TYPE => Ok(PgValue::Int8(u32::from_be_bytes(fixed(data, "OID")?) as i64)),
            Oid::FLOAT4 => Ok(PgValue::Float4(f32::from_be_bytes(fixed(data, "FLOAT4")?))),
            Oid::FLOAT8 => Ok(PgValue::Float8(f64::from_be_bytes(fixed(data, "FLOAT8")?))),
            _ if oid.is_text_like() => utf8(data, "TEXT").map(PgValue::Text),
            Oid::BYTEA => Ok(PgValue::Bytea(data.to_vec())),
            Oid::UUID => Ok(PgValue::Uuid(fixed(data, "UUID")?)),
            Oid::TIMESTAMP => Ok(PgValue::Timestamp(i64::from_be_bytes(fixed(data, "TIMESTAMP")?))),
            Oid::TIMESTAMPTZ => Ok(PgValue::TimestampTz(i64::from_be_bytes(fixed(
                data,
                "TIMESTAMPTZ",
            )?))),
            Oid::DATE => Ok(PgValue::Date(i32::from_be_bytes(fixed(data, "DATE")?))),
            Oid::TIME => Ok(PgValue::Time(i64::from_be_bytes(fixed(data, "TIME")?))),
            Oid::TIMETZ => {
                // Microseconds followed by a zone offset, which is dropped
                if data.len() < 8 {
                    return Err(PgError::Type(format!("Invalid TIMETZ length: {}", data.len())));
                }
                Ok(PgValue::Time(i64::from_be_bytes(fixed(&data[..8], "TIMETZ")?)))
            }
            Oid::JSON => utf8(data, "JSON").map(PgValue::Json),
            Oid::JSONB => {
                // JSONB has a version byte prefix
                let body = data.get(1..).unwrap_or_default();
                utf8(body, "JSONB").map(PgValue::Json)
            }
            _ => Ok(PgValue::Raw {
                oid,
                data: data.to_vec(),
            }),
        }
    }

    /// Decode from text format.
    pub fn decode_text(oid: Oid, data: &[u8]) -> PgResult<Self> {
        let text = String::from_utf8_lossy(data).into_owned();

        match oid {
            Oid::BOOL => Ok(PgValue::Bool(text == "t" || text == "true" || text == "1")),
            Oid::INT2 => text
                .parse::<i16>()
                .map(PgValue::Int2)
                .map_err(|e| PgError::Type(format!("Invalid INT2: {}", e))),
            Oid::INT4 => text
                .parse::<i32>()
                .map(PgValue::Int4)
                .map_err(|e| PgError::Type(format!("Invalid INT4: {}", e))),
            Oid::INT8 => text
                .parse::<i64>()
                .map(PgValue::Int8)
                .map_err(|e| PgError::Type(format!("Invalid INT8: {}", e))),
            Oid::FLOAT4 => text
                .parse::<f32>()
                .map(PgValue::Float4)
                .map_err(|e| PgError::Type(format!("Invalid FLOAT4: {}", e))),
            Oid::FLOAT8 => text
                .parse::<f64>()
                .map(PgValue::Float8)
                .map_err(|e| PgError::Type(format!("Invalid FLOAT8: {}", e))),
            Oid::NUMERIC => Ok(PgValue::Numeric(text)),
            Oid::JSON | Oid::JSONB => Ok(PgValue::Json(text)),
            // Default: treat as text
            _ => Ok(PgValue::Text(text)),
        }
    }

    /// Convert to the shared value model.
    pub fn into_sql_value(self) -> SqlValue {
        match self {
            PgValue::Null => SqlValue::Null,
            PgValue::Bool(v) => SqlValue::Bool(v),
            PgValue::Int2(v) => SqlValue::Int(v as i64),
            PgValue::Int4(v) => SqlValue::Int(v as i64),
            PgValue::Int8(v) => SqlValue::Int(v),
            PgValue::Float4(v) => SqlValue::Float(v as f64),
            PgValue::Float8(v) => SqlValue::Float(v),
            PgValue::Text(v) | PgValue::Untyped(v) => SqlValue::Text(v),
            PgValue::Bytea(v) => SqlValue::Bytes(v),
            PgValue::Uuid(v) => SqlValue::Text(uuid::Uuid::from_bytes(v).to_string()),
            PgValue::Timestamp(us) | PgValue::TimestampTz(us) => match timestamp_from_micros(us) {
                Some(ts) => SqlValue::Timestamp(ts),
                None => SqlValue::Text(infinity(us > 0)),
            },
            PgValue::Date(days) => match date_from_days(days) {
                Some(date) => SqlValue::Date(date),
                None => SqlValue::Text(infinity(days > 0)),
            },
            PgValue::Time(us) => match time_from_micros(us) {
                Some(time) => SqlValue::Time(time),
                None => SqlValue::Null,
            },
            PgValue::Json(text) => match serde_json::from_str(&text) {
                Ok(json) => SqlValue::Json(json),
                Err(_) => SqlValue::Text(text),
            },
            PgValue::Numeric(text) => match text.parse::<f64>() {
                Ok(f) => SqlValue::Float(f),
                Err(_) => SqlValue::Text(text),
            },
            PgValue::Raw { data, .. } => SqlValue::Bytes(data),
        }
    }
}

impl From<&SqlValue> for PgValue {
    fn from(value: &SqlValue) -> Self {
        match value {
            SqlValue::Null => PgValue::Null,
            SqlValue::Bool(v) => PgValue::Bool(*v),
            SqlValue::Int(v) => PgValue::Int8(*v),
            SqlValue::Float(v) => PgValue::Float8(*v),
            SqlValue::Text(v) => PgValue::Untyped(v.clone()),
            SqlValue::Bytes(v) => PgValue::Bytea(v.clone()),
            SqlValue::Date(date) => {
                PgValue::Date(date.signed_duration_since(pg_epoch_date()).num_days() as i32)
            }
            SqlValue::Time(time) => PgValue::Time(
                time.num_seconds_from_midnight() as i64 * MICROS_PER_SECOND
                    + (time.nanosecond() / 1_000) as i64,
            ),
            SqlValue::Timestamp(ts) => match ts.signed_duration_since(pg_epoch()).num_microseconds() {
                Some(us) => PgValue::Timestamp(us),
                None => PgValue::Untyped(ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
            },
            // Untyped so the server can cast to json, jsonb or text
            SqlValue::Json(v) => PgValue::Untyped(v.to_string()),
        }
    }
}

fn fixed<const N: usize>(data: &[u8], type_name: &str) -> PgResult<[u8; N]> {
    data.try_into()
        .map_err(|_| PgError::Type(format!("Invalid {} length: {}", type_name, data.len())))
}

fn utf8(data: &[u8], type_name: &str) -> PgResult<String> {
    std::str::from_utf8(data)
        .map(str::to_owned)
        .map_err(|e| PgError::Type(format!("Invalid UTF-8 in {}: {}", type_name, e)))
}

fn infinity(positive: bool) -> String {
    if positive { "infinity" } else { "-infinity" }.to_string()
}

fn date_from_days(days: i32) -> Option<NaiveDate> {
    if days == i32::MAX || days == i32::MIN {
        return None;
    }
    pg_epoch_date().checked_add_signed(Duration::days(days as i64))
}

fn timestamp_from_micros(us: i64) -> Option<NaiveDateTime> {
    if us == i64::MAX || us == i64::MIN {
        return None;
    }
    pg_epoch().checked_add_signed(Duration::microseconds(us))
}

fn time_from_micros(us: i64) -> Option<NaiveTime> {
    let secs = u32::try_from(us.div_euclid(MICROS_PER_SECOND)).ok()?;
    let nanos = (us.rem_euclid(MICROS_PER_SECOND) * 1_000) as u32;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
}
