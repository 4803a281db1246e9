//! PostgreSQL wire protocol message encoding and decoding.
//!
//! Only the v3 messages needed for authentication, the simple query
//! protocol, and unnamed-portal extended queries are implemented.
//! Reference: https://www.postgresql.org/docs/current/protocol-message-formats.html

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use super::error::{PgError, PgResult};
use super::types::{Oid, PgValue};

// ============================================================================
// Protocol Constants
// ============================================================================

/// PostgreSQL protocol version 3.0
pub const PROTOCOL_VERSION: i32 = 196608; // (3 << 16) | 0

/// Upper bound on a single backend message, guards against garbage lengths
const MAX_MESSAGE_LEN: usize = 1 << 30;

/// Format codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum Format {
    Text = 0,
    Binary = 1,
}

impl From<i16> for Format {
    fn from(code: i16) -> Self {
        if code == 0 {
            Format::Text
        } else {
            Format::Binary
        }
    }
}

/// Transaction status indicators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Idle,
    InTransaction,
    Failed,
}

impl From<u8> for TransactionStatus {
    fn from(b: u8) -> Self {
        match b {
            b'T' => TransactionStatus::InTransaction,
            b'E' => TransactionStatus::Failed,
            _ => TransactionStatus::Idle,
        }
    }
}

// ============================================================================
// Frontend (Client -> Server) Messages
// ============================================================================

/// Trait for encoding frontend messages
pub trait FrontendMessage {
    fn encode(&self) -> BytesMut;
}

/// Write a tagged message: tag byte, then a length covering itself and the body.
fn frame(tag: u8, write_body: impl FnOnce(&mut BytesMut)) -> BytesMut {
    let mut buf = BytesMut::with_capacity(64);
    buf.put_u8(tag);
    buf.put_i32(0);
    write_body(&mut buf);
    let len = (buf.len() - 1) as i32;
    buf[1..5].copy_from_slice(&len.to_be_bytes());
    buf
}

fn put_cstring(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}

/// Startup message sent at connection start
#[derive(Debug, Clone)]
pub struct StartupMessage {
    pub user: String,
    pub database: String,
    pub options: Vec<(String, String)>,
}

impl FrontendMessage for StartupMessage {
    fn encode(&self) -> BytesMut {
        // The startup packet is the one message without a tag byte
        let mut buf = BytesMut::new();
        buf.put_i32(0);
        buf.put_i32(PROTOCOL_VERSION);

        put_cstring(&mut buf, "user");
        put_cstring(&mut buf, &self.user);
        put_cstring(&mut buf, "database");
        put_cstring(&mut buf, &self.database);
        for (key, value) in &self.options {
            put_cstring(&mut buf, key);
            put_cstring(&mut buf, value);
        }
        buf.put_u8(0);

        let len = buf.len() as i32;
        buf[0..4].copy_from_slice(&len.to_be_bytes());
        buf
    }
}

/// Password message (for MD5 or plaintext auth)
pub struct PasswordMessage<'a> {
    pub password: &'a str,
}

impl FrontendMessage for PasswordMessage<'_> {
    fn encode(&self) -> BytesMut {
        frame(b'p', |buf| put_cstring(buf, self.password))
    }
}

/// Simple query message ('Q')
#[derive(Debug, Clone)]
pub struct QueryMessage<'a> {
    pub query: &'a str,
}

impl FrontendMessage for QueryMessage<'_> {
    fn encode(&self) -> BytesMut {
        frame(b'Q', |buf| put_cstring(buf, self.query))
    }
}

/// Parse message ('P') - Creates a prepared statement
#[derive(Debug, Clone)]
pub struct ParseMessage<'a> {
    pub name: &'a str,
    pub query: &'a str,
    pub param_types: &'a [Oid],
}

impl FrontendMessage for ParseMessage<'_> {
    fn encode(&self) -> BytesMut {
        frame(b'P', |buf| {
            put_cstring(buf, self.name);
            put_cstring(buf, self.query);
            buf.put_i16(self.param_types.len() as i16);
            for oid in self.param_types {
                buf.put_i32(oid.as_i32());
            }
        })
    }
}

/// Bind message ('B') - Binds parameters to a prepared statement
///
/// Each parameter carries its own format code; result formats are given
/// per column.
#[derive(Debug, Clone)]
pub struct BindMessage<'a> {
    pub portal: &'a str,
    pub statement: &'a str,
    pub params: &'a [PgValue],
    pub result_formats: &'a [Format],
}

impl FrontendMessage for BindMessage<'_> {
    fn encode(&self) -> BytesMut {
        frame(b'B', |buf| {
            put_cstring(buf, self.portal);
            put_cstring(buf, self.statement);

            buf.put_i16(self.params.len() as i16);
            for param in self.params {
                buf.put_i16(param.format() as i16);
            }

            buf.put_i16(self.params.len() as i16);
            for param in self.params {
                if param.is_null() {
                    buf.put_i32(-1);
                } else {
                    let encoded = param.encode();
                    buf.put_i32(encoded.len() as i32);
                    buf.put_slice(&encoded);
                }
            }

            buf.put_i16(self.result_formats.len() as i16);
            for format in self.result_formats {
                buf.put_i16(*format as i16);
            }
        })
    }
}

/// Execute message ('E') - Executes a bound portal
#[derive(Debug, Clone)]
pub struct ExecuteMessage<'a> {
    pub portal: &'a str,
    /// 0 fetches every row
    pub max_rows: i32,
}

impl FrontendMessage for ExecuteMessage<'_> {
    fn encode(&self) -> BytesMut {
        frame(b'E', |buf| {
            put_cstring(buf, self.portal);
            buf.put_i32(self.max_rows);
        })
    }
}

/// Describe message ('D') for a prepared statement
#[derive(Debug, Clone)]
pub struct DescribeStatementMessage<'a> {
    pub name: &'a str,
}

impl FrontendMessage for DescribeStatementMessage<'_> {
    fn encode(&self) -> BytesMut {
        frame(b'D', |buf| {
            buf.put_u8(b'S');
            put_cstring(buf, self.name);
        })
    }
}

/// Close message ('C') for a prepared statement
#[derive(Debug, Clone)]
pub struct CloseStatementMessage<'a> {
    pub name: &'a str,
}

impl FrontendMessage for CloseStatementMessage<'_> {
    fn encode(&self) -> BytesMut {
        frame(b'C', |buf| {
            buf.put_u8(b'S');
            put_cstring(buf, self.name);
        })
    }
}

/// Sync message ('S') - Marks end of an extended query
#[derive(Debug, Clone, Copy)]
pub struct SyncMessage;

impl FrontendMessage for SyncMessage {
    fn encode(&self) -> BytesMut {
        frame(b'S', |_| {})
    }
}

/// Terminate message ('X') - Close the connection
#[derive(Debug, Clone, Copy)]
pub struct TerminateMessage;

impl FrontendMessage for TerminateMessage {
    fn encode(&self) -> BytesMut {
        frame(b'X', |_| {})
    }
}

/// SASL Initial Response message ('p') - First SCRAM message
#[derive(Debug, Clone)]
pub struct SaslInitialResponseMessage<'a> {
    pub mechanism: &'a str,
    pub data: &'a [u8],
}

impl FrontendMessage for SaslInitialResponseMessage<'_> {
    fn encode(&self) -> BytesMut {
        frame(b'p', |buf| {
            put_cstring(buf, self.mechanism);
            buf.put_i32(self.data.len() as i32);
            buf.put_slice(self.data);
        })
    }
}

/// SASL Response message ('p') - Subsequent SCRAM messages
#[derive(Debug, Clone)]
pub struct SaslResponseMessage<'a> {
    pub data: &'a [u8],
}

impl FrontendMessage for SaslResponseMessage<'_> {
    fn encode(&self) -> BytesMut {
        frame(b'p', |buf| buf.put_slice(self.data))
    }
}

// ============================================================================
// Backend (Server -> Client) Messages
// ============================================================================

/// Field description in a RowDescription message
#[derive(Debug, Clone)]
pub struct FieldDescription {
    pub name: String,
    pub type_oid: Oid,
    pub format: Format,
}

/// Backend message types
#[derive(Debug, Clone)]
pub enum BackendMessage {
    // Authentication
    AuthenticationOk,
    AuthenticationCleartextPassword,
    AuthenticationMD5Password { salt: [u8; 4] },
    AuthenticationSASL { mechanisms: Vec<String> },
    AuthenticationSASLContinue { data: Bytes },
    AuthenticationSASLFinal { data: Bytes },

    // Query responses
    RowDescription { fields: Vec<FieldDescription> },
    DataRow { values: Vec<Option<Bytes>> },
    CommandComplete { tag: String },
    EmptyQueryResponse,

    // Extended query protocol
    ParseComplete,
    BindComplete,
    CloseComplete,
    NoData,
    PortalSuspended,
    ParameterDescription { type_oids: Vec<Oid> },

    // Status
    ReadyForQuery { status: TransactionStatus },
    ParameterStatus { name: String, value: String },
    BackendKeyData { process_id: i32, secret_key: i32 },

    // Errors and asynchronous notices
    ErrorResponse { fields: HashMap<u8, String> },
    NoticeResponse { fields: HashMap<u8, String> },
    NotificationResponse,
}

/// Split one complete message off the front of `buf`, if it has arrived.
pub fn split_frame(buf: &mut BytesMut) -> PgResult<Option<Bytes>> {
    if buf.len() < 5 {
        return Ok(None);
    }
    let len = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
    let len = usize::try_from(len)
        .ok()
        .filter(|len| (4..=MAX_MESSAGE_LEN).contains(len))
        .ok_or_else(|| PgError::Protocol(format!("Invalid message length: {}", len)))?;

    if buf.len() < len + 1 {
        buf.reserve(len + 1 - buf.len());
        return Ok(None);
    }
    Ok(Some(buf.split_to(len + 1).freeze()))
}

impl BackendMessage {
    /// Decode one framed backend message (tag byte included).
    pub fn decode(mut frame: Bytes) -> PgResult<Self> {
        if frame.len() < 5 {
            return Err(PgError::Protocol("Incomplete message header".to_string()));
        }
        let msg_type = frame.get_u8();
        frame.advance(4);
        let mut body = Reader(frame);

        match msg_type {
            b'R' => Self::decode_auth(body),
            b'T' => Self::decode_row_description(body),
            b'D' => Self::decode_data_row(body),
            b'C' => Ok(BackendMessage::CommandComplete {
                tag: body.cstring()?,
            }),
            b'Z' => Ok(BackendMessage::ReadyForQuery {
                status: TransactionStatus::from(body.u8()?),
            }),
            b'E' => Ok(BackendMessage::ErrorResponse {
                fields: body.error_fields()?,
            }),
            b'N' => Ok(BackendMessage::NoticeResponse {
                fields: body.error_fields()?,
            }),
            b'S' => Ok(BackendMessage::ParameterStatus {
                name: body.cstring()?,
                value: body.cstring()?,
            }),
            b'K' => Ok(BackendMessage::BackendKeyData {
                process_id: body.i32()?,
                secret_key: body.i32()?,
            }),
            b't' => {
                let count = body.count()?;
                let type_oids = (0..count)
                    .map(|_| body.i32().map(Oid::from_i32))
                    .collect::<PgResult<_>>()?;
                Ok(BackendMessage::ParameterDescription { type_oids })
            }
            b'1' => Ok(BackendMessage::ParseComplete),
            b'2' => Ok(BackendMessage::BindComplete),
            b'3' => Ok(BackendMessage::CloseComplete),
            b'I' => Ok(BackendMessage::EmptyQueryResponse),
            b'n' => Ok(BackendMessage::NoData),
            b's' => Ok(BackendMessage::PortalSuspended),
            b'A' => Ok(BackendMessage::NotificationResponse),
            _ => Err(PgError::Protocol(format!(
                "Unknown message type: {}",
                msg_type as char
            ))),
        }
    }

    fn decode_auth(mut body: Reader) -> PgResult<Self> {
        match body.i32()? {
            0 => Ok(BackendMessage::AuthenticationOk),
            3 => Ok(BackendMessage::AuthenticationCleartextPassword),
            5 => {
                let mut salt = [0u8; 4];
                salt.copy_from_slice(&body.take(4)?);
                Ok(BackendMessage::AuthenticationMD5Password { salt })
            }
            10 => {
                let mut mechanisms = Vec::new();
                while body.has_remaining() {
                    let mech = body.cstring()?;
                    if mech.is_empty() {
                        break;
                    }
                    mechanisms.push(mech);
                }
                Ok(BackendMessage::AuthenticationSASL { mechanisms })
            }
            11 => Ok(BackendMessage::AuthenticationSASLContinue { data: body.rest() }),
            12 => Ok(BackendMessage::AuthenticationSASLFinal { data: body.rest() }),
            other => Err(PgError::Auth(format!(
                "Unsupported authentication method: {}",
                other
            ))),
        }
    }

    fn decode_row_description(mut body: Reader) -> PgResult<Self> {
        let count = body.count()?;
        let mut fields = Vec::with_capacity(count);

        for _ in 0..count {
            let name = body.cstring()?;
            // table oid (4) and column attribute number (2)
            body.take(6)?;
            let type_oid = Oid::from_i32(body.i32()?);
            // type size (2) and type modifier (4)
            body.take(6)?;
            let format = Format::from(body.i16()?);
            fields.push(FieldDescription {
                name,
                type_oid,
                format,
            });
        }

        Ok(BackendMessage::RowDescription { fields })
    }

    fn decode_data_row(mut body: Reader) -> PgResult<Self> {
        let count = body.count()?;
        let mut values = Vec::with_capacity(count);

        for _ in 0..count {
            let len = body.i32()?;
            if len < 0 {
                values.push(None);
            } else {
                values.push(Some(body.take(len as usize)?));
            }
        }

        Ok(BackendMessage::DataRow { values })
    }
}

// ============================================================================
// Bounds-checked body reader
// ============================================================================

/// Reads message bodies without panicking on truncated input.
struct Reader(Bytes);

impl Reader {
    fn has_remaining(&self) -> bool {
        self.0.has_remaining()
    }

    fn ensure(&self, n: usize) -> PgResult<()> {
        if self.0.remaining() < n {
            return Err(PgError::Protocol(format!(
                "Truncated message: needed {} bytes, had {}",
                n,
                self.0.remaining()
            )));
        }
        Ok(())
    }

    fn u8(&mut self) -> PgResult<u8> {
        self.ensure(1)?;
        Ok(self.0.get_u8())
    }

    fn i16(&mut self) -> PgResult<i16> {
        self.ensure(2)?;
        Ok(self.0.get_i16())
    }

    fn i32(&mut self) -> PgResult<i32> {
        self.ensure(4)?;
        Ok(self.0.get_i32())
    }

    /// A non-negative 16-bit element count.
    fn count(&mut self) -> PgResult<usize> {
        let n = self.i16()?;
        usize::try_from(n).map_err(|_| PgError::Protocol(format!("Negative count: {}", n)))
    }

    fn take(&mut self, n: usize) -> PgResult<Bytes> {
        self.ensure(n)?;
        Ok(self.0.split_to(n))
    }

    fn rest(self) -> Bytes {
        self.0
    }

    /// Read a null-terminated string, replacing invalid UTF-8.
    fn cstring(&mut self) -> PgResult<String> {
        let end = self
            .0
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| PgError::Protocol("Missing null terminator in string".to_string()))?;
        let raw = self.0.split_to(end);
        self.0.advance(1);
        Ok(match std::str::from_utf8(&raw) {
            Ok(s) => s.to_owned(),
            Err(_) => String::from_utf8_lossy(&raw).into_owned(),
        })
    }

    fn error_fields(&mut self) -> PgResult<HashMap<u8, String>> {
        let mut fields = HashMap::new();
        while self.has_remaining() {
            let code = self.u8()?;
            if code == 0 {
                break;
            }
            fields.insert(code, self.cstring()?);
        }
        Ok(fields)
    }
}
