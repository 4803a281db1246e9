//! Error types for the PostgreSQL protocol implementation.

use std::fmt;
use std::io;

use crate::engine::EngineError;

/// Result type for PostgreSQL operations.
pub type PgResult<T> = Result<T, PgError>;

/// Errors that can occur during PostgreSQL operations.
#[derive(Debug)]
pub enum PgError {
    /// I/O error during communication.
    Io(io::Error),

    /// Protocol error (unexpected message, invalid format, etc.).
    Protocol(String),

    /// Authentication failed.
    Auth(String),

    /// Server returned an error.
    Server {
        severity: String,
        code: String,
        message: String,
        detail: Option<String>,
        hint: Option<String>,
    },

    /// Type conversion error.
    Type(String),

    /// Connection is closed or in invalid state.
    ConnectionClosed,

    /// Timeout waiting for the server.
    Timeout,
}

impl PgError {
    /// Whether the connection can no longer be used after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PgError::Server { .. } | PgError::Type(_))
    }

    /// SQLSTATE code for server errors.
    pub fn code(&self) -> Option<&str> {
        match self {
            PgError::Server { code, .. } => Some(code),
            _ => None,
        }
    }
}

impl fmt::Display for PgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PgError::Io(e) => write!(f, "I/O error: {}", e),
            PgError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            PgError::Auth(msg) => write!(f, "Authentication failed: {}", msg),
            PgError::Server {
                severity,
                code,
                message,
                detail,
                hint,
            } => {
                write!(f, "{}: {} ({})", severity, message, code)?;
                if let Some(d) = detail {
                    write!(f, "\nDetail: {}", d)?;
                }
                if let Some(h) = hint {
                    write!(f, "\nHint: {}", h)?;
                }
                Ok(())
            }
            PgError::Type(msg) => write!(f, "Type error: {}", msg),
            PgError::ConnectionClosed => write!(f, "Connection is closed"),
            PgError::Timeout => write!(f, "Timed out connecting to server"),
        }
    }
}

impl std::error::Error for PgError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PgError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for PgError {
    fn from(e: io::Error) -> Self {
        PgError::Io(e)
    }
}

impl From<PgError> for EngineError {
    fn from(e: PgError) -> Self {
        match &e {
            // Authentication failures during startup arrive as server errors too
            PgError::Server { code, .. } if code.starts_with("28") || code.starts_with("08") => {
                EngineError::connection(e.to_string())
            }
            PgError::Server { .. } => EngineError::query(e.to_string()),
            PgError::Io(_) | PgError::Auth(_) | PgError::ConnectionClosed | PgError::Timeout => {
                EngineError::connection(e.to_string())
            }
            PgError::Protocol(_) | PgError::Type(_) => EngineError::internal(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineErrorKind;

    fn server(code: &str) -> PgError {
        PgError::Server {
            severity: "ERROR".to_string(),
            code: code.to_string(),
            message: "boom".to_string(),
            detail: None,
            hint: Some("try again".to_string()),
        }
    }

    #[test]
    fn test_display_includes_hint() {
        assert_eq!(server("42P01").to_string(), "ERROR: boom (42P01)\nHint: try again");
    }

    #[test]
    fn test_engine_error_kinds() {
        assert_eq!(EngineError::from(server("42P01")).kind, EngineErrorKind::Query);
        assert_eq!(EngineError::from(server("28P01")).kind, EngineErrorKind::Connection);
        assert_eq!(
            EngineError::from(PgError::ConnectionClosed).kind,
            EngineErrorKind::Connection
        );
        assert_eq!(
            EngineError::from(PgError::Protocol("x".into())).kind,
            EngineErrorKind::Internal
        );
    }

    #[test]
    fn test_fatal_errors() {
        assert!(!server("42P01").is_fatal());
        assert!(PgError::Timeout.is_fatal());
        assert!(PgError::Io(io::Error::other("reset")).is_fatal());
    }
}
