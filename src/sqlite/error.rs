//! SQLite error types.

use crate::engine::EngineError;

pub type SqliteResult<T> = Result<T, SqliteError>;

/// SQLite-specific errors.
#[derive(Debug)]
pub enum SqliteError {
    /// SQLite error from rusqlite
    Sqlite(rusqlite::Error),
    /// A statement parameter with no supplied value
    Unbound(String),
    /// The background connection thread has stopped
    ConnectionClosed,
    /// Any other failure reported by the async wrapper
    Worker(String),
}

impl std::fmt::Display for SqliteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqliteError::Sqlite(e) => write!(f, "SQLite error: {}", e),
            SqliteError::Unbound(name) => write!(f, "No value supplied for parameter {}", name),
            SqliteError::ConnectionClosed => write!(f, "Connection closed"),
            SqliteError::Worker(e) => write!(f, "SQLite worker error: {}", e),
        }
    }
}

impl std::error::Error for SqliteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SqliteError::Sqlite(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for SqliteError {
    fn from(e: rusqlite::Error) -> Self {
        SqliteError::Sqlite(e)
    }
}

impl From<tokio_rusqlite::Error> for SqliteError {
    fn from(e: tokio_rusqlite::Error) -> Self {
        match e {
            tokio_rusqlite::Error::Rusqlite(e) => SqliteError::Sqlite(e),
            tokio_rusqlite::Error::ConnectionClosed => SqliteError::ConnectionClosed,
            other => SqliteError::Worker(other.to_string()),
        }
    }
}

impl From<SqliteError> for EngineError {
    fn from(e: SqliteError) -> Self {
        match &e {
            SqliteError::Sqlite(rusqlite::Error::SqliteFailure(code, _))
                if matches!(
                    code.code,
                    rusqlite::ErrorCode::CannotOpen | rusqlite::ErrorCode::NotADatabase
                ) =>
            {
                EngineError::connection(e.to_string())
            }
            SqliteError::Sqlite(_) | SqliteError::Unbound(_) => EngineError::query(e.to_string()),
            SqliteError::ConnectionClosed => EngineError::connection(e.to_string()),
            SqliteError::Worker(_) => EngineError::internal(e.to_string()),
        }
    }
}
