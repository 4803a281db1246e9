//! Error types for query execution.
//!
//! Every variant carries structured fields only. No variant holds a
//! descriptor, a connection URL or a credential.

use thiserror::Error;

use crate::descriptor::ConnectionKind;

/// Generic text shown to callers for unanticipated failures.
pub const INTERNAL_ERROR_MESSAGE: &str = "Unexpected error while executing query";

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("No database connection configured for this workspace")]
    NoConnectionConfigured,

    #[error("Database connection {connection_id} is not active")]
    ConnectionInactive { connection_id: i64 },

    #[error("Missing required parameters: {}", names.join(", "))]
    MissingParameter { names: Vec<String> },

    #[error("Invalid value for parameter '{name}': expected {expected}")]
    InvalidParameterFormat { name: String, expected: &'static str },

    #[error("Database type {kind} is not supported")]
    UnsupportedConnectionKind { kind: ConnectionKind },

    #[error("Failed to connect to {kind} database {connection_id}: {reason}")]
    ConnectionBuild {
        connection_id: i64,
        kind: ConnectionKind,
        reason: String,
    },

    #[error("Query execution error: {message}")]
    QueryExecution { message: String },

    #[error("Internal execution error: {detail}")]
    Internal { detail: String },
}

impl ExecutionError {
    /// HTTP status the routing layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            ExecutionError::Internal { .. } => 500,
            _ => 400,
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            ExecutionError::NoConnectionConfigured => "NO_CONNECTION_CONFIGURED",
            ExecutionError::ConnectionInactive { .. } => "CONNECTION_INACTIVE",
            ExecutionError::MissingParameter { .. } => "MISSING_PARAMETER",
            ExecutionError::InvalidParameterFormat { .. } => "INVALID_PARAMETER_FORMAT",
            ExecutionError::UnsupportedConnectionKind { .. } => "UNSUPPORTED_CONNECTION_KIND",
            ExecutionError::ConnectionBuild { .. } => "CONNECTION_BUILD_FAILED",
            ExecutionError::QueryExecution { .. } => "QUERY_EXECUTION_FAILED",
            ExecutionError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Message safe to put in a caller-facing payload.
    ///
    /// Internal errors keep their detail for server-side logs only.
    pub fn public_message(&self) -> String {
        match self {
            ExecutionError::Internal { .. } => INTERNAL_ERROR_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExecutionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ExecutionError::NoConnectionConfigured.status_code(), 400);
        assert_eq!(
            ExecutionError::QueryExecution {
                message: "syntax error".to_string()
            }
            .status_code(),
            400
        );
        assert_eq!(
            ExecutionError::Internal {
                detail: "boom".to_string()
            }
            .status_code(),
            500
        );
    }

    #[test]
    fn test_missing_parameter_lists_all_names() {
        let err = ExecutionError::MissingParameter {
            names: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(err.to_string(), "Missing required parameters: a, b");
    }

    #[test]
    fn test_internal_public_message_is_generic() {
        let err = ExecutionError::Internal {
            detail: "thread panicked at src/foo.rs".to_string(),
        };
        assert_eq!(err.public_message(), INTERNAL_ERROR_MESSAGE);
        assert!(err.to_string().contains("src/foo.rs"));
    }
}
