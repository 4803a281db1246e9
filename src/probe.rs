//! Connection test behind the connection form.
//!
//! Opens a single connection with the form's plaintext password, asks the
//! server for its version and closes the connection again. Nothing is
//! cached in the engine pool.

use std::time::Duration;

use mysql_async::prelude::Queryable;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::config::ExecutorConfig;
use crate::credentials::redact;
use crate::descriptor::{ConnectionDescriptor, ConnectionKind};
use crate::engine::{ConnectTarget, EngineError, KindStrategy};
use crate::mysql::engine::{connect_opts, map_error};
use crate::pg::engine::{version_text, VERSION_QUERY};
use crate::pg::{PgConfig, PgConnection};
use crate::sqlite::SqliteConnection;

pub const SUCCESS_MESSAGE: &str = "Connection successful";

/// Result of a connection test, shaped for the connection form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ProbeOutcome {
    fn connected(version: String) -> Self {
        Self {
            success: true,
            message: SUCCESS_MESSAGE.to_string(),
            version: Some(version),
        }
    }

    fn failed(message: String) -> Self {
        Self {
            success: false,
            message,
            version: None,
        }
    }
}

/// Test that a descriptor can be connected to with a plaintext password.
///
/// Never fails; problems are reported in the outcome with the password
/// removed from the message.
#[instrument(skip_all, fields(connection_id = descriptor.id(), kind = %descriptor.kind()))]
pub async fn test_connection(
    descriptor: &ConnectionDescriptor,
    password: SecretString,
    config: &ExecutorConfig,
) -> ProbeOutcome {
    let kind = descriptor.kind();
    if !KindStrategy::for_kind(kind).supported {
        return ProbeOutcome::failed(format!("Database type {} is not supported yet", kind));
    }

    let scrub_with = SecretString::from(password.expose_secret().to_string());
    let outcome = match ConnectTarget::from_descriptor(descriptor, password) {
        Ok(target) => server_version(&target, config).await,
        Err(reason) => Err(EngineError::connection(reason)),
    };

    match outcome {
        Ok(version) => {
            info!(version = %version, "connection test succeeded");
            ProbeOutcome::connected(version)
        }
        Err(e) => {
            let message = redact(&e.message, &scrub_with);
            warn!(error = %message, "connection test failed");
            ProbeOutcome::failed(format!("{} connection failed: {}", label(kind), message))
        }
    }
}

fn label(kind: ConnectionKind) -> &'static str {
    match kind {
        ConnectionKind::Postgresql => "PostgreSQL",
        ConnectionKind::Mysql => "MySQL",
        ConnectionKind::Sqlite => "SQLite",
        ConnectionKind::Mssql => "SQL Server",
        ConnectionKind::Oracle => "Oracle",
    }
}

async fn server_version(target: &ConnectTarget, config: &ExecutorConfig) -> Result<String, EngineError> {
    match target.kind() {
        ConnectionKind::Postgresql => postgres_version(target, config).await,
        ConnectionKind::Mysql => mysql_version(target, config).await,
        ConnectionKind::Sqlite => sqlite_version(target).await,
        other => Err(EngineError::internal(format!(
            "Database type {} is not supported yet",
            other
        ))),
    }
}

async fn postgres_version(target: &ConnectTarget, config: &ExecutorConfig) -> Result<String, EngineError> {
    let mut conn = PgConnection::connect_with_config(&PgConfig::from_target(target, config)).await?;
    let results = conn.simple_query(VERSION_QUERY).await;
    let _ = conn.close().await;
    Ok(short_postgres_version(&version_text(results?)?))
}

/// `PostgreSQL 16.2 on x86_64-pc-linux-gnu, ...` → `PostgreSQL 16.2`
fn short_postgres_version(full: &str) -> String {
    let words: Vec<&str> = full.split_whitespace().take(2).collect();
    if words.is_empty() {
        full.to_string()
    } else {
        words.join(" ")
    }
}

async fn mysql_version(target: &ConnectTarget, config: &ExecutorConfig) -> Result<String, EngineError> {
    let conn = tokio::time::timeout(
        config.connect_timeout,
        mysql_async::Conn::new(connect_opts(target, config)),
    )
    .await
    .map_err(|_| connect_timed_out(config.connect_timeout))?;
    let mut conn = conn.map_err(|e| EngineError::connection(e.to_string()))?;

    let version: Result<Option<String>, _> = conn.query_first("SELECT VERSION()").await;
    let _ = conn.disconnect().await;
    let version = version.map_err(map_error)?;
    Ok(format!("MySQL {}", version.unwrap_or_else(|| "Unknown".to_string())))
}

async fn sqlite_version(target: &ConnectTarget) -> Result<String, EngineError> {
    let conn = SqliteConnection::open(target.database())
        .await
        .map_err(|e| EngineError::connection(e.to_string()))?;
    let version = conn.version().await;
    let _ = conn.close().await;
    Ok(format!("SQLite {}", version?))
}

fn connect_timed_out(limit: Duration) -> EngineError {
    EngineError::connection(format!("connect timed out after {} ms", limit.as_millis()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_password() -> SecretString {
        SecretString::from(String::new())
    }

    #[test]
    fn test_short_postgres_version() {
        assert_eq!(
            short_postgres_version("PostgreSQL 16.2 (Debian 16.2-1.pgdg120+2) on x86_64-pc-linux-gnu"),
            "PostgreSQL 16.2"
        );
        assert_eq!(short_postgres_version("PostgreSQL"), "PostgreSQL");
    }

    #[tokio::test]
    async fn test_unsupported_kind() {
        let descriptor =
            ConnectionDescriptor::new(1, ConnectionKind::Oracle, "db", 1521, "orcl", "scott", "");
        let outcome = test_connection(&descriptor, no_password(), &ExecutorConfig::default()).await;

        assert!(!outcome.success);
        assert_eq!(outcome.message, "Database type ORACLE is not supported yet");
        assert!(outcome.version.is_none());
    }

    #[tokio::test]
    async fn test_sqlite_memory_database() {
        let descriptor = ConnectionDescriptor::sqlite(1, ":memory:");
        let outcome = test_connection(&descriptor, no_password(), &ExecutorConfig::default()).await;

        assert!(outcome.success);
        assert_eq!(outcome.message, SUCCESS_MESSAGE);
        assert!(outcome.version.unwrap().starts_with("SQLite 3"));
    }

    #[tokio::test]
    async fn test_invalid_descriptor_reports_failure() {
        let descriptor =
            ConnectionDescriptor::new(1, ConnectionKind::Postgresql, "", 5432, "app", "user", "");
        let outcome = test_connection(&descriptor, no_password(), &ExecutorConfig::default()).await;

        assert!(!outcome.success);
        assert_eq!(outcome.message, "PostgreSQL connection failed: host is empty");
    }

    #[tokio::test]
    async fn test_refused_connection_hides_password() {
        let descriptor =
            ConnectionDescriptor::new(1, ConnectionKind::Postgresql, "127.0.0.1", 1, "app", "user", "");
        let password = "hunter2-secret";
        let config = ExecutorConfig::default().connect_timeout(Duration::from_millis(500));

        let outcome =
            test_connection(&descriptor, SecretString::from(password.to_string()), &config).await;

        assert!(!outcome.success);
        assert!(outcome.message.starts_with("PostgreSQL connection failed: "));
        assert!(!outcome.message.contains(password));
    }
}
