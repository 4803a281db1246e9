//! `Engine` implementation over the PostgreSQL pool.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use tracing::instrument;

use super::connection::{PgConfig, QueryResult};
use super::pool::{PgPool, PgPoolConfig};
use super::types::PgValue;
use crate::config::ExecutorConfig;
use crate::descriptor::ConnectionKind;
use crate::engine::{ConnectTarget, Engine, EngineError};
use crate::params::TypedParams;
use crate::template;
use crate::value::{Row, SqlValue};

/// A pooled PostgreSQL engine for one connection record.
pub struct PgEngine {
    pool: PgPool,
    connection_id: i64,
    /// Plaintext credential, used only to scrub driver messages
    scrub_with: SecretString,
}

impl PgEngine {
    /// Create the engine; connections open on first use.
    pub fn new(target: &ConnectTarget, config: &ExecutorConfig) -> Self {
        let connect = PgConfig::from_target(target, config);
        Self {
            pool: PgPool::new(connect, PgPoolConfig::from_executor(config)),
            connection_id: target.connection_id(),
            scrub_with: SecretString::from(target.password_opt().unwrap_or_default().to_string()),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn engine_error(&self, e: super::PgError) -> EngineError {
        EngineError::from(e).scrub(&self.scrub_with)
    }
}

/// Bind named parameters to `$n` positions.
pub(crate) fn positional_params(
    sql: &str,
    params: &TypedParams,
) -> Result<(String, Vec<PgValue>), EngineError> {
    let (rewritten, order) = template::rewrite_positional(sql);
    let values = order
        .iter()
        .map(|name| {
            params
                .get(name)
                .map(PgValue::from)
                .ok_or_else(|| EngineError::internal(format!("no value bound for parameter {}", name)))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok((rewritten, values))
}

pub(crate) const VERSION_QUERY: &str = "SELECT version()";

/// The single text cell of a `SELECT version()` response.
pub(crate) fn version_text(results: Vec<QueryResult>) -> Result<String, EngineError> {
    let first = results
        .into_iter()
        .next()
        .and_then(|r| r.rows.into_iter().next())
        .and_then(|row| row.into_iter().next())
        .map(PgValue::into_sql_value);
    match first {
        Some(SqlValue::Text(version)) => Ok(version),
        _ => Err(EngineError::internal("server returned no version")),
    }
}

fn into_rows(result: QueryResult) -> Vec<Row> {
    let columns = result.columns;
    result
        .rows
        .into_iter()
        .map(|values| {
            Row::new(
                Arc::clone(&columns),
                values.into_iter().map(PgValue::into_sql_value),
            )
        })
        .collect()
}

#[async_trait]
impl Engine for PgEngine {
    fn kind(&self) -> ConnectionKind {
        ConnectionKind::Postgresql
    }

    #[instrument(skip_all, fields(connection_id = self.connection_id))]
    async fn query(&self, sql: &str, params: &TypedParams) -> Result<Vec<Row>, EngineError> {
        let (sql, values) = positional_params(sql, params)?;
        let mut conn = self.pool.acquire().await.map_err(|e| self.engine_error(e))?;
        let result = conn.query(&sql, &values).await.map_err(|e| self.engine_error(e))?;
        Ok(into_rows(result))
    }

    async fn server_version(&self) -> Result<String, EngineError> {
        let results = self
            .pool
            .simple_query(VERSION_QUERY)
            .await
            .map_err(|e| self.engine_error(e))?;
        version_text(results)
    }
}
