//! `Engine` implementation over a single SQLite connection.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::connection::SqliteConnection;
use super::types::SqliteValue;
use crate::descriptor::ConnectionKind;
use crate::engine::{ConnectTarget, Engine, EngineError};
use crate::params::TypedParams;
use crate::value::Row;

/// A SQLite database addressed by the descriptor's database name.
///
/// SQLite serializes writers itself, so the engine keeps one connection and
/// queues calls on its background thread instead of pooling.
pub struct SqliteEngine {
    conn: SqliteConnection,
    connection_id: i64,
}

impl SqliteEngine {
    pub async fn open(target: &ConnectTarget) -> Result<Self, EngineError> {
        let conn = SqliteConnection::open(target.database())
            .await
            .map_err(|e| EngineError::connection(e.to_string()))?;
        debug!(connection_id = target.connection_id(), path = conn.path(), "opened sqlite database");
        Ok(Self {
            conn,
            connection_id: target.connection_id(),
        })
    }
}

#[async_trait]
impl Engine for SqliteEngine {
    fn kind(&self) -> ConnectionKind {
        ConnectionKind::Sqlite
    }

    #[instrument(skip_all, fields(connection_id = self.connection_id))]
    async fn query(&self, sql: &str, params: &TypedParams) -> Result<Vec<Row>, EngineError> {
        let bound: HashMap<String, SqliteValue> = params
            .iter()
            .map(|(name, value)| (name.clone(), SqliteValue::from(value)))
            .collect();

        let result = self.conn.query_named(sql, bound).await?;
        let columns = result.columns;
        Ok(result
            .rows
            .into_iter()
            .map(|values| {
                Row::new(
                    Arc::clone(&columns),
                    values.into_iter().map(SqliteValue::into_sql_value),
                )
            })
            .collect())
    }

    async fn server_version(&self) -> Result<String, EngineError> {
        Ok(self.conn.version().await?)
    }
}
