//! `Engine` implementation over a `mysql_async` pool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, OptsBuilder, Params, Pool, PoolConstraints, PoolOpts};
use secrecy::SecretString;
use tracing::{debug, instrument};

use super::types::{from_mysql, to_mysql};
use crate::config::ExecutorConfig;
use crate::descriptor::ConnectionKind;
use crate::engine::{ConnectTarget, Engine, EngineError};
use crate::params::TypedParams;
use crate::template;
use crate::value::Row;

/// Server error codes raised while establishing a session.
const CONNECTION_ERROR_CODES: [u16; 7] = [1040, 1044, 1045, 1049, 1129, 1130, 1251];

/// A pooled MySQL engine for one connection record.
pub struct MysqlEngine {
    pool: Pool,
    connection_id: i64,
    connect_timeout: Duration,
    pre_ping: bool,
    /// Plaintext credential, used only to scrub driver messages
    scrub_with: SecretString,
}

impl MysqlEngine {
    /// Create the engine; connections open on first use.
    pub fn new(target: &ConnectTarget, config: &ExecutorConfig) -> Self {
        let constraints = PoolConstraints::new(
            config.pool_size.min(config.max_connections()) as usize,
            config.max_connections() as usize,
        )
        .unwrap_or_default();

        let opts = connect_opts(target, config).pool_opts(PoolOpts::default().with_constraints(constraints));

        Self {
            pool: Pool::new(opts),
            connection_id: target.connection_id(),
            connect_timeout: config.connect_timeout,
            pre_ping: config.pre_ping,
            scrub_with: SecretString::from(target.password_opt().unwrap_or_default().to_string()),
        }
    }

    /// Check out a connection, replacing it once if the pre-ping fails.
    async fn checkout(&self) -> Result<Conn, EngineError> {
        let mut conn = self.connect().await?;
        if self.pre_ping && conn.ping().await.is_err() {
            debug!(connection_id = self.connection_id, "discarding dead mysql connection");
            drop(conn);
            conn = self.connect().await?;
        }
        Ok(conn)
    }

    async fn connect(&self) -> Result<Conn, EngineError> {
        match tokio::time::timeout(self.connect_timeout, self.pool.get_conn()).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(EngineError::connection(e.to_string()).scrub(&self.scrub_with)),
            Err(_) => Err(EngineError::connection(format!(
                "connect timed out after {} ms",
                self.connect_timeout.as_millis()
            ))),
        }
    }

    fn engine_error(&self, e: mysql_async::Error) -> EngineError {
        map_error(e).scrub(&self.scrub_with)
    }
}

/// Session options for one target, without pool settings.
pub(crate) fn connect_opts(target: &ConnectTarget, config: &ExecutorConfig) -> OptsBuilder {
    OptsBuilder::default()
        .ip_or_hostname(target.host())
        .tcp_port(target.port())
        .user(Some(target.username()).filter(|u| !u.is_empty()))
        .pass(target.password_opt())
        .db_name(Some(target.database()))
        .stmt_cache_size(config.statement_cache_capacity)
}

pub(crate) fn map_error(e: mysql_async::Error) -> EngineError {
    let message = e.to_string();
    match e {
        mysql_async::Error::Server(ref server) if CONNECTION_ERROR_CODES.contains(&server.code) => {
            EngineError::connection(message)
        }
        mysql_async::Error::Server(_) => EngineError::query(message),
        mysql_async::Error::Io(_) | mysql_async::Error::Url(_) => EngineError::connection(message),
        _ => EngineError::internal(message),
    }
}

/// Bind named parameters to anonymous `?` markers.
pub(crate) fn positional_params(sql: &str, params: &TypedParams) -> Result<(String, Params), EngineError> {
    let (rewritten, order) = template::rewrite_anonymous(sql);
    if order.is_empty() {
        return Ok((rewritten, Params::Empty));
    }
    let values = order
        .iter()
        .map(|name| {
            params
                .get(name)
                .map(to_mysql)
                .ok_or_else(|| EngineError::internal(format!("no value bound for parameter {}", name)))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok((rewritten, Params::Positional(values)))
}

fn into_rows(rows: Vec<mysql_async::Row>) -> Vec<Row> {
    let Some(first) = rows.first() else {
        return Vec::new();
    };
    let metadata = first.columns();
    let names = Arc::new(
        metadata
            .iter()
            .map(|column| column.name_str().into_owned())
            .collect::<Vec<_>>(),
    );

    rows.into_iter()
        .map(|row| {
            let values = row.unwrap();
            Row::new(
                Arc::clone(&names),
                values
                    .into_iter()
                    .zip(metadata.iter())
                    .map(|(value, column)| from_mysql(value, column)),
            )
        })
        .collect()
}

#[async_trait]
impl Engine for MysqlEngine {
    fn kind(&self) -> ConnectionKind {
        ConnectionKind::Mysql
    }

    #[instrument(skip_all, fields(connection_id = self.connection_id))]
    async fn query(&self, sql: &str, params: &TypedParams) -> Result<Vec<Row>, EngineError> {
        let (sql, params) = positional_params(sql, params)?;
        let mut conn = self.checkout().await?;
        let rows: Vec<mysql_async::Row> = conn
            .exec(sql, params)
            .await
            .map_err(|e| self.engine_error(e))?;
        Ok(into_rows(rows))
    }

    async fn server_version(&self) -> Result<String, EngineError> {
        let mut conn = self.checkout().await?;
        let version: Option<String> = conn
            .query_first("SELECT VERSION()")
            .await
            .map_err(|e| self.engine_error(e))?;
        version.ok_or_else(|| EngineError::internal("server returned no version"))
    }
}
