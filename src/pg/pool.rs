//! PostgreSQL connection pool.
//!
//! A semaphore bounds open connections at `pool_size + max_overflow`. Up to
//! `pool_size` idle connections are kept; extra ones are closed on return.
//! Connections are opened lazily on checkout.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace};

use super::connection::{PgConfig, PgConnection, QueryResult};
use super::error::{PgError, PgResult};
use super::types::PgValue;
use crate::config::ExecutorConfig;

// ============================================================================
// Pool Configuration
// ============================================================================

/// Connection pool configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PgPoolConfig {
    /// Idle connections kept for reuse
    pub pool_size: u32,
    /// Simultaneously open connections
    pub max_connections: u32,
    /// Check idle connections with `SELECT 1` before handing them out
    pub pre_ping: bool,
}

impl PgPoolConfig {
    pub fn new() -> Self {
        Self::from_executor(&ExecutorConfig::default())
    }

    pub fn from_executor(config: &ExecutorConfig) -> Self {
        Self {
            pool_size: config.pool_size,
            max_connections: config.max_connections(),
            pre_ping: config.pre_ping,
        }
    }

    pub fn pool_size(mut self, size: u32) -> Self {
        self.pool_size = size;
        self
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max.max(1);
        self
    }

    pub fn pre_ping(mut self, enabled: bool) -> Self {
        self.pre_ping = enabled;
        self
    }
}

impl Default for PgPoolConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Pooled Connection
// ============================================================================

/// A connection checked out from the pool.
///
/// When dropped, the connection goes back to the pool if it is reusable and
/// the pool has room for another idle connection.
pub struct PooledConnection {
    conn: Option<PgConnection>,
    pool: Arc<PgPoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    fn conn(&mut self) -> PgResult<&mut PgConnection> {
        self.conn.as_mut().ok_or(PgError::ConnectionClosed)
    }

    pub async fn simple_query(&mut self, query: &str) -> PgResult<Vec<QueryResult>> {
        self.conn()?.simple_query(query).await
    }

    pub async fn query(&mut self, query: &str, params: &[PgValue]) -> PgResult<QueryResult> {
        self.conn()?.query(query, params).await
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if !conn.is_reusable() {
            trace!(pid = conn.backend_pid(), "discarding unusable connection");
            return;
        }
        let mut idle = self.pool.idle.lock();
        if idle.len() < self.pool.config.pool_size as usize {
            idle.push(conn);
        }
        // Otherwise an overflow connection: dropping it closes the socket
    }
}

// ============================================================================
// Connection Pool
// ============================================================================

struct PgPoolInner {
    connect: PgConfig,
    config: PgPoolConfig,
    idle: Mutex<Vec<PgConnection>>,
    semaphore: Arc<Semaphore>,
}

/// A PostgreSQL connection pool.
///
/// Each pooled connection keeps its own prepared statement cache.
#[derive(Clone)]
pub struct PgPool {
    inner: Arc<PgPoolInner>,
}

impl PgPool {
    /// Create a pool; no connection is opened until the first checkout.
    pub fn new(connect: PgConfig, config: PgPoolConfig) -> Self {
        let max = config.max_connections.max(1) as usize;
        Self {
            inner: Arc::new(PgPoolInner {
                connect,
                config,
                idle: Mutex::new(Vec::new()),
                semaphore: Arc::new(Semaphore::new(max)),
            }),
        }
    }

    /// Get a connection from the pool, waiting while every slot is in use.
    pub async fn acquire(&self) -> PgResult<PooledConnection> {
        let permit = Arc::clone(&self.inner.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| PgError::Protocol("Pool closed".to_string()))?;

        let conn = match self.take_idle().await {
            Some(conn) => conn,
            None => PgConnection::connect_with_config(&self.inner.connect).await?,
        };

        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    /// Pop idle connections until one is usable (and answers a ping, if enabled).
    async fn take_idle(&self) -> Option<PgConnection> {
        loop {
            let mut conn = self.inner.idle.lock().pop()?;
            if !conn.is_reusable() {
                continue;
            }
            if !self.inner.config.pre_ping {
                return Some(conn);
            }
            match conn.ping().await {
                Ok(()) => return Some(conn),
                Err(e) => debug!(error = %e, "discarding idle connection that failed pre-ping"),
            }
        }
    }

    pub async fn simple_query(&self, query: &str) -> PgResult<Vec<QueryResult>> {
        self.acquire().await?.simple_query(query).await
    }

    pub async fn query(&self, query: &str, params: &[PgValue]) -> PgResult<QueryResult> {
        self.acquire().await?.query(query, params).await
    }

    /// Close every idle connection.
    pub async fn close(&self) {
        let connections = std::mem::take(&mut *self.inner.idle.lock());
        for mut conn in connections {
            let _ = conn.close().await;
        }
    }

    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().len()
    }

    /// Permits not currently held by a checkout.
    pub fn available(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    pub fn config(&self) -> &PgPoolConfig {
        &self.inner.config
    }
}
