//! Kind dispatch to the wire backends.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{ConnectTarget, Engine, EngineError, EngineFactory};
use crate::config::ExecutorConfig;
use crate::descriptor::ConnectionKind;
use crate::mysql::MysqlEngine;
use crate::pg::PgEngine;
use crate::sqlite::SqliteEngine;

/// Builds the real engine for each supported kind.
///
/// Network engines connect lazily, so building one never touches the
/// network. SQLite opens its file immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultEngineFactory;

impl DefaultEngineFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EngineFactory for DefaultEngineFactory {
    async fn build(
        &self,
        target: ConnectTarget,
        config: &ExecutorConfig,
    ) -> Result<Arc<dyn Engine>, EngineError> {
        debug!(connection_id = target.connection_id(), kind = %target.kind(), "dispatching engine build");

        match target.kind() {
            ConnectionKind::Postgresql => Ok(Arc::new(PgEngine::new(&target, config))),
            ConnectionKind::Mysql => Ok(Arc::new(MysqlEngine::new(&target, config))),
            ConnectionKind::Sqlite => Ok(Arc::new(SqliteEngine::open(&target).await?)),
            other => Err(EngineError::internal(format!(
                "Database type {} is not supported yet",
                other
            ))),
        }
    }
}
