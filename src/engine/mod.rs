//! Engines: one reusable, pooled handle per external database.
//!
//! - `target`: connection targets and the per-kind strategy table
//! - `pool`: identity-keyed engine cache
//! - `factory`: kind dispatch to the wire backends

pub mod factory;
pub mod pool;
pub mod target;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::config::ExecutorConfig;
use crate::credentials::redact;
use crate::descriptor::ConnectionKind;
use crate::params::TypedParams;
use crate::value::Row;

pub use factory::DefaultEngineFactory;
pub use pool::EnginePool;
pub use target::{ConnectTarget, KindStrategy};

/// Which side of the boundary an engine failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    /// The database rejected or failed the statement
    Query,
    /// The database could not be reached or authenticated against
    Connection,
    /// Anything the driver did not expect
    Internal,
}

/// A driver failure with the credential already scrubbed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    pub kind: EngineErrorKind,
    pub message: String,
}

impl EngineError {
    pub fn query(message: impl Into<String>) -> Self {
        Self {
            kind: EngineErrorKind::Query,
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            kind: EngineErrorKind::Connection,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: EngineErrorKind::Internal,
            message: message.into(),
        }
    }

    /// Remove any occurrence of the plaintext credential from the message.
    pub fn scrub(mut self, secret: &SecretString) -> Self {
        self.message = redact(&self.message, secret);
        self
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for EngineError {}

/// A pooled handle to one external database.
///
/// Each call borrows its own physical connection for the duration of the
/// statement, so an engine can serve many executions at once.
#[async_trait]
pub trait Engine: Send + Sync {
    fn kind(&self) -> ConnectionKind;

    /// Run one statement with named parameters and materialize every row.
    async fn query(&self, sql: &str, params: &TypedParams) -> Result<Vec<Row>, EngineError>;

    /// The server's version string, as reported by the kind's version query.
    async fn server_version(&self) -> Result<String, EngineError>;
}

/// Builds engines for connection targets.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn build(
        &self,
        target: ConnectTarget,
        config: &ExecutorConfig,
    ) -> Result<Arc<dyn Engine>, EngineError>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fakes shared by engine and executor tests.

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::value::SqlValue;

    /// Echoes its parameters back as a single row.
    pub struct EchoEngine {
        pub kind: ConnectionKind,
        pub delay: Option<Duration>,
    }

    #[async_trait]
    impl Engine for EchoEngine {
        fn kind(&self) -> ConnectionKind {
            self.kind
        }

        async fn query(&self, _sql: &str, params: &TypedParams) -> Result<Vec<Row>, EngineError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let columns = Arc::new(params.keys().cloned().collect::<Vec<_>>());
            let values: Vec<SqlValue> = params.values().cloned().collect();
            Ok(vec![Row::new(columns, values)])
        }

        async fn server_version(&self) -> Result<String, EngineError> {
            Ok("Echo 1.0".to_string())
        }
    }

    /// Counts builds and hands out echo engines.
    #[derive(Default)]
    pub struct CountingFactory {
        pub builds: AtomicUsize,
        pub fail: bool,
        pub build_delay: Option<Duration>,
        pub query_delay: Option<Duration>,
    }

    impl CountingFactory {
        pub fn builds(&self) -> usize {
            self.builds.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EngineFactory for CountingFactory {
        async fn build(
            &self,
            target: ConnectTarget,
            _config: &ExecutorConfig,
        ) -> Result<Arc<dyn Engine>, EngineError> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.build_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(EngineError::connection("connection refused"));
            }
            Ok(Arc::new(EchoEngine {
                kind: target.kind(),
                delay: self.query_delay,
            }))
        }
    }
}
