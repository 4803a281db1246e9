//! Query execution pipeline.
//!
//! One call validates the template against the supplied params, coerces
//! them to their declared types, acquires the descriptor's engine and runs
//! the statement on a connection borrowed for that call only.

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::descriptor::ConnectionDescriptor;
use crate::engine::{EngineError, EngineErrorKind, EnginePool};
use crate::error::{ExecutionError, Result};
use crate::params::{self, ParameterSpecs};
use crate::template::{self, RawParams};
use crate::value::Row;

/// Where an execution is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Received,
    Validated,
    Coerced,
    ConnectionAcquired,
    Executed,
    Completed,
    /// Carries the stable code of the error that stopped the execution
    Failed(&'static str),
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionState::Received => f.write_str("received"),
            ExecutionState::Validated => f.write_str("validated"),
            ExecutionState::Coerced => f.write_str("coerced"),
            ExecutionState::ConnectionAcquired => f.write_str("connection_acquired"),
            ExecutionState::Executed => f.write_str("executed"),
            ExecutionState::Completed => f.write_str("completed"),
            ExecutionState::Failed(code) => write!(f, "failed({})", code),
        }
    }
}

/// Rows and timing of one successful execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub executed_at: DateTime<Utc>,
    pub row_count: usize,
    pub data: Vec<Row>,
    pub execution_time_ms: u64,
}

/// Body of an execute request, as the HTTP layer receives it.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub params: RawParams,
    #[serde(default)]
    pub version_id: Option<Uuid>,
}

/// Runs SQL templates against the engines of an `EnginePool`.
pub struct QueryExecutor {
    engines: EnginePool,
}

impl QueryExecutor {
    pub fn new(engines: EnginePool) -> Self {
        Self { engines }
    }

    pub fn engines(&self) -> &EnginePool {
        &self.engines
    }

    /// Execute a template with caller-supplied params.
    ///
    /// Only parameter names are logged, never their values.
    #[instrument(
        skip_all,
        fields(connection_id = descriptor.map(ConnectionDescriptor::id))
    )]
    pub async fn execute(
        &self,
        sql_template: &str,
        raw_params: &RawParams,
        specs: Option<&ParameterSpecs>,
        descriptor: Option<&ConnectionDescriptor>,
    ) -> Result<ExecutionResult> {
        transition(ExecutionState::Received);

        let outcome = self.run(sql_template, raw_params, specs, descriptor).await;
        match &outcome {
            Ok(result) => {
                transition(ExecutionState::Completed);
                info!(
                    row_count = result.row_count,
                    execution_time_ms = result.execution_time_ms,
                    "query executed"
                );
            }
            Err(e) => {
                transition(ExecutionState::Failed(e.code()));
                match e {
                    ExecutionError::Internal { detail } => {
                        error!(code = e.code(), detail = %detail, "query execution failed")
                    }
                    other => warn!(code = other.code(), error = %other, "query execution failed"),
                }
            }
        }
        outcome
    }

    async fn run(
        &self,
        sql_template: &str,
        raw_params: &RawParams,
        specs: Option<&ParameterSpecs>,
        descriptor: Option<&ConnectionDescriptor>,
    ) -> Result<ExecutionResult> {
        let descriptor = descriptor.ok_or(ExecutionError::NoConnectionConfigured)?;
        if !descriptor.is_active() {
            return Err(ExecutionError::ConnectionInactive {
                connection_id: descriptor.id(),
            });
        }

        let started = Instant::now();

        let prepared = template::prepare(sql_template, raw_params)?;
        debug!(params = ?prepared.placeholders, "template validated");
        transition(ExecutionState::Validated);

        let typed = params::coerce(&prepared.params, specs)?;
        transition(ExecutionState::Coerced);

        let engine = self.engines.acquire(descriptor).await?;
        transition(ExecutionState::ConnectionAcquired);

        let statement = engine.query(&prepared.sql, &typed);
        let rows = match self.engines.config().statement_timeout {
            Some(limit) => match tokio::time::timeout(limit, statement).await {
                Ok(rows) => rows,
                Err(_) => return Err(timed_out(limit)),
            },
            None => statement.await,
        }
        .map_err(from_engine)?;
        transition(ExecutionState::Executed);

        let execution_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        Ok(ExecutionResult {
            executed_at: Utc::now(),
            row_count: rows.len(),
            data: rows,
            execution_time_ms,
        })
    }
}

fn transition(state: ExecutionState) {
    debug!(state = %state, "execution state");
}

fn timed_out(limit: Duration) -> ExecutionError {
    ExecutionError::QueryExecution {
        message: format!("statement timed out after {} ms", limit.as_millis()),
    }
}

/// Engine messages are already scrubbed of the credential.
fn from_engine(e: EngineError) -> ExecutionError {
    match e.kind {
        EngineErrorKind::Query | EngineErrorKind::Connection => {
            ExecutionError::QueryExecution { message: e.message }
        }
        EngineErrorKind::Internal => ExecutionError::Internal { detail: e.message },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::config::ExecutorConfig;
    use crate::credentials::FernetResolver;
    use crate::descriptor::ConnectionKind;
    use crate::engine::testing::CountingFactory;
    use crate::engine::DefaultEngineFactory;
    use crate::params::{ParamType, ParameterSpec};
    use crate::value::SqlValue;

    fn params(value: serde_json::Value) -> RawParams {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn sqlite_executor() -> QueryExecutor {
        QueryExecutor::new(EnginePool::new(
            Arc::new(DefaultEngineFactory::new()),
            Arc::new(FernetResolver::without_key()),
            ExecutorConfig::default(),
        ))
    }

    fn fake_executor(factory: Arc<CountingFactory>, config: ExecutorConfig) -> QueryExecutor {
        QueryExecutor::new(EnginePool::new(
            factory,
            Arc::new(FernetResolver::without_key()),
            config,
        ))
    }

    fn postgres_descriptor() -> ConnectionDescriptor {
        ConnectionDescriptor::new(7, ConnectionKind::Postgresql, "db.internal", 5432, "app", "reader", "")
    }

    #[tokio::test]
    async fn test_select_greeting_end_to_end() {
        let executor = sqlite_executor();
        let descriptor = ConnectionDescriptor::sqlite(1, ":memory:");

        let result = executor
            .execute(
                "SELECT :greeting AS g",
                &params(json!({"greeting": "hi"})),
                None,
                Some(&descriptor),
            )
            .await
            .unwrap();

        assert_eq!(result.row_count, 1);
        assert_eq!(serde_json::to_value(&result.data).unwrap(), json!([{"g": "hi"}]));
    }

    #[tokio::test]
    async fn test_concurrent_executions_echo_their_own_input() {
        let executor = Arc::new(sqlite_executor());
        let descriptor = ConnectionDescriptor::sqlite(2, ":memory:");

        let handles: Vec<_> = (0..50)
            .map(|n| {
                let executor = Arc::clone(&executor);
                let descriptor = descriptor.clone();
                tokio::spawn(async move {
                    let result = executor
                        .execute("SELECT :n AS n", &params(json!({"n": n})), None, Some(&descriptor))
                        .await
                        .unwrap();
                    (n, result)
                })
            })
            .collect();

        for handle in handles {
            let (n, result) = handle.await.unwrap();
            assert_eq!(result.row_count, 1);
            assert_eq!(result.data[0].get("n"), Some(&SqlValue::Int(n)));
        }
        assert_eq!(executor.engines().len(), 1);
    }

    #[tokio::test]
    async fn test_declared_types_reach_the_engine() {
        let executor = sqlite_executor();
        let descriptor = ConnectionDescriptor::sqlite(3, ":memory:");
        let specs = ParameterSpecs::new()
            .with("day", ParameterSpec::new(ParamType::Date))
            .with("limit", ParameterSpec::new(ParamType::Integer));

        let result = executor
            .execute(
                "SELECT :day AS day, :limit * 2 AS doubled",
                &params(json!({"day": "2024-01-31", "limit": "21", "unused": 1})),
                Some(&specs),
                Some(&descriptor),
            )
            .await
            .unwrap();

        assert_eq!(result.data[0].get("day"), Some(&SqlValue::Text("2024-01-31".into())));
        assert_eq!(result.data[0].get("doubled"), Some(&SqlValue::Int(42)));
    }

    #[tokio::test]
    async fn test_sql_error_becomes_query_execution_error() {
        let executor = sqlite_executor();
        let descriptor = ConnectionDescriptor::sqlite(4, ":memory:");

        let err = executor
            .execute("SELECT * FROM missing_table", &RawParams::new(), None, Some(&descriptor))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::QueryExecution { .. }));
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn test_no_descriptor() {
        let executor = sqlite_executor();
        let err = executor
            .execute("SELECT 1", &RawParams::new(), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::NoConnectionConfigured));
    }

    #[tokio::test]
    async fn test_inactive_descriptor_never_builds() {
        let factory = Arc::new(CountingFactory::default());
        let executor = fake_executor(Arc::clone(&factory), ExecutorConfig::default());
        let descriptor = postgres_descriptor().with_active(false);

        let err = executor
            .execute("SELECT 1", &RawParams::new(), None, Some(&descriptor))
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionError::ConnectionInactive { connection_id: 7 }));
        assert_eq!(factory.builds(), 0);
    }

    #[tokio::test]
    async fn test_missing_params_fail_before_acquire() {
        let factory = Arc::new(CountingFactory::default());
        let executor = fake_executor(Arc::clone(&factory), ExecutorConfig::default());

        let err = executor
            .execute(
                "SELECT :a, :b",
                &params(json!({"a": 1})),
                None,
                Some(&postgres_descriptor()),
            )
            .await
            .unwrap_err();

        match err {
            ExecutionError::MissingParameter { names } => assert_eq!(names, vec!["b"]),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(factory.builds(), 0);
    }

    #[tokio::test]
    async fn test_invalid_integer_fails() {
        let factory = Arc::new(CountingFactory::default());
        let executor = fake_executor(Arc::clone(&factory), ExecutorConfig::default());
        let specs = ParameterSpecs::new().with("n", ParameterSpec::new(ParamType::Integer));

        let err = executor
            .execute(
                "SELECT :n",
                &params(json!({"n": "abc"})),
                Some(&specs),
                Some(&postgres_descriptor()),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ExecutionError::InvalidParameterFormat { ref name, expected: "integer" } if name == "n"
        ));
        assert_eq!(factory.builds(), 0);
    }

    #[tokio::test]
    async fn test_engine_is_reused_across_executions() {
        let factory = Arc::new(CountingFactory::default());
        let executor = fake_executor(Arc::clone(&factory), ExecutorConfig::default());
        let descriptor = postgres_descriptor();

        for i in 0..5 {
            let result = executor
                .execute("SELECT :i", &params(json!({"i": i})), None, Some(&descriptor))
                .await
                .unwrap();
            assert_eq!(result.data[0].get("i"), Some(&SqlValue::Int(i)));
        }
        assert_eq!(factory.builds(), 1);
    }

    #[tokio::test]
    async fn test_statement_timeout() {
        let factory = Arc::new(CountingFactory {
            query_delay: Some(Duration::from_millis(200)),
            ..Default::default()
        });
        let config = ExecutorConfig::default().statement_timeout(Some(Duration::from_millis(20)));
        let executor = fake_executor(factory, config);

        let err = executor
            .execute("SELECT 1", &RawParams::new(), None, Some(&postgres_descriptor()))
            .await
            .unwrap_err();

        match err {
            ExecutionError::QueryExecution { message } => {
                assert_eq!(message, "statement timed out after 20 ms")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_build_failure_is_connection_build_error() {
        let factory = Arc::new(CountingFactory {
            fail: true,
            ..Default::default()
        });
        let executor = fake_executor(factory, ExecutorConfig::default());

        let err = executor
            .execute("SELECT 1", &RawParams::new(), None, Some(&postgres_descriptor()))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::ConnectionBuild { connection_id: 7, .. }));
    }

    #[test]
    fn test_internal_engine_error_is_generic_to_callers() {
        let err = from_engine(EngineError::internal("decoder exploded"));
        assert_eq!(err.status_code(), 500);
        assert!(!err.public_message().contains("decoder exploded"));
    }

    #[test]
    fn test_execute_request_defaults() {
        let request: ExecuteRequest = serde_json::from_str("{}").unwrap();
        assert!(request.params.is_empty());
        assert!(request.version_id.is_none());
    }

    #[test]
    fn test_result_serializes_fields() {
        let result = ExecutionResult {
            executed_at: Utc::now(),
            row_count: 0,
            data: Vec::new(),
            execution_time_ms: 3,
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["row_count"], json!(0));
        assert_eq!(value["execution_time_ms"], json!(3));
        assert_eq!(value["data"], json!([]));
        assert!(value["executed_at"].is_string());
    }
}
