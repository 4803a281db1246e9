//! queryhub: execute stored, parameterized SQL templates against pooled
//! connections to registered external databases.
//!
//! The pipeline is validate → coerce → acquire engine → execute:
//!
//! - `template`: `:name` placeholder extraction and parameter filtering
//! - `params`: declared parameter types and coercion
//! - `credentials`: Fernet decryption of stored passwords
//! - `engine`: identity-keyed engine cache and kind dispatch
//! - `pg`, `mysql`, `sqlite`: wire backends
//! - `executor`: the orchestrating `QueryExecutor`
//! - `probe`: connection test for the connection form

pub mod config;
pub mod credentials;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod executor;
pub mod logging;
pub mod mysql;
pub mod params;
pub mod pg;
pub mod probe;
pub mod sqlite;
pub mod template;
pub mod value;

pub use config::ExecutorConfig;
pub use credentials::{CredentialError, CredentialResolver, FernetKey, FernetResolver};
pub use descriptor::{ConnectionDescriptor, ConnectionKind, StoredConnection};
pub use engine::{DefaultEngineFactory, Engine, EngineError, EngineFactory, EnginePool};
pub use error::{ExecutionError, Result};
pub use executor::{ExecuteRequest, ExecutionResult, ExecutionState, QueryExecutor};
pub use logging::init_logging;
pub use params::{ParamType, ParameterSpec, ParameterSpecs, TypedParams};
pub use probe::{test_connection, ProbeOutcome};
pub use template::{PreparedQuery, RawParams};
pub use value::{Row, SqlValue};
