//! Custom PostgreSQL wire protocol client.
//!
//! A small PostgreSQL v3 client that:
//! - Sends typed parameters in binary and untyped literals as text
//! - Caches prepared statements per connection
//! - Pools connections with overflow and pre-ping
//!
//! Architecture:
//! - `protocol`: Low-level wire protocol encoding/decoding
//! - `connection`: Connection state machine and management
//! - `types`: PostgreSQL type encoding/decoding
//! - `statement`: Prepared statement cache
//! - `pool`: Connection pool
//! - `engine`: the `Engine` seam used by the executor

pub mod connection;
pub mod engine;
pub mod error;
pub mod pool;
pub mod protocol;
pub mod scram;
pub mod statement;
pub mod types;

#[cfg(test)]
mod tests;

pub use connection::{PgConfig, PgConnection};
pub use engine::PgEngine;
pub use error::{PgError, PgResult};
pub use pool::{PgPool, PgPoolConfig, PooledConnection};
pub use types::{Oid, PgValue};
