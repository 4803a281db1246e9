//! SQLite backend built on tokio-rusqlite.
//!
//! - `connection`: async connection with named-parameter binding
//! - `types`: storage-class conversions
//! - `engine`: the `Engine` seam used by the executor

pub mod connection;
pub mod engine;
pub mod error;
pub mod types;

#[cfg(test)]
mod tests;

pub use connection::{QueryResult, SqliteConnection};
pub use engine::SqliteEngine;
pub use error::{SqliteError, SqliteResult};
pub use types::SqliteValue;
