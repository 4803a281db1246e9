//! MySQL backend built on `mysql_async`.
//!
//! - `types`: conversions between driver values and `SqlValue`
//! - `engine`: the pooled `Engine` used by the executor

pub mod engine;
pub mod types;


pub use engine::MysqlEngine;
