//! SQLite connection over tokio-rusqlite.
//!
//! The wrapped connection lives on a dedicated background thread, so every
//! call is serialized and never blocks the async runtime.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio_rusqlite::Connection;

use super::error::{SqliteError, SqliteResult};
use super::types::SqliteValue;
use crate::value::SharedColumns;

/// Rows of a completed statement.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub columns: SharedColumns,
    pub rows: Vec<Vec<SqliteValue>>,
}

/// An async SQLite connection.
pub struct SqliteConnection {
    conn: Connection,
    path: String,
}

impl SqliteConnection {
    /// Open a database file, or an in-memory database for `:memory:`.
    pub async fn open(path: &str) -> SqliteResult<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory().await?
        } else {
            Connection::open(Path::new(path)).await?
        };

        if path != ":memory:" {
            conn.call(|conn| {
                conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
                Ok(())
            })
            .await?;
        }

        Ok(Self {
            conn,
            path: path.to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Run a statement binding each `:name` parameter from `params`.
    pub async fn query_named(
        &self,
        sql: &str,
        params: HashMap<String, SqliteValue>,
    ) -> SqliteResult<QueryResult> {
        let sql = sql.to_string();
        let outcome = self
            .conn
            .call(move |conn| Ok(run_named(conn, &sql, &params)))
            .await?;
        outcome
    }

    /// Execute several statements without parameters.
    pub async fn execute_batch(&self, sql: &str) -> SqliteResult<()> {
        let sql = sql.to_string();
        self.conn
            .call(move |conn| {
                conn.execute_batch(&sql)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// The linked SQLite library version.
    pub async fn version(&self) -> SqliteResult<String> {
        let version = self
            .conn
            .call(|conn| {
                let version: String = conn.query_row("SELECT sqlite_version()", [], |row| row.get(0))?;
                Ok(version)
            })
            .await?;
        Ok(version)
    }

    /// Close the connection and stop the background thread.
    pub async fn close(self) -> SqliteResult<()> {
        self.conn.close().await.map_err(SqliteError::from)
    }
}

fn run_named(
    conn: &mut rusqlite::Connection,
    sql: &str,
    params: &HashMap<String, SqliteValue>,
) -> SqliteResult<QueryResult> {
    let mut stmt = conn.prepare_cached(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();

    for index in 1..=stmt.parameter_count() {
        let name = stmt
            .parameter_name(index)
            .map(|n| n.trim_start_matches([':', '@', '$']).to_string())
            .unwrap_or_else(|| format!("?{}", index));
        match params.get(&name) {
            Some(value) => stmt.raw_bind_parameter(index, value)?,
            None => return Err(SqliteError::Unbound(name)),
        }
    }

    let columns = Arc::new(columns);
    let width = columns.len();
    let mut rows = Vec::new();
    let mut cursor = stmt.raw_query();
    while let Some(row) = cursor.next()? {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(SqliteValue::from_value_ref(row.get_ref(i)?));
        }
        rows.push(values);
    }

    Ok(QueryResult { columns, rows })
}
