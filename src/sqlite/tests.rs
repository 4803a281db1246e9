//! Tests for the SQLite backend.

use std::collections::HashMap;

use secrecy::SecretString;

use super::*;
use crate::descriptor::ConnectionDescriptor;
use crate::engine::{ConnectTarget, Engine, EngineErrorKind};
use crate::params::TypedParams;
use crate::value::SqlValue;

fn named(pairs: &[(&str, SqliteValue)]) -> HashMap<String, SqliteValue> {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

async fn memory_engine() -> SqliteEngine {
    let descriptor = ConnectionDescriptor::sqlite(1, ":memory:");
    let target = ConnectTarget::from_descriptor(&descriptor, SecretString::from(String::new())).unwrap();
    SqliteEngine::open(&target).await.unwrap()
}

#[tokio::test]
async fn test_query_binds_named_parameters() {
    let conn = SqliteConnection::open(":memory:").await.unwrap();
    conn.execute_batch("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT, value REAL)")
        .await
        .unwrap();

    conn.query_named(
        "INSERT INTO test (name, value) VALUES (:name, :value)",
        named(&[
            ("name", SqliteValue::Text("hello".to_string())),
            ("value", SqliteValue::Real(1.5)),
        ]),
    )
    .await
    .unwrap();

    let result = conn
        .query_named("SELECT * FROM test WHERE name = :name", named(&[("name", SqliteValue::Text("hello".to_string()))]))
        .await
        .unwrap();
    assert_eq!(*result.columns, vec!["id", "name", "value"]);
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0][1], SqliteValue::Text("hello".to_string()));
    assert_eq!(result.rows[0][2], SqliteValue::Real(1.5));
}

#[tokio::test]
async fn test_repeated_parameter_binds_once() {
    let conn = SqliteConnection::open(":memory:").await.unwrap();
    let result = conn
        .query_named("SELECT :n AS a, :n + 1 AS b", named(&[("n", SqliteValue::Integer(41))]))
        .await
        .unwrap();
    assert_eq!(result.rows[0], vec![SqliteValue::Integer(41), SqliteValue::Integer(42)]);
}

#[tokio::test]
async fn test_unbound_parameter_is_reported() {
    let conn = SqliteConnection::open(":memory:").await.unwrap();
    let err = conn.query_named("SELECT :missing", HashMap::new()).await.unwrap_err();
    assert!(matches!(err, SqliteError::Unbound(ref name) if name == "missing"));
}

#[tokio::test]
async fn test_null_and_blob_values() {
    let conn = SqliteConnection::open(":memory:").await.unwrap();
    conn.execute_batch("CREATE TABLE test (id INTEGER, data BLOB)").await.unwrap();

    let data = vec![0xDE, 0xAD, 0xBE, 0xEF];
    conn.query_named(
        "INSERT INTO test (id, data) VALUES (:id, :data)",
        named(&[("id", SqliteValue::Null), ("data", SqliteValue::Blob(data.clone()))]),
    )
    .await
    .unwrap();

    let result = conn.query_named("SELECT id, data FROM test", HashMap::new()).await.unwrap();
    assert_eq!(result.rows[0][0], SqliteValue::Null);
    assert_eq!(result.rows[0][1], SqliteValue::Blob(data));
}

#[tokio::test]
async fn test_empty_result_keeps_columns() {
    let conn = SqliteConnection::open(":memory:").await.unwrap();
    conn.execute_batch("CREATE TABLE test (id INTEGER, name TEXT)").await.unwrap();

    let result = conn.query_named("SELECT id, name FROM test", HashMap::new()).await.unwrap();
    assert!(result.rows.is_empty());
    assert_eq!(*result.columns, vec!["id", "name"]);
}

#[tokio::test]
async fn test_multiple_rows() {
    let conn = SqliteConnection::open(":memory:").await.unwrap();
    conn.execute_batch("CREATE TABLE test (id INTEGER PRIMARY KEY)").await.unwrap();

    for i in 0..100 {
        conn.query_named("INSERT INTO test (id) VALUES (:id)", named(&[("id", SqliteValue::Integer(i))]))
            .await
            .unwrap();
    }

    let result = conn.query_named("SELECT * FROM test", HashMap::new()).await.unwrap();
    assert_eq!(result.rows.len(), 100);
}

#[tokio::test]
async fn test_engine_returns_rows_in_column_order() {
    let engine = memory_engine().await;
    let mut params = TypedParams::new();
    params.insert("greeting".to_string(), SqlValue::Text("hi".to_string()));
    params.insert("flag".to_string(), SqlValue::Bool(true));

    let rows = engine
        .query("SELECT :greeting AS g, :flag AS f, NULL AS empty", &params)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].columns(), ["g", "f", "empty"]);
    assert_eq!(rows[0].get("g"), Some(&SqlValue::Text("hi".to_string())));
    assert_eq!(rows[0].get("f"), Some(&SqlValue::Int(1)));
    assert_eq!(rows[0].get("empty"), Some(&SqlValue::Null));
}

#[tokio::test]
async fn test_engine_syntax_error_is_query_error() {
    let engine = memory_engine().await;
    let err = engine.query("SELEC 1", &TypedParams::new()).await.unwrap_err();
    assert_eq!(err.kind, EngineErrorKind::Query);
}

#[tokio::test]
async fn test_engine_server_version() {
    let engine = memory_engine().await;
    let version = engine.server_version().await.unwrap();
    assert!(version.starts_with('3'));
}
