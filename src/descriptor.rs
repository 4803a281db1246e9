//! Connection descriptors.
//!
//! A descriptor is the immutable description of one external database as
//! recorded by the connection store. The password stays encrypted until an
//! engine is built for it.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{ExecutionError, Result};

/// Database kinds the connection store knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionKind {
    Mysql,
    Postgresql,
    Mssql,
    Oracle,
    Sqlite,
}

impl ConnectionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionKind::Mysql => "MYSQL",
            ConnectionKind::Postgresql => "POSTGRESQL",
            ConnectionKind::Mssql => "MSSQL",
            ConnectionKind::Oracle => "ORACLE",
            ConnectionKind::Sqlite => "SQLITE",
        }
    }
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A connection record as handed over by the connection store.
///
/// `additional_params` is the raw JSON text column, if any.
#[derive(Debug, Clone, Deserialize)]
pub struct StoredConnection {
    pub id: i64,
    #[serde(default)]
    pub uuid: Option<Uuid>,
    pub database_type: ConnectionKind,
    pub host: String,
    pub port: u16,
    pub database_name: String,
    pub username: String,
    pub password_encrypted: String,
    #[serde(default)]
    pub additional_params: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// Immutable description of a target database.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    id: i64,
    uuid: Option<Uuid>,
    kind: ConnectionKind,
    host: String,
    port: u16,
    database_name: String,
    username: String,
    encrypted_password: String,
    options: BTreeMap<String, String>,
    is_active: bool,
}

impl ConnectionDescriptor {
    /// Create an active descriptor without extra options.
    pub fn new(
        id: i64,
        kind: ConnectionKind,
        host: impl Into<String>,
        port: u16,
        database_name: impl Into<String>,
        username: impl Into<String>,
        encrypted_password: impl Into<String>,
    ) -> Self {
        Self {
            id,
            uuid: None,
            kind,
            host: host.into(),
            port,
            database_name: database_name.into(),
            username: username.into(),
            encrypted_password: encrypted_password.into(),
            options: BTreeMap::new(),
            is_active: true,
        }
    }

    /// Descriptor for an embedded SQLite file (or `:memory:`).
    pub fn sqlite(id: i64, path: impl Into<String>) -> Self {
        Self::new(id, ConnectionKind::Sqlite, "", 0, path, "", "")
    }

    /// Convert a stored record, parsing its JSON options column.
    ///
    /// Malformed options fail with `ConnectionBuild`.
    pub fn from_stored(record: StoredConnection) -> Result<Self> {
        let options = match record.additional_params.as_deref() {
            Some(raw) if !raw.trim().is_empty() => {
                parse_options(raw).map_err(|reason| ExecutionError::ConnectionBuild {
                    connection_id: record.id,
                    kind: record.database_type,
                    reason: format!("malformed additional parameters: {}", reason),
                })?
            }
            _ => BTreeMap::new(),
        };

        Ok(Self {
            id: record.id,
            uuid: record.uuid,
            kind: record.database_type,
            host: record.host,
            port: record.port,
            database_name: record.database_name,
            username: record.username,
            encrypted_password: record.password_encrypted,
            options,
            is_active: record.is_active,
        })
    }

    pub fn with_uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = Some(uuid);
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn with_active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }

    /// Stable identity of the stored record (pool cache key).
    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn uuid(&self) -> Option<Uuid> {
        self.uuid
    }

    pub fn kind(&self) -> ConnectionKind {
        self.kind
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn encrypted_password(&self) -> &str {
        &self.encrypted_password
    }

    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.options
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// Digest over every field that affects how the database is reached.
    ///
    /// Two descriptors with the same identity but different fingerprints
    /// describe an edited record.
    pub fn fingerprint(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.kind.as_str().as_bytes());
        let port = self.port.to_string();
        for field in [
            self.host.as_str(),
            port.as_str(),
            self.database_name.as_str(),
            self.username.as_str(),
            self.encrypted_password.as_str(),
        ] {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field.as_bytes());
        }
        // BTreeMap iterates in key order
        for (key, value) in &self.options {
            hasher.update((key.len() as u64).to_be_bytes());
            hasher.update(key.as_bytes());
            hasher.update((value.len() as u64).to_be_bytes());
            hasher.update(value.as_bytes());
        }
        hasher.finalize().into()
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database_name", &self.database_name)
            .field("username", &self.username)
            .field("encrypted_password", &"****")
            .field("options", &self.options.keys().collect::<Vec<_>>())
            .field("is_active", &self.is_active)
            .finish()
    }
}

fn parse_options(raw: &str) -> std::result::Result<BTreeMap<String, String>, String> {
    let value: serde_json::Value = serde_json::from_str(raw).map_err(|e| e.to_string())?;

    let object = match value {
        serde_json::Value::Object(map) => map,
        serde_json::Value::Null => return Ok(BTreeMap::new()),
        _ => return Err("expected a JSON object".to_string()),
    };

    Ok(object
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (key, value)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(additional_params: Option<&str>) -> StoredConnection {
        StoredConnection {
            id: 7,
            uuid: None,
            database_type: ConnectionKind::Postgresql,
            host: "db.internal".to_string(),
            port: 5432,
            database_name: "sales".to_string(),
            username: "reporter".to_string(),
            password_encrypted: "gAAAAA".to_string(),
            additional_params: additional_params.map(str::to_string),
            is_active: true,
        }
    }

    #[test]
    fn test_kind_serde_uppercase() {
        let kind: ConnectionKind = serde_json::from_str("\"POSTGRESQL\"").unwrap();
        assert_eq!(kind, ConnectionKind::Postgresql);
        assert_eq!(serde_json::to_string(&ConnectionKind::Mssql).unwrap(), "\"MSSQL\"");
    }

    #[test]
    fn test_from_stored_parses_options() {
        let d = ConnectionDescriptor::from_stored(record(Some(
            r#"{"sslmode": "disable", "connect_retries": 3}"#,
        )))
        .unwrap();
        assert_eq!(d.options().get("sslmode").map(String::as_str), Some("disable"));
        assert_eq!(d.options().get("connect_retries").map(String::as_str), Some("3"));
    }

    #[test]
    fn test_from_stored_rejects_non_object_options() {
        assert!(matches!(
            ConnectionDescriptor::from_stored(record(Some("[1, 2]"))),
            Err(ExecutionError::ConnectionBuild { .. })
        ));
        assert!(ConnectionDescriptor::from_stored(record(Some("{not json"))).is_err());
        assert!(ConnectionDescriptor::from_stored(record(Some("   "))).is_ok());
    }

    #[test]
    fn test_fingerprint_tracks_edits() {
        let a = ConnectionDescriptor::from_stored(record(None)).unwrap();
        let b = a.clone();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let moved = ConnectionDescriptor::new(
            7,
            ConnectionKind::Postgresql,
            "db2.internal",
            5432,
            "sales",
            "reporter",
            "gAAAAA",
        );
        assert_eq!(moved.id(), a.id());
        assert_ne!(moved.fingerprint(), a.fingerprint());

        let with_option = a.clone().with_option("sslmode", "require");
        assert_ne!(with_option.fingerprint(), a.fingerprint());
    }

    #[test]
    fn test_debug_hides_ciphertext() {
        let d = ConnectionDescriptor::from_stored(record(None)).unwrap();
        let rendered = format!("{:?}", d);
        assert!(!rendered.contains("gAAAAA"));
    }
}
