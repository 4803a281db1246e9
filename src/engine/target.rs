//! Connection targets and per-kind strategy.

use std::collections::BTreeMap;
use std::fmt;

use secrecy::{ExposeSecret, SecretString};

use crate::descriptor::{ConnectionDescriptor, ConnectionKind};

/// How one database kind is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindStrategy {
    pub kind: ConnectionKind,
    /// URL scheme used in rendered connection strings
    pub scheme: &'static str,
    pub default_port: u16,
    /// Network kinds keep a connection pool; embedded kinds a single handle
    pub pooled: bool,
    /// Whether an engine can be built for this kind
    pub supported: bool,
}

const STRATEGIES: [KindStrategy; 5] = [
    KindStrategy {
        kind: ConnectionKind::Mysql,
        scheme: "mysql",
        default_port: 3306,
        pooled: true,
        supported: true,
    },
    KindStrategy {
        kind: ConnectionKind::Postgresql,
        scheme: "postgresql",
        default_port: 5432,
        pooled: true,
        supported: true,
    },
    KindStrategy {
        kind: ConnectionKind::Mssql,
        scheme: "mssql",
        default_port: 1433,
        pooled: true,
        supported: false,
    },
    KindStrategy {
        kind: ConnectionKind::Oracle,
        scheme: "oracle",
        default_port: 1521,
        pooled: true,
        supported: false,
    },
    KindStrategy {
        kind: ConnectionKind::Sqlite,
        scheme: "sqlite",
        default_port: 0,
        pooled: false,
        supported: true,
    },
];

impl KindStrategy {
    pub fn for_kind(kind: ConnectionKind) -> &'static KindStrategy {
        let index = match kind {
            ConnectionKind::Mysql => 0,
            ConnectionKind::Postgresql => 1,
            ConnectionKind::Mssql => 2,
            ConnectionKind::Oracle => 3,
            ConnectionKind::Sqlite => 4,
        };
        &STRATEGIES[index]
    }

    pub fn all() -> &'static [KindStrategy] {
        &STRATEGIES
    }
}

/// A descriptor whose password has been resolved, ready for a driver.
pub struct ConnectTarget {
    connection_id: i64,
    kind: ConnectionKind,
    host: String,
    port: u16,
    database: String,
    username: String,
    password: SecretString,
    options: BTreeMap<String, String>,
}

impl ConnectTarget {
    /// Validate the descriptor and attach the plaintext password.
    ///
    /// `localhost` becomes `127.0.0.1` so drivers connect over IPv4.
    pub fn from_descriptor(
        descriptor: &ConnectionDescriptor,
        password: SecretString,
    ) -> Result<Self, String> {
        let strategy = KindStrategy::for_kind(descriptor.kind());

        if descriptor.database_name().trim().is_empty() {
            return Err("database name is empty".to_string());
        }
        if strategy.pooled {
            if descriptor.host().trim().is_empty() {
                return Err("host is empty".to_string());
            }
            if descriptor.port() == 0 {
                return Err("port must be between 1 and 65535".to_string());
            }
        }

        let host = if descriptor.host().eq_ignore_ascii_case("localhost") {
            "127.0.0.1".to_string()
        } else {
            descriptor.host().to_string()
        };

        Ok(Self {
            connection_id: descriptor.id(),
            kind: descriptor.kind(),
            host,
            port: descriptor.port(),
            database: descriptor.database_name().to_string(),
            username: descriptor.username().to_string(),
            password,
            options: descriptor.options().clone(),
        })
    }

    pub fn connection_id(&self) -> i64 {
        self.connection_id
    }

    pub fn kind(&self) -> ConnectionKind {
        self.kind
    }

    pub fn strategy(&self) -> &'static KindStrategy {
        KindStrategy::for_kind(self.kind)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &SecretString {
        &self.password
    }

    /// The password, or `None` when the descriptor stores none.
    pub fn password_opt(&self) -> Option<&str> {
        let password: &str = self.password.expose_secret();
        (!password.is_empty()).then_some(password)
    }

    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.options
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Connection string with the password masked, for logs.
    pub fn redacted_url(&self) -> String {
        let strategy = self.strategy();
        if !strategy.pooled {
            return format!("{}:///{}", strategy.scheme, self.database);
        }

        let mut url = format!("{}://", strategy.scheme);
        if !self.username.is_empty() {
            url.push_str(&self.username);
            if self.password_opt().is_some() {
                url.push_str(":****");
            }
            url.push('@');
        }
        url.push_str(&format!("{}:{}/{}", self.host, self.port, self.database));

        let query: Vec<String> = self
            .options
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query.join("&"));
        }
        url
    }
}

impl fmt::Debug for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectTarget")
            .field("connection_id", &self.connection_id)
            .field("url", &self.redacted_url())
            .finish()
    }
}
