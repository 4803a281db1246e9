//! Executor configuration.

use std::time::Duration;

use serde::Deserialize;

pub const POOL_SIZE_ENV: &str = "QUERYHUB_POOL_SIZE";
pub const MAX_OVERFLOW_ENV: &str = "QUERYHUB_MAX_OVERFLOW";
pub const CONNECT_TIMEOUT_ENV: &str = "QUERYHUB_CONNECT_TIMEOUT_MS";
pub const STATEMENT_TIMEOUT_ENV: &str = "QUERYHUB_STATEMENT_TIMEOUT_MS";

/// Settings shared by every engine the pool builds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Connections kept open per network engine
    pub pool_size: u32,
    /// Extra connections allowed under load, closed when returned
    pub max_overflow: u32,
    /// Check idle connections before handing them out
    pub pre_ping: bool,
    /// Bound on TCP connect plus authentication
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    /// Bound on one statement; `None` disables
    #[serde(with = "optional_duration_ms")]
    pub statement_timeout: Option<Duration>,
    /// Prepared statements cached per PostgreSQL connection
    pub statement_cache_capacity: usize,
    /// Reported to servers that accept it
    pub application_name: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            pool_size: 5,
            max_overflow: 10,
            pre_ping: true,
            connect_timeout: Duration::from_secs(5),
            statement_timeout: Some(Duration::from_secs(30)),
            statement_cache_capacity: 100,
            application_name: "queryhub".to_string(),
        }
    }
}

impl ExecutorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `QUERYHUB_*` variables.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(size) = parse_var::<u32>(&lookup, POOL_SIZE_ENV) {
            config.pool_size = size;
        }
        if let Some(overflow) = parse_var::<u32>(&lookup, MAX_OVERFLOW_ENV) {
            config.max_overflow = overflow;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, CONNECT_TIMEOUT_ENV) {
            config.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, STATEMENT_TIMEOUT_ENV) {
            config.statement_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }

        config
    }

    /// Set the number of persistent connections per engine.
    pub fn pool_size(mut self, size: u32) -> Self {
        self.pool_size = size;
        self
    }

    /// Set how many connections may be opened beyond `pool_size`.
    pub fn max_overflow(mut self, overflow: u32) -> Self {
        self.max_overflow = overflow;
        self
    }

    pub fn pre_ping(mut self, enabled: bool) -> Self {
        self.pre_ping = enabled;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn statement_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.statement_timeout = timeout;
        self
    }

    pub fn statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.statement_cache_capacity = capacity;
        self
    }

    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    /// Upper bound on simultaneously open connections per engine.
    pub fn max_connections(&self) -> u32 {
        self.pool_size.saturating_add(self.max_overflow).max(1)
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = key, value = %raw, "ignoring unparseable setting");
            None
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod optional_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    /// `null` and `0` both disable the timeout.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let ms = Option::<u64>::deserialize(deserializer)?;
        Ok(ms.filter(|ms| *ms > 0).map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ExecutorConfig::default();
        assert_eq!(config.pool_size, 5);
        assert_eq!(config.max_overflow, 10);
        assert!(config.pre_ping);
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.statement_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.max_connections(), 15);
    }

    #[test]
    fn test_builder() {
        let config = ExecutorConfig::new()
            .pool_size(2)
            .max_overflow(0)
            .pre_ping(false)
            .statement_timeout(None)
            .statement_cache_capacity(10)
            .application_name("reports");

        assert_eq!(config.pool_size, 2);
        assert_eq!(config.max_connections(), 2);
        assert!(!config.pre_ping);
        assert_eq!(config.statement_timeout, None);
        assert_eq!(config.statement_cache_capacity, 10);
        assert_eq!(config.application_name, "reports");
    }

    #[test]
    fn test_from_env_overrides() {
        let config = ExecutorConfig::from_lookup(lookup(&[
            (POOL_SIZE_ENV, "8"),
            (MAX_OVERFLOW_ENV, " 2 "),
            (CONNECT_TIMEOUT_ENV, "1500"),
            (STATEMENT_TIMEOUT_ENV, "0"),
        ]));
        assert_eq!(config.pool_size, 8);
        assert_eq!(config.max_overflow, 2);
        assert_eq!(config.connect_timeout, Duration::from_millis(1500));
        assert_eq!(config.statement_timeout, None);
    }

    #[test]
    fn test_from_env_ignores_garbage() {
        let config = ExecutorConfig::from_lookup(lookup(&[(POOL_SIZE_ENV, "many")]));
        assert_eq!(config.pool_size, 5);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: ExecutorConfig =
            serde_json::from_str(r#"{"pool_size": 3, "statement_timeout": 250}"#).unwrap();
        assert_eq!(config.pool_size, 3);
        assert_eq!(config.max_overflow, 10);
        assert_eq!(config.statement_timeout, Some(Duration::from_millis(250)));

        let disabled: ExecutorConfig =
            serde_json::from_str(r#"{"statement_timeout": null}"#).unwrap();
        assert_eq!(disabled.statement_timeout, None);
    }
}
