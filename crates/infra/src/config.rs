//! Runtime configuration, read from the environment.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_HISTORY_PAGE_SIZE: usize = 256;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Longest wait for a variant lock before giving up with a retryable conflict.
    pub lock_timeout: Duration,
    /// Movements fetched per round trip when iterating a variant's history.
    pub history_page_size: usize,
    /// Postgres connection string; `None` means in-memory.
    pub database_url: Option<String>,
    pub max_connections: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            history_page_size: DEFAULT_HISTORY_PAGE_SIZE,
            database_url: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl LedgerConfig {
    /// Load from `STOCKLEDGER_*` variables and `DATABASE_URL`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary variable source (tests pass a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let lock_timeout_ms = parse_or(
            &lookup,
            "STOCKLEDGER_LOCK_TIMEOUT_MS",
            DEFAULT_LOCK_TIMEOUT_MS,
        );
        let history_page_size = parse_or(
            &lookup,
            "STOCKLEDGER_HISTORY_PAGE_SIZE",
            defaults.history_page_size,
        )
        .max(1);
        let max_connections = parse_or(
            &lookup,
            "STOCKLEDGER_DB_MAX_CONNECTIONS",
            defaults.max_connections,
        )
        .max(1);
        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        Self {
            lock_timeout: Duration::from_millis(lock_timeout_ms),
            history_page_size,
            database_url,
            max_connections,
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy + core::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, default = %default, "invalid setting; using default");
                default
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(LedgerConfig::from_lookup(lookup(&[])), LedgerConfig::default());
    }

    #[test]
    fn reads_all_settings() {
        let config = LedgerConfig::from_lookup(lookup(&[
            ("STOCKLEDGER_LOCK_TIMEOUT_MS", "250"),
            ("STOCKLEDGER_HISTORY_PAGE_SIZE", "10"),
            ("STOCKLEDGER_DB_MAX_CONNECTIONS", "20"),
            ("DATABASE_URL", "postgres://localhost/ledger"),
        ]));
        assert_eq!(config.lock_timeout, Duration::from_millis(250));
        assert_eq!(config.history_page_size, 10);
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/ledger"));
    }

    #[test]
    fn invalid_values_fall_back() {
        let config = LedgerConfig::from_lookup(lookup(&[
            ("STOCKLEDGER_LOCK_TIMEOUT_MS", "soon"),
            ("STOCKLEDGER_HISTORY_PAGE_SIZE", "0"),
            ("DATABASE_URL", "  "),
        ]));
        assert_eq!(config.lock_timeout, Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS));
        assert_eq!(config.history_page_size, 1);
        assert_eq!(config.database_url, None);
    }
}
