use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Executor, cache and export settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Row limit applied when a query does not name one
    pub row_limit: usize,
    /// Hard cap on rows any query may return
    pub sql_max_row: usize,
    pub query_timeout_secs: u64,
    pub cache_ttl_secs: u64,
    pub cache_max_entries: u64,
    /// How long finished queries stay pollable
    pub query_retention_secs: u64,
    pub csv_delimiter: char,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            row_limit: 10_000,
            sql_max_row: 100_000,
            query_timeout_secs: 300,
            cache_ttl_secs: 86_400,
            cache_max_entries: 10_000,
            query_retention_secs: 3_600,
            csv_delimiter: ',',
        }
    }
}

impl CoreConfig {
    /// Load from environment variables
    /// TESSERA_ROW_LIMIT=10000
    /// TESSERA_SQL_MAX_ROW=100000
    /// TESSERA_QUERY_TIMEOUT_SECS=300
    /// TESSERA_CACHE_TTL_SECS=86400
    /// TESSERA_CACHE_MAX_ENTRIES=10000
    /// TESSERA_QUERY_RETENTION_SECS=3600
    /// TESSERA_CSV_DELIMITER=,
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`CoreConfig::from_env`] but reading from `lookup`; unset or
    /// unparsable values keep their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
            lookup(name).and_then(|v| v.trim().parse().ok())
        }

        Self {
            row_limit: parsed(&lookup, "TESSERA_ROW_LIMIT").unwrap_or(defaults.row_limit),
            sql_max_row: parsed(&lookup, "TESSERA_SQL_MAX_ROW").unwrap_or(defaults.sql_max_row),
            query_timeout_secs: parsed(&lookup, "TESSERA_QUERY_TIMEOUT_SECS")
                .unwrap_or(defaults.query_timeout_secs),
            cache_ttl_secs: parsed(&lookup, "TESSERA_CACHE_TTL_SECS").unwrap_or(defaults.cache_ttl_secs),
            cache_max_entries: parsed(&lookup, "TESSERA_CACHE_MAX_ENTRIES")
                .unwrap_or(defaults.cache_max_entries),
            query_retention_secs: parsed(&lookup, "TESSERA_QUERY_RETENTION_SECS")
                .unwrap_or(defaults.query_retention_secs),
            csv_delimiter: lookup("TESSERA_CSV_DELIMITER")
                .and_then(|v| {
                    let mut chars = v.chars();
                    match (chars.next(), chars.next()) {
                        (Some(c), None) => Some(c),
                        _ => None,
                    }
                })
                .unwrap_or(defaults.csv_delimiter),
        }
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn query_retention(&self) -> Duration {
        Duration::from_secs(self.query_retention_secs)
    }

    /// Row limit actually applied for a requested limit
    pub fn effective_row_limit(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.row_limit).min(self.sql_max_row)
    }
}
