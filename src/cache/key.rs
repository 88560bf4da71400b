//! Deterministic cache fingerprints

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use super::CacheError;
use crate::config::CoreConfig;
use crate::engine::TimeGrain;
use crate::query::{Filter, RenderedQuery};

/// Bumped whenever the key material changes shape
pub const KEY_FORMAT_VERSION: u32 = 1;

/// Hex SHA-256 digest identifying one semantic query
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything that changes the result of a query, in serialization order
#[derive(Serialize)]
struct KeyMaterial<'a> {
    version: u32,
    datasource: &'a str,
    dialect: &'a str,
    sql: &'a str,
    groupby: &'a [String],
    metrics: &'a [String],
    columns: &'a [String],
    filters: &'a [Filter],
    granularity: Option<&'a str>,
    time_grain: Option<TimeGrain>,
    since: Option<NaiveDateTime>,
    until: Option<NaiveDateTime>,
    row_limit: Option<usize>,
    extras: &'a BTreeMap<String, serde_json::Value>,
    sql_max_row: usize,
}

#[derive(Debug, Clone)]
pub struct CacheKeyComputer {
    sql_max_row: usize,
}

impl CacheKeyComputer {
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            sql_max_row: config.sql_max_row,
        }
    }

    pub fn compute(&self, query: &RenderedQuery) -> Result<Fingerprint, CacheError> {
        let material = KeyMaterial {
            version: KEY_FORMAT_VERSION,
            datasource: &query.datasource_uid,
            dialect: &query.dialect,
            sql: &query.sql,
            groupby: &query.groupby,
            metrics: &query.metrics,
            columns: &query.columns,
            filters: &query.filters,
            granularity: query.granularity.as_deref(),
            time_grain: query.time_grain,
            since: query.since,
            until: query.until,
            row_limit: query.row_limit,
            extras: &query.extras,
            sql_max_row: self.sql_max_row,
        };
        // serde_json maps are key-sorted, so nested extras are canonical too
        let canonical = serde_json::to_vec(&material).map_err(|e| CacheError::Encode(e.to_string()))?;
        Ok(Fingerprint(hex::encode(Sha256::digest(&canonical))))
    }
}

/// Fingerprint of `query` under `config`
pub fn compute(query: &RenderedQuery, config: &CoreConfig) -> Result<Fingerprint, CacheError> {
    CacheKeyComputer::new(config).compute(query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::FilterOp;

    fn base() -> RenderedQuery {
        let mut query = RenderedQuery::from_sql(
            "3__table",
            "sqlite",
            "SELECT name, COUNT(*) FROM birth_names GROUP BY name",
            Some(100),
        );
        query.groupby = vec!["name".into(), "gender".into()];
        query.metrics = vec!["count".into()];
        query.granularity = Some("ds".into());
        query
    }

    #[test]
    fn test_identical_inputs_identical_keys() {
        let config = CoreConfig::default();
        let key = compute(&base(), &config).unwrap();
        assert_eq!(key, compute(&base(), &config).unwrap());
        assert_eq!(key.as_str().len(), 64);
    }

    #[test]
    fn test_semantic_changes_change_key() {
        let config = CoreConfig::default();
        let key = compute(&base(), &config).unwrap();

        let mut reordered = base();
        reordered.groupby.reverse();
        assert_ne!(key, compute(&reordered, &config).unwrap());

        let mut filtered = base();
        filtered.filters.push(Filter::new("gender", FilterOp::Eq, serde_json::json!("boy")));
        assert_ne!(key, compute(&filtered, &config).unwrap());

        let mut limited = base();
        limited.row_limit = Some(10);
        assert_ne!(key, compute(&limited, &config).unwrap());

        let mut ranged = base();
        ranged.since = crate::data::value::parse_naive_timestamp("2017-01-01");
        assert_ne!(key, compute(&ranged, &config).unwrap());

        let mut granular = base();
        granular.granularity = Some("other_ds".into());
        assert_ne!(key, compute(&granular, &config).unwrap());

        let capped = CoreConfig {
            sql_max_row: 5,
            ..CoreConfig::default()
        };
        assert_ne!(key, compute(&base(), &capped).unwrap());
    }

    #[test]
    fn test_extras_order_does_not_matter() {
        let config = CoreConfig::default();
        let mut a = base();
        a.extras.insert("where".into(), serde_json::json!("1 = 1"));
        a.extras.insert("having".into(), serde_json::json!({"b": 1, "a": 2}));
        let mut b = base();
        b.extras.insert("having".into(), serde_json::json!({"a": 2, "b": 1}));
        b.extras.insert("where".into(), serde_json::json!("1 = 1"));
        assert_eq!(compute(&a, &config).unwrap(), compute(&b, &config).unwrap());
    }

    #[test]
    fn test_key_covers_the_material() {
        let key = compute(&base(), &CoreConfig::default()).unwrap();
        assert_ne!(key.as_str(), hex::encode(Sha256::digest(b"")));
    }
}
