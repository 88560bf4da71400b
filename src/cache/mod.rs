//! Result caching
//!
//! Values are LZ4-compressed JSON of the normalized result plus the SQL that
//! produced it. Caches are best effort: the executor logs and ignores every
//! [`CacheError`].

pub mod key;

pub use key::{CacheKeyComputer, Fingerprint};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::sync::Cache;
use moka::Expiry;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::data::NormalizedResult;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to encode cache value: {0}")]
    Encode(String),

    #[error("Failed to decode cache value: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: Fingerprint,
    pub value: Arc<[u8]>,
    pub created_at: DateTime<Utc>,
    /// `None` never expires
    pub ttl: Option<Duration>,
}

/// TTL key/value store for encoded results
#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn get(&self, key: &Fingerprint) -> Result<Option<CacheEntry>, CacheError>;

    async fn set(&self, key: &Fingerprint, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), CacheError>;

    async fn invalidate(&self, key: &Fingerprint) -> Result<(), CacheError>;
}

/// What a cache value decodes to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedPayload {
    pub result: NormalizedResult,
    pub sql: String,
}

impl CachedPayload {
    pub fn encode(&self) -> Result<Vec<u8>, CacheError> {
        let json = serde_json::to_vec(self).map_err(|e| CacheError::Encode(e.to_string()))?;
        Ok(lz4_flex::compress_prepend_size(&json))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CacheError> {
        let json = lz4_flex::decompress_size_prepended(bytes)
            .map_err(|e| CacheError::Decode(e.to_string()))?;
        serde_json::from_slice(&json).map_err(|e| CacheError::Decode(e.to_string()))
    }
}

struct EntryExpiry;

impl Expiry<Fingerprint, Arc<CacheEntry>> for EntryExpiry {
    fn expire_after_create(&self, _key: &Fingerprint, value: &Arc<CacheEntry>, _created_at: Instant) -> Option<Duration> {
        value.ttl
    }
}

/// In-process cache with per-entry TTL and bounded capacity
pub struct MemoryResultCache {
    cache: Cache<Fingerprint, Arc<CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryResultCache {
    pub fn new(max_entries: u64) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(max_entries)
                .expire_after(EntryExpiry)
                .build(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheStats {
            hits,
            misses,
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
            entry_count: self.cache.entry_count(),
        }
    }
}

impl Default for MemoryResultCache {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl ResultCache for MemoryResultCache {
    async fn get(&self, key: &Fingerprint) -> Result<Option<CacheEntry>, CacheError> {
        match self.cache.get(key) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(entry.as_ref().clone()))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &Fingerprint, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), CacheError> {
        let entry = CacheEntry {
            key: key.clone(),
            value: value.into(),
            created_at: Utc::now(),
            ttl,
        };
        self.cache.insert(key.clone(), Arc::new(entry));
        Ok(())
    }

    async fn invalidate(&self, key: &Fingerprint) -> Result<(), CacheError> {
        self.cache.invalidate(key);
        Ok(())
    }
}

/// Cache that never stores anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCache;

#[async_trait]
impl ResultCache for NullCache {
    async fn get(&self, _key: &Fingerprint) -> Result<Option<CacheEntry>, CacheError> {
        Ok(None)
    }

    async fn set(&self, _key: &Fingerprint, _value: Vec<u8>, _ttl: Option<Duration>) -> Result<(), CacheError> {
        Ok(())
    }

    async fn invalidate(&self, _key: &Fingerprint) -> Result<(), CacheError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// 0.0 - 1.0
    pub hit_rate: f64,
    pub entry_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::data::{NormalizedRecord, Value};
    use crate::query::RenderedQuery;

    fn fingerprint(sql: &str) -> Fingerprint {
        key::compute(
            &RenderedQuery::from_sql("1__table", "memory", sql, None),
            &CoreConfig::default(),
        )
        .unwrap()
    }

    fn payload() -> CachedPayload {
        let record: NormalizedRecord = vec![("name".to_string(), Value::String("Jennifer".into()))]
            .into_iter()
            .collect();
        CachedPayload {
            result: NormalizedResult {
                columns: Vec::new(),
                records: vec![record],
            },
            sql: "SELECT name FROM birth_names".into(),
        }
    }

    #[test]
    fn test_payload_codec() {
        let encoded = payload().encode().unwrap();
        assert_eq!(CachedPayload::decode(&encoded).unwrap(), payload());
        assert!(matches!(CachedPayload::decode(&[0u8, 0, 0, 0]), Err(CacheError::Decode(_))));
    }

    #[tokio::test]
    async fn test_memory_cache_get_set_invalidate() {
        let cache = MemoryResultCache::new(100);
        let k = fingerprint("SELECT 1");

        assert!(cache.get(&k).await.unwrap().is_none());
        cache.set(&k, payload().encode().unwrap(), None).await.unwrap();

        let entry = cache.get(&k).await.unwrap().unwrap();
        assert_eq!(entry.key, k);
        assert_eq!(CachedPayload::decode(&entry.value).unwrap(), payload());

        cache.invalidate(&k).await.unwrap();
        assert!(cache.get(&k).await.unwrap().is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = MemoryResultCache::new(100);
        let short = fingerprint("SELECT 'short'");
        let long = fingerprint("SELECT 'long'");
        cache.set(&short, vec![1], Some(Duration::from_millis(50))).await.unwrap();
        cache.set(&long, vec![2], Some(Duration::from_secs(60))).await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(cache.get(&short).await.unwrap().is_none());
        assert!(cache.get(&long).await.unwrap().is_some());
    }

    #[test]
    fn test_null_cache_never_stores() {
        let cache = NullCache;
        let k = fingerprint("SELECT 1");
        tokio_test::assert_ok!(tokio_test::block_on(cache.set(&k, vec![1, 2, 3], None)));
        assert!(tokio_test::block_on(cache.get(&k)).unwrap().is_none());
    }
}
