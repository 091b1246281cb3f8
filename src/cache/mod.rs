//! LRU decode cache for the query path
//!
//! Resolves string ids back to strings, reading through to a
//! [`StringSource`] on a miss.
//!
//! # Architecture
//!
//! ```text
//! StringIdCache
//!   ├─→ bucket 0 = Mutex<LruBucket>  [MRU] 17 ⇄ 4 ⇄ 93 ⇄ ... [LRU]
//!   ├─→ bucket 1 = Mutex<LruBucket>
//!   └─→ ...          bucket = hash(id) % num_buckets
//! ```
//!
//! Recency is tracked per bucket only. Every entry is preallocated when the
//! cache is built; the hot path allocates only the returned copy and, on a
//! miss, the fetched string.

pub mod lru;

use crate::config::CacheConfig;
use crate::dict::StringId;
use crate::error::{Error, Result};
use crate::hash::id_hash;
use self::lru::LruBucket;
use parking_lot::Mutex;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Authoritative id → string lookup behind the cache
pub trait StringSource {
    /// Fetch a string without consulting any cache
    fn fetch_string_by_id_nocache(&self, id: StringId) -> Result<String>;
}

impl<T: StringSource + ?Sized> StringSource for &T {
    fn fetch_string_by_id_nocache(&self, id: StringId) -> Result<String> {
        (**self).fetch_string_by_id_nocache(id)
    }
}

impl<T: StringSource + ?Sized> StringSource for Arc<T> {
    fn fetch_string_by_id_nocache(&self, id: StringId) -> Result<String> {
        (**self).fetch_string_by_id_nocache(id)
    }
}

/// Read-through LRU cache from string id to string
pub struct StringIdCache<S> {
    buckets: Box<[Mutex<LruBucket>]>,
    source: S,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<S: StringSource> StringIdCache<S> {
    /// Create a cache with every bucket fully preallocated
    pub fn new(source: S, config: &CacheConfig) -> Result<Self> {
        config.validate()?;
        let entries = NonZeroUsize::new(config.entries_per_bucket)
            .ok_or(Error::NullArgument("entries_per_bucket"))?;
        let buckets = (0..config.num_buckets)
            .map(|_| Mutex::new(LruBucket::new(entries)))
            .collect();
        Ok(Self {
            buckets,
            source,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        })
    }

    pub fn with_defaults(source: S) -> Result<Self> {
        Self::new(source, &CacheConfig::default())
    }

    #[inline]
    fn bucket(&self, id: StringId) -> &Mutex<LruBucket> {
        &self.buckets[(id_hash(id.get()) % self.buckets.len() as u64) as usize]
    }

    /// Decode an id, fetching from the source on a miss
    pub fn get(&self, id: StringId) -> Result<String> {
        let mut bucket = self.bucket(id).lock();
        if let Some(value) = bucket.get(id) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }

        // The bucket stays locked during the fetch so that concurrent
        // misses on the same id install it only once.
        let value = self.source.fetch_string_by_id_nocache(id)?;
        self.misses.fetch_add(1, Ordering::Relaxed);
        if let Some(evicted) = bucket.install(id, value.clone()) {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            trace!(%id, %evicted, "Evicted cached string");
        }
        Ok(value)
    }

    /// Decode a batch of ids
    pub fn get_many(&self, ids: &[StringId]) -> Result<Vec<String>> {
        ids.iter().map(|&id| self.get(id)).collect()
    }

    /// Drop one id, e.g. after it was removed from the dictionary
    pub fn invalidate(&self, id: StringId) -> bool {
        self.bucket(id).lock().invalidate(id)
    }

    pub fn clear(&self) {
        for bucket in self.buckets.iter() {
            bucket.lock().clear();
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Cache statistics
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            hits as f64 / total as f64
        } else {
            0.0
        };

        let mut size = 0;
        let mut capacity = 0;
        for bucket in self.buckets.iter() {
            let bucket = bucket.lock();
            size += bucket.len();
            capacity += bucket.capacity();
        }

        CacheStats {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_rate,
            size,
            capacity,
        }
    }

    pub fn reset_stats(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }
}

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
    pub size: usize,
    pub capacity: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    /// Source backed by a map that counts fetches
    struct MapSource {
        strings: HashMap<u64, String>,
        fetches: AtomicUsize,
    }

    impl MapSource {
        fn new(n: u64) -> Self {
            Self {
                strings: (0..n).map(|i| (i, format!("value-{}", i))).collect(),
                fetches: AtomicUsize::new(0),
            }
        }
    }

    impl StringSource for MapSource {
        fn fetch_string_by_id_nocache(&self, id: StringId) -> Result<String> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.strings
                .get(&id.get())
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("string id {}", id)))
        }
    }

    fn single_bucket(entries: usize) -> CacheConfig {
        CacheConfig {
            num_buckets: 1,
            entries_per_bucket: entries,
        }
    }

    #[test]
    fn test_cache_basic() -> Result<()> {
        let cache = StringIdCache::with_defaults(MapSource::new(10))?;

        assert_eq!(cache.get(StringId(3))?, "value-3");
        assert_eq!(cache.get(StringId(3))?, "value-3");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
        assert_eq!(stats.capacity, 16 * 1024);
        assert_eq!(cache.source().fetches.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn test_cache_eviction() -> Result<()> {
        let cache = StringIdCache::new(MapSource::new(10), &single_bucket(2))?;

        cache.get(StringId(1))?;
        cache.get(StringId(2))?;
        cache.get(StringId(3))?;

        // 1 was least recently used
        cache.reset_stats();
        cache.get(StringId(1))?;
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.evictions, 1);
        Ok(())
    }

    #[test]
    fn test_hit_protects_entry() -> Result<()> {
        let cache = StringIdCache::new(MapSource::new(10), &single_bucket(2))?;

        cache.get(StringId(1))?;
        cache.get(StringId(2))?;
        cache.get(StringId(1))?;
        cache.get(StringId(3))?; // evicts 2

        cache.reset_stats();
        cache.get(StringId(1))?;
        assert_eq!(cache.stats().hits, 1);
        cache.get(StringId(2))?;
        assert_eq!(cache.stats().misses, 1);
        Ok(())
    }

    #[test]
    fn test_missing_id() -> Result<()> {
        let cache = StringIdCache::with_defaults(MapSource::new(2))?;
        assert!(matches!(cache.get(StringId(9)), Err(Error::NotFound(_))));
        assert_eq!(cache.stats().size, 0);
        Ok(())
    }

    #[test]
    fn test_invalidate_and_clear() -> Result<()> {
        let cache = StringIdCache::new(MapSource::new(10), &single_bucket(4))?;
        cache.get(StringId(1))?;
        cache.get(StringId(2))?;

        assert!(cache.invalidate(StringId(1)));
        assert_eq!(cache.stats().size, 1);

        cache.clear();
        assert_eq!(cache.stats().size, 0);
        cache.get(StringId(2))?;
        assert_eq!(cache.source().fetches.load(Ordering::SeqCst), 3);
        Ok(())
    }

    #[test]
    fn test_zero_sized_config() {
        let config = CacheConfig {
            num_buckets: 4,
            entries_per_bucket: 0,
        };
        assert!(matches!(
            StringIdCache::new(MapSource::new(1), &config),
            Err(Error::NullArgument("entries_per_bucket"))
        ));
    }

    #[test]
    fn test_get_many() -> Result<()> {
        let cache = StringIdCache::with_defaults(MapSource::new(5))?;
        let values = cache.get_many(&[StringId(4), StringId(0), StringId(4)])?;
        assert_eq!(values, vec!["value-4", "value-0", "value-4"]);
        assert_eq!(cache.stats().hits, 1);
        Ok(())
    }
}
