//! Bounded memoization caches
//!
//! Every derived structure (field map, parent/root/published lookups) lives
//! in an LRU cache with a fixed capacity. A capacity of 0 disables caching.

use std::hash::Hash;
use std::num::NonZeroUsize;
use lru::LruCache;
use serde::Serialize;

/// Hit/miss counters for one cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// LRU cache with hit/miss accounting.
#[derive(Debug)]
pub struct BoundedCache<K: Hash + Eq, V> {
    inner: Option<LruCache<K, V>>,
    hits: u64,
    misses: u64,
}

impl<K: Hash + Eq, V: Clone> BoundedCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: NonZeroUsize::new(capacity).map(LruCache::new),
            hits: 0,
            misses: 0,
        }
    }

    /// Cached value for `key`, promoting it to most recently used
    pub fn get(&mut self, key: &K) -> Option<V> {
        let hit = self.inner.as_mut().and_then(|cache| cache.get(key).cloned());
        if hit.is_some() {
            self.hits = self.hits.saturating_add(1);
        } else {
            self.misses = self.misses.saturating_add(1);
        }
        hit
    }

    pub fn put(&mut self, key: K, value: V) {
        if let Some(cache) = self.inner.as_mut() {
            cache.put(key, value);
        }
    }

    pub fn clear(&mut self) {
        if let Some(cache) = self.inner.as_mut() {
            cache.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.as_ref().map(|cache| cache.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.len(),
        }
    }
}
