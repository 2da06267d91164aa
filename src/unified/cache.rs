//! TTL + LRU cache for entity resolutions. Keys are normalized
//! (lowercased, trimmed); entries expire after the TTL and the least
//! recently used entry is evicted at capacity.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lru::LruCache;

pub const DEFAULT_CAPACITY: usize = 1000;
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total > 0.0 { hits / total } else { 0.0 }
    }
}

pub struct TtlCache<V> {
    inner: Mutex<LruCache<String, (Instant, V)>>,
    ttl: Duration,
    stats: CacheStats,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least 1");
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl,
            stats: CacheStats::default(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }

    pub fn normalize_key(key: &str) -> String {
        key.trim().to_lowercase()
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let key = Self::normalize_key(key);
        let mut cache = self.inner.lock().expect("cache lock poisoned");
        match cache.get(&key) {
            Some((inserted_at, value)) if inserted_at.elapsed() < self.ttl => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(value.clone())
            }
            Some(_) => {
                cache.pop(&key);
                self.stats.expirations.fetch_add(1, Ordering::Relaxed);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn put(&self, key: &str, value: V) {
        let key = Self::normalize_key(key);
        let mut cache = self.inner.lock().expect("cache lock poisoned");
        cache.put(key, (Instant::now(), value));
    }

    pub fn invalidate(&self, key: &str) -> bool {
        let key = Self::normalize_key(key);
        let mut cache = self.inner.lock().expect("cache lock poisoned");
        cache.pop(&key).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_normalized() {
        let cache: TtlCache<u32> = TtlCache::new(10, Duration::from_secs(60));
        cache.put("  Remimazolam  ", 7);
        assert_eq!(cache.get("remimazolam"), Some(7));
        assert_eq!(cache.get("REMIMAZOLAM"), Some(7));
    }

    #[test]
    fn expired_entries_are_misses() {
        let cache: TtlCache<u32> = TtlCache::new(10, Duration::from_millis(10));
        cache.put("k", 1);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.stats().expirations(), 1);
    }

    #[test]
    fn lru_evicts_oldest_at_capacity() {
        let cache: TtlCache<u32> = TtlCache::new(2, Duration::from_secs(60));
        cache.put("a", 1);
        cache.put("b", 2);
        cache.get("a");
        cache.put("c", 3);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("c"), Some(3));
    }

    #[test]
    fn stats_track_hit_rate() {
        let cache: TtlCache<u32> = TtlCache::new(10, Duration::from_secs(60));
        cache.put("k", 1);
        cache.get("k");
        cache.get("missing");
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 1);
        assert!((cache.stats().hit_rate() - 0.5).abs() < f64::EPSILON);
    }
}
