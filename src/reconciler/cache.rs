//! Recently applied event keys.
//!
//! Re-delivered events short-circuit here before any query runs. The
//! database's conditional updates remain authoritative; a key that has been
//! evicted only costs one extra round trip.

use crate::confirmed::EventKey;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

/// Keys remembered before the oldest is dropped.
const DEFAULT_CAPACITY: usize = 10_000;

/// Counters of the processed-event cache.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that found the key.
    pub hits: u64,
    /// Lookups that did not.
    pub misses: u64,
    /// Keys dropped to make room.
    pub evictions: u64,
}

impl CacheStats {
    /// Fraction of lookups that hit, or `None` before the first lookup.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_ratio(&self) -> Option<f64> {
        let lookups = self.hits + self.misses;
        (lookups > 0).then(|| self.hits as f64 / lookups as f64)
    }
}

struct Inner {
    keys: LruCache<EventKey, ()>,
    stats: CacheStats,
}

/// Bounded set of event keys already applied by this process.
pub struct ProcessedEvents {
    inner: Mutex<Inner>,
}

impl ProcessedEvents {
    /// Cache with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Cache holding at most `capacity` keys; zero is raised to one.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                keys: LruCache::new(capacity),
                stats: CacheStats::default(),
            }),
        }
    }

    /// Whether `key` was applied recently. Refreshes its recency on a hit.
    pub fn contains(&self, key: &EventKey) -> bool {
        let mut inner = self.inner.lock();
        let hit = inner.keys.get(key).is_some();
        if hit {
            inner.stats.hits += 1;
        } else {
            inner.stats.misses += 1;
        }
        hit
    }

    /// Remember `key` as applied.
    pub fn insert(&self, key: EventKey) {
        let mut inner = self.inner.lock();
        if let Some((evicted, ())) = inner.keys.push(key, ()) {
            // `push` hands back the old entry when the key was already present.
            if !inner.keys.contains(&evicted) {
                inner.stats.evictions += 1;
            }
        }
    }

    /// Snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats
    }

    /// Number of remembered keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().keys.len()
    }

    /// Whether no key is remembered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ProcessedEvents {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirmed::EventKind;

    fn key(uid: &str) -> EventKey {
        EventKey::new(EventKind::Purchase, uid)
    }

    #[test]
    fn test_lookups_are_counted() {
        let cache = ProcessedEvents::new();
        assert_eq!(cache.stats().hit_ratio(), None);

        assert!(!cache.contains(&key("0x01")));
        cache.insert(key("0x01"));
        assert!(cache.contains(&key("0x01")));
        assert!(cache.contains(&key("0X01")));

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.evictions), (2, 1, 0));
        assert!(stats.hit_ratio().is_some_and(|r| (r - 2.0 / 3.0).abs() < 1e-9));
    }

    #[test]
    fn test_oldest_key_is_evicted() {
        let cache = ProcessedEvents::with_capacity(2);
        cache.insert(key("0x01"));
        cache.insert(key("0x02"));
        assert!(cache.contains(&key("0x01")));
        cache.insert(key("0x03"));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 1);
        assert!(!cache.contains(&key("0x02")));
        assert!(cache.contains(&key("0x01")));
    }

    #[test]
    fn test_reinserting_is_not_an_eviction() {
        let cache = ProcessedEvents::with_capacity(0);
        cache.insert(key("0x01"));
        cache.insert(key("0x01"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().evictions, 0);
    }
}
