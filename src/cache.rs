//! Bounded LRU cache fronting the lookup cascade.
//!
//! Hot keys are answered here without touching the MemTable or any segment
//! file. Capacity is counted in entries; the least recently used entry is
//! evicted when a new key would exceed it. Tombstones are cached as empty
//! values so a deleted key also short-circuits the cascade.

use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

/// A fixed-capacity LRU cache from key to value.
pub struct ReadCache {
    inner: RwLock<CacheInner>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

struct CacheInner {
    map: HashMap<String, String>,
    /// Keys in recency order, most recent at the front.
    order: VecDeque<String>,
}

impl ReadCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(CacheInner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a cached value. Promotes the entry to MRU on hit.
    ///
    /// A hit with an empty value is a cached tombstone.
    pub fn get(&self, key: &str) -> Option<String> {
        let mut inner = self.inner.write();
        if let Some(value) = inner.map.get(key).cloned() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            promote(&mut inner.order, key);
            Some(value)
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Insert or refresh an entry, evicting the LRU entry at capacity.
    pub fn insert(&self, key: &str, value: &str) {
        if self.capacity == 0 {
            return;
        }

        let mut inner = self.inner.write();

        if inner.map.contains_key(key) {
            promote(&mut inner.order, key);
        } else {
            while inner.map.len() >= self.capacity {
                if let Some(victim) = inner.order.pop_back() {
                    inner.map.remove(&victim);
                } else {
                    break;
                }
            }
            inner.order.push_front(key.to_owned());
        }

        inner.map.insert(key.to_owned(), value.to_owned());
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let h = self.hits() as f64;
        let m = self.misses() as f64;
        let total = h + m;
        if total == 0.0 {
            0.0
        } else {
            h / total
        }
    }
}

/// Move an existing key to the front (MRU position) of the recency deque.
fn promote(order: &mut VecDeque<String>, key: &str) {
    if let Some(pos) = order.iter().position(|k| k == key) {
        order.remove(pos);
    }
    order.push_front(key.to_owned());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let cache = ReadCache::new(16);
        cache.insert("key", "value");

        assert_eq!(cache.get("key"), Some("value".to_string()));
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 0);
    }

    #[test]
    fn test_miss() {
        let cache = ReadCache::new(16);
        assert_eq!(cache.get("nope"), None);
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn test_lru_eviction() {
        let cache = ReadCache::new(2);
        cache.insert("a", "1");
        cache.insert("b", "2");

        // Touch "a" so "b" becomes the LRU entry.
        assert!(cache.get("a").is_some());

        cache.insert("c", "3");
        assert_eq!(cache.get("b"), None);
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_update_existing_does_not_evict() {
        let cache = ReadCache::new(2);
        cache.insert("a", "1");
        cache.insert("b", "2");
        cache.insert("a", "updated");

        assert_eq!(cache.get("a"), Some("updated".to_string()));
        assert_eq!(cache.get("b"), Some("2".to_string()));
    }

    #[test]
    fn test_tombstone_cached_as_empty() {
        let cache = ReadCache::new(16);
        cache.insert("gone", "");

        assert_eq!(cache.get("gone"), Some(String::new()));
    }

    #[test]
    fn test_zero_capacity_caches_nothing() {
        let cache = ReadCache::new(0);
        cache.insert("key", "value");
        assert_eq!(cache.get("key"), None);
    }

    #[test]
    fn test_hit_rate() {
        let cache = ReadCache::new(16);
        cache.insert("x", "1");

        cache.get("x"); // hit
        cache.get("y"); // miss
        cache.get("x"); // hit

        assert_eq!(cache.hits(), 2);
        assert_eq!(cache.misses(), 1);
        assert!((cache.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
    }
}
