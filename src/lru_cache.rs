//! # Expiring LRU Cache
//!
//! Least-recently-used cache whose entries also expire a fixed time after
//! they were stored. Backs the renderer's GPS stream cache.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// LRU cache with an optional time-to-live.
///
/// Eviction scans for the oldest access stamp, O(n). Capacities here are a
/// few dozen streams, so a linked list is not worth it.
#[derive(Debug)]
pub struct LruCache<K, V> {
    capacity: usize,
    ttl: Option<Duration>,
    entries: HashMap<K, CacheEntry<V>>,
    access_counter: u64,
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    last_access: u64,
    stored_at: Instant,
}

impl<K: Eq + Hash + Clone, V: Clone> LruCache<K, V> {
    /// Cache holding at most `capacity` entries that never expire.
    pub fn new(capacity: usize) -> Self {
        Self::with_ttl(capacity, None)
    }

    /// Cache whose entries expire `ttl` after insertion.
    pub fn with_ttl(capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            entries: HashMap::with_capacity(capacity),
            access_counter: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    fn is_expired(&self, entry: &CacheEntry<V>) -> bool {
        self.ttl
            .is_some_and(|ttl| entry.stored_at.elapsed() >= ttl)
    }

    /// Look up a live entry and mark it recently used. Expired entries are
    /// dropped on the way.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let expired = self.entries.get(key).map(|e| self.is_expired(e))?;
        if expired {
            self.entries.remove(key);
            return None;
        }

        self.access_counter += 1;
        let stamp = self.access_counter;
        self.entries.get_mut(key).map(|entry| {
            entry.last_access = stamp;
            &entry.value
        })
    }

    pub fn get_cloned(&mut self, key: &K) -> Option<V> {
        self.get(key).cloned()
    }

    /// Store a value, replacing any previous one and restarting its TTL.
    pub fn insert(&mut self, key: K, value: V) {
        self.access_counter += 1;
        let entry = CacheEntry {
            value,
            last_access: self.access_counter,
            stored_at: Instant::now(),
        };

        if !self.entries.contains_key(&key) {
            self.purge_expired();
            if self.entries.len() >= self.capacity {
                self.evict_oldest();
            }
        }
        self.entries.insert(key, entry);
    }

    pub fn invalidate(&mut self, key: &K) {
        self.entries.remove(key);
    }

    /// Keep only entries whose key satisfies `keep`.
    pub fn retain<F: FnMut(&K) -> bool>(&mut self, mut keep: F) {
        self.entries.retain(|k, _| keep(k));
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        let Some(ttl) = self.ttl else {
            return 0;
        };
        let before = self.entries.len();
        self.entries.retain(|_, e| e.stored_at.elapsed() < ttl);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.access_counter = 0;
    }

    /// Number of stored entries, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if `key` has a live entry. Does not count as an access.
    pub fn contains(&self, key: &K) -> bool {
        self.entries.get(key).is_some_and(|e| !self.is_expired(e))
    }

    fn evict_oldest(&mut self) {
        let oldest_key = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(k, _)| k.clone());

        if let Some(key) = oldest_key {
            self.entries.remove(&key);
        }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Default for LruCache<K, V> {
    fn default() -> Self {
        Self::new(32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> String {
        s.to_string()
    }

    #[test]
    fn test_least_recent_evicted() {
        let mut cache: LruCache<String, u32> = LruCache::new(2);
        cache.insert(key("run"), 1);
        cache.insert(key("ride"), 2);

        cache.get(&key("run"));
        cache.insert(key("hike"), 3);

        assert!(cache.contains(&key("run")));
        assert!(!cache.contains(&key("ride")));
        assert!(cache.contains(&key("hike")));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_replace_does_not_evict() {
        let mut cache: LruCache<String, u32> = LruCache::new(2);
        cache.insert(key("a"), 1);
        cache.insert(key("b"), 2);
        cache.insert(key("a"), 10);

        assert_eq!(cache.get_cloned(&key("a")), Some(10));
        assert_eq!(cache.get_cloned(&key("b")), Some(2));
    }

    #[test]
    fn test_zero_ttl_expires_immediately() {
        let mut cache: LruCache<String, u32> = LruCache::with_ttl(4, Some(Duration::ZERO));
        cache.insert(key("a"), 1);

        assert!(!cache.contains(&key("a")));
        assert_eq!(cache.get(&key("a")), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_ttl_expiry_after_wait() {
        let mut cache: LruCache<String, u32> =
            LruCache::with_ttl(4, Some(Duration::from_millis(30)));
        cache.insert(key("a"), 1);
        assert_eq!(cache.get_cloned(&key("a")), Some(1));

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_long_ttl_keeps_entries() {
        let mut cache: LruCache<String, u32> =
            LruCache::with_ttl(4, Some(Duration::from_secs(48 * 3600)));
        cache.insert(key("a"), 1);
        assert_eq!(cache.purge_expired(), 0);
        assert_eq!(cache.get_cloned(&key("a")), Some(1));
    }

    #[test]
    fn test_retain_and_invalidate() {
        let mut cache: LruCache<String, u32> = LruCache::new(8);
        for (i, k) in ["1", "2", "3"].iter().enumerate() {
            cache.insert(key(k), i as u32);
        }

        cache.retain(|k| k != "2");
        cache.invalidate(&key("3"));

        assert!(cache.contains(&key("1")));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }
}
