//! Bounded map of expiring entries.
//!
//! Expired entries are dropped lazily on read. When the map is full, expired
//! entries are purged first, then the entry closest to expiry is evicted.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

#[derive(Debug, Clone)]
pub struct TtlMap<V> {
    entries: HashMap<String, Entry<V>>,
    capacity: usize,
}

impl<V: Clone> TtlMap<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Value for `key` if it has not expired at `now`.
    pub fn get(&mut self, key: &str, now: Instant) -> Option<V> {
        match self.entries.get(key) {
            Some(entry) if now < entry.expires_at => Some(entry.value.clone()),
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Insert or overwrite. The last writer for a key wins.
    pub fn insert(&mut self, key: String, value: V, ttl: Duration, now: Instant) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.entries.retain(|_, entry| now < entry.expires_at);
            if self.entries.len() >= self.capacity {
                self.evict_soonest();
            }
        }

        self.entries.insert(
            key,
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
    }

    fn evict_soonest(&mut self) {
        let soonest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.expires_at)
            .map(|(key, _)| key.clone());
        if let Some(key) = soonest {
            self.entries.remove(&key);
        }
    }

    /// Drop every entry whose key contains `pattern`. Returns how many were dropped.
    pub fn invalidate(&mut self, pattern: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.contains(pattern));
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of stored entries, including expired ones not yet dropped.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(10);

    #[test]
    fn test_get_before_and_after_expiry() {
        let now = Instant::now();
        let mut map = TtlMap::new(4);
        map.insert("a".to_string(), 1, TTL, now);

        assert_eq!(map.get("a", now + Duration::from_secs(9)), Some(1));
        assert_eq!(map.get("a", now + TTL), None);
        assert!(map.is_empty(), "expired entry dropped on read");
    }

    #[test]
    fn test_last_writer_wins() {
        let now = Instant::now();
        let mut map = TtlMap::new(4);
        map.insert("a".to_string(), 1, TTL, now);
        map.insert("a".to_string(), 2, TTL, now);

        assert_eq!(map.get("a", now), Some(2));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_full_map_purges_expired_first() {
        let now = Instant::now();
        let mut map = TtlMap::new(2);
        map.insert("short".to_string(), 1, Duration::from_secs(1), now);
        map.insert("long".to_string(), 2, TTL, now);

        let later = now + Duration::from_secs(2);
        map.insert("new".to_string(), 3, TTL, later);

        assert_eq!(map.len(), 2);
        assert_eq!(map.get("long", later), Some(2));
        assert_eq!(map.get("new", later), Some(3));
    }

    #[test]
    fn test_full_map_evicts_soonest_expiry() {
        let now = Instant::now();
        let mut map = TtlMap::new(2);
        map.insert("soon".to_string(), 1, Duration::from_secs(5), now);
        map.insert("late".to_string(), 2, Duration::from_secs(50), now);
        map.insert("new".to_string(), 3, TTL, now);

        assert_eq!(map.get("soon", now), None);
        assert_eq!(map.get("late", now), Some(2));
        assert_eq!(map.get("new", now), Some(3));
    }

    #[test]
    fn test_invalidate_by_substring() {
        let now = Instant::now();
        let mut map = TtlMap::new(8);
        map.insert("GET /api/announcements anon".to_string(), 1, TTL, now);
        map.insert("GET /api/announcements/7 alice".to_string(), 2, TTL, now);
        map.insert("GET /api/activities alice".to_string(), 3, TTL, now);

        assert_eq!(map.invalidate("/api/announcements"), 2);
        assert_eq!(map.get("GET /api/activities alice", now), Some(3));
    }
}
