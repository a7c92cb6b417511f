use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Result of a [`BoundedCache::get`].
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<V> {
    Hit(V),
    Miss,
    /// The entry was present but older than the TTL; it has been removed.
    Expired,
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    cost: usize,
    inserted: Instant,
    last_used: u64,
}

/// Capacity-bounded map with least-recently-used eviction and an optional
/// time-to-live.
///
/// Times are passed in by the caller so expiry is deterministic in tests.
#[derive(Debug)]
pub struct BoundedCache<K, V> {
    capacity: usize,
    ttl: Option<Duration>,
    entries: HashMap<K, Entry<V>>,
    tick: u64,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            entries: HashMap::new(),
            tick: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn expired(&self, inserted: Instant, now: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| now.saturating_duration_since(inserted) >= ttl)
    }

    /// Look up `key`, marking it most recently used on a hit.
    pub fn get(&mut self, key: &K, now: Instant) -> Lookup<V> {
        let Some(inserted) = self.entries.get(key).map(|e| e.inserted) else {
            return Lookup::Miss;
        };
        if self.expired(inserted, now) {
            self.entries.remove(key);
            return Lookup::Expired;
        }
        self.tick += 1;
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.last_used = self.tick;
                Lookup::Hit(entry.value.clone())
            }
            None => Lookup::Miss,
        }
    }

    /// Whether `key` is present and fresh, without touching recency.
    pub fn contains(&self, key: &K, now: Instant) -> bool {
        self.entries
            .get(key)
            .is_some_and(|e| !self.expired(e.inserted, now))
    }

    /// Insert or replace `key`. Returns the keys evicted to make room.
    pub fn insert(&mut self, key: K, value: V, cost: usize, now: Instant) -> Vec<K> {
        self.tick += 1;
        let entry = Entry {
            value,
            cost,
            inserted: now,
            last_used: self.tick,
        };
        if self.entries.insert(key, entry).is_some() {
            return Vec::new();
        }

        let mut evicted = Vec::new();
        while self.entries.len() > self.capacity {
            let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            self.entries.remove(&oldest);
            evicted.push(oldest);
        }
        evicted
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|e| e.value)
    }

    /// Keep only the keys for which `keep` returns true. Returns how many
    /// were removed.
    pub fn retain(&mut self, mut keep: impl FnMut(&K) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|k, _| keep(k));
        before - self.entries.len()
    }

    /// Remove every expired entry and return their keys.
    pub fn purge_expired(&mut self, now: Instant) -> Vec<K> {
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, e)| self.expired(e.inserted, now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.entries.remove(key);
        }
        expired
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Keys with their costs.
    pub fn costs(&self) -> impl Iterator<Item = (&K, usize)> {
        self.entries.iter().map(|(k, e)| (k, e.cost))
    }

    pub fn total_cost(&self) -> usize {
        self.entries.values().map(|e| e.cost).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lru_eviction() {
        let now = Instant::now();
        let mut cache = BoundedCache::new(2, None);
        assert!(cache.insert("a", 1, 1, now).is_empty());
        assert!(cache.insert("b", 2, 1, now).is_empty());
        assert_eq!(cache.get(&"a", now), Lookup::Hit(1));

        // "b" is least recently used now.
        assert_eq!(cache.insert("c", 3, 1, now), vec!["b"]);
        assert_eq!(cache.get(&"b", now), Lookup::Miss);
        assert_eq!(cache.get(&"a", now), Lookup::Hit(1));
        assert_eq!(cache.get(&"c", now), Lookup::Hit(3));
    }

    #[test]
    fn replace_does_not_evict() {
        let now = Instant::now();
        let mut cache = BoundedCache::new(1, None);
        cache.insert("a", 1, 1, now);
        assert!(cache.insert("a", 2, 5, now).is_empty());
        assert_eq!(cache.get(&"a", now), Lookup::Hit(2));
        assert_eq!(cache.total_cost(), 5);
    }

    #[test]
    fn ttl_expiry() {
        let start = Instant::now();
        let ttl = Duration::from_secs(10);
        let mut cache = BoundedCache::new(8, Some(ttl));
        cache.insert("a", 1, 1, start);
        cache.insert("b", 2, 1, start + Duration::from_secs(5));

        let later = start + ttl;
        assert!(!cache.contains(&"a", later));
        assert_eq!(cache.get(&"a", later), Lookup::Expired);
        assert_eq!(cache.get(&"a", later), Lookup::Miss);
        assert_eq!(cache.get(&"b", later), Lookup::Hit(2));

        assert_eq!(cache.purge_expired(start + Duration::from_secs(20)), vec!["b"]);
        assert!(cache.is_empty());
    }

    #[test]
    fn retain_and_clear() {
        let now = Instant::now();
        let tiny: BoundedCache<&str, usize> = BoundedCache::new(0, None);
        assert_eq!(tiny.capacity(), 1);

        let mut cache = BoundedCache::new(4, None);
        for (i, key) in ["x1", "x2", "y1"].into_iter().enumerate() {
            cache.insert(key, i, 2, now);
        }
        assert_eq!(cache.retain(|k| !k.starts_with('x')), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.remove(&"y1"), Some(2));
        cache.insert("z", 0, 1, now);
        cache.clear();
        assert!(cache.is_empty());
    }
}
