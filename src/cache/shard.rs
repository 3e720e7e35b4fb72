//! Sharded Map Implementation
//!
//! Concurrent hashmap split into independently locked shards.
//!
//! # Design
//!
//! - Each shard has its own RwLock, so readers of one shard never wait on
//!   writers of another
//! - Reads take the read lock only; recency is refreshed through the entry's
//!   atomic stamp, so concurrent reads never block each other
//! - Every single-key read-modify-write (`insert_if_absent`, `remove_if`)
//!   runs under one write-lock acquisition and is therefore atomic per key

use parking_lot::RwLock;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};

use super::entry::CacheEntry;

/// Single shard containing a hashmap and its entry count
#[repr(C, align(64))]
pub struct Shard<K, V> {
    map: RwLock<HashMap<K, CacheEntry<V>>>,
    count: AtomicUsize,
}

impl<K, V> Default for Shard<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Shard<K, V> {
    /// Create a new empty shard
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
            count: AtomicUsize::new(0),
        }
    }

    /// Get the number of entries in this shard
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// Check if the shard is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash, V> Shard<K, V> {
    /// Get a value, refreshing its stamp
    pub fn get<Q>(&self, key: &Q, stamp: u64) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        let guard = self.map.read();
        guard.get(key).map(|entry| {
            entry.touch(stamp);
            entry.value().clone()
        })
    }

    /// Get a value without refreshing its stamp
    pub fn peek<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        self.map.read().get(key).map(|entry| entry.value().clone())
    }

    /// Check if a key exists (does not count as an access)
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.read().contains_key(key)
    }

    /// Insert a value, returning the old value if present
    pub fn insert(&self, key: K, value: V, stamp: u64) -> Option<V> {
        let mut guard = self.map.write();
        let old = guard.insert(key, CacheEntry::new(value, stamp));
        if old.is_none() {
            self.count.fetch_add(1, Ordering::Relaxed);
        }
        old.map(CacheEntry::into_value)
    }

    /// Insert only if the key is vacant.
    ///
    /// Returns the existing value (refreshed) when occupied, `None` when the
    /// new value was stored.
    pub fn insert_if_absent(&self, key: K, value: V, stamp: u64) -> Option<V>
    where
        V: Clone,
    {
        let mut guard = self.map.write();
        if let Some(existing) = guard.get(&key) {
            existing.touch(stamp);
            return Some(existing.value().clone());
        }
        guard.insert(key, CacheEntry::new(value, stamp));
        self.count.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Remove a value, returning it if present
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut guard = self.map.write();
        let removed = guard.remove(key);
        if removed.is_some() {
            self.count.fetch_sub(1, Ordering::Relaxed);
        }
        removed.map(CacheEntry::into_value)
    }

    /// Remove a value only if `predicate` accepts the current value
    pub fn remove_if<Q, F>(&self, key: &Q, predicate: F) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        F: FnOnce(&V) -> bool,
    {
        let mut guard = self.map.write();
        let matches = guard.get(key).is_some_and(|entry| predicate(entry.value()));
        if !matches {
            return None;
        }
        let removed = guard.remove(key);
        if removed.is_some() {
            self.count.fetch_sub(1, Ordering::Relaxed);
        }
        removed.map(CacheEntry::into_value)
    }

    /// Remove an entry only if it has not been accessed since `stamp`.
    ///
    /// Used by eviction so an entry refreshed after the candidate snapshot
    /// survives the sweep.
    pub fn remove_if_untouched<Q>(&self, key: &Q, stamp: u64) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut guard = self.map.write();
        let untouched = guard
            .get(key)
            .is_some_and(|entry| entry.last_access() <= stamp);
        if untouched && guard.remove(key).is_some() {
            self.count.fetch_sub(1, Ordering::Relaxed);
            return true;
        }
        false
    }

    /// Clear all entries, returning how many were dropped
    pub fn clear(&self) -> usize {
        let mut guard = self.map.write();
        let dropped = guard.len();
        guard.clear();
        self.count.store(0, Ordering::Relaxed);
        dropped
    }

    /// Get all keys
    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        self.map.read().keys().cloned().collect()
    }

    /// Get all values
    pub fn values(&self) -> Vec<V>
    where
        V: Clone,
    {
        self.map.read().values().map(|e| e.value().clone()).collect()
    }

    /// Get all entries
    pub fn entries(&self) -> Vec<(K, V)>
    where
        K: Clone,
        V: Clone,
    {
        self.map
            .read()
            .iter()
            .map(|(k, e)| (k.clone(), e.value().clone()))
            .collect()
    }

    /// Snapshot of (key, last access stamp) pairs for eviction
    pub fn stamps(&self) -> Vec<(K, u64)>
    where
        K: Clone,
    {
        self.map
            .read()
            .iter()
            .map(|(k, e)| (k.clone(), e.last_access()))
            .collect()
    }
}

/// Sharded map with a compile-time shard count
pub struct ShardedMap<K, V, const N: usize = 16> {
    shards: Box<[Shard<K, V>]>,
}

impl<K, V, const N: usize> Default for ShardedMap<K, V, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, const N: usize> ShardedMap<K, V, N> {
    /// Create a new sharded map
    pub fn new() -> Self {
        let shards: Vec<Shard<K, V>> = (0..N.max(1)).map(|_| Shard::new()).collect();
        Self {
            shards: shards.into_boxed_slice(),
        }
    }

    /// Get total number of entries across all shards
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    /// Check if the map is empty
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.is_empty())
    }

    /// Iterate over the shards
    pub fn shards(&self) -> impl Iterator<Item = &Shard<K, V>> {
        self.shards.iter()
    }
}

impl<K: Eq + Hash, V, const N: usize> ShardedMap<K, V, N> {
    /// Shard responsible for `key`
    #[inline]
    pub fn shard_for<Q>(&self, key: &Q) -> &Shard<K, V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.shards.len();
        &self.shards[idx]
    }

    /// Clear all shards, returning how many entries were dropped
    pub fn clear(&self) -> usize {
        self.shards.iter().map(|s| s.clear()).sum()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_creation() {
        let shard: Shard<String, i32> = Shard::new();
        assert!(shard.is_empty());
        assert_eq!(shard.len(), 0);
    }

    #[test]
    fn test_shard_insert_get() {
        let shard: Shard<String, i32> = Shard::new();

        let old = shard.insert("key1".to_string(), 42, 1);
        assert!(old.is_none());
        assert_eq!(shard.len(), 1);

        assert_eq!(shard.get("key1", 2), Some(42));
        assert_eq!(shard.stamps(), vec![("key1".to_string(), 2)]);
    }

    #[test]
    fn test_shard_peek_keeps_stamp() {
        let shard: Shard<String, i32> = Shard::new();
        shard.insert("key".to_string(), 1, 4);

        assert_eq!(shard.peek("key"), Some(1));
        assert_eq!(shard.peek("missing"), None);
        assert_eq!(shard.stamps(), vec![("key".to_string(), 4)]);
    }

    #[test]
    fn test_shard_insert_replaces() {
        let shard: Shard<String, i32> = Shard::new();
        shard.insert("key1".to_string(), 1, 1);
        let old = shard.insert("key1".to_string(), 2, 2);
        assert_eq!(old, Some(1));
        assert_eq!(shard.len(), 1);
        assert_eq!(shard.get("key1", 3), Some(2));
    }

    #[test]
    fn test_shard_insert_if_absent() {
        let shard: Shard<String, i32> = Shard::new();

        assert_eq!(shard.insert_if_absent("key".to_string(), 1, 1), None);
        assert_eq!(shard.insert_if_absent("key".to_string(), 2, 5), Some(1));
        assert_eq!(shard.len(), 1);
        // The losing insert still refreshed the existing entry
        assert_eq!(shard.stamps(), vec![("key".to_string(), 5)]);
    }

    #[test]
    fn test_shard_remove() {
        let shard: Shard<String, i32> = Shard::new();
        shard.insert("key1".to_string(), 42, 1);

        assert_eq!(shard.remove("key1"), Some(42));
        assert!(shard.is_empty());
        assert_eq!(shard.remove("key1"), None);
    }

    #[test]
    fn test_shard_remove_if() {
        let shard: Shard<String, i32> = Shard::new();
        shard.insert("key".to_string(), 7, 1);

        assert_eq!(shard.remove_if("key", |v| *v == 8), None);
        assert_eq!(shard.len(), 1);

        assert_eq!(shard.remove_if("key", |v| *v == 7), Some(7));
        assert!(shard.is_empty());

        assert_eq!(shard.remove_if("missing", |_| true), None);
    }

    #[test]
    fn test_shard_remove_if_untouched() {
        let shard: Shard<String, i32> = Shard::new();
        shard.insert("key".to_string(), 1, 3);
        shard.get("key", 9);

        // Snapshot stamp 3 is stale, entry was read at 9
        assert!(!shard.remove_if_untouched("key", 3));
        assert!(shard.remove_if_untouched("key", 9));
        assert!(shard.is_empty());
    }

    #[test]
    fn test_shard_clear() {
        let shard: Shard<String, i32> = Shard::new();
        shard.insert("key1".to_string(), 1, 1);
        shard.insert("key2".to_string(), 2, 2);
        shard.insert("key3".to_string(), 3, 3);

        assert_eq!(shard.clear(), 3);
        assert!(shard.is_empty());
    }

    #[test]
    fn test_sharded_map_creation() {
        let map: ShardedMap<String, i32, 8> = ShardedMap::new();
        assert!(map.is_empty());
        assert_eq!(map.shards().count(), 8);
    }

    #[test]
    fn test_sharded_map_routing_is_stable() {
        let map: ShardedMap<String, i32, 8> = ShardedMap::new();
        for i in 0..100 {
            let key = format!("key{}", i);
            map.shard_for(key.as_str()).insert(key.clone(), i, i as u64);
        }
        assert_eq!(map.len(), 100);
        for i in 0..100 {
            let key = format!("key{}", i);
            assert_eq!(map.shard_for(key.as_str()).get(key.as_str(), 1000), Some(i));
        }
    }

    #[test]
    fn test_sharded_map_distribution() {
        let map: ShardedMap<String, i32, 16> = ShardedMap::new();

        for i in 0..1000 {
            let key = format!("key{}", i);
            map.shard_for(key.as_str()).insert(key.clone(), i, 1);
        }

        let counts: Vec<usize> = map.shards().map(|s| s.len()).collect();
        let max_count = counts.iter().max().unwrap();
        assert!(*max_count < 200, "Uneven distribution: max shard has {} entries", max_count);
    }

    #[test]
    fn test_sharded_map_clear() {
        let map: ShardedMap<String, i32, 4> = ShardedMap::new();
        for i in 0..50 {
            let key = format!("key{}", i);
            map.shard_for(key.as_str()).insert(key.clone(), i, 1);
        }
        assert_eq!(map.clear(), 50);
        assert!(map.is_empty());
    }
}
