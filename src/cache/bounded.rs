//! Bounded Concurrent Map
//!
//! Thread-safe, fixed-capacity key/value store with least-recently-used
//! eviction.
//!
//! # Design
//!
//! - Storage is a [`ShardedMap`]; reads take only a shard read lock
//! - Every read or write stamps the entry from a per-map [`AccessClock`]
//! - When a write pushes the map past `max_size`, a sweep collects
//!   `(key, stamp)` from every shard, sorts ascending and removes from the
//!   front until the bound holds again
//! - Sweeps are serialized; an entry read after the sweep's snapshot is
//!   skipped on the first pass, so eviction is nearest-LRU, not exact

use std::borrow::Borrow;
use std::hash::Hash;

use parking_lot::Mutex;
use tracing::debug;

use super::entry::AccessClock;
use super::shard::ShardedMap;
use super::stats::{CacheCounters, CacheStats};
use super::SHARD_COUNT;
use crate::error::{Error, Result};

/// Fixed-capacity concurrent map with LRU eviction
pub struct BoundedConcurrentMap<K, V> {
    store: ShardedMap<K, V, SHARD_COUNT>,
    max_size: usize,
    clock: AccessClock,
    counters: CacheCounters,
    eviction: Mutex<()>,
}

impl<K, V> BoundedConcurrentMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a map holding at most `max_size` entries.
    ///
    /// A zero capacity is a configuration error.
    pub fn new(max_size: usize) -> Result<Self> {
        if max_size == 0 {
            return Err(Error::InvalidCapacity {
                name: String::from("<unnamed>"),
                capacity: max_size,
            });
        }
        Ok(Self {
            store: ShardedMap::new(),
            max_size,
            clock: AccessClock::new(),
            counters: CacheCounters::new(),
            eviction: Mutex::new(()),
        })
    }

    /// Get a value, refreshing its recency
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let value = self.store.shard_for(key).get(key, self.clock.tick());
        self.counters.record_lookup(value.is_some());
        value
    }

    /// Get a value without touching recency or hit/miss counters
    pub fn peek<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.store.shard_for(key).peek(key)
    }

    /// Insert or overwrite, returning the previous value
    pub fn put(&self, key: K, value: V) -> Option<V> {
        let previous = self
            .store
            .shard_for(&key)
            .insert(key, value, self.clock.tick());
        if previous.is_none() {
            self.counters.record_insertion();
            self.enforce_bound();
        }
        previous
    }

    /// Insert only if `key` is vacant, atomically for that key.
    ///
    /// Returns the value already present, or `None` if `value` was stored.
    pub fn put_if_absent(&self, key: K, value: V) -> Option<V> {
        let existing = self
            .store
            .shard_for(&key)
            .insert_if_absent(key, value, self.clock.tick());
        if existing.is_none() {
            self.counters.record_insertion();
            self.enforce_bound();
        }
        existing
    }

    /// Remove a value, returning it if present
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let removed = self.store.shard_for(key).remove(key);
        if removed.is_some() {
            self.counters.record_removal();
        }
        removed
    }

    /// Remove a value only if `predicate` accepts it, atomically for that key
    pub fn remove_if<Q, F>(&self, key: &Q, predicate: F) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        F: FnOnce(&V) -> bool,
    {
        let removed = self.store.shard_for(key).remove_if(key, predicate);
        if removed.is_some() {
            self.counters.record_removal();
        }
        removed
    }

    /// Check if a key exists. Does not refresh recency.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.store.shard_for(key).contains_key(key)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Check if the map is empty
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Configured capacity
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Remove every entry
    pub fn clear(&self) {
        self.store.clear();
    }

    /// All keys, in no particular order
    pub fn keys(&self) -> Vec<K> {
        self.store.shards().flat_map(|s| s.keys()).collect()
    }

    /// All values, in no particular order
    pub fn values(&self) -> Vec<V> {
        self.store.shards().flat_map(|s| s.values()).collect()
    }

    /// All entries, in no particular order
    pub fn entries(&self) -> Vec<(K, V)> {
        self.store.shards().flat_map(|s| s.entries()).collect()
    }

    /// Statistics snapshot
    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot(self.len(), self.max_size)
    }

    /// Evict least-recently-used entries until `len() <= max_size`.
    fn enforce_bound(&self) {
        if self.store.len() <= self.max_size {
            return;
        }

        let _sweep = self.eviction.lock();
        let mut evicted = 0u64;
        let mut pass = 0u32;

        while self.store.len() > self.max_size {
            let mut candidates: Vec<(K, u64)> =
                self.store.shards().flat_map(|s| s.stamps()).collect();
            candidates.sort_unstable_by_key(|(_, stamp)| *stamp);

            // First pass spares entries touched since the snapshot; later
            // passes remove unconditionally so the sweep always terminates.
            let force = pass > 0;
            for (key, stamp) in candidates {
                if self.store.len() <= self.max_size {
                    break;
                }
                let shard = self.store.shard_for(&key);
                let removed = if force {
                    shard.remove(&key).is_some()
                } else {
                    shard.remove_if_untouched(&key, stamp)
                };
                if removed {
                    evicted += 1;
                }
            }
            pass += 1;
        }

        if evicted > 0 {
            self.counters.record_sweep(evicted);
            debug!(
                evicted,
                passes = pass,
                max_size = self.max_size,
                clock = self.clock.current(),
                "Eviction sweep complete"
            );
        }
    }
}

impl<K, V> std::fmt::Debug for BoundedConcurrentMap<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedConcurrentMap")
            .field("len", &self.store.len())
            .field("max_size", &self.max_size)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================


// =============================================================================
// Property Tests
// =============================================================================
