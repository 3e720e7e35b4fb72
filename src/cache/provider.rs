//! Cache Capability and Provider
//!
//! [`Cache`] is the interface every consumer depends on; a
//! [`BoundedConcurrentMap`] wrapped in a [`ScopedCache`] is the local
//! implementation. [`CacheProvider`] resolves a `(name, scope)` pair to one
//! stable cache instance.
//!
//! # Resolution
//!
//! ```text
//! get_cache(name, REQUEST)            → current UnitOfWork registry
//! get_cache(name, INSTANCE)           ┐
//! get_cache(name, CLUSTERREPLICATED)  ┘→ provider-wide DashMap registry
//! ```
//!
//! The provider performs no I/O. CLUSTERREPLICATED caches are local here;
//! a replicating provider supplies the cross-process propagation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use super::bounded::BoundedConcurrentMap;
use super::scope::CacheScope;
use super::stats::CacheStats;
use crate::config::{validate_cache_name, ProviderConfig};
use crate::context::{ErasedCache, UnitOfWork};
use crate::error::{Error, Result};

/// Bounds every cached value type must satisfy
pub trait CacheValue: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> CacheValue for T {}

/// String-keyed cache capability.
///
/// Single-key operations are linearizable. `put_if_absent` and `remove_if`
/// are atomic check-and-set primitives for one key.
pub trait Cache<V>: Send + Sync {
    /// Cache name
    fn name(&self) -> &str;

    /// Cache scope
    fn scope(&self) -> CacheScope;

    /// Get a value
    fn get(&self, key: &str) -> Option<V>;

    /// Get a value without counting it as an access
    fn peek(&self, key: &str) -> Option<V>;

    /// Insert or overwrite, returning the previous value
    fn put(&self, key: String, value: V) -> Option<V>;

    /// Insert if vacant, returning the existing value when occupied
    fn put_if_absent(&self, key: String, value: V) -> Option<V>;

    /// Remove a value
    fn remove(&self, key: &str) -> Option<V>;

    /// Remove a value if `predicate` accepts it
    fn remove_if(&self, key: &str, predicate: &dyn Fn(&V) -> bool) -> Option<V>;

    /// Check if a key exists
    fn contains_key(&self, key: &str) -> bool;

    /// Number of entries
    fn len(&self) -> usize;

    /// Check if the cache is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every entry
    fn clear(&self);

    /// All keys
    fn keys(&self) -> Vec<String>;

    /// All values
    fn values(&self) -> Vec<V>;

    /// Statistics snapshot
    fn stats(&self) -> CacheStats;
}

/// A named, scoped [`BoundedConcurrentMap`]
pub struct ScopedCache<V> {
    name: String,
    scope: CacheScope,
    store: BoundedConcurrentMap<String, V>,
}

impl<V: CacheValue> ScopedCache<V> {
    /// Create a cache holding at most `capacity` entries
    pub fn new(name: impl Into<String>, scope: CacheScope, capacity: usize) -> Result<Self> {
        let name = name.into();
        validate_cache_name(&name)?;
        let store = BoundedConcurrentMap::new(capacity).map_err(|_| Error::InvalidCapacity {
            name: name.clone(),
            capacity,
        })?;
        Ok(Self { name, scope, store })
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.store.max_size()
    }
}

impl<V: CacheValue> Cache<V> for ScopedCache<V> {
    fn name(&self) -> &str {
        &self.name
    }

    fn scope(&self) -> CacheScope {
        self.scope
    }

    fn get(&self, key: &str) -> Option<V> {
        self.store.get(key)
    }

    fn peek(&self, key: &str) -> Option<V> {
        self.store.peek(key)
    }

    fn put(&self, key: String, value: V) -> Option<V> {
        self.store.put(key, value)
    }

    fn put_if_absent(&self, key: String, value: V) -> Option<V> {
        self.store.put_if_absent(key, value)
    }

    fn remove(&self, key: &str) -> Option<V> {
        self.store.remove(key)
    }

    fn remove_if(&self, key: &str, predicate: &dyn Fn(&V) -> bool) -> Option<V> {
        self.store.remove_if(key, predicate)
    }

    fn contains_key(&self, key: &str) -> bool {
        self.store.contains_key(key)
    }

    fn len(&self) -> usize {
        self.store.len()
    }

    fn clear(&self) {
        self.store.clear()
    }

    fn keys(&self) -> Vec<String> {
        self.store.keys()
    }

    fn values(&self) -> Vec<V> {
        self.store.values()
    }

    fn stats(&self) -> CacheStats {
        self.store.stats()
    }
}

impl<V> std::fmt::Debug for ScopedCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedCache")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("store", &self.store)
            .finish()
    }
}

impl<V> std::fmt::Debug for dyn Cache<V> + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.name())
            .field("scope", &self.scope())
            .finish()
    }
}

/// Registry handing out caches by name and scope
pub trait CacheProvider: Send + Sync {
    /// Resolve (creating on first use) the cache for `(name, scope)`.
    ///
    /// Repeated calls with the same pair return the same instance; REQUEST
    /// scope is resolved per unit of work.
    fn get_cache<V: CacheValue>(&self, name: &str, scope: CacheScope) -> Result<Arc<dyn Cache<V>>>;

    /// Discard every cache of `scope` for the current binding, returning how
    /// many were dropped
    fn unbind(&self, scope: CacheScope) -> usize;

    /// Names of the caches currently bound in `scope`
    fn cache_names(&self, scope: CacheScope) -> Vec<String>;

    /// Static node identity this provider was configured with, if any
    fn node_id(&self) -> Option<&str> {
        None
    }
}

static NEXT_PROVIDER_ID: AtomicU64 = AtomicU64::new(1);

/// In-process cache provider
pub struct LocalCacheProvider {
    id: u64,
    config: ProviderConfig,
    caches: DashMap<(CacheScope, String), ErasedCache>,
}

impl LocalCacheProvider {
    /// Create a provider with default capacities
    pub fn new() -> Self {
        Self::build(ProviderConfig::default())
    }

    /// Create a provider from a validated configuration
    pub fn with_config(config: ProviderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: ProviderConfig) -> Self {
        Self {
            id: NEXT_PROVIDER_ID.fetch_add(1, Ordering::Relaxed),
            config,
            caches: DashMap::new(),
        }
    }

    /// Get configuration
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn create<V: CacheValue>(&self, name: &str, scope: CacheScope) -> Result<ErasedCache> {
        let capacity = self.config.capacity_for(name, scope);
        let cache = ScopedCache::<V>::new(name, scope, capacity)?;
        debug!(cache = name, %scope, capacity, "Created cache");
        Ok(Arc::new(cache) as ErasedCache)
    }

    fn downcast<V: CacheValue>(
        erased: ErasedCache,
        name: &str,
        scope: CacheScope,
    ) -> Result<Arc<dyn Cache<V>>> {
        match erased.downcast::<ScopedCache<V>>() {
            Ok(cache) => Ok(cache as Arc<dyn Cache<V>>),
            Err(_) => Err(Error::CacheTypeMismatch {
                name: name.to_string(),
                scope,
            }),
        }
    }
}

impl Default for LocalCacheProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheProvider for LocalCacheProvider {
    fn get_cache<V: CacheValue>(&self, name: &str, scope: CacheScope) -> Result<Arc<dyn Cache<V>>> {
        validate_cache_name(name)?;

        let erased = if scope.is_per_unit_of_work() {
            UnitOfWork::current().request_cache(self.id, name, || self.create::<V>(name, scope))?
        } else {
            match self.caches.entry((scope, name.to_string())) {
                Entry::Occupied(existing) => Arc::clone(existing.get()),
                Entry::Vacant(slot) => {
                    let cache = self.create::<V>(name, scope)?;
                    slot.insert(Arc::clone(&cache));
                    cache
                }
            }
        };

        Self::downcast(erased, name, scope)
    }

    fn unbind(&self, scope: CacheScope) -> usize {
        let dropped = if scope.is_per_unit_of_work() {
            UnitOfWork::current().unbind_provider(self.id)
        } else {
            let before = self.caches.len();
            self.caches.retain(|(s, _), _| *s != scope);
            before - self.caches.len()
        };
        debug!(%scope, dropped, "Unbound caches");
        dropped
    }

    fn cache_names(&self, scope: CacheScope) -> Vec<String> {
        if scope.is_per_unit_of_work() {
            return UnitOfWork::current().request_cache_names(self.id);
        }
        self.caches
            .iter()
            .filter(|entry| entry.key().0 == scope)
            .map(|entry| entry.key().1.clone())
            .collect()
    }

    fn node_id(&self) -> Option<&str> {
        self.config.node_id.as_deref()
    }
}

impl std::fmt::Debug for LocalCacheProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCacheProvider")
            .field("id", &self.id)
            .field("caches", &self.caches.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
