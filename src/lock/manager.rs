//! Lock Manager
//!
//! Named, ownership-tracked, reentrant-for-owner mutual exclusion over two
//! caches from a [`CacheProvider`]:
//!
//! - `lockmap` (CLUSTERREPLICATED): key → [`LockRecord`], the single source
//!   of truth for ownership
//! - `heldlocks` (REQUEST): key → [`Lock`] for every key the current unit of
//!   work claimed, swept by [`LockManager::clear_all`]
//!
//! # State per key
//!
//! ```text
//! owner view:    UNLOCKED ──acquire (free)──▶ LOCKED_OWNED ──release | clear_all──▶ UNLOCKED
//! foreign view:  UNLOCKED ──other acquires──▶ LOCKED_FOREIGN ──other releases──▶ UNLOCKED
//! ```
//!
//! Nothing here blocks or retries. Contention is settled by the lock map's
//! `put_if_absent`: first writer wins, everyone else gets a foreign handle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, instrument, warn};

use super::handle::{Lock, LockRecord, OwnerId};
use super::membership::{ClusterMembership, NodeId, StaticMembership};
use crate::cache::{Cache, CacheProvider, CacheScope, CacheStats, LocalCacheProvider};
use crate::config::ProviderConfig;
use crate::context::UnitOfWork;
use crate::error::Result;

/// Name of the cluster-scoped ownership cache
pub const LOCK_MAP_CACHE: &str = "lockmap";

/// Name of the request-scoped held-locks cache
pub const HELD_LOCKS_CACHE: &str = "heldlocks";

type HeldLocks = Arc<dyn Cache<Arc<Lock>>>;

#[derive(Debug, Default)]
struct LockCounters {
    acquired: AtomicU64,
    reentrant: AtomicU64,
    contended: AtomicU64,
    absent: AtomicU64,
    released: AtomicU64,
    sweeps: AtomicU64,
}

impl LockCounters {
    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Lock manager statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LockStats {
    /// Fresh claims that won
    pub acquired: u64,
    /// Acquisitions satisfied by a lock the unit of work already held
    pub reentrant: u64,
    /// Acquisitions that observed another owner
    pub contended: u64,
    /// Lookups without create that found no owner
    pub absent: u64,
    /// Locks released, explicitly or by a sweep
    pub released: u64,
    /// `clear_all` invocations
    pub sweeps: u64,
    /// Keys currently recorded in the lock map
    pub cluster_locks: usize,
}

/// Named lock manager
pub struct LockManager<P: CacheProvider = LocalCacheProvider> {
    provider: Arc<P>,
    lock_map: Arc<dyn Cache<LockRecord>>,
    node: NodeId,
    counters: LockCounters,
}

impl LockManager<LocalCacheProvider> {
    /// Lock manager over a default in-process provider
    pub fn local() -> Result<Self> {
        Self::from_config(ProviderConfig::default())
    }

    /// Lock manager over an in-process provider built from `config`
    pub fn from_config(config: ProviderConfig) -> Result<Self> {
        let membership = StaticMembership::from_config(&config);
        let provider = Arc::new(LocalCacheProvider::with_config(config)?);
        Self::new(provider, &membership)
    }
}

impl<P: CacheProvider> LockManager<P> {
    /// Create a lock manager.
    ///
    /// Resolves the lock map eagerly so misconfiguration fails here.
    pub fn new(provider: Arc<P>, membership: &dyn ClusterMembership) -> Result<Self> {
        let lock_map =
            provider.get_cache::<LockRecord>(LOCK_MAP_CACHE, CacheScope::ClusterReplicated)?;
        let node = membership.node_id();
        debug!(node = %node, "Lock manager ready");
        Ok(Self {
            provider,
            lock_map,
            node,
            counters: LockCounters::default(),
        })
    }

    /// Node this manager attributes claims to
    pub fn node_id(&self) -> &NodeId {
        &self.node
    }

    /// Backing provider
    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    /// Owner identity of the current unit of work
    pub fn current_owner(&self) -> OwnerId {
        OwnerId::new(self.node.clone(), UnitOfWork::current_id())
    }

    fn held_locks(&self) -> Result<HeldLocks> {
        self.provider
            .get_cache::<Arc<Lock>>(HELD_LOCKS_CACHE, CacheScope::Request)
    }

    /// Acquire `key`, claiming it if free.
    ///
    /// Returns an owned lock, or a foreign one (`is_owner() == false`) when
    /// another unit of work holds the key. Never blocks.
    pub fn acquire(&self, key: &str) -> Result<Arc<Lock>> {
        let held = self.held_locks()?;
        let me = self.current_owner();
        if let Some(lock) = self.reentrant(&held, key, &me) {
            return Ok(lock);
        }
        Ok(self.claim(&held, key, me))
    }

    /// Acquire `key`, claiming it only if `create_if_absent`.
    ///
    /// Without create, an unclaimed key yields `None`.
    pub fn acquire_with(&self, key: &str, create_if_absent: bool) -> Result<Option<Arc<Lock>>> {
        if create_if_absent {
            return self.acquire(key).map(Some);
        }

        let held = self.held_locks()?;
        let me = self.current_owner();
        if let Some(lock) = self.reentrant(&held, key, &me) {
            return Ok(Some(lock));
        }
        match self.lock_map.get(key) {
            Some(record) => Ok(Some(self.adopt_or_observe(&held, key, record, &me))),
            None => {
                LockCounters::inc(&self.counters.absent);
                Ok(None)
            }
        }
    }

    /// Release a lock this unit of work owns.
    ///
    /// Foreign and already-released handles are ignored.
    pub fn release(&self, lock: &Lock) {
        if !lock.is_owner() || !lock.mark_unlocked() {
            return;
        }

        let removed = self
            .lock_map
            .remove_if(lock.key(), &|record| record == lock.record())
            .is_some();

        match self.held_locks() {
            Ok(held) => {
                held.remove_if(lock.key(), &|tracked| tracked.record() == lock.record());
            }
            Err(err) => warn!(key = lock.key(), error = %err, "Held-locks cache unavailable"),
        }

        LockCounters::inc(&self.counters.released);
        debug!(key = lock.key(), owner = %lock.owner(), removed, "Lock released");
    }

    /// Release every lock held by the current unit of work.
    ///
    /// Call once at the end of each unit of work. Safe to call redundantly.
    #[instrument(level = "debug", skip(self))]
    pub fn clear_all(&self) {
        LockCounters::inc(&self.counters.sweeps);

        let held = match self.held_locks() {
            Ok(held) => held,
            Err(err) => {
                warn!(error = %err, "Held-locks cache unavailable, nothing swept");
                return;
            }
        };

        let mut released = 0u64;
        for lock in held.values() {
            if lock.mark_unlocked() {
                self.lock_map
                    .remove_if(lock.key(), &|record| record == lock.record());
                released += 1;
            }
        }

        // Held-locks entries lost to eviction leave claims we can no longer
        // see locally; find them in the lock map instead.
        if held.stats().evictions > 0 {
            let me = self.current_owner();
            for key in self.lock_map.keys() {
                if self
                    .lock_map
                    .remove_if(&key, &|record| record.is_owned_by(&me))
                    .is_some()
                {
                    released += 1;
                }
            }
        }

        held.clear();
        self.counters.released.fetch_add(released, Ordering::Relaxed);
        if released > 0 {
            debug!(released, "Released held locks");
        }
    }

    /// Run `f` in a fresh unit of work, sweeping its locks when it ends
    /// (including on panic).
    pub fn with_unit_of_work<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _uow = UnitOfWork::begin();
        let _sweep = SweepOnDrop(self);
        f()
    }

    /// Current claim on `key`, if any
    pub fn owner_of(&self, key: &str) -> Option<LockRecord> {
        self.lock_map.get(key)
    }

    /// Check if anyone holds `key`
    pub fn is_locked(&self, key: &str) -> bool {
        self.lock_map.contains_key(key)
    }

    /// Keys held by the current unit of work
    pub fn held_keys(&self) -> Result<Vec<String>> {
        Ok(self.held_locks()?.keys())
    }

    /// Statistics snapshot
    pub fn stats(&self) -> LockStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        LockStats {
            acquired: load(&self.counters.acquired),
            reentrant: load(&self.counters.reentrant),
            contended: load(&self.counters.contended),
            absent: load(&self.counters.absent),
            released: load(&self.counters.released),
            sweeps: load(&self.counters.sweeps),
            cluster_locks: self.lock_map.len(),
        }
    }

    /// Lock map cache statistics
    pub fn lock_map_stats(&self) -> CacheStats {
        self.lock_map.stats()
    }

    /// Return the tracked lock if it is still ours, dropping it if stale.
    fn reentrant(&self, held: &HeldLocks, key: &str, me: &OwnerId) -> Option<Arc<Lock>> {
        let lock = held.get(key)?;
        // Reading through the lock map keeps a claim in use from aging out
        let still_ours = lock.owner() == me
            && self
                .lock_map
                .get(key)
                .is_some_and(|record| record == *lock.record())
            && lock.is_locked();
        if still_ours {
            LockCounters::inc(&self.counters.reentrant);
            debug!(key, "Reentrant acquire");
            return Some(lock);
        }

        // The claim disappeared underneath us (evicted or released through
        // another handle path); the tracked handle is dead.
        held.remove_if(key, &|tracked| Arc::ptr_eq(tracked, &lock));
        lock.mark_unlocked();
        debug!(key, "Dropped stale held lock");
        None
    }

    fn claim(&self, held: &HeldLocks, key: &str, me: OwnerId) -> Arc<Lock> {
        let record = LockRecord::new(me.clone());
        match self.lock_map.put_if_absent(key.to_string(), record.clone()) {
            None => {
                let lock = Arc::new(Lock::owned(key, record, &self.lock_map));
                held.put(key.to_string(), Arc::clone(&lock));
                LockCounters::inc(&self.counters.acquired);
                debug!(key, owner = %me, "Lock acquired");
                lock
            }
            Some(existing) => self.adopt_or_observe(held, key, existing, &me),
        }
    }

    fn adopt_or_observe(
        &self,
        held: &HeldLocks,
        key: &str,
        record: LockRecord,
        me: &OwnerId,
    ) -> Arc<Lock> {
        if record.is_owned_by(me) {
            // Our claim, no longer tracked locally: track it again.
            let lock = Arc::new(Lock::owned(key, record, &self.lock_map));
            held.put(key.to_string(), Arc::clone(&lock));
            LockCounters::inc(&self.counters.reentrant);
            debug!(key, "Re-tracked existing claim");
            return lock;
        }

        LockCounters::inc(&self.counters.contended);
        debug!(key, owner = %record.owner, "Lock held by another owner");
        Arc::new(Lock::foreign(key, record, &self.lock_map))
    }
}

impl<P: CacheProvider> std::fmt::Debug for LockManager<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("node", &self.node)
            .field("cluster_locks", &self.lock_map.len())
            .finish()
    }
}

struct SweepOnDrop<'a, P: CacheProvider>(&'a LockManager<P>);

impl<P: CacheProvider> Drop for SweepOnDrop<'_, P> {
    fn drop(&mut self) {
        self.0.clear_all();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn manager() -> LockManager {
        LockManager::local().unwrap()
    }

    /// Run `f` on a fresh thread, i.e. in a different unit of work.
    fn elsewhere<T, F>(f: F) -> T
    where
        F: FnOnce() -> T + Send,
        T: Send,
    {
        thread::scope(|s| s.spawn(f).join().unwrap())
    }

    #[test]
    fn test_basic_lock_cycle() {
        let mgr = manager();

        let lock = mgr.acquire("foo").unwrap();
        assert_eq!(lock.key(), "foo");
        assert!(lock.is_owner());
        assert!(lock.is_locked());
        assert!(mgr.is_locked("foo"));

        mgr.release(&lock);
        assert!(!lock.is_locked());
        assert!(!mgr.is_locked("foo"));

        assert!(mgr.acquire_with("foo", false).unwrap().is_none());
        assert!(elsewhere(|| mgr.acquire_with("foo", false).unwrap()).is_none());
    }

    #[test]
    fn test_reentrant_acquire() {
        let mgr = manager();

        let first = mgr.acquire("foo").unwrap();
        let second = mgr.acquire("foo").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(second.is_owner() && second.is_locked());

        let third = mgr.acquire_with("foo", false).unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &third));

        mgr.release(&second);
        assert!(!first.is_locked());
        assert!(mgr.owner_of("foo").is_none());

        let stats = mgr.stats();
        assert_eq!(stats.acquired, 1);
        assert_eq!(stats.reentrant, 2);
    }

    #[test]
    fn test_mutual_exclusion_across_units_of_work() {
        let mgr = manager();
        let mine = mgr.acquire("foo").unwrap();
        assert!(mine.is_owner());

        let theirs = elsewhere(|| mgr.acquire_with("foo", false).unwrap());
        let theirs = theirs.expect("claimed key is visible");
        assert!(!theirs.is_owner());
        assert!(theirs.is_locked());
        assert_eq!(theirs.owner(), mine.owner());

        let created = elsewhere(|| mgr.acquire("foo").unwrap());
        assert!(!created.is_owner());
        assert_eq!(mgr.stats().contended, 2);
    }

    #[test]
    fn test_foreign_handles_are_not_tracked() {
        let mgr = manager();
        let _mine = mgr.acquire("foo").unwrap();

        let held = elsewhere(|| {
            mgr.acquire("foo").unwrap();
            mgr.held_keys().unwrap()
        });
        assert!(held.is_empty());
    }

    #[test]
    fn test_release_foreign_is_noop() {
        let mgr = manager();
        let mine = mgr.acquire("foo").unwrap();

        elsewhere(|| {
            let foreign = mgr.acquire("foo").unwrap();
            mgr.release(&foreign);
            assert!(foreign.is_locked());
        });

        assert!(mine.is_locked());
        assert_eq!(mgr.owner_of("foo").unwrap().owner, *mine.owner());
    }

    #[test]
    fn test_idempotent_release() {
        let mgr = manager();
        let lock = mgr.acquire("foo").unwrap();

        mgr.release(&lock);
        let after_first = mgr.stats();
        mgr.release(&lock);
        mgr.clear_all();

        assert_eq!(mgr.stats().released, after_first.released);
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_clear_all_with_nothing_held() {
        let mgr = manager();
        mgr.clear_all();
        mgr.clear_all();
        assert_eq!(mgr.stats().released, 0);
        assert_eq!(mgr.stats().sweeps, 2);
    }

    #[test]
    fn test_clear_all_sweep() {
        let mgr = manager();
        let locks: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|k| mgr.acquire(k).unwrap())
            .collect();
        let mut held = mgr.held_keys().unwrap();
        held.sort();
        assert_eq!(held, vec!["a", "b", "c"]);

        mgr.clear_all();
        assert!(locks.iter().all(|l| !l.is_locked()));
        assert!(mgr.held_keys().unwrap().is_empty());

        elsewhere(|| {
            for key in ["a", "b", "c"] {
                assert!(mgr.acquire_with(key, false).unwrap().is_none());
                let lock = mgr.acquire(key).unwrap();
                assert!(lock.is_owner());
            }
        });
    }

    #[test]
    fn test_reacquire_yields_new_handle() {
        let mgr = manager();
        let first = mgr.acquire("foo").unwrap();
        mgr.release(&first);

        let second = mgr.acquire("foo").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!first.is_locked());
        assert!(second.is_locked());
    }

    #[test]
    fn test_with_unit_of_work_sweeps() {
        let mgr = manager();
        let lock = mgr.with_unit_of_work(|| mgr.acquire("job").unwrap());
        assert!(!lock.is_locked());
        assert!(!mgr.is_locked("job"));
    }

    #[test]
    fn test_with_unit_of_work_sweeps_on_panic() {
        let mgr = manager();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            mgr.with_unit_of_work(|| {
                mgr.acquire("doomed").unwrap();
                panic!("unit of work failed");
            })
        }));
        assert!(result.is_err());
        assert!(!mgr.is_locked("doomed"));
    }

    #[test]
    fn test_units_of_work_on_one_thread_are_distinct_owners() {
        let mgr = manager();
        let outer = mgr.acquire("shared").unwrap();
        mgr.with_unit_of_work(|| {
            let inner = mgr.acquire("shared").unwrap();
            assert!(!inner.is_owner());
        });
        assert!(outer.is_locked());
        assert!(mgr.is_locked("shared"));
    }

    #[test]
    fn test_evicted_claim_is_not_reentrant() {
        let config = ProviderConfig::default().with_capacity(LOCK_MAP_CACHE, 1);
        let mgr = LockManager::from_config(config).unwrap();

        let a = mgr.acquire("a").unwrap();
        let b = mgr.acquire("b").unwrap();
        assert!(b.is_locked());
        assert!(!mgr.is_locked("a"));
        assert!(!a.is_locked());

        // The tracked handle for "a" lost its claim; acquiring again re-claims
        let again = mgr.acquire("a").unwrap();
        assert!(!Arc::ptr_eq(&a, &again));
        assert!(!a.is_locked());
        assert!(again.is_owner() && again.is_locked());
        assert!(!b.is_locked());
    }

    #[test]
    fn test_evicted_claim_taken_elsewhere_leaves_one_holder() {
        let config = ProviderConfig::default().with_capacity(LOCK_MAP_CACHE, 1);
        let mgr = LockManager::from_config(config).unwrap();

        let a = mgr.acquire("a").unwrap();
        mgr.acquire("b").unwrap();

        let theirs = elsewhere(|| mgr.acquire("a").unwrap());
        assert!(theirs.is_owner() && theirs.is_locked());
        assert!(a.is_owner());
        assert!(!a.is_locked());

        // Releasing the dead handle must not free the new claim
        mgr.release(&a);
        assert!(theirs.is_locked());
        assert_eq!(mgr.owner_of("a").unwrap().owner, *theirs.owner());
    }

    #[test]
    fn test_clear_all_finds_untracked_claims() {
        let config = ProviderConfig::default().with_capacity(HELD_LOCKS_CACHE, 1);
        let mgr = LockManager::from_config(config).unwrap();

        let x = mgr.acquire("x").unwrap();
        let y = mgr.acquire("y").unwrap();
        assert_eq!(mgr.held_keys().unwrap().len(), 1);
        assert!(mgr.is_locked("x"));
        assert!(x.is_locked() && y.is_locked());

        mgr.clear_all();
        assert!(!mgr.is_locked("x"));
        assert!(!mgr.is_locked("y"));
        assert!(!x.is_locked());
        assert!(!y.is_locked());
        assert_eq!(mgr.stats().cluster_locks, 0);
    }

    #[test]
    fn test_node_attribution() {
        let config = ProviderConfig::default().with_node_id("node-7");
        let mgr = LockManager::from_config(config).unwrap();
        assert_eq!(mgr.node_id().as_str(), "node-7");

        let lock = mgr.acquire("k").unwrap();
        assert_eq!(lock.owner().node.as_str(), "node-7");
        assert_eq!(lock.owner().context, UnitOfWork::current_id());
    }

    #[test]
    fn test_concurrent_claims_single_winner() {
        let mgr = manager();
        let winners: usize = thread::scope(|s| {
            let handles: Vec<_> = (0..16)
                .map(|_| s.spawn(|| mgr.acquire("contended").unwrap().is_owner()))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap() as usize)
                .sum()
        });
        assert_eq!(winners, 1);
    }
}
