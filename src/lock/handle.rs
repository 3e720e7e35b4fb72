//! Lock Handles and Records

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::membership::NodeId;
use crate::cache::Cache;
use crate::context::ContextId;

/// Identity of a lock owner: one unit of work on one node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct OwnerId {
    /// Node the owning unit of work runs on
    pub node: NodeId,
    /// Owning unit of work
    pub context: ContextId,
}

impl OwnerId {
    /// Create an owner id
    pub fn new(node: NodeId, context: ContextId) -> Self {
        Self { node, context }
    }
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.node, self.context)
    }
}

/// Value stored in the cluster lock map for a claimed key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockRecord {
    /// Who claimed the key
    pub owner: OwnerId,
    /// When the claim was made
    pub acquired_at: DateTime<Utc>,
}

impl LockRecord {
    /// A record attributing a claim made now to `owner`
    pub fn new(owner: OwnerId) -> Self {
        Self {
            owner,
            acquired_at: Utc::now(),
        }
    }

    /// Check if `owner` made this claim
    pub fn is_owned_by(&self, owner: &OwnerId) -> bool {
        self.owner == *owner
    }
}

/// Exclusive-access handle for one key.
///
/// Created only by [`super::LockManager`]. `is_owner` is fixed at creation.
/// `is_locked` is live: it holds while the lock map still carries the exact
/// claim this handle was created for and no release went through it. Once
/// false it stays false; acquiring the key again yields a new handle.
pub struct Lock {
    key: String,
    record: LockRecord,
    is_owner: bool,
    locked: AtomicBool,
    lock_map: Weak<dyn Cache<LockRecord>>,
}

impl Lock {
    pub(crate) fn owned(
        key: impl Into<String>,
        record: LockRecord,
        lock_map: &Arc<dyn Cache<LockRecord>>,
    ) -> Self {
        Self::with_owner(key, record, true, lock_map)
    }

    pub(crate) fn foreign(
        key: impl Into<String>,
        record: LockRecord,
        lock_map: &Arc<dyn Cache<LockRecord>>,
    ) -> Self {
        Self::with_owner(key, record, false, lock_map)
    }

    fn with_owner(
        key: impl Into<String>,
        record: LockRecord,
        is_owner: bool,
        lock_map: &Arc<dyn Cache<LockRecord>>,
    ) -> Self {
        Self {
            key: key.into(),
            record,
            is_owner,
            locked: AtomicBool::new(true),
            lock_map: Arc::downgrade(lock_map),
        }
    }

    /// The locked key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// True iff the unit of work that acquired this handle made the claim
    pub fn is_owner(&self) -> bool {
        self.is_owner
    }

    /// True while the claim this handle observed is still in the lock map.
    ///
    /// Goes false on release, on a sweep, when the claim is evicted or
    /// replaced by another owner, and when the lock manager is dropped.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire) && self.claim_is_live()
    }

    /// The owner attributed in the lock map when this handle was created
    pub fn owner(&self) -> &OwnerId {
        &self.record.owner
    }

    /// When the key was claimed
    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.record.acquired_at
    }

    pub(crate) fn record(&self) -> &LockRecord {
        &self.record
    }

    /// Flip to unlocked; true only for the call that performed the flip
    pub(crate) fn mark_unlocked(&self) -> bool {
        self.locked.swap(false, Ordering::AcqRel)
    }

    fn claim_is_live(&self) -> bool {
        self.lock_map
            .upgrade()
            .and_then(|lock_map| lock_map.peek(&self.key))
            .is_some_and(|current| current == self.record)
    }
}

impl std::fmt::Debug for Lock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lock")
            .field("key", &self.key)
            .field("owner", &self.record.owner)
            .field("is_owner", &self.is_owner)
            .field("locked", &self.locked.load(Ordering::Relaxed))
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheScope, ScopedCache};
    use crate::context::UnitOfWork;

    fn owner(node: &str) -> OwnerId {
        OwnerId::new(NodeId::new(node), UnitOfWork::current_id())
    }

    fn lock_map() -> Arc<dyn Cache<LockRecord>> {
        Arc::new(ScopedCache::new("lockmap", CacheScope::ClusterReplicated, 8).unwrap())
    }

    fn claimed(lock_map: &Arc<dyn Cache<LockRecord>>, key: &str, node: &str) -> LockRecord {
        let record = LockRecord::new(owner(node));
        lock_map.put(key.to_string(), record.clone());
        record
    }

    #[test]
    fn test_owned_lock_state() {
        let map = lock_map();
        let lock = Lock::owned("foo", claimed(&map, "foo", "a"), &map);
        assert_eq!(lock.key(), "foo");
        assert!(lock.is_owner());
        assert!(lock.is_locked());
    }

    #[test]
    fn test_foreign_lock_follows_owner_claim() {
        let map = lock_map();
        let lock = Lock::foreign("foo", claimed(&map, "foo", "b"), &map);
        assert!(!lock.is_owner());
        assert!(lock.is_locked());
        assert_eq!(lock.owner().node.as_str(), "b");

        map.remove("foo");
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_lost_claim_reads_unlocked() {
        let map = lock_map();
        let lock = Lock::owned("foo", claimed(&map, "foo", "a"), &map);

        // Another owner's claim under the same key
        claimed(&map, "foo", "b");
        assert!(!lock.is_locked());

        map.remove("foo");
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_dropped_lock_map_reads_unlocked() {
        let map = lock_map();
        let lock = Lock::owned("foo", claimed(&map, "foo", "a"), &map);
        drop(map);
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_checking_state_is_not_an_access() {
        let map = lock_map();
        let lock = Lock::owned("foo", claimed(&map, "foo", "a"), &map);
        assert!(lock.is_locked());
        assert_eq!(map.stats().hits, 0);
    }

    #[test]
    fn test_mark_unlocked_once() {
        let map = lock_map();
        let lock = Lock::owned("foo", claimed(&map, "foo", "a"), &map);
        assert!(lock.mark_unlocked());
        assert!(!lock.is_locked());
        assert!(!lock.mark_unlocked());
    }

    #[test]
    fn test_record_ownership() {
        let me = owner("a");
        let record = LockRecord::new(me.clone());
        assert!(record.is_owned_by(&me));
        assert!(!record.is_owned_by(&owner("b")));
    }

    #[test]
    fn test_owner_display() {
        let id = owner("node-1");
        assert!(id.to_string().starts_with("node-1/"));
    }
}
