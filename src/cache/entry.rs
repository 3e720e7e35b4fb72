//! Cache Entry Types
//!
//! Internal record held by [`super::BoundedConcurrentMap`]. Ordering for
//! eviction comes from access stamps issued by an [`AccessClock`].

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic source of access stamps.
///
/// Stamps are strictly increasing per clock, so two accesses never share a
/// stamp the way two accesses within the same millisecond would.
#[derive(Debug, Default)]
pub(crate) struct AccessClock {
    next: AtomicU64,
}

impl AccessClock {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Issue the next stamp
    #[inline]
    pub(crate) fn tick(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Most recently issued stamp (0 if none)
    #[inline]
    pub(crate) fn current(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

/// Value plus recency bookkeeping
#[derive(Debug)]
pub(crate) struct CacheEntry<V> {
    value: V,
    last_access: AtomicU64,
}

impl<V> CacheEntry<V> {
    /// Create an entry stamped with `stamp`
    pub(crate) fn new(value: V, stamp: u64) -> Self {
        Self {
            value,
            last_access: AtomicU64::new(stamp),
        }
    }

    #[inline]
    pub(crate) fn value(&self) -> &V {
        &self.value
    }

    pub(crate) fn into_value(self) -> V {
        self.value
    }

    /// Refresh recency. Only ever moves forward, so a slow reader holding an
    /// older stamp cannot make the entry look staler than it is.
    #[inline]
    pub(crate) fn touch(&self, stamp: u64) {
        self.last_access.fetch_max(stamp, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Tests
// =============================================================================
