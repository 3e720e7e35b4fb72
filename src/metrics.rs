//! Prometheus exposition for lock manager statistics
//!
//! The exporter owns its own [`Registry`], so several managers (or tests)
//! can export side by side without colliding in the default registry.

use prometheus::{Gauge, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::cache::{CacheProvider, CacheStats};
use crate::error::Result;
use crate::lock::{LockManager, LockStats};

const NAMESPACE: &str = "clusterlock";

/// Mirrors [`LockStats`] and lock map [`CacheStats`] into Prometheus metrics
pub struct LockMetricsExporter {
    registry: Registry,
    lock_events: IntCounterVec,
    cluster_locks: IntGauge,
    lockmap_entries: IntGauge,
    lockmap_capacity: IntGauge,
    lockmap_evictions: IntCounter,
    lockmap_hit_ratio: Gauge,
    lockmap_utilization: Gauge,
}

impl LockMetricsExporter {
    /// Create an exporter with all metrics registered
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some(NAMESPACE.to_string()), None)?;

        let lock_events = IntCounterVec::new(
            Opts::new("lock_events_total", "Lock manager events by kind"),
            &["event"],
        )?;
        let cluster_locks = IntGauge::new("cluster_locks", "Keys currently held cluster-wide")?;
        let lockmap_entries = IntGauge::new("lockmap_entries", "Entries in the lock map cache")?;
        let lockmap_capacity =
            IntGauge::new("lockmap_capacity", "Capacity of the lock map cache")?;
        let lockmap_evictions = IntCounter::new(
            "lockmap_evictions_total",
            "Lock map entries evicted by the size bound",
        )?;
        let lockmap_hit_ratio = Gauge::new("lockmap_hit_ratio", "Lock map cache hit ratio")?;
        let lockmap_utilization =
            Gauge::new("lockmap_utilization", "Lock map entries as a share of capacity")?;

        registry.register(Box::new(lock_events.clone()))?;
        registry.register(Box::new(cluster_locks.clone()))?;
        registry.register(Box::new(lockmap_entries.clone()))?;
        registry.register(Box::new(lockmap_capacity.clone()))?;
        registry.register(Box::new(lockmap_evictions.clone()))?;
        registry.register(Box::new(lockmap_hit_ratio.clone()))?;
        registry.register(Box::new(lockmap_utilization.clone()))?;

        Ok(Self {
            registry,
            lock_events,
            cluster_locks,
            lockmap_entries,
            lockmap_capacity,
            lockmap_evictions,
            lockmap_hit_ratio,
            lockmap_utilization,
        })
    }

    /// Pull current statistics from `manager`
    pub fn observe<P: CacheProvider>(&self, manager: &LockManager<P>) {
        self.record(&manager.stats(), &manager.lock_map_stats());
    }

    /// Record a statistics snapshot.
    ///
    /// Counters only move forward; an older snapshot leaves them unchanged.
    pub fn record(&self, locks: &LockStats, lock_map: &CacheStats) {
        let events = [
            ("acquired", locks.acquired),
            ("reentrant", locks.reentrant),
            ("contended", locks.contended),
            ("absent", locks.absent),
            ("released", locks.released),
            ("sweep", locks.sweeps),
        ];
        for (event, total) in events {
            advance(&self.lock_events.with_label_values(&[event]), total);
        }
        advance(&self.lockmap_evictions, lock_map.evictions);

        self.cluster_locks.set(locks.cluster_locks as i64);
        self.lockmap_entries.set(lock_map.entries as i64);
        self.lockmap_capacity.set(lock_map.capacity as i64);
        self.lockmap_hit_ratio.set(lock_map.hit_ratio());
        self.lockmap_utilization.set(lock_map.utilization());
    }

    /// Render all metrics in the Prometheus text format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        Ok(encoder.encode_to_string(&self.registry.gather())?)
    }
}

fn advance(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}

impl std::fmt::Debug for LockMetricsExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockMetricsExporter").finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
