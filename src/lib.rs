//! ClusterLock - Named Locks over Scoped, Bounded Caches
//!
//! Non-blocking named mutual exclusion for units of work (requests, jobs,
//! threads) sharing a process or, through a replicating cache provider, a
//! cluster.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          LockManager                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐                      ┌──────────────┐         │
//! │  │   lockmap    │                      │  heldlocks   │         │
//! │  │ (CLUSTER-    │                      │  (REQUEST,   │         │
//! │  │  REPLICATED) │                      │ per unit of  │         │
//! │  │              │                      │    work)     │         │
//! │  └──────┬───────┘                      └──────┬───────┘         │
//! │         └──────────── CacheProvider ──────────┘                 │
//! │                            │                                    │
//! │                 BoundedConcurrentMap (LRU)                      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use clusterlock::LockManager;
//!
//! let manager = LockManager::local()?;
//! manager.with_unit_of_work(|| {
//!     let lock = manager.acquire("invoice-42")?;
//!     if lock.is_owner() {
//!         // exclusive work
//!         manager.release(&lock);
//!     }
//!     Ok::<_, clusterlock::Error>(())
//! })?;
//! # Ok::<_, clusterlock::Error>(())
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Bounded LRU maps, scoped caches and providers
//! - [`config`] - Provider configuration
//! - [`context`] - Units of work and their identity
//! - [`error`] - Error types
//! - [`lock`] - Lock manager and lock handles
//! - [`metrics`] - Prometheus exposition

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod lock;
pub mod metrics;

// Re-export commonly used types
pub use cache::{
    BoundedConcurrentMap, Cache, CacheProvider, CacheScope, CacheStats, LocalCacheProvider,
    ScopedCache,
};
pub use config::ProviderConfig;
pub use context::{ContextId, UnitOfWork, UnitOfWorkGuard};
pub use error::{Error, Result};
pub use lock::{Lock, LockManager, LockStats, OwnerId};
pub use metrics::LockMetricsExporter;
