//! Scoped, Bounded Cache Layer
//!
//! General-purpose concurrent caches with least-recently-used eviction,
//! handed out by name and scope.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                          CacheProvider                                    │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  REQUEST registry        │ INSTANCE / CLUSTERREPLICATED registry          │
//! │  (per unit of work)      │ (DashMap, process lifetime)                    │
//! │         │                │              │                                 │
//! │         └────────────────┴──────────────┘                                 │
//! │                          │                                                │
//! │                 ScopedCache (name + scope)                                │
//! │                          │                                                │
//! │              BoundedConcurrentMap (sharded, LRU sweep)                    │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Consumers depend on the [`Cache`] trait, never on the concrete map, so a
//! replicating implementation can be substituted behind the provider.

mod bounded;
mod entry;
mod provider;
mod scope;
mod shard;
mod stats;

pub use bounded::BoundedConcurrentMap;
pub use provider::{Cache, CacheProvider, CacheValue, LocalCacheProvider, ScopedCache};
pub use scope::CacheScope;
pub use stats::CacheStats;

/// Number of shards per bounded map
pub const SHARD_COUNT: usize = 16;

/// Default REQUEST-scope capacity
pub const DEFAULT_REQUEST_CAPACITY: usize = 1_000;

/// Default INSTANCE-scope capacity
pub const DEFAULT_INSTANCE_CAPACITY: usize = 10_000;

/// Default CLUSTERREPLICATED-scope capacity
pub const DEFAULT_CLUSTER_CAPACITY: usize = 10_000;

// =============================================================================
// Tests
// =============================================================================
