//! Named locks
//!
//! [`LockManager`] hands out [`Lock`] handles keyed by name. Ownership lives
//! in the cluster-scoped `lockmap` cache; each unit of work tracks what it
//! claimed in its request-scoped `heldlocks` cache so one
//! [`LockManager::clear_all`] at the end releases everything.

mod handle;
mod manager;
mod membership;

pub use handle::{Lock, LockRecord, OwnerId};
pub use manager::{LockManager, LockStats, HELD_LOCKS_CACHE, LOCK_MAP_CACHE};
pub use membership::{ClusterMembership, NodeId, StaticMembership};
