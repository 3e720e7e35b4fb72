//! Cache Scopes
//!
//! A scope is a tag with no behavior of its own. It selects which registry a
//! [`super::CacheProvider`] resolves a cache name in, and implies how often
//! the surrounding execution context tears that cache down.

use serde::{Deserialize, Serialize};

/// Lifecycle/visibility tag for a named cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheScope {
    /// Bound to one unit of work, discarded when it ends
    Request,
    /// Shared by every unit of work in this process
    Instance,
    /// Process-wide locally; visible cluster-wide once a replicating
    /// implementation is plugged in
    ClusterReplicated,
}

impl CacheScope {
    /// All scopes, in teardown-frequency order
    pub const ALL: [CacheScope; 3] = [
        CacheScope::Request,
        CacheScope::Instance,
        CacheScope::ClusterReplicated,
    ];

    /// Stable upper-case name, used in logs and configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheScope::Request => "REQUEST",
            CacheScope::Instance => "INSTANCE",
            CacheScope::ClusterReplicated => "CLUSTERREPLICATED",
        }
    }

    /// Whether caches of this scope are discarded at the end of each unit of work
    pub fn is_per_unit_of_work(&self) -> bool {
        matches!(self, CacheScope::Request)
    }
}

impl std::fmt::Display for CacheScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CacheScope {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace(['-', '_'], "").as_str() {
            "REQUEST" => Ok(CacheScope::Request),
            "INSTANCE" => Ok(CacheScope::Instance),
            "CLUSTERREPLICATED" | "CLUSTER" => Ok(CacheScope::ClusterReplicated),
            _ => Err(crate::error::Error::Config(format!(
                "unknown cache scope: {}",
                s
            ))),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
