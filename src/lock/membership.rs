//! Cluster Membership
//!
//! Supplies the node half of a lock owner's identity. Real membership
//! (discovery, node-id assignment, replication) is external; this crate only
//! needs a stable id for the current node.

use serde::Serialize;
use uuid::Uuid;

use crate::config::ProviderConfig;

/// Stable identifier of a cluster node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(String);

impl NodeId {
    /// Create a node id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of the current node's identity
pub trait ClusterMembership: Send + Sync {
    /// Id of the node this process runs on
    fn node_id(&self) -> NodeId;
}

/// Membership with a fixed node id
#[derive(Debug, Clone)]
pub struct StaticMembership {
    node: NodeId,
}

impl StaticMembership {
    /// Use the given id
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: NodeId::new(node),
        }
    }

    /// Generate a random id, unique per process
    pub fn random() -> Self {
        Self::new(format!("node-{}", Uuid::new_v4()))
    }

    /// Use the configured `node_id`, or a random id when unset
    pub fn from_config(config: &ProviderConfig) -> Self {
        match &config.node_id {
            Some(node) => Self::new(node.clone()),
            None => Self::random(),
        }
    }
}

impl ClusterMembership for StaticMembership {
    fn node_id(&self) -> NodeId {
        self.node.clone()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_membership() {
        let membership = StaticMembership::new("node-a");
        assert_eq!(membership.node_id().as_str(), "node-a");
        assert_eq!(membership.node_id(), membership.node_id());
    }

    #[test]
    fn test_random_membership_is_unique() {
        let a = StaticMembership::random().node_id();
        let b = StaticMembership::random().node_id();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("node-"));
    }

    #[test]
    fn test_from_config() {
        let config = ProviderConfig::default().with_node_id("configured");
        assert_eq!(StaticMembership::from_config(&config).node_id(), NodeId::new("configured"));
        let unset = StaticMembership::from_config(&ProviderConfig::default());
        assert!(unset.node_id().as_str().starts_with("node-"));
    }
}
