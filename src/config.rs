//! Deployment Configuration
//!
//! Capacity per named cache is the only tuning surface at this layer. It is
//! read from YAML:
//!
//! ```yaml
//! request_capacity: 1000
//! instance_capacity: 10000
//! cluster_capacity: 10000
//! node_id: node-a
//! capacities:
//!   lockmap: 50000
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cache::{
    CacheScope, DEFAULT_CLUSTER_CAPACITY, DEFAULT_INSTANCE_CAPACITY, DEFAULT_REQUEST_CAPACITY,
};
use crate::error::{Error, Result};

/// Cache provider configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderConfig {
    /// Default capacity for REQUEST-scoped caches
    pub request_capacity: usize,
    /// Default capacity for INSTANCE-scoped caches
    pub instance_capacity: usize,
    /// Default capacity for CLUSTERREPLICATED-scoped caches
    pub cluster_capacity: usize,
    /// Per-cache-name capacity overrides (any scope)
    pub capacities: BTreeMap<String, usize>,
    /// Static node identity used to attribute lock ownership
    pub node_id: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            request_capacity: DEFAULT_REQUEST_CAPACITY,
            instance_capacity: DEFAULT_INSTANCE_CAPACITY,
            cluster_capacity: DEFAULT_CLUSTER_CAPACITY,
            capacities: BTreeMap::new(),
            node_id: None,
        }
    }
}

impl ProviderConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: ProviderConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    /// Override the capacity for one cache name
    pub fn with_capacity(mut self, name: impl Into<String>, capacity: usize) -> Self {
        self.capacities.insert(name.into(), capacity);
        self
    }

    /// Set the node identity
    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    /// Check every capacity is positive and every name usable
    pub fn validate(&self) -> Result<()> {
        for scope in CacheScope::ALL {
            let capacity = self.scope_capacity(scope);
            if capacity == 0 {
                return Err(Error::InvalidCapacity {
                    name: format!("<{} default>", scope),
                    capacity,
                });
            }
        }
        for (name, capacity) in &self.capacities {
            validate_cache_name(name)?;
            if *capacity == 0 {
                return Err(Error::InvalidCapacity {
                    name: name.clone(),
                    capacity: *capacity,
                });
            }
        }
        if let Some(node) = &self.node_id {
            if node.trim().is_empty() {
                return Err(Error::Config("node_id must not be blank".to_string()));
            }
        }
        Ok(())
    }

    /// Default capacity for a scope
    pub fn scope_capacity(&self, scope: CacheScope) -> usize {
        match scope {
            CacheScope::Request => self.request_capacity,
            CacheScope::Instance => self.instance_capacity,
            CacheScope::ClusterReplicated => self.cluster_capacity,
        }
    }

    /// Capacity for a named cache: name override, else scope default
    pub fn capacity_for(&self, name: &str, scope: CacheScope) -> usize {
        self.capacities
            .get(name)
            .copied()
            .unwrap_or_else(|| self.scope_capacity(scope))
    }
}

/// Reject empty or whitespace-only cache names
pub fn validate_cache_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::InvalidCacheName(name.to_string()));
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = ProviderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.request_capacity, DEFAULT_REQUEST_CAPACITY);
        assert_eq!(config.node_id, None);
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
request_capacity: 10
cluster_capacity: 500
node_id: node-a
capacities:
  lockmap: 50
"#;
        let config = ProviderConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.request_capacity, 10);
        assert_eq!(config.instance_capacity, DEFAULT_INSTANCE_CAPACITY);
        assert_eq!(config.cluster_capacity, 500);
        assert_eq!(config.node_id.as_deref(), Some("node-a"));
        assert_eq!(config.capacity_for("lockmap", CacheScope::ClusterReplicated), 50);
        assert_eq!(config.capacity_for("other", CacheScope::ClusterReplicated), 500);
        assert_eq!(config.capacity_for("other", CacheScope::Request), 10);
    }

    #[test]
    fn test_zero_scope_capacity_rejected() {
        let result = ProviderConfig::from_yaml_str("instance_capacity: 0");
        assert_matches!(result, Err(Error::InvalidCapacity { capacity: 0, .. }));
    }

    #[test]
    fn test_zero_override_rejected() {
        let config = ProviderConfig::default().with_capacity("lockmap", 0);
        assert_matches!(
            config.validate(),
            Err(Error::InvalidCapacity { ref name, .. }) if name == "lockmap"
        );
    }

    #[test]
    fn test_blank_override_name_rejected() {
        let config = ProviderConfig::default().with_capacity("  ", 5);
        assert_matches!(config.validate(), Err(Error::InvalidCacheName(_)));
    }

    #[test]
    fn test_blank_node_id_rejected() {
        let config = ProviderConfig::default().with_node_id(" ");
        assert_matches!(config.validate(), Err(Error::Config(_)));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = ProviderConfig::from_yaml_str("request_capacty: 5");
        assert_matches!(result, Err(Error::Yaml(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "request_capacity: 7").unwrap();
        let config = ProviderConfig::from_file(file.path()).unwrap();
        assert_eq!(config.request_capacity, 7);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = ProviderConfig::from_file("/nonexistent/clusterlock.yaml");
        assert_matches!(result, Err(Error::Io(_)));
    }

    #[test]
    fn test_validate_cache_name() {
        assert!(validate_cache_name("lockmap").is_ok());
        assert_matches!(validate_cache_name(""), Err(Error::InvalidCacheName(_)));
    }
}
