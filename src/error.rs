//! Error types for the cluster lock manager

use thiserror::Error;

use crate::cache::CacheScope;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring caches and locks.
///
/// Lock contention and redundant releases are not errors; they are
/// reported through [`crate::lock::Lock`] state instead.
#[derive(Error, Debug)]
pub enum Error {
    /// Cache capacity must be a positive integer
    #[error("Invalid capacity {capacity} for cache '{name}': capacity must be positive")]
    InvalidCapacity { name: String, capacity: usize },

    /// Cache name is empty or otherwise unusable
    #[error("Invalid cache name: {0:?}")]
    InvalidCacheName(String),

    /// The same name+scope was already bound to a cache of another value type
    #[error("Cache '{name}' in scope {scope} already exists with a different value type")]
    CacheTypeMismatch { name: String, scope: CacheScope },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML configuration parse error
    #[error("Failed to parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Metrics registration or encoding error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_capacity_message() {
        let err = Error::InvalidCapacity {
            name: "lockmap".to_string(),
            capacity: 0,
        };
        assert_eq!(
            err.to_string(),
            "Invalid capacity 0 for cache 'lockmap': capacity must be positive"
        );
    }

    #[test]
    fn test_type_mismatch_message() {
        let err = Error::CacheTypeMismatch {
            name: "heldlocks".to_string(),
            scope: CacheScope::Request,
        };
        assert!(err.to_string().contains("heldlocks"));
        assert!(err.to_string().contains("REQUEST"));
    }

    #[test]
    fn test_io_error_converts() {
        let err = Error::from(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.to_string(), "I/O error: gone");
    }
}
