use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Per-tenant query cache configuration.
///
/// ```toml
/// [query_cache]
/// enabled = true
/// max_entries = 5
/// ttl_secs = 3600
/// similarity_threshold = 0.8
/// embedding_timeout_ms = 300
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryCacheConfig {
    /// When false, lookups bypass the cache and writes are dropped.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Number of most recent queries kept per tenant.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Lifetime of a cached entry and of the tenant index, in seconds.
    /// Entries pushed out of the index are only reclaimed by this TTL.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Minimum cosine similarity for a semantic hit. The comparison is strict:
    /// a score equal to the threshold is a miss.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// Budget for the whole semantic pass (query and candidate embeddings).
    #[serde(default = "default_embedding_timeout_ms")]
    pub embedding_timeout_ms: u64,
}

impl Default for QueryCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: default_max_entries(),
            ttl_secs: default_ttl_secs(),
            similarity_threshold: default_similarity_threshold(),
            embedding_timeout_ms: default_embedding_timeout_ms(),
        }
    }
}

impl QueryCacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_millis(self.embedding_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entries == 0 {
            return Err(ConfigError::Validation(
                "query_cache.max_entries must be greater than 0".into(),
            ));
        }
        if self.ttl_secs == 0 {
            return Err(ConfigError::Validation(
                "query_cache.ttl_secs must be greater than 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::Validation(format!(
                "query_cache.similarity_threshold must be between 0.0 and 1.0, got {}",
                self.similarity_threshold
            )));
        }
        if self.embedding_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "query_cache.embedding_timeout_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_max_entries() -> usize {
    5
}

fn default_ttl_secs() -> u64 {
    3600 // 1 hour
}

fn default_similarity_threshold() -> f64 {
    0.8
}

fn default_embedding_timeout_ms() -> u64 {
    300
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_defaults() {
        let config: QueryCacheConfig = toml::from_str("").unwrap();
        assert!(config.enabled);
        assert_eq!(config.max_entries, 5);
        assert_eq!(config.ttl(), Duration::from_secs(3600));
        assert_eq!(config.similarity_threshold, 0.8);
        assert_eq!(config.embedding_timeout(), Duration::from_millis(300));
        assert!(config.validate().is_ok());
    }

    #[rstest]
    #[case::zero_entries("max_entries = 0")]
    #[case::zero_ttl("ttl_secs = 0")]
    #[case::negative_threshold("similarity_threshold = -0.1")]
    #[case::threshold_above_one("similarity_threshold = 1.5")]
    #[case::zero_timeout("embedding_timeout_ms = 0")]
    fn test_validation_rejects(#[case] toml_str: &str) {
        let config: QueryCacheConfig = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_err(), "{toml_str} should be rejected");
    }

    #[test]
    fn test_disabled() {
        let config: QueryCacheConfig = toml::from_str("enabled = false").unwrap();
        assert!(!config.enabled);
        assert!(config.validate().is_ok());
    }
}
