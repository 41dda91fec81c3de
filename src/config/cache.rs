use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Store backend for the query cache.
///
/// Holds the per-tenant query indexes and the cached entries themselves.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum CacheConfig {
    /// No store. Every lookup misses and every write is dropped.
    #[default]
    None,

    /// In-memory store. Good for single-node deployments.
    /// Data is lost on restart. Not suitable for multi-node.
    Memory(MemoryCacheConfig),

    /// Redis store. Required for multi-node deployments.
    Redis(RedisCacheConfig),
}

impl CacheConfig {
    pub fn is_none(&self) -> bool {
        matches!(self, CacheConfig::None)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            CacheConfig::None => Ok(()),
            CacheConfig::Memory(c) => c.validate(),
            CacheConfig::Redis(c) => c.validate(),
        }
    }
}

/// In-memory cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryCacheConfig {
    /// Maximum number of keys in the store, across all tenants.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Number of keys to evict when the store is full.
    /// Eviction removes expired keys first, then uses LRU.
    #[serde(default = "default_eviction_batch_size")]
    pub eviction_batch_size: usize,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            eviction_batch_size: default_eviction_batch_size(),
        }
    }
}

impl MemoryCacheConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entries == 0 {
            return Err(ConfigError::Validation(
                "Memory cache max_entries must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn default_max_entries() -> usize {
    100_000
}

fn default_eviction_batch_size() -> usize {
    100 // Evict 100 keys at a time when the store is full
}

/// Redis cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisCacheConfig {
    /// Redis connection URL.
    /// Format: redis://[user:password@]host:port[/database]
    /// For clusters, a comma-separated node list together with `[cache.cluster]`.
    pub url: String,

    /// Connection timeout in seconds for a standalone server. Cluster nodes
    /// use `cluster.connection_timeout_secs`.
    #[serde(default = "default_redis_timeout")]
    pub connect_timeout_secs: u64,

    /// Key prefix for all cache keys.
    /// Useful when sharing a Redis instance with other applications.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Cluster mode configuration.
    #[serde(default)]
    pub cluster: Option<RedisClusterConfig>,
}

impl RedisCacheConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::Validation("Redis URL cannot be empty".into()));
        }
        Ok(())
    }
}

/// Redis cluster configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisClusterConfig {
    /// Read from replicas for read operations.
    #[serde(default)]
    pub read_from_replicas: bool,

    /// Number of retries for cluster operations.
    #[serde(default = "default_cluster_retries")]
    pub retries: u32,

    /// Minimum backoff in milliseconds before a cluster retry.
    #[serde(default = "default_cluster_retry_delay")]
    pub retry_delay_ms: u64,

    /// Connection timeout for cluster nodes in seconds.
    #[serde(default = "default_cluster_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Response timeout for cluster operations in seconds.
    #[serde(default = "default_cluster_response_timeout")]
    pub response_timeout_secs: u64,
}

fn default_redis_timeout() -> u64 {
    5
}

fn default_key_prefix() -> String {
    "cb:".to_string()
}

fn default_cluster_retries() -> u32 {
    3
}

fn default_cluster_retry_delay() -> u64 {
    100 // 100ms
}

fn default_cluster_connection_timeout() -> u64 {
    5
}

fn default_cluster_response_timeout() -> u64 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_none() {
        assert!(CacheConfig::default().is_none());
    }

    #[test]
    fn test_parse_memory() {
        let config: CacheConfig = toml::from_str(
            r#"
            type = "memory"
            max_entries = 500
        "#,
        )
        .unwrap();

        match config {
            CacheConfig::Memory(m) => {
                assert_eq!(m.max_entries, 500);
                assert_eq!(m.eviction_batch_size, 100);
            }
            other => panic!("expected memory config, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_redis_defaults() {
        let config: CacheConfig = toml::from_str(
            r#"
            type = "redis"
            url = "redis://localhost:6379"
        "#,
        )
        .unwrap();

        match config {
            CacheConfig::Redis(r) => {
                assert_eq!(r.key_prefix, "cb:");
                assert_eq!(r.connect_timeout_secs, 5);
                assert!(r.cluster.is_none());
            }
            other => panic!("expected redis config, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_zero_entries() {
        let config = CacheConfig::Memory(MemoryCacheConfig {
            max_entries: 0,
            ..Default::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_redis_url() {
        let config: CacheConfig = toml::from_str(
            r#"
            type = "redis"
            url = ""
        "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<CacheConfig, _> = toml::from_str(
            r#"
            type = "memory"
            max_entires = 10
        "#,
        );
        assert!(result.is_err());
    }
}
