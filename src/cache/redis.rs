use std::time::Duration;

use async_trait::async_trait;
use redis::{
    AsyncConnectionConfig, ConnectionInfo, IntoConnectionInfo, aio::MultiplexedConnection,
    cluster::ClusterClient, cluster_async::ClusterConnection,
};

use super::{
    error::{CacheError, CacheResult},
    traits::Cache,
};
use crate::config::RedisCacheConfig;

/// A wrapper enum for either a standalone or cluster Redis connection.
/// Both connection types implement the `AsyncCommands` trait, so we can use
/// the same command syntax for both.
enum RedisConn {
    Standalone(MultiplexedConnection),
    Cluster(ClusterConnection),
}

/// Macro to execute a Redis command on either connection type.
/// This avoids code duplication when dispatching commands to standalone vs cluster.
macro_rules! redis_cmd {
    ($conn:expr, $cmd:expr) => {
        match $conn {
            RedisConn::Standalone(ref mut c) => $cmd.query_async(c).await,
            RedisConn::Cluster(ref mut c) => $cmd.query_async(c).await,
        }
    };
}

/// Macro to execute a Redis pipeline on either connection type.
macro_rules! redis_pipe {
    ($conn:expr, $pipe:expr) => {
        match $conn {
            RedisConn::Standalone(ref mut c) => $pipe.query_async(c).await,
            RedisConn::Cluster(ref mut c) => $pipe.query_async(c).await,
        }
    };
}

/// Internal enum to hold either a standalone or cluster Redis client.
enum RedisConnection {
    Standalone(redis::Client),
    Cluster(ClusterClient),
}

pub struct RedisCache {
    connection: RedisConnection,
    key_prefix: String,
    /// Applies to standalone connections; cluster nodes use their own timeout.
    connect_timeout: Duration,
}

impl RedisCache {
    pub async fn from_config(config: &RedisCacheConfig) -> CacheResult<Self> {
        let connection = if let Some(cluster_config) = &config.cluster {
            // Cluster mode: parse nodes from URL (comma-separated)
            // e.g., "redis://host1:6379,host2:6379,host3:6379"
            let nodes: Vec<ConnectionInfo> = config
                .url
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| {
                    // Ensure each node has redis:// prefix if not present
                    let node_url = if s.starts_with("redis://") || s.starts_with("rediss://") {
                        s.to_string()
                    } else {
                        format!("redis://{}", s)
                    };
                    node_url.into_connection_info()
                })
                .collect::<Result<Vec<_>, _>>()?;

            if nodes.is_empty() {
                return Err(CacheError::Redis(redis::RedisError::from((
                    redis::ErrorKind::InvalidClientConfig,
                    "No cluster nodes specified in URL",
                ))));
            }

            let mut builder = redis::cluster::ClusterClientBuilder::new(nodes);

            if cluster_config.read_from_replicas {
                builder = builder.read_from_replicas();
            }

            builder = builder
                .retries(cluster_config.retries)
                .min_retry_wait(cluster_config.retry_delay_ms);
            builder = builder
                .connection_timeout(Duration::from_secs(cluster_config.connection_timeout_secs));
            builder =
                builder.response_timeout(Duration::from_secs(cluster_config.response_timeout_secs));

            let cluster_client = builder.build()?;
            RedisConnection::Cluster(cluster_client)
        } else {
            // Standalone mode: single Redis instance
            let client = redis::Client::open(config.url.as_str())?;
            RedisConnection::Standalone(client)
        };

        tracing::debug!(
            cluster = config.cluster.is_some(),
            key_prefix = %config.key_prefix,
            "Redis cache client created"
        );

        Ok(Self {
            connection,
            key_prefix: config.key_prefix.clone(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
        })
    }

    fn prefixed_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    /// Get a Redis connection, either standalone or cluster.
    async fn get_connection(&self) -> CacheResult<RedisConn> {
        match &self.connection {
            RedisConnection::Standalone(client) => {
                let config =
                    AsyncConnectionConfig::new().set_connection_timeout(self.connect_timeout);
                let conn = client
                    .get_multiplexed_async_connection_with_config(&config)
                    .await?;
                Ok(RedisConn::Standalone(conn))
            }
            RedisConnection::Cluster(client) => {
                let conn = client.get_async_connection().await?;
                Ok(RedisConn::Cluster(conn))
            }
        }
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.get_connection().await?;
        let full_key = self.prefixed_key(key);

        let _: () = redis_cmd!(conn, redis::cmd("DEL").arg(&full_key))?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // HASH Operations
    // ─────────────────────────────────────────────────────────────────────────────

    async fn hash_set(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl: Duration,
    ) -> CacheResult<()> {
        if fields.is_empty() {
            return Ok(());
        }

        let mut conn = self.get_connection().await?;
        let full_key = self.prefixed_key(key);

        // HSET and EXPIRE in one MULTI so the hash never exists without its TTL
        let mut pipe = redis::pipe();
        pipe.atomic();

        let hset = pipe.cmd("HSET").arg(&full_key);
        for (field, value) in fields {
            hset.arg(*field).arg(value.as_str());
        }
        hset.ignore();

        if ttl.as_secs() > 0 {
            pipe.cmd("EXPIRE")
                .arg(&full_key)
                .arg(ttl.as_secs())
                .ignore();
        }

        let _: () = redis_pipe!(conn, pipe)?;
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> CacheResult<Vec<(String, String)>> {
        let mut conn = self.get_connection().await?;
        let full_key = self.prefixed_key(key);

        let fields: Vec<(String, String)> =
            redis_cmd!(conn, redis::cmd("HGETALL").arg(&full_key))?;

        Ok(fields)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // LIST Operations
    // ─────────────────────────────────────────────────────────────────────────────

    async fn list_push(&self, key: &str, value: &str) -> CacheResult<usize> {
        let mut conn = self.get_connection().await?;
        let full_key = self.prefixed_key(key);

        // LPUSH returns the length of the list after the push
        let len: i64 = redis_cmd!(conn, redis::cmd("LPUSH").arg(&full_key).arg(value))?;

        Ok(len as usize)
    }

    async fn list_remove(&self, key: &str, value: &str) -> CacheResult<usize> {
        let mut conn = self.get_connection().await?;
        let full_key = self.prefixed_key(key);

        // A count of 0 removes every occurrence
        let removed: i64 =
            redis_cmd!(conn, redis::cmd("LREM").arg(&full_key).arg(0).arg(value))?;

        Ok(removed as usize)
    }

    async fn list_trim(&self, key: &str, start: usize, stop: usize) -> CacheResult<()> {
        let mut conn = self.get_connection().await?;
        let full_key = self.prefixed_key(key);

        let _: () = redis_cmd!(
            conn,
            redis::cmd("LTRIM")
                .arg(&full_key)
                .arg(start as i64)
                .arg(stop as i64)
        )?;

        Ok(())
    }

    async fn list_range(
        &self,
        key: &str,
        start: usize,
        stop: Option<usize>,
    ) -> CacheResult<Vec<String>> {
        let mut conn = self.get_connection().await?;
        let full_key = self.prefixed_key(key);

        // -1 is the last element
        let stop = stop.map_or(-1, |s| s as i64);
        let items: Vec<String> = redis_cmd!(
            conn,
            redis::cmd("LRANGE")
                .arg(&full_key)
                .arg(start as i64)
                .arg(stop)
        )?;

        Ok(items)
    }

    async fn set_expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let mut conn = self.get_connection().await?;
        let full_key = self.prefixed_key(key);

        // EXPIRE returns 1 if the timeout was set, 0 if key doesn't exist
        let result: i64 = redis_cmd!(conn, redis::cmd("EXPIRE").arg(&full_key).arg(ttl.as_secs()))?;

        Ok(result == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RedisClusterConfig;

    fn standalone_config(url: &str) -> RedisCacheConfig {
        RedisCacheConfig {
            url: url.to_string(),
            connect_timeout_secs: 5,
            key_prefix: "cb:".to_string(),
            cluster: None,
        }
    }

    // Client construction is lazy, so these tests need no running server.

    #[tokio::test]
    async fn test_from_config_standalone() {
        let cache = RedisCache::from_config(&standalone_config("redis://127.0.0.1:6379"))
            .await
            .unwrap();

        assert!(matches!(cache.connection, RedisConnection::Standalone(_)));
        assert_eq!(cache.connect_timeout, Duration::from_secs(5));
        assert_eq!(
            cache.prefixed_key("tenant:42:queries"),
            "cb:tenant:42:queries"
        );
    }

    #[tokio::test]
    async fn test_from_config_applies_connect_timeout() {
        let config = RedisCacheConfig {
            connect_timeout_secs: 2,
            ..standalone_config("redis://127.0.0.1:6379")
        };

        let cache = RedisCache::from_config(&config).await.unwrap();
        assert_eq!(cache.connect_timeout, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_from_config_invalid_url() {
        let result = RedisCache::from_config(&standalone_config("not a url")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_from_config_cluster_adds_scheme() {
        let config = RedisCacheConfig {
            url: "10.0.0.1:6379, redis://10.0.0.2:6379".to_string(),
            cluster: Some(RedisClusterConfig {
                read_from_replicas: true,
                retries: 3,
                retry_delay_ms: 100,
                connection_timeout_secs: 5,
                response_timeout_secs: 1,
            }),
            ..standalone_config("")
        };

        let cache = RedisCache::from_config(&config).await.unwrap();
        assert!(matches!(cache.connection, RedisConnection::Cluster(_)));
    }

    #[tokio::test]
    async fn test_from_config_cluster_without_nodes() {
        let config = RedisCacheConfig {
            url: " , ".to_string(),
            cluster: Some(RedisClusterConfig {
                read_from_replicas: false,
                retries: 3,
                retry_delay_ms: 100,
                connection_timeout_secs: 5,
                response_timeout_secs: 1,
            }),
            ..standalone_config("")
        };

        assert!(RedisCache::from_config(&config).await.is_err());
    }
}
