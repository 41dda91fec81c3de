mod embedding_service;
mod error;
mod keys;
mod memory;
mod normalize;
mod query_cache;
#[cfg(feature = "redis")]
mod redis;
mod similarity;
mod traits;

use std::sync::Arc;

// Public API exports
pub use embedding_service::{
    EmbeddingError, EmbeddingProvider, EmbeddingService, HashingEmbedder, OpenAiEmbedder,
};
pub use error::{CacheError, CacheResult};
pub use keys::CacheKeys;
pub use memory::MemoryCache;
pub use normalize::normalize_query;
pub use query_cache::{CachedQueryEntry, CachedReply, QueryCache, QueryLookupResult};
#[cfg(feature = "redis")]
pub use redis::RedisCache;
pub use similarity::{cosine_similarity, is_semantic_match};
pub use traits::Cache;

use crate::config::CacheConfig;

/// Build the configured store backend. Returns `None` when no store is
/// configured.
pub async fn create_cache(config: &CacheConfig) -> CacheResult<Option<Arc<dyn Cache>>> {
    let cache: Option<Arc<dyn Cache>> = match config {
        CacheConfig::None => None,
        CacheConfig::Memory(cfg) => Some(Arc::new(MemoryCache::new(cfg))),
        CacheConfig::Redis(cfg) => {
            #[cfg(feature = "redis")]
            {
                Some(Arc::new(RedisCache::from_config(cfg).await?))
            }
            #[cfg(not(feature = "redis"))]
            {
                let _ = cfg;
                return Err(CacheError::Internal(
                    "Redis cache configured but 'redis' feature not enabled. \
                     Rebuild with: cargo build --features redis"
                        .into(),
                ));
            }
        }
    };
    Ok(cache)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryCacheConfig;

    #[tokio::test]
    async fn test_create_cache_none() {
        assert!(create_cache(&CacheConfig::None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_cache_memory() {
        let cache = create_cache(&CacheConfig::Memory(MemoryCacheConfig::default()))
            .await
            .unwrap()
            .unwrap();

        cache.list_push("k", "v").await.unwrap();
        assert_eq!(cache.list_range("k", 0, None).await.unwrap(), vec!["v"]);
    }
}
