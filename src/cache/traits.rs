use std::time::Duration;

use async_trait::async_trait;

use super::error::CacheResult;

/// Key-value store with per-key TTL.
///
/// Single operations are expected to be atomic on the backend. Sequences of
/// operations are not: callers that push, trim and expire a list in three
/// calls can interleave with other writers.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Delete a key of any type.
    async fn delete(&self, key: &str) -> CacheResult<()>;

    // ─────────────────────────────────────────────────────────────────────────────
    // HASH Operations (for query entries)
    // ─────────────────────────────────────────────────────────────────────────────

    /// Write all `fields` into the hash at `key` and set its TTL.
    ///
    /// Existing fields not named in `fields` are kept, matching `HSET`.
    async fn hash_set(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl: Duration,
    ) -> CacheResult<()>;

    /// Get every field of the hash at `key`. Missing or expired keys yield an
    /// empty vector.
    async fn hash_get_all(&self, key: &str) -> CacheResult<Vec<(String, String)>>;

    // ─────────────────────────────────────────────────────────────────────────────
    // LIST Operations (for per-tenant query indexes)
    // ─────────────────────────────────────────────────────────────────────────────

    /// Push a value onto the head of the list, creating it if needed.
    /// Returns the new length of the list.
    async fn list_push(&self, key: &str, value: &str) -> CacheResult<usize>;

    /// Remove every occurrence of `value` from the list.
    /// Returns the number of removed elements.
    async fn list_remove(&self, key: &str, value: &str) -> CacheResult<usize>;

    /// Keep only the elements between `start` and `stop` (inclusive, 0-based).
    async fn list_trim(&self, key: &str, start: usize, stop: usize) -> CacheResult<()>;

    /// Get elements between `start` and `stop` (inclusive). A `stop` of `None`
    /// reads to the end of the list.
    async fn list_range(
        &self,
        key: &str,
        start: usize,
        stop: Option<usize>,
    ) -> CacheResult<Vec<String>>;

    /// Set or update the TTL (expiration) of a key.
    /// Returns true if the TTL was set, false if the key doesn't exist.
    async fn set_expire(&self, key: &str, ttl: Duration) -> CacheResult<bool>;
}
