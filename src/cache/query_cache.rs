//! Per-tenant query-response cache with semantic matching.
//!
//! Each tenant keeps a small window of its most recently answered queries.
//! An incoming query is served from that window when it matches a cached query
//! exactly after normalization, or when its embedding is close enough to the
//! embedding of a cached query.
//!
//! # Storage layout
//!
//! - `tenant:{id}:queries`: list of entry keys, most recent first, trimmed to
//!   `max_entries` on every write
//! - `tenant:{id}:query:{normalized}`: hash holding one cached answer
//!
//! Both expire after `ttl_secs`. Keys trimmed out of the index are not deleted;
//! their hashes are reclaimed by the TTL. Reads never extend a TTL.
//!
//! # Lookup
//!
//! 1. **Exact match**: the normalized query equals a cached entry's normalized
//!    query. No embedding call is made.
//! 2. **Semantic match**: the query and every cached query are embedded and
//!    scored by cosine similarity. The best score wins if it is strictly above
//!    `similarity_threshold`.
//!
//! The cache never fails the caller. Store or embedding errors are logged and
//! reported as [`QueryLookupResult::Degraded`], which callers treat as a miss.

use std::{sync::Arc, time::Duration};

use futures::future::join_all;
use serde::Serialize;

use super::{
    embedding_service::{EmbeddingError, EmbeddingService},
    error::{CacheError, CacheResult},
    keys::CacheKeys,
    normalize::normalize_query,
    similarity::{cosine_similarity, is_semantic_match},
    traits::Cache,
};
use crate::{config::QueryCacheConfig, observability::metrics};

const FIELD_QUERY: &str = "query";
const FIELD_NORMALIZED_QUERY: &str = "normalized_query";
const FIELD_RESPONSE: &str = "response";
const FIELD_RELATED_QUESTIONS: &str = "related_questions";
const FIELD_TIMESTAMP: &str = "timestamp";

/// A previously answered query for one tenant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedQueryEntry {
    pub tenant_id: String,
    /// Original user text, verbatim.
    pub raw_query: String,
    pub normalized_query: String,
    pub response: String,
    pub related_questions: Vec<String>,
    /// Creation time in Unix milliseconds.
    pub timestamp: i64,
}

impl CachedQueryEntry {
    /// Rebuild an entry from its stored hash fields.
    fn from_fields(tenant_id: &str, fields: Vec<(String, String)>) -> CacheResult<Self> {
        let mut raw_query = None;
        let mut normalized_query = None;
        let mut response = None;
        let mut related_questions = None;
        let mut timestamp = None;

        for (field, value) in fields {
            match field.as_str() {
                FIELD_QUERY => raw_query = Some(value),
                FIELD_NORMALIZED_QUERY => normalized_query = Some(value),
                FIELD_RESPONSE => response = Some(value),
                FIELD_RELATED_QUESTIONS => related_questions = Some(value),
                FIELD_TIMESTAMP => timestamp = Some(value),
                _ => {}
            }
        }

        let missing = |field: &str| CacheError::Deserialization(format!("missing {field} field"));

        let raw_query = raw_query.ok_or_else(|| missing(FIELD_QUERY))?;
        let response = response.ok_or_else(|| missing(FIELD_RESPONSE))?;
        let timestamp = timestamp
            .ok_or_else(|| missing(FIELD_TIMESTAMP))?
            .parse::<i64>()
            .map_err(|e| CacheError::Deserialization(format!("invalid timestamp: {}", e)))?;
        let related_questions = match related_questions {
            Some(json) => serde_json::from_str::<Vec<String>>(&json).map_err(|e| {
                CacheError::Deserialization(format!("invalid related_questions: {}", e))
            })?,
            None => Vec::new(),
        };
        let normalized_query = normalized_query.unwrap_or_else(|| normalize_query(&raw_query));

        Ok(Self {
            tenant_id: tenant_id.to_string(),
            raw_query,
            normalized_query,
            response,
            related_questions,
            timestamp,
        })
    }

    pub fn to_reply(&self) -> CachedReply {
        CachedReply {
            response: self.response.clone(),
            related_questions: self.related_questions.clone(),
        }
    }
}

/// What a cache hit hands back to the chat layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CachedReply {
    pub response: String,
    pub related_questions: Vec<String>,
}

/// Result of a query cache lookup.
#[derive(Debug)]
pub enum QueryLookupResult {
    /// Normalized query matched a cached entry exactly
    ExactHit(CachedQueryEntry),
    /// Found a cached entry whose query is semantically similar
    SemanticHit {
        entry: CachedQueryEntry,
        similarity: f64,
    },
    /// No cached entry matched
    Miss,
    /// The store or embedding provider failed; treated as a miss
    Degraded(String),
    /// Caching is disabled or the input is not cacheable
    Bypass,
}

impl QueryLookupResult {
    /// Label used for metrics and logs.
    pub fn outcome(&self) -> &'static str {
        match self {
            QueryLookupResult::ExactHit(_) => "exact_hit",
            QueryLookupResult::SemanticHit { .. } => "semantic_hit",
            QueryLookupResult::Miss => "miss",
            QueryLookupResult::Degraded(_) => "degraded",
            QueryLookupResult::Bypass => "bypass",
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(
            self,
            QueryLookupResult::ExactHit(_) | QueryLookupResult::SemanticHit { .. }
        )
    }

    pub fn entry(&self) -> Option<&CachedQueryEntry> {
        match self {
            QueryLookupResult::ExactHit(entry) | QueryLookupResult::SemanticHit { entry, .. } => {
                Some(entry)
            }
            _ => None,
        }
    }

    /// Collapse to the public contract: a reply on a hit, `None` otherwise.
    pub fn into_reply(self) -> Option<CachedReply> {
        match self {
            QueryLookupResult::ExactHit(entry) | QueryLookupResult::SemanticHit { entry, .. } => {
                Some(CachedReply {
                    response: entry.response,
                    related_questions: entry.related_questions,
                })
            }
            QueryLookupResult::Miss | QueryLookupResult::Degraded(_) | QueryLookupResult::Bypass => {
                None
            }
        }
    }
}

/// Per-tenant query cache combining exact and semantic matching.
pub struct QueryCache {
    store: Arc<dyn Cache>,
    embeddings: Arc<EmbeddingService>,
    config: QueryCacheConfig,
}

impl QueryCache {
    pub fn new(
        store: Arc<dyn Cache>,
        embeddings: Arc<EmbeddingService>,
        config: QueryCacheConfig,
    ) -> Self {
        Self {
            store,
            embeddings,
            config,
        }
    }

    /// Cached reply for the closest recent query of `tenant_id`, if any.
    ///
    /// Misses, degraded lookups and bypassed lookups all return `None`.
    pub async fn get_most_similar_cached_reply(
        &self,
        tenant_id: &str,
        raw_query: &str,
    ) -> Option<CachedReply> {
        self.lookup(tenant_id, raw_query).await.into_reply()
    }

    /// Look up a query and report how the result was reached.
    pub async fn lookup(&self, tenant_id: &str, raw_query: &str) -> QueryLookupResult {
        let result = self.lookup_inner(tenant_id, raw_query).await;
        metrics::record_query_cache_operation("get", result.outcome());
        result
    }

    async fn lookup_inner(&self, tenant_id: &str, raw_query: &str) -> QueryLookupResult {
        if !self.is_cacheable(tenant_id, raw_query) {
            return QueryLookupResult::Bypass;
        }

        let entries = match self.load_entries(tenant_id).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    error = %e,
                    "Query cache read failed, treating as miss"
                );
                return QueryLookupResult::Degraded(e.to_string());
            }
        };

        if entries.is_empty() {
            tracing::debug!(tenant_id = %tenant_id, "Query cache empty for tenant");
            return QueryLookupResult::Miss;
        }

        // Step 1: exact match on the normalized text
        let normalized = normalize_query(raw_query);
        if let Some(entry) = entries.iter().find(|e| e.normalized_query == normalized) {
            tracing::debug!(
                tenant_id = %tenant_id,
                normalized_query = %normalized,
                "Query cache exact hit"
            );
            return QueryLookupResult::ExactHit(entry.clone());
        }

        // Step 2: semantic match, bounded by the embedding timeout
        let timeout = self.config.embedding_timeout();
        let scored = match tokio::time::timeout(timeout, self.best_match(raw_query, &entries)).await
        {
            Ok(result) => result,
            Err(_) => Err(EmbeddingError::Timeout(timeout)),
        };

        match scored {
            Ok(Some((idx, similarity))) => {
                metrics::record_similarity_score(similarity);
                if is_semantic_match(similarity, self.config.similarity_threshold) {
                    let entry = entries[idx].clone();
                    tracing::debug!(
                        tenant_id = %tenant_id,
                        matched_query = %entry.raw_query,
                        similarity,
                        "Query cache semantic hit"
                    );
                    QueryLookupResult::SemanticHit { entry, similarity }
                } else {
                    tracing::debug!(
                        tenant_id = %tenant_id,
                        best_similarity = similarity,
                        threshold = self.config.similarity_threshold,
                        "Query cache miss, best candidate below threshold"
                    );
                    QueryLookupResult::Miss
                }
            }
            Ok(None) => QueryLookupResult::Miss,
            Err(e) => {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    error = %e,
                    "Semantic lookup failed, treating as miss"
                );
                QueryLookupResult::Degraded(e.to_string())
            }
        }
    }

    /// Tenant ids are opaque and used verbatim; only a blank id or query is
    /// rejected.
    fn is_cacheable(&self, tenant_id: &str, raw_query: &str) -> bool {
        self.config.enabled && !tenant_id.trim().is_empty() && !raw_query.trim().is_empty()
    }

    /// Embed the query and every candidate, then return the index and score of
    /// the best candidate.
    ///
    /// A candidate that fails to embed is skipped. The pass fails if the query
    /// itself cannot be embedded or if no candidate could be embedded.
    async fn best_match(
        &self,
        raw_query: &str,
        entries: &[CachedQueryEntry],
    ) -> Result<Option<(usize, f64)>, EmbeddingError> {
        let (query_embedding, candidate_embeddings) = tokio::join!(
            self.embeddings.embed_text(raw_query),
            join_all(
                entries
                    .iter()
                    .map(|entry| self.embeddings.embed_text(&entry.raw_query))
            )
        );
        let query_embedding = query_embedding?;

        let mut best: Option<(usize, f64)> = None;
        let mut last_error = None;

        for (idx, result) in candidate_embeddings.into_iter().enumerate() {
            match result {
                Ok(candidate) => {
                    let score = cosine_similarity(&query_embedding, &candidate);
                    // Strictly greater: on a tie the newer entry (lower index) wins
                    if best.is_none_or(|(_, best_score)| score > best_score) {
                        best = Some((idx, score));
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        candidate_query = %entries[idx].raw_query,
                        error = %e,
                        "Failed to embed cached query, skipping candidate"
                    );
                    last_error = Some(e);
                }
            }
        }

        match (best, last_error) {
            (None, Some(e)) => Err(e),
            (best, _) => Ok(best),
        }
    }

    /// Load every live entry in the tenant's index, newest first.
    ///
    /// Keys whose hash has expired are skipped silently; entries that cannot
    /// be parsed are skipped with a warning.
    async fn load_entries(&self, tenant_id: &str) -> CacheResult<Vec<CachedQueryEntry>> {
        let index_key = CacheKeys::query_index(tenant_id);
        let keys = self
            .store
            .list_range(&index_key, 0, Some(self.config.max_entries.saturating_sub(1)))
            .await?;

        let hashes = join_all(keys.iter().map(|key| self.store.hash_get_all(key))).await;

        let mut entries = Vec::with_capacity(keys.len());
        for (key, fields) in keys.iter().zip(hashes) {
            let fields = fields?;
            if fields.is_empty() {
                continue;
            }
            match CachedQueryEntry::from_fields(tenant_id, fields) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!(
                        tenant_id = %tenant_id,
                        key = %key,
                        error = %e,
                        "Skipping malformed query cache entry"
                    );
                }
            }
        }

        // Stable sort keeps index order for equal timestamps
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(entries)
    }

    /// All live entries for a tenant, newest first. Store errors yield an
    /// empty list.
    pub async fn cached_entries(&self, tenant_id: &str) -> Vec<CachedQueryEntry> {
        match self.load_entries(tenant_id).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    error = %e,
                    "Failed to list cached queries"
                );
                Vec::new()
            }
        }
    }

    /// Cache an answer. Errors are logged and swallowed.
    pub async fn cache_reply(
        &self,
        tenant_id: &str,
        raw_query: &str,
        response: &str,
        related_questions: &[String],
    ) {
        if let Err(e) = self
            .try_cache_reply(tenant_id, raw_query, response, related_questions)
            .await
        {
            tracing::warn!(
                tenant_id = %tenant_id,
                error = %e,
                "Failed to cache reply"
            );
        }
    }

    /// Cache an answer, returning any store error.
    ///
    /// Re-caching a query that normalizes to an existing entry overwrites that
    /// entry and moves it to the front of the index.
    pub async fn try_cache_reply(
        &self,
        tenant_id: &str,
        raw_query: &str,
        response: &str,
        related_questions: &[String],
    ) -> CacheResult<()> {
        if !self.is_cacheable(tenant_id, raw_query) {
            tracing::debug!(
                tenant_id = %tenant_id,
                enabled = self.config.enabled,
                "Skipping query cache write"
            );
            metrics::record_query_cache_operation("set", "skipped");
            return Ok(());
        }

        let result = self
            .write_entry(tenant_id, raw_query, response, related_questions)
            .await;
        let outcome = if result.is_ok() { "stored" } else { "error" };
        metrics::record_query_cache_operation("set", outcome);
        result
    }

    async fn write_entry(
        &self,
        tenant_id: &str,
        raw_query: &str,
        response: &str,
        related_questions: &[String],
    ) -> CacheResult<()> {
        let ttl = self.config.ttl();
        let normalized = normalize_query(raw_query);
        let entry_key = CacheKeys::query_entry(tenant_id, &normalized);
        let index_key = CacheKeys::query_index(tenant_id);

        let related_json = serde_json::to_string(related_questions)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;
        let timestamp = chrono::Utc::now().timestamp_millis();

        let fields = [
            (FIELD_QUERY, raw_query.to_string()),
            (FIELD_NORMALIZED_QUERY, normalized.clone()),
            (FIELD_RESPONSE, response.to_string()),
            (FIELD_RELATED_QUESTIONS, related_json),
            (FIELD_TIMESTAMP, timestamp.to_string()),
        ];
        self.store.hash_set(&entry_key, &fields, ttl).await?;

        self.store.list_remove(&index_key, &entry_key).await?;
        self.store.list_push(&index_key, &entry_key).await?;
        self.store
            .list_trim(&index_key, 0, self.config.max_entries.saturating_sub(1))
            .await?;
        self.store.set_expire(&index_key, ttl).await?;

        tracing::debug!(
            tenant_id = %tenant_id,
            normalized_query = %normalized,
            ttl_secs = ttl.as_secs(),
            "Reply cached"
        );

        Ok(())
    }

    /// Embed two texts and return their cosine similarity.
    pub async fn similarity(&self, a: &str, b: &str) -> Result<f64, EmbeddingError> {
        let (a, b) = tokio::join!(self.embeddings.embed_text(a), self.embeddings.embed_text(b));
        Ok(cosine_similarity(&a?, &b?))
    }

    /// Remove a tenant's index and every entry it references.
    ///
    /// Returns the number of entry keys that were referenced by the index.
    pub async fn clear_tenant(&self, tenant_id: &str) -> CacheResult<usize> {
        let index_key = CacheKeys::query_index(tenant_id);
        let keys = self.store.list_range(&index_key, 0, None).await?;

        for key in &keys {
            self.store.delete(key).await?;
        }
        self.store.delete(&index_key).await?;

        tracing::info!(tenant_id = %tenant_id, entries = keys.len(), "Tenant query cache cleared");
        Ok(keys.len())
    }

    pub fn ttl(&self) -> Duration {
        self.config.ttl()
    }

    pub fn similarity_threshold(&self) -> f64 {
        self.config.similarity_threshold
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("enabled", &self.config.enabled)
            .field("max_entries", &self.config.max_entries)
            .field("ttl_secs", &self.config.ttl_secs)
            .field("similarity_threshold", &self.config.similarity_threshold)
            .field("embeddings", &self.embeddings)
            .finish()
    }
}
