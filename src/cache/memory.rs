use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use tokio::time::Instant;

use super::{
    error::{CacheError, CacheResult},
    traits::Cache,
};
use crate::config::MemoryCacheConfig;

enum StoredValue {
    Hash(HashMap<String, String>),
    List(VecDeque<String>),
}

impl StoredValue {
    fn type_name(&self) -> &'static str {
        match self {
            StoredValue::Hash(_) => "hash",
            StoredValue::List(_) => "list",
        }
    }
}

struct CacheEntry {
    value: StoredValue,
    expires_at: Option<Instant>,
    last_accessed: Instant,
}

impl CacheEntry {
    fn new(value: StoredValue, expires_at: Option<Instant>) -> Self {
        Self {
            value,
            expires_at,
            last_accessed: Instant::now(),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Instant::now() >= exp)
    }

    fn touch(&mut self) {
        self.last_accessed = Instant::now();
    }
}

fn expiry_from_ttl(ttl: Duration) -> Option<Instant> {
    if ttl.is_zero() {
        None
    } else {
        Some(Instant::now() + ttl)
    }
}

fn wrong_type(key: &str, expected: &'static str, found: &StoredValue) -> CacheError {
    CacheError::WrongType {
        key: key.to_string(),
        expected,
        found: found.type_name(),
    }
}

/// In-memory cache implementation using DashMap for concurrent access.
///
/// Expiry uses the tokio clock, so tests can pause time and advance past a
/// TTL without sleeping.
///
/// # Multi-Node Deployments
///
/// **WARNING**: This cache is NOT shared between processes.
///
/// Each node keeps its own per-tenant query windows, so a reply cached on one
/// node is never a hit on another. Use the Redis cache when the chat service
/// runs on more than one node.
///
/// See [`CacheConfig::Redis`](crate::config::CacheConfig::Redis) in the configuration.
pub struct MemoryCache {
    data: Arc<DashMap<String, CacheEntry>>,
    max_entries: usize,
    eviction_batch_size: usize,
}

impl MemoryCache {
    pub fn new(config: &MemoryCacheConfig) -> Self {
        Self {
            data: Arc::new(DashMap::new()),
            max_entries: config.max_entries,
            eviction_batch_size: config.eviction_batch_size.max(1),
        }
    }

    /// Number of keys currently held, including expired keys not yet purged.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn evict_if_needed(&self) {
        if self.data.len() < self.max_entries {
            return;
        }

        // First pass: remove all expired entries
        self.data.retain(|_, entry| !entry.is_expired());

        // If still at or above capacity, evict least recently used entries
        let current_len = self.data.len();
        if current_len < self.max_entries {
            return;
        }

        let target_size = self.max_entries.saturating_sub(self.eviction_batch_size);
        let to_evict = current_len.saturating_sub(target_size);

        if to_evict == 0 {
            return;
        }

        // Collect entries sorted by last_accessed (oldest first)
        let mut entries: Vec<_> = self
            .data
            .iter()
            .map(|entry| (entry.key().clone(), entry.last_accessed))
            .collect();
        entries.sort_by_key(|(_, last_accessed)| *last_accessed);

        for (key, _) in entries.into_iter().take(to_evict) {
            self.data.remove(&key);
        }
    }

    /// Remove `key` if it has expired. Returns true if the key is still live.
    fn purge_if_expired(&self, key: &str) -> bool {
        self.data.remove_if(key, |_, entry| entry.is_expired());
        self.data.contains_key(key)
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.data.remove(key);
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
        if !self.purge_if_expired(key) {
            self.evict_if_needed();
        }

        let expires_at = expiry_from_ttl(ttl);
        let new_fields = || {
            fields
                .iter()
                .map(|(field, value)| (field.to_string(), value.clone()))
                .collect::<HashMap<_, _>>()
        };

        match self.data.entry(key.to_string()) {
            Entry::Occupied(mut e) => {
                let entry = e.get_mut();
                match &mut entry.value {
                    StoredValue::Hash(existing) => existing.extend(new_fields()),
                    other => return Err(wrong_type(key, "hash", other)),
                }
                entry.expires_at = expires_at;
                entry.touch();
            }
            Entry::Vacant(e) => {
                e.insert(CacheEntry::new(StoredValue::Hash(new_fields()), expires_at));
            }
        }

        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> CacheResult<Vec<(String, String)>> {
        if !self.purge_if_expired(key) {
            return Ok(Vec::new());
        }

        match self.data.get_mut(key) {
            Some(mut entry) => {
                entry.touch();
                match &entry.value {
                    StoredValue::Hash(fields) => Ok(fields
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect()),
                    other => Err(wrong_type(key, "hash", other)),
                }
            }
            None => Ok(Vec::new()),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // LIST Operations
    // ─────────────────────────────────────────────────────────────────────────────

    async fn list_push(&self, key: &str, value: &str) -> CacheResult<usize> {
        if !self.purge_if_expired(key) {
            self.evict_if_needed();
        }

        match self.data.entry(key.to_string()) {
            Entry::Occupied(mut e) => {
                let entry = e.get_mut();
                entry.touch();
                match &mut entry.value {
                    StoredValue::List(items) => {
                        items.push_front(value.to_string());
                        Ok(items.len())
                    }
                    other => Err(wrong_type(key, "list", other)),
                }
            }
            Entry::Vacant(e) => {
                // A new list has no expiry until set_expire is called
                e.insert(CacheEntry::new(
                    StoredValue::List(VecDeque::from([value.to_string()])),
                    None,
                ));
                Ok(1)
            }
        }
    }

    async fn list_remove(&self, key: &str, value: &str) -> CacheResult<usize> {
        if !self.purge_if_expired(key) {
            return Ok(0);
        }

        let Some(mut entry) = self.data.get_mut(key) else {
            return Ok(0);
        };

        let (removed, now_empty) = match &mut entry.value {
            StoredValue::List(items) => {
                let before = items.len();
                items.retain(|item| item != value);
                (before - items.len(), items.is_empty())
            }
            other => return Err(wrong_type(key, "list", other)),
        };
        drop(entry);

        // Empty lists do not exist, as in Redis
        if now_empty {
            self.data.remove(key);
        }

        Ok(removed)
    }

    async fn list_trim(&self, key: &str, start: usize, stop: usize) -> CacheResult<()> {
        if !self.purge_if_expired(key) {
            return Ok(());
        }

        let Some(mut entry) = self.data.get_mut(key) else {
            return Ok(());
        };

        let now_empty = match &mut entry.value {
            StoredValue::List(items) => {
                if start > stop || start >= items.len() {
                    items.clear();
                } else {
                    items.truncate(stop + 1);
                    items.drain(..start);
                }
                items.is_empty()
            }
            other => return Err(wrong_type(key, "list", other)),
        };
        drop(entry);

        if now_empty {
            self.data.remove(key);
        }

        Ok(())
    }

    async fn list_range(
        &self,
        key: &str,
        start: usize,
        stop: Option<usize>,
    ) -> CacheResult<Vec<String>> {
        if !self.purge_if_expired(key) {
            return Ok(Vec::new());
        }

        match self.data.get_mut(key) {
            Some(mut entry) => {
                entry.touch();
                match &entry.value {
                    StoredValue::List(items) => {
                        let end = stop.map_or(items.len(), |s| (s + 1).min(items.len()));
                        Ok(items
                            .iter()
                            .skip(start)
                            .take(end.saturating_sub(start))
                            .cloned()
                            .collect())
                    }
                    other => Err(wrong_type(key, "list", other)),
                }
            }
            None => Ok(Vec::new()),
        }
    }

    async fn set_expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        if !self.purge_if_expired(key) {
            return Ok(false);
        }

        // EXPIRE with a zero timeout deletes the key
        if ttl.is_zero() {
            return Ok(self.data.remove(key).is_some());
        }

        match self.data.get_mut(key) {
            Some(mut entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
