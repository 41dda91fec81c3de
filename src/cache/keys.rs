/// Key builder for everything the query cache stores.
///
/// Tenant ids are wrapped in Redis hash tags (`{tenant_id}`) so that a tenant's
/// index and all of its entries hash to the same cluster slot.
pub struct CacheKeys;

impl CacheKeys {
    /// Tenant-scoped key: tenant:{tenant_id}:{suffix}
    pub fn tenant_key(tenant_id: &str, suffix: &str) -> String {
        format!("tenant:{{{}}}:{}", tenant_id, suffix)
    }

    /// Per-tenant recency index (list, most recent first): tenant:{tenant_id}:queries
    pub fn query_index(tenant_id: &str) -> String {
        Self::tenant_key(tenant_id, "queries")
    }

    /// Cached entry (hash): tenant:{tenant_id}:query:{normalized_query}
    pub fn query_entry(tenant_id: &str, normalized_query: &str) -> String {
        Self::tenant_key(tenant_id, &format!("query:{}", normalized_query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_index() {
        assert_eq!(CacheKeys::query_index("bot1"), "tenant:{bot1}:queries");
    }

    #[test]
    fn test_query_entry() {
        assert_eq!(
            CacheKeys::query_entry("bot1", "what are your hours"),
            "tenant:{bot1}:query:what are your hours"
        );
    }

    #[test]
    fn test_tenants_do_not_share_keys() {
        assert_ne!(
            CacheKeys::query_entry("bot1", "hello"),
            CacheKeys::query_entry("bot2", "hello")
        );
        assert_ne!(CacheKeys::query_index("bot1"), CacheKeys::query_index("bot2"));
    }

    #[test]
    fn test_entry_keys_share_tenant_prefix() {
        let prefix = CacheKeys::tenant_key("bot1", "");
        assert!(CacheKeys::query_index("bot1").starts_with(&prefix));
        assert!(CacheKeys::query_entry("bot1", "hi").starts_with(&prefix));
    }
}
