use thiserror::Error;

/// Errors raised by a query cache store or by the entries read from it.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Query cache store not configured")]
    NotConfigured,

    #[error("Failed to encode cache entry: {0}")]
    Serialization(String),

    /// A stored entry is missing a field or holds a value that does not parse.
    #[error("Malformed cache entry: {0}")]
    Deserialization(String),

    /// A hash operation hit a list key, or the reverse.
    #[error("WRONGTYPE key '{key}' holds a {found}, expected a {expected}")]
    WrongType {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type CacheResult<T> = Result<T, CacheError>;
