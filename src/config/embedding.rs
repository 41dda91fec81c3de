use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Embedding provider used for semantic query matching.
///
/// ```toml
/// [embedding]
/// provider = "open_ai"
/// base_url = "https://api.openai.com/v1"
/// api_key = "${OPENAI_API_KEY}"
/// model = "text-embedding-3-small"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum EmbeddingConfig {
    /// Local feature-hashing embedder for development and tests. Needs no
    /// network access; matches queries that share words rather than meaning,
    /// so "open on Monday" and "open on Sunday" score as near-duplicates.
    Hashing(HashingEmbeddingConfig),

    /// Any OpenAI-compatible `/embeddings` endpoint (OpenAI, Ollama, vLLM, ...).
    OpenAi(OpenAiEmbeddingConfig),
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        EmbeddingConfig::OpenAi(OpenAiEmbeddingConfig::default())
    }
}

impl EmbeddingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            EmbeddingConfig::Hashing(c) => c.validate(),
            EmbeddingConfig::OpenAi(c) => c.validate(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HashingEmbeddingConfig {
    /// Vector length.
    #[serde(default = "default_hashing_dimensions")]
    pub dimensions: usize,
}

impl Default for HashingEmbeddingConfig {
    fn default() -> Self {
        Self {
            dimensions: default_hashing_dimensions(),
        }
    }
}

impl HashingEmbeddingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.dimensions == 0 {
            return Err(ConfigError::Validation(
                "embedding.dimensions must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenAiEmbeddingConfig {
    /// API key. Optional for local servers like Ollama.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Base URL for the API, without the `/embeddings` suffix.
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    /// Embedding model name.
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Requested vector length, for models that support shortening.
    #[serde(default)]
    pub dimensions: Option<usize>,

    /// Request timeout in seconds. The query cache applies its own, tighter
    /// budget on top of this.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Custom headers to include in requests.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Default for OpenAiEmbeddingConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_openai_base_url(),
            model: default_embedding_model(),
            dimensions: None,
            timeout_secs: default_timeout(),
            headers: HashMap::new(),
        }
    }
}

impl OpenAiEmbeddingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.is_none() && self.base_url == default_openai_base_url() {
            tracing::warn!(
                "embedding.api_key is not set for api.openai.com; \
                 semantic lookups will fail and fall back to misses"
            );
        }
        if self.base_url.is_empty() {
            return Err(ConfigError::Validation(
                "embedding.base_url cannot be empty".into(),
            ));
        }
        if self.model.is_empty() {
            return Err(ConfigError::Validation(
                "embedding.model cannot be empty".into(),
            ));
        }
        if self.dimensions == Some(0) {
            return Err(ConfigError::Validation(
                "embedding.dimensions must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn default_hashing_dimensions() -> usize {
    256
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_timeout() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_open_ai() {
        match EmbeddingConfig::default() {
            EmbeddingConfig::OpenAi(c) => {
                assert_eq!(c.base_url, "https://api.openai.com/v1");
                assert_eq!(c.model, "text-embedding-3-small");
                assert!(c.api_key.is_none());
            }
            other => panic!("expected open_ai embedder, got {other:?}"),
        }
    }

    #[test]
    fn test_hashing_must_be_selected_explicitly() {
        let config: EmbeddingConfig = toml::from_str(r#"provider = "hashing""#).unwrap();
        match config {
            EmbeddingConfig::Hashing(c) => assert_eq!(c.dimensions, 256),
            other => panic!("expected hashing embedder, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_open_ai() {
        let config: EmbeddingConfig = toml::from_str(
            r#"
            provider = "open_ai"
            base_url = "http://localhost:11434/v1"
            model = "nomic-embed-text"
        "#,
        )
        .unwrap();

        match config {
            EmbeddingConfig::OpenAi(c) => {
                assert_eq!(c.base_url, "http://localhost:11434/v1");
                assert_eq!(c.model, "nomic-embed-text");
                assert!(c.api_key.is_none());
                assert_eq!(c.timeout_secs, 10);
            }
            other => panic!("expected open_ai embedder, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_zero_dimensions() {
        let config: EmbeddingConfig = toml::from_str(
            r#"
            provider = "hashing"
            dimensions = 0
        "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let result: Result<EmbeddingConfig, _> = toml::from_str(r#"provider = "bedrock""#);
        assert!(result.is_err());
    }
}
