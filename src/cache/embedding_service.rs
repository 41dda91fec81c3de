//! Embedding service for semantic query matching.
//!
//! Turns query text into vectors so the query cache can compare a new
//! question against recently answered ones. Two providers are available: an
//! OpenAI-compatible HTTP endpoint (the default) and a local feature-hashing
//! embedder for development and tests.

use std::{
    collections::HashMap,
    hash::{DefaultHasher, Hash, Hasher},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    config::{EmbeddingConfig, HashingEmbeddingConfig, OpenAiEmbeddingConfig},
    observability::metrics::record_embedding_generation,
};

/// Errors that can occur during embedding generation.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse embedding response: {0}")]
    ParseError(String),

    #[error("No embeddings returned from provider")]
    EmptyResponse,

    #[error("Provider returned error status {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("Embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding timed out after {0:?}")]
    Timeout(Duration),
}

/// Converts text into a fixed-length vector.
///
/// Every vector produced by one provider instance has the same length.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name for logs and metrics (e.g., "open_ai").
    fn name(&self) -> &str;

    /// Model name for logs and metrics.
    fn model(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f64>, EmbeddingError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Hashing provider
// ─────────────────────────────────────────────────────────────────────────────

/// Deterministic bag-of-words embedder.
///
/// Each word of two or more characters activates a hash-selected subset of
/// dimensions, and the sum is scaled to unit length. Texts that share words
/// get a positive cosine similarity; texts with no words embed to the zero
/// vector. Hashes are stable within one process only.
///
/// Word overlap is not meaning: questions that differ in one word score as
/// near-duplicates. Not for production traffic.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn from_config(config: &HashingEmbeddingConfig) -> Self {
        Self::new(config.dimensions)
    }

    fn embed_words(&self, text: &str) -> Vec<f64> {
        let dims = self.dimensions;
        let mut embedding = vec![0.0; dims];

        let text_lower = text.to_lowercase();
        let words = text_lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.chars().count() >= 2);

        // Each word activates ~10% of dimensions
        let active_dims = (dims / 10).max(8);

        for word in words {
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            let word_hash = hasher.finish();

            for k in 0..active_dims as u64 {
                let dim_idx = (word_hash.wrapping_mul(k + 1).wrapping_add(k) % dims as u64) as usize;
                embedding[dim_idx] += 1.0;
            }
        }

        let magnitude: f64 = embedding.iter().map(|x| x * x).sum::<f64>().sqrt();
        if magnitude > 0.0 {
            for val in &mut embedding {
                *val /= magnitude;
            }
        }

        embedding
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    fn model(&self) -> &str {
        "word-hash"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f64>, EmbeddingError> {
        Ok(self.embed_words(text))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// OpenAI-compatible provider
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
    encoding_format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    usage: Option<EmbeddingUsage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingUsage {
    total_tokens: u64,
}

/// Client for an OpenAI-compatible `POST {base_url}/embeddings` endpoint.
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    dimensions: Option<usize>,
    headers: HashMap<String, String>,
}

impl OpenAiEmbedder {
    pub fn from_config(config: &OpenAiEmbeddingConfig) -> Result<Self, EmbeddingError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: &OpenAiEmbeddingConfig) -> Self {
        Self {
            client,
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            dimensions: config.dimensions,
            headers: config.headers.clone(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn name(&self) -> &str {
        "open_ai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f64>, EmbeddingError> {
        let body = EmbeddingRequest {
            model: &self.model,
            input: text,
            encoding_format: "float",
            dimensions: self.dimensions,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }

        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        let parsed: EmbeddingResponse = serde_json::from_slice(&bytes)
            .map_err(|e| EmbeddingError::ParseError(format!("Failed to parse response: {}", e)))?;

        if let Some(usage) = &parsed.usage {
            tracing::trace!(model = %self.model, tokens = usage.total_tokens, "Embedding usage");
        }

        let embedding = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or(EmbeddingError::EmptyResponse)?;

        if embedding.is_empty() {
            return Err(EmbeddingError::EmptyResponse);
        }

        if let Some(expected) = self.dimensions
            && embedding.len() != expected
        {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: embedding.len(),
            });
        }

        Ok(embedding)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Service
// ─────────────────────────────────────────────────────────────────────────────

/// Service for generating embeddings from query text.
///
/// Wraps the configured provider and records timing and outcome metrics for
/// every call. Built once at startup and shared behind an `Arc`.
pub struct EmbeddingService {
    provider: Box<dyn EmbeddingProvider>,
}

impl EmbeddingService {
    /// Create a new embedding service from configuration.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let provider: Box<dyn EmbeddingProvider> = match config {
            EmbeddingConfig::Hashing(cfg) => {
                tracing::warn!(
                    dimensions = cfg.dimensions,
                    "Using the hashing embedder; it matches shared words, not meaning, \
                     and is intended for development and tests only"
                );
                Box::new(HashingEmbedder::from_config(cfg))
            }
            EmbeddingConfig::OpenAi(cfg) => Box::new(OpenAiEmbedder::from_config(cfg)?),
        };

        tracing::debug!(
            provider = provider.name(),
            model = provider.model(),
            "Embedding service created"
        );

        Ok(Self { provider })
    }

    pub fn new(provider: impl EmbeddingProvider + 'static) -> Self {
        Self {
            provider: Box::new(provider),
        }
    }

    /// Generate an embedding for arbitrary text.
    pub async fn embed_text(&self, text: &str) -> Result<Vec<f64>, EmbeddingError> {
        let start = Instant::now();
        let result = self.provider.embed(text).await;
        let duration_secs = start.elapsed().as_secs_f64();

        let status = if result.is_ok() { "success" } else { "error" };
        record_embedding_generation(
            self.provider.name(),
            self.provider.model(),
            status,
            duration_secs,
        );

        result
    }

    /// Get the provider name.
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Get the configured model name.
    pub fn model(&self) -> &str {
        self.provider.model()
    }
}

impl std::fmt::Debug for EmbeddingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingService")
            .field("provider_name", &self.provider.name())
            .field("model", &self.provider.model())
            .finish()
    }
}
