//! Prometheus metrics for the query cache.
//!
//! Provides metrics for:
//! - Cache lookups and writes by outcome
//! - Embedding latency and failures
//! - Similarity scores of semantic matches

#[cfg(feature = "prometheus")]
use std::sync::OnceLock;

#[cfg(feature = "prometheus")]
use metrics::{counter, histogram};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::MetricsConfig;

/// Global Prometheus handle for rendering metrics.
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the metrics system with the given configuration.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
            &seconds_from_ms(&config.latency_buckets_ms),
        )
        .map_err(|e| MetricsError::Setup(e.to_string()))?
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full("query_cache_similarity_score".to_string()),
            &[0.5, 0.6, 0.7, 0.75, 0.8, 0.85, 0.9, 0.95, 1.0],
        )
        .map_err(|e| MetricsError::Setup(e.to_string()))?;

    let handle = builder.install_recorder().map_err(MetricsError::Install)?;

    PROMETHEUS_HANDLE
        .set(handle)
        .map_err(|_| MetricsError::Setup("Metrics already initialized".to_string()))?;

    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(_config: &MetricsConfig) -> Result<(), MetricsError> {
    Ok(())
}

/// Convert millisecond buckets to seconds.
#[cfg(feature = "prometheus")]
fn seconds_from_ms(ms_buckets: &[f64]) -> Vec<f64> {
    ms_buckets.iter().map(|ms| ms / 1000.0).collect()
}

/// Render the current metrics in Prometheus text format.
///
/// Returns `None` when metrics were never initialized.
pub fn render_metrics() -> Option<String> {
    #[cfg(feature = "prometheus")]
    {
        PROMETHEUS_HANDLE.get().map(|handle| handle.render())
    }
    #[cfg(not(feature = "prometheus"))]
    {
        None
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record a query cache operation.
///
/// `operation` is `get` or `set`. `result` is one of `exact_hit`,
/// `semantic_hit`, `miss`, `degraded`, `bypass`, `stored`, `skipped` or `error`.
pub fn record_query_cache_operation(operation: &str, result: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "query_cache_operations_total",
            "operation" => operation.to_string(),
            "result" => result.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (operation, result);
    }
}

/// Record an embedding generation call.
pub fn record_embedding_generation(
    provider: &str,
    model: &str,
    status: &str,
    duration_secs: f64,
) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "embedding_requests_total",
            "provider" => provider.to_string(),
            "model" => model.to_string(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            "embedding_duration_seconds",
            "provider" => provider.to_string(),
            "model" => model.to_string()
        )
        .record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (provider, model, status, duration_secs);
    }
}

/// Record the best similarity score found by a semantic lookup.
pub fn record_similarity_score(score: f64) {
    #[cfg(feature = "prometheus")]
    {
        histogram!("query_cache_similarity_score").record(score);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = score;
    }
}

/// Metrics initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}

#[cfg(all(test, feature = "prometheus"))]
mod tests {
    use metrics_exporter_prometheus::PrometheusBuilder;

    use super::*;

    #[test]
    fn test_query_cache_operation_labels() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            record_query_cache_operation("get", "semantic_hit");
            record_query_cache_operation("get", "semantic_hit");
            record_query_cache_operation("set", "stored");
        });

        let rendered = handle.render();
        assert!(
            rendered.contains(
                r#"query_cache_operations_total{operation="get",result="semantic_hit"} 2"#
            ),
            "{rendered}"
        );
        assert!(
            rendered.contains(r#"query_cache_operations_total{operation="set",result="stored"} 1"#),
            "{rendered}"
        );
        assert!(!rendered.contains("cache_type"), "{rendered}");
    }

    #[test]
    fn test_embedding_generation_metrics() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            record_embedding_generation("open_ai", "text-embedding-3-small", "success", 0.042);
        });

        let rendered = handle.render();
        assert!(
            rendered.contains(
                r#"embedding_requests_total{provider="open_ai",model="text-embedding-3-small",status="success"} 1"#
            ),
            "{rendered}"
        );
        assert!(rendered.contains("embedding_duration_seconds"), "{rendered}");
        assert!(!rendered.contains("batch"), "{rendered}");
    }
}
