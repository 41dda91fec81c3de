/// Cosine similarity of two embedding vectors.
///
/// Returns 0.0 when either vector has zero magnitude, when the lengths
/// differ, or when the result is not finite, so a degenerate embedding can
/// never produce a match.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let score = dot / (norm_a * norm_b);
    if score.is_finite() { score } else { 0.0 }
}

/// Whether `score` clears `threshold`. The comparison is strict.
pub fn is_semantic_match(score: f64, threshold: f64) -> bool {
    score > threshold
}
