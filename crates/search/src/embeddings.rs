//! §4.3 "embeddings may be disabled via a documented configuration switch";
//! §4.6's `SPEC_FULL` addition models this as a pluggable trait rather than
//! a feature flag scattered through call sites, so the retrieval engine
//! degrades identically whether the switch is off or the provider itself
//! fails.

use async_trait::async_trait;

pub type Vector = Vec<f32>;

/// A source of dense embeddings for memory item text. `Disabled` is the
/// default — matching "documented configuration switch" — and callers
/// treat any `Err`/`None` the same way: semantic search is skipped, not
/// failed.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Option<Vector>;

    fn is_enabled(&self) -> bool;
}

/// The no-op provider. Every call returns `None`; `is_enabled` is `false`
/// so callers can skip semantic search entirely rather than pay for a
/// round trip that always comes back empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledEmbeddings;

#[async_trait]
impl EmbeddingProvider for DisabledEmbeddings {
    async fn embed(&self, _text: &str) -> Option<Vector> {
        None
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Cosine similarity between two equal-length vectors, in `[-1, 1]`.
/// Returns `0.0` for mismatched or zero-length inputs rather than panicking
/// — semantic search degrades to "no match" on malformed vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
