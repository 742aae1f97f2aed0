//! Embedder trait and vector utilities.
//!
//! The same [`Embedder`] method serves fragment indexing and query
//! embedding; there is no separate query mode. Providers normalize
//! every vector to unit length via [`normalize_vector`] before
//! returning it, so cosine similarity reduces to a dot product in the
//! store.

use async_trait::async_trait;

use crate::error::EmbedError;

/// Dimensionality of every stored embedding vector.
pub const EMBEDDING_DIMS: usize = 768;

/// An external text-embedding service.
///
/// Callers must not assume embedding always succeeds: the service can be
/// unreachable or return malformed output, in which case
/// [`EmbedError::Unavailable`] is returned and retrieval falls back to
/// lexical search.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier, for logging.
    fn model_name(&self) -> &str;

    /// Vector dimensionality (normally [`EMBEDDING_DIMS`]).
    fn dims(&self) -> usize;

    /// Embed a fragment or query string as a unit-length vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
}

/// Scale `v` to unit L2 norm. A zero or non-finite norm counts as
/// malformed provider output.
pub fn normalize_vector(mut v: Vec<f32>) -> Result<Vec<f32>, EmbedError> {
    let norm = l2_norm(&v);
    if !norm.is_finite() || norm < f32::EPSILON {
        return Err(EmbedError::Unavailable(
            "embedding has zero or non-finite norm".to_string(),
        ));
    }
    for x in &mut v {
        *x /= norm;
    }
    Ok(v)
}

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity in `[-1.0, 1.0]`. Returns `0.0` for empty vectors
/// or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
