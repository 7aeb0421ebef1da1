//! Embedding support for long-term recall.
//!
//! Provides the [`EmbeddingProvider`] seam, a deterministic offline provider,
//! an LRU-cached wrapper, and [`cosine_similarity`].

use std::sync::Mutex;

use async_trait::async_trait;
use lru::LruCache;

use crate::error::{ExecError, ExecResult};

/// Embedding dimension used by the long-term tier.
pub const EMBEDDING_DIM: usize = 256;

// ─── EmbeddingProvider ───────────────────────────────────────────────────────

/// Computes fixed-dimension, unit-normalised text embeddings.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> ExecResult<Vec<f32>>;
}

// ─── cosine_similarity ───────────────────────────────────────────────────────

/// Cosine similarity clamped to `[0, 1]`. Returns `0.0` for mismatched or
/// all-zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let mag_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        0.0
    } else {
        (dot / (mag_a * mag_b)).clamp(0.0, 1.0)
    }
}

// ─── HashEmbeddingProvider ───────────────────────────────────────────────────

/// Deterministic token-hash embeddings for offline use and tests.
///
/// Each whitespace token contributes weight to a bucket chosen by a small
/// rolling hash, so texts sharing vocabulary land near each other. The output
/// is unit-normalised.
#[derive(Debug, Default)]
pub struct HashEmbeddingProvider;

impl HashEmbeddingProvider {
    pub fn new() -> Self {
        Self
    }

    fn bucket(token: &str) -> usize {
        let mut h: u32 = 2166136261;
        for b in token.bytes() {
            h ^= b as u32;
            h = h.wrapping_mul(16777619);
        }
        h as usize % EMBEDDING_DIM
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    async fn embed(&self, text: &str) -> ExecResult<Vec<f32>> {
        let mut raw = vec![0.0f32; EMBEDDING_DIM];
        for token in text.split_whitespace() {
            raw[Self::bucket(&token.to_lowercase())] += 1.0;
        }
        let mag: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        if mag > 0.0 {
            for v in &mut raw {
                *v /= mag;
            }
        }
        Ok(raw)
    }
}

// ─── CachedEmbeddings ────────────────────────────────────────────────────────

/// LRU-cached wrapper over any [`EmbeddingProvider`], keyed by exact input.
pub struct CachedEmbeddings {
    inner: Box<dyn EmbeddingProvider>,
    cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl CachedEmbeddings {
    pub fn new(provider: Box<dyn EmbeddingProvider>, capacity: usize) -> Self {
        let cap = std::num::NonZeroUsize::new(capacity.max(1))
            .unwrap_or(std::num::NonZeroUsize::MIN);
        Self {
            inner: provider,
            cache: Mutex::new(LruCache::new(cap)),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for CachedEmbeddings {
    async fn embed(&self, text: &str) -> ExecResult<Vec<f32>> {
        {
            let mut guard = self
                .cache
                .lock()
                .map_err(|e| ExecError::Internal(format!("embedding cache poisoned: {e}")))?;
            if let Some(hit) = guard.get(text) {
                return Ok(hit.clone());
            }
        }
        let vec = self.inner.embed(text).await?;
        let mut guard = self
            .cache
            .lock()
            .map_err(|e| ExecError::Internal(format!("embedding cache poisoned: {e}")))?;
        guard.put(text.to_string(), vec.clone());
        Ok(vec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embeddings_are_deterministic_and_normalised() {
        let provider = HashEmbeddingProvider::new();
        let a = provider.embed("the quarterly report").await.unwrap();
        let b = provider.embed("the quarterly report").await.unwrap();
        assert_eq!(a, b);
        let mag: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((mag - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn shared_vocabulary_scores_higher() {
        let provider = HashEmbeddingProvider::new();
        let q = provider.embed("quarterly report numbers").await.unwrap();
        let near = provider.embed("the quarterly report").await.unwrap();
        let far = provider.embed("unrelated topic entirely").await.unwrap();
        assert!(cosine_similarity(&q, &near) > cosine_similarity(&q, &far));
    }

    #[test]
    fn cosine_edge_cases() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn cache_returns_same_vector() {
        let cached = CachedEmbeddings::new(Box::new(HashEmbeddingProvider::new()), 4);
        let a = cached.embed("hello").await.unwrap();
        let b = cached.embed("hello").await.unwrap();
        assert_eq!(a, b);
    }
}
