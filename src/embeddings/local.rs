use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;

use super::EmbeddingProvider;
use crate::Result;

const MIN_DIMENSION: usize = 8;

/// Deterministic, fast embedding for offline/local use: lowercase tokens
/// hashed into buckets, then L2-normalised.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self {
            dim: dim.max(MIN_DIMENSION),
        }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dim];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.to_lowercase().hash(&mut hasher);
            let idx = (hasher.finish() as usize) % self.dim;
            vec[idx] += 1.0;
        }

        normalize(&mut vec);
        vec
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dim
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

fn normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vec.iter_mut() {
            *v /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_has_a_floor() {
        assert_eq!(HashEmbedder::new(2).dimension(), MIN_DIMENSION);
        assert_eq!(HashEmbedder::new(384).dimension(), 384);
    }

    #[test]
    fn same_text_same_vector_and_unit_length() {
        let embedder = HashEmbedder::new(64);
        let a = embedder.embed_text("Uber Technologies");
        let b = embedder.embed_text("uber, technologies!");
        assert_eq!(a, b);

        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let embedder = HashEmbedder::new(16);
        assert!(embedder.embed_text("   ").iter().all(|v| *v == 0.0));
    }

    #[tokio::test]
    async fn batch_keeps_order_and_length() {
        let embedder = HashEmbedder::new(32);
        let texts = vec!["Uber".to_string(), String::new(), "Rider".to_string()];
        let vectors = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(vectors.len(), 3);
        assert!(vectors.iter().all(|v| v.len() == 32));
        assert_eq!(vectors[0], embedder.embed("Uber").await.unwrap());
    }
}
