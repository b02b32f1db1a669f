//! Embedding capability for semantic recall
//!
//! The graph never owns an embedder. [`ManagedEmbedder`] wraps whatever
//! [`Embedder`] the application supplies with lazy loading, idle unloading and
//! an LRU cache.
//!
//! Available backends:
//! - `hashing`: offline feature hashing over words and character trigrams

mod cache;
mod hashing;
mod managed;

pub use cache::{EmbeddingCache, EmbeddingCacheStats};
pub use hashing::HashingEmbedder;
pub use managed::{EmbedderLoader, ManagedEmbedder};

use std::sync::Arc;

use crate::config::RecallConfig;
use crate::error::{GraphError, Result};

/// Trait for embedding generators
pub trait Embedder: Send + Sync {
    /// Generate embedding for a single text
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batch)
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Similarity between two embeddings produced by this embedder
    fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        cosine_similarity(a, b)
    }

    /// Get embedding dimensions
    fn dimensions(&self) -> usize;

    /// Get model name
    fn model_name(&self) -> &str;
}

/// Create an embedder from configuration
pub fn create_embedder(config: &RecallConfig) -> Result<Arc<dyn Embedder>> {
    match config.model.as_str() {
        "hashing" | "tfidf" => Ok(Arc::new(HashingEmbedder::new(config.dimensions))),
        _ => Err(GraphError::Config(format!(
            "Unknown embedding model: '{}'. Use 'hashing'",
            config.model
        ))),
    }
}

/// Cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &[1.0, 0.0, 0.0]) - 1.0).abs() < 0.001);
        assert!(cosine_similarity(&a, &[0.0, 1.0, 0.0]).abs() < 0.001);
        assert!((cosine_similarity(&a, &[-1.0, 0.0, 0.0]) + 1.0).abs() < 0.001);
        assert_eq!(cosine_similarity(&a, &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_create_embedder() {
        let config = RecallConfig::default();
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.model_name(), "hashing");
        assert_eq!(embedder.embed("Hello world").unwrap().len(), 384);

        let bad = RecallConfig {
            model: "gpt-embed".to_string(),
            ..RecallConfig::default()
        };
        assert!(matches!(create_embedder(&bad), Err(GraphError::Config(_))));
    }
}
