//! Feature-hashing embedder
//!
//! Words and character trigrams hashed into a fixed number of signed
//! buckets. Trigrams keep near-miss spellings of entity names close.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::embedding::Embedder;
use crate::error::Result;

const TRIGRAM_WEIGHT: f32 = 0.5;

/// Offline embedder using the hashing trick
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }

    fn trigrams(word: &str) -> Vec<String> {
        let padded: Vec<char> = format!("#{}#", word).chars().collect();
        padded
            .windows(3)
            .map(|w| w.iter().collect::<String>())
            .collect()
    }

    fn bucket(&self, feature: &str) -> (usize, f32) {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        feature.hash(&mut hasher);
        let h = hasher.finish();
        let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
        ((h as usize) % self.dimensions, sign)
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let tokens = Self::tokenize(text);
        let mut embedding = vec![0.0_f32; self.dimensions];
        if tokens.is_empty() {
            return Ok(embedding);
        }

        let mut features: HashMap<String, f32> = HashMap::new();
        for token in &tokens {
            *features.entry(format!("w:{}", token)).or_insert(0.0) += 1.0;
            for gram in Self::trigrams(token) {
                *features.entry(format!("c:{}", gram)).or_insert(0.0) += TRIGRAM_WEIGHT;
            }
        }

        for (feature, weight) in features {
            let (idx, sign) = self.bucket(&feature);
            embedding[idx] += sign * (1.0 + weight).ln();
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut embedding {
                *x /= norm;
            }
        }
        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "hashing"
    }
}
