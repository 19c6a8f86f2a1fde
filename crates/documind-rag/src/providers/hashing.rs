//! Offline embedding provider based on feature hashing
//!
//! Each lowercased word is hashed into one of `dimensions` buckets with a
//! hash-derived sign, and the resulting vector is L2-normalized. Texts that
//! share vocabulary land close together under cosine similarity, which is
//! enough to run the pipeline without a model server.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use unicode_segmentation::UnicodeSegmentation;

use crate::error::ProviderResult;

use super::embedding::EmbeddingProvider;

pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for word in text.unicode_words() {
            let digest = Sha256::digest(word.to_lowercase().as_bytes());
            let bucket = u64::from_le_bytes([
                digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6],
                digest[7],
            ]) as usize
                % self.dimensions;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> ProviderResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn max_batch_size(&self) -> usize {
        1024
    }

    fn is_lexical(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "hashing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::vector_index::cosine_similarity;

    #[test]
    fn test_vectors_are_normalized_and_deterministic() {
        let e = HashingEmbedder::new(64);
        let a = e.embed_text("Refunds are issued within 30 days");
        let b = e.embed_text("Refunds are issued within 30 days");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_shared_vocabulary_is_closer() {
        let e = HashingEmbedder::new(256);
        let q = e.embed_text("refund policy");
        let near = e.embed_text("our refund policy allows returns");
        let far = e.embed_text("the weather in spring is mild");
        assert!(cosine_similarity(&q, &near) > cosine_similarity(&q, &far));
    }

    #[test]
    fn test_batch_matches_single() {
        let e = HashingEmbedder::new(32);
        let texts = vec!["one".to_string(), "two words".to_string()];
        let batch = tokio_test::block_on(e.embed_batch(&texts)).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[1], e.embed_text("two words"));
        assert_eq!(e.dimensions(), 32);
    }
}
