//! Embedding provider trait for generating text embeddings

use async_trait::async_trait;

use crate::error::{ProviderError, ProviderResult};

/// Trait for generating text embeddings
///
/// Implementations:
/// - `OllamaEmbedder`: Local Ollama server (nomic-embed-text)
/// - `OpenAiEmbedder`: OpenAI-compatible `/embeddings` endpoint
/// - `HashingEmbedder`: Offline feature hashing
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of non-empty texts, one vector per input in the same order
    async fn embed_batch(&self, texts: &[String]) -> ProviderResult<Vec<Vec<f32>>>;

    /// Embed a single text
    async fn embed(&self, text: &str) -> ProviderResult<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| ProviderError::malformed(self.name(), "empty embedding response"))
    }

    /// Vector dimensionality produced by this provider
    fn dimensions(&self) -> usize;

    /// Largest batch accepted in one request
    fn max_batch_size(&self) -> usize {
        32
    }

    /// Whether vectors only encode shared vocabulary, so cosine scores do not
    /// measure relevance and retrieval should gate on keyword matches instead
    fn is_lexical(&self) -> bool {
        false
    }

    /// Check if the provider is reachable
    async fn health_check(&self) -> ProviderResult<bool> {
        Ok(true)
    }

    /// Get provider name for logging and embedding-space tagging
    fn name(&self) -> &str;
}
