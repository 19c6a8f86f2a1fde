//! Cross-encoder reranking provider trait

use async_trait::async_trait;

use crate::error::ProviderResult;

/// Scores query/passage pairs with a cross-encoder style model
///
/// Implementations:
/// - `HttpReranker`: Cohere, Jina, Voyage or a self-hosted BGE server
#[async_trait]
pub trait RerankProvider: Send + Sync {
    /// Relevance of each passage to the query, one score per passage in input order.
    /// Higher is more relevant; scales differ between providers.
    async fn score(&self, query: &str, passages: &[String]) -> ProviderResult<Vec<f32>>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}
