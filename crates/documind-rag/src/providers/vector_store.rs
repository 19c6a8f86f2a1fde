//! Vector store provider trait for storing and searching embeddings

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::ProviderResult;

/// Metadata stored next to each vector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorMetadata {
    pub document_id: Uuid,
    pub sequence_index: usize,
}

/// Search hit from a vector store
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub chunk_id: Uuid,
    /// Cosine similarity in `[-1, 1]`
    pub score: f32,
}

/// Trait for vector storage and similarity search
///
/// Implementations:
/// - `VectorIndex`: in-process cosine index
#[async_trait]
pub trait VectorStoreProvider: Send + Sync {
    /// Insert or replace one chunk's vector atomically
    async fn upsert(
        &self,
        chunk_id: Uuid,
        vector: Vec<f32>,
        metadata: VectorMetadata,
    ) -> ProviderResult<()>;

    /// At most `k` matches by descending similarity, ties by ascending chunk id
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        document_filter: Option<Uuid>,
    ) -> ProviderResult<Vec<VectorMatch>>;

    /// Remove one chunk; returns whether it existed
    async fn delete(&self, chunk_id: Uuid) -> ProviderResult<bool>;

    /// Get total number of vectors stored
    async fn len(&self) -> ProviderResult<usize>;

    /// Check if store is empty
    async fn is_empty(&self) -> ProviderResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Get provider name for logging
    fn name(&self) -> &str;
}
