//! In-process cosine similarity index
//!
//! Each chunk's vector is stored behind an `Arc` and replaced as a whole, so
//! readers see either the previous vector or the new one, never a mix.

use async_trait::async_trait;
use dashmap::DashMap;
use std::cmp::Ordering;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{ProviderError, ProviderResult};
use crate::providers::{VectorMatch, VectorMetadata, VectorStoreProvider};

/// Cosine similarity; 0 for zero-length or mismatched vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Descending score, ties by ascending chunk id
pub(crate) fn by_score_then_id(a: (f32, Uuid), b: (f32, Uuid)) -> Ordering {
    b.0.partial_cmp(&a.0)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.1.cmp(&b.1))
}

struct StoredVector {
    vector: Vec<f32>,
    norm: f32,
    metadata: VectorMetadata,
}

/// Vector index keyed by chunk id
#[derive(Default)]
pub struct VectorIndex {
    entries: DashMap<Uuid, Arc<StoredVector>>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nearest chunks to `query`, optionally restricted to one document
    pub fn search(&self, query: &[f32], k: usize, document_filter: Option<Uuid>) -> Vec<VectorMatch> {
        if k == 0 {
            return Vec::new();
        }
        let query_norm = query.iter().map(|x| x * x).sum::<f32>().sqrt();
        if query_norm == 0.0 {
            return Vec::new();
        }

        // Snapshot the matching entries so no shard lock is held while scoring
        let candidates: Vec<(Uuid, Arc<StoredVector>)> = self
            .entries
            .iter()
            .filter(|e| document_filter.map_or(true, |d| e.value().metadata.document_id == d))
            .map(|e| (*e.key(), Arc::clone(e.value())))
            .collect();

        let mut scored: Vec<(f32, Uuid)> = candidates
            .into_iter()
            .filter(|(_, v)| v.vector.len() == query.len() && v.norm > 0.0)
            .map(|(id, v)| {
                let dot: f32 = v.vector.iter().zip(query).map(|(a, b)| a * b).sum();
                (dot / (v.norm * query_norm), id)
            })
            .collect();

        scored.sort_by(|a, b| by_score_then_id(*a, *b));
        scored.truncate(k);
        scored
            .into_iter()
            .map(|(score, chunk_id)| VectorMatch { chunk_id, score })
            .collect()
    }

    #[cfg(test)]
    fn get(&self, chunk_id: &Uuid) -> Option<Vec<f32>> {
        self.entries.get(chunk_id).map(|e| e.vector.clone())
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }
}

#[async_trait]
impl VectorStoreProvider for VectorIndex {
    async fn upsert(
        &self,
        chunk_id: Uuid,
        vector: Vec<f32>,
        metadata: VectorMetadata,
    ) -> ProviderResult<()> {
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(ProviderError::rejected(
                self.name(),
                format!("vector for chunk {} contains non-finite values", chunk_id),
            ));
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        self.entries.insert(
            chunk_id,
            Arc::new(StoredVector {
                vector,
                norm,
                metadata,
            }),
        );
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        document_filter: Option<Uuid>,
    ) -> ProviderResult<Vec<VectorMatch>> {
        Ok(self.search(vector, k, document_filter))
    }

    async fn delete(&self, chunk_id: Uuid) -> ProviderResult<bool> {
        Ok(self.entries.remove(&chunk_id).is_some())
    }

    async fn len(&self) -> ProviderResult<usize> {
        Ok(self.entries.len())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
