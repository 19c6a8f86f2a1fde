//! Transient per-query ranking types

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::document::Chunk;

/// A chunk surfaced by hybrid retrieval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalCandidate {
    pub chunk_id: Uuid,
    /// Raw cosine similarity, 0 when the vector signal did not return this chunk
    pub vector_score: f32,
    /// Raw BM25 score, 0 when the lexical signal did not return this chunk
    pub lexical_score: f32,
    /// Weighted sum of the min-max normalized signals
    pub fused_score: f32,
}

/// How a sub-search contributed to a retrieval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStatus {
    Ok,
    TimedOut,
    Failed,
    /// No query vector in the document's embedding space
    Skipped,
}

/// Where a rerank score came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "provider")]
pub enum ScoreSource {
    CrossEncoder(String),
    FusedFallback,
}

/// A reranked chunk ready for context assembly
#[derive(Debug, Clone)]
pub struct RankedResult {
    pub chunk_id: Uuid,
    pub rerank_score: f32,
    /// 1-based position after reranking
    pub rank: usize,
    pub chunk: Arc<Chunk>,
}
