//! Response types for RAG queries

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::retrieval::{RetrievalCandidate, ScoreSource, SignalStatus};

/// Citation linking a marker in the answer to its source chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// Marker as it appears in the answer, e.g. `[1]`
    pub marker: String,
    pub chunk_id: Uuid,
    /// Exact excerpt from the source chunk
    pub snippet: String,
    /// Position of the chunk within its document
    pub sequence_index: usize,
    pub section: Option<String>,
    pub page: Option<u32>,
    pub rerank_score: f32,
}

/// Agreement between supplied context markers and the markers the model used
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CitationReport {
    /// Markers supplied in the context but never cited
    pub unused_markers: Vec<String>,
    /// Markers in the generated text with no matching context chunk
    pub dropped_markers: Vec<String>,
    /// Cited markers / supplied markers
    pub coverage: f32,
}

impl CitationReport {
    pub fn is_clean(&self) -> bool {
        self.dropped_markers.is_empty()
    }
}

/// Latency per pipeline stage in milliseconds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageTimings {
    pub embed_ms: u64,
    pub retrieve_ms: u64,
    pub rerank_ms: u64,
    pub generate_ms: u64,
    pub total_ms: u64,
}

/// Statistics reported with every answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryStats {
    pub timings: StageTimings,
    pub chunks_retrieved: usize,
    pub chunks_reranked: usize,
    pub context_chunks: usize,
    pub vector_signal: SignalStatus,
    pub rerank_source: ScoreSource,
    /// Provider that produced the answer text
    pub generation_provider: String,
    /// Prompt plus answer tokens
    pub estimated_tokens: usize,
    pub estimated_cost: f64,
    pub cache_hit: bool,
}

/// A cited answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub document_id: Uuid,
    pub answer_text: String,
    pub citations: Vec<Citation>,
    pub citation_report: CitationReport,
    pub stats: QueryStats,
}

/// Working state of one query, owned by the query flow
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    pub query_text: String,
    pub query_embedding: Option<Vec<f32>>,
    pub candidate_list: Vec<RetrievalCandidate>,
    pub context_window_text: String,
    pub answer_text: String,
    pub citations: Vec<Citation>,
}

impl QueryContext {
    pub fn new(query_text: impl Into<String>) -> Self {
        Self {
            query_text: query_text.into(),
            ..Self::default()
        }
    }
}
