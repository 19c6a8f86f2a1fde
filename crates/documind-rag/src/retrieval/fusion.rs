//! Hybrid retrieval: concurrent vector and BM25 lookups merged by weighted score fusion

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::timeout;
use uuid::Uuid;

use super::lexical::{LexicalIndex, LexicalMatch};
use crate::config::RetrievalConfig;
use crate::providers::{VectorMatch, VectorStoreProvider};
use crate::types::{RetrievalCandidate, SignalStatus};

/// Scores within this distance are treated as one value during normalization
const SCORE_EPSILON: f32 = 1e-6;

/// Scale scores to `[0, 1]`. A set with no spread maps to 1.0.
pub fn min_max_normalize(scores: &[f32]) -> Vec<f32> {
    let Some(min) = scores.iter().copied().reduce(f32::min) else {
        return Vec::new();
    };
    let max = scores.iter().copied().fold(min, f32::max);
    let range = max - min;
    if range < SCORE_EPSILON {
        return vec![1.0; scores.len()];
    }
    scores.iter().map(|s| (s - min) / range).collect()
}

/// Result of one hybrid retrieval
#[derive(Debug, Clone)]
pub struct RetrievalOutcome {
    /// At most `top_k`, by descending fused score
    pub candidates: Vec<RetrievalCandidate>,
    pub vector_signal: SignalStatus,
    pub lexical_signal: SignalStatus,
    /// No candidate cleared the similarity threshold; the single best was kept
    pub below_threshold: bool,
}

impl RetrievalOutcome {
    /// Whether anything usable was found
    pub fn has_relevant_content(&self) -> bool {
        !self.candidates.is_empty() && !self.below_threshold
    }
}

/// How a retrieval decides whether anything relevant was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelevanceGate {
    /// Candidates must reach the similarity threshold on the vector signal
    VectorThreshold,
    /// At least one keyword match is required; vector scores are not thresholded.
    /// For embedding spaces that only encode shared vocabulary.
    LexicalMatch,
}

/// Merges vector and lexical result sets into one ranked candidate list
pub struct FusionRetriever {
    vector_store: Arc<dyn VectorStoreProvider>,
    lexical: Arc<LexicalIndex>,
    config: RetrievalConfig,
}

enum SubSearch {
    Vector(Result<crate::error::ProviderResult<Vec<VectorMatch>>, tokio::time::error::Elapsed>),
    Lexical(Result<Result<Vec<LexicalMatch>, tokio::task::JoinError>, tokio::time::error::Elapsed>),
}

impl FusionRetriever {
    pub fn new(
        vector_store: Arc<dyn VectorStoreProvider>,
        lexical: Arc<LexicalIndex>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            vector_store,
            lexical,
            config,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Retrieve candidates for `document_id`, gated on the vector similarity threshold.
    ///
    /// Both lookups run as separate tasks and are awaited together. A lookup
    /// that times out or fails contributes nothing; the other signal still
    /// ranks. Dropping the returned future aborts both tasks.
    pub async fn retrieve(
        &self,
        query_text: &str,
        query_vector: Option<&[f32]>,
        document_id: Uuid,
        top_k: usize,
    ) -> RetrievalOutcome {
        self.retrieve_gated(query_text, query_vector, document_id, top_k, RelevanceGate::VectorThreshold)
            .await
    }

    /// Like `retrieve`, with an explicit relevance gate.
    ///
    /// `LexicalMatch` falls back to the vector threshold when the lexical
    /// lookup did not complete.
    pub async fn retrieve_gated(
        &self,
        query_text: &str,
        query_vector: Option<&[f32]>,
        document_id: Uuid,
        top_k: usize,
        gate: RelevanceGate,
    ) -> RetrievalOutcome {
        let fetch = top_k.saturating_mul(self.config.overfetch_factor).max(1);
        let limit = self.config.search_timeout();

        let mut tasks = JoinSet::new();
        let mut vector_signal = SignalStatus::Skipped;
        if let Some(vector) = query_vector {
            vector_signal = SignalStatus::Failed;
            let store = Arc::clone(&self.vector_store);
            let vector = vector.to_vec();
            tasks.spawn(async move {
                SubSearch::Vector(timeout(limit, store.query(&vector, fetch, Some(document_id))).await)
            });
        }

        let mut lexical_signal = SignalStatus::Failed;
        let lexical = Arc::clone(&self.lexical);
        let query = query_text.to_string();
        tasks.spawn(async move {
            let search = tokio::task::spawn_blocking(move || {
                lexical.search(&query, fetch, Some(document_id))
            });
            SubSearch::Lexical(timeout(limit, search).await)
        });

        let mut vector_hits = Vec::new();
        let mut lexical_hits = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(SubSearch::Vector(Ok(Ok(hits)))) => {
                    vector_signal = SignalStatus::Ok;
                    vector_hits = hits;
                }
                Ok(SubSearch::Vector(Ok(Err(e)))) => {
                    tracing::warn!("Vector search failed, continuing lexical-only: {}", e);
                }
                Ok(SubSearch::Vector(Err(_))) => {
                    vector_signal = SignalStatus::TimedOut;
                    tracing::warn!("Vector search timed out after {:?}", limit);
                }
                Ok(SubSearch::Lexical(Ok(Ok(hits)))) => {
                    lexical_signal = SignalStatus::Ok;
                    lexical_hits = hits;
                }
                Ok(SubSearch::Lexical(Ok(Err(e)))) => {
                    tracing::warn!("Lexical search task failed: {}", e);
                }
                Ok(SubSearch::Lexical(Err(_))) => {
                    lexical_signal = SignalStatus::TimedOut;
                    tracing::warn!("Lexical search timed out after {:?}", limit);
                }
                Err(e) => tracing::warn!("Search task failed: {}", e),
            }
        }

        let gate_on_lexical =
            gate == RelevanceGate::LexicalMatch && lexical_signal == SignalStatus::Ok;
        let apply_threshold = vector_signal == SignalStatus::Ok && !gate_on_lexical;
        let (candidates, mut below_threshold) = fuse(
            &vector_hits,
            &lexical_hits,
            top_k,
            &self.config,
            apply_threshold,
        );
        if gate_on_lexical && lexical_hits.is_empty() {
            below_threshold = true;
        }

        tracing::debug!(
            "Retrieved {} candidates (vector: {} hits {:?}, lexical: {} hits {:?})",
            candidates.len(),
            vector_hits.len(),
            vector_signal,
            lexical_hits.len(),
            lexical_signal
        );

        RetrievalOutcome {
            candidates,
            vector_signal,
            lexical_signal,
            below_threshold,
        }
    }
}

/// Fused ordering: score, then vector score, both descending, then chunk id
fn fused_order(a: &RetrievalCandidate, b: &RetrievalCandidate) -> Ordering {
    b.fused_score
        .partial_cmp(&a.fused_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            b.vector_score
                .partial_cmp(&a.vector_score)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.chunk_id.cmp(&b.chunk_id))
}

/// Combine two result sets.
///
/// Returns the ranked candidates and whether the threshold removed everything,
/// in which case only the best unfiltered candidate is returned.
pub fn fuse(
    vector: &[VectorMatch],
    lexical: &[LexicalMatch],
    top_k: usize,
    config: &RetrievalConfig,
    apply_threshold: bool,
) -> (Vec<RetrievalCandidate>, bool) {
    let vector_norm = min_max_normalize(&vector.iter().map(|m| m.score).collect::<Vec<_>>());
    let lexical_norm = min_max_normalize(&lexical.iter().map(|m| m.score).collect::<Vec<_>>());

    // chunk id -> (raw vector, normalized vector, raw lexical, normalized lexical)
    let mut merged: HashMap<Uuid, (f32, f32, f32, f32)> = HashMap::new();
    for (hit, norm) in vector.iter().zip(vector_norm) {
        let entry = merged.entry(hit.chunk_id).or_default();
        entry.0 = hit.score;
        entry.1 = norm;
    }
    for (hit, norm) in lexical.iter().zip(lexical_norm) {
        let entry = merged.entry(hit.chunk_id).or_default();
        entry.2 = hit.score;
        entry.3 = norm;
    }

    let mut ranked: Vec<RetrievalCandidate> = merged
        .into_iter()
        .map(|(chunk_id, (raw_v, norm_v, raw_l, norm_l))| RetrievalCandidate {
            chunk_id,
            vector_score: raw_v,
            lexical_score: raw_l,
            fused_score: config.vector_weight * norm_v + config.bm25_weight * norm_l,
        })
        .collect();
    ranked.sort_by(fused_order);

    if !apply_threshold {
        ranked.truncate(top_k);
        return (ranked, false);
    }

    let best = ranked.first().cloned();
    let mut kept: Vec<RetrievalCandidate> = ranked
        .into_iter()
        .filter(|c| c.vector_score >= config.similarity_threshold)
        .collect();

    match (kept.is_empty(), best) {
        (true, Some(best)) => {
            tracing::debug!(
                "No candidate reached similarity {:.2}; keeping best ({:.3})",
                config.similarity_threshold,
                best.vector_score
            );
            (vec![best], true)
        }
        _ => {
            kept.truncate(top_k);
            (kept, false)
        }
    }
}
