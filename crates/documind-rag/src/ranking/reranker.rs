//! Cross-encoder reranking with fused-score fallback and MMR diversification

use std::cmp::Ordering;
use std::sync::Arc;

use super::mmr::{mmr_select, Redundancy};
use crate::config::RerankConfig;
use crate::error::ProviderError;
use crate::providers::{RerankProvider, RetryPolicy};
use crate::retrieval::min_max_normalize;
use crate::types::{Chunk, RankedResult, RetrievalCandidate, ScoreSource};

/// Reranked results and where their scores came from
#[derive(Debug, Clone)]
pub struct RerankOutcome {
    pub results: Vec<RankedResult>,
    pub source: ScoreSource,
}

/// Second-pass ranking over retrieval candidates
pub struct Reranker {
    providers: Vec<Arc<dyn RerankProvider>>,
    retry: RetryPolicy,
    top_k: usize,
    diversity: f32,
}

impl Reranker {
    /// Providers are tried in order; with none configured the fused score is used
    pub fn new(
        primary: Option<Arc<dyn RerankProvider>>,
        fallback: Option<Arc<dyn RerankProvider>>,
        config: &RerankConfig,
    ) -> Self {
        Self {
            providers: primary.into_iter().chain(fallback).collect(),
            retry: RetryPolicy::new(&config.retry),
            top_k: config.rerank_top_k,
            diversity: config.diversity_threshold,
        }
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    /// Rerank `candidates`, returning `min(rerank_top_k, candidates.len())` results.
    ///
    /// Never fails: when every provider is exhausted the fused retrieval score
    /// becomes the ranking key.
    pub async fn rerank(
        &self,
        query: &str,
        candidates: Vec<(RetrievalCandidate, Arc<Chunk>)>,
    ) -> RerankOutcome {
        if candidates.is_empty() {
            return RerankOutcome {
                results: Vec::new(),
                source: ScoreSource::FusedFallback,
            };
        }

        let passages: Vec<String> = candidates.iter().map(|(_, c)| c.text.clone()).collect();
        let (scores, source) = match self.cross_encode(query, &passages).await {
            Some((scores, provider)) => (scores, ScoreSource::CrossEncoder(provider)),
            None => (
                candidates.iter().map(|(c, _)| c.fused_score).collect(),
                ScoreSource::FusedFallback,
            ),
        };

        let mut order: Vec<usize> = (0..candidates.len()).collect();
        order.sort_by(|&a, &b| {
            scores[b]
                .partial_cmp(&scores[a])
                .unwrap_or(Ordering::Equal)
                .then_with(|| {
                    candidates[b]
                        .0
                        .fused_score
                        .partial_cmp(&candidates[a].0.fused_score)
                        .unwrap_or(Ordering::Equal)
                })
                .then_with(|| candidates[a].0.chunk_id.cmp(&candidates[b].0.chunk_id))
        });

        let sorted_scores: Vec<f32> = order.iter().map(|&i| scores[i]).collect();
        let relevance = min_max_normalize(&sorted_scores);
        let chunks: Vec<&Chunk> = order.iter().map(|&i| candidates[i].1.as_ref()).collect();
        let redundancy = Redundancy::new(&chunks);
        let picks = mmr_select(&relevance, self.top_k, self.diversity, |a, b| {
            redundancy.between(a, b)
        });

        let results = picks
            .into_iter()
            .enumerate()
            .map(|(rank, pos)| {
                let (candidate, chunk) = &candidates[order[pos]];
                RankedResult {
                    chunk_id: candidate.chunk_id,
                    rerank_score: sorted_scores[pos],
                    rank: rank + 1,
                    chunk: Arc::clone(chunk),
                }
            })
            .collect();

        RerankOutcome { results, source }
    }

    async fn cross_encode(&self, query: &str, passages: &[String]) -> Option<(Vec<f32>, String)> {
        for provider in &self.providers {
            let outcome = self
                .retry
                .run(provider.name(), || async {
                    let scores = provider.score(query, passages).await?;
                    if scores.len() != passages.len() {
                        return Err(ProviderError::malformed(
                            provider.name(),
                            format!("expected {} scores, got {}", passages.len(), scores.len()),
                        ));
                    }
                    Ok(scores)
                })
                .await;

            match outcome.result {
                Ok(scores) => return Some((scores, provider.name().to_string())),
                Err(e) => tracing::warn!(
                    "Reranker {} failed after {} attempts: {}",
                    provider.name(),
                    outcome.attempts,
                    e
                ),
            }
        }

        if !self.providers.is_empty() {
            tracing::warn!("All rerankers failed, ranking by fused score");
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::error::ProviderResult;
    use crate::types::{CharSpan, SourceContext};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
    use uuid::Uuid;

    /// Scores passages by their length
    struct LengthScorer;

    #[async_trait]
    impl RerankProvider for LengthScorer {
        async fn score(&self, _query: &str, passages: &[String]) -> ProviderResult<Vec<f32>> {
            Ok(passages.iter().map(|p| p.len() as f32).collect())
        }

        fn name(&self) -> &str {
            "length"
        }
    }

    struct DownScorer {
        calls: AtomicU32,
    }

    #[async_trait]
    impl RerankProvider for DownScorer {
        async fn score(&self, _query: &str, _passages: &[String]) -> ProviderResult<Vec<f32>> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            Err(ProviderError::RateLimited {
                provider: "down".to_string(),
            })
        }

        fn name(&self) -> &str {
            "down"
        }
    }

    fn config(top_k: usize, diversity: f32) -> RerankConfig {
        RerankConfig {
            rerank_top_k: top_k,
            diversity_threshold: diversity,
            retry: RetryConfig {
                max_retries: 2,
                base_delay_ms: 100,
                max_delay_ms: 1_000,
                timeout_ms: 2_000,
            },
        }
    }

    fn candidate(n: u128, fused: f32, text: &str) -> (RetrievalCandidate, Arc<Chunk>) {
        let id = Uuid::from_u128(n);
        let chunk = Chunk {
            id,
            document_id: Uuid::nil(),
            sequence_index: n as usize,
            text: text.to_string(),
            token_count: 0,
            char_span: CharSpan { start: 0, end: text.len() },
            embedding: None,
            source_context: SourceContext::default(),
        };
        (
            RetrievalCandidate {
                chunk_id: id,
                vector_score: fused,
                lexical_score: 0.0,
                fused_score: fused,
            },
            Arc::new(chunk),
        )
    }

    fn ids(outcome: &RerankOutcome) -> Vec<u128> {
        outcome.results.iter().map(|r| r.chunk_id.as_u128()).collect()
    }

    #[tokio::test]
    async fn test_cross_encoder_reorders() {
        let reranker = Reranker::new(Some(Arc::new(LengthScorer)), None, &config(5, 0.0));
        let outcome = reranker
            .rerank(
                "q",
                vec![
                    candidate(1, 0.9, "short"),
                    candidate(2, 0.5, "a much longer passage"),
                    candidate(3, 0.1, "medium text"),
                ],
            )
            .await;
        assert_eq!(outcome.source, ScoreSource::CrossEncoder("length".to_string()));
        assert_eq!(ids(&outcome), vec![2, 3, 1]);
        let ranks: Vec<usize> = outcome.results.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_failure_falls_back_to_fused() {
        let down = Arc::new(DownScorer {
            calls: AtomicU32::new(0),
        });
        let reranker = Reranker::new(Some(down.clone()), None, &config(2, 0.0));
        let outcome = reranker
            .rerank(
                "q",
                vec![
                    candidate(1, 0.2, "one"),
                    candidate(2, 0.8, "two"),
                    candidate(3, 0.5, "three"),
                ],
            )
            .await;
        assert_eq!(outcome.source, ScoreSource::FusedFallback);
        assert_eq!(ids(&outcome), vec![2, 3]);
        assert_eq!(down.calls.load(AtomicOrdering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_secondary_provider_used() {
        let down = Arc::new(DownScorer {
            calls: AtomicU32::new(0),
        });
        let reranker =
            Reranker::new(Some(down), Some(Arc::new(LengthScorer)), &config(5, 0.0));
        let outcome = reranker
            .rerank("q", vec![candidate(1, 0.9, "x"), candidate(2, 0.1, "xxxx")])
            .await;
        assert_eq!(outcome.source, ScoreSource::CrossEncoder("length".to_string()));
        assert_eq!(ids(&outcome), vec![2, 1]);
    }

    #[tokio::test]
    async fn test_output_bounded_by_top_k_and_input() {
        let reranker = Reranker::new(None, None, &config(3, 0.3));
        let many: Vec<_> = (1..=8)
            .map(|i| candidate(i, i as f32 / 10.0, &format!("passage number {}", i)))
            .collect();
        assert_eq!(reranker.rerank("q", many).await.results.len(), 3);

        let few = vec![candidate(1, 0.5, "only one")];
        assert_eq!(reranker.rerank("q", few).await.results.len(), 1);
        assert!(reranker.rerank("q", Vec::new()).await.results.is_empty());
    }

    #[tokio::test]
    async fn test_ties_break_by_fused_then_id() {
        // LengthScorer gives equal scores to equal-length passages
        let reranker = Reranker::new(Some(Arc::new(LengthScorer)), None, &config(5, 0.0));
        let outcome = reranker
            .rerank(
                "q",
                vec![
                    candidate(7, 0.3, "same"),
                    candidate(5, 0.3, "same"),
                    candidate(9, 0.6, "same"),
                ],
            )
            .await;
        assert_eq!(ids(&outcome), vec![9, 5, 7]);
    }

    #[tokio::test]
    async fn test_diversity_demotes_duplicates() {
        let reranker = Reranker::new(None, None, &config(2, 1.0));
        let outcome = reranker
            .rerank(
                "q",
                vec![
                    candidate(1, 0.9, "refund policy thirty days receipt"),
                    candidate(2, 0.85, "refund policy thirty days receipt"),
                    candidate(3, 0.3, "shipping rates vary by region"),
                ],
            )
            .await;
        assert_eq!(ids(&outcome), vec![1, 3]);
    }
}
