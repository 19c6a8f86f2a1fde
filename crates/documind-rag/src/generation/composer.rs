//! Answer composition: budgeted context, generation with fallback, citation linking

use std::sync::Arc;

use super::citation::{extract_and_link_citations, truncate_snippet};
use super::prompt::PromptBuilder;
use crate::config::GenerationConfig;
use crate::error::{DegradedAnswer, ProviderError, QueryError};
use crate::ingestion::count_tokens;
use crate::providers::{LlmProvider, RetryPolicy};
use crate::types::{Citation, CitationReport, RankedResult};

/// A generated, citation-checked answer
#[derive(Debug, Clone)]
pub struct ComposedAnswer {
    pub answer_text: String,
    pub citations: Vec<Citation>,
    pub citation_report: CitationReport,
    /// Provider that produced the text
    pub provider: String,
    /// Context as sent to the model
    pub context_text: String,
    pub context_chunks: usize,
    /// Prompt plus answer tokens
    pub estimated_tokens: usize,
}

/// Builds the prompt, calls the generation providers in order and links citations
pub struct AnswerComposer {
    providers: Vec<Arc<dyn LlmProvider>>,
    retry: RetryPolicy,
    config: GenerationConfig,
}

impl AnswerComposer {
    pub fn new(
        primary: Arc<dyn LlmProvider>,
        fallback: Option<Arc<dyn LlmProvider>>,
        config: &GenerationConfig,
    ) -> Self {
        Self {
            providers: std::iter::once(primary).chain(fallback).collect(),
            retry: RetryPolicy::new(&config.retry),
            config: config.clone(),
        }
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers
            .iter()
            .map(|p| format!("{} ({})", p.name(), p.model()))
            .collect()
    }

    /// Answer `question` from `ranked` results.
    ///
    /// Fails with `GenerationUnavailable` only after every provider exhausted
    /// its retries; the error carries the top chunk's snippet as a degraded answer.
    pub async fn compose(
        &self,
        question: &str,
        ranked: &[RankedResult],
    ) -> Result<ComposedAnswer, QueryError> {
        let context = PromptBuilder::build_context(ranked, self.config.max_context_length);
        let prompt = PromptBuilder::build_rag_prompt(question, &context);

        let mut last_error = ProviderError::unavailable("generation", "no provider configured");
        for provider in &self.providers {
            let outcome = self
                .retry
                .run(provider.name(), || provider.generate(&prompt))
                .await;

            match outcome.result {
                Ok(raw) => {
                    let linked = extract_and_link_citations(
                        &raw,
                        &context.entries,
                        self.config.snippet_length,
                        self.config.max_citations,
                    );
                    if !linked.report.dropped_markers.is_empty() {
                        tracing::warn!(
                            "Removed {} citation markers with no source: {:?}",
                            linked.report.dropped_markers.len(),
                            linked.report.dropped_markers
                        );
                    }

                    return Ok(ComposedAnswer {
                        estimated_tokens: count_tokens(&prompt) + count_tokens(&raw),
                        answer_text: linked.answer_text,
                        citations: linked.citations,
                        citation_report: linked.report,
                        provider: provider.name().to_string(),
                        context_chunks: context.entries.len(),
                        context_text: context.text,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        "Generation provider {} failed after {} attempts: {}",
                        provider.name(),
                        outcome.attempts,
                        e
                    );
                    last_error = e;
                }
            }
        }

        let degraded = ranked.first().map(|top| DegradedAnswer {
            chunk_id: top.chunk_id,
            snippet: truncate_snippet(&top.chunk.text, self.config.snippet_length),
        });
        Err(QueryError::GenerationUnavailable {
            last: last_error,
            degraded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::error::ProviderResult;
    use crate::types::{CharSpan, Chunk, SourceContext};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;
    use uuid::Uuid;

    struct MockLlm {
        name: &'static str,
        latency: Duration,
        reply: Option<&'static str>,
        calls: AtomicU32,
    }

    impl MockLlm {
        fn new(name: &'static str, reply: Option<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                name,
                latency: Duration::from_millis(100),
                reply,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for MockLlm {
        async fn generate(&self, prompt: &str) -> ProviderResult<String> {
            assert!(prompt.contains("[1]"));
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.latency).await;
            match self.reply {
                Some(text) => Ok(text.to_string()),
                None => Err(ProviderError::unavailable(self.name, "model offline")),
            }
        }

        fn name(&self) -> &str {
            self.name
        }

        fn model(&self) -> &str {
            "mock"
        }
    }

    fn config() -> GenerationConfig {
        GenerationConfig {
            retry: RetryConfig {
                max_retries: 1,
                base_delay_ms: 500,
                max_delay_ms: 8_000,
                timeout_ms: 10_000,
            },
            ..GenerationConfig::default()
        }
    }

    fn ranked() -> Vec<RankedResult> {
        ["Refunds are issued within 30 days.", "Shipping is free over $50."]
            .iter()
            .enumerate()
            .map(|(i, text)| {
                let chunk = Chunk {
                    id: Uuid::from_u128(i as u128 + 1),
                    document_id: Uuid::nil(),
                    sequence_index: i,
                    text: text.to_string(),
                    token_count: 8,
                    char_span: CharSpan { start: 0, end: text.len() },
                    embedding: None,
                    source_context: SourceContext::default(),
                };
                RankedResult {
                    chunk_id: chunk.id,
                    rerank_score: 1.0 - i as f32 * 0.1,
                    rank: i + 1,
                    chunk: Arc::new(chunk),
                }
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_after_primary_fails_twice() {
        let primary = MockLlm::new("primary", None);
        let fallback = MockLlm::new("fallback", Some("Refunds take 30 days [1]."));
        let composer = AnswerComposer::new(primary.clone(), Some(fallback.clone()), &config());

        let started = Instant::now();
        let answer = composer.compose("How long do refunds take?", &ranked()).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(answer.provider, "fallback");
        assert_eq!(answer.answer_text, "Refunds take 30 days [1].");
        assert_eq!(answer.citations.len(), 1);
        assert_eq!(answer.citations[0].chunk_id, Uuid::from_u128(1));
        assert_eq!(primary.calls.load(Ordering::SeqCst), 2);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
        // two failed attempts, one backoff, then the fallback call
        assert!(elapsed >= Duration::from_millis(800));
        assert!(elapsed < Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_providers_fail_with_degraded_answer() {
        let composer = AnswerComposer::new(
            MockLlm::new("primary", None),
            Some(MockLlm::new("fallback", None)),
            &config(),
        );
        let err = composer.compose("How long?", &ranked()).await.unwrap_err();
        assert_eq!(err.stage(), crate::error::QueryStage::Generation);
        let degraded = err.degraded_answer().unwrap();
        assert_eq!(degraded.chunk_id, Uuid::from_u128(1));
        assert_eq!(degraded.snippet, "Refunds are issued within 30 days.");
    }

    #[tokio::test]
    async fn test_hallucinated_marker_never_cited() {
        let composer = AnswerComposer::new(
            MockLlm::new("primary", Some("Free shipping [2]. Also [5].")),
            None,
            &config(),
        );
        let answer = composer.compose("Shipping?", &ranked()).await.unwrap();
        assert_eq!(answer.answer_text, "Free shipping [2]. Also.");
        assert_eq!(answer.citations.len(), 1);
        assert_eq!(answer.citations[0].marker, "[2]");
        assert_eq!(answer.citation_report.dropped_markers, vec!["[5]"]);
        assert_eq!(answer.context_chunks, 2);
        assert!(answer.estimated_tokens > 0);
    }
}
