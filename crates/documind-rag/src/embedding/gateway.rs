//! Provider-chained embedding with batching and empty-input handling
//!
//! A whole request is always served by a single provider so that every
//! vector in one batch lives in the same embedding space. If the primary
//! fails on any batch, the entire request is redone on the fallback.

use futures::stream::{self, StreamExt};
use std::sync::Arc;

use crate::config::EmbeddingConfig;
use crate::error::{EmbeddingError, ProviderError, ProviderResult};
use crate::providers::{EmbeddingProvider, RetryPolicy};
use crate::types::EmbeddingSpace;

/// Vectors for one `embed` call
#[derive(Debug, Clone)]
pub struct EmbeddingBatch {
    /// One vector per input, in input order
    pub vectors: Vec<Vec<f32>>,
    pub space: EmbeddingSpace,
    /// Inputs that were empty and received the zero sentinel vector
    pub empty_inputs: Vec<usize>,
}

/// Embedding gateway over a primary and optional fallback provider
pub struct EmbeddingGateway {
    providers: Vec<Arc<dyn EmbeddingProvider>>,
    retry: RetryPolicy,
    batch_size: usize,
    concurrent_batches: usize,
}

impl EmbeddingGateway {
    pub fn new(
        primary: Arc<dyn EmbeddingProvider>,
        fallback: Option<Arc<dyn EmbeddingProvider>>,
        config: &EmbeddingConfig,
    ) -> Self {
        let mut providers = vec![primary];
        providers.extend(fallback);
        Self {
            providers,
            retry: RetryPolicy::new(&config.retry),
            batch_size: config.batch_size.max(1),
            concurrent_batches: config.concurrent_batches.max(1),
        }
    }

    /// Embedding space of the primary provider
    pub fn primary_space(&self) -> EmbeddingSpace {
        space_of(self.providers[0].as_ref())
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    /// Whether the provider behind `space` produces vocabulary-only vectors
    pub fn is_lexical_space(&self, space: &EmbeddingSpace) -> bool {
        self.providers
            .iter()
            .find(|p| space_of(p.as_ref()) == *space)
            .is_some_and(|p| p.is_lexical())
    }

    /// Embed texts in order. Empty strings are never sent to a provider.
    pub async fn embed(&self, texts: &[String]) -> Result<EmbeddingBatch, EmbeddingError> {
        let empty_inputs: Vec<usize> = texts
            .iter()
            .enumerate()
            .filter(|(_, t)| t.trim().is_empty())
            .map(|(i, _)| i)
            .collect();

        if texts.is_empty() {
            return Ok(EmbeddingBatch {
                vectors: Vec::new(),
                space: self.primary_space(),
                empty_inputs,
            });
        }
        if empty_inputs.len() == texts.len() {
            return Err(EmbeddingError::EmptyInputSkipped { count: texts.len() });
        }
        if !empty_inputs.is_empty() {
            tracing::warn!(
                "Skipping {} empty inputs; they receive a zero sentinel vector",
                empty_inputs.len()
            );
        }

        let non_empty: Vec<String> = texts
            .iter()
            .filter(|t| !t.trim().is_empty())
            .cloned()
            .collect();

        let mut attempts = 0;
        let mut last_error = None;
        for (position, provider) in self.providers.iter().enumerate() {
            if position > 0 {
                tracing::warn!("Falling back to embedding provider {}", provider.name());
            }
            let (result, used) = self.embed_with(provider.as_ref(), &non_empty).await;
            attempts += used;
            match result {
                Ok(vectors) => {
                    let space = space_of(provider.as_ref());
                    let mut produced = vectors.into_iter();
                    let vectors = texts
                        .iter()
                        .map(|t| {
                            if t.trim().is_empty() {
                                Some(vec![0.0; space.dimensions])
                            } else {
                                produced.next()
                            }
                        })
                        .collect::<Option<Vec<_>>>()
                        .ok_or_else(|| EmbeddingError::Unavailable {
                            attempts,
                            last: ProviderError::malformed(provider.name(), "vector count mismatch"),
                        })?;
                    return Ok(EmbeddingBatch {
                        vectors,
                        space,
                        empty_inputs,
                    });
                }
                Err(e) => {
                    tracing::warn!("Embedding provider {} failed: {}", provider.name(), e);
                    last_error = Some(e);
                }
            }
        }

        Err(EmbeddingError::Unavailable {
            attempts,
            last: last_error
                .unwrap_or_else(|| ProviderError::unavailable("embedding", "no providers")),
        })
    }

    /// Embed a query with the provider that produced `space`.
    ///
    /// Never falls back to another provider, since its vectors would not be comparable.
    pub async fn embed_in_space(
        &self,
        space: &EmbeddingSpace,
        text: &str,
    ) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInputSkipped { count: 1 });
        }
        let provider = self
            .providers
            .iter()
            .find(|p| space_of(p.as_ref()) == *space)
            .ok_or_else(|| EmbeddingError::Unavailable {
                attempts: 0,
                last: ProviderError::rejected(
                    &space.provider,
                    format!("no configured provider for {}d space", space.dimensions),
                ),
            })?;

        let input = [text.to_string()];
        let (result, attempts) = self.embed_with(provider.as_ref(), &input).await;
        result
            .and_then(|mut v| {
                v.pop()
                    .ok_or_else(|| ProviderError::malformed(provider.name(), "empty response"))
            })
            .map_err(|last| EmbeddingError::Unavailable { attempts, last })
    }

    /// All batches through one provider; returns the result and the attempts used
    async fn embed_with(
        &self,
        provider: &dyn EmbeddingProvider,
        texts: &[String],
    ) -> (ProviderResult<Vec<Vec<f32>>>, u32) {
        let batch_size = self.batch_size.min(provider.max_batch_size().max(1));

        // Owned batches keep the request future `Send` for spawned ingestion
        let batches: Vec<Vec<String>> = texts.chunks(batch_size).map(<[String]>::to_vec).collect();
        let calls = batches.into_iter().map(|batch| {
            let retry = &self.retry;
            async move {
                retry
                    .run(provider.name(), || embed_checked(provider, &batch))
                    .await
            }
        });
        let outcomes: Vec<_> = stream::iter(calls)
            .buffered(self.concurrent_batches)
            .collect()
            .await;

        let mut attempts = 0;
        let mut vectors = Vec::with_capacity(texts.len());
        for outcome in outcomes {
            attempts += outcome.attempts;
            match outcome.result {
                Ok(batch) => vectors.extend(batch),
                Err(e) => return (Err(e), attempts),
            }
        }
        (Ok(vectors), attempts)
    }
}

fn space_of(provider: &dyn EmbeddingProvider) -> EmbeddingSpace {
    EmbeddingSpace {
        provider: provider.name().to_string(),
        dimensions: provider.dimensions(),
    }
}

/// One provider call, rejecting responses with the wrong shape
async fn embed_checked(
    provider: &dyn EmbeddingProvider,
    batch: &[String],
) -> ProviderResult<Vec<Vec<f32>>> {
    let vectors = provider.embed_batch(batch).await?;
    if vectors.len() != batch.len() {
        return Err(ProviderError::malformed(
            provider.name(),
            format!("expected {} vectors, got {}", batch.len(), vectors.len()),
        ));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != provider.dimensions()) {
        return Err(ProviderError::malformed(
            provider.name(),
            format!(
                "expected {} dimensions, got {}",
                provider.dimensions(),
                bad.len()
            ),
        ));
    }
    Ok(vectors)
}
