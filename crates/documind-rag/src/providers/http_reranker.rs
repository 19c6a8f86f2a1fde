//! Hosted cross-encoder rerankers sharing the `POST {base}/rerank` shape
//!
//! Cohere, Jina, Voyage and text-embeddings-inference (BGE) all accept a
//! query with a list of documents and answer with `{index, relevance_score}`
//! pairs.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{RerankerKind, RerankerProviderConfig};
use crate::error::{ProviderError, ProviderResult};

use super::reranker::RerankProvider;

/// HTTP reranker client
pub struct HttpReranker {
    client: Client,
    kind: RerankerKind,
    url: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    top_n: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<usize>,
}

#[derive(Deserialize)]
struct RerankResponse {
    #[serde(alias = "data")]
    results: Vec<RerankHit>,
}

#[derive(Deserialize)]
struct RerankHit {
    index: usize,
    relevance_score: f32,
}

impl HttpReranker {
    /// Build a reranker; returns `Ok(None)` when reranking is disabled
    pub fn from_config(config: &RerankerProviderConfig) -> ProviderResult<Option<Self>> {
        let kind = config.kind;
        let (Some(default_url), Some(default_model)) =
            (kind.default_base_url(), kind.default_model())
        else {
            return Ok(None);
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::unavailable(kind.name(), e.to_string()))?;

        let base = config.base_url.as_deref().unwrap_or(default_url);
        let api_key = config
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok());

        Ok(Some(Self {
            client,
            kind,
            url: format!("{}/rerank", base.trim_end_matches('/')),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| default_model.to_string()),
            api_key,
        }))
    }
}

#[async_trait]
impl RerankProvider for HttpReranker {
    async fn score(&self, query: &str, passages: &[String]) -> ProviderResult<Vec<f32>> {
        let name = self.kind.name();
        let (top_n, top_k) = match self.kind {
            RerankerKind::Voyage => (None, Some(passages.len())),
            _ => (Some(passages.len()), None),
        };
        let mut request = self.client.post(&self.url).json(&RerankRequest {
            model: &self.model,
            query,
            documents: passages,
            top_n,
            top_k,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::from_http(name, e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(name, status, &body));
        }

        let parsed: RerankResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::malformed(name, e.to_string()))?;
        scores_by_index(name, parsed.results, passages.len())
    }

    fn name(&self) -> &str {
        self.kind.name()
    }
}

/// Place each hit's score at its passage index; every passage must be scored
fn scores_by_index(provider: &str, hits: Vec<RerankHit>, len: usize) -> ProviderResult<Vec<f32>> {
    let mut scores = vec![None; len];
    for hit in hits {
        let slot = scores.get_mut(hit.index).ok_or_else(|| {
            ProviderError::malformed(provider, format!("result index {} out of range", hit.index))
        })?;
        *slot = Some(hit.relevance_score);
    }
    scores
        .into_iter()
        .enumerate()
        .map(|(i, s)| {
            s.ok_or_else(|| ProviderError::malformed(provider, format!("passage {} not scored", i)))
        })
        .collect()
}
