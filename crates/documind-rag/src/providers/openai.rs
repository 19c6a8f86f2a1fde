//! OpenAI-compatible providers, used as the secondary embedding and generation backend

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::OpenAiConfig;
use crate::error::{ProviderError, ProviderResult};

use super::embedding::EmbeddingProvider;
use super::llm::LlmProvider;

const PROVIDER: &str = "openai";

/// Client for `/embeddings` and `/chat/completions`
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatContent,
}

#[derive(Deserialize)]
struct ChatContent {
    content: Option<String>,
}

impl OpenAiClient {
    /// Create a client, reading the API key from the configured environment variable
    pub fn new(config: &OpenAiConfig) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| ProviderError::unavailable(PROVIDER, e.to_string()))?;

        let api_key = std::env::var(&config.api_key_env).ok();
        if api_key.is_none() {
            tracing::warn!(
                "{} is not set; requests to {} will be unauthenticated",
                config.api_key_env,
                config.base_url
            );
        }

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> ProviderResult<R> {
        let mut request = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::from_http(PROVIDER, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(PROVIDER, status, &body));
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::malformed(PROVIDER, e.to_string()))
    }

    pub async fn embed(&self, model: &str, texts: &[String]) -> ProviderResult<Vec<Vec<f32>>> {
        let parsed: EmbeddingsResponse = self
            .post("/embeddings", &EmbeddingsRequest { model, input: texts })
            .await?;

        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }

    pub async fn chat(&self, model: &str, prompt: &str, temperature: f32) -> ProviderResult<String> {
        let request = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature,
        };
        let parsed: ChatResponse = self.post("/chat/completions", &request).await?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::malformed(PROVIDER, "response has no choices"))
    }
}

/// OpenAI-compatible embedding provider
pub struct OpenAiEmbedder {
    client: Arc<OpenAiClient>,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbedder {
    pub fn from_client(client: Arc<OpenAiClient>, model: String, dimensions: usize) -> Self {
        Self {
            client,
            model,
            dimensions,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> ProviderResult<Vec<Vec<f32>>> {
        self.client.embed(&self.model, texts).await
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn max_batch_size(&self) -> usize {
        256
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}

/// OpenAI-compatible chat provider
pub struct OpenAiLlm {
    client: Arc<OpenAiClient>,
    model: String,
    temperature: f32,
}

impl OpenAiLlm {
    pub fn from_client(client: Arc<OpenAiClient>, model: String, temperature: f32) -> Self {
        Self {
            client,
            model,
            temperature,
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiLlm {
    async fn generate(&self, prompt: &str) -> ProviderResult<String> {
        self.client.chat(&self.model, prompt, self.temperature).await
    }

    fn name(&self) -> &str {
        PROVIDER
    }

    fn model(&self) -> &str {
        &self.model
    }
}
