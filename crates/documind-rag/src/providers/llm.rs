//! LLM provider trait for generating answers

use async_trait::async_trait;

use crate::error::ProviderResult;

/// Trait for text generation
///
/// Implementations:
/// - `OllamaLlm`: Local Ollama server
/// - `OpenAiLlm`: OpenAI-compatible chat completions
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a completion for a fully assembled prompt
    async fn generate(&self, prompt: &str) -> ProviderResult<String>;

    /// Check if the provider is reachable
    async fn health_check(&self) -> ProviderResult<bool> {
        Ok(true)
    }

    /// Get provider name for logging
    fn name(&self) -> &str;

    /// Get the model being used
    fn model(&self) -> &str;
}
