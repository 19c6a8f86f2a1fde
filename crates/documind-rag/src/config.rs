//! Configuration for the RAG pipeline
//!
//! Loaded from TOML, then optionally overridden from the environment using the
//! upper-case option names (`CHUNK_SIZE`, `TOP_K`, ...).

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Main pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Chunking configuration
    pub chunking: ChunkingConfig,
    /// Hybrid retrieval configuration
    pub retrieval: RetrievalConfig,
    /// Reranking and diversity configuration
    pub rerank: RerankConfig,
    /// Context assembly and generation configuration
    pub generation: GenerationConfig,
    /// Embedding gateway configuration
    pub embedding: EmbeddingConfig,
    /// LLM provider endpoints
    pub llm: LlmConfig,
    /// Cross-encoder reranker endpoint
    pub reranker_provider: RerankerProviderConfig,
    /// Answer cache configuration
    pub cache: CacheConfig,
}

impl RagConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: RagConfig = toml::from_str(&raw)?;
        Ok(config)
    }

    /// Load from a file when present, apply environment overrides and validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => Self::from_file(p)?,
            Some(p) => {
                tracing::debug!("Config file {} not found, using defaults", p.display());
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Override recognized options from environment variables
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Override recognized options from an arbitrary key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_value(&lookup, "CHUNK_SIZE", &mut self.chunking.chunk_size)?;
        override_value(&lookup, "CHUNK_OVERLAP", &mut self.chunking.chunk_overlap)?;
        override_value(&lookup, "MIN_CHUNK_SIZE", &mut self.chunking.min_chunk_size)?;
        override_value(&lookup, "MAX_CHUNK_SIZE", &mut self.chunking.max_chunk_size)?;
        override_value(&lookup, "TOP_K", &mut self.retrieval.top_k)?;
        override_value(&lookup, "OVERFETCH_FACTOR", &mut self.retrieval.overfetch_factor)?;
        override_value(
            &lookup,
            "SIMILARITY_THRESHOLD",
            &mut self.retrieval.similarity_threshold,
        )?;
        override_value(&lookup, "VECTOR_WEIGHT", &mut self.retrieval.vector_weight)?;
        override_value(&lookup, "BM25_WEIGHT", &mut self.retrieval.bm25_weight)?;
        override_value(&lookup, "RERANK_TOP_K", &mut self.rerank.rerank_top_k)?;
        override_value(
            &lookup,
            "DIVERSITY_THRESHOLD",
            &mut self.rerank.diversity_threshold,
        )?;
        override_value(
            &lookup,
            "MAX_CONTEXT_LENGTH",
            &mut self.generation.max_context_length,
        )?;
        Ok(())
    }

    /// Reject inconsistent settings
    pub fn validate(&self) -> Result<()> {
        let c = &self.chunking;
        if c.min_chunk_size == 0 {
            return Err(Error::config("MIN_CHUNK_SIZE must be at least 1"));
        }
        if !(c.min_chunk_size <= c.chunk_size && c.chunk_size <= c.max_chunk_size) {
            return Err(Error::config(format!(
                "chunk sizes must satisfy MIN_CHUNK_SIZE ({}) <= CHUNK_SIZE ({}) <= MAX_CHUNK_SIZE ({})",
                c.min_chunk_size, c.chunk_size, c.max_chunk_size
            )));
        }
        if c.chunk_overlap >= c.min_chunk_size {
            return Err(Error::config(format!(
                "CHUNK_OVERLAP ({}) must be smaller than MIN_CHUNK_SIZE ({})",
                c.chunk_overlap, c.min_chunk_size
            )));
        }

        let r = &self.retrieval;
        if r.top_k == 0 || r.overfetch_factor == 0 {
            return Err(Error::config("TOP_K and OVERFETCH_FACTOR must be at least 1"));
        }
        if r.vector_weight < 0.0 || r.bm25_weight < 0.0 || r.vector_weight + r.bm25_weight <= 0.0
        {
            return Err(Error::config(
                "VECTOR_WEIGHT and BM25_WEIGHT must be non-negative with a positive sum",
            ));
        }
        if !(-1.0..=1.0).contains(&r.similarity_threshold) {
            return Err(Error::config("SIMILARITY_THRESHOLD must be within [-1, 1]"));
        }

        if self.rerank.rerank_top_k == 0 {
            return Err(Error::config("RERANK_TOP_K must be at least 1"));
        }
        if self.rerank.diversity_threshold < 0.0 {
            return Err(Error::config("DIVERSITY_THRESHOLD must be non-negative"));
        }
        if self.generation.max_context_length < c.max_chunk_size {
            return Err(Error::config(format!(
                "MAX_CONTEXT_LENGTH ({}) must fit at least one chunk of MAX_CHUNK_SIZE ({})",
                self.generation.max_context_length, c.max_chunk_size
            )));
        }
        if self.embedding.batch_size == 0 {
            return Err(Error::config("embedding.batch_size must be at least 1"));
        }
        Ok(())
    }
}

fn override_value<T, F>(lookup: &F, key: &str, slot: &mut T) -> Result<()>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|_| Error::config(format!("invalid value for {}: {:?}", key, raw)))?;
    }
    Ok(())
}

/// Text chunking configuration (all sizes in tokens)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Target chunk size
    pub chunk_size: usize,
    /// Tokens reused from the end of the previous chunk
    pub chunk_overlap: usize,
    /// Chunks below this are merged into their neighbor
    pub min_chunk_size: usize,
    /// Hard upper bound for a chunk
    pub max_chunk_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 150,
            min_chunk_size: 800,
            max_chunk_size: 1200,
        }
    }
}

/// Hybrid retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Candidates returned by fusion
    pub top_k: usize,
    /// Each index is asked for `top_k * overfetch_factor` hits
    pub overfetch_factor: usize,
    /// Minimum cosine similarity for a candidate to survive fusion
    pub similarity_threshold: f32,
    pub vector_weight: f32,
    pub bm25_weight: f32,
    /// Per sub-search timeout in milliseconds
    pub search_timeout_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            overfetch_factor: 2,
            similarity_threshold: 0.2,
            vector_weight: 0.7,
            bm25_weight: 0.3,
            search_timeout_ms: 2_000,
        }
    }
}

impl RetrievalConfig {
    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }
}

/// Retry and timeout policy for one provider role
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Backoff before retry `n` is `base_delay_ms * 2^n`
    pub base_delay_ms: u64,
    /// Upper bound for a single backoff
    pub max_delay_ms: u64,
    /// Timeout for a single attempt
    pub timeout_ms: u64,
}

impl RetryConfig {
    pub fn with_timeout(timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            ..Self::default()
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            timeout_ms: 10_000,
        }
    }
}

/// Reranking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    /// Results kept after reranking
    pub rerank_top_k: usize,
    /// MMR redundancy penalty; 0 disables the diversity pass
    pub diversity_threshold: f32,
    pub retry: RetryConfig,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            rerank_top_k: 5,
            diversity_threshold: 0.3,
            retry: RetryConfig::with_timeout(2_000),
        }
    }
}

/// Answer generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Token budget for the assembled context
    pub max_context_length: usize,
    /// Characters kept in a citation snippet
    pub snippet_length: usize,
    /// Maximum citations attached to one answer
    pub max_citations: usize,
    /// Cost estimate per 1K tokens reported in query stats
    pub cost_per_1k_tokens: f64,
    pub retry: RetryConfig,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_context_length: 4000,
            snippet_length: 300,
            max_citations: 10,
            cost_per_1k_tokens: 0.01,
            retry: RetryConfig::with_timeout(10_000),
        }
    }
}

/// Embedding gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Which provider to use as primary
    pub provider: EmbeddingBackend,
    /// Upper bound on texts per provider request
    pub batch_size: usize,
    /// Batches in flight at once
    pub concurrent_batches: usize,
    /// Dimensions for the offline hashing embedder
    pub hashing_dimensions: usize,
    pub retry: RetryConfig,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingBackend::Ollama,
            batch_size: 32,
            concurrent_batches: 2,
            hashing_dimensions: 384,
            retry: RetryConfig::default(),
        }
    }
}

/// Embedding backend selection
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Local Ollama server
    #[default]
    Ollama,
    /// OpenAI-compatible HTTP API
    OpenAi,
    /// Deterministic feature hashing, no network
    Hashing,
}

/// LLM and embedding endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Ollama base URL
    pub ollama_url: String,
    /// Ollama embedding model
    pub embed_model: String,
    /// Ollama generation model
    pub generate_model: String,
    /// Embedding dimensions reported by the Ollama model
    pub embed_dimensions: usize,
    /// Temperature for generation
    pub temperature: f32,
    /// Fallback OpenAI-compatible endpoint
    pub openai: Option<OpenAiConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".to_string(),
            embed_model: "nomic-embed-text".to_string(),
            generate_model: "llama3.2:3b".to_string(),
            embed_dimensions: 768,
            temperature: 0.2,
            openai: None,
        }
    }
}

/// OpenAI-compatible endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    #[serde(default = "default_openai_url")]
    pub base_url: String,
    /// Name of the environment variable holding the API key
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_openai_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_openai_embed_model")]
    pub embed_model: String,
    #[serde(default = "default_openai_embed_dimensions")]
    pub embed_dimensions: usize,
}

fn default_openai_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_openai_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_openai_embed_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_openai_embed_dimensions() -> usize {
    1536
}

/// Cross-encoder reranker endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankerProviderConfig {
    /// Reranker service, or `none` to rank by fused score
    pub kind: RerankerKind,
    /// Overrides the service's default base URL
    pub base_url: Option<String>,
    /// Overrides the service's default model
    pub model: Option<String>,
    /// Name of the environment variable holding the API key
    pub api_key_env: Option<String>,
}

impl Default for RerankerProviderConfig {
    fn default() -> Self {
        Self {
            kind: RerankerKind::None,
            base_url: None,
            model: None,
            api_key_env: None,
        }
    }
}

/// Supported hosted rerankers sharing the `/rerank` request shape
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RerankerKind {
    #[default]
    None,
    Cohere,
    Jina,
    Voyage,
    Bge,
}

impl RerankerKind {
    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Cohere => Some("https://api.cohere.ai/v1"),
            Self::Jina => Some("https://api.jina.ai/v1"),
            Self::Voyage => Some("https://api.voyageai.com/v1"),
            Self::Bge => Some("http://localhost:8080"),
        }
    }

    pub fn default_model(&self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Cohere => Some("rerank-english-v2.0"),
            Self::Jina => Some("jina-reranker-v1-base-en"),
            Self::Voyage => Some("voyage-rerank-lite-1"),
            Self::Bge => Some("bge-reranker-base"),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Cohere => "cohere",
            Self::Jina => "jina",
            Self::Voyage => "voyage",
            Self::Bge => "bge",
        }
    }
}

/// Answer cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1_000,
            ttl_seconds: 3_600,
        }
    }
}
