//! Provider abstractions for embeddings, vector storage, reranking and generation
//!
//! The pipeline only talks to these traits; concrete backends are chosen by
//! configuration and injected into the engine.

pub mod embedding;
pub mod hashing;
pub mod http_reranker;
pub mod llm;
pub mod ollama;
pub mod openai;
pub mod reranker;
pub mod retry;
pub mod vector_store;

pub use embedding::EmbeddingProvider;
pub use hashing::HashingEmbedder;
pub use http_reranker::HttpReranker;
pub use llm::LlmProvider;
pub use ollama::{OllamaClient, OllamaEmbedder, OllamaLlm};
pub use openai::{OpenAiClient, OpenAiEmbedder, OpenAiLlm};
pub use reranker::RerankProvider;
pub use retry::RetryPolicy;
pub use vector_store::{VectorMatch, VectorMetadata, VectorStoreProvider};
