//! documind-rag: Retrieval-augmented question answering over documents
//!
//! This crate ingests extracted document text into a hybrid index (cosine
//! vector search plus BM25) and answers questions about a single document
//! with inline `[n]` citations that are verified against the retrieved
//! context. Embedding, vector storage, reranking and generation are
//! pluggable provider traits with retry and fallback.
//!
//! ```no_run
//! use documind_rag::{RagConfig, RagEngine};
//! use uuid::Uuid;
//!
//! # async fn run() -> documind_rag::Result<()> {
//! let engine = RagEngine::from_config(RagConfig::load(None)?)?;
//! let doc = Uuid::new_v4();
//! engine.ingest(doc, "Refunds are issued within 30 days.").await?;
//! let answer = engine.answer(doc, "How long do refunds take?").await?;
//! println!("{}", answer.answer_text);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod generation;
pub mod ingestion;
pub mod providers;
pub mod ranking;
pub mod retrieval;
pub mod store;
pub mod types;

pub use config::RagConfig;
pub use engine::{DocumentInfo, Providers, RagEngine, SystemInfo};
pub use error::{EmbeddingError, Error, IngestError, ProviderError, QueryError, QueryStage, Result};
pub use ingestion::ChunkStats;
pub use types::{Answer, Chunk, Citation, Document, QueryStats};
