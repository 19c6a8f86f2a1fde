//! Core types for the RAG pipeline

pub mod document;
pub mod response;
pub mod retrieval;

pub use document::{CharSpan, Chunk, Document, EmbeddingSpace, SourceContext};
pub use response::{Answer, Citation, CitationReport, QueryContext, QueryStats, StageTimings};
pub use retrieval::{RankedResult, RetrievalCandidate, ScoreSource, SignalStatus};
