//! Retrieval over per-document vector and lexical indexes

pub mod fusion;
pub mod lexical;
pub mod vector_index;

pub use fusion::{fuse, min_max_normalize, FusionRetriever, RelevanceGate, RetrievalOutcome};
pub use lexical::{analyze, LexicalIndex, LexicalMatch};
pub use vector_index::{cosine_similarity, VectorIndex};
