//! Second-pass ranking: cross-encoder scores, fallback ordering and diversity

pub mod mmr;
pub mod reranker;

pub use mmr::{jaccard_similarity, mmr_select};
pub use reranker::{RerankOutcome, Reranker};
