//! Embedding gateway: batching, retry and provider fallback

mod gateway;

pub use gateway::{EmbeddingBatch, EmbeddingGateway};
