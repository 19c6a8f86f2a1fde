//! Document ingestion: text normalization, tokenization and chunking

mod chunker;
mod sections;
pub mod text;

pub use chunker::{ChunkStats, Chunker, ChunkingError};
pub use text::{count_tokens, normalize_text, tokenize, Token};
