//! Token-budgeted text chunking with recursive boundary selection
//!
//! Cuts are placed at paragraph breaks when one lies inside the allowed
//! window, otherwise at sentence ends, otherwise at a fixed token offset.
//! Consecutive chunks share `chunk_overlap` trailing tokens.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::sections::SectionMap;
use super::text::{tokenize, Token};
use crate::config::ChunkingConfig;
use crate::types::{CharSpan, Chunk};

/// Chunking failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkingError {
    #[error("invalid chunking configuration: {0}")]
    InvalidConfig(String),

    #[error("text contains no tokens")]
    NoTokens,
}

/// Strength of the break before a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Boundary {
    Word,
    Sentence,
    Paragraph,
}

/// Summary of a chunking run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkStats {
    pub total_chunks: usize,
    /// Sum of chunk token counts, overlap included
    pub total_tokens: usize,
    pub document_tokens: usize,
    pub avg_tokens: f32,
    /// Chunks above the configured maximum
    pub oversized: usize,
    /// Non-final chunks below the configured minimum
    pub undersized: usize,
}

impl ChunkStats {
    pub fn from_chunks(chunks: &[Chunk], document_tokens: usize, config: &ChunkingConfig) -> Self {
        let total_tokens: usize = chunks.iter().map(|c| c.token_count).sum();
        let last = chunks.len().saturating_sub(1);
        Self {
            total_chunks: chunks.len(),
            total_tokens,
            document_tokens,
            avg_tokens: if chunks.is_empty() {
                0.0
            } else {
                total_tokens as f32 / chunks.len() as f32
            },
            oversized: chunks
                .iter()
                .filter(|c| c.token_count > config.max_chunk_size)
                .count(),
            undersized: chunks
                .iter()
                .filter(|c| c.sequence_index < last && c.token_count < config.min_chunk_size)
                .count(),
        }
    }
}

/// Text chunker driven by a token budget
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    /// Create a chunker, rejecting sizes that cannot make progress
    pub fn new(config: ChunkingConfig) -> Result<Self, ChunkingError> {
        if config.min_chunk_size == 0 {
            return Err(ChunkingError::InvalidConfig(
                "min_chunk_size must be at least 1".into(),
            ));
        }
        if !(config.min_chunk_size <= config.chunk_size
            && config.chunk_size <= config.max_chunk_size)
        {
            return Err(ChunkingError::InvalidConfig(format!(
                "expected min ({}) <= size ({}) <= max ({})",
                config.min_chunk_size, config.chunk_size, config.max_chunk_size
            )));
        }
        if config.chunk_overlap >= config.min_chunk_size {
            return Err(ChunkingError::InvalidConfig(format!(
                "overlap ({}) must be below min_chunk_size ({})",
                config.chunk_overlap, config.min_chunk_size
            )));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Split `text` into ordered chunks for `document_id`
    pub fn chunk(&self, document_id: Uuid, text: &str) -> Result<Vec<Chunk>, ChunkingError> {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return Err(ChunkingError::NoTokens);
        }

        let boundaries = classify_boundaries(text, &tokens);
        let ranges = self.plan_ranges(&boundaries, tokens.len());
        let sections = SectionMap::build(text);

        let mut chunks: Vec<Chunk> = Vec::with_capacity(ranges.len());
        let last = ranges.len() - 1;
        for (index, &(s, e)) in ranges.iter().enumerate() {
            // Spans are widened to cover the whitespace between chunks and at both ends
            let start = match chunks.last() {
                None => 0,
                Some(prev) => tokens[s].start.min(prev.char_span.end),
            };
            let end = if index == last { text.len() } else { tokens[e - 1].end };
            let span = CharSpan { start, end };
            let chunk_text = &text[start..end];

            chunks.push(Chunk {
                id: Chunk::derive_id(document_id, index),
                document_id,
                sequence_index: index,
                text: chunk_text.to_string(),
                token_count: e - s,
                char_span: span,
                embedding: None,
                source_context: sections.context_for(tokens[s].start, chunk_text),
            });
        }

        tracing::debug!(
            "Chunked document {} into {} chunks ({} tokens)",
            document_id,
            chunks.len(),
            tokens.len()
        );
        Ok(chunks)
    }

    /// Token ranges `[start, end)` for every chunk
    fn plan_ranges(&self, boundaries: &[Boundary], n: usize) -> Vec<(usize, usize)> {
        let mut ranges = Vec::new();
        let mut start = 0;
        loop {
            let end = self.choose_end(boundaries, start, n);
            ranges.push((start, end));
            if end == n {
                break;
            }
            start = end - self.config.chunk_overlap;
        }

        // An undersized tail is merged into its predecessor
        if ranges.len() >= 2 {
            let (tail_start, tail_end) = ranges[ranges.len() - 1];
            if tail_end - tail_start < self.config.min_chunk_size {
                ranges.pop();
                if let Some(prev) = ranges.last_mut() {
                    prev.1 = tail_end;
                }
            }
        }
        ranges
    }

    /// End of the chunk starting at token `start`
    fn choose_end(&self, boundaries: &[Boundary], start: usize, n: usize) -> usize {
        let ChunkingConfig {
            chunk_size,
            chunk_overlap,
            min_chunk_size,
            max_chunk_size,
        } = self.config;

        if n - start <= max_chunk_size {
            return n;
        }

        let mut lo = start + min_chunk_size;
        let mut hi = start + max_chunk_size;
        // Leave at least a minimum-size remainder when the window allows it
        let tail_limit = (n + chunk_overlap).saturating_sub(min_chunk_size);
        if tail_limit >= lo {
            hi = hi.min(tail_limit);
        }
        // When two chunks can finish the text, keep the final one within the maximum
        let finish_floor = (n + chunk_overlap).saturating_sub(max_chunk_size);
        if finish_floor > lo && finish_floor <= hi {
            lo = finish_floor;
        }
        let target = (start + chunk_size).clamp(lo, hi);

        for level in [Boundary::Paragraph, Boundary::Sentence] {
            let best = (lo..=hi)
                .filter(|&e| boundaries[e] >= level)
                .min_by_key(|&e| (e.abs_diff(target), e));
            if let Some(end) = best {
                return end;
            }
        }
        target
    }
}

/// Boundary strength before each token; index 0 is unused
fn classify_boundaries(text: &str, tokens: &[Token]) -> Vec<Boundary> {
    let mut boundaries = Vec::with_capacity(tokens.len());
    boundaries.push(Boundary::Paragraph);

    for i in 1..tokens.len() {
        let gap = &text[tokens[i - 1].end..tokens[i].start];
        let boundary = if is_paragraph_gap(gap) {
            Boundary::Paragraph
        } else if !gap.is_empty() && (gap.contains('\n') || ends_sentence(text, tokens, i - 1)) {
            Boundary::Sentence
        } else {
            Boundary::Word
        };
        boundaries.push(boundary);
    }
    boundaries
}

fn is_paragraph_gap(gap: &str) -> bool {
    gap.contains('\u{000C}') || gap.matches('\n').count() >= 2
}

/// Whether the token at `idx` closes a sentence, looking through closing quotes and brackets
fn ends_sentence(text: &str, tokens: &[Token], idx: usize) -> bool {
    let mut i = idx;
    loop {
        let tok = &text[tokens[i].start..tokens[i].end];
        match tok {
            "." | "!" | "?" | "…" => return true,
            "\"" | "'" | ")" | "]" | "”" | "’" if i > 0 => i -= 1,
            _ => return false,
        }
    }
}
