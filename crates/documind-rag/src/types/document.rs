//! Document and chunk types with source tracking for citations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// An ingested document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Caller-supplied identifier
    pub id: Uuid,
    /// Normalized text; chunk spans index into this string
    pub raw_text: String,
    /// Free-form metadata supplied by the extraction layer
    #[serde(default)]
    pub source_metadata: HashMap<String, serde_json::Value>,
    /// Token count of `raw_text`
    pub token_count: usize,
    /// Provider that embedded this document's chunks
    pub embedding_space: EmbeddingSpace,
    /// When ingestion completed
    pub ingested_at: DateTime<Utc>,
}

/// The vector space a set of embeddings lives in.
///
/// Vectors from different spaces are never compared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmbeddingSpace {
    pub provider: String,
    pub dimensions: usize,
}

/// Half-open byte range into the normalized document text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharSpan {
    pub start: usize,
    pub end: usize,
}

impl CharSpan {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Where in the document a chunk came from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceContext {
    /// Nearest heading at or before the chunk start
    pub section: Option<String>,
    /// 1-based page, when the text carries form-feed page breaks
    pub page: Option<u32>,
}

/// A bounded span of document text used as the unit of retrieval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Derived from `(document_id, sequence_index)`
    pub id: Uuid,
    pub document_id: Uuid,
    /// 0-based position within the document
    pub sequence_index: usize,
    pub text: String,
    pub token_count: usize,
    pub char_span: CharSpan,
    /// Set once the embedding gateway has produced a vector
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub source_context: SourceContext,
}

impl Chunk {
    /// Deterministic chunk id
    pub fn derive_id(document_id: Uuid, sequence_index: usize) -> Uuid {
        Uuid::new_v5(&document_id, sequence_index.to_string().as_bytes())
    }

    /// Short human-readable source reference
    pub fn source_ref(&self) -> String {
        let mut parts = vec![format!("chunk {}", self.sequence_index + 1)];
        if let Some(page) = self.source_context.page {
            parts.push(format!("page {}", page));
        }
        if let Some(section) = &self.source_context.section {
            parts.push(format!("section: {}", section));
        }
        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_ids_are_deterministic() {
        let doc = Uuid::new_v4();
        assert_eq!(Chunk::derive_id(doc, 3), Chunk::derive_id(doc, 3));
        assert_ne!(Chunk::derive_id(doc, 3), Chunk::derive_id(doc, 4));
        assert_ne!(Chunk::derive_id(doc, 0), Chunk::derive_id(Uuid::new_v4(), 0));
    }
}
