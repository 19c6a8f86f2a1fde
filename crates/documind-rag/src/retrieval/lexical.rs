//! BM25 keyword index partitioned by document
//!
//! Each document's chunks form one partition with its own corpus statistics,
//! scored by the [`bm25`](https://crates.io/crates/bm25) search engine with
//! English stop words and stemming. Partitions are immutable once shared:
//! writers build a new engine off to the side and swap the `Arc`, so readers
//! never observe a half-indexed document.

use bm25::{DefaultTokenizer, Document, Language, SearchEngine, SearchEngineBuilder, Tokenizer};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use uuid::Uuid;

use super::vector_index::by_score_then_id;

fn tokenizer() -> &'static DefaultTokenizer {
    static TOKENIZER: OnceLock<DefaultTokenizer> = OnceLock::new();
    TOKENIZER.get_or_init(|| DefaultTokenizer::new(Language::English))
}

/// Normalized, stemmed, stop-word-filtered terms of `text`
pub fn analyze(text: &str) -> Vec<String> {
    tokenizer().tokenize(text)
}

/// Search hit from the lexical index
#[derive(Debug, Clone, PartialEq)]
pub struct LexicalMatch {
    pub chunk_id: Uuid,
    pub score: f32,
}

struct Bm25Partition {
    /// Source text per chunk, kept so the engine can be rebuilt on change
    texts: BTreeMap<Uuid, String>,
    engine: SearchEngine<Uuid>,
}

impl Bm25Partition {
    fn build(texts: BTreeMap<Uuid, String>) -> Self {
        let documents: Vec<Document<Uuid>> = texts
            .iter()
            .map(|(id, text)| Document {
                id: *id,
                contents: text.clone(),
            })
            .collect();
        let engine = SearchEngineBuilder::<Uuid>::with_documents(Language::English, documents).build();
        Self { texts, engine }
    }

    fn search(&self, query: &str) -> Vec<(f32, Uuid)> {
        // Every scored chunk is requested so ties are cut by id, not engine order
        self.engine
            .search(query, self.texts.len())
            .into_iter()
            .filter(|r| r.score > 0.0)
            .map(|r| (r.score, r.document.id))
            .collect()
    }
}

/// BM25 index over chunk text
#[derive(Default)]
pub struct LexicalIndex {
    partitions: DashMap<Uuid, Arc<Bm25Partition>>,
}

impl LexicalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index one chunk, replacing any previous text for the same id
    pub fn index(&self, document_id: Uuid, chunk_id: Uuid, text: &str) {
        let mut entry = self
            .partitions
            .entry(document_id)
            .or_insert_with(|| Arc::new(Bm25Partition::build(BTreeMap::new())));
        let mut texts = entry.texts.clone();
        texts.insert(chunk_id, text.to_string());
        *entry.value_mut() = Arc::new(Bm25Partition::build(texts));
    }

    /// Build a document's partition off to the side and publish it in one swap
    pub fn publish<'a, I>(&self, document_id: Uuid, chunks: I)
    where
        I: IntoIterator<Item = (Uuid, &'a str)>,
    {
        let texts = chunks
            .into_iter()
            .map(|(id, text)| (id, text.to_string()))
            .collect();
        self.partitions
            .insert(document_id, Arc::new(Bm25Partition::build(texts)));
    }

    /// Drop a document's partition; returns the number of chunks removed
    pub fn remove_document(&self, document_id: &Uuid) -> usize {
        self.partitions
            .remove(document_id)
            .map(|(_, p)| p.texts.len())
            .unwrap_or(0)
    }

    /// Top `k` chunks for `query`, optionally restricted to one document
    pub fn search(&self, query: &str, k: usize, document_filter: Option<Uuid>) -> Vec<LexicalMatch> {
        if k == 0 || analyze(query).is_empty() {
            return Vec::new();
        }

        let partitions: Vec<Arc<Bm25Partition>> = match document_filter {
            Some(id) => self
                .partitions
                .get(&id)
                .map(|p| vec![Arc::clone(p.value())])
                .unwrap_or_default(),
            None => self.partitions.iter().map(|p| Arc::clone(p.value())).collect(),
        };

        let mut ranked: Vec<(f32, Uuid)> = partitions.iter().flat_map(|p| p.search(query)).collect();
        ranked.sort_by(|a, b| by_score_then_id(*a, *b));
        ranked.truncate(k);
        ranked
            .into_iter()
            .map(|(score, chunk_id)| LexicalMatch { chunk_id, score })
            .collect()
    }
}
