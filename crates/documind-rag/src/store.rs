//! Chunk arena and document registry
//!
//! Chunks are stored by id and never mutated after insertion. A document
//! becomes visible to queries only when its ready flag is set, which happens
//! after every index holds its chunks.

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::types::{Chunk, Document};

/// Registry entry for one document
#[derive(Debug)]
pub struct DocumentEntry {
    pub document: Document,
    /// In sequence order
    pub chunk_ids: Vec<Uuid>,
    ready: AtomicBool,
}

impl DocumentEntry {
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

#[derive(Default)]
pub struct ChunkStore {
    chunks: DashMap<Uuid, Arc<Chunk>>,
    documents: DashMap<Uuid, Arc<DocumentEntry>>,
    /// Serializes ingestion and deletion per document
    writers: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl ChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writer lock for a document
    pub fn writer(&self, document_id: Uuid) -> Arc<Mutex<()>> {
        Arc::clone(self.writers.entry(document_id).or_default().value())
    }

    /// Drop the writer lock entry once no task holds or waits on it
    ///
    /// Callers release their own guard and handle first.
    pub fn release_writer(&self, document_id: &Uuid) {
        self.writers
            .remove_if(document_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    #[cfg(test)]
    pub(crate) fn writer_count(&self) -> usize {
        self.writers.len()
    }

    /// Whether the document is registered, ready or not
    pub fn contains(&self, document_id: &Uuid) -> bool {
        self.documents.contains_key(document_id)
    }

    /// Add a document's chunks to the arena without making the document queryable
    pub fn stage(&self, document: Document, chunks: Vec<Chunk>) -> Vec<Arc<Chunk>> {
        let chunks: Vec<Arc<Chunk>> = chunks.into_iter().map(Arc::new).collect();
        for chunk in &chunks {
            self.chunks.insert(chunk.id, Arc::clone(chunk));
        }
        self.documents.insert(
            document.id,
            Arc::new(DocumentEntry {
                chunk_ids: chunks.iter().map(|c| c.id).collect(),
                document,
                ready: AtomicBool::new(false),
            }),
        );
        chunks
    }

    /// Flip the ready flag; returns false if the document is not staged
    pub fn publish(&self, document_id: &Uuid) -> bool {
        match self.documents.get(document_id) {
            Some(entry) => {
                entry.ready.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Remove a document and its chunks, ready or not
    pub fn remove(&self, document_id: &Uuid) -> Option<Arc<DocumentEntry>> {
        let (_, entry) = self.documents.remove(document_id)?;
        for id in &entry.chunk_ids {
            self.chunks.remove(id);
        }
        Some(entry)
    }

    /// Registry entry of a queryable document
    pub fn ready_document(&self, document_id: &Uuid) -> Option<Arc<DocumentEntry>> {
        self.documents
            .get(document_id)
            .filter(|e| e.is_ready())
            .map(|e| Arc::clone(e.value()))
    }

    pub fn chunk(&self, chunk_id: &Uuid) -> Option<Arc<Chunk>> {
        self.chunks.get(chunk_id).map(|c| Arc::clone(c.value()))
    }

    /// Queryable documents, oldest first
    pub fn documents(&self) -> Vec<Arc<DocumentEntry>> {
        let mut docs: Vec<Arc<DocumentEntry>> = self
            .documents
            .iter()
            .filter(|e| e.is_ready())
            .map(|e| Arc::clone(e.value()))
            .collect();
        docs.sort_by(|a, b| {
            a.document
                .ingested_at
                .cmp(&b.document.ingested_at)
                .then_with(|| a.document.id.cmp(&b.document.id))
        });
        docs
    }

    pub fn document_count(&self) -> usize {
        self.documents.iter().filter(|e| e.is_ready()).count()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CharSpan, EmbeddingSpace, SourceContext};
    use chrono::Utc;
    use std::collections::HashMap;

    fn document(id: Uuid) -> Document {
        Document {
            id,
            raw_text: "text".to_string(),
            source_metadata: HashMap::new(),
            token_count: 1,
            embedding_space: EmbeddingSpace {
                provider: "mock".to_string(),
                dimensions: 2,
            },
            ingested_at: Utc::now(),
        }
    }

    fn chunk(document_id: Uuid, index: usize) -> Chunk {
        Chunk {
            id: Chunk::derive_id(document_id, index),
            document_id,
            sequence_index: index,
            text: "text".to_string(),
            token_count: 1,
            char_span: CharSpan { start: 0, end: 4 },
            embedding: None,
            source_context: SourceContext::default(),
        }
    }

    #[test]
    fn test_staged_document_invisible_until_published() {
        let store = ChunkStore::new();
        let doc = Uuid::new_v4();
        store.stage(document(doc), vec![chunk(doc, 0), chunk(doc, 1)]);

        assert!(store.contains(&doc));
        assert!(store.ready_document(&doc).is_none());
        assert_eq!(store.document_count(), 0);

        assert!(store.publish(&doc));
        let entry = store.ready_document(&doc).unwrap();
        assert_eq!(entry.chunk_ids.len(), 2);
        assert!(store.chunk(&entry.chunk_ids[1]).is_some());
        assert_eq!(store.documents().len(), 1);
    }

    #[test]
    fn test_remove_drops_chunks() {
        let store = ChunkStore::new();
        let doc = Uuid::new_v4();
        store.stage(document(doc), vec![chunk(doc, 0)]);
        store.publish(&doc);

        let removed = store.remove(&doc).unwrap();
        assert_eq!(removed.chunk_ids.len(), 1);
        assert_eq!(store.chunk_count(), 0);
        assert!(!store.contains(&doc));
        assert!(!store.publish(&doc));
    }

    #[tokio::test]
    async fn test_writer_lock_is_per_document() {
        let store = ChunkStore::new();
        let a = Uuid::new_v4();
        let lock = store.writer(a);
        let _held = lock.lock().await;
        assert!(store.writer(a).try_lock().is_err());
        assert!(store.writer(Uuid::new_v4()).try_lock().is_ok());
    }

    #[tokio::test]
    async fn test_released_writers_do_not_accumulate() {
        let store = ChunkStore::new();
        let doc = Uuid::new_v4();
        let lock = store.writer(doc);
        let waiter = store.writer(doc);

        // Still shared with another handle, so the entry stays
        drop(lock);
        store.release_writer(&doc);
        assert_eq!(store.writer_count(), 1);

        drop(waiter);
        store.release_writer(&doc);
        assert_eq!(store.writer_count(), 0);

        for _ in 0..100 {
            let id = Uuid::new_v4();
            {
                let writer = store.writer(id);
                let _guard = writer.lock().await;
            }
            store.release_writer(&id);
        }
        assert_eq!(store.writer_count(), 0);
    }
}
