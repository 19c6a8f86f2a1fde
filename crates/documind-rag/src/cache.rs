//! Answer caching with document-based invalidation
//!
//! Answers are keyed by the normalized question and the document they were
//! answered from, and dropped when that document is deleted.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::config::CacheConfig;
use crate::types::Answer;

#[derive(Debug, Clone)]
struct CachedAnswer {
    answer: Answer,
    cached_at: DateTime<Utc>,
    hit_count: u32,
}

/// Answer cache with document-based invalidation
pub struct AnswerCache {
    /// Entries keyed by question hash
    cache: RwLock<HashMap<String, CachedAnswer>>,
    /// Reverse index: document id -> keys answered from it
    doc_to_keys: RwLock<HashMap<Uuid, HashSet<String>>>,
    max_entries: usize,
    ttl_seconds: u64,
}

impl AnswerCache {
    pub fn new(max_entries: usize, ttl_seconds: u64) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            doc_to_keys: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
            ttl_seconds,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_entries, config.ttl_seconds)
    }

    /// Cache key: SHA-256 over the document id and the normalized question
    pub fn cache_key(document_id: &Uuid, question: &str) -> String {
        let normalized = question
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        let mut hasher = Sha256::new();
        hasher.update(document_id.as_bytes());
        hasher.update(normalized.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Cached answer if present and within TTL
    pub fn get(&self, document_id: &Uuid, question: &str) -> Option<Answer> {
        let key = Self::cache_key(document_id, question);
        {
            let mut cache = self.cache.write();
            let entry = cache.get_mut(&key)?;
            let age = Utc::now().signed_duration_since(entry.cached_at);
            if age <= Duration::seconds(self.ttl_seconds as i64) {
                entry.hit_count += 1;
                tracing::debug!("Cache hit: {} (hits: {})", &key[..12], entry.hit_count);
                return Some(entry.answer.clone());
            }
            tracing::debug!("Cache miss (TTL expired): {}", &key[..12]);
            cache.remove(&key);
        }
        self.forget_key(document_id, &key);
        None
    }

    /// Store an answer, evicting the oldest entry at capacity
    pub fn put(&self, question: &str, answer: Answer) {
        let document_id = answer.document_id;
        let key = Self::cache_key(&document_id, question);
        self.insert(
            key.clone(),
            document_id,
            CachedAnswer {
                answer,
                cached_at: Utc::now(),
                hit_count: 0,
            },
        );
        tracing::debug!("Cached answer: {}", &key[..12]);
    }

    fn insert(&self, key: String, document_id: Uuid, entry: CachedAnswer) {
        let evicted = {
            let mut cache = self.cache.write();
            let mut evicted = None;
            if cache.len() >= self.max_entries && !cache.contains_key(&key) {
                if let Some(oldest_key) = cache
                    .iter()
                    .min_by_key(|(_, v)| v.cached_at)
                    .map(|(k, _)| k.clone())
                {
                    evicted = cache
                        .remove(&oldest_key)
                        .map(|old| (old.answer.document_id, oldest_key));
                }
            }
            cache.insert(key.clone(), entry);
            evicted
        };

        let mut doc_to_keys = self.doc_to_keys.write();
        if let Some((old_document, old_key)) = evicted {
            Self::unlink(&mut doc_to_keys, &old_document, &old_key);
        }
        doc_to_keys.entry(document_id).or_default().insert(key);
    }

    /// Drop `key` from the reverse index once its entry is gone
    fn forget_key(&self, document_id: &Uuid, key: &str) {
        Self::unlink(&mut self.doc_to_keys.write(), document_id, key);
    }

    fn unlink(doc_to_keys: &mut HashMap<Uuid, HashSet<String>>, document_id: &Uuid, key: &str) {
        if let Some(keys) = doc_to_keys.get_mut(document_id) {
            keys.remove(key);
            if keys.is_empty() {
                doc_to_keys.remove(document_id);
            }
        }
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.doc_to_keys.read().values().map(HashSet::len).sum()
    }

    /// Drop every entry answered from `document_id`
    pub fn invalidate_document(&self, document_id: &Uuid) -> usize {
        let keys = match self.doc_to_keys.write().remove(document_id) {
            Some(keys) => keys,
            None => return 0,
        };

        let mut cache = self.cache.write();
        let invalidated = keys.iter().filter(|k| cache.remove(*k).is_some()).count();

        if invalidated > 0 {
            tracing::info!(
                "Invalidated {} cached answers for document {}",
                invalidated,
                document_id
            );
        }
        invalidated
    }

    pub fn clear(&self) {
        self.cache.write().clear();
        self.doc_to_keys.write().clear();
        tracing::info!("Answer cache cleared");
    }

    pub fn stats(&self) -> CacheStats {
        let cache = self.cache.read();
        CacheStats {
            entries: cache.len(),
            total_hits: cache.values().map(|e| e.hit_count).sum(),
            max_entries: self.max_entries,
            ttl_seconds: self.ttl_seconds,
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_hits: u32,
    pub max_entries: usize,
    pub ttl_seconds: u64,
}

impl Default for AnswerCache {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}
