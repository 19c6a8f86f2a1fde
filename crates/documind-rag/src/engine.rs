//! The RAG engine: document ingestion and cited question answering
//!
//! `RagEngine` owns the indexes and composes the pipeline stages:
//! normalize → chunk → embed → index on ingest, and
//! embed → retrieve → rerank → generate → cite on query.

use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::cache::{AnswerCache, CacheStats};
use crate::config::{EmbeddingBackend, RagConfig};
use crate::embedding::EmbeddingGateway;
use crate::error::{Error, IngestError, QueryError, QueryStage, Result};
use crate::generation::AnswerComposer;
use crate::ingestion::{count_tokens, normalize_text, ChunkStats, Chunker, ChunkingError};
use crate::providers::{
    EmbeddingProvider, HashingEmbedder, HttpReranker, LlmProvider, OllamaClient, OllamaEmbedder,
    OllamaLlm, OpenAiClient, OpenAiEmbedder, OpenAiLlm, RerankProvider, VectorMetadata,
    VectorStoreProvider,
};
use crate::ranking::Reranker;
use crate::retrieval::{FusionRetriever, LexicalIndex, RelevanceGate, VectorIndex};
use crate::store::{ChunkStore, DocumentEntry};
use crate::types::{
    Answer, Chunk, Document, EmbeddingSpace, QueryContext, QueryStats, RetrievalCandidate, StageTimings,
};

/// Capabilities injected into the engine, one set per provider role
pub struct Providers {
    pub embedder: Arc<dyn EmbeddingProvider>,
    /// Secondary embedder, usually with a different dimensionality
    pub embedder_fallback: Option<Arc<dyn EmbeddingProvider>>,
    pub vector_store: Arc<dyn VectorStoreProvider>,
    pub reranker: Option<Arc<dyn RerankProvider>>,
    pub reranker_fallback: Option<Arc<dyn RerankProvider>>,
    pub llm: Arc<dyn LlmProvider>,
    pub llm_fallback: Option<Arc<dyn LlmProvider>>,
}

impl Providers {
    /// Build the providers selected by configuration
    pub fn from_config(config: &RagConfig) -> Result<Self> {
        let provider_err = |e: crate::error::ProviderError| Error::config(e.to_string());

        let ollama = Arc::new(OllamaClient::new(&config.llm).map_err(provider_err)?);
        let ollama_embedder: Arc<dyn EmbeddingProvider> = Arc::new(OllamaEmbedder::from_client(
            Arc::clone(&ollama),
            config.llm.embed_model.clone(),
            config.llm.embed_dimensions,
        ));
        let ollama_llm: Arc<dyn LlmProvider> = Arc::new(OllamaLlm::from_client(
            Arc::clone(&ollama),
            config.llm.generate_model.clone(),
        ));
        let hashing: Arc<dyn EmbeddingProvider> =
            Arc::new(HashingEmbedder::new(config.embedding.hashing_dimensions));

        let openai = match &config.llm.openai {
            Some(openai_config) => match OpenAiClient::new(openai_config) {
                Ok(client) => Some((Arc::new(client), openai_config)),
                Err(e) => {
                    tracing::warn!("OpenAI-compatible provider disabled: {}", e);
                    None
                }
            },
            None => None,
        };
        let openai_embedder = openai.as_ref().map(|(client, c)| {
            Arc::new(OpenAiEmbedder::from_client(
                Arc::clone(client),
                c.embed_model.clone(),
                c.embed_dimensions,
            )) as Arc<dyn EmbeddingProvider>
        });
        let openai_llm = openai.as_ref().map(|(client, c)| {
            Arc::new(OpenAiLlm::from_client(
                Arc::clone(client),
                c.chat_model.clone(),
                config.llm.temperature,
            )) as Arc<dyn LlmProvider>
        });

        let (embedder, embedder_fallback) = match config.embedding.provider {
            EmbeddingBackend::Ollama => (ollama_embedder, Some(openai_embedder.unwrap_or(hashing))),
            EmbeddingBackend::OpenAi => match openai_embedder {
                Some(primary) => (primary, Some(hashing)),
                None => {
                    return Err(Error::config(
                        "embedding provider is openai but [llm.openai] is not configured",
                    ))
                }
            },
            EmbeddingBackend::Hashing => (hashing, None),
        };

        let (llm, llm_fallback) = match (config.embedding.provider, openai_llm) {
            (EmbeddingBackend::OpenAi, Some(primary)) => (primary, Some(ollama_llm)),
            (_, fallback) => (ollama_llm, fallback),
        };

        let reranker = HttpReranker::from_config(&config.reranker_provider)
            .map_err(provider_err)?
            .map(|r| Arc::new(r) as Arc<dyn RerankProvider>);

        Ok(Self {
            embedder,
            embedder_fallback,
            vector_store: Arc::new(VectorIndex::new()),
            reranker,
            reranker_fallback: None,
            llm,
            llm_fallback,
        })
    }
}

/// Summary of a stored document
#[derive(Debug, Clone, Serialize)]
pub struct DocumentInfo {
    pub id: Uuid,
    pub chunk_count: usize,
    pub token_count: usize,
    pub embedding_space: EmbeddingSpace,
    pub ingested_at: chrono::DateTime<chrono::Utc>,
    pub source_metadata: HashMap<String, serde_json::Value>,
}

impl From<&DocumentEntry> for DocumentInfo {
    fn from(entry: &DocumentEntry) -> Self {
        Self {
            id: entry.document.id,
            chunk_count: entry.chunk_ids.len(),
            token_count: entry.document.token_count,
            embedding_space: entry.document.embedding_space.clone(),
            ingested_at: entry.document.ingested_at,
            source_metadata: entry.document.source_metadata.clone(),
        }
    }
}

/// Effective pipeline settings
#[derive(Debug, Clone, Serialize)]
pub struct ConfigSummary {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub similarity_threshold: f32,
    pub vector_weight: f32,
    pub bm25_weight: f32,
    pub rerank_top_k: usize,
    pub diversity_threshold: f32,
    pub max_context_length: usize,
}

/// Engine status
#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    pub config: ConfigSummary,
    pub embedding_providers: Vec<String>,
    pub reranker_providers: Vec<String>,
    pub generation_providers: Vec<String>,
    pub vector_store: String,
    pub document_count: usize,
    pub chunk_count: usize,
    /// Vectors held by the vector store, if it could report them
    pub indexed_vectors: Option<usize>,
    pub cache: Option<CacheStats>,
}

/// Retrieval-augmented answering over ingested documents
pub struct RagEngine {
    config: RagConfig,
    chunker: Chunker,
    embeddings: EmbeddingGateway,
    vector_store: Arc<dyn VectorStoreProvider>,
    lexical: Arc<LexicalIndex>,
    retriever: FusionRetriever,
    reranker: Reranker,
    composer: AnswerComposer,
    store: ChunkStore,
    cache: Option<AnswerCache>,
}

impl RagEngine {
    /// Create an engine from validated configuration and injected providers
    pub fn new(config: RagConfig, providers: Providers) -> Result<Self> {
        config.validate()?;
        let chunker = Chunker::new(config.chunking.clone()).map_err(|e| Error::config(e.to_string()))?;

        let lexical = Arc::new(LexicalIndex::new());
        let retriever = FusionRetriever::new(
            Arc::clone(&providers.vector_store),
            Arc::clone(&lexical),
            config.retrieval.clone(),
        );

        tracing::info!(
            "RAG engine initialized (embedding: {}, vector store: {}, generation: {})",
            providers.embedder.name(),
            providers.vector_store.name(),
            providers.llm.name()
        );

        Ok(Self {
            chunker,
            embeddings: EmbeddingGateway::new(
                providers.embedder,
                providers.embedder_fallback,
                &config.embedding,
            ),
            vector_store: providers.vector_store,
            lexical,
            retriever,
            reranker: Reranker::new(providers.reranker, providers.reranker_fallback, &config.rerank),
            composer: AnswerComposer::new(providers.llm, providers.llm_fallback, &config.generation),
            store: ChunkStore::new(),
            cache: config
                .cache
                .enabled
                .then(|| AnswerCache::from_config(&config.cache)),
            config,
        })
    }

    /// Create an engine with providers selected by configuration
    pub fn from_config(config: RagConfig) -> Result<Self> {
        let providers = Providers::from_config(&config)?;
        Self::new(config, providers)
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Ingest extracted text; returns the number of chunks created
    pub async fn ingest(&self, document_id: Uuid, text: &str) -> std::result::Result<usize, IngestError> {
        self.ingest_with_report(document_id, text, HashMap::new())
            .await
            .map(|stats| stats.total_chunks)
    }

    /// Ingest extracted text with caller metadata, returning chunking statistics.
    ///
    /// The document becomes queryable only after every chunk is in both
    /// indexes. On an indexing failure everything written so far is removed.
    pub async fn ingest_with_report(
        &self,
        document_id: Uuid,
        text: &str,
        source_metadata: HashMap<String, serde_json::Value>,
    ) -> std::result::Result<ChunkStats, IngestError> {
        let writer = self.store.writer(document_id);
        let result = {
            let _guard = writer.lock().await;
            self.ingest_locked(document_id, text, source_metadata).await
        };
        drop(writer);
        self.store.release_writer(&document_id);
        result
    }

    async fn ingest_locked(
        &self,
        document_id: Uuid,
        text: &str,
        source_metadata: HashMap<String, serde_json::Value>,
    ) -> std::result::Result<ChunkStats, IngestError> {
        let started = Instant::now();
        if self.store.contains(&document_id) {
            return Err(IngestError::AlreadyIngested(document_id));
        }

        let normalized = normalize_text(text);
        if normalized.trim().is_empty() {
            return Err(IngestError::EmptyDocument(document_id));
        }

        let mut chunks = self
            .chunker
            .chunk(document_id, &normalized)
            .map_err(|e| match e {
                ChunkingError::NoTokens => IngestError::EmptyDocument(document_id),
                other => IngestError::ChunkingFailed {
                    document_id,
                    reason: other.to_string(),
                },
            })?;
        let document_tokens = count_tokens(&normalized);
        tracing::info!(
            "Chunked document {} into {} chunks ({} tokens)",
            document_id,
            chunks.len(),
            document_tokens
        );

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let batch = self.embeddings.embed(&texts).await?;
        for (index, (chunk, vector)) in chunks.iter_mut().zip(batch.vectors).enumerate() {
            if !batch.empty_inputs.contains(&index) {
                chunk.embedding = Some(vector);
            }
        }
        tracing::info!(
            "Embedded {} chunks with {} ({}d)",
            chunks.len(),
            batch.space.provider,
            batch.space.dimensions
        );

        let stats = ChunkStats::from_chunks(&chunks, document_tokens, self.chunker.config());
        let document = Document {
            id: document_id,
            raw_text: normalized,
            source_metadata,
            token_count: document_tokens,
            embedding_space: batch.space,
            ingested_at: chrono::Utc::now(),
        };
        let staged = self.store.stage(document, chunks);

        let mut upserted = Vec::with_capacity(staged.len());
        for chunk in &staged {
            let Some(vector) = &chunk.embedding else {
                continue;
            };
            let metadata = VectorMetadata {
                document_id,
                sequence_index: chunk.sequence_index,
            };
            if let Err(source) = self
                .vector_store
                .upsert(chunk.id, vector.clone(), metadata)
                .await
            {
                tracing::warn!(
                    "Indexing chunk {} failed, rolling back document {}: {}",
                    chunk.sequence_index,
                    document_id,
                    source
                );
                self.rollback(&document_id, &upserted).await;
                return Err(IngestError::IndexingFailed {
                    document_id,
                    source,
                });
            }
            upserted.push(chunk.id);
        }

        self.lexical
            .publish(document_id, staged.iter().map(|c| (c.id, c.text.as_str())));
        self.store.publish(&document_id);

        tracing::info!(
            "Ingested document {}: {} chunks in {}ms",
            document_id,
            stats.total_chunks,
            started.elapsed().as_millis()
        );
        Ok(stats)
    }

    async fn rollback(&self, document_id: &Uuid, upserted: &[Uuid]) {
        for id in upserted {
            if let Err(e) = self.vector_store.delete(*id).await {
                tracing::warn!("Failed to remove vector {} during rollback: {}", id, e);
            }
        }
        self.lexical.remove_document(document_id);
        self.store.remove(document_id);
    }

    /// Answer a question from one document's content
    pub async fn answer(
        &self,
        document_id: Uuid,
        question: &str,
    ) -> std::result::Result<Answer, QueryError> {
        let generating = AtomicBool::new(false);
        self.run_query(document_id, question, &generating).await
    }

    /// Like `answer`, but abandons the query as soon as `cancel` completes.
    ///
    /// In-flight provider calls are dropped; the error names the stage that
    /// was running.
    pub async fn answer_with_cancel<C>(
        &self,
        document_id: Uuid,
        question: &str,
        cancel: C,
    ) -> std::result::Result<Answer, QueryError>
    where
        C: Future<Output = ()>,
    {
        let generating = AtomicBool::new(false);
        tokio::select! {
            result = self.run_query(document_id, question, &generating) => result,
            _ = cancel => {
                let stage = if generating.load(Ordering::Acquire) {
                    QueryStage::Generation
                } else {
                    QueryStage::Retrieval
                };
                tracing::info!("Query on document {} cancelled during {}", document_id, stage);
                Err(QueryError::Cancelled { stage })
            }
        }
    }

    async fn run_query(
        &self,
        document_id: Uuid,
        question: &str,
        generating: &AtomicBool,
    ) -> std::result::Result<Answer, QueryError> {
        let started = Instant::now();
        let question = question.trim();
        if question.is_empty() {
            return Err(QueryError::EmptyQuestion);
        }
        let entry = self
            .store
            .ready_document(&document_id)
            .ok_or(QueryError::DocumentNotFound(document_id))?;

        tracing::info!("Query on document {}: \"{}\"", document_id, question);

        if let Some(cache) = &self.cache {
            if let Some(mut cached) = cache.get(&document_id, question) {
                cached.stats.cache_hit = true;
                cached.stats.timings = StageTimings {
                    total_ms: started.elapsed().as_millis() as u64,
                    ..StageTimings::default()
                };
                return Ok(cached);
            }
        }

        let mut ctx = QueryContext::new(question);
        let mut timings = StageTimings::default();

        let stage = Instant::now();
        ctx.query_embedding = match self
            .embeddings
            .embed_in_space(&entry.document.embedding_space, question)
            .await
        {
            Ok(vector) => Some(vector),
            Err(e) => {
                tracing::warn!("Query embedding unavailable, using lexical signal only: {}", e);
                None
            }
        };
        timings.embed_ms = stage.elapsed().as_millis() as u64;

        let gate = if self.embeddings.is_lexical_space(&entry.document.embedding_space) {
            RelevanceGate::LexicalMatch
        } else {
            RelevanceGate::VectorThreshold
        };
        let stage = Instant::now();
        let retrieval = self
            .retriever
            .retrieve_gated(
                question,
                ctx.query_embedding.as_deref(),
                document_id,
                self.config.retrieval.top_k,
                gate,
            )
            .await;
        timings.retrieve_ms = stage.elapsed().as_millis() as u64;

        if !retrieval.has_relevant_content() {
            tracing::info!("No relevant content for query on document {}", document_id);
            return Err(QueryError::NoRelevantContent(document_id));
        }
        ctx.candidate_list = retrieval.candidates;

        let candidates: Vec<(RetrievalCandidate, Arc<crate::types::Chunk>)> = ctx
            .candidate_list
            .iter()
            .filter_map(|c| self.store.chunk(&c.chunk_id).map(|chunk| (c.clone(), chunk)))
            .collect();

        let stage = Instant::now();
        let reranked = self.reranker.rerank(question, candidates).await;
        timings.rerank_ms = stage.elapsed().as_millis() as u64;
        if reranked.results.is_empty() {
            return Err(QueryError::NoRelevantContent(document_id));
        }

        generating.store(true, Ordering::Release);
        let stage = Instant::now();
        let composed = self.composer.compose(question, &reranked.results).await?;
        timings.generate_ms = stage.elapsed().as_millis() as u64;
        timings.total_ms = started.elapsed().as_millis() as u64;

        ctx.context_window_text = composed.context_text;
        ctx.answer_text = composed.answer_text;
        ctx.citations = composed.citations;

        let stats = QueryStats {
            timings,
            chunks_retrieved: ctx.candidate_list.len(),
            chunks_reranked: reranked.results.len(),
            context_chunks: composed.context_chunks,
            vector_signal: retrieval.vector_signal,
            rerank_source: reranked.source,
            generation_provider: composed.provider,
            estimated_tokens: composed.estimated_tokens,
            estimated_cost: composed.estimated_tokens as f64 / 1000.0
                * self.config.generation.cost_per_1k_tokens,
            cache_hit: false,
        };

        tracing::info!(
            "Answered query on document {} with {} citations in {}ms",
            document_id,
            ctx.citations.len(),
            stats.timings.total_ms
        );

        let answer = Answer {
            document_id,
            answer_text: ctx.answer_text,
            citations: ctx.citations,
            citation_report: composed.citation_report,
            stats,
        };
        if let Some(cache) = &self.cache {
            cache.put(question, answer.clone());
        }
        Ok(answer)
    }

    /// Remove a document from every index; returns the number of chunks removed
    pub async fn delete_document(&self, document_id: Uuid) -> std::result::Result<usize, QueryError> {
        let writer = self.store.writer(document_id);
        let result = {
            let _guard = writer.lock().await;
            self.delete_locked(document_id).await
        };
        drop(writer);
        self.store.release_writer(&document_id);
        result
    }

    async fn delete_locked(&self, document_id: Uuid) -> std::result::Result<usize, QueryError> {
        let entry = self
            .store
            .remove(&document_id)
            .ok_or(QueryError::DocumentNotFound(document_id))?;

        for id in &entry.chunk_ids {
            if let Err(e) = self.vector_store.delete(*id).await {
                tracing::warn!("Failed to delete vector {}: {}", id, e);
            }
        }
        self.lexical.remove_document(&document_id);
        if let Some(cache) = &self.cache {
            cache.invalidate_document(&document_id);
        }

        tracing::info!("Deleted document {} ({} chunks)", document_id, entry.chunk_ids.len());
        Ok(entry.chunk_ids.len())
    }

    pub fn document_info(&self, document_id: &Uuid) -> Option<DocumentInfo> {
        self.store
            .ready_document(document_id)
            .map(|entry| DocumentInfo::from(&*entry))
    }

    /// Chunks of a queryable document in sequence order
    pub fn document_chunks(&self, document_id: &Uuid) -> Option<Vec<Arc<Chunk>>> {
        let entry = self.store.ready_document(document_id)?;
        Some(
            entry
                .chunk_ids
                .iter()
                .filter_map(|id| self.store.chunk(id))
                .collect(),
        )
    }

    /// Queryable documents, oldest first
    pub fn list_documents(&self) -> Vec<DocumentInfo> {
        self.store
            .documents()
            .iter()
            .map(|entry| DocumentInfo::from(&**entry))
            .collect()
    }

    pub async fn system_info(&self) -> SystemInfo {
        let c = &self.config;
        SystemInfo {
            config: ConfigSummary {
                chunk_size: c.chunking.chunk_size,
                chunk_overlap: c.chunking.chunk_overlap,
                top_k: c.retrieval.top_k,
                similarity_threshold: c.retrieval.similarity_threshold,
                vector_weight: c.retrieval.vector_weight,
                bm25_weight: c.retrieval.bm25_weight,
                rerank_top_k: c.rerank.rerank_top_k,
                diversity_threshold: c.rerank.diversity_threshold,
                max_context_length: c.generation.max_context_length,
            },
            embedding_providers: self.embeddings.provider_names(),
            reranker_providers: self.reranker.provider_names(),
            generation_providers: self.composer.provider_names(),
            vector_store: self.vector_store.name().to_string(),
            document_count: self.store.document_count(),
            chunk_count: self.store.chunk_count(),
            indexed_vectors: self.vector_store.len().await.ok(),
            cache: self.cache.as_ref().map(AnswerCache::stats),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChunkingConfig, RetryConfig};
    use crate::error::{ProviderError, ProviderResult};
    use crate::providers::VectorMatch;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    /// One dimension per topic word; text with none of them embeds to zero
    struct TopicEmbedder;

    #[async_trait]
    impl EmbeddingProvider for TopicEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> ProviderResult<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let t = t.to_lowercase();
                    ["refund", "shipping", "gift", "zebra"]
                        .iter()
                        .map(|word| if t.contains(word) { 1.0 } else { 0.0 })
                        .collect()
                })
                .collect())
        }

        fn dimensions(&self) -> usize {
            4
        }

        fn name(&self) -> &str {
            "topic"
        }
    }

    struct MockLlm {
        reply: Option<&'static str>,
        latency: Duration,
        calls: AtomicU32,
    }

    impl MockLlm {
        fn replying(reply: &'static str) -> Arc<Self> {
            Arc::new(Self {
                reply: Some(reply),
                latency: Duration::ZERO,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for MockLlm {
        async fn generate(&self, _prompt: &str) -> ProviderResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.latency).await;
            self.reply
                .map(str::to_string)
                .ok_or_else(|| ProviderError::unavailable("mock", "offline"))
        }

        fn name(&self) -> &str {
            "mock"
        }

        fn model(&self) -> &str {
            "mock-1"
        }
    }

    /// Vector store that blocks upserts until permits are released
    struct GatedStore {
        inner: VectorIndex,
        gate: Semaphore,
    }

    #[async_trait]
    impl VectorStoreProvider for GatedStore {
        async fn upsert(&self, id: Uuid, vector: Vec<f32>, metadata: VectorMetadata) -> ProviderResult<()> {
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| ProviderError::unavailable("gated", e.to_string()))?;
            permit.forget();
            self.inner.upsert(id, vector, metadata).await
        }

        async fn query(&self, v: &[f32], k: usize, f: Option<Uuid>) -> ProviderResult<Vec<VectorMatch>> {
            self.inner.query(v, k, f).await
        }

        async fn delete(&self, id: Uuid) -> ProviderResult<bool> {
            self.inner.delete(id).await
        }

        async fn len(&self) -> ProviderResult<usize> {
            self.inner.len().await
        }

        fn name(&self) -> &str {
            "gated"
        }
    }

    /// Accepts the first upsert, rejects the rest
    struct FlakyStore {
        inner: VectorIndex,
        accepted: AtomicU32,
    }

    #[async_trait]
    impl VectorStoreProvider for FlakyStore {
        async fn upsert(&self, id: Uuid, vector: Vec<f32>, metadata: VectorMetadata) -> ProviderResult<()> {
            if self.accepted.fetch_add(1, Ordering::SeqCst) > 0 {
                return Err(ProviderError::rejected("flaky", "disk full"));
            }
            self.inner.upsert(id, vector, metadata).await
        }

        async fn query(&self, v: &[f32], k: usize, f: Option<Uuid>) -> ProviderResult<Vec<VectorMatch>> {
            self.inner.query(v, k, f).await
        }

        async fn delete(&self, id: Uuid) -> ProviderResult<bool> {
            self.inner.delete(id).await
        }

        async fn len(&self) -> ProviderResult<usize> {
            self.inner.len().await
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    const POLICY: &str = "Refund requests are accepted within thirty days of purchase. \
        A refund is issued to the original payment method once the item arrives.\n\n\
        Shipping is free for orders over fifty dollars. Standard shipping takes five \
        business days and express shipping takes two.\n\n\
        Gift cards cannot be exchanged for cash and never expire.";

    fn config() -> RagConfig {
        let mut config = RagConfig::default();
        config.chunking = ChunkingConfig {
            chunk_size: 20,
            chunk_overlap: 2,
            min_chunk_size: 10,
            max_chunk_size: 30,
        };
        config.generation.retry = RetryConfig {
            max_retries: 0,
            base_delay_ms: 10,
            max_delay_ms: 10,
            timeout_ms: 5_000,
        };
        config
    }

    fn providers(vector_store: Arc<dyn VectorStoreProvider>, llm: Arc<dyn LlmProvider>) -> Providers {
        Providers {
            embedder: Arc::new(TopicEmbedder),
            embedder_fallback: None,
            vector_store,
            reranker: None,
            reranker_fallback: None,
            llm,
            llm_fallback: None,
        }
    }

    fn engine(llm: Arc<dyn LlmProvider>) -> RagEngine {
        RagEngine::new(config(), providers(Arc::new(VectorIndex::new()), llm)).unwrap()
    }

    #[tokio::test]
    async fn test_ingest_then_answer_with_citations() {
        let llm = MockLlm::replying("Refunds are accepted within thirty days [1].");
        let engine = engine(llm.clone());
        let doc = Uuid::new_v4();

        let stats = engine.ingest_with_report(doc, POLICY, HashMap::new()).await.unwrap();
        assert!(stats.total_chunks >= 2);
        assert!(stats.total_tokens >= stats.document_tokens);

        let answer = engine.answer(doc, "How long do I have to request a refund?").await.unwrap();
        assert_eq!(answer.answer_text, "Refunds are accepted within thirty days [1].");
        assert_eq!(answer.citations.len(), 1);
        assert!(answer.citations[0].snippet.to_lowercase().contains("refund"));
        assert_eq!(answer.stats.generation_provider, "mock");
        assert_eq!(answer.stats.vector_signal, crate::types::SignalStatus::Ok);
        assert!(!answer.stats.cache_hit);

        let info = engine.document_info(&doc).unwrap();
        assert_eq!(info.chunk_count, stats.total_chunks);
        assert_eq!(info.embedding_space.provider, "topic");

        let chunks = engine.document_chunks(&doc).unwrap();
        assert_eq!(chunks.len(), stats.total_chunks);
        assert!(chunks.iter().enumerate().all(|(i, c)| c.sequence_index == i));
        assert!(engine.document_chunks(&Uuid::new_v4()).is_none());
    }

    #[tokio::test]
    async fn test_repeated_question_served_from_cache() {
        let llm = MockLlm::replying("Free over fifty dollars [1].");
        let engine = engine(llm.clone());
        let doc = Uuid::new_v4();
        engine.ingest(doc, POLICY).await.unwrap();

        engine.answer(doc, "Is shipping free?").await.unwrap();
        let second = engine.answer(doc, "is shipping   FREE?").await.unwrap();
        assert!(second.stats.cache_hit);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_relevant_content() {
        let engine = engine(MockLlm::replying("unused"));
        let doc = Uuid::new_v4();
        engine.ingest(doc, POLICY).await.unwrap();

        let err = engine.answer(doc, "What colour is a zebra?").await.unwrap_err();
        assert!(matches!(err, QueryError::NoRelevantContent(id) if id == doc));
        assert_eq!(err.stage(), QueryStage::Retrieval);
    }

    #[tokio::test]
    async fn test_unknown_document_and_empty_question() {
        let engine = engine(MockLlm::replying("unused"));
        let doc = Uuid::new_v4();
        assert!(matches!(
            engine.answer(doc, "anything?").await,
            Err(QueryError::DocumentNotFound(_))
        ));
        engine.ingest(doc, POLICY).await.unwrap();
        assert!(matches!(engine.answer(doc, "   ").await, Err(QueryError::EmptyQuestion)));
    }

    #[tokio::test]
    async fn test_empty_and_duplicate_documents_rejected() {
        let engine = engine(MockLlm::replying("unused"));
        let doc = Uuid::new_v4();
        assert!(matches!(
            engine.ingest(doc, " \r\n\t ").await,
            Err(IngestError::EmptyDocument(_))
        ));
        engine.ingest(doc, POLICY).await.unwrap();
        assert!(matches!(
            engine.ingest(doc, POLICY).await,
            Err(IngestError::AlreadyIngested(_))
        ));
        assert_eq!(engine.store.writer_count(), 0);
    }

    #[tokio::test]
    async fn test_document_invisible_until_fully_indexed() {
        let store = Arc::new(GatedStore {
            inner: VectorIndex::new(),
            gate: Semaphore::new(0),
        });
        let engine = Arc::new(
            RagEngine::new(
                config(),
                providers(store.clone(), MockLlm::replying("Refunds within thirty days [1].")),
            )
            .unwrap(),
        );
        let doc = Uuid::new_v4();

        let ingesting = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.ingest(doc, POLICY).await })
        };

        // let ingestion reach the vector store and block there
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(
            engine.answer(doc, "refund deadline?").await,
            Err(QueryError::DocumentNotFound(_))
        ));
        assert!(engine.list_documents().is_empty());

        store.gate.add_permits(1_000);
        let chunks = ingesting.await.unwrap().unwrap();
        assert!(chunks > 0);
        assert!(engine.answer(doc, "refund deadline?").await.is_ok());
    }

    #[tokio::test]
    async fn test_indexing_failure_rolls_back() {
        let store = Arc::new(FlakyStore {
            inner: VectorIndex::new(),
            accepted: AtomicU32::new(0),
        });
        let engine = RagEngine::new(config(), providers(store.clone(), MockLlm::replying("x"))).unwrap();
        let doc = Uuid::new_v4();

        let err = engine.ingest(doc, POLICY).await.unwrap_err();
        assert!(matches!(err, IngestError::IndexingFailed { .. }));
        assert_eq!(store.inner.count(), 0);
        assert!(engine.document_info(&doc).is_none());
        assert_eq!(engine.system_info().await.chunk_count, 0);
        assert_eq!(engine.store.writer_count(), 0);
    }

    #[tokio::test]
    async fn test_generation_failure_reports_degraded_answer() {
        let llm = Arc::new(MockLlm {
            reply: None,
            latency: Duration::ZERO,
            calls: AtomicU32::new(0),
        });
        let engine = engine(llm);
        let doc = Uuid::new_v4();
        engine.ingest(doc, POLICY).await.unwrap();

        let err = engine.answer(doc, "refund window?").await.unwrap_err();
        assert_eq!(err.stage(), QueryStage::Generation);
        assert!(err.to_string().starts_with("[generation]"));
        assert!(err.degraded_answer().unwrap().snippet.to_lowercase().contains("refund"));
    }

    #[tokio::test]
    async fn test_cancel_during_generation() {
        let llm = Arc::new(MockLlm {
            reply: Some("late"),
            latency: Duration::from_secs(60),
            calls: AtomicU32::new(0),
        });
        let engine = engine(llm);
        let doc = Uuid::new_v4();
        engine.ingest(doc, POLICY).await.unwrap();

        let err = engine
            .answer_with_cancel(doc, "refund window?", tokio::time::sleep(Duration::from_millis(200)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            QueryError::Cancelled {
                stage: QueryStage::Generation
            }
        ));
    }

    #[tokio::test]
    async fn test_delete_document() {
        let engine = engine(MockLlm::replying("Two days [1]."));
        let doc = Uuid::new_v4();
        let keep = Uuid::new_v4();
        let chunks = engine.ingest(doc, POLICY).await.unwrap();
        engine.ingest(keep, POLICY).await.unwrap();
        engine.answer(doc, "express shipping time?").await.unwrap();

        assert_eq!(engine.delete_document(doc).await.unwrap(), chunks);
        assert!(matches!(
            engine.answer(doc, "express shipping time?").await,
            Err(QueryError::DocumentNotFound(_))
        ));
        assert!(matches!(
            engine.delete_document(doc).await,
            Err(QueryError::DocumentNotFound(_))
        ));

        let info = engine.system_info().await;
        assert_eq!(info.document_count, 1);
        assert_eq!(info.indexed_vectors, Some(chunks));
        assert_eq!(info.cache.unwrap().entries, 0);
        assert_eq!(engine.list_documents()[0].id, keep);
        assert_eq!(engine.store.writer_count(), 0);
    }

    /// About 1800 tokens of office procedure with one refund paragraph
    fn handbook() -> String {
        let topics = [
            "warehouse inventory audits",
            "employee parking permits",
            "quarterly budget reviews",
            "laptop equipment loans",
            "conference room bookings",
        ];
        let mut paragraphs: Vec<String> = (0..80)
            .map(|i| {
                let topic = topics[i % topics.len()];
                format!(
                    "Section {} covers {}. Staff should consult the {} guide before filing \
                     paperwork with the office.",
                    i, topic, topic
                )
            })
            .collect();
        paragraphs.insert(
            40,
            "Customers may request a refund within thirty days of purchase by contacting support."
                .to_string(),
        );
        paragraphs.join("\n\n")
    }

    #[tokio::test]
    async fn test_offline_hashing_embeddings_answer_questions() {
        let providers = Providers {
            embedder: Arc::new(HashingEmbedder::new(384)),
            embedder_fallback: None,
            vector_store: Arc::new(VectorIndex::new()),
            reranker: None,
            reranker_fallback: None,
            llm: MockLlm::replying("Within thirty days of purchase [1]."),
            llm_fallback: None,
        };
        let engine = RagEngine::new(RagConfig::default(), providers).unwrap();
        let doc = Uuid::new_v4();

        let stats = engine.ingest_with_report(doc, &handbook(), HashMap::new()).await.unwrap();
        assert!(stats.total_chunks >= 2);
        assert!(stats.avg_tokens >= 800.0);

        let answer = engine.answer(doc, "How do I request a refund?").await.unwrap();
        assert_eq!(answer.citations.len(), 1);
        assert_eq!(answer.stats.vector_signal, crate::types::SignalStatus::Ok);

        let err = engine.answer(doc, "What colour is a zebra?").await.unwrap_err();
        assert!(matches!(err, QueryError::NoRelevantContent(_)));
    }
}
