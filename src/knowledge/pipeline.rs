//! End-to-end retrieval pipeline
//!
//! Query processing → dense similarity (namespace-scoped) → hybrid
//! keyword blend → cross-encoder rerank → diversity prune → score
//! normalisation, with an optional voice-formatting stage for results
//! read aloud in a live call. Query results and embeddings are cached;
//! a cache miss never changes the outcome, only latency.

use std::sync::Arc;
use tracing::debug;

use super::cache::QueryCache;
use super::embeddings::Embedder;
use super::hybrid::HybridScorer;
use super::query_processor::QueryProcessor;
use super::reranker::{RelevanceModel, Reranker};
use super::vector_store::{ChunkMetadata, MetadataFilter, ScoredChunk, VectorRecord, VectorStore};
use super::voice_format::VoiceFormatter;
use crate::config::KnowledgeConfig;
use crate::error::Result;

/// One retrieval request.
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub query: String,
    /// Tenant namespace, typically the business id.
    pub namespace: Option<String>,
    pub top_k: Option<usize>,
    pub category: Option<String>,
    pub vendor: Option<String>,
    pub doc_type: Option<String>,
    pub bypass_cache: bool,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }
}

/// A citation entry for source attribution.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Citation {
    pub id: String,
    pub title: String,
    pub source: String,
    pub score: f32,
}

pub struct RetrievalPipeline {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    hybrid: HybridScorer,
    reranker: Reranker,
    relevance: Option<Arc<RelevanceModel>>,
    voice: VoiceFormatter,
    query_cache: QueryCache,
    config: KnowledgeConfig,
}

impl RetrievalPipeline {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        relevance: Option<Arc<RelevanceModel>>,
        config: KnowledgeConfig,
    ) -> Self {
        let reranker_model = if config.cross_encoder {
            relevance.clone()
        } else {
            None
        };
        Self {
            store,
            embedder,
            hybrid: HybridScorer::new(config.semantic_weight, config.keyword_weight),
            reranker: Reranker::new(reranker_model),
            relevance,
            voice: VoiceFormatter::default(),
            query_cache: QueryCache::new(),
            config,
        }
    }

    /// Embed and upsert chunks, then drop the query cache so stale
    /// result lists cannot be served after a write.
    pub async fn ingest(
        &self,
        chunks: Vec<(String, ChunkMetadata)>,
        namespace: Option<&str>,
    ) -> Result<()> {
        let mut records = Vec::with_capacity(chunks.len());
        for (id, metadata) in chunks {
            let vector = self.embedder.embed(&metadata.content).await?;
            records.push(VectorRecord {
                id,
                vector,
                metadata,
            });
        }
        self.store.upsert(records, namespace).await?;
        self.query_cache.invalidate_all();
        Ok(())
    }

    /// Full retrieval. Returns the final reranked, normalised set.
    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<ScoredChunk>> {
        let namespace = request.namespace.as_deref();
        let top_k = request.top_k.unwrap_or(self.config.top_k);

        if self.config.cache_enabled && !request.bypass_cache {
            if let Some(cached) = self.query_cache.get(&request.query, namespace) {
                debug!(query = %request.query, "query cache hit");
                return Ok(cached);
            }
        }

        let processed = QueryProcessor::process(&request.query);
        let retrieval_query = if self.config.query_rewrite {
            match &self.relevance {
                Some(model) => model.rewrite_query(&processed.processed).await,
                None => processed.processed.clone(),
            }
        } else {
            processed.processed.clone()
        };

        let query_vector = self.embedder.embed(&retrieval_query).await?;
        let filter = build_filter(request, true);
        let mut candidates = self
            .store
            .query(&query_vector, top_k * 2, namespace, filter.as_ref())
            .await?;
        candidates.retain(|c| c.score >= self.config.similarity_threshold);

        // Vendor fallback: no hits under the vendor filter means the
        // filter is dropped and vendor matches are re-prioritised.
        if candidates.is_empty() && request.vendor.is_some() {
            debug!(vendor = ?request.vendor, "no vendor-scoped results, dropping vendor filter");
            let relaxed = build_filter(request, false);
            let broad = self
                .store
                .query(&query_vector, top_k * 2, namespace, relaxed.as_ref())
                .await?;
            let vendor = request.vendor.as_deref();
            let (preferred, rest): (Vec<_>, Vec<_>) = broad
                .into_iter()
                .partition(|c| c.metadata.vendor.as_deref() == vendor);
            candidates = preferred.into_iter().chain(rest).collect();
            candidates.truncate(top_k * 2);
        }

        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        self.hybrid.combine(&mut candidates, &processed.keywords);
        let results = self
            .reranker
            .rerank(
                &request.query,
                candidates,
                top_k,
                self.config.diversity_threshold,
            )
            .await;

        if self.config.cache_enabled {
            self.query_cache
                .put(&request.query, namespace, results.clone());
        }
        Ok(results)
    }

    /// Retrieval followed by voice formatting, for results spoken in a
    /// live call.
    pub async fn search_for_voice(&self, request: &SearchRequest) -> Result<String> {
        let results = self.search(request).await?;
        Ok(self.voice.format_for_voice(&results))
    }

    /// Format retrieved documents into a bounded context block with
    /// citation markers.
    pub fn format_context(
        &self,
        docs: &[ScoredChunk],
        max_length: usize,
    ) -> (String, Vec<Citation>) {
        let mut parts = Vec::new();
        let mut citations = Vec::new();
        let mut total = 0usize;

        for (i, doc) in docs.iter().enumerate() {
            let title = doc
                .metadata
                .title
                .clone()
                .unwrap_or_else(|| "Unknown".to_string());
            let marker = format!("[{}]", i + 1);
            let formatted = format!("{marker} [{title}]\n{}\n\n", doc.metadata.content);
            if total + formatted.len() > max_length {
                break;
            }
            total += formatted.len();
            parts.push(formatted);
            citations.push(Citation {
                id: marker,
                title,
                source: doc.metadata.source.clone().unwrap_or_default(),
                score: doc.score,
            });
        }

        (parts.join("").trim_end().to_string(), citations)
    }

    pub fn voice_formatter(&self) -> &VoiceFormatter {
        &self.voice
    }
}

fn build_filter(request: &SearchRequest, include_vendor: bool) -> Option<MetadataFilter> {
    let mut filter = MetadataFilter::new();
    if let Some(ref category) = request.category {
        filter.insert("category".to_string(), category.clone());
    }
    if include_vendor {
        if let Some(ref vendor) = request.vendor {
            filter.insert("vendor".to_string(), vendor.clone());
        }
    }
    if let Some(ref doc_type) = request.doc_type {
        filter.insert("doc_type".to_string(), doc_type.clone());
    }
    if filter.is_empty() {
        None
    } else {
        Some(filter)
    }
}
