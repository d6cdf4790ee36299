//! Knowledge retrieval pipeline
//!
//! Serves the `search_knowledge_base` tool: hybrid semantic + keyword
//! search over a namespaced vector store, cross-encoder rerank with a
//! term-overlap fallback, diversity pruning, and voice-optimized
//! context formatting, with query and embedding caches in front.

pub mod cache;
pub mod embeddings;
pub mod hybrid;
pub mod pipeline;
pub mod query_processor;
pub mod reranker;
pub mod vector_store;
pub mod voice_format;

pub use cache::{EmbeddingCache, QueryCache};
pub use embeddings::{Embedder, HashEmbedder, HttpEmbedder};
pub use pipeline::{RetrievalPipeline, SearchRequest};
pub use query_processor::{QueryIntent, QueryProcessor};
pub use reranker::{RelevanceModel, Reranker};
pub use vector_store::{
    ChunkMetadata, InMemoryVectorStore, MetadataFilter, ScoredChunk, VectorRecord, VectorStore,
};
pub use voice_format::VoiceFormatter;
