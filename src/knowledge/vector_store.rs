//! Vector store abstraction
//!
//! The pipeline only depends on this trait; the engine behind it is an
//! external collaborator. Chunks come back opaque apart from `score`
//! and `metadata`. Namespaces partition tenants (one per business id).
//!
//! `InMemoryVectorStore` is the bundled implementation: cosine
//! similarity over a per-namespace list, good enough for tests and
//! small single-process deployments.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::Result;

/// Metadata carried by a knowledge chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub business_id: Option<String>,
    #[serde(default)]
    pub chunk_index: Option<u32>,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub doc_type: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

/// A stored vector with its metadata.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: ChunkMetadata,
}

/// A chunk returned from a similarity query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredChunk {
    pub id: String,
    pub score: f32,
    pub metadata: ChunkMetadata,
}

/// Exact-match metadata filter (`vendor`, `doc_type`, `category`).
pub type MetadataFilter = HashMap<String, String>;

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, records: Vec<VectorRecord>, namespace: Option<&str>) -> Result<()>;

    /// Cosine-similarity query, highest score first.
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        namespace: Option<&str>,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredChunk>>;

    async fn delete(&self, ids: &[String], namespace: Option<&str>) -> Result<()>;
}

/// Cosine similarity of two vectors; 0.0 when either has no magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

fn matches_filter(metadata: &ChunkMetadata, filter: &MetadataFilter) -> bool {
    for (key, expected) in filter {
        let actual = match key.as_str() {
            "vendor" => metadata.vendor.as_deref(),
            "doc_type" => metadata.doc_type.as_deref(),
            "category" => metadata.category.as_deref(),
            "title" => metadata.title.as_deref(),
            "business_id" => metadata.business_id.as_deref(),
            _ => None,
        };
        if actual != Some(expected.as_str()) {
            return false;
        }
    }
    true
}

/// Process-local vector store.
pub struct InMemoryVectorStore {
    namespaces: RwLock<HashMap<String, Vec<VectorRecord>>>,
}

const DEFAULT_NAMESPACE: &str = "";

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            namespaces: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, records: Vec<VectorRecord>, namespace: Option<&str>) -> Result<()> {
        let mut namespaces = self.namespaces.write().await;
        let bucket = namespaces
            .entry(namespace.unwrap_or(DEFAULT_NAMESPACE).to_string())
            .or_default();
        for record in records {
            bucket.retain(|existing| existing.id != record.id);
            bucket.push(record);
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        namespace: Option<&str>,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredChunk>> {
        let namespaces = self.namespaces.read().await;
        let Some(bucket) = namespaces.get(namespace.unwrap_or(DEFAULT_NAMESPACE)) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<ScoredChunk> = bucket
            .iter()
            .filter(|record| filter.map_or(true, |f| matches_filter(&record.metadata, f)))
            .map(|record| ScoredChunk {
                id: record.id.clone(),
                score: cosine_similarity(vector, &record.vector),
                metadata: record.metadata.clone(),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn delete(&self, ids: &[String], namespace: Option<&str>) -> Result<()> {
        let mut namespaces = self.namespaces.write().await;
        if let Some(bucket) = namespaces.get_mut(namespace.unwrap_or(DEFAULT_NAMESPACE)) {
            bucket.retain(|record| !ids.contains(&record.id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, vector: Vec<f32>, vendor: Option<&str>) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            vector,
            metadata: ChunkMetadata {
                content: format!("content of {id}"),
                vendor: vendor.map(str::to_string),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn test_query_ranks_by_similarity() {
        let store = InMemoryVectorStore::new();
        store
            .upsert(
                vec![
                    record("near", vec![1.0, 0.0], None),
                    record("far", vec![0.0, 1.0], None),
                    record("mid", vec![0.7, 0.7], None),
                ],
                Some("acme"),
            )
            .await
            .unwrap();

        let results = store
            .query(&[1.0, 0.0], 2, Some("acme"), None)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "near");
        assert_eq!(results[1].id, "mid");
    }

    #[tokio::test]
    async fn test_namespace_isolation() {
        let store = InMemoryVectorStore::new();
        store
            .upsert(vec![record("a", vec![1.0], None)], Some("tenant-a"))
            .await
            .unwrap();
        let results = store.query(&[1.0], 5, Some("tenant-b"), None).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_vendor_filter() {
        let store = InMemoryVectorStore::new();
        store
            .upsert(
                vec![
                    record("o1", vec![1.0, 0.0], Some("openai")),
                    record("t1", vec![1.0, 0.0], Some("twilio")),
                ],
                None,
            )
            .await
            .unwrap();

        let mut filter = MetadataFilter::new();
        filter.insert("vendor".to_string(), "openai".to_string());
        let results = store.query(&[1.0, 0.0], 5, None, Some(&filter)).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "o1");
    }

    #[tokio::test]
    async fn test_upsert_replaces_and_delete_removes() {
        let store = InMemoryVectorStore::new();
        store.upsert(vec![record("a", vec![1.0], None)], None).await.unwrap();
        store.upsert(vec![record("a", vec![0.5], None)], None).await.unwrap();
        let results = store.query(&[1.0], 5, None, None).await.unwrap();
        assert_eq!(results.len(), 1);

        store.delete(&["a".to_string()], None).await.unwrap();
        let results = store.query(&[1.0], 5, None, None).await.unwrap();
        assert!(results.is_empty());
    }
}
