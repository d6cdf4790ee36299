//! TTL caches for the retrieval pipeline
//!
//! Two caches, both keyed by content hash: query results (1 h) and
//! embeddings (7 d). A miss never changes correctness, only latency.

use lru::LruCache;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::vector_store::ScoredChunk;

const QUERY_TTL: Duration = Duration::from_secs(3600);
const EMBEDDING_TTL: Duration = Duration::from_secs(86_400 * 7);
const QUERY_CAPACITY: usize = 1024;
const EMBEDDING_CAPACITY: usize = 8192;

struct TtlCache<V> {
    entries: Mutex<LruCache<String, (Instant, V)>>,
    ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).expect("capacity > 0"),
            )),
            ttl,
        }
    }

    fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock().expect("cache poisoned");
        match entries.get(key) {
            Some((stored_at, value)) if stored_at.elapsed() < self.ttl => Some(value.clone()),
            Some(_) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    fn put(&self, key: String, value: V) {
        let mut entries = self.entries.lock().expect("cache poisoned");
        entries.put(key, (Instant::now(), value));
    }

    fn clear(&self) {
        self.entries.lock().expect("cache poisoned").clear();
    }
}

fn hashed_key(prefix: &str, parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    format!("{prefix}:{}", hex::encode(hasher.finalize()))
}

/// Cache of final reranked result lists, keyed by namespace + query.
pub struct QueryCache {
    inner: TtlCache<Vec<ScoredChunk>>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self {
            inner: TtlCache::new(QUERY_CAPACITY, QUERY_TTL),
        }
    }

    fn key(query: &str, namespace: Option<&str>) -> String {
        hashed_key("kb_query", &[namespace.unwrap_or(""), query])
    }

    pub fn get(&self, query: &str, namespace: Option<&str>) -> Option<Vec<ScoredChunk>> {
        self.inner.get(&Self::key(query, namespace))
    }

    pub fn put(&self, query: &str, namespace: Option<&str>, results: Vec<ScoredChunk>) {
        self.inner.put(Self::key(query, namespace), results);
    }

    /// Bypass-on-write: drop everything after an ingest.
    pub fn invalidate_all(&self) {
        self.inner.clear();
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Cache of embedding vectors, keyed by model + text.
pub struct EmbeddingCache {
    inner: TtlCache<Vec<f32>>,
}

impl EmbeddingCache {
    pub fn new() -> Self {
        Self {
            inner: TtlCache::new(EMBEDDING_CAPACITY, EMBEDDING_TTL),
        }
    }

    fn key(model: &str, text: &str) -> String {
        hashed_key("kb_embedding", &[model, text])
    }

    pub fn get(&self, model: &str, text: &str) -> Option<Vec<f32>> {
        self.inner.get(&Self::key(model, text))
    }

    pub fn put(&self, model: &str, text: &str, embedding: Vec<f32>) {
        self.inner.put(Self::key(model, text), embedding);
    }
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::new()
    }
}
