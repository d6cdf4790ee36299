//! Reranking: cross-encoder relevance with a term-overlap fallback,
//! deduplication, Jaccard diversity pruning, and score normalisation.
//!
//! The cross-encoder is an external scorer behind a single call; it
//! never blocks the hot path, any failure falls back to term overlap.

use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::hybrid::tokenize;
use super::vector_store::ScoredChunk;
use crate::error::{BridgeError, Result};

/// Weight of the cross-encoder score in the blended relevance score.
const CROSS_WEIGHT: f32 = 0.6;
const ORIGINAL_WEIGHT: f32 = 0.4;

/// Content fed to the scorer is truncated to keep the call cheap.
const MAX_SCORED_CONTENT: usize = 500;

/// Single-call LLM utility shared by the cross-encoder scorer and the
/// optional retrieval rewrite. Both are advisory: failures degrade,
/// never propagate.
pub struct RelevanceModel {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl RelevanceModel {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(8))
                .build()
                .unwrap_or_default(),
            api_base: "https://api.openai.com/v1".to_string(),
            api_key,
            model,
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    async fn complete(&self, system: &str, user: &str, max_tokens: u32) -> Result<String> {
        let response = self
            .http
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "messages": [
                    {"role": "system", "content": system},
                    {"role": "user", "content": user},
                ],
                "temperature": 0.1,
                "max_tokens": max_tokens,
            }))
            .send()
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(BridgeError::Transport(format!(
                "completion request failed: {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BridgeError::Protocol(e.to_string()))?;
        body["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| BridgeError::Protocol("empty completion response".to_string()))
    }

    /// Pairwise query/document relevance in [0, 1].
    pub async fn score_pair(&self, query: &str, content: &str) -> Result<f32> {
        let content = truncate(content, MAX_SCORED_CONTENT);
        let user = format!(
            "Rate the relevance of the following document content to the query \
             on a scale of 0.0 to 1.0.\n\nQuery: {query}\n\nDocument Content:\n{content}\n\n\
             Respond with only a number between 0.0 and 1.0."
        );
        let raw = self
            .complete(
                "You are a relevance scoring assistant. Respond only with a number between 0.0 and 1.0.",
                &user,
                10,
            )
            .await?;
        let score: f32 = raw
            .parse()
            .map_err(|_| BridgeError::Protocol(format!("non-numeric relevance score: {raw}")))?;
        Ok(score.clamp(0.0, 1.0))
    }

    /// One-shot rewrite of a query for retrieval. Returns the input on
    /// any failure.
    pub async fn rewrite_query(&self, query: &str) -> String {
        let user = format!(
            "Rewrite the following query to be more effective for information \
             retrieval.\n\nOriginal query: {query}\n\nReturn only the rewritten query."
        );
        match self
            .complete("You are a query enhancement assistant.", &user, 100)
            .await
        {
            Ok(rewritten) if !rewritten.is_empty() => rewritten,
            Ok(_) => query.to_string(),
            Err(e) => {
                debug!(error = %e, "query rewrite unavailable, keeping original");
                query.to_string()
            }
        }
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        let mut cut = max;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...", &text[..cut])
    }
}

/// Term-overlap relevance: fraction of query terms present in the
/// content, boosted for an exact phrase match.
pub fn term_overlap_score(query: &str, content: &str) -> f32 {
    if query.is_empty() || content.is_empty() {
        return 0.0;
    }
    let query_lower = query.to_lowercase();
    let content_lower = content.to_lowercase();
    let terms: Vec<&str> = query_lower.split_whitespace().collect();
    if terms.is_empty() {
        return 0.0;
    }
    let matches = terms.iter().filter(|t| content_lower.contains(**t)).count();
    if matches == 0 {
        return 0.0;
    }
    let mut score = matches as f32 / terms.len() as f32;
    if content_lower.contains(&query_lower) {
        score = (score * 1.5).min(1.0);
    }
    score
}

/// Jaccard similarity between the token sets of two contents.
pub fn jaccard_similarity(a: &str, b: &str) -> f32 {
    let set_a: HashSet<String> = tokenize(a).into_iter().collect();
    let set_b: HashSet<String> = tokenize(b).into_iter().collect();
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count() as f32;
    let union = set_a.union(&set_b).count() as f32;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

pub struct Reranker {
    relevance: Option<Arc<RelevanceModel>>,
}

impl Reranker {
    pub fn new(relevance: Option<Arc<RelevanceModel>>) -> Self {
        Self { relevance }
    }

    /// Full rerank: dedup → blended relevance → diversity prune →
    /// normalise → top-k.
    pub async fn rerank(
        &self,
        query: &str,
        results: Vec<ScoredChunk>,
        top_k: usize,
        diversity_threshold: f32,
    ) -> Vec<ScoredChunk> {
        if results.is_empty() {
            return results;
        }

        let mut scored = self.score_relevance(query, dedup(results)).await;
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        let diverse = apply_diversity(scored, diversity_threshold);
        let mut normalized = normalize_scores(diverse);
        normalized.truncate(top_k);
        normalized
    }

    async fn score_relevance(&self, query: &str, results: Vec<ScoredChunk>) -> Vec<ScoredChunk> {
        let mut scored = Vec::with_capacity(results.len());
        for mut chunk in results {
            let original = chunk.score;
            let cross = match &self.relevance {
                Some(model) => match model.score_pair(query, &chunk.metadata.content).await {
                    Ok(score) => score,
                    Err(e) => {
                        warn!(error = %e, "cross-encoder unavailable, falling back to term overlap");
                        term_overlap_score(query, &chunk.metadata.content)
                    }
                },
                None => term_overlap_score(query, &chunk.metadata.content),
            };
            chunk.score = CROSS_WEIGHT * cross + ORIGINAL_WEIGHT * original;
            scored.push(chunk);
        }
        scored
    }
}

fn dedup(results: Vec<ScoredChunk>) -> Vec<ScoredChunk> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|chunk| {
            let digest = Sha256::digest(chunk.metadata.content.as_bytes());
            seen.insert(hex::encode(digest))
        })
        .collect()
}

/// Keep the top item unconditionally; accept each further candidate
/// only if its Jaccard similarity to every accepted item stays at or
/// below the threshold.
fn apply_diversity(results: Vec<ScoredChunk>, threshold: f32) -> Vec<ScoredChunk> {
    if results.len() <= 1 {
        return results;
    }
    let mut diverse: Vec<ScoredChunk> = Vec::with_capacity(results.len());
    for chunk in results {
        if diverse.is_empty() {
            diverse.push(chunk);
            continue;
        }
        let redundant = diverse.iter().any(|accepted| {
            jaccard_similarity(&chunk.metadata.content, &accepted.metadata.content) > threshold
        });
        if !redundant {
            diverse.push(chunk);
        }
    }
    diverse
}

/// Min-max normalise final scores across the surviving set.
fn normalize_scores(mut results: Vec<ScoredChunk>) -> Vec<ScoredChunk> {
    if results.is_empty() {
        return results;
    }
    let max = results.iter().map(|r| r.score).fold(f32::MIN, f32::max);
    let min = results.iter().map(|r| r.score).fold(f32::MAX, f32::min);
    if (max - min).abs() < f32::EPSILON {
        return results;
    }
    for chunk in &mut results {
        chunk.score = (chunk.score - min) / (max - min);
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::vector_store::ChunkMetadata;

    fn chunk(id: &str, score: f32, content: &str) -> ScoredChunk {
        ScoredChunk {
            id: id.to_string(),
            score,
            metadata: ChunkMetadata {
                content: content.to_string(),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_term_overlap_score() {
        assert!(term_overlap_score("rotate api key", "to rotate an api key, visit settings") > 0.9);
        assert_eq!(term_overlap_score("rotate api key", "weather forecast"), 0.0);
        assert_eq!(term_overlap_score("", "anything"), 0.0);
    }

    #[test]
    fn test_jaccard_similarity() {
        assert!((jaccard_similarity("a b c", "a b c") - 1.0).abs() < 1e-6);
        assert_eq!(jaccard_similarity("a b", "c d"), 0.0);
        let partial = jaccard_similarity("a b c d", "a b x y");
        assert!(partial > 0.3 && partial < 0.4);
    }

    #[tokio::test]
    async fn test_rerank_without_cross_encoder() {
        let reranker = Reranker::new(None);
        let results = vec![
            chunk("relevant", 0.5, "rotate the api key from the dashboard"),
            chunk("irrelevant", 0.6, "our cafeteria serves lunch at noon"),
        ];
        let reranked = reranker.rerank("rotate api key", results, 5, 0.7).await;
        assert_eq!(reranked[0].id, "relevant");
    }

    #[tokio::test]
    async fn test_dedup_removes_identical_content() {
        let reranker = Reranker::new(None);
        let results = vec![
            chunk("a", 0.9, "identical content"),
            chunk("b", 0.8, "identical content"),
            chunk("c", 0.7, "different content entirely about api keys"),
        ];
        let reranked = reranker.rerank("api keys", results, 5, 0.7).await;
        assert_eq!(reranked.len(), 2);
    }

    #[test]
    fn test_diversity_prunes_near_duplicates() {
        let results = vec![
            chunk("top", 0.9, "rotate the api key from settings"),
            chunk("dupe", 0.8, "rotate the api key from the settings"),
            chunk("other", 0.7, "billing invoices are emailed monthly"),
        ];
        let diverse = apply_diversity(results, 0.7);
        let ids: Vec<&str> = diverse.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["top", "other"]);
    }

    #[test]
    fn test_normalize_scores_range() {
        let results = vec![chunk("a", 0.2, "x"), chunk("b", 0.6, "y"), chunk("c", 1.4, "z")];
        let normalized = normalize_scores(results);
        assert!((normalized.iter().map(|r| r.score).fold(f32::MIN, f32::max) - 1.0).abs() < 1e-6);
        assert!(normalized.iter().map(|r| r.score).fold(f32::MAX, f32::min).abs() < 1e-6);
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let text = "héllo wörld".repeat(100);
        let truncated = truncate(&text, 500);
        assert!(truncated.len() <= 503);
    }
}
