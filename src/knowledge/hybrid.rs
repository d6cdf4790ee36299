//! Hybrid scoring: dense similarity blended with BM25-style keyword
//! relevance over the already-retrieved candidate set.

use std::collections::HashMap;

use super::vector_store::ScoredChunk;

/// BM25 keyword scorer (k1 = 1.5, b = 0.75).
pub struct Bm25Scorer {
    k1: f32,
    b: f32,
}

impl Default for Bm25Scorer {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

impl Bm25Scorer {
    pub fn new(k1: f32, b: f32) -> Self {
        Self { k1, b }
    }

    pub fn score(
        &self,
        query_terms: &[String],
        document_terms: &[String],
        average_document_length: f32,
    ) -> f32 {
        if query_terms.is_empty() || document_terms.is_empty() || average_document_length <= 0.0 {
            return 0.0;
        }

        let mut term_freqs: HashMap<&str, u32> = HashMap::new();
        for term in document_terms {
            *term_freqs.entry(term.as_str()).or_default() += 1;
        }

        let doc_len = document_terms.len() as f32;
        let mut score = 0.0f32;
        for term in query_terms {
            let Some(&tf) = term_freqs.get(term.as_str()) else {
                continue;
            };
            let tf = tf as f32;
            let idf = ((doc_len + 1.0) / (tf + 1.0) + 1.0).ln();
            let length_norm = 1.0 - self.b + self.b * (doc_len / average_document_length);
            score += idf * (tf * (self.k1 + 1.0)) / (tf + self.k1 * length_norm);
        }
        score
    }
}

/// Blends semantic and keyword scores with normalized weights
/// (defaults 0.7 / 0.3).
pub struct HybridScorer {
    semantic_weight: f32,
    keyword_weight: f32,
    bm25: Bm25Scorer,
}

impl HybridScorer {
    pub fn new(semantic_weight: f32, keyword_weight: f32) -> Self {
        let total = semantic_weight + keyword_weight;
        let (semantic_weight, keyword_weight) = if total > 0.0 {
            (semantic_weight / total, keyword_weight / total)
        } else {
            (1.0, 0.0)
        };
        Self {
            semantic_weight,
            keyword_weight,
            bm25: Bm25Scorer::default(),
        }
    }

    /// Rescore candidates in place: semantic scores normalized to
    /// [0, 1] across the set, BM25 keyword scores computed over the
    /// same set, weighted sum written back into `score`.
    pub fn combine(&self, candidates: &mut Vec<ScoredChunk>, query_terms: &[String]) {
        if candidates.is_empty() {
            return;
        }

        let semantic_norm = normalize(&candidates.iter().map(|c| c.score).collect::<Vec<_>>());

        let tokenized: Vec<Vec<String>> = candidates
            .iter()
            .map(|c| tokenize(&c.metadata.content))
            .collect();
        let average_len = tokenized.iter().map(|t| t.len()).sum::<usize>() as f32
            / tokenized.len() as f32;

        let raw_keyword: Vec<f32> = tokenized
            .iter()
            .map(|terms| self.bm25.score(query_terms, terms, average_len))
            .collect();
        let keyword_norm = normalize(&raw_keyword);

        for (i, candidate) in candidates.iter_mut().enumerate() {
            candidate.score =
                self.semantic_weight * semantic_norm[i] + self.keyword_weight * keyword_norm[i];
        }
        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    }
}

pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Min-max normalize into [0, 1]; a constant set maps to all-ones so
/// relative order is undisturbed.
fn normalize(scores: &[f32]) -> Vec<f32> {
    let Some(&max) = scores
        .iter()
        .max_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
    else {
        return Vec::new();
    };
    let min = scores
        .iter()
        .min_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .copied()
        .unwrap_or(0.0);
    if (max - min).abs() < f32::EPSILON {
        return vec![1.0; scores.len()];
    }
    scores.iter().map(|s| (s - min) / (max - min)).collect()
}
