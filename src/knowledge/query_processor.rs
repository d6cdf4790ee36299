//! Query processing and enhancement
//!
//! Intent classification over a closed set of regex patterns, keyword
//! extraction with a fixed stop list, template/synonym expansion (at
//! most 5 variants), and a punctuation-stripping rewrite optimized for
//! retrieval.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Query intent classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryIntent {
    Factual,
    Procedural,
    Troubleshooting,
    Comparison,
    List,
    YesNo,
    Definition,
    Unknown,
}

impl QueryIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryIntent::Factual => "factual",
            QueryIntent::Procedural => "procedural",
            QueryIntent::Troubleshooting => "troubleshooting",
            QueryIntent::Comparison => "comparison",
            QueryIntent::List => "list",
            QueryIntent::YesNo => "yes_no",
            QueryIntent::Definition => "definition",
            QueryIntent::Unknown => "unknown",
        }
    }
}

static INTENT_PATTERNS: Lazy<Vec<(QueryIntent, Vec<Regex>)>> = Lazy::new(|| {
    let build = |patterns: &[&str]| {
        patterns
            .iter()
            .map(|p| Regex::new(p).expect("valid intent pattern"))
            .collect::<Vec<_>>()
    };
    vec![
        (
            QueryIntent::Comparison,
            build(&[r"^difference between", r"^compare", r"\bvs\.?\b|\bversus\b"]),
        ),
        (
            QueryIntent::List,
            build(&[r"^list (of|all)", r"^what (are|is) (all|the)", r"^show me (all|the)"]),
        ),
        (
            QueryIntent::Definition,
            build(&[r"^define", r"^what (does|is) .+ mean"]),
        ),
        (
            QueryIntent::Procedural,
            build(&[r"^how (do|does|can|should|to)", r"^steps? to", r"^guide (to|for)"]),
        ),
        (
            QueryIntent::Troubleshooting,
            build(&[
                r"^why (doesn't|does|isn't|is)",
                r"^what's wrong",
                r"\b(error|problem|issue|bug|fix)\b",
            ]),
        ),
        (
            QueryIntent::Factual,
            build(&[r"^what (is|are|was|were)", r"^tell me (about|what)", r"^explain (what|who|when|where)"]),
        ),
        (
            QueryIntent::YesNo,
            build(&[r"^(is|are|can|does|do|will|should) .+"]),
        ),
    ]
});

static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
        "from", "as", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
        "do", "does", "did", "will", "would", "should", "could", "may", "might", "must", "can",
        "this", "that", "these", "those", "what", "which", "who", "whom", "whose", "where",
        "when", "why", "how", "all", "each", "every", "some", "any",
    ]
    .into_iter()
    .collect()
});

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\w+\b").expect("valid word pattern"));

const MAX_EXPANSIONS: usize = 5;

/// A processed query ready for retrieval.
#[derive(Debug, Clone)]
pub struct ProcessedQuery {
    pub original: String,
    pub processed: String,
    pub intent: QueryIntent,
    pub keywords: Vec<String>,
    pub expansions: Vec<String>,
}

pub struct QueryProcessor;

impl QueryProcessor {
    pub fn process(query: &str) -> ProcessedQuery {
        let intent = Self::classify_intent(query);
        ProcessedQuery {
            original: query.to_string(),
            processed: Self::rewrite_for_retrieval(query),
            intent,
            keywords: Self::extract_keywords(query),
            expansions: Self::expand_query(query, intent),
        }
    }

    pub fn classify_intent(query: &str) -> QueryIntent {
        let query = query.to_lowercase();
        let query = query.trim();
        for (intent, patterns) in INTENT_PATTERNS.iter() {
            if patterns.iter().any(|p| p.is_match(query)) {
                return *intent;
            }
        }
        QueryIntent::Unknown
    }

    /// Keywords: stop words removed, tokens of length <= 2 dropped.
    pub fn extract_keywords(query: &str) -> Vec<String> {
        let query = query.to_lowercase();
        WORD.find_iter(&query)
            .map(|m| m.as_str().to_string())
            .filter(|w| w.len() > 2 && !STOP_WORDS.contains(w.as_str()))
            .collect()
    }

    /// Template + synonym expansion, capped at 5 variants (the
    /// original query included).
    pub fn expand_query(query: &str, intent: QueryIntent) -> Vec<String> {
        let lower = query.to_lowercase();
        let mut expansions = vec![query.to_string()];

        match intent {
            QueryIntent::Factual => {
                if !lower.starts_with("what") {
                    expansions.push(format!("what is {query}"));
                    expansions.push(format!("explain {query}"));
                }
            }
            QueryIntent::Procedural => {
                if !lower.starts_with("how") {
                    expansions.push(format!("how to {query}"));
                    expansions.push(format!("steps to {query}"));
                }
            }
            QueryIntent::Troubleshooting => {
                expansions.push(format!("fix {query}"));
                expansions.push(format!("solution for {query}"));
            }
            _ => {}
        }

        let synonyms: [(&str, &[&str]); 3] = [
            ("error", &["issue", "problem", "bug"]),
            ("help", &["assist", "support", "guide"]),
            ("create", &["make", "build", "generate"]),
        ];
        for (word, subs) in synonyms {
            if lower.contains(word) {
                for sub in subs {
                    let expanded = lower.replace(word, sub);
                    if expanded != lower {
                        expansions.push(expanded);
                    }
                }
            }
        }

        expansions.dedup();
        expansions.truncate(MAX_EXPANSIONS);
        expansions
    }

    /// Strip question scaffolding that does not help retrieval.
    pub fn rewrite_for_retrieval(query: &str) -> String {
        static LEADING_QUESTION: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"(?i)^(what|who|when|where|why|how)\s+").expect("valid"));
        let rewritten = LEADING_QUESTION.replace(query, "");
        let rewritten = rewritten.replace(['?', '!'], "");
        rewritten.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Split a compound query on conjunctions into sub-queries.
    pub fn decompose(query: &str) -> Vec<String> {
        let lower = query.to_lowercase();
        for conj in [" and ", " or ", " but ", " also ", " plus "] {
            if lower.contains(conj) {
                return lower
                    .split(conj)
                    .map(|part| part.trim().to_string())
                    .filter(|part| !part.is_empty())
                    .collect();
            }
        }
        vec![query.trim().to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_classification() {
        assert_eq!(
            QueryProcessor::classify_intent("how do I rotate an api key"),
            QueryIntent::Procedural
        );
        assert_eq!(
            QueryProcessor::classify_intent("what is a webhook"),
            QueryIntent::Factual
        );
        assert_eq!(
            QueryProcessor::classify_intent("difference between sip and pstn"),
            QueryIntent::Comparison
        );
        assert_eq!(
            QueryProcessor::classify_intent("why doesn't my call connect"),
            QueryIntent::Troubleshooting
        );
        assert_eq!(
            QueryProcessor::classify_intent("define jitter"),
            QueryIntent::Definition
        );
        assert_eq!(
            QueryProcessor::classify_intent("can I port my number"),
            QueryIntent::YesNo
        );
        assert_eq!(
            QueryProcessor::classify_intent("banana"),
            QueryIntent::Unknown
        );
    }

    #[test]
    fn test_keyword_extraction() {
        let keywords = QueryProcessor::extract_keywords("How do I rotate an API key?");
        assert_eq!(keywords, vec!["rotate", "api", "key"]);
    }

    #[test]
    fn test_expansion_cap() {
        let expansions =
            QueryProcessor::expand_query("fix the error when I create a key", QueryIntent::Troubleshooting);
        assert!(expansions.len() <= 5);
        assert_eq!(expansions[0], "fix the error when I create a key");
    }

    #[test]
    fn test_rewrite_for_retrieval() {
        assert_eq!(
            QueryProcessor::rewrite_for_retrieval("How do I rotate an api key?"),
            "do I rotate an api key"
        );
        assert_eq!(QueryProcessor::rewrite_for_retrieval("billing  help!"), "billing help");
    }

    #[test]
    fn test_decompose() {
        let parts = QueryProcessor::decompose("reset my password and update billing");
        assert_eq!(parts, vec!["reset my password", "update billing"]);
        assert_eq!(QueryProcessor::decompose("single query"), vec!["single query"]);
    }
}
