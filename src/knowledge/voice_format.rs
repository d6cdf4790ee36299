//! Voice-optimized context formatting
//!
//! Retrieval results handed to a live call must be speakable: at most
//! two documents, three sentences each, 500 characters total, markdown
//! flattened, and abbreviations expanded for TTS.

use once_cell::sync::Lazy;
use regex::Regex;

use super::vector_store::ScoredChunk;

const MAX_TOTAL_CHARS: usize = 500;
const MAX_SENTENCES: usize = 3;
const MAX_DOCS: usize = 2;

/// Joins the two selected documents in the spoken passage.
const CONNECTOR: &str = " Additionally, ";
const ELLIPSIS: &str = "...";

static HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"#+\s*").expect("valid"));
static BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*([^*]+)\*\*").expect("valid"));
static ITALIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*([^*]+)\*").expect("valid"));
static CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([^`]+)`").expect("valid"));
static UNSPEAKABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[^\w\s.,!?;:\-'"]"#).expect("valid"));

/// Fixed abbreviation table expanded for TTS friendliness.
const ABBREVIATIONS: &[(&str, &str)] = &[
    ("API", "A P I"),
    ("URL", "U R L"),
    ("HTTPS", "H T T P S"),
    ("HTTP", "H T T P"),
    ("JSON", "J S O N"),
    ("XML", "X M L"),
    ("SQL", "S Q L"),
    ("etc.", "etcetera"),
    ("e.g.", "for example"),
    ("i.e.", "that is"),
];

pub struct VoiceFormatter {
    max_total_chars: usize,
    max_sentences: usize,
    max_docs: usize,
}

impl Default for VoiceFormatter {
    fn default() -> Self {
        Self {
            max_total_chars: MAX_TOTAL_CHARS,
            max_sentences: MAX_SENTENCES,
            max_docs: MAX_DOCS,
        }
    }
}

impl VoiceFormatter {
    /// Render retrieval results as a single speakable passage.
    pub fn format_for_voice(&self, docs: &[ScoredChunk]) -> String {
        if docs.is_empty() {
            return String::new();
        }

        let mut sorted: Vec<&ScoredChunk> = docs.iter().collect();
        sorted.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        let mut parts: Vec<String> = Vec::new();
        let mut total = 0usize;
        for doc in sorted.into_iter().take(self.max_docs) {
            let summary = summarize(&doc.metadata.content, self.max_sentences);
            let mut formatted = speak(doc.metadata.title.as_deref(), &summary);
            // The join connector spends budget too; reserve it before
            // truncating so the assembled passage stays within bounds.
            let connector = if parts.is_empty() { 0 } else { CONNECTOR.len() };
            if total + connector + formatted.len() > self.max_total_chars {
                let remaining = self
                    .max_total_chars
                    .saturating_sub(total + connector + ELLIPSIS.len());
                if remaining > 50 {
                    let mut cut = remaining;
                    while !formatted.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    formatted.truncate(cut);
                    formatted.push_str(ELLIPSIS);
                } else {
                    break;
                }
            }
            total += connector + formatted.len();
            parts.push(formatted);
        }

        match parts.len() {
            0 => String::new(),
            1 => parts.remove(0),
            _ => format!("{}{}{}", parts[0], CONNECTOR, parts[1]),
        }
    }

    /// Expand abbreviations and strip characters that read badly.
    pub fn format_for_tts(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (abbr, expansion) in ABBREVIATIONS {
            out = out.replace(abbr, expansion);
        }
        let out = UNSPEAKABLE.replace_all(&out, "");
        out.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

/// Keep up to `max_sentences`, preferring short clear ones but
/// preserving original order.
fn summarize(content: &str, max_sentences: usize) -> String {
    let sentences: Vec<&str> = content
        .split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if sentences.is_empty() {
        let mut cut = content.len().min(200);
        while !content.is_char_boundary(cut) {
            cut -= 1;
        }
        return content[..cut].to_string();
    }

    let mut scored: Vec<(f32, usize)> = sentences
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let mut score = 1.0f32;
            if s.len() > 100 {
                score *= 0.7;
            }
            // Acronym-dense sentences read badly aloud.
            let acronyms = s.split_whitespace().filter(|w| {
                w.len() >= 2 && w.chars().all(|c| c.is_ascii_uppercase())
            });
            if acronyms.count() > 3 {
                score *= 0.8;
            }
            (score, i)
        })
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    let selected: std::collections::HashSet<usize> =
        scored.iter().take(max_sentences).map(|(_, i)| *i).collect();

    let mut kept: Vec<&str> = Vec::new();
    for (i, sentence) in sentences.iter().enumerate() {
        if selected.contains(&i) {
            kept.push(sentence);
            if kept.len() >= max_sentences {
                break;
            }
        }
    }
    format!("{}.", kept.join(". "))
}

/// Flatten markdown and lead with the source title when it carries
/// information.
fn speak(title: Option<&str>, content: &str) -> String {
    let flattened = HEADING.replace_all(content, "");
    let flattened = BOLD.replace_all(&flattened, "$1");
    let flattened = ITALIC.replace_all(&flattened, "$1");
    let flattened = CODE.replace_all(&flattened, "$1").to_string();

    match title {
        Some(title) if !title.is_empty() && title != "Information" => {
            format!("According to {title}, {flattened}")
        }
        _ => flattened,
    }
}
