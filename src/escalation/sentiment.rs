//! Lexicon-based sentiment scoring
//!
//! Bounded scorer over a compact valence lexicon with negation and
//! booster handling. The compound score is normalized into [-1, 1]
//! with `s / sqrt(s^2 + 15)`, so escalation thresholds behave the same
//! way across short and long turns.

/// (token, valence) pairs. Valences roughly follow the usual
/// social-media sentiment lexicons, trimmed to phone-support
/// vocabulary.
const LEXICON: &[(&str, f32)] = &[
    // Positive
    ("good", 1.9),
    ("great", 3.1),
    ("excellent", 2.7),
    ("amazing", 2.8),
    ("awesome", 3.1),
    ("perfect", 2.7),
    ("love", 3.2),
    ("thanks", 1.9),
    ("thank", 1.9),
    ("helpful", 1.9),
    ("happy", 2.7),
    ("wonderful", 2.7),
    ("fixed", 1.5),
    ("resolved", 1.6),
    ("works", 1.4),
    ("appreciate", 2.0),
    ("pleased", 2.1),
    ("fine", 0.8),
    ("yes", 0.4),
    // Negative
    ("bad", -2.5),
    ("terrible", -2.1),
    ("horrible", -2.5),
    ("awful", -2.0),
    ("useless", -1.8),
    ("broken", -1.6),
    ("angry", -2.3),
    ("furious", -2.9),
    ("frustrated", -2.1),
    ("frustrating", -2.1),
    ("annoyed", -1.8),
    ("annoying", -1.8),
    ("hate", -2.7),
    ("worst", -3.1),
    ("ridiculous", -1.9),
    ("unacceptable", -2.4),
    ("disappointed", -2.1),
    ("disappointing", -2.1),
    ("problem", -1.2),
    ("problems", -1.2),
    ("issue", -0.9),
    ("wrong", -1.6),
    ("fail", -2.0),
    ("failed", -2.0),
    ("waste", -1.8),
    ("wasting", -1.8),
    ("scam", -2.6),
    ("cancel", -1.3),
    ("refund", -0.9),
    ("complaint", -1.7),
    ("never", -1.0),
    ("no", -0.5),
];

const NEGATIONS: &[&str] = &[
    "not", "no", "never", "isn't", "isnt", "wasn't", "wasnt", "don't", "dont", "doesn't",
    "doesnt", "didn't", "didnt", "can't", "cant", "won't", "wont", "couldn't", "couldnt",
];

const BOOSTERS: &[(&str, f32)] = &[
    ("very", 0.29),
    ("really", 0.29),
    ("extremely", 0.45),
    ("absolutely", 0.35),
    ("so", 0.2),
    ("totally", 0.3),
    ("completely", 0.35),
    ("slightly", -0.3),
    ("somewhat", -0.25),
    ("kind", -0.15),
];

/// Normalization constant for the compound score.
const ALPHA: f32 = 15.0;

/// Full sentiment breakdown for one text.
#[derive(Debug, Clone, PartialEq)]
pub struct SentimentScore {
    /// Compound score in [-1, 1].
    pub score: f32,
    pub positive: f32,
    pub negative: f32,
    pub neutral: f32,
    pub label: SentimentLabel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

impl SentimentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentLabel::Positive => "positive",
            SentimentLabel::Neutral => "neutral",
            SentimentLabel::Negative => "negative",
        }
    }
}

#[derive(Debug, Default)]
pub struct SentimentAnalyzer;

impl SentimentAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, text: &str) -> SentimentScore {
        let tokens: Vec<String> = text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric() && c != '\'')
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();

        let mut sum = 0.0f32;
        let mut positive = 0.0f32;
        let mut negative = 0.0f32;
        let mut neutral_count = 0u32;

        for (i, token) in tokens.iter().enumerate() {
            let Some(&(_, base)) = LEXICON.iter().find(|(w, _)| w == token) else {
                neutral_count += 1;
                continue;
            };
            let mut valence = base;

            // A booster directly before the token amplifies or damps it.
            if i >= 1 {
                if let Some(&(_, boost)) = BOOSTERS.iter().find(|(w, _)| *w == tokens[i - 1]) {
                    valence += boost * valence.signum();
                }
            }
            // A negation within the two preceding tokens flips it.
            let window_start = i.saturating_sub(2);
            if tokens[window_start..i]
                .iter()
                .any(|t| NEGATIONS.contains(&t.as_str()))
            {
                valence *= -0.74;
            }

            if valence > 0.0 {
                positive += valence;
            } else {
                negative += -valence;
            }
            sum += valence;
        }

        let score = sum / (sum * sum + ALPHA).sqrt();
        let total = positive + negative + neutral_count as f32;
        let (pos_share, neg_share, neu_share) = if total > 0.0 {
            (
                positive / total,
                negative / total,
                neutral_count as f32 / total,
            )
        } else {
            (0.0, 0.0, 1.0)
        };

        let label = if score >= 0.05 {
            SentimentLabel::Positive
        } else if score <= -0.05 {
            SentimentLabel::Negative
        } else {
            SentimentLabel::Neutral
        };

        SentimentScore {
            score,
            positive: pos_share,
            negative: neg_share,
            neutral: neu_share,
            label,
        }
    }
}
