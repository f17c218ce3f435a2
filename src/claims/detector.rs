//! Checkable-claim detection heuristic.
//!
//! A pure, deterministic scorer over sentences: digits, comparative
//! language, a fixed domain lexicon and sentence length each contribute to
//! a score; candidates below the configured threshold are discarded.

use crate::claims::types::{ClaimCandidate, ClaimCategory, ClaimTypeTag, DetectionReason};
use crate::defaults;
use crate::transcript::sentences;
use std::collections::HashSet;

/// Minimum sentence length considered at all.
const MIN_SENTENCE_CHARS: usize = 20;

/// Minimum whitespace tokens for the `sufficient_length` reason.
const SUFFICIENT_LENGTH_TOKENS: usize = 8;

const COMPARATIVE_LEXICON: &[&str] = &[
    "more", "less", "higher", "lower", "up", "down", "increase", "increased", "decrease",
    "decreased", "than", "fewer", "fell", "fall", "rose", "rise", "dropped", "drop", "grew",
    "declined",
];

const SUPERLATIVE_KEYWORDS: &[&str] = &[
    "biggest", "largest", "smallest", "highest", "lowest", "record", "best", "worst", "first",
    "never", "always", "every",
];

const SCALE_KEYWORDS: &[&str] = &[
    "percent", "percentage", "million", "billion", "trillion", "thousand", "double", "triple",
    "half", "rate", "average",
];

const ECONOMIC_KEYWORDS: &[&str] = &[
    "economy", "economic", "inflation", "unemployment", "jobs", "wages", "gdp", "deficit",
    "debt", "tax", "taxes", "tariff", "tariffs", "prices", "spending", "budget", "interest",
];

const POLITICAL_KEYWORDS: &[&str] = &[
    "bill", "law", "congress", "senate", "house", "vote", "voted", "passed", "signed",
    "border", "crime", "immigration", "election", "policy", "administration", "legislation",
];

/// Political keywords that name a checkable legislative act.
const VERIFIABLE_POLITICAL_KEYWORDS: &[&str] = &["passed", "signed", "voted", "law", "bill"];

/// Detection options.
#[derive(Debug, Clone)]
pub struct DetectorOptions {
    /// Score threshold, clamped to the documented range.
    pub threshold: f64,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            threshold: defaults::DETECTION_THRESHOLD,
        }
    }
}

impl DetectorOptions {
    pub fn with_threshold(threshold: f64) -> Self {
        Self {
            threshold: threshold.clamp(
                defaults::DETECTION_THRESHOLD_MIN,
                defaults::DETECTION_THRESHOLD_MAX,
            ),
        }
    }
}

fn tokens(sentence: &str) -> Vec<String> {
    sentence
        .split_whitespace()
        .map(|t| {
            t.chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|t| !t.is_empty())
        .collect()
}

fn keyword_hits(lower: &str, lexicon: &[&str]) -> usize {
    lexicon.iter().filter(|k| lower.contains(*k)).count()
}

/// Detect candidate claims in free text.
///
/// Deterministic: the same text and options always yield the identical
/// candidate list, in sentence order.
pub fn detect(text: &str, options: &DetectorOptions) -> Vec<ClaimCandidate> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut candidates = Vec::new();

    for sentence in sentences::split_all(text) {
        let sentence = sentence.trim();
        if sentence.len() < MIN_SENTENCE_CHARS {
            continue;
        }
        let lower = sentence.to_lowercase();
        if !seen.insert(lower.clone()) {
            continue;
        }

        let toks = tokens(sentence);
        let mut score = 0.0;
        let mut reasons = Vec::new();

        let has_digit = sentence.chars().any(|c| c.is_ascii_digit());
        if has_digit {
            score += 0.45;
            reasons.push(DetectionReason::ContainsNumber);
        }

        let has_comparative = toks.iter().any(|t| COMPARATIVE_LEXICON.contains(&t.as_str()));
        if has_comparative {
            score += 0.20;
            reasons.push(DetectionReason::ContainsComparative);
        }

        let superlative = keyword_hits(&lower, SUPERLATIVE_KEYWORDS);
        let scale = keyword_hits(&lower, SCALE_KEYWORDS);
        let economic = keyword_hits(&lower, ECONOMIC_KEYWORDS);
        let political = keyword_hits(&lower, POLITICAL_KEYWORDS);
        let total_keywords = superlative + scale + economic + political;
        if total_keywords > 0 {
            score += (0.10 * total_keywords as f64).min(0.35);
            reasons.push(DetectionReason::ContainsClaimKeyword);
        }

        if sentence.split_whitespace().count() >= SUFFICIENT_LENGTH_TOKENS {
            score += 0.10;
            reasons.push(DetectionReason::SufficientLength);
        }

        let score = score.clamp(0.0, 1.0);
        if score < options.threshold {
            continue;
        }

        let category = if economic > 0 {
            ClaimCategory::Economic
        } else if political > 0 {
            ClaimCategory::Political
        } else {
            ClaimCategory::General
        };

        let verifiable_political = category == ClaimCategory::Political
            && keyword_hits(&lower, VERIFIABLE_POLITICAL_KEYWORDS) > 0;
        let (tag, tag_confidence) = if has_digit {
            (ClaimTypeTag::NumericFactual, 0.9)
        } else if verifiable_political {
            (ClaimTypeTag::NumericFactual, 0.7)
        } else if has_comparative {
            (ClaimTypeTag::SimplePolicy, 0.6)
        } else {
            (ClaimTypeTag::Other, 0.4)
        };

        candidates.push(ClaimCandidate {
            text: sentence.to_string(),
            score,
            reasons,
            category,
            tag,
            tag_confidence,
        });
    }

    candidates
}
