//! Fact-check search client.
//!
//! Queries the external fact-check search service with up to three query
//! variants across language codes, then normalizes, scores, dedupes and
//! ranks the returned claim reviews.

use crate::claims::types::{GoogleEvidenceState, Verdict, VerdictSource};
use crate::defaults::FACTCHECK_MAX_AGE_YEARS;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::debug;

const SEARCH_URL: &str = "https://factchecktools.googleapis.com/v1alpha1/claims:search";

/// Query variant cap on token count.
const VARIANT_TOKEN_CAP: usize = 18;

/// Outcome classification for the fact-check provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactCheckStatus {
    Researched,
    NoMatch,
    NeedsManualResearch,
    Error,
}

/// The provider finding: state, ranked verdict and sources.
#[derive(Debug, Clone)]
pub struct FactCheckFinding {
    pub status: FactCheckStatus,
    pub state: GoogleEvidenceState,
    pub verdict: Verdict,
    pub confidence: f64,
    pub summary: Option<String>,
    pub sources: Vec<VerdictSource>,
}

impl FactCheckFinding {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: FactCheckStatus::Error,
            state: GoogleEvidenceState::Error,
            verdict: Verdict::Unverified,
            confidence: 0.0,
            summary: Some(message.into()),
            sources: Vec::new(),
        }
    }

    pub fn no_match() -> Self {
        Self {
            status: FactCheckStatus::NoMatch,
            state: GoogleEvidenceState::None,
            verdict: Verdict::Unverified,
            confidence: 0.0,
            summary: Some("no matching fact checks".to_string()),
            sources: Vec::new(),
        }
    }
}

/// Trait seam so the scheduler can run against a mock.
#[async_trait]
pub trait FactChecker: Send + Sync {
    async fn check(&self, claim_text: &str) -> FactCheckFinding;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    claims: Vec<ApiClaim>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiClaim {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    claim_review: Vec<ApiReview>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiReview {
    #[serde(default)]
    publisher: Option<ApiPublisher>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    review_date: Option<String>,
    #[serde(default)]
    textual_rating: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiPublisher {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    site: Option<String>,
}

/// A scored review candidate before dedupe and ranking.
#[derive(Debug, Clone)]
struct Candidate {
    publisher: String,
    title: String,
    url: String,
    textual_rating: String,
    review_date: Option<String>,
    claim_reviewed: String,
    verdict: Verdict,
    confidence: f64,
}

/// Normalize a textual rating into the verdict vocabulary by
/// case-insensitive substring match.
pub fn normalize_rating(rating: &str) -> Verdict {
    let r = rating.trim().to_lowercase();
    // Mixed-leaning words first: "mostly false" and "partly true" contain
    // the plain words checked later.
    for word in [
        "misleading",
        "mostly false",
        "partly false",
        "partly true",
        "half true",
        "mixed",
        "missing context",
        "out of context",
    ] {
        if r.contains(word) {
            return Verdict::Misleading;
        }
    }
    for word in [
        "pants on fire",
        "pants-on-fire",
        "debunked",
        "no evidence",
        "fake",
        "hoax",
        "fabricated",
        "false",
        "incorrect",
    ] {
        if r.contains(word) {
            return Verdict::False;
        }
    }
    for word in ["mostly true", "true", "correct", "accurate", "authentic"] {
        if r.contains(word) {
            return Verdict::True;
        }
    }
    Verdict::Unverified
}

/// Tokens for similarity: lowercased, non-alphanumerics to spaces, longer
/// than two characters.
fn similarity_tokens(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(|t| t.to_string())
        .collect()
}

/// Jaccard similarity of token sets.
pub fn match_score(claim_text: &str, review_text: &str) -> f64 {
    let a = similarity_tokens(claim_text);
    let b = similarity_tokens(review_text);
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(&b).count() as f64;
    let union = a.union(&b).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

/// Age-based multiplier: full weight under two years, linear decay to a
/// 0.5 floor between two and four.
pub fn recency_multiplier(age_years: f64) -> f64 {
    if age_years <= 2.0 {
        1.0
    } else {
        (1.0 - (age_years - 2.0) * 0.15).max(0.5)
    }
}

fn review_age_years(review_date: &str) -> Option<f64> {
    let date = review_date
        .get(..10)
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())?;
    let days = (Utc::now().date_naive() - date).num_days() as f64;
    Some(days / 365.25)
}

/// Build up to three query variants: the full text, the first 18 tokens,
/// and a digit-and-long-token focus.
pub fn query_variants(claim_text: &str) -> Vec<String> {
    let full = claim_text.trim().to_string();
    let mut variants = Vec::new();
    if full.is_empty() {
        return variants;
    }
    variants.push(full.clone());

    let tokens: Vec<&str> = full.split_whitespace().collect();
    if tokens.len() > VARIANT_TOKEN_CAP {
        let prefix = tokens[..VARIANT_TOKEN_CAP].join(" ");
        if !variants.contains(&prefix) {
            variants.push(prefix);
        }
    }

    let focus: Vec<&str> = tokens
        .iter()
        .copied()
        .filter(|t| t.chars().any(|c| c.is_ascii_digit()) || t.len() > 5)
        .collect();
    if !focus.is_empty() {
        let focus = focus.join(" ");
        if !variants.contains(&focus) {
            variants.push(focus);
        }
    }
    variants.truncate(3);
    variants
}

fn score_review(claim_text: &str, claim_reviewed: &str, review: &ApiReview) -> Option<Candidate> {
    let review_date = review.review_date.clone();
    let recency = match review_date.as_deref().and_then(review_age_years) {
        Some(age) if age > FACTCHECK_MAX_AGE_YEARS => return None,
        Some(age) => recency_multiplier(age),
        // Undated reviews keep full weight; age cannot be held against
        // them.
        None => 1.0,
    };

    let rating = review.textual_rating.clone().unwrap_or_default();
    let verdict = normalize_rating(&rating);
    let verdict_weight = if verdict == Verdict::Unverified { 0.35 } else { 0.80 };

    let title = review.title.clone().unwrap_or_default();
    let haystack = format!("{claim_reviewed} {title} {rating}");
    let score = match_score(claim_text, &haystack);
    let confidence = ((0.25 + 0.45 * score + 0.30 * verdict_weight) * recency).min(0.98);

    Some(Candidate {
        publisher: review
            .publisher
            .as_ref()
            .and_then(|p| p.name.clone().or_else(|| p.site.clone()))
            .unwrap_or_default(),
        title,
        url: review.url.clone().unwrap_or_default(),
        textual_rating: rating,
        review_date,
        claim_reviewed: claim_reviewed.to_string(),
        verdict,
        confidence,
    })
}

fn dedupe_and_rank(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut best: HashMap<(String, String, String, String), Candidate> = HashMap::new();
    for candidate in candidates {
        let key = (
            candidate.url.clone(),
            candidate.publisher.clone(),
            candidate.claim_reviewed.clone(),
            candidate.textual_rating.clone(),
        );
        match best.get(&key) {
            Some(existing) if existing.confidence >= candidate.confidence => {}
            _ => {
                best.insert(key, candidate);
            }
        }
    }
    let mut ranked: Vec<Candidate> = best.into_values().collect();
    // Classified verdicts outrank unverified ones at any confidence.
    ranked.sort_by(|a, b| {
        let class_a = a.verdict != Verdict::Unverified;
        let class_b = b.verdict != Verdict::Unverified;
        class_b
            .cmp(&class_a)
            .then(b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal))
    });
    ranked
}

fn finding_from_candidates(candidates: Vec<Candidate>) -> FactCheckFinding {
    let ranked = dedupe_and_rank(candidates);
    let Some(top) = ranked.first() else {
        return FactCheckFinding::no_match();
    };
    let summary = format!(
        "{} reviews; top: {} rated \"{}\"",
        ranked.len(),
        if top.publisher.is_empty() { "unknown" } else { &top.publisher },
        top.textual_rating
    );
    FactCheckFinding {
        status: FactCheckStatus::Researched,
        state: GoogleEvidenceState::Matched,
        verdict: top.verdict,
        confidence: (top.confidence * 100.0).round() / 100.0,
        summary: Some(summary),
        sources: ranked
            .iter()
            .take(3)
            .map(|c| VerdictSource {
                publisher: c.publisher.clone(),
                title: c.title.clone(),
                url: c.url.clone(),
                textual_rating: c.textual_rating.clone(),
                review_date: c.review_date.clone(),
            })
            .collect(),
    }
}

/// HTTP fact-check client.
pub struct FactCheckClient {
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl FactCheckClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self::with_base_url(api_key, SEARCH_URL.to_string())
    }

    pub fn with_base_url(api_key: Option<String>, base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap_or_default();
        Self {
            api_key,
            base_url,
            client,
        }
    }

    async fn search(
        &self,
        api_key: &str,
        query: &str,
        language: Option<&str>,
    ) -> Result<SearchResponse, FactCheckFinding> {
        let mut request = self
            .client
            .get(&self.base_url)
            .query(&[("query", query), ("key", api_key), ("pageSize", "10")]);
        if let Some(language) = language {
            request = request.query(&[("languageCode", language)]);
        }
        let response = request
            .send()
            .await
            .map_err(|e| FactCheckFinding::error(format!("fact-check request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(160).collect();
            return Err(FactCheckFinding::error(format!(
                "fact-check service returned {status}: {body}"
            )));
        }
        response
            .json::<SearchResponse>()
            .await
            .map_err(|e| FactCheckFinding::error(format!("fact-check response parse failed: {e}")))
    }
}

#[async_trait]
impl FactChecker for FactCheckClient {
    async fn check(&self, claim_text: &str) -> FactCheckFinding {
        let Some(api_key) = self.api_key.as_deref() else {
            return FactCheckFinding {
                status: FactCheckStatus::NeedsManualResearch,
                state: GoogleEvidenceState::Error,
                verdict: Verdict::Unverified,
                confidence: 0.0,
                summary: Some("no fact-check API key configured".to_string()),
                sources: Vec::new(),
            };
        };
        let variants = query_variants(claim_text);
        if variants.is_empty() {
            return FactCheckFinding::no_match();
        }

        let mut candidates = Vec::new();
        'outer: for variant in &variants {
            for language in [Some("en-US"), Some("en"), None] {
                let page = match self.search(api_key, variant, language).await {
                    Ok(page) => page,
                    Err(finding) => return finding,
                };
                for api_claim in &page.claims {
                    let reviewed = api_claim.text.clone().unwrap_or_default();
                    for review in &api_claim.claim_review {
                        if let Some(candidate) = score_review(claim_text, &reviewed, review) {
                            candidates.push(candidate);
                        }
                    }
                }
                if !candidates.is_empty() {
                    debug!(%variant, ?language, hits = candidates.len(), "fact-check hit");
                    break 'outer;
                }
            }
        }
        finding_from_candidates(candidates)
    }
}
