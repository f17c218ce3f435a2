//! Verifier client.
//!
//! Submits the claim plus structured evidence to the external reasoning
//! service and parses a constrained-schema verdict. Every failure path
//! returns the safe fallback; only cancellation propagates.

use crate::claims::types::Verdict;
use crate::defaults::VERIFIER_TEXT_CAP;
use crate::research::EvidenceBundle;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// Which evidence the reasoning service says it leaned on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidenceBasis {
    FactCheckMatch,
    FredData,
    CongressData,
    GeneralKnowledge,
    Mixed,
}

impl EvidenceBasis {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "fact_check_match" => Some(Self::FactCheckMatch),
            "fred_data" => Some(Self::FredData),
            "congress_data" => Some(Self::CongressData),
            "general_knowledge" => Some(Self::GeneralKnowledge),
            "mixed" => Some(Self::Mixed),
            _ => None,
        }
    }
}

/// Constrained verifier output after post-processing.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifierOutput {
    pub ai_verdict: Verdict,
    pub ai_confidence: f64,
    pub corrected_claim: Option<String>,
    pub ai_summary: Option<String>,
    pub evidence_basis: Option<EvidenceBasis>,
}

impl VerifierOutput {
    /// The safe fallback for any failure.
    pub fn fallback() -> Self {
        Self {
            ai_verdict: Verdict::Unverified,
            ai_confidence: 0.0,
            corrected_claim: None,
            ai_summary: None,
            evidence_basis: None,
        }
    }
}

/// Trait seam so the scheduler can run against a mock.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, claim_text: &str, evidence: &EvidenceBundle) -> VerifierOutput;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOutput {
    #[serde(default)]
    ai_verdict: Option<String>,
    #[serde(default)]
    ai_confidence: Option<f64>,
    #[serde(default)]
    corrected_claim: Option<String>,
    #[serde(default)]
    ai_summary: Option<String>,
    #[serde(default)]
    evidence_basis: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

fn parse_verdict(value: &str) -> Option<Verdict> {
    match value {
        "true" => Some(Verdict::True),
        "false" => Some(Verdict::False),
        "misleading" => Some(Verdict::Misleading),
        "unverified" => Some(Verdict::Unverified),
        _ => None,
    }
}

fn cap_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(|v| {
            if v.chars().count() > VERIFIER_TEXT_CAP {
                v.chars().take(VERIFIER_TEXT_CAP).collect()
            } else {
                v
            }
        })
}

/// Post-process raw model output: clamp numerics, cap text lengths, and
/// cap confidence when no evidence source was classified.
fn post_process(raw: RawOutput, evidence: &EvidenceBundle) -> VerifierOutput {
    let ai_verdict = raw
        .ai_verdict
        .as_deref()
        .and_then(parse_verdict)
        .unwrap_or(Verdict::Unverified);
    let mut ai_confidence = raw.ai_confidence.unwrap_or(0.0).clamp(0.0, 1.0);
    if !evidence.has_classified_evidence() {
        ai_confidence = ai_confidence.min(0.65);
    }
    VerifierOutput {
        ai_verdict,
        ai_confidence,
        corrected_claim: cap_text(raw.corrected_claim),
        ai_summary: cap_text(raw.ai_summary),
        evidence_basis: raw.evidence_basis.as_deref().and_then(EvidenceBasis::parse),
    }
}

fn evidence_section(evidence: &EvidenceBundle) -> String {
    let mut lines = Vec::new();
    match &evidence.factcheck.summary {
        Some(summary) => lines.push(format!("Fact-check search: {summary}")),
        None => lines.push("Fact-check search: no result".to_string()),
    }
    for source in evidence.factcheck.sources.iter().take(3) {
        lines.push(format!(
            "- {} rated \"{}\": {}",
            source.publisher, source.textual_rating, source.url
        ));
    }
    if let Some(fred) = &evidence.fred {
        lines.push(format!(
            "Economic data ({:?}): {}",
            fred.state,
            fred.summary.as_deref().unwrap_or("none")
        ));
    }
    if let Some(congress) = &evidence.congress {
        lines.push(format!(
            "Legislative data ({:?}): {}",
            congress.state,
            congress.summary.as_deref().unwrap_or("none")
        ));
    }
    lines.join("\n")
}

/// HTTP verifier against an OpenAI-compatible chat completions endpoint.
pub struct HttpVerifier {
    api_key: Option<String>,
    url: String,
    model: String,
    client: reqwest::Client,
}

impl HttpVerifier {
    pub fn new(api_key: Option<String>, url: String, model: String) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self {
            api_key,
            url,
            model,
            client,
        }
    }

    async fn request(&self, api_key: &str, prompt: String) -> Option<RawOutput> {
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": [
                {
                    "role": "system",
                    "content": "You are a broadcast fact-check verifier. Reply with a single \
                        JSON object with keys aiVerdict (one of true/false/misleading/unverified), \
                        aiConfidence (0..1), correctedClaim (string or null), aiSummary (string), \
                        evidenceBasis (one of fact_check_match/fred_data/congress_data/\
                        general_knowledge/mixed)."
                },
                { "role": "user", "content": prompt }
            ]
        });
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            debug!(status = %response.status(), "verifier request failed");
            return None;
        }
        let chat: ChatResponse = response.json().await.ok()?;
        let content = &chat.choices.first()?.message.content;
        serde_json::from_str(content).ok()
    }
}

#[async_trait]
impl Verifier for HttpVerifier {
    async fn verify(&self, claim_text: &str, evidence: &EvidenceBundle) -> VerifierOutput {
        let Some(api_key) = self.api_key.as_deref() else {
            return VerifierOutput::fallback();
        };
        if claim_text.trim().is_empty() {
            return VerifierOutput::fallback();
        }
        let prompt = format!(
            "Claim: {claim_text}\n\nEvidence:\n{}\n\nAssess the claim.",
            evidence_section(evidence)
        );
        match self.request(api_key, prompt).await {
            Some(raw) => post_process(raw, evidence),
            None => VerifierOutput::fallback(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::types::{AuxEvidence, AuxEvidenceState, GoogleEvidenceState};
    use crate::research::factcheck::{FactCheckFinding, FactCheckStatus};

    fn bundle(classified: bool) -> EvidenceBundle {
        EvidenceBundle {
            factcheck: FactCheckFinding {
                status: FactCheckStatus::NoMatch,
                state: GoogleEvidenceState::None,
                verdict: if classified {
                    Verdict::False
                } else {
                    Verdict::Unverified
                },
                confidence: 0.0,
                summary: None,
                sources: vec![],
            },
            fred: None,
            congress: None,
        }
    }

    fn raw(verdict: &str, confidence: f64) -> RawOutput {
        RawOutput {
            ai_verdict: Some(verdict.to_string()),
            ai_confidence: Some(confidence),
            corrected_claim: None,
            ai_summary: Some("summary".to_string()),
            evidence_basis: Some("general_knowledge".to_string()),
        }
    }

    #[test]
    fn fallback_is_the_documented_shape() {
        let fallback = VerifierOutput::fallback();
        assert_eq!(fallback.ai_verdict, Verdict::Unverified);
        assert_eq!(fallback.ai_confidence, 0.0);
        assert_eq!(fallback.corrected_claim, None);
        assert_eq!(fallback.ai_summary, None);
        assert_eq!(fallback.evidence_basis, None);
    }

    #[test]
    fn confidence_is_clamped_into_unit_range() {
        let output = post_process(raw("true", 3.5), &bundle(true));
        assert_eq!(output.ai_confidence, 1.0);
        let output = post_process(raw("true", -0.5), &bundle(true));
        assert_eq!(output.ai_confidence, 0.0);
    }

    #[test]
    fn unclassified_evidence_caps_confidence() {
        let output = post_process(raw("true", 0.95), &bundle(false));
        assert_eq!(output.ai_confidence, 0.65);

        let output = post_process(raw("true", 0.95), &bundle(true));
        assert_eq!(output.ai_confidence, 0.95);
    }

    #[test]
    fn matched_fred_counts_as_classified() {
        let mut evidence = bundle(false);
        evidence.fred = Some(AuxEvidence {
            state: AuxEvidenceState::Matched,
            summary: None,
            sources: vec![],
        });
        let output = post_process(raw("true", 0.9), &evidence);
        assert_eq!(output.ai_confidence, 0.9);
    }

    #[test]
    fn unknown_verdict_and_basis_fall_back() {
        let mut raw = raw("probably", 0.5);
        raw.evidence_basis = Some("vibes".to_string());
        let output = post_process(raw, &bundle(true));
        assert_eq!(output.ai_verdict, Verdict::Unverified);
        assert_eq!(output.evidence_basis, None);
    }

    #[test]
    fn long_texts_are_capped() {
        let mut input = raw("true", 0.5);
        input.ai_summary = Some("x".repeat(1000));
        input.corrected_claim = Some("y".repeat(1000));
        let output = post_process(input, &bundle(true));
        assert_eq!(output.ai_summary.unwrap().chars().count(), VERIFIER_TEXT_CAP);
        assert_eq!(
            output.corrected_claim.unwrap().chars().count(),
            VERIFIER_TEXT_CAP
        );
    }

    #[test]
    fn empty_strings_become_none() {
        let mut input = raw("true", 0.5);
        input.ai_summary = Some("   ".to_string());
        let output = post_process(input, &bundle(true));
        assert_eq!(output.ai_summary, None);
    }

    #[tokio::test]
    async fn missing_api_key_returns_fallback() {
        let verifier = HttpVerifier::new(
            None,
            "https://verifier.example/v1/chat/completions".to_string(),
            "model".to_string(),
        );
        let output = verifier.verify("Some claim.", &bundle(true)).await;
        assert_eq!(output, VerifierOutput::fallback());
    }

    #[tokio::test]
    async fn empty_claim_returns_fallback() {
        let verifier = HttpVerifier::new(
            Some("key".to_string()),
            "https://verifier.example/v1/chat/completions".to_string(),
            "model".to_string(),
        );
        let output = verifier.verify("   ", &bundle(true)).await;
        assert_eq!(output, VerifierOutput::fallback());
    }

    #[test]
    fn evidence_section_lists_all_providers() {
        let mut evidence = bundle(true);
        evidence.factcheck.summary = Some("2 reviews".to_string());
        evidence.fred = Some(AuxEvidence {
            state: AuxEvidenceState::Matched,
            summary: Some("CPI: 3.1 (2024-12-01)".to_string()),
            sources: vec![],
        });
        let section = evidence_section(&evidence);
        assert!(section.contains("Fact-check search: 2 reviews"));
        assert!(section.contains("CPI: 3.1"));
    }
}
