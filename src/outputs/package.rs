//! Output package assembly.
//!
//! Builds the on-air graphics payload for an approved claim snapshot.
//! The package is pinned to the claim's approved version; a deterministic
//! id makes regeneration idempotent.

use crate::claims::types::{Claim, PackageStatus, Verdict};
use serde::{Deserialize, Serialize};

/// Graphics template identifier baked into packages and render keys.
pub const TEMPLATE_VERSION: &str = crate::defaults::RENDER_TEMPLATE_ID;

const HEADLINE_MAX_CHARS: usize = 120;
const PACKAGE_SOURCES: usize = 3;

/// The package record handed to the render service and API callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputPackage {
    pub package_id: String,
    pub claim_id: String,
    pub run_id: String,
    pub claim_version: u64,
    pub status: PackageStatus,
    pub template_version: String,
    pub payload: Option<PackagePayload>,
    pub error: Option<String>,
}

/// The renderable payload itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackagePayload {
    pub headline: String,
    pub verdict: Verdict,
    pub confidence: f64,
    pub summary: Option<String>,
    pub sources: Vec<PackageSource>,
    pub clock: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageSource {
    pub publisher: String,
    pub url: String,
}

fn headline(claim: &Claim) -> String {
    let text = claim.claim_text.trim();
    if text.chars().count() <= HEADLINE_MAX_CHARS {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(HEADLINE_MAX_CHARS - 1).collect();
        cut.push('\u{2026}');
        cut
    }
}

/// Build the package for an approved snapshot. The claim must carry an
/// `approvedVersion`; callers enforce export eligibility first.
pub fn build_package(claim: &Claim) -> Result<OutputPackage, String> {
    let claim_version = claim
        .approved_version
        .ok_or_else(|| "claim has no approved version".to_string())?;
    let payload = PackagePayload {
        headline: headline(claim),
        verdict: claim.verdict,
        confidence: claim.confidence,
        summary: claim.summary.clone(),
        sources: claim
            .sources
            .iter()
            .take(PACKAGE_SOURCES)
            .map(|s| PackageSource {
                publisher: s.publisher.clone(),
                url: s.url.clone(),
            })
            .collect(),
        clock: claim.chunk_clock.clone(),
    };
    Ok(OutputPackage {
        package_id: format!("pkg-{}-v{}", claim.claim_id, claim_version),
        claim_id: claim.claim_id.clone(),
        run_id: claim.run_id.clone(),
        claim_version,
        status: PackageStatus::Ready,
        template_version: TEMPLATE_VERSION.to_string(),
        payload: Some(payload),
        error: None,
    })
}
