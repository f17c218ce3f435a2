//! Claim snapshot data model.
//!
//! A claim is the central entity of a run: a candidate sentence promoted to
//! a research work item, carried through research, human approval and
//! downstream graphics work. Snapshots are closed records; optional fields
//! use explicit sentinels rather than dynamic shapes.

use crate::claims::policy::PolicyEval;
use serde::{Deserialize, Serialize};

/// Claim category assigned by the detector lexicons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimCategory {
    Economic,
    Political,
    General,
}

/// Claim type tag driving the policy threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimTypeTag {
    NumericFactual,
    SimplePolicy,
    Other,
}

impl ClaimTypeTag {
    /// Parse an operator-supplied tag override value.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "numeric_factual" => Some(Self::NumericFactual),
            "simple_policy" => Some(Self::SimplePolicy),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// Research lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchStatus {
    PendingResearch,
    Researching,
    Researched,
    NeedsManualResearch,
    NoMatch,
}

/// Normalized verdict vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    True,
    False,
    Misleading,
    Unverified,
}

/// Fact-check provider evidence state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoogleEvidenceState {
    None,
    Matched,
    Error,
}

/// Economic and legislative provider evidence state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuxEvidenceState {
    NotApplicable,
    Ambiguous,
    Matched,
    Error,
}

/// Human approval state for the on-air output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    Pending,
    Approved,
    Rejected,
}

/// Output package lifecycle as seen from the claim snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    None,
    Queued,
    Ready,
    Failed,
}

/// Render job lifecycle as seen from the claim snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderStatus {
    None,
    Queued,
    Rendering,
    Ready,
    Failed,
}

/// Why the detector considered a sentence checkable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionReason {
    ContainsNumber,
    ContainsComparative,
    ContainsClaimKeyword,
    SufficientLength,
}

/// A ranked verdict source from the fact-check provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerdictSource {
    pub publisher: String,
    pub title: String,
    pub url: String,
    pub textual_rating: String,
    pub review_date: Option<String>,
}

/// A plain source reference attached to provider evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    pub title: String,
    pub url: String,
}

/// Auxiliary provider evidence (economic or legislative).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuxEvidence {
    pub state: AuxEvidenceState,
    pub summary: Option<String>,
    pub sources: Vec<SourceRef>,
}

/// The research fields merged into a claim by `claim.updated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchUpdate {
    pub status: ResearchStatus,
    pub google_state: GoogleEvidenceState,
    pub google_summary: Option<String>,
    pub google_sources: Vec<SourceRef>,
    /// `None` leaves the existing economic evidence untouched.
    pub fred: Option<AuxEvidence>,
    /// `None` leaves the existing legislative evidence untouched.
    pub congress: Option<AuxEvidence>,
    pub verdict: Verdict,
    pub confidence: f64,
    pub summary: Option<String>,
    pub sources: Vec<VerdictSource>,
}

/// Full claim snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    pub claim_id: String,
    pub run_id: String,
    /// Optimistic-concurrency counter, strictly monotonic, +1 per mutation.
    pub version: u64,

    pub claim_text: String,
    pub detection_reasons: Vec<DetectionReason>,
    pub detection_score: f64,
    pub chunk_start_sec: f64,
    pub chunk_clock: String,

    pub claim_category: ClaimCategory,
    pub claim_type_tag: ClaimTypeTag,
    pub claim_type_confidence: f64,

    pub status: ResearchStatus,

    pub google_evidence_state: GoogleEvidenceState,
    pub google_evidence_summary: Option<String>,
    pub google_evidence_sources: Vec<SourceRef>,
    pub fred_evidence_state: AuxEvidenceState,
    pub fred_evidence_summary: Option<String>,
    pub fred_evidence_sources: Vec<SourceRef>,
    pub congress_evidence_state: AuxEvidenceState,
    pub congress_evidence_summary: Option<String>,
    pub congress_evidence_sources: Vec<SourceRef>,

    pub verdict: Verdict,
    pub confidence: f64,
    pub summary: Option<String>,
    pub sources: Vec<VerdictSource>,

    pub output_approval_state: ApprovalState,
    pub approved_version: Option<u64>,
    pub approved_at: Option<String>,
    pub rejected_at: Option<String>,

    pub output_package_status: PackageStatus,
    pub output_package_id: Option<String>,
    pub output_package_error: Option<String>,
    pub render_status: RenderStatus,
    pub render_job_id: Option<String>,
    pub render_error: Option<String>,
    pub artifact_url: Option<String>,

    /// Derived, recomputed on every mutation, never merged from events.
    pub policy: PolicyEval,
}

/// A detector candidate before promotion to a claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimCandidate {
    pub text: String,
    pub score: f64,
    pub reasons: Vec<DetectionReason>,
    pub category: ClaimCategory,
    pub tag: ClaimTypeTag,
    pub tag_confidence: f64,
}

impl Claim {
    /// New claim at version 1 with category-appropriate defaults, as
    /// inserted by `claim.detected`.
    pub fn detected(
        claim_id: String,
        run_id: String,
        candidate: &ClaimCandidate,
        chunk_start_sec: f64,
        chunk_clock: String,
    ) -> Self {
        // Economic claims start with unresolved indicator evidence; all
        // other categories are out of the indicator catalogue's scope.
        let fred_state = match candidate.category {
            ClaimCategory::Economic => AuxEvidenceState::Ambiguous,
            _ => AuxEvidenceState::NotApplicable,
        };
        let mut claim = Self {
            claim_id,
            run_id,
            version: 1,
            claim_text: candidate.text.clone(),
            detection_reasons: candidate.reasons.clone(),
            detection_score: candidate.score,
            chunk_start_sec,
            chunk_clock,
            claim_category: candidate.category,
            claim_type_tag: candidate.tag,
            claim_type_confidence: candidate.tag_confidence,
            status: ResearchStatus::PendingResearch,
            google_evidence_state: GoogleEvidenceState::None,
            google_evidence_summary: None,
            google_evidence_sources: Vec::new(),
            fred_evidence_state: fred_state,
            fred_evidence_summary: None,
            fred_evidence_sources: Vec::new(),
            congress_evidence_state: AuxEvidenceState::NotApplicable,
            congress_evidence_summary: None,
            congress_evidence_sources: Vec::new(),
            verdict: Verdict::Unverified,
            confidence: 0.0,
            summary: None,
            sources: Vec::new(),
            output_approval_state: ApprovalState::Pending,
            approved_version: None,
            approved_at: None,
            rejected_at: None,
            output_package_status: PackageStatus::None,
            output_package_id: None,
            output_package_error: None,
            render_status: RenderStatus::None,
            render_job_id: None,
            render_error: None,
            artifact_url: None,
            policy: PolicyEval::placeholder(candidate.tag, candidate.tag_confidence),
        };
        claim.policy = crate::claims::policy::evaluate(&claim);
        claim
    }

    /// Clear everything downstream of approval: package, render, artifact
    /// and the approval pin itself.
    pub fn clear_downstream(&mut self) {
        self.approved_version = None;
        self.approved_at = None;
        self.output_package_status = PackageStatus::None;
        self.output_package_id = None;
        self.output_package_error = None;
        self.render_status = RenderStatus::None;
        self.render_job_id = None;
        self.render_error = None;
        self.artifact_url = None;
    }
}
