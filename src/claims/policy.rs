//! Approval/export policy engine.
//!
//! A pure, synchronous evaluation of a claim snapshot into eligibility
//! flags and block reasons. Both gates fail closed: a claim is only
//! approvable when research finished, evidence is sufficient and
//! unconflicted, and confidence clears the per-tag threshold; export
//! additionally requires an existing approval.

use crate::claims::types::{
    ApprovalState, AuxEvidenceState, Claim, ClaimCategory, ClaimTypeTag, GoogleEvidenceState,
    ResearchStatus,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Aggregate evidence quality after research.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceStatus {
    Researching,
    ProviderDegraded,
    Insufficient,
    Conflicted,
    Sufficient,
}

/// Why approval or export is currently blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    RejectedLocked,
    StillResearching,
    NotResearched,
    ProviderDegraded,
    InsufficientSources,
    ConflictedSources,
    BelowThreshold,
    NotApproved,
}

impl BlockReason {
    /// Operator-facing message for API responses.
    pub fn human_message(&self) -> &'static str {
        match self {
            BlockReason::RejectedLocked => "claim was rejected for this version",
            BlockReason::StillResearching => "research is still in progress",
            BlockReason::NotResearched => "claim has no completed research",
            BlockReason::ProviderDegraded => "an evidence provider failed for this claim",
            BlockReason::InsufficientSources => "not enough independent sources",
            BlockReason::ConflictedSources => "sources disagree on the verdict",
            BlockReason::BelowThreshold => "confidence is below the policy threshold",
            BlockReason::NotApproved => "claim has not been approved",
        }
    }
}

/// Derived policy fields, recomputed on every claim mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyEval {
    pub claim_type_tag: ClaimTypeTag,
    pub claim_type_confidence: f64,
    pub policy_threshold: f64,
    pub independent_source_count: usize,
    pub evidence_conflict: bool,
    pub evidence_status: EvidenceStatus,
    pub approval_eligibility: bool,
    pub approval_block_reason: Option<BlockReason>,
    pub export_eligibility: bool,
    pub export_block_reason: Option<BlockReason>,
}

impl PolicyEval {
    /// Pre-evaluation placeholder used only while constructing a snapshot.
    pub fn placeholder(tag: ClaimTypeTag, tag_confidence: f64) -> Self {
        Self {
            claim_type_tag: tag,
            claim_type_confidence: tag_confidence,
            policy_threshold: threshold_for(tag),
            independent_source_count: 0,
            evidence_conflict: false,
            evidence_status: EvidenceStatus::Researching,
            approval_eligibility: false,
            approval_block_reason: Some(BlockReason::StillResearching),
            export_eligibility: false,
            export_block_reason: Some(BlockReason::StillResearching),
        }
    }
}

/// Per-tag confidence threshold.
pub fn threshold_for(tag: ClaimTypeTag) -> f64 {
    match tag {
        ClaimTypeTag::NumericFactual => 0.60,
        ClaimTypeTag::SimplePolicy => 0.75,
        ClaimTypeTag::Other => 0.80,
    }
}

/// Conflict buckets for source textual ratings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum RatingBucket {
    False,
    Misleading,
    Supported,
    Unverified,
}

fn rating_bucket(rating: &str) -> RatingBucket {
    let r = rating.trim().to_lowercase();
    // The misleading set is checked first: "half true" and "mostly false"
    // contain plain "true"/"false".
    for word in ["misleading", "mixed", "partly false", "half true", "mostly false"] {
        if r.contains(word) {
            return RatingBucket::Misleading;
        }
    }
    for word in ["false", "incorrect", "pants on fire"] {
        if r.contains(word) {
            return RatingBucket::False;
        }
    }
    for word in ["mostly true", "true", "correct"] {
        if r.contains(word) {
            return RatingBucket::Supported;
        }
    }
    RatingBucket::Unverified
}

fn independent_source_count(claim: &Claim) -> usize {
    let mut keys = BTreeSet::new();
    for source in &claim.sources {
        let key = if !source.publisher.trim().is_empty() {
            source.publisher.trim().to_lowercase()
        } else {
            source.url.trim().to_lowercase()
        };
        if !key.is_empty() {
            keys.insert(key);
        }
    }
    keys.len()
}

fn evidence_conflict(claim: &Claim) -> bool {
    let buckets: BTreeSet<RatingBucket> = claim
        .sources
        .iter()
        .map(|s| rating_bucket(&s.textual_rating))
        .filter(|b| *b != RatingBucket::Unverified)
        .collect();
    buckets.len() >= 2
}

fn evidence_status(claim: &Claim, source_count: usize, conflict: bool) -> EvidenceStatus {
    if matches!(
        claim.status,
        ResearchStatus::PendingResearch | ResearchStatus::Researching
    ) {
        return EvidenceStatus::Researching;
    }
    if claim.google_evidence_state == GoogleEvidenceState::Error {
        return EvidenceStatus::ProviderDegraded;
    }
    if claim.claim_category == ClaimCategory::Economic {
        if claim.fred_evidence_state == AuxEvidenceState::Error {
            return EvidenceStatus::ProviderDegraded;
        }
        // A matched indicator series alone is sufficient evidence.
        if claim.fred_evidence_state != AuxEvidenceState::Matched && source_count < 1 {
            return EvidenceStatus::Insufficient;
        }
    } else if source_count < 1 {
        return EvidenceStatus::Insufficient;
    }
    if conflict {
        return EvidenceStatus::Conflicted;
    }
    EvidenceStatus::Sufficient
}

fn approval_block_reason(
    claim: &Claim,
    status: EvidenceStatus,
    threshold: f64,
) -> Option<BlockReason> {
    if claim.output_approval_state == ApprovalState::Rejected {
        return Some(BlockReason::RejectedLocked);
    }
    if claim.status != ResearchStatus::Researched {
        return Some(match claim.status {
            ResearchStatus::PendingResearch | ResearchStatus::Researching => {
                BlockReason::StillResearching
            }
            _ => BlockReason::NotResearched,
        });
    }
    let from_evidence = match status {
        EvidenceStatus::Researching => Some(BlockReason::StillResearching),
        EvidenceStatus::ProviderDegraded => Some(BlockReason::ProviderDegraded),
        EvidenceStatus::Insufficient => Some(BlockReason::InsufficientSources),
        EvidenceStatus::Conflicted => Some(BlockReason::ConflictedSources),
        EvidenceStatus::Sufficient => None,
    };
    if from_evidence.is_some() {
        return from_evidence;
    }
    if claim.confidence < threshold {
        return Some(BlockReason::BelowThreshold);
    }
    None
}

/// Evaluate the full policy for a claim snapshot.
///
/// Idempotent: evaluating twice over the same snapshot yields an equal
/// result.
pub fn evaluate(claim: &Claim) -> PolicyEval {
    let threshold = threshold_for(claim.claim_type_tag);
    let source_count = independent_source_count(claim);
    let conflict = evidence_conflict(claim);
    let status = evidence_status(claim, source_count, conflict);
    let approval_block = approval_block_reason(claim, status, threshold);
    let export_block = approval_block.or({
        if claim.output_approval_state != ApprovalState::Approved {
            Some(BlockReason::NotApproved)
        } else {
            None
        }
    });

    PolicyEval {
        claim_type_tag: claim.claim_type_tag,
        claim_type_confidence: claim.claim_type_confidence,
        policy_threshold: threshold,
        independent_source_count: source_count,
        evidence_conflict: conflict,
        evidence_status: status,
        approval_eligibility: approval_block.is_none(),
        approval_block_reason: approval_block,
        export_eligibility: export_block.is_none(),
        export_block_reason: export_block,
    }
}
