//! Claim lifecycle store.
//!
//! An in-memory map of claim snapshots mutated through a single `apply`
//! path: merge rule, version increment, policy recompute. Operator actions
//! add optimistic-concurrency version guards and policy checks on top.

use crate::claims::policy::{self, BlockReason};
use crate::claims::types::{
    ApprovalState, Claim, ClaimCandidate, ClaimTypeTag, PackageStatus, RenderStatus,
    ResearchStatus, ResearchUpdate,
};
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeMap;

/// A claim mutation event.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimEvent {
    Detected {
        run_id: String,
        claim_id: String,
        candidate: ClaimCandidate,
        chunk_start_sec: f64,
        chunk_clock: String,
    },
    Researching {
        run_id: String,
        claim_id: String,
    },
    Updated {
        run_id: String,
        claim_id: String,
        update: ResearchUpdate,
    },
    OutputApproved {
        run_id: String,
        claim_id: String,
    },
    OutputRejected {
        run_id: String,
        claim_id: String,
    },
    PackageQueued {
        run_id: String,
        claim_id: String,
        claim_version: Option<u64>,
        package_id: String,
    },
    PackageReady {
        run_id: String,
        claim_id: String,
        claim_version: Option<u64>,
        package_id: String,
    },
    PackageFailed {
        run_id: String,
        claim_id: String,
        claim_version: Option<u64>,
        error: String,
    },
    RenderQueued {
        run_id: String,
        claim_id: String,
        claim_version: Option<u64>,
        render_job_id: String,
    },
    RenderReady {
        run_id: String,
        claim_id: String,
        claim_version: Option<u64>,
        render_job_id: String,
        artifact_url: String,
    },
    RenderFailed {
        run_id: String,
        claim_id: String,
        claim_version: Option<u64>,
        render_job_id: Option<String>,
        error: String,
    },
}

impl ClaimEvent {
    pub fn run_id(&self) -> &str {
        match self {
            ClaimEvent::Detected { run_id, .. }
            | ClaimEvent::Researching { run_id, .. }
            | ClaimEvent::Updated { run_id, .. }
            | ClaimEvent::OutputApproved { run_id, .. }
            | ClaimEvent::OutputRejected { run_id, .. }
            | ClaimEvent::PackageQueued { run_id, .. }
            | ClaimEvent::PackageReady { run_id, .. }
            | ClaimEvent::PackageFailed { run_id, .. }
            | ClaimEvent::RenderQueued { run_id, .. }
            | ClaimEvent::RenderReady { run_id, .. }
            | ClaimEvent::RenderFailed { run_id, .. } => run_id,
        }
    }

    pub fn claim_id(&self) -> &str {
        match self {
            ClaimEvent::Detected { claim_id, .. }
            | ClaimEvent::Researching { claim_id, .. }
            | ClaimEvent::Updated { claim_id, .. }
            | ClaimEvent::OutputApproved { claim_id, .. }
            | ClaimEvent::OutputRejected { claim_id, .. }
            | ClaimEvent::PackageQueued { claim_id, .. }
            | ClaimEvent::PackageReady { claim_id, .. }
            | ClaimEvent::PackageFailed { claim_id, .. }
            | ClaimEvent::RenderQueued { claim_id, .. }
            | ClaimEvent::RenderReady { claim_id, .. }
            | ClaimEvent::RenderFailed { claim_id, .. } => claim_id,
        }
    }

    /// Outgoing event type name.
    pub fn kind(&self) -> &'static str {
        match self {
            ClaimEvent::Detected { .. } => "claim.detected",
            ClaimEvent::Researching { .. } => "claim.researching",
            ClaimEvent::Updated { .. } => "claim.updated",
            ClaimEvent::OutputApproved { .. } => "claim.output_approved",
            ClaimEvent::OutputRejected { .. } => "claim.output_rejected",
            ClaimEvent::PackageQueued { .. } => "claim.output_package_queued",
            ClaimEvent::PackageReady { .. } => "claim.output_package_ready",
            ClaimEvent::PackageFailed { .. } => "claim.output_package_failed",
            ClaimEvent::RenderQueued { .. } => "claim.render_queued",
            ClaimEvent::RenderReady { .. } => "claim.render_ready",
            ClaimEvent::RenderFailed { .. } => "claim.render_failed",
        }
    }
}

/// Why an event did not change the store. Dropped events produce no
/// outgoing emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyError {
    UnknownClaim,
    DuplicateClaim,
    /// The claim is not approved, or the pinned version/job id does not
    /// match the event.
    DownstreamGate,
}

/// Why an operator action was refused.
#[derive(Debug, Clone, PartialEq)]
pub enum OperateError {
    NotFound,
    VersionConflict { current: u64 },
    PolicyBlocked { reason: BlockReason },
    InvalidTag,
    ReasonRequired,
    TagLockedWhileApproved,
    NotApproved,
    /// The run owner is shutting down and cannot serve the action.
    Unavailable,
}

fn iso(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// In-memory claim map keyed by claim id.
#[derive(Debug, Default)]
pub struct ClaimStore {
    claims: BTreeMap<String, Claim>,
}

impl ClaimStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, claim_id: &str) -> Option<&Claim> {
        self.claims.get(claim_id)
    }

    pub fn list(&self) -> Vec<Claim> {
        self.claims.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    /// A new run clears all claims.
    pub fn clear(&mut self) {
        self.claims.clear();
    }

    /// Apply one claim event: merge rule, version increment, policy
    /// recompute. Returns the updated snapshot for emission.
    pub fn apply(&mut self, event: &ClaimEvent, now: DateTime<Utc>) -> Result<Claim, ApplyError> {
        match event {
            ClaimEvent::Detected {
                run_id,
                claim_id,
                candidate,
                chunk_start_sec,
                chunk_clock,
            } => {
                if self.claims.contains_key(claim_id) {
                    return Err(ApplyError::DuplicateClaim);
                }
                let claim = Claim::detected(
                    claim_id.clone(),
                    run_id.clone(),
                    candidate,
                    *chunk_start_sec,
                    chunk_clock.clone(),
                );
                self.claims.insert(claim_id.clone(), claim.clone());
                Ok(claim)
            }
            ClaimEvent::Researching { claim_id, .. } => self.mutate(claim_id, |claim| {
                claim.status = ResearchStatus::Researching;
                Ok(())
            }),
            ClaimEvent::Updated {
                claim_id, update, ..
            } => self.mutate(claim_id, |claim| {
                claim.status = update.status;
                claim.google_evidence_state = update.google_state;
                claim.google_evidence_summary = update.google_summary.clone();
                claim.google_evidence_sources = update.google_sources.clone();
                if let Some(fred) = &update.fred {
                    claim.fred_evidence_state = fred.state;
                    claim.fred_evidence_summary = fred.summary.clone();
                    claim.fred_evidence_sources = fred.sources.clone();
                }
                if let Some(congress) = &update.congress {
                    claim.congress_evidence_state = congress.state;
                    claim.congress_evidence_summary = congress.summary.clone();
                    claim.congress_evidence_sources = congress.sources.clone();
                }
                claim.verdict = update.verdict;
                claim.confidence = update.confidence;
                claim.summary = update.summary.clone();
                claim.sources = update.sources.clone();

                // A content change invalidates any existing human decision:
                // an approval loses its downstream work, a rejection stops
                // being terminal.
                match claim.output_approval_state {
                    ApprovalState::Approved => {
                        claim.output_approval_state = ApprovalState::Pending;
                        claim.clear_downstream();
                    }
                    ApprovalState::Rejected => {
                        claim.output_approval_state = ApprovalState::Pending;
                        claim.rejected_at = None;
                    }
                    ApprovalState::Pending => {}
                }
                Ok(())
            }),
            ClaimEvent::OutputApproved { claim_id, .. } => {
                let approved_at = iso(now);
                self.mutate(claim_id, |claim| {
                    claim.output_approval_state = ApprovalState::Approved;
                    claim.approved_at = Some(approved_at.clone());
                    claim.rejected_at = None;
                    Ok(())
                })?;
                // approvedVersion pins the post-increment version.
                let claim = self
                    .claims
                    .get_mut(claim_id)
                    .ok_or(ApplyError::UnknownClaim)?;
                claim.approved_version = Some(claim.version);
                claim.policy = policy::evaluate(claim);
                Ok(claim.clone())
            }
            ClaimEvent::OutputRejected { claim_id, .. } => {
                let rejected_at = iso(now);
                self.mutate(claim_id, |claim| {
                    claim.output_approval_state = ApprovalState::Rejected;
                    claim.rejected_at = Some(rejected_at.clone());
                    claim.approved_at = None;
                    claim.approved_version = None;
                    Ok(())
                })
            }
            ClaimEvent::PackageQueued {
                claim_id,
                claim_version,
                package_id,
                ..
            } => self.mutate_downstream(claim_id, *claim_version, None, |claim| {
                claim.output_package_status = PackageStatus::Queued;
                claim.output_package_id = Some(package_id.clone());
                claim.output_package_error = None;
            }),
            ClaimEvent::PackageReady {
                claim_id,
                claim_version,
                package_id,
                ..
            } => self.mutate_downstream(claim_id, *claim_version, None, |claim| {
                claim.output_package_status = PackageStatus::Ready;
                claim.output_package_id = Some(package_id.clone());
                claim.output_package_error = None;
            }),
            ClaimEvent::PackageFailed {
                claim_id,
                claim_version,
                error,
                ..
            } => self.mutate_downstream(claim_id, *claim_version, None, |claim| {
                claim.output_package_status = PackageStatus::Failed;
                claim.output_package_error = Some(error.clone());
            }),
            // A queued event establishes the job id; only completions
            // must match it.
            ClaimEvent::RenderQueued {
                claim_id,
                claim_version,
                render_job_id,
                ..
            } => self.mutate_downstream(claim_id, *claim_version, None, |claim| {
                claim.render_status = RenderStatus::Queued;
                claim.render_job_id = Some(render_job_id.clone());
                claim.render_error = None;
            }),
            ClaimEvent::RenderReady {
                claim_id,
                claim_version,
                render_job_id,
                artifact_url,
                ..
            } => self.mutate_downstream(
                claim_id,
                *claim_version,
                Some(render_job_id.as_str()),
                |claim| {
                    claim.render_status = RenderStatus::Ready;
                    claim.render_job_id = Some(render_job_id.clone());
                    claim.artifact_url = Some(artifact_url.clone());
                    claim.render_error = None;
                },
            ),
            ClaimEvent::RenderFailed {
                claim_id,
                claim_version,
                render_job_id,
                error,
                ..
            } => self.mutate_downstream(
                claim_id,
                *claim_version,
                render_job_id.as_deref(),
                |claim| {
                    claim.render_status = RenderStatus::Failed;
                    claim.render_error = Some(error.clone());
                },
            ),
        }
    }

    fn mutate<F>(&mut self, claim_id: &str, f: F) -> Result<Claim, ApplyError>
    where
        F: FnOnce(&mut Claim) -> Result<(), ApplyError>,
    {
        let claim = self
            .claims
            .get_mut(claim_id)
            .ok_or(ApplyError::UnknownClaim)?;
        f(claim)?;
        claim.version += 1;
        claim.policy = policy::evaluate(claim);
        Ok(claim.clone())
    }

    /// Downstream package/render events only apply while the claim is
    /// approved and the event's pinned version matches `approvedVersion`.
    /// Render events additionally require the job id to match when both
    /// sides carry one.
    fn mutate_downstream<F>(
        &mut self,
        claim_id: &str,
        claim_version: Option<u64>,
        render_job_id: Option<&str>,
        f: F,
    ) -> Result<Claim, ApplyError>
    where
        F: FnOnce(&mut Claim),
    {
        let claim = self
            .claims
            .get_mut(claim_id)
            .ok_or(ApplyError::UnknownClaim)?;
        if claim.output_approval_state != ApprovalState::Approved {
            return Err(ApplyError::DownstreamGate);
        }
        if let Some(version) = claim_version {
            if claim.approved_version != Some(version) {
                return Err(ApplyError::DownstreamGate);
            }
        }
        if let (Some(event_job), Some(current_job)) = (render_job_id, claim.render_job_id.as_deref())
        {
            if event_job != current_job {
                return Err(ApplyError::DownstreamGate);
            }
        }
        f(claim);
        claim.version += 1;
        claim.policy = policy::evaluate(claim);
        Ok(claim.clone())
    }

    fn guarded<'a>(
        claims: &'a BTreeMap<String, Claim>,
        claim_id: &str,
        expected_version: u64,
    ) -> Result<&'a Claim, OperateError> {
        let claim = claims.get(claim_id).ok_or(OperateError::NotFound)?;
        if claim.version != expected_version {
            return Err(OperateError::VersionConflict {
                current: claim.version,
            });
        }
        Ok(claim)
    }

    /// Version- and policy-guarded approval. On success the
    /// `claim.output_approved` merge has been applied.
    pub fn approve(
        &mut self,
        claim_id: &str,
        expected_version: u64,
        now: DateTime<Utc>,
    ) -> Result<Claim, OperateError> {
        let claim = Self::guarded(&self.claims, claim_id, expected_version)?;
        let eval = policy::evaluate(claim);
        if let Some(reason) = eval.approval_block_reason {
            return Err(OperateError::PolicyBlocked { reason });
        }
        let event = ClaimEvent::OutputApproved {
            run_id: claim.run_id.clone(),
            claim_id: claim_id.to_string(),
        };
        self.apply(&event, now).map_err(|_| OperateError::NotFound)
    }

    /// Version-guarded rejection.
    pub fn reject(
        &mut self,
        claim_id: &str,
        expected_version: u64,
        now: DateTime<Utc>,
    ) -> Result<Claim, OperateError> {
        let claim = Self::guarded(&self.claims, claim_id, expected_version)?;
        let event = ClaimEvent::OutputRejected {
            run_id: claim.run_id.clone(),
            claim_id: claim_id.to_string(),
        };
        self.apply(&event, now).map_err(|_| OperateError::NotFound)
    }

    /// Manual tag override. Requires a reason, a valid tag, and a claim
    /// that is not currently approved.
    pub fn override_tag(
        &mut self,
        claim_id: &str,
        expected_version: u64,
        tag: &str,
        reason: &str,
    ) -> Result<Claim, OperateError> {
        if reason.trim().is_empty() {
            return Err(OperateError::ReasonRequired);
        }
        let tag = ClaimTypeTag::parse(tag).ok_or(OperateError::InvalidTag)?;
        let claim = Self::guarded(&self.claims, claim_id, expected_version)?;
        if claim.output_approval_state == ApprovalState::Approved {
            return Err(OperateError::TagLockedWhileApproved);
        }
        self.mutate(claim_id, |claim| {
            claim.claim_type_tag = tag;
            Ok(())
        })
        .map_err(|_| OperateError::NotFound)
    }

    /// Check that a claim is exportable at the expected version: export
    /// eligibility plus a pinned approved version.
    pub fn ensure_exportable(
        &self,
        claim_id: &str,
        expected_version: u64,
    ) -> Result<Claim, OperateError> {
        let claim = Self::guarded(&self.claims, claim_id, expected_version)?;
        let eval = policy::evaluate(claim);
        if let Some(reason) = eval.export_block_reason {
            return Err(OperateError::PolicyBlocked { reason });
        }
        if claim.approved_version.is_none() {
            return Err(OperateError::NotApproved);
        }
        Ok(claim.clone())
    }
}
