//! Approval/export orchestration.
//!
//! Coordinates operator actions with the policy-checked, version-guarded
//! mutations in the hub, then triggers the package and render
//! collaborators pinned to the approved version.

use crate::activity::{ActivityHandle, ActivityRecord};
use crate::claims::store::{ClaimEvent, OperateError};
use crate::claims::types::Claim;
use crate::events::hub::HubHandle;
use crate::events::EventBody;
use crate::outputs::package::{build_package, OutputPackage};
use crate::outputs::render::{RenderJob, RenderService};
use chrono::{SecondsFormat, Utc};
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct ApprovalOrchestrator {
    hub: HubHandle,
    render: Arc<RenderService>,
    activity: ActivityHandle,
}

impl ApprovalOrchestrator {
    pub fn new(hub: HubHandle, render: Arc<RenderService>, activity: ActivityHandle) -> Self {
        Self {
            hub,
            render,
            activity,
        }
    }

    fn log_action(&self, run_id: &str, action: &str, claim_id: &str, detail: Option<String>) {
        self.activity.record(ActivityRecord::Action {
            run_id: run_id.to_string(),
            action: action.to_string(),
            claim_id: Some(claim_id.to_string()),
            detail,
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        });
    }

    /// Emit the package events for a freshly built package, pinned to its
    /// claim version.
    async fn publish_package(&self, package: &OutputPackage) {
        self.hub
            .emit(EventBody::Claim(ClaimEvent::PackageQueued {
                run_id: package.run_id.clone(),
                claim_id: package.claim_id.clone(),
                claim_version: Some(package.claim_version),
                package_id: package.package_id.clone(),
            }))
            .await;
        self.hub
            .emit(EventBody::Claim(ClaimEvent::PackageReady {
                run_id: package.run_id.clone(),
                claim_id: package.claim_id.clone(),
                claim_version: Some(package.claim_version),
                package_id: package.package_id.clone(),
            }))
            .await;
    }

    /// Queue a render, emit `claim.render_queued`, and complete it in the
    /// background, emitting `claim.render_ready` or `claim.render_failed`
    /// pinned to the same version and job id.
    async fn start_render(
        &self,
        claim: &Claim,
        package: &OutputPackage,
        force: bool,
        force_nonce: Option<String>,
    ) -> RenderJob {
        let (job, fresh) = self.render.queue(claim, package, force, force_nonce).await;
        self.hub
            .emit(EventBody::Claim(ClaimEvent::RenderQueued {
                run_id: job.run_id.clone(),
                claim_id: job.claim_id.clone(),
                claim_version: Some(job.claim_version),
                render_job_id: job.render_job_id.clone(),
            }))
            .await;
        if !fresh {
            return job;
        }

        let hub = self.hub.clone();
        let render = self.render.clone();
        let package = package.clone();
        let queued = job.clone();
        tokio::spawn(async move {
            let done = render.execute(queued, &package).await;
            let event = match done.status {
                crate::claims::types::RenderStatus::Ready => ClaimEvent::RenderReady {
                    run_id: done.run_id.clone(),
                    claim_id: done.claim_id.clone(),
                    claim_version: Some(done.claim_version),
                    render_job_id: done.render_job_id.clone(),
                    artifact_url: done.artifact_url.clone().unwrap_or_default(),
                },
                _ => ClaimEvent::RenderFailed {
                    run_id: done.run_id.clone(),
                    claim_id: done.claim_id.clone(),
                    claim_version: Some(done.claim_version),
                    render_job_id: Some(done.render_job_id.clone()),
                    error: done
                        .error
                        .clone()
                        .unwrap_or_else(|| "render failed".to_string()),
                },
            };
            hub.emit(EventBody::Claim(event)).await;
        });
        job
    }

    async fn latest(&self, claim_id: &str, fallback: Claim) -> Claim {
        self.hub
            .get_claim(claim_id.to_string())
            .await
            .unwrap_or(fallback)
    }

    /// Approve a claim and trigger package + render pinned to the new
    /// approved version.
    pub async fn approve_output(
        &self,
        claim_id: &str,
        expected_version: u64,
        reason: Option<String>,
    ) -> Result<(Claim, OutputPackage, RenderJob), OperateError> {
        let approved = self
            .hub
            .approve(claim_id.to_string(), expected_version)
            .await?;
        self.log_action(&approved.run_id, "approve-output", claim_id, reason);

        let package = build_package(&approved).map_err(|e| {
            debug!("package build failed after approval: {e}");
            OperateError::NotApproved
        })?;
        self.publish_package(&package).await;
        let job = self.start_render(&approved, &package, false, None).await;

        Ok((self.latest(claim_id, approved).await, package, job))
    }

    /// Reject a claim's output for its current version.
    pub async fn reject_output(
        &self,
        claim_id: &str,
        expected_version: u64,
        reason: Option<String>,
    ) -> Result<Claim, OperateError> {
        let rejected = self
            .hub
            .reject(claim_id.to_string(), expected_version)
            .await?;
        self.log_action(&rejected.run_id, "reject-output", claim_id, reason);
        Ok(rejected)
    }

    /// (Re)generate the package for an exportable claim.
    pub async fn generate_package(
        &self,
        claim_id: &str,
        expected_version: u64,
        reason: Option<String>,
    ) -> Result<(Claim, OutputPackage), OperateError> {
        let exportable = self
            .hub
            .ensure_exportable(claim_id.to_string(), expected_version)
            .await?;
        self.log_action(&exportable.run_id, "generate-package", claim_id, reason);

        let package = build_package(&exportable).map_err(|_| OperateError::NotApproved)?;
        self.publish_package(&package).await;
        Ok((self.latest(claim_id, exportable).await, package))
    }

    /// Queue a render for an exportable claim; `force` bypasses the
    /// idempotent reuse of a prior job.
    pub async fn render_image(
        &self,
        claim_id: &str,
        expected_version: u64,
        force: bool,
        force_nonce: Option<String>,
    ) -> Result<(Claim, OutputPackage, RenderJob), OperateError> {
        let exportable = self
            .hub
            .ensure_exportable(claim_id.to_string(), expected_version)
            .await?;
        self.log_action(
            &exportable.run_id,
            "render-image",
            claim_id,
            force.then(|| "forced".to_string()),
        );

        let package = build_package(&exportable).map_err(|_| OperateError::NotApproved)?;
        self.publish_package(&package).await;
        let job = self
            .start_render(&exportable, &package, force, force_nonce)
            .await;
        Ok((self.latest(claim_id, exportable).await, package, job))
    }

    /// Manual tag override with a required reason.
    pub async fn tag_override(
        &self,
        claim_id: &str,
        expected_version: u64,
        tag: &str,
        reason: &str,
    ) -> Result<Claim, OperateError> {
        let updated = self
            .hub
            .override_tag(
                claim_id.to_string(),
                expected_version,
                tag.to_string(),
                reason.to_string(),
            )
            .await?;
        self.log_action(
            &updated.run_id,
            "tag-override",
            claim_id,
            Some(format!("{tag}: {reason}")),
        );
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityHandle;
    use crate::claims::policy::BlockReason;
    use crate::claims::store::ClaimEvent;
    use crate::claims::types::{
        ApprovalState, AuxEvidence, AuxEvidenceState, ClaimCandidate, ClaimCategory,
        ClaimTypeTag, GoogleEvidenceState, PackageStatus, RenderStatus, ResearchStatus,
        ResearchUpdate, Verdict, VerdictSource,
    };
    use crate::config::OutputsConfig;
    use crate::events::hub;
    use std::time::Duration;

    struct Rig {
        hub: HubHandle,
        orchestrator: ApprovalOrchestrator,
        _dir: tempfile::TempDir,
    }

    async fn rig() -> Rig {
        let hub = hub::spawn(ActivityHandle::disabled());
        hub.begin_run("r1".to_string()).await;
        let dir = tempfile::tempdir().unwrap();
        let outputs = OutputsConfig {
            render_endpoint: None,
            render_timeout_ms: 500,
            render_attempts: 1,
            artifact_dir: dir.path().to_path_buf(),
            activity_log: None,
        };
        let render = Arc::new(RenderService::new(&outputs));
        let orchestrator =
            ApprovalOrchestrator::new(hub.clone(), render, ActivityHandle::disabled());
        Rig {
            hub,
            orchestrator,
            _dir: dir,
        }
    }

    async fn researched_claim(rig: &Rig) -> Claim {
        let candidate = ClaimCandidate {
            text: "Inflation fell to 3.1 percent in 2024.".to_string(),
            score: 0.8,
            reasons: vec![],
            category: ClaimCategory::Economic,
            tag: ClaimTypeTag::NumericFactual,
            tag_confidence: 0.9,
        };
        let created = rig
            .hub
            .detect(vec![candidate], 15.0, "13:00:15".to_string())
            .await;
        let claim = created.into_iter().next().unwrap();
        let update = ResearchUpdate {
            status: ResearchStatus::Researched,
            google_state: GoogleEvidenceState::Matched,
            google_summary: Some("1 review".to_string()),
            google_sources: vec![],
            fred: Some(AuxEvidence {
                state: AuxEvidenceState::Matched,
                summary: Some("CPI: 3.1 (2024-12-01)".to_string()),
                sources: vec![],
            }),
            congress: None,
            verdict: Verdict::True,
            confidence: 0.9,
            summary: Some("supported".to_string()),
            sources: vec![VerdictSource {
                publisher: "AP".to_string(),
                title: "review".to_string(),
                url: "https://ap.example/1".to_string(),
                textual_rating: "True".to_string(),
                review_date: None,
            }],
        };
        rig.hub
            .emit(EventBody::Claim(ClaimEvent::Updated {
                run_id: "r1".to_string(),
                claim_id: claim.claim_id.clone(),
                update,
            }))
            .await;
        rig.hub.get_claim(claim.claim_id).await.unwrap()
    }

    async fn wait_for_event(
        sub: &mut crate::events::hub::Subscription,
        kind: &str,
    ) -> std::sync::Arc<crate::events::Envelope> {
        loop {
            let envelope = tokio::time::timeout(Duration::from_secs(5), sub.live.recv())
                .await
                .expect("event timeout")
                .expect("stream closed");
            if envelope.event == kind {
                return envelope;
            }
        }
    }

    #[tokio::test]
    async fn approve_triggers_package_and_render_pinned_to_version() {
        let rig = rig().await;
        let claim = researched_claim(&rig).await;
        let mut sub = rig.hub.subscribe(None).await.unwrap();

        let (approved, package, job) = rig
            .orchestrator
            .approve_output(&claim.claim_id, claim.version, None)
            .await
            .unwrap();

        assert_eq!(package.claim_version, job.claim_version);
        assert_eq!(job.status, RenderStatus::Queued);

        let ready = wait_for_event(&mut sub, "claim.render_ready").await;
        assert_eq!(ready.data["renderJobId"], job.render_job_id);
        assert_eq!(
            ready.data["claimVersion"].as_u64(),
            approved.approved_version
        );

        let final_claim = rig.hub.get_claim(claim.claim_id).await.unwrap();
        assert_eq!(final_claim.output_approval_state, ApprovalState::Approved);
        assert_eq!(final_claim.output_package_status, PackageStatus::Ready);
        assert_eq!(final_claim.render_status, RenderStatus::Ready);
        assert!(final_claim.artifact_url.is_some());
    }

    #[tokio::test]
    async fn approve_with_stale_version_conflicts() {
        let rig = rig().await;
        let claim = researched_claim(&rig).await;
        let result = rig
            .orchestrator
            .approve_output(&claim.claim_id, claim.version + 1, None)
            .await;
        assert!(matches!(
            result,
            Err(OperateError::VersionConflict { current }) if current == claim.version
        ));
    }

    #[tokio::test]
    async fn approve_blocked_by_policy_reports_reason() {
        let rig = rig().await;
        // Detected but never researched.
        let candidate = ClaimCandidate {
            text: "The deficit doubled to 2 trillion dollars.".to_string(),
            score: 0.8,
            reasons: vec![],
            category: ClaimCategory::Economic,
            tag: ClaimTypeTag::NumericFactual,
            tag_confidence: 0.9,
        };
        let created = rig
            .hub
            .detect(vec![candidate], 0.0, "13:00:00".to_string())
            .await;
        let claim = &created[0];

        let result = rig
            .orchestrator
            .approve_output(&claim.claim_id, claim.version, None)
            .await;
        assert!(matches!(
            result,
            Err(OperateError::PolicyBlocked {
                reason: BlockReason::StillResearching
            })
        ));
    }

    #[tokio::test]
    async fn generate_package_requires_approval_first() {
        let rig = rig().await;
        let claim = researched_claim(&rig).await;

        let blocked = rig
            .orchestrator
            .generate_package(&claim.claim_id, claim.version, None)
            .await;
        assert!(matches!(
            blocked,
            Err(OperateError::PolicyBlocked {
                reason: BlockReason::NotApproved
            })
        ));

        let mut sub = rig.hub.subscribe(None).await.unwrap();
        let (approved, _, _) = rig
            .orchestrator
            .approve_output(&claim.claim_id, claim.version, None)
            .await
            .unwrap();

        // Let the background render settle so the version stops moving.
        wait_for_event(&mut sub, "claim.render_ready").await;
        let current = rig.hub.get_claim(claim.claim_id.clone()).await.unwrap();

        let (claim_after, package) = rig
            .orchestrator
            .generate_package(&current.claim_id, current.version, None)
            .await
            .unwrap();
        assert_eq!(package.claim_version, approved.approved_version.unwrap());
        assert_eq!(claim_after.output_package_status, PackageStatus::Ready);
    }

    #[tokio::test]
    async fn forced_render_creates_a_new_job() {
        let rig = rig().await;
        let claim = researched_claim(&rig).await;
        let (approved, _, first_job) = rig
            .orchestrator
            .approve_output(&claim.claim_id, claim.version, None)
            .await
            .unwrap();

        // Wait for the first render to settle before re-rendering.
        let mut sub = rig.hub.subscribe(None).await.unwrap();
        let current = rig.hub.get_claim(claim.claim_id.clone()).await.unwrap();
        let current = if current.render_status == RenderStatus::Ready {
            current
        } else {
            wait_for_event(&mut sub, "claim.render_ready").await;
            rig.hub.get_claim(claim.claim_id.clone()).await.unwrap()
        };

        let (_, _, forced) = rig
            .orchestrator
            .render_image(
                &approved.claim_id,
                current.version,
                true,
                Some("nonce9".to_string()),
            )
            .await
            .unwrap();
        assert_ne!(forced.render_job_id, first_job.render_job_id);
        assert!(forced.idempotency_key.ends_with(":force:nonce9"));
    }

    #[tokio::test]
    async fn reject_and_tag_override_flow() {
        let rig = rig().await;
        let claim = researched_claim(&rig).await;

        let overridden = rig
            .orchestrator
            .tag_override(&claim.claim_id, claim.version, "simple_policy", "operator call")
            .await
            .unwrap();
        assert_eq!(overridden.claim_type_tag, ClaimTypeTag::SimplePolicy);

        let rejected = rig
            .orchestrator
            .reject_output(&overridden.claim_id, overridden.version, None)
            .await
            .unwrap();
        assert_eq!(rejected.output_approval_state, ApprovalState::Rejected);
    }
}
