//! Bounded-concurrency research scheduler.
//!
//! One queue per run. Each claim runs its providers sequentially:
//! fact-check first, then the category provider, then the verifier.
//! Research across claims interleaves up to the concurrency limit.

use crate::claims::store::ClaimEvent;
use crate::claims::types::{
    AuxEvidence, AuxEvidenceState, Claim, ClaimCategory, ResearchStatus, ResearchUpdate,
    SourceRef, Verdict,
};
use crate::defaults::RESEARCH_CONCURRENCY_MAX;
use crate::events::hub::HubHandle;
use crate::events::EventBody;
use crate::research::economic::IndicatorSource;
use crate::research::factcheck::{FactCheckFinding, FactCheckStatus, FactChecker};
use crate::research::legislative::LegislativeSource;
use crate::research::verifier::{EvidenceBasis, Verifier, VerifierOutput};
use crate::research::EvidenceBundle;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Authoritative verdict thresholds.
const FACTCHECK_CONFIDENCE_FLOOR: f64 = 0.5;
const CONGRESS_AI_CONFIDENCE_FLOOR: f64 = 0.4;
const EVIDENCE_AI_CONFIDENCE_FLOOR: f64 = 0.5;

/// Pick the authoritative verdict from the assembled evidence.
pub fn select_verdict(
    factcheck: &FactCheckFinding,
    fred: &Option<AuxEvidence>,
    congress: &Option<AuxEvidence>,
    ai: &VerifierOutput,
) -> (Verdict, f64) {
    if factcheck.verdict != Verdict::Unverified
        && factcheck.confidence >= FACTCHECK_CONFIDENCE_FLOOR
    {
        return (factcheck.verdict, factcheck.confidence);
    }
    let matched =
        |aux: &Option<AuxEvidence>| aux.as_ref().map(|a| a.state) == Some(AuxEvidenceState::Matched);
    if matched(fred) {
        return (ai.ai_verdict, ai.ai_confidence);
    }
    if matched(congress) && ai.ai_confidence >= CONGRESS_AI_CONFIDENCE_FLOOR {
        return (ai.ai_verdict, ai.ai_confidence);
    }
    if !matches!(ai.evidence_basis, None | Some(EvidenceBasis::GeneralKnowledge))
        && ai.ai_confidence >= EVIDENCE_AI_CONFIDENCE_FLOOR
    {
        return (ai.ai_verdict, ai.ai_confidence);
    }
    (Verdict::Unverified, ai.ai_confidence)
}

fn resolve_status(
    factcheck: &FactCheckFinding,
    fred: &Option<AuxEvidence>,
    congress: &Option<AuxEvidence>,
    category: ClaimCategory,
) -> ResearchStatus {
    let matched =
        |aux: &Option<AuxEvidence>| aux.as_ref().map(|a| a.state) == Some(AuxEvidenceState::Matched);
    let mut status = match factcheck.status {
        FactCheckStatus::Researched => ResearchStatus::Researched,
        FactCheckStatus::NoMatch => {
            if matched(fred) || matched(congress) {
                ResearchStatus::Researched
            } else {
                ResearchStatus::NoMatch
            }
        }
        FactCheckStatus::NeedsManualResearch | FactCheckStatus::Error => {
            ResearchStatus::NeedsManualResearch
        }
    };
    // An economic claim without matched indicator data always goes to a
    // human.
    if category == ClaimCategory::Economic && !matched(fred) {
        status = ResearchStatus::NeedsManualResearch;
    }
    status
}

fn provider_sources(finding: &FactCheckFinding) -> Vec<SourceRef> {
    finding
        .sources
        .iter()
        .map(|s| SourceRef {
            title: s.title.clone(),
            url: s.url.clone(),
        })
        .collect()
}

/// The provider set used for one run.
#[derive(Clone)]
pub struct Providers {
    pub factchecker: Arc<dyn FactChecker>,
    pub indicators: Arc<dyn IndicatorSource>,
    pub legislative: Arc<dyn LegislativeSource>,
    pub verifier: Arc<dyn Verifier>,
}

pub struct ResearchScheduler {
    hub: HubHandle,
    providers: Providers,
    concurrency: usize,
    cancel: CancellationToken,
}

impl ResearchScheduler {
    pub fn new(
        hub: HubHandle,
        providers: Providers,
        concurrency: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            hub,
            providers,
            concurrency: concurrency.clamp(1, RESEARCH_CONCURRENCY_MAX),
            cancel,
        }
    }

    /// Run the scheduler until the queue closes or the run is cancelled.
    pub async fn run(self, mut queue: mpsc::Receiver<Claim>) {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("research scheduler cancelled");
                    return;
                }
                claim = queue.recv() => {
                    let Some(claim) = claim else { return };
                    let permit = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return,
                        permit = semaphore.clone().acquire_owned() => permit,
                    };
                    let Ok(permit) = permit else { return };
                    let hub = self.hub.clone();
                    let providers = self.providers.clone();
                    let cancel = self.cancel.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        research_one(hub, providers, cancel, claim).await;
                    });
                }
            }
        }
    }
}

/// Research a single claim end to end. Exits silently on cancellation at
/// every suspension point.
async fn research_one(
    hub: HubHandle,
    providers: Providers,
    cancel: CancellationToken,
    claim: Claim,
) {
    if cancel.is_cancelled() {
        return;
    }
    hub.emit(EventBody::Claim(ClaimEvent::Researching {
        run_id: claim.run_id.clone(),
        claim_id: claim.claim_id.clone(),
    }))
    .await;

    let factcheck = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        finding = providers.factchecker.check(&claim.claim_text) => finding,
    };

    let fred = if claim.claim_category == ClaimCategory::Economic {
        let evidence = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            evidence = providers.indicators.lookup(&claim.claim_text) => evidence,
        };
        Some(evidence)
    } else {
        None
    };

    let congress = if claim.claim_category == ClaimCategory::Political {
        let evidence = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            evidence = providers.legislative.lookup(&claim.claim_text) => evidence,
        };
        Some(evidence)
    } else {
        None
    };

    let bundle = EvidenceBundle {
        factcheck: factcheck.clone(),
        fred: fred.clone(),
        congress: congress.clone(),
    };
    let ai = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        output = providers.verifier.verify(&claim.claim_text, &bundle) => output,
    };

    let (verdict, confidence) = select_verdict(&factcheck, &fred, &congress, &ai);
    let status = resolve_status(&factcheck, &fred, &congress, claim.claim_category);

    let update = ResearchUpdate {
        status,
        google_state: factcheck.state,
        google_summary: factcheck.summary.clone(),
        google_sources: provider_sources(&factcheck),
        fred,
        congress,
        verdict,
        confidence,
        summary: ai.ai_summary.clone().or_else(|| factcheck.summary.clone()),
        sources: factcheck.sources.clone(),
    };

    if cancel.is_cancelled() {
        return;
    }
    hub.emit(EventBody::Claim(ClaimEvent::Updated {
        run_id: claim.run_id,
        claim_id: claim.claim_id,
        update,
    }))
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityHandle;
    use crate::claims::types::{ClaimCandidate, ClaimTypeTag, GoogleEvidenceState};
    use crate::events::hub;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct MockFactChecker {
        finding: FactCheckFinding,
        delay: Duration,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl MockFactChecker {
        fn new(finding: FactCheckFinding) -> Self {
            Self {
                finding,
                delay: Duration::ZERO,
                active: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl FactChecker for MockFactChecker {
        async fn check(&self, _claim_text: &str) -> FactCheckFinding {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.finding.clone()
        }
    }

    struct MockIndicators {
        evidence: AuxEvidence,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl IndicatorSource for MockIndicators {
        async fn lookup(&self, _claim_text: &str) -> AuxEvidence {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.evidence.clone()
        }
    }

    struct MockLegislative {
        evidence: AuxEvidence,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LegislativeSource for MockLegislative {
        async fn lookup(&self, _claim_text: &str) -> AuxEvidence {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.evidence.clone()
        }
    }

    struct MockVerifier {
        output: VerifierOutput,
    }

    #[async_trait]
    impl Verifier for MockVerifier {
        async fn verify(&self, _claim_text: &str, _evidence: &EvidenceBundle) -> VerifierOutput {
            self.output.clone()
        }
    }

    fn classified_factcheck(confidence: f64) -> FactCheckFinding {
        FactCheckFinding {
            status: FactCheckStatus::Researched,
            state: GoogleEvidenceState::Matched,
            verdict: Verdict::False,
            confidence,
            summary: Some("1 review".to_string()),
            sources: vec![],
        }
    }

    fn aux(state: AuxEvidenceState) -> AuxEvidence {
        AuxEvidence {
            state,
            summary: Some("data".to_string()),
            sources: vec![],
        }
    }

    fn ai(verdict: Verdict, confidence: f64, basis: Option<EvidenceBasis>) -> VerifierOutput {
        VerifierOutput {
            ai_verdict: verdict,
            ai_confidence: confidence,
            corrected_claim: None,
            ai_summary: Some("ai summary".to_string()),
            evidence_basis: basis,
        }
    }

    #[test]
    fn classified_factcheck_wins_at_half_confidence() {
        let (verdict, confidence) = select_verdict(
            &classified_factcheck(0.62),
            &None,
            &None,
            &ai(Verdict::True, 0.9, Some(EvidenceBasis::GeneralKnowledge)),
        );
        assert_eq!(verdict, Verdict::False);
        assert!((confidence - 0.62).abs() < 1e-9);
    }

    #[test]
    fn weak_factcheck_defers_to_matched_fred() {
        let (verdict, confidence) = select_verdict(
            &classified_factcheck(0.3),
            &Some(aux(AuxEvidenceState::Matched)),
            &None,
            &ai(Verdict::True, 0.8, Some(EvidenceBasis::FredData)),
        );
        assert_eq!(verdict, Verdict::True);
        assert!((confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn matched_congress_needs_minimum_ai_confidence() {
        let fc = FactCheckFinding::no_match();
        let congress = Some(aux(AuxEvidenceState::Matched));
        let low = select_verdict(
            &fc,
            &None,
            &congress,
            &ai(Verdict::True, 0.3, Some(EvidenceBasis::CongressData)),
        );
        assert_eq!(low.0, Verdict::Unverified);

        let high = select_verdict(
            &fc,
            &None,
            &congress,
            &ai(Verdict::True, 0.45, Some(EvidenceBasis::CongressData)),
        );
        assert_eq!(high.0, Verdict::True);
    }

    #[test]
    fn general_knowledge_never_carries_the_verdict() {
        let fc = FactCheckFinding::no_match();
        let (verdict, _) = select_verdict(
            &fc,
            &None,
            &None,
            &ai(Verdict::False, 0.95, Some(EvidenceBasis::GeneralKnowledge)),
        );
        assert_eq!(verdict, Verdict::Unverified);

        let (verdict, _) = select_verdict(
            &fc,
            &None,
            &None,
            &ai(Verdict::False, 0.95, Some(EvidenceBasis::Mixed)),
        );
        assert_eq!(verdict, Verdict::False);
    }

    #[test]
    fn economic_without_matched_indicator_needs_manual_research() {
        let status = resolve_status(
            &classified_factcheck(0.9),
            &Some(aux(AuxEvidenceState::Ambiguous)),
            &None,
            ClaimCategory::Economic,
        );
        assert_eq!(status, ResearchStatus::NeedsManualResearch);

        let status = resolve_status(
            &classified_factcheck(0.9),
            &Some(aux(AuxEvidenceState::Matched)),
            &None,
            ClaimCategory::Economic,
        );
        assert_eq!(status, ResearchStatus::Researched);
    }

    #[test]
    fn factcheck_error_needs_manual_research() {
        let status = resolve_status(
            &FactCheckFinding::error("boom"),
            &None,
            &None,
            ClaimCategory::General,
        );
        assert_eq!(status, ResearchStatus::NeedsManualResearch);
    }

    #[test]
    fn no_match_anywhere_is_no_match() {
        let status = resolve_status(
            &FactCheckFinding::no_match(),
            &None,
            &None,
            ClaimCategory::General,
        );
        assert_eq!(status, ResearchStatus::NoMatch);
    }

    fn test_claim(category: ClaimCategory, text: &str, id: u32) -> Claim {
        let candidate = ClaimCandidate {
            text: text.to_string(),
            score: 0.8,
            reasons: vec![],
            category,
            tag: ClaimTypeTag::NumericFactual,
            tag_confidence: 0.9,
        };
        Claim::detected(
            format!("r1-c{id:04}"),
            "r1".to_string(),
            &candidate,
            0.0,
            "00:00:00".to_string(),
        )
    }

    struct Setup {
        hub: HubHandle,
        queue_tx: mpsc::Sender<Claim>,
        indicator_calls: Arc<AtomicUsize>,
        legislative_calls: Arc<AtomicUsize>,
        cancel: CancellationToken,
    }

    async fn start_scheduler(
        factcheck: FactCheckFinding,
        fred: AuxEvidence,
        congress: AuxEvidence,
        verifier: VerifierOutput,
        concurrency: usize,
    ) -> (Setup, Arc<MockFactChecker>) {
        let hub = hub::spawn(ActivityHandle::disabled());
        hub.begin_run("r1".to_string()).await;
        let indicator_calls = Arc::new(AtomicUsize::new(0));
        let legislative_calls = Arc::new(AtomicUsize::new(0));
        let factchecker = Arc::new(MockFactChecker::new(factcheck));
        let providers = Providers {
            factchecker: factchecker.clone(),
            indicators: Arc::new(MockIndicators {
                evidence: fred,
                calls: indicator_calls.clone(),
            }),
            legislative: Arc::new(MockLegislative {
                evidence: congress,
                calls: legislative_calls.clone(),
            }),
            verifier: Arc::new(MockVerifier { output: verifier }),
        };
        let cancel = CancellationToken::new();
        let (queue_tx, queue_rx) = mpsc::channel(32);
        let scheduler = ResearchScheduler::new(hub.clone(), providers, concurrency, cancel.clone());
        tokio::spawn(scheduler.run(queue_rx));
        (
            Setup {
                hub,
                queue_tx,
                indicator_calls,
                legislative_calls,
                cancel,
            },
            factchecker,
        )
    }

    /// Seed the claim into the hub so claim.researching/updated apply.
    async fn seed(setup: &Setup, claim: &Claim) {
        let candidate = ClaimCandidate {
            text: claim.claim_text.clone(),
            score: claim.detection_score,
            reasons: claim.detection_reasons.clone(),
            category: claim.claim_category,
            tag: claim.claim_type_tag,
            tag_confidence: claim.claim_type_confidence,
        };
        let created = setup
            .hub
            .detect(vec![candidate], claim.chunk_start_sec, claim.chunk_clock.clone())
            .await;
        assert_eq!(created[0].claim_id, claim.claim_id);
    }

    #[tokio::test]
    async fn economic_claim_runs_factcheck_then_indicators() {
        let (setup, _) = start_scheduler(
            FactCheckFinding::no_match(),
            aux(AuxEvidenceState::Matched),
            aux(AuxEvidenceState::NotApplicable),
            ai(Verdict::True, 0.8, Some(EvidenceBasis::FredData)),
            3,
        )
        .await;
        let claim = test_claim(ClaimCategory::Economic, "Inflation fell to 3.1 percent.", 1);
        seed(&setup, &claim).await;
        let mut sub = setup.hub.subscribe(None).await.unwrap();

        setup.queue_tx.send(claim).await.unwrap();

        let researching = sub.live.recv().await.unwrap();
        assert_eq!(researching.event, "claim.researching");
        let updated = sub.live.recv().await.unwrap();
        assert_eq!(updated.event, "claim.updated");
        assert_eq!(updated.data["claim"]["status"], "researched");
        assert_eq!(updated.data["claim"]["verdict"], "true");
        assert_eq!(updated.data["claim"]["fredEvidenceState"], "matched");

        assert_eq!(setup.indicator_calls.load(Ordering::SeqCst), 1);
        assert_eq!(setup.legislative_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn political_claim_consults_legislative_evidence() {
        let (setup, _) = start_scheduler(
            FactCheckFinding::no_match(),
            aux(AuxEvidenceState::NotApplicable),
            aux(AuxEvidenceState::Matched),
            ai(Verdict::True, 0.55, Some(EvidenceBasis::CongressData)),
            3,
        )
        .await;
        let claim = test_claim(
            ClaimCategory::Political,
            "Congress passed the infrastructure bill.",
            1,
        );
        seed(&setup, &claim).await;
        let mut sub = setup.hub.subscribe(None).await.unwrap();

        setup.queue_tx.send(claim).await.unwrap();

        let _researching = sub.live.recv().await.unwrap();
        let updated = sub.live.recv().await.unwrap();
        assert_eq!(updated.data["claim"]["congressEvidenceState"], "matched");
        assert_eq!(updated.data["claim"]["verdict"], "true");
        assert_eq!(setup.legislative_calls.load(Ordering::SeqCst), 1);
        assert_eq!(setup.indicator_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn economic_claim_without_data_downgrades_to_manual() {
        let (setup, _) = start_scheduler(
            classified_factcheck(0.9),
            aux(AuxEvidenceState::Ambiguous),
            aux(AuxEvidenceState::NotApplicable),
            ai(Verdict::True, 0.8, None),
            3,
        )
        .await;
        let claim = test_claim(ClaimCategory::Economic, "Inflation fell to 3.1 percent.", 1);
        seed(&setup, &claim).await;
        let mut sub = setup.hub.subscribe(None).await.unwrap();

        setup.queue_tx.send(claim).await.unwrap();

        let _researching = sub.live.recv().await.unwrap();
        let updated = sub.live.recv().await.unwrap();
        assert_eq!(updated.data["claim"]["status"], "needs_manual_research");
        // The classified fact-check verdict still carries.
        assert_eq!(updated.data["claim"]["verdict"], "false");
    }

    #[tokio::test]
    async fn cancelled_run_emits_nothing() {
        let (setup, _) = start_scheduler(
            FactCheckFinding::no_match(),
            aux(AuxEvidenceState::NotApplicable),
            aux(AuxEvidenceState::NotApplicable),
            ai(Verdict::True, 0.8, None),
            3,
        )
        .await;
        let claim = test_claim(ClaimCategory::General, "Some general claim text here.", 1);
        seed(&setup, &claim).await;
        let mut sub = setup.hub.subscribe(None).await.unwrap();

        setup.cancel.cancel();
        let _ = setup.queue_tx.send(claim).await;

        let result = tokio::time::timeout(Duration::from_millis(200), sub.live.recv()).await;
        assert!(result.is_err(), "no research events after cancellation");
    }

    #[tokio::test]
    async fn concurrency_stays_within_the_limit() {
        let hub = hub::spawn(ActivityHandle::disabled());
        hub.begin_run("r1".to_string()).await;
        let factchecker = Arc::new(
            MockFactChecker::new(FactCheckFinding::no_match())
                .with_delay(Duration::from_millis(40)),
        );
        let providers = Providers {
            factchecker: factchecker.clone(),
            indicators: Arc::new(MockIndicators {
                evidence: aux(AuxEvidenceState::NotApplicable),
                calls: Arc::new(AtomicUsize::new(0)),
            }),
            legislative: Arc::new(MockLegislative {
                evidence: aux(AuxEvidenceState::NotApplicable),
                calls: Arc::new(AtomicUsize::new(0)),
            }),
            verifier: Arc::new(MockVerifier {
                output: ai(Verdict::Unverified, 0.0, None),
            }),
        };
        let cancel = CancellationToken::new();
        let (queue_tx, queue_rx) = mpsc::channel(32);
        let scheduler = ResearchScheduler::new(hub.clone(), providers, 2, cancel);
        tokio::spawn(scheduler.run(queue_rx));

        for i in 0..6 {
            let claim = test_claim(ClaimCategory::General, "Some general claim text here.", i);
            queue_tx.send(claim).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(factchecker.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn concurrency_is_clamped_into_range() {
        let hub = hub::spawn(ActivityHandle::disabled());
        let providers = Providers {
            factchecker: Arc::new(MockFactChecker::new(FactCheckFinding::no_match())),
            indicators: Arc::new(MockIndicators {
                evidence: aux(AuxEvidenceState::NotApplicable),
                calls: Arc::new(AtomicUsize::new(0)),
            }),
            legislative: Arc::new(MockLegislative {
                evidence: aux(AuxEvidenceState::NotApplicable),
                calls: Arc::new(AtomicUsize::new(0)),
            }),
            verifier: Arc::new(MockVerifier {
                output: ai(Verdict::Unverified, 0.0, None),
            }),
        };
        let scheduler =
            ResearchScheduler::new(hub.clone(), providers.clone(), 25, CancellationToken::new());
        assert_eq!(scheduler.concurrency, RESEARCH_CONCURRENCY_MAX);
        let scheduler = ResearchScheduler::new(hub, providers, 0, CancellationToken::new());
        assert_eq!(scheduler.concurrency, 1);
    }
}
