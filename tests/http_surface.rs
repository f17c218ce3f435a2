//! End-to-end coverage of the HTTP control surface over a real socket.

use async_trait::async_trait;
use factline::activity::ActivityHandle;
use factline::approval::ApprovalOrchestrator;
use factline::claims::store::ClaimEvent;
use factline::claims::types::{
    AuxEvidence, AuxEvidenceState, Claim, ClaimCandidate, ClaimCategory, ClaimTypeTag,
    GoogleEvidenceState, ResearchStatus, ResearchUpdate, Verdict, VerdictSource,
};
use factline::config::Config;
use factline::events::hub::{self, HubHandle};
use factline::events::EventBody;
use factline::outputs::render::RenderService;
use factline::research::economic::IndicatorSource;
use factline::research::factcheck::{FactCheckFinding, FactChecker};
use factline::research::legislative::LegislativeSource;
use factline::research::scheduler::Providers;
use factline::research::verifier::{Verifier, VerifierOutput};
use factline::research::EvidenceBundle;
use factline::run::RunController;
use factline::server::auth::{AuthConfig, RateLimiter};
use factline::server::{router, AppState};
use factline::transcript::client::MockTranscriber;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

struct NullFactChecker;
#[async_trait]
impl FactChecker for NullFactChecker {
    async fn check(&self, _claim_text: &str) -> FactCheckFinding {
        FactCheckFinding::no_match()
    }
}

struct NullAux;
#[async_trait]
impl IndicatorSource for NullAux {
    async fn lookup(&self, _claim_text: &str) -> AuxEvidence {
        AuxEvidence {
            state: AuxEvidenceState::NotApplicable,
            summary: None,
            sources: vec![],
        }
    }
}
#[async_trait]
impl LegislativeSource for NullAux {
    async fn lookup(&self, _claim_text: &str) -> AuxEvidence {
        AuxEvidence {
            state: AuxEvidenceState::NotApplicable,
            summary: None,
            sources: vec![],
        }
    }
}

struct NullVerifier;
#[async_trait]
impl Verifier for NullVerifier {
    async fn verify(&self, _claim_text: &str, _evidence: &EvidenceBundle) -> VerifierOutput {
        VerifierOutput::fallback()
    }
}

fn null_providers() -> Providers {
    Providers {
        factchecker: Arc::new(NullFactChecker),
        indicators: Arc::new(NullAux),
        legislative: Arc::new(NullAux),
        verifier: Arc::new(NullVerifier),
    }
}

fn test_config(password: Option<&str>, rate_limit: u32) -> Config {
    let mut config = Config::default();
    config.server.control_password = password.map(|p| p.to_string());
    config.server.rate_limit_per_minute = rate_limit;
    config.ingest.extractor_bin = "sh".to_string();
    config.ingest.extractor_args = vec!["-c".to_string(), "sleep 3".to_string()];
    config.ingest.decoder_bin = "cat".to_string();
    config.ingest.decoder_args = vec![];
    config.ingest.reconnect = false;
    config
}

struct TestApp {
    base: String,
    hub: HubHandle,
    client: reqwest::Client,
    _artifacts: tempfile::TempDir,
}

async fn spawn_app(config: Config) -> TestApp {
    let artifacts = tempfile::tempdir().unwrap();
    let mut config = config;
    config.outputs.artifact_dir = artifacts.path().to_path_buf();
    let config = Arc::new(config);

    let hub = hub::spawn(ActivityHandle::disabled());
    let controller = Arc::new(RunController::new(
        config.clone(),
        hub.clone(),
        Arc::new(MockTranscriber::new("test-model")),
        null_providers(),
        ActivityHandle::disabled(),
    ));
    let render = Arc::new(RenderService::new(&config.outputs));
    let orchestrator =
        ApprovalOrchestrator::new(hub.clone(), render, ActivityHandle::disabled());
    let state = AppState {
        controller,
        hub: hub.clone(),
        orchestrator,
        auth: Arc::new(AuthConfig {
            control_password: config.server.control_password.clone(),
            protect_reads: config.server.protect_reads,
        }),
        limiter: Arc::new(RateLimiter::new(config.server.rate_limit_per_minute)),
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            router(state).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestApp {
        base: format!("http://{addr}"),
        hub,
        client: reqwest::Client::new(),
        _artifacts: artifacts,
    }
}

fn eligible_update(confidence: f64) -> ResearchUpdate {
    ResearchUpdate {
        status: ResearchStatus::Researched,
        google_state: GoogleEvidenceState::Matched,
        google_summary: Some("2 reviews".to_string()),
        google_sources: vec![],
        fred: None,
        congress: None,
        verdict: Verdict::True,
        confidence,
        summary: Some("supported".to_string()),
        sources: vec![
            VerdictSource {
                publisher: "AP".to_string(),
                title: "review".to_string(),
                url: "https://ap.example/1".to_string(),
                textual_rating: "True".to_string(),
                review_date: None,
            },
            VerdictSource {
                publisher: "Reuters".to_string(),
                title: "review".to_string(),
                url: "https://reuters.example/2".to_string(),
                textual_rating: "True".to_string(),
                review_date: None,
            },
        ],
    }
}

/// Seed one researched claim into the hub and return its snapshot.
async fn seed_claim(app: &TestApp, confidence: f64) -> Claim {
    app.hub.begin_run("r1".to_string()).await;
    let candidate = ClaimCandidate {
        text: "Inflation fell to 3.1 percent in 2024.".to_string(),
        score: 0.8,
        reasons: vec![],
        category: ClaimCategory::General,
        tag: ClaimTypeTag::NumericFactual,
        tag_confidence: 0.9,
    };
    let created = app
        .hub
        .detect(vec![candidate], 15.0, "13:00:15".to_string())
        .await;
    let claim = created.into_iter().next().unwrap();
    app.hub
        .emit(EventBody::Claim(ClaimEvent::Updated {
            run_id: "r1".to_string(),
            claim_id: claim.claim_id.clone(),
            update: eligible_update(confidence),
        }))
        .await;
    app.hub.get_claim(claim.claim_id).await.unwrap()
}

#[tokio::test]
async fn claims_endpoint_lists_snapshots() {
    let app = spawn_app(test_config(None, 60)).await;
    let claim = seed_claim(&app, 0.9).await;

    let response = app
        .client
        .get(format!("{}/claims", app.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["ok"], true);
    assert_eq!(body["running"], false);
    assert_eq!(body["runId"], "r1");
    assert_eq!(body["claims"][0]["claimId"], claim.claim_id);
}

#[tokio::test]
async fn start_rejects_invalid_urls() {
    let app = spawn_app(test_config(None, 60)).await;
    let response = app
        .client
        .post(format!("{}/start", app.base))
        .json(&json!({ "youtubeUrl": "not a url" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn start_stop_lifecycle_and_conflict() {
    let app = spawn_app(test_config(None, 60)).await;

    let response = app
        .client
        .post(format!("{}/start", app.base))
        .json(&json!({ "youtubeUrl": "https://stream.example/live" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["ok"], true);
    assert!(body["runId"].as_str().unwrap().starts_with("run-"));

    let second = app
        .client
        .post(format!("{}/start", app.base))
        .json(&json!({ "youtubeUrl": "https://stream.example/live" }))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 409);

    let stop = app
        .client
        .post(format!("{}/stop", app.base))
        .send()
        .await
        .unwrap();
    assert_eq!(stop.status(), 200);
    let body: Value = stop.json().await.unwrap();
    assert_eq!(body["running"], false);
}

#[tokio::test]
async fn control_password_is_enforced() {
    let app = spawn_app(test_config(Some("hunter2"), 60)).await;

    let denied = app
        .client
        .post(format!("{}/stop", app.base))
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), 401);

    let with_header = app
        .client
        .post(format!("{}/stop", app.base))
        .header("x-control-key", "hunter2")
        .send()
        .await
        .unwrap();
    assert_eq!(with_header.status(), 200);

    let with_query = app
        .client
        .post(format!("{}/stop?controlKey=hunter2", app.base))
        .send()
        .await
        .unwrap();
    assert_eq!(with_query.status(), 200);

    // Reads stay open unless protected.
    let read = app
        .client
        .get(format!("{}/claims", app.base))
        .send()
        .await
        .unwrap();
    assert_eq!(read.status(), 200);
}

#[tokio::test]
async fn rate_limit_caps_requests_per_route() {
    let app = spawn_app(test_config(None, 2)).await;
    for _ in 0..2 {
        let ok = app
            .client
            .get(format!("{}/claims", app.base))
            .send()
            .await
            .unwrap();
        assert_eq!(ok.status(), 200);
    }
    let limited = app
        .client
        .get(format!("{}/claims", app.base))
        .send()
        .await
        .unwrap();
    assert_eq!(limited.status(), 429);
}

#[tokio::test]
async fn unknown_claims_return_404() {
    let app = spawn_app(test_config(None, 60)).await;
    app.hub.begin_run("r1".to_string()).await;
    let response = app
        .client
        .post(format!("{}/claims/r1-c9999/approve-output", app.base))
        .json(&json!({ "expectedVersion": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn stale_versions_conflict_with_current_version() {
    let app = spawn_app(test_config(None, 60)).await;
    let claim = seed_claim(&app, 0.9).await;

    let response = app
        .client
        .post(format!("{}/claims/{}/approve-output", app.base, claim.claim_id))
        .json(&json!({ "expectedVersion": claim.version + 7 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "version_conflict");
    assert_eq!(body["currentVersion"], claim.version);
}

#[tokio::test]
async fn below_threshold_approval_is_blocked() {
    let app = spawn_app(test_config(None, 60)).await;
    // numeric_factual threshold is 0.60; 0.55 with two sources blocks.
    let claim = seed_claim(&app, 0.55).await;

    let response = app
        .client
        .post(format!("{}/claims/{}/approve-output", app.base, claim.claim_id))
        .json(&json!({ "expectedVersion": claim.version }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "policy_blocked");
    assert_eq!(body["reason"], "below_threshold");
}

#[tokio::test]
async fn approve_returns_claim_package_and_render_job() {
    let app = spawn_app(test_config(None, 60)).await;
    let claim = seed_claim(&app, 0.9).await;

    let response = app
        .client
        .post(format!("{}/claims/{}/approve-output", app.base, claim.claim_id))
        .json(&json!({ "expectedVersion": claim.version }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["ok"], true);
    assert_eq!(body["claim"]["outputApprovalState"], "approved");
    assert_eq!(
        body["package"]["claimVersion"],
        body["claim"]["approvedVersion"]
    );
    assert!(body["renderJob"]["renderJobId"]
        .as_str()
        .unwrap()
        .starts_with("render-"));
}

#[tokio::test]
async fn tag_override_validates_tag_and_reason() {
    let app = spawn_app(test_config(None, 60)).await;
    let claim = seed_claim(&app, 0.9).await;

    let bad_tag = app
        .client
        .post(format!("{}/claims/{}/tag-override", app.base, claim.claim_id))
        .json(&json!({ "expectedVersion": claim.version, "tag": "bogus", "reason": "r" }))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_tag.status(), 400);

    let missing_reason = app
        .client
        .post(format!("{}/claims/{}/tag-override", app.base, claim.claim_id))
        .json(&json!({ "expectedVersion": claim.version, "tag": "simple_policy" }))
        .send()
        .await
        .unwrap();
    assert_eq!(missing_reason.status(), 400);

    let ok = app
        .client
        .post(format!("{}/claims/{}/tag-override", app.base, claim.claim_id))
        .json(&json!({
            "expectedVersion": claim.version,
            "tag": "simple_policy",
            "reason": "operator call",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status(), 200);
    let body: Value = ok.json().await.unwrap();
    assert_eq!(body["claim"]["claimTypeTag"], "simple_policy");
}

#[tokio::test]
async fn event_stream_replays_history_with_snapshot_embeds() {
    let app = spawn_app(test_config(None, 60)).await;
    let claim = seed_claim(&app, 0.9).await;

    let response = app
        .client
        .get(format!("{}/events", app.base))
        .header("Last-Event-ID", "0")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let mut response = response;
    let mut body = String::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(500), response.chunk()).await {
            Ok(Ok(Some(chunk))) => {
                body.push_str(&String::from_utf8_lossy(&chunk));
                if body.contains("claim.updated") {
                    break;
                }
            }
            _ => break,
        }
    }
    assert!(body.contains("claim.detected"), "body: {body}");
    assert!(body.contains("claim.updated"));
    assert!(body.contains(&claim.claim_id));
    assert!(body.contains("id:"));
}
