//! Render service.
//!
//! Queues render jobs keyed by an idempotency key, retries failed remote
//! renders with linear backoff, and falls back to a deterministic local
//! placeholder artifact when no remote endpoint is configured.

use crate::claims::types::{Claim, RenderStatus};
use crate::config::OutputsConfig;
use crate::defaults::RENDER_TEMPLATE_ID;
use crate::outputs::package::OutputPackage;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const RETRY_BACKOFF_MS: u64 = 250;

/// A render job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderJob {
    pub render_job_id: String,
    pub claim_id: String,
    pub run_id: String,
    pub claim_version: u64,
    pub idempotency_key: String,
    pub status: RenderStatus,
    pub attempts: u32,
    pub artifact_url: Option<String>,
    pub error: Option<String>,
}

/// Build the idempotency key for a render request.
pub fn idempotency_key(claim_id: &str, claim_version: u64, force_nonce: Option<&str>) -> String {
    match force_nonce {
        Some(nonce) => format!("{claim_id}:{claim_version}:{RENDER_TEMPLATE_ID}:force:{nonce}"),
        None => format!("{claim_id}:{claim_version}:{RENDER_TEMPLATE_ID}"),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteRenderResponse {
    artifact_url: String,
}

pub struct RenderService {
    endpoint: Option<String>,
    attempts_cap: u32,
    artifact_dir: PathBuf,
    client: reqwest::Client,
    jobs: Mutex<HashMap<String, RenderJob>>,
    counter: AtomicU64,
}

impl RenderService {
    pub fn new(config: &OutputsConfig) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_millis(config.render_timeout_ms))
            .build()
            .unwrap_or_default();
        Self {
            endpoint: config.render_endpoint.clone(),
            attempts_cap: config.render_attempts.max(1),
            artifact_dir: config.artifact_dir.clone(),
            client,
            jobs: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(0),
        }
    }

    /// Queue a render for an approved claim+package. Non-forced requests
    /// reuse a prior non-failed job for the same key. Returns the job and
    /// whether it is fresh work the caller must [`Self::execute`].
    pub async fn queue(
        &self,
        claim: &Claim,
        package: &OutputPackage,
        force: bool,
        force_nonce: Option<String>,
    ) -> (RenderJob, bool) {
        let nonce = if force {
            Some(force_nonce.unwrap_or_else(|| format!("{:08x}", rand::thread_rng().gen::<u32>())))
        } else {
            None
        };
        let key = idempotency_key(&claim.claim_id, package.claim_version, nonce.as_deref());

        let mut jobs = self.jobs.lock().await;
        if !force {
            if let Some(existing) = jobs.get(&key) {
                if existing.status != RenderStatus::Failed {
                    debug!(%key, "reusing render job");
                    return (existing.clone(), false);
                }
            }
        }

        let id = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let job = RenderJob {
            render_job_id: format!("render-{id:04}"),
            claim_id: claim.claim_id.clone(),
            run_id: claim.run_id.clone(),
            claim_version: package.claim_version,
            idempotency_key: key.clone(),
            status: RenderStatus::Queued,
            attempts: 0,
            artifact_url: None,
            error: None,
        };
        jobs.insert(key, job.clone());
        (job, true)
    }

    /// Perform the queued render: remote with retries, or the local
    /// placeholder. Returns the final job record.
    pub async fn execute(&self, job: RenderJob, package: &OutputPackage) -> RenderJob {
        let mut job = job;
        job.status = RenderStatus::Rendering;
        self.store(job.clone()).await;

        for attempt in 1..=self.attempts_cap {
            job.attempts = attempt;
            match self.render_once(&job, package).await {
                Ok(artifact_url) => {
                    job.status = RenderStatus::Ready;
                    job.artifact_url = Some(artifact_url);
                    job.error = None;
                    self.store(job.clone()).await;
                    return job;
                }
                Err(error) => {
                    warn!(job = %job.render_job_id, attempt, "render attempt failed: {error}");
                    job.error = Some(error);
                    if attempt < self.attempts_cap {
                        // Linear backoff between attempts.
                        tokio::time::sleep(Duration::from_millis(
                            RETRY_BACKOFF_MS * attempt as u64,
                        ))
                        .await;
                    }
                }
            }
        }
        job.status = RenderStatus::Failed;
        self.store(job.clone()).await;
        job
    }

    /// Look up a job by idempotency key.
    pub async fn get(&self, key: &str) -> Option<RenderJob> {
        self.jobs.lock().await.get(key).cloned()
    }

    async fn store(&self, job: RenderJob) {
        self.jobs
            .lock()
            .await
            .insert(job.idempotency_key.clone(), job);
    }

    async fn render_once(&self, job: &RenderJob, package: &OutputPackage) -> Result<String, String> {
        match &self.endpoint {
            Some(endpoint) => {
                let body = serde_json::json!({
                    "renderJobId": job.render_job_id,
                    "idempotencyKey": job.idempotency_key,
                    "package": package,
                });
                let response = self
                    .client
                    .post(endpoint)
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| format!("render request failed: {e}"))?;
                if !response.status().is_success() {
                    return Err(format!("render service returned {}", response.status()));
                }
                let parsed: RemoteRenderResponse = response
                    .json()
                    .await
                    .map_err(|e| format!("render response parse failed: {e}"))?;
                Ok(parsed.artifact_url)
            }
            None => self.render_placeholder(job, package).await,
        }
    }

    /// Deterministic local placeholder artifact: a small SVG lower third.
    async fn render_placeholder(
        &self,
        job: &RenderJob,
        package: &OutputPackage,
    ) -> Result<String, String> {
        let payload = package
            .payload
            .as_ref()
            .ok_or_else(|| "package has no payload".to_string())?;
        let svg = format!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"1280\" height=\"200\">\
             <rect width=\"1280\" height=\"200\" fill=\"#101828\"/>\
             <text x=\"24\" y=\"80\" fill=\"#ffffff\" font-size=\"36\">{headline}</text>\
             <text x=\"24\" y=\"150\" fill=\"#9ae6b4\" font-size=\"28\">\
             {verdict} ({confidence:.0}%)</text>\
             </svg>",
            headline = escape_xml(&payload.headline),
            verdict = serde_json::to_value(payload.verdict)
                .ok()
                .and_then(|v| v.as_str().map(|s| s.to_uppercase()))
                .unwrap_or_else(|| "UNVERIFIED".to_string()),
            confidence = payload.confidence * 100.0,
        );

        tokio::fs::create_dir_all(&self.artifact_dir)
            .await
            .map_err(|e| format!("artifact dir unavailable: {e}"))?;
        let path = self
            .artifact_dir
            .join(format!("{}-v{}.svg", job.claim_id, job.claim_version));
        tokio::fs::write(&path, svg)
            .await
            .map_err(|e| format!("artifact write failed: {e}"))?;
        Ok(format!("file://{}", path.display()))
    }
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
