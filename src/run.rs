//! Run controller.
//!
//! Owns the singleton run per host: identity, cancellation, and the
//! wiring between the audio supervisor, the transcription worker and the
//! research scheduler.

use crate::activity::{ActivityHandle, ActivityRecord};
use crate::audio::supervisor::{AudioSupervisor, SupervisorConfig};
use crate::claims::detector::DetectorOptions;
use crate::config::Config;
use crate::error::{FactlineError, Result};
use crate::events::hub::HubHandle;
use crate::events::EventBody;
use crate::research::scheduler::{Providers, ResearchScheduler};
use crate::transcript::client::Transcriber;
use crate::transcript::worker::{AudioFeed, TranscriptionWorker};
use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

struct ActiveRun {
    run_id: String,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
    stopped: Arc<AtomicBool>,
    feed_tx: mpsc::Sender<AudioFeed>,
}

/// Current run status for the read surface.
#[derive(Debug, Clone, PartialEq)]
pub struct RunStatus {
    pub running: bool,
    pub run_id: Option<String>,
}

pub struct RunController {
    config: Arc<Config>,
    hub: HubHandle,
    transcriber: Arc<dyn Transcriber>,
    providers: Providers,
    activity: ActivityHandle,
    active: Mutex<Option<ActiveRun>>,
}

impl RunController {
    pub fn new(
        config: Arc<Config>,
        hub: HubHandle,
        transcriber: Arc<dyn Transcriber>,
        providers: Providers,
        activity: ActivityHandle,
    ) -> Self {
        Self {
            config,
            hub,
            transcriber,
            providers,
            activity,
            active: Mutex::new(None),
        }
    }

    /// Start a run against `source_url`. At most one run is active at a
    /// time; a finished run is replaced.
    pub async fn start(&self, source_url: &str) -> Result<String> {
        let source_url = source_url.trim();
        if !source_url.starts_with("http://") && !source_url.starts_with("https://") {
            return Err(FactlineError::InvalidSourceUrl {
                url: source_url.to_string(),
            });
        }

        let mut active = self.active.lock().await;
        if let Some(run) = active.as_ref() {
            if !run.stopped.load(Ordering::SeqCst) {
                return Err(FactlineError::RunAlreadyActive {
                    run_id: run.run_id.clone(),
                });
            }
        }

        let run_id = format!("run-{}", &Uuid::new_v4().simple().to_string()[..12]);
        let started_at = Utc::now();
        let cancel = CancellationToken::new();
        let stopped = Arc::new(AtomicBool::new(false));
        let (feed_tx, feed_rx) = mpsc::channel::<AudioFeed>(64);
        let (research_tx, research_rx) = mpsc::channel(256);

        self.hub.begin_run(run_id.clone()).await;
        self.hub
            .emit(EventBody::PipelineStarted {
                run_id: run_id.clone(),
                source_url: source_url.to_string(),
                chunk_seconds: self.config.ingest.chunk_seconds,
                model: self.transcriber.model_name().to_string(),
            })
            .await;

        let worker = TranscriptionWorker::new(
            run_id.clone(),
            started_at,
            self.hub.clone(),
            self.transcriber.clone(),
            DetectorOptions::with_threshold(self.config.research.detection_threshold),
            research_tx,
            cancel.clone(),
        );
        tokio::spawn(worker.run(feed_rx));

        let scheduler = ResearchScheduler::new(
            self.hub.clone(),
            self.providers.clone(),
            self.config.research.concurrency,
            cancel.clone(),
        );
        tokio::spawn(scheduler.run(research_rx));

        let supervisor = AudioSupervisor::new(
            SupervisorConfig::from_ingest(&self.config.ingest, source_url.to_string()),
            run_id.clone(),
            self.hub.clone(),
            feed_tx.clone(),
            cancel.clone(),
            stopped.clone(),
        );
        tokio::spawn(supervisor.run());

        self.activity.record(ActivityRecord::RunStarted {
            run_id: run_id.clone(),
            source_url: source_url.to_string(),
            ts: started_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        });
        info!(%run_id, %source_url, "run started");

        *active = Some(ActiveRun {
            run_id: run_id.clone(),
            started_at,
            cancel,
            stopped,
            feed_tx,
        });
        Ok(run_id)
    }

    /// Stop the active run. Returns `true` when a running pipeline was
    /// actually stopped; stopping an idle host is a no-op.
    pub async fn stop(&self) -> bool {
        let mut active = self.active.lock().await;
        let Some(run) = active.take() else {
            return false;
        };
        let was_running = !run.stopped.load(Ordering::SeqCst);
        if was_running {
            // Flush buffered transcript text, then cancel everything. The
            // supervisor emits pipeline.stopped exactly once.
            let _ = run.feed_tx.send(AudioFeed::Flush).await;
            run.cancel.cancel();
            self.activity.record(ActivityRecord::RunStopped {
                run_id: run.run_id.clone(),
                reason: "manual_stop".to_string(),
                ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            });
            info!(run_id = %run.run_id, "run stopped");
        }
        was_running
    }

    pub async fn status(&self) -> RunStatus {
        let active = self.active.lock().await;
        match active.as_ref() {
            Some(run) => RunStatus {
                running: !run.stopped.load(Ordering::SeqCst),
                run_id: Some(run.run_id.clone()),
            },
            None => RunStatus {
                running: false,
                run_id: None,
            },
        }
    }

    /// Started-at of the active run, if any.
    pub async fn started_at(&self) -> Option<DateTime<Utc>> {
        self.active.lock().await.as_ref().map(|run| run.started_at)
    }
}
