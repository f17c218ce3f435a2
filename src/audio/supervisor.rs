//! Audio ingest supervisor.
//!
//! Drives the extractor/decoder subprocess pair for the duration of a
//! run: pipes extractor stdout into decoder stdin, slices decoder PCM
//! output into chunks, watches for stalls, classifies finished attempts
//! and drives the reconnect machine. `pipeline.stopped` is emitted exactly
//! once per run, whichever path ends it.

use crate::audio::backoff::BackoffPolicy;
use crate::audio::chunker::ChunkSlicer;
use crate::config::IngestConfig;
use crate::defaults;
use crate::events::hub::HubHandle;
use crate::events::EventBody;
use crate::transcript::worker::AudioFeed;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Stop reasons reported in `pipeline.stopped`.
pub const REASON_MANUAL_STOP: &str = "manual_stop";
pub const REASON_SPAWN_FAILED: &str = "spawn_failed";
pub const REASON_RECONNECT_EXHAUSTED: &str = "reconnect_exhausted";

/// Supervisor tunables for one run.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub source_url: String,
    pub chunk_seconds: u32,
    pub extractor_bin: String,
    pub extractor_args: Vec<String>,
    pub decoder_bin: String,
    pub decoder_args: Vec<String>,
    pub reconnect: bool,
    pub backoff: BackoffPolicy,
    /// 0 means unlimited attempts.
    pub max_retries: u32,
    pub stall_timeout_ms: u64,
}

impl SupervisorConfig {
    pub fn from_ingest(config: &IngestConfig, source_url: String) -> Self {
        Self {
            source_url,
            chunk_seconds: config.chunk_seconds,
            extractor_bin: config.extractor_bin.clone(),
            extractor_args: config.extractor_args.clone(),
            decoder_bin: config.decoder_bin.clone(),
            decoder_args: config.decoder_args.clone(),
            reconnect: config.reconnect,
            backoff: BackoffPolicy::new(config.retry_base_ms, config.retry_max_ms),
            max_retries: config.max_retries,
            stall_timeout_ms: config.stall_timeout_ms.clamp(
                defaults::INGEST_STALL_TIMEOUT_MIN_MS,
                defaults::INGEST_STALL_TIMEOUT_MAX_MS,
            ),
        }
    }
}

/// Classification of a finalized attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    ProcessError,
    SourceEnded,
    UpstreamExitNonzero,
}

impl AttemptOutcome {
    pub fn reason(&self) -> &'static str {
        match self {
            AttemptOutcome::ProcessError => "process_error",
            AttemptOutcome::SourceEnded => "source_ended",
            AttemptOutcome::UpstreamExitNonzero => "upstream_exit_nonzero",
        }
    }
}

enum AttemptEnd {
    Cancelled,
    SpawnFailed(String),
    Finalized(AttemptOutcome),
}

/// Classify exit records into an attempt outcome.
fn classify(
    process_error: bool,
    extractor_exit: Option<std::process::ExitStatus>,
    decoder_exit: Option<std::process::ExitStatus>,
) -> AttemptOutcome {
    if process_error {
        return AttemptOutcome::ProcessError;
    }
    match (extractor_exit, decoder_exit) {
        (Some(extractor), Some(decoder)) if extractor.success() && decoder.success() => {
            AttemptOutcome::SourceEnded
        }
        _ => AttemptOutcome::UpstreamExitNonzero,
    }
}

pub struct AudioSupervisor {
    config: SupervisorConfig,
    run_id: String,
    hub: HubHandle,
    feed: mpsc::Sender<AudioFeed>,
    cancel: CancellationToken,
    stopped: Arc<AtomicBool>,
}

impl AudioSupervisor {
    pub fn new(
        config: SupervisorConfig,
        run_id: String,
        hub: HubHandle,
        feed: mpsc::Sender<AudioFeed>,
        cancel: CancellationToken,
        stopped: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            run_id,
            hub,
            feed,
            cancel,
            stopped,
        }
    }

    /// Run attempts until the source ends for good, retries exhaust, or
    /// the run is stopped.
    pub async fn run(mut self) {
        let mut reconnect_attempt: u32 = 0;
        let mut run_had_pcm = false;

        loop {
            if self.cancel.is_cancelled() {
                self.finish(REASON_MANUAL_STOP).await;
                return;
            }

            let end = self
                .run_attempt(&mut reconnect_attempt, &mut run_had_pcm)
                .await;

            // Attempt boundary: flush buffered transcript text and reset
            // the overlap context.
            let _ = self.feed.send(AudioFeed::Flush).await;

            let outcome = match end {
                AttemptEnd::Cancelled => {
                    self.finish(REASON_MANUAL_STOP).await;
                    return;
                }
                AttemptEnd::SpawnFailed(message) if !run_had_pcm => {
                    // Fatal: no PCM ever arrived and a process could not
                    // even start.
                    self.hub
                        .emit(EventBody::PipelineError {
                            run_id: self.run_id.clone(),
                            message,
                        })
                        .await;
                    self.finish(REASON_SPAWN_FAILED).await;
                    return;
                }
                AttemptEnd::SpawnFailed(message) => {
                    warn!("respawn failed mid-run: {message}");
                    AttemptOutcome::ProcessError
                }
                AttemptEnd::Finalized(outcome) => outcome,
            };

            if !self.config.reconnect {
                self.finish(outcome.reason()).await;
                return;
            }

            reconnect_attempt += 1;
            if self.config.max_retries > 0 && reconnect_attempt > self.config.max_retries {
                self.finish(REASON_RECONNECT_EXHAUSTED).await;
                return;
            }

            let delay_ms = self.config.backoff.delay_ms(reconnect_attempt);
            self.hub
                .emit(EventBody::ReconnectScheduled {
                    run_id: self.run_id.clone(),
                    attempt: reconnect_attempt,
                    delay_ms,
                    reason: outcome.reason().to_string(),
                })
                .await;

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.finish(REASON_MANUAL_STOP).await;
                    return;
                }
                _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
            }

            self.hub
                .emit(EventBody::ReconnectStarted {
                    run_id: self.run_id.clone(),
                    attempt: reconnect_attempt,
                })
                .await;
        }
    }

    fn spawn_extractor(&self) -> std::io::Result<Child> {
        let args: Vec<String> = self
            .config
            .extractor_args
            .iter()
            .map(|a| a.replace("{url}", &self.config.source_url))
            .collect();
        Command::new(&self.config.extractor_bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
    }

    fn spawn_decoder(&self) -> std::io::Result<Child> {
        Command::new(&self.config.decoder_bin)
            .args(&self.config.decoder_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
    }

    /// One subprocess session: spawn the pair, pump PCM, watch for
    /// stalls, wait for closes.
    async fn run_attempt(
        &mut self,
        reconnect_attempt: &mut u32,
        run_had_pcm: &mut bool,
    ) -> AttemptEnd {
        let mut slicer = ChunkSlicer::new(self.config.chunk_seconds);

        let mut extractor = match self.spawn_extractor() {
            Ok(child) => child,
            Err(e) => {
                return AttemptEnd::SpawnFailed(format!(
                    "failed to spawn {}: {e}",
                    self.config.extractor_bin
                ))
            }
        };
        let mut decoder = match self.spawn_decoder() {
            Ok(child) => child,
            Err(e) => {
                shutdown_child(&mut extractor).await;
                return AttemptEnd::SpawnFailed(format!(
                    "failed to spawn {}: {e}",
                    self.config.decoder_bin
                ));
            }
        };

        let Some(mut extractor_stdout) = extractor.stdout.take() else {
            shutdown_pair(&mut extractor, &mut decoder).await;
            return AttemptEnd::SpawnFailed("extractor stdout unavailable".to_string());
        };
        let Some(mut decoder_stdin) = decoder.stdin.take() else {
            shutdown_pair(&mut extractor, &mut decoder).await;
            return AttemptEnd::SpawnFailed("decoder stdin unavailable".to_string());
        };
        let Some(mut decoder_stdout) = decoder.stdout.take() else {
            shutdown_pair(&mut extractor, &mut decoder).await;
            return AttemptEnd::SpawnFailed("decoder stdout unavailable".to_string());
        };

        // Extractor output feeds decoder input; dropping the stdin half
        // on completion closes the decoder's pipe.
        let pipe = tokio::spawn(async move {
            let _ = tokio::io::copy(&mut extractor_stdout, &mut decoder_stdin).await;
        });

        info!(
            attempt = *reconnect_attempt,
            url = %self.config.source_url,
            "ingest attempt started"
        );

        let mut buf = vec![0u8; 16 * 1024];
        let mut last_audio_byte_at = Instant::now();
        let mut process_error = false;
        let mut extractor_exit: Option<std::process::ExitStatus> = None;
        let mut decoder_exit: Option<std::process::ExitStatus> = None;
        let mut first_close_at: Option<Instant> = None;
        let mut stdout_eof = false;
        let close_wait = Duration::from_millis(defaults::INGEST_CLOSE_WAIT_MS);
        let mut watchdog =
            tokio::time::interval(Duration::from_millis(defaults::INGEST_WATCHDOG_TICK_MS));
        watchdog.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let cancelled = loop {
            // Both processes closed and the PCM pipe is drained.
            if extractor_exit.is_some() && decoder_exit.is_some() && stdout_eof {
                break false;
            }
            let close_deadline = async {
                match first_close_at {
                    Some(at) => tokio::time::sleep_until((at + close_wait).into()).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    break true;
                }
                status = extractor.wait(), if extractor_exit.is_none() => {
                    match status {
                        Ok(status) => {
                            debug!(code = ?status.code(), "extractor closed");
                            extractor_exit = Some(status);
                            first_close_at.get_or_insert_with(Instant::now);
                        }
                        Err(e) => {
                            warn!("extractor wait failed: {e}");
                            process_error = true;
                            break false;
                        }
                    }
                }
                status = decoder.wait(), if decoder_exit.is_none() => {
                    match status {
                        Ok(status) => {
                            debug!(code = ?status.code(), "decoder closed");
                            decoder_exit = Some(status);
                            first_close_at.get_or_insert_with(Instant::now);
                        }
                        Err(e) => {
                            warn!("decoder wait failed: {e}");
                            process_error = true;
                            break false;
                        }
                    }
                }
                read = decoder_stdout.read(&mut buf), if !stdout_eof => {
                    match read {
                        Ok(0) => {
                            stdout_eof = true;
                            first_close_at.get_or_insert_with(Instant::now);
                        }
                        Ok(n) => {
                            if *reconnect_attempt > 0 {
                                self.hub
                                    .emit(EventBody::ReconnectSucceeded {
                                        run_id: self.run_id.clone(),
                                        attempt: *reconnect_attempt,
                                    })
                                    .await;
                                *reconnect_attempt = 0;
                            }
                            *run_had_pcm = true;
                            last_audio_byte_at = Instant::now();
                            for chunk in slicer.push(&buf[..n]) {
                                self.hub
                                    .emit(EventBody::AudioChunk {
                                        run_id: self.run_id.clone(),
                                        chunk_index: chunk.chunk_index,
                                        start_sec: chunk.start_sec,
                                        end_sec: chunk.end_sec,
                                    })
                                    .await;
                                if self.feed.send(AudioFeed::Chunk(chunk)).await.is_err() {
                                    debug!("transcription feed closed");
                                    process_error = true;
                                    break;
                                }
                            }
                            if process_error {
                                break false;
                            }
                        }
                        Err(e) => {
                            warn!("decoder read failed: {e}");
                            process_error = true;
                            break false;
                        }
                    }
                }
                _ = watchdog.tick() => {
                    let idle_ms = last_audio_byte_at.elapsed().as_millis() as u64;
                    if idle_ms >= self.config.stall_timeout_ms {
                        self.hub
                            .emit(EventBody::IngestStalled {
                                run_id: self.run_id.clone(),
                                idle_ms,
                            })
                            .await;
                        process_error = true;
                        break false;
                    }
                }
                _ = close_deadline => {
                    debug!("close wait elapsed with one process still open");
                    break false;
                }
            }
        };

        pipe.abort();
        shutdown_pair(&mut extractor, &mut decoder).await;

        if cancelled {
            return AttemptEnd::Cancelled;
        }
        AttemptEnd::Finalized(classify(process_error, extractor_exit, decoder_exit))
    }

    /// Emit `pipeline.stopped` exactly once and cancel the run.
    async fn finish(&self, reason: &str) {
        if self
            .stopped
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            info!(reason, "pipeline stopped");
            self.hub
                .emit(EventBody::PipelineStopped {
                    run_id: self.run_id.clone(),
                    reason: reason.to_string(),
                })
                .await;
        }
        self.cancel.cancel();
    }
}

#[cfg(unix)]
fn soft_kill(child: &Child) {
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn soft_kill(_child: &Child) {}

/// Soft-terminate, then force-kill after the grace period.
async fn shutdown_child(child: &mut Child) {
    if matches!(child.try_wait(), Ok(Some(_))) {
        return;
    }
    soft_kill(child);
    let grace = Duration::from_millis(defaults::INGEST_KILL_GRACE_MS);
    if tokio::time::timeout(grace, child.wait()).await.is_err() {
        let _ = child.kill().await;
    }
}

async fn shutdown_pair(extractor: &mut Child, decoder: &mut Child) {
    tokio::join!(shutdown_child(extractor), shutdown_child(decoder));
}
