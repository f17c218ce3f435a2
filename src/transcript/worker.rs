//! Transcription worker.
//!
//! Consumes PCM chunks in FIFO order with at most one transcription in
//! flight, which keeps prior-context stitching correct. Accepted text
//! flows through the assembler; detected claim candidates are promoted by
//! the hub and queued for research.

use crate::audio::chunker::PcmChunk;
use crate::audio::wav;
use crate::claims::detector::{self, DetectorOptions};
use crate::claims::types::Claim;
use crate::events::hub::HubHandle;
use crate::events::EventBody;
use crate::transcript::assembler::TranscriptAssembler;
use crate::transcript::client::Transcriber;
use crate::transcript::wall_clock;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Input to the transcription queue.
#[derive(Debug)]
pub enum AudioFeed {
    Chunk(PcmChunk),
    /// Force-flush the assembler and reset the overlap context. Sent at
    /// reconnect and stop boundaries.
    Flush,
}

pub struct TranscriptionWorker {
    run_id: String,
    run_started_at: DateTime<Utc>,
    hub: HubHandle,
    transcriber: Arc<dyn Transcriber>,
    assembler: TranscriptAssembler,
    detector_options: DetectorOptions,
    research_tx: mpsc::Sender<Claim>,
    cancel: CancellationToken,
}

impl TranscriptionWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        run_id: String,
        run_started_at: DateTime<Utc>,
        hub: HubHandle,
        transcriber: Arc<dyn Transcriber>,
        detector_options: DetectorOptions,
        research_tx: mpsc::Sender<Claim>,
        cancel: CancellationToken,
    ) -> Self {
        let assembler = TranscriptAssembler::new(run_id.clone(), run_started_at);
        Self {
            run_id,
            run_started_at,
            hub,
            transcriber,
            assembler,
            detector_options,
            research_tx,
            cancel,
        }
    }

    /// Run the worker until the feed closes or the run is cancelled.
    pub async fn run(mut self, mut feed: mpsc::Receiver<AudioFeed>) {
        loop {
            let deadline = self.assembler.flush_deadline();
            let timer = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("transcription worker cancelled");
                    return;
                }
                item = feed.recv() => {
                    match item {
                        Some(AudioFeed::Chunk(chunk)) => self.handle_chunk(chunk).await,
                        Some(AudioFeed::Flush) => self.handle_flush().await,
                        None => {
                            self.handle_flush().await;
                            return;
                        }
                    }
                }
                _ = timer => {
                    if let Some(segment) = self.assembler.timeout_flush() {
                        self.emit_segment(segment).await;
                    }
                }
            }
        }
    }

    async fn emit_segment(&self, segment: crate::transcript::TranscriptSegment) {
        self.hub
            .emit(EventBody::TranscriptSegment {
                run_id: self.run_id.clone(),
                segment,
            })
            .await;
    }

    async fn handle_chunk(&mut self, chunk: PcmChunk) {
        let wav = match wav::frame_wav(&chunk.pcm) {
            Ok(wav) => wav,
            Err(e) => {
                self.hub
                    .emit(EventBody::TranscriptError {
                        run_id: self.run_id.clone(),
                        message: e.to_string(),
                    })
                    .await;
                return;
            }
        };

        let prior = self.assembler.prior_context();
        let text = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return,
            result = self.transcriber.transcribe(wav, prior.as_deref()) => {
                match result {
                    Ok(text) => text,
                    Err(e) if e.is_cancelled() => return,
                    Err(e) => {
                        warn!(chunk = chunk.chunk_index, "transcription failed: {e}");
                        self.hub
                            .emit(EventBody::TranscriptError {
                                run_id: self.run_id.clone(),
                                message: e.to_string(),
                            })
                            .await;
                        return;
                    }
                }
            }
        };

        if text.trim().is_empty() {
            return;
        }

        let output = self.assembler.accept(&text, chunk.start_sec, chunk.end_sec);
        for segment in output.segments {
            self.emit_segment(segment).await;
        }
        self.promote_claims(output.claim_sentences, chunk.start_sec)
            .await;
    }

    async fn handle_flush(&mut self) {
        let output = self.assembler.force_flush();
        let start_sec = output
            .segments
            .first()
            .map(|s| s.start_sec)
            .unwrap_or_default();
        for segment in output.segments {
            self.emit_segment(segment).await;
        }
        self.promote_claims(output.claim_sentences, start_sec).await;
        self.assembler.reset_context();
    }

    async fn promote_claims(&self, sentences: Vec<String>, chunk_start_sec: f64) {
        if sentences.is_empty() {
            return;
        }
        let text = sentences.join(" ");
        let candidates = detector::detect(&text, &self.detector_options);
        if candidates.is_empty() {
            return;
        }
        let clock = wall_clock(self.run_started_at, chunk_start_sec);
        let created = self.hub.detect(candidates, chunk_start_sec, clock).await;
        for claim in created {
            if self.research_tx.send(claim).await.is_err() {
                debug!("research queue closed; claim dropped");
            }
        }
    }
}
