//! Typed pipeline events and the outgoing envelope.
//!
//! Producers publish typed bodies; the hub decorates every outbound event
//! with a monotonic `seq`, an ISO-8601 timestamp and, for claim events,
//! the full claim snapshot embed.

pub mod hub;

use crate::claims::store::ClaimEvent;
use crate::claims::types::Claim;
use crate::transcript::TranscriptSegment;
use serde::Serialize;
use serde_json::{json, Value};

/// Every event a run can emit.
#[derive(Debug, Clone)]
pub enum EventBody {
    PipelineStarted {
        run_id: String,
        source_url: String,
        chunk_seconds: u32,
        model: String,
    },
    PipelineStopped {
        run_id: String,
        reason: String,
    },
    PipelineError {
        run_id: String,
        message: String,
    },
    PipelineLog {
        run_id: String,
        message: String,
    },
    ReconnectScheduled {
        run_id: String,
        attempt: u32,
        delay_ms: u64,
        reason: String,
    },
    ReconnectStarted {
        run_id: String,
        attempt: u32,
    },
    ReconnectSucceeded {
        run_id: String,
        attempt: u32,
    },
    IngestStalled {
        run_id: String,
        idle_ms: u64,
    },
    AudioChunk {
        run_id: String,
        chunk_index: u64,
        start_sec: f64,
        end_sec: f64,
    },
    TranscriptSegment {
        run_id: String,
        segment: TranscriptSegment,
    },
    TranscriptError {
        run_id: String,
        message: String,
    },
    Claim(ClaimEvent),
}

impl EventBody {
    /// Outgoing event type name.
    pub fn kind(&self) -> &'static str {
        match self {
            EventBody::PipelineStarted { .. } => "pipeline.started",
            EventBody::PipelineStopped { .. } => "pipeline.stopped",
            EventBody::PipelineError { .. } => "pipeline.error",
            EventBody::PipelineLog { .. } => "pipeline.log",
            EventBody::ReconnectScheduled { .. } => "pipeline.reconnect_scheduled",
            EventBody::ReconnectStarted { .. } => "pipeline.reconnect_started",
            EventBody::ReconnectSucceeded { .. } => "pipeline.reconnect_succeeded",
            EventBody::IngestStalled { .. } => "pipeline.ingest_stalled",
            EventBody::AudioChunk { .. } => "audio.chunk",
            EventBody::TranscriptSegment { .. } => "transcript.segment",
            EventBody::TranscriptError { .. } => "transcript.error",
            EventBody::Claim(event) => event.kind(),
        }
    }

    /// The run this event belongs to.
    pub fn run_id(&self) -> &str {
        match self {
            EventBody::PipelineStarted { run_id, .. }
            | EventBody::PipelineStopped { run_id, .. }
            | EventBody::PipelineError { run_id, .. }
            | EventBody::PipelineLog { run_id, .. }
            | EventBody::ReconnectScheduled { run_id, .. }
            | EventBody::ReconnectStarted { run_id, .. }
            | EventBody::ReconnectSucceeded { run_id, .. }
            | EventBody::IngestStalled { run_id, .. }
            | EventBody::AudioChunk { run_id, .. }
            | EventBody::TranscriptSegment { run_id, .. }
            | EventBody::TranscriptError { run_id, .. } => run_id,
            EventBody::Claim(event) => event.run_id(),
        }
    }

    /// JSON payload for non-claim events. Claim events are rendered by
    /// [`claim_event_data`] with the snapshot embed.
    pub fn data(&self) -> Value {
        match self {
            EventBody::PipelineStarted {
                run_id,
                source_url,
                chunk_seconds,
                model,
            } => json!({
                "runId": run_id,
                "sourceUrl": source_url,
                "chunkSeconds": chunk_seconds,
                "model": model,
            }),
            EventBody::PipelineStopped { run_id, reason } => json!({
                "runId": run_id,
                "reason": reason,
            }),
            EventBody::PipelineError { run_id, message }
            | EventBody::PipelineLog { run_id, message } => json!({
                "runId": run_id,
                "message": message,
            }),
            EventBody::ReconnectScheduled {
                run_id,
                attempt,
                delay_ms,
                reason,
            } => json!({
                "runId": run_id,
                "attempt": attempt,
                "delayMs": delay_ms,
                "reason": reason,
            }),
            EventBody::ReconnectStarted { run_id, attempt }
            | EventBody::ReconnectSucceeded { run_id, attempt } => json!({
                "runId": run_id,
                "attempt": attempt,
            }),
            EventBody::IngestStalled { run_id, idle_ms } => json!({
                "runId": run_id,
                "idleMs": idle_ms,
            }),
            EventBody::AudioChunk {
                run_id,
                chunk_index,
                start_sec,
                end_sec,
            } => json!({
                "runId": run_id,
                "chunkIndex": chunk_index,
                "startSec": start_sec,
                "endSec": end_sec,
            }),
            EventBody::TranscriptSegment { run_id, segment } => json!({
                "runId": run_id,
                "segment": segment,
            }),
            EventBody::TranscriptError { run_id, message } => json!({
                "runId": run_id,
                "message": message,
            }),
            EventBody::Claim(event) => json!({
                "runId": event.run_id(),
                "claimId": event.claim_id(),
            }),
        }
    }
}

/// Render a claim event payload with the full snapshot embed.
pub fn claim_event_data(event: &ClaimEvent, snapshot: &Claim) -> Value {
    let mut data = json!({
        "runId": event.run_id(),
        "claimId": event.claim_id(),
        "claim": snapshot,
    });
    let extra = match event {
        ClaimEvent::PackageQueued {
            claim_version,
            package_id,
            ..
        }
        | ClaimEvent::PackageReady {
            claim_version,
            package_id,
            ..
        } => json!({ "claimVersion": claim_version, "packageId": package_id }),
        ClaimEvent::PackageFailed {
            claim_version,
            error,
            ..
        } => json!({ "claimVersion": claim_version, "error": error }),
        ClaimEvent::RenderQueued {
            claim_version,
            render_job_id,
            ..
        } => json!({ "claimVersion": claim_version, "renderJobId": render_job_id }),
        ClaimEvent::RenderReady {
            claim_version,
            render_job_id,
            artifact_url,
            ..
        } => json!({
            "claimVersion": claim_version,
            "renderJobId": render_job_id,
            "artifactUrl": artifact_url,
        }),
        ClaimEvent::RenderFailed {
            claim_version,
            render_job_id,
            error,
            ..
        } => json!({
            "claimVersion": claim_version,
            "renderJobId": render_job_id,
            "error": error,
        }),
        _ => Value::Null,
    };
    if let (Some(obj), Some(extra)) = (data.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            obj.insert(k.clone(), v.clone());
        }
    }
    data
}

/// The enriched outgoing event.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Globally monotonic within a run.
    pub seq: u64,
    pub event: String,
    pub ts: String,
    pub data: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_match_the_wire_names() {
        let body = EventBody::IngestStalled {
            run_id: "r1".into(),
            idle_ms: 46_000,
        };
        assert_eq!(body.kind(), "pipeline.ingest_stalled");
        assert_eq!(body.run_id(), "r1");

        let body = EventBody::AudioChunk {
            run_id: "r1".into(),
            chunk_index: 3,
            start_sec: 45.0,
            end_sec: 60.0,
        };
        assert_eq!(body.kind(), "audio.chunk");
        assert_eq!(body.data()["chunkIndex"], 3);
    }

    #[test]
    fn reconnect_scheduled_payload_has_delay_and_attempt() {
        let body = EventBody::ReconnectScheduled {
            run_id: "r1".into(),
            attempt: 1,
            delay_ms: 1_200,
            reason: "upstream_exit_nonzero".into(),
        };
        let data = body.data();
        assert_eq!(data["attempt"], 1);
        assert_eq!(data["delayMs"], 1_200);
        assert_eq!(data["reason"], "upstream_exit_nonzero");
    }

    #[test]
    fn claim_event_data_embeds_snapshot() {
        use crate::claims::types::{
            ClaimCandidate, ClaimCategory, ClaimTypeTag, DetectionReason,
        };
        let candidate = ClaimCandidate {
            text: "The deficit doubled to 2 trillion dollars.".into(),
            score: 0.75,
            reasons: vec![DetectionReason::ContainsNumber],
            category: ClaimCategory::Economic,
            tag: ClaimTypeTag::NumericFactual,
            tag_confidence: 0.9,
        };
        let claim = Claim::detected("r1-c0001".into(), "r1".into(), &candidate, 0.0, "00:00:00".into());
        let event = ClaimEvent::Detected {
            run_id: "r1".into(),
            claim_id: "r1-c0001".into(),
            candidate,
            chunk_start_sec: 0.0,
            chunk_clock: "00:00:00".into(),
        };
        let data = claim_event_data(&event, &claim);
        assert_eq!(data["claimId"], "r1-c0001");
        assert_eq!(data["claim"]["version"], 1);
        assert_eq!(data["claim"]["claimCategory"], "economic");
    }

    #[test]
    fn render_ready_payload_carries_pin_fields() {
        use crate::claims::types::{
            ClaimCandidate, ClaimCategory, ClaimTypeTag,
        };
        let candidate = ClaimCandidate {
            text: "The deficit doubled to 2 trillion dollars.".into(),
            score: 0.75,
            reasons: vec![],
            category: ClaimCategory::Economic,
            tag: ClaimTypeTag::NumericFactual,
            tag_confidence: 0.9,
        };
        let claim = Claim::detected("r1-c0001".into(), "r1".into(), &candidate, 0.0, "00:00:00".into());
        let event = ClaimEvent::RenderReady {
            run_id: "r1".into(),
            claim_id: "r1-c0001".into(),
            claim_version: Some(4),
            render_job_id: "render-1".into(),
            artifact_url: "file:///tmp/render-1.svg".into(),
        };
        let data = claim_event_data(&event, &claim);
        assert_eq!(data["claimVersion"], 4);
        assert_eq!(data["renderJobId"], "render-1");
        assert_eq!(data["artifactUrl"], "file:///tmp/render-1.svg");
    }
}
