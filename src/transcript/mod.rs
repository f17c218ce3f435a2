//! Transcription queue and transcript assembly.

pub mod assembler;
pub mod client;
pub mod sentences;
pub mod worker;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

/// Wall-clock `HH:MM:SS` for an offset into the run.
pub fn wall_clock(run_started_at: DateTime<Utc>, sec: f64) -> String {
    (run_started_at + ChronoDuration::milliseconds((sec * 1000.0) as i64))
        .format("%H:%M:%S")
        .to_string()
}

/// A flushed, sentence-aligned transcript range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptSegment {
    /// Run id plus monotonic segment index.
    pub segment_id: String,
    pub start_sec: f64,
    pub end_sec: f64,
    pub start_clock: String,
    pub end_clock: String,
    pub text: String,
}
