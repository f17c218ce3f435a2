//! Default configuration constants for factline.
//!
//! Shared constants used across configuration types and pipeline stations
//! to ensure consistency and eliminate duplication.

/// Audio sample rate in Hz.
///
/// 16kHz mono is the canonical format for the transcription collaborator.
/// The decoder subprocess is asked to emit PCM at exactly this rate.
pub const SAMPLE_RATE: u32 = 16000;

/// Bytes per PCM sample (16-bit signed little-endian).
pub const BYTES_PER_SAMPLE: u32 = 2;

/// Default chunk duration in seconds. Clamped to [`CHUNK_SECONDS_MIN`],
/// [`CHUNK_SECONDS_MAX`] at config load.
pub const CHUNK_SECONDS: u32 = 15;
pub const CHUNK_SECONDS_MIN: u32 = 5;
pub const CHUNK_SECONDS_MAX: u32 = 30;

/// Trailing characters of accepted transcript passed to the transcriber
/// as prior context, and the window searched for overlap stripping.
pub const TRANSCRIPT_CONTEXT_CHARS: usize = 200;

/// Minimum overlap length considered when stripping a duplicated prefix.
pub const TRANSCRIPT_MIN_OVERLAP_CHARS: usize = 10;

/// Segment buffer length that forces a flush even without a sentence
/// boundary.
pub const TRANSCRIPT_FLUSH_MAX_CHARS: usize = 600;

/// Idle time since the last append after which the segment buffer is
/// flushed.
pub const TRANSCRIPT_FLUSH_TIMEOUT_MS: u64 = 4_000;

/// Maximum length of the claim-detection carryover tail.
pub const CLAIM_CARRYOVER_MAX_CHARS: usize = 900;

/// Carryover length beyond which the safety valve flushes an incomplete
/// sentence to the claim detector anyway.
pub const CLAIM_FALLBACK_FLUSH_CHARS: usize = 320;

/// Minimum word count required for the carryover safety valve to fire.
pub const CLAIM_FALLBACK_MIN_WORDS: usize = 12;

/// Default claim-detection score threshold. Clamped to
/// [`DETECTION_THRESHOLD_MIN`], [`DETECTION_THRESHOLD_MAX`].
pub const DETECTION_THRESHOLD: f64 = 0.62;
pub const DETECTION_THRESHOLD_MIN: f64 = 0.55;
pub const DETECTION_THRESHOLD_MAX: f64 = 0.9;

/// Maximum entries in the run-wide recent-claim dedupe map.
pub const CLAIM_DEDUPE_CAP: usize = 1_000;

/// Time-to-live for recent-claim dedupe entries.
pub const CLAIM_DEDUPE_TTL_SECS: u64 = 600;

/// Default bounded research concurrency. Clamped to [1, 10].
pub const RESEARCH_CONCURRENCY: usize = 3;
pub const RESEARCH_CONCURRENCY_MAX: usize = 10;

/// Watchdog period for the ingest stall detector.
pub const INGEST_WATCHDOG_TICK_MS: u64 = 2_000;

/// Idle time on the decoder stream that counts as a stall. Clamped to
/// [`INGEST_STALL_TIMEOUT_MIN_MS`], [`INGEST_STALL_TIMEOUT_MAX_MS`].
pub const INGEST_STALL_TIMEOUT_MS: u64 = 45_000;
pub const INGEST_STALL_TIMEOUT_MIN_MS: u64 = 1_000;
pub const INGEST_STALL_TIMEOUT_MAX_MS: u64 = 300_000;

/// Grace period between the first process close and attempt finalization
/// when the sibling process has not closed yet.
pub const INGEST_CLOSE_WAIT_MS: u64 = 1_500;

/// Grace period between the soft kill and the forced kill at teardown.
pub const INGEST_KILL_GRACE_MS: u64 = 2_000;

/// Reconnect backoff defaults. The delay doubles per attempt and is capped
/// at the max.
pub const INGEST_RETRY_BASE_MS: u64 = 1_000;
pub const INGEST_RETRY_MAX_MS: u64 = 15_000;

/// Floor applied to every computed reconnect delay.
pub const INGEST_RETRY_FLOOR_MS: u64 = 250;

/// Bounded event history kept for replay.
pub const EVENT_HISTORY_CAP: usize = 1_000;

/// Maximum events replayed to a reconnecting subscriber.
pub const EVENT_REPLAY_CAP: usize = 200;

/// Events replayed to a fresh subscriber with no Last-Event-ID.
pub const EVENT_REPLAY_DEFAULT: usize = 25;

/// Request body cap for the control surface.
pub const HTTP_BODY_LIMIT_BYTES: usize = 1024 * 1024;

/// Default per-IP-per-route rate limit within a fixed one-minute window.
pub const RATE_LIMIT_PER_MINUTE: u32 = 60;

/// Length cap enforced on verifier summary and corrected-claim text.
pub const VERIFIER_TEXT_CAP: usize = 484;

/// Fact-check reviews older than this many years are discarded.
pub const FACTCHECK_MAX_AGE_YEARS: f64 = 4.0;

/// Default render attempt cap for failed jobs.
pub const RENDER_ATTEMPTS: u32 = 3;

/// Default remote render timeout.
pub const RENDER_TIMEOUT_MS: u64 = 10_000;

/// Graphics template identifier pinned into render idempotency keys.
pub const RENDER_TEMPLATE_ID: &str = "lower-third-v1";

/// Number of bytes in one PCM chunk for a given chunk duration.
pub fn chunk_bytes(chunk_seconds: u32) -> usize {
    (chunk_seconds * SAMPLE_RATE * BYTES_PER_SAMPLE) as usize
}
