//! Transcript assembly for a run.
//!
//! Two stateful jobs: strip the overlap that chunked transcription
//! produces at chunk boundaries, and group accepted text into
//! sentence-aligned segments. A third accumulation feeds complete
//! sentences to the claim detector with its own carryover.

use crate::defaults;
use crate::transcript::{sentences, TranscriptSegment};
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

/// Assembler tunables, defaulted from the documented constants.
#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    pub context_chars: usize,
    pub min_overlap_chars: usize,
    pub flush_max_chars: usize,
    pub flush_timeout: Duration,
    pub carryover_max_chars: usize,
    pub fallback_flush_chars: usize,
    pub fallback_min_words: usize,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            context_chars: defaults::TRANSCRIPT_CONTEXT_CHARS,
            min_overlap_chars: defaults::TRANSCRIPT_MIN_OVERLAP_CHARS,
            flush_max_chars: defaults::TRANSCRIPT_FLUSH_MAX_CHARS,
            flush_timeout: Duration::from_millis(defaults::TRANSCRIPT_FLUSH_TIMEOUT_MS),
            carryover_max_chars: defaults::CLAIM_CARRYOVER_MAX_CHARS,
            fallback_flush_chars: defaults::CLAIM_FALLBACK_FLUSH_CHARS,
            fallback_min_words: defaults::CLAIM_FALLBACK_MIN_WORDS,
        }
    }
}

/// What one accepted transcription produced.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AcceptOutput {
    pub segments: Vec<TranscriptSegment>,
    pub claim_sentences: Vec<String>,
}

/// Stateful per-run assembler.
pub struct TranscriptAssembler {
    config: AssemblerConfig,
    run_id: String,
    run_started_at: DateTime<Utc>,
    /// Rolling tail of accepted transcript, the transcriber's prior
    /// context and the overlap-strip window.
    prior_tail: String,
    buffer: String,
    buffer_start_sec: Option<f64>,
    buffer_end_sec: f64,
    last_append: Option<Instant>,
    segment_index: u64,
    claim_carryover: String,
}

/// Lowercase and collapse whitespace runs, keeping a map from each
/// normalized char to the raw byte offset just past its source.
fn normalize_with_map(text: &str) -> (Vec<char>, Vec<usize>) {
    let mut chars = Vec::new();
    let mut map = Vec::new();
    let mut pending_space = false;
    for (idx, c) in text.char_indices() {
        if c.is_whitespace() {
            if !chars.is_empty() {
                pending_space = true;
            }
            continue;
        }
        if pending_space {
            chars.push(' ');
            map.push(idx);
            pending_space = false;
        }
        for lower in c.to_lowercase() {
            chars.push(lower);
            map.push(idx + c.len_utf8());
        }
    }
    (chars, map)
}

impl TranscriptAssembler {
    pub fn new(run_id: String, run_started_at: DateTime<Utc>) -> Self {
        Self::with_config(run_id, run_started_at, AssemblerConfig::default())
    }

    pub fn with_config(
        run_id: String,
        run_started_at: DateTime<Utc>,
        config: AssemblerConfig,
    ) -> Self {
        Self {
            config,
            run_id,
            run_started_at,
            prior_tail: String::new(),
            buffer: String::new(),
            buffer_start_sec: None,
            buffer_end_sec: 0.0,
            last_append: None,
            segment_index: 0,
            claim_carryover: String::new(),
        }
    }

    /// Prior context for the next transcription call.
    pub fn prior_context(&self) -> Option<String> {
        if self.prior_tail.is_empty() {
            None
        } else {
            Some(self.prior_tail.clone())
        }
    }

    /// Next deadline for a timeout flush, while text is buffered.
    pub fn flush_deadline(&self) -> Option<Instant> {
        if self.buffer.is_empty() {
            None
        } else {
            self.last_append.map(|at| at + self.config.flush_timeout)
        }
    }

    fn clock(&self, sec: f64) -> String {
        crate::transcript::wall_clock(self.run_started_at, sec)
    }

    fn emit_segment(&mut self, text: String, start_sec: f64, end_sec: f64) -> TranscriptSegment {
        let segment = TranscriptSegment {
            segment_id: format!("{}-s{:04}", self.run_id, self.segment_index),
            start_sec,
            end_sec,
            start_clock: self.clock(start_sec),
            end_clock: self.clock(end_sec),
            text,
        };
        self.segment_index += 1;
        segment
    }

    /// Strip the longest duplicated prefix of `text` that echoes the prior
    /// tail, under lowercased whitespace-collapsed comparison.
    fn strip_overlap(&self, text: &str) -> String {
        if self.prior_tail.is_empty() || text.is_empty() {
            return text.to_string();
        }
        let (prior, _) = normalize_with_map(&self.prior_tail);
        let (new, map) = normalize_with_map(text);
        let max_l = self
            .config
            .context_chars
            .min(prior.len())
            .min(new.len());
        if max_l < self.config.min_overlap_chars {
            return text.to_string();
        }
        for l in (self.config.min_overlap_chars..=max_l).rev() {
            if prior[prior.len() - l..] == new[..l] {
                let cut = map[l - 1];
                return text[cut..].trim_start().to_string();
            }
        }
        text.to_string()
    }

    fn push_tail(&mut self, kept: &str) {
        if !self.prior_tail.is_empty() && !kept.is_empty() {
            self.prior_tail.push(' ');
        }
        self.prior_tail.push_str(kept);
        if self.prior_tail.chars().count() > self.config.context_chars {
            let skip = self.prior_tail.chars().count() - self.config.context_chars;
            self.prior_tail = self.prior_tail.chars().skip(skip).collect();
        }
    }

    fn feed_claims(&mut self, kept: &str, output: &mut AcceptOutput) {
        if !self.claim_carryover.is_empty() {
            self.claim_carryover.push(' ');
        }
        self.claim_carryover.push_str(kept);

        let (complete, tail) = sentences::split_complete(&self.claim_carryover);
        output.claim_sentences.extend(complete);
        self.claim_carryover = tail;

        // Truncate the carryover from the front.
        let count = self.claim_carryover.chars().count();
        if count > self.config.carryover_max_chars {
            self.claim_carryover = self
                .claim_carryover
                .chars()
                .skip(count - self.config.carryover_max_chars)
                .collect();
        }

        // Safety valve: a very long carryover with enough words goes to
        // the detector even without a terminator.
        if self.claim_carryover.chars().count() > self.config.fallback_flush_chars
            && self.claim_carryover.split_whitespace().count() >= self.config.fallback_min_words
        {
            output
                .claim_sentences
                .push(std::mem::take(&mut self.claim_carryover));
        }
    }

    /// Accept one transcription for the chunk covering
    /// `[start_sec, end_sec]`.
    pub fn accept(&mut self, raw_text: &str, start_sec: f64, end_sec: f64) -> AcceptOutput {
        let mut output = AcceptOutput::default();
        let kept = self.strip_overlap(raw_text.trim());
        if kept.is_empty() {
            return output;
        }
        self.push_tail(&kept);
        self.feed_claims(&kept, &mut output);

        if self.buffer.is_empty() {
            self.buffer_start_sec = Some(start_sec);
        } else {
            self.buffer.push(' ');
        }
        self.buffer.push_str(&kept);
        self.buffer_end_sec = end_sec;
        self.last_append = Some(Instant::now());

        if self.buffer.chars().count() >= self.config.flush_max_chars {
            // Oversize buffer flushes unconditionally.
            if let Some(segment) = self.flush_all() {
                output.segments.push(segment);
            }
        } else if sentences::has_boundary(&self.buffer) {
            if let Some(segment) = self.flush_complete() {
                output.segments.push(segment);
            }
        }
        output
    }

    /// Flush complete sentences, keeping any unterminated tail buffered.
    fn flush_complete(&mut self) -> Option<TranscriptSegment> {
        let (complete, tail) = sentences::split_complete(&self.buffer);
        if complete.is_empty() {
            return None;
        }
        let text = complete.join(" ");
        let start = self.buffer_start_sec.unwrap_or(self.buffer_end_sec);
        let end = self.buffer_end_sec;
        let segment = self.emit_segment(text, start, end);
        self.buffer = tail;
        // The next segment begins where this one ended.
        self.buffer_start_sec = if self.buffer.is_empty() {
            None
        } else {
            Some(end)
        };
        Some(segment)
    }

    /// Flush the whole buffer unconditionally.
    fn flush_all(&mut self) -> Option<TranscriptSegment> {
        if self.buffer.is_empty() {
            return None;
        }
        let text = std::mem::take(&mut self.buffer);
        let start = self.buffer_start_sec.take().unwrap_or(self.buffer_end_sec);
        let end = self.buffer_end_sec;
        self.last_append = None;
        Some(self.emit_segment(text, start, end))
    }

    /// Timeout flush, called when [`Self::flush_deadline`] elapses.
    pub fn timeout_flush(&mut self) -> Option<TranscriptSegment> {
        self.flush_all()
    }

    /// Forced flush on stop or reconnect: everything buffered is emitted,
    /// and a long-enough claim carryover goes to the detector too.
    pub fn force_flush(&mut self) -> AcceptOutput {
        let mut output = AcceptOutput::default();
        if let Some(segment) = self.flush_all() {
            output.segments.push(segment);
        }
        if self.claim_carryover.split_whitespace().count() >= self.config.fallback_min_words {
            output
                .claim_sentences
                .push(std::mem::take(&mut self.claim_carryover));
        } else {
            self.claim_carryover.clear();
        }
        output
    }

    /// Reset the overlap context. A new ingest attempt starts without any
    /// prior tail.
    pub fn reset_context(&mut self) {
        self.prior_tail.clear();
        self.last_append = None;
    }
}
