//! Reconnect backoff policy.
//!
//! Exponential backoff with a floor, a cap and a small uniform jitter so
//! repeated reconnects against the same source do not synchronize.

use crate::defaults;
use rand::Rng;

#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base_ms: u64,
    pub max_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: defaults::INGEST_RETRY_BASE_MS,
            max_ms: defaults::INGEST_RETRY_MAX_MS,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self { base_ms, max_ms }
    }

    /// Capped exponential delay for `attempt` (1-based), before jitter.
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let exp = attempt.saturating_sub(1).min(20);
        self.base_ms.saturating_mul(1u64 << exp).min(self.max_ms)
    }

    /// Upper bound (exclusive) of the jitter added to `backoff` ms.
    pub fn jitter_cap_ms(&self, backoff_ms: u64) -> u64 {
        let fifth = backoff_ms / 5;
        fifth.max(80).min(500)
    }

    /// Full delay for `attempt`: floor(250, backoff + jitter).
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let backoff = self.backoff_ms(attempt);
        let cap = self.jitter_cap_ms(backoff);
        let jitter = rand::thread_rng().gen_range(0..cap.max(1));
        (backoff + jitter).max(defaults::INGEST_RETRY_FLOOR_MS)
    }
}
