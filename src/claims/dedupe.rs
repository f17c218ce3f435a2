//! Run-wide recent-claim dedupe.
//!
//! A bounded map of normalized claim keys with a TTL. A candidate whose
//! key was seen within the TTL is dropped before promotion.

use crate::defaults;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Normalize a claim text into its dedupe key: lowercased, with runs of
/// non-alphanumeric characters collapsed to single spaces.
pub fn claim_key(text: &str) -> String {
    let mut key = String::with_capacity(text.len());
    let mut last_was_space = true;
    for c in text.chars() {
        if c.is_alphanumeric() {
            key.extend(c.to_lowercase());
            last_was_space = false;
        } else if !last_was_space {
            key.push(' ');
            last_was_space = true;
        }
    }
    key.trim_end().to_string()
}

/// Bounded TTL map of recently seen claim keys.
pub struct RecentClaims {
    entries: HashMap<String, Instant>,
    order: VecDeque<String>,
    cap: usize,
    ttl: Duration,
}

impl Default for RecentClaims {
    fn default() -> Self {
        Self::new(
            defaults::CLAIM_DEDUPE_CAP,
            Duration::from_secs(defaults::CLAIM_DEDUPE_TTL_SECS),
        )
    }
}

impl RecentClaims {
    pub fn new(cap: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            cap,
            ttl,
        }
    }

    /// Record `text` and report whether it is new. Returns `false` when the
    /// normalized key was already seen within the TTL.
    pub fn insert(&mut self, text: &str) -> bool {
        self.insert_at(text, Instant::now())
    }

    fn insert_at(&mut self, text: &str, now: Instant) -> bool {
        let key = claim_key(text);
        if key.is_empty() {
            return false;
        }

        if let Some(&seen) = self.entries.get(&key) {
            if now.duration_since(seen) < self.ttl {
                return false;
            }
        }

        if !self.entries.contains_key(&key) {
            self.order.push_back(key.clone());
        }
        self.entries.insert(key, now);

        // Evict oldest entries past the cap.
        while self.entries.len() > self.cap {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            } else {
                break;
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_collapses_punctuation_and_case() {
        assert_eq!(
            claim_key("Inflation fell to 3.1% -- in 2024!"),
            "inflation fell to 3 1 in 2024"
        );
        assert_eq!(claim_key("  ...  "), "");
    }

    #[test]
    fn repeat_within_ttl_is_dropped() {
        let mut recent = RecentClaims::default();
        assert!(recent.insert("Inflation fell to 3.1 percent."));
        assert!(!recent.insert("inflation fell to 3.1 percent"));
        assert_eq!(recent.len(), 1);
    }

    #[test]
    fn repeat_after_ttl_is_accepted_again() {
        let mut recent = RecentClaims::new(10, Duration::from_secs(600));
        let start = Instant::now();
        assert!(recent.insert_at("the deficit doubled", start));
        assert!(!recent.insert_at("the deficit doubled", start + Duration::from_secs(599)));
        assert!(recent.insert_at("the deficit doubled", start + Duration::from_secs(601)));
    }

    #[test]
    fn cap_evicts_oldest_entries() {
        let mut recent = RecentClaims::new(3, Duration::from_secs(600));
        assert!(recent.insert("claim one is long"));
        assert!(recent.insert("claim two is long"));
        assert!(recent.insert("claim three is long"));
        assert!(recent.insert("claim four is long"));
        assert_eq!(recent.len(), 3);
        // The oldest key was evicted and is accepted again.
        assert!(recent.insert("claim one is long"));
    }

    #[test]
    fn empty_key_is_never_accepted() {
        let mut recent = RecentClaims::default();
        assert!(!recent.insert("!!!"));
        assert!(recent.is_empty());
    }

    #[test]
    fn clear_resets_state() {
        let mut recent = RecentClaims::default();
        recent.insert("some long claim text");
        recent.clear();
        assert!(recent.is_empty());
        assert!(recent.insert("some long claim text"));
    }
}
