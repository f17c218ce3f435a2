//! Control-surface authentication and rate limiting.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Header and query parameter carrying the control secret.
pub const AUTH_HEADER: &str = "x-control-key";
pub const AUTH_QUERY: &str = "controlKey";

/// Compare two secrets without early exit on the first mismatch.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let mut diff = (a.len() ^ b.len()) as u8;
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= x ^ y;
    }
    diff == 0
}

/// Auth tiers for the two endpoint classes.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub control_password: Option<String>,
    pub protect_reads: bool,
}

impl AuthConfig {
    /// True when the supplied secret satisfies the control tier.
    pub fn allows_control(&self, supplied: Option<&str>) -> bool {
        match &self.control_password {
            None => true,
            Some(expected) => supplied
                .map(|s| constant_time_eq(s, expected))
                .unwrap_or(false),
        }
    }

    /// True when the supplied secret satisfies the read tier.
    pub fn allows_read(&self, supplied: Option<&str>) -> bool {
        if !self.protect_reads {
            return true;
        }
        self.allows_control(supplied)
    }
}

/// Per-IP-per-route counter over a fixed one-minute window.
pub struct RateLimiter {
    limit: u32,
    windows: Mutex<HashMap<(IpAddr, String), (u64, u32)>>,
}

impl RateLimiter {
    pub fn new(limit: u32) -> Self {
        Self {
            limit: limit.max(1),
            windows: Mutex::new(HashMap::new()),
        }
    }

    fn current_minute() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() / 60)
            .unwrap_or(0)
    }

    /// Record one hit; false when the window budget is exhausted.
    pub fn allow(&self, ip: IpAddr, route: &str) -> bool {
        self.allow_at(ip, route, Self::current_minute())
    }

    fn allow_at(&self, ip: IpAddr, route: &str, minute: u64) -> bool {
        let mut windows = self.windows.lock().unwrap();
        // Drop stale windows opportunistically so the map stays bounded.
        if windows.len() > 4096 {
            windows.retain(|_, (start, _)| *start == minute);
        }
        let entry = windows
            .entry((ip, route.to_string()))
            .or_insert((minute, 0));
        if entry.0 != minute {
            *entry = (minute, 0);
        }
        if entry.1 >= self.limit {
            return false;
        }
        entry.1 += 1;
        true
    }
}
