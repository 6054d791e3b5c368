use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::AcmeError;

/// Identifies one token bucket. Two logical buckets are in play per
/// `spec.md` §4.2: the per-session HTTP bucket (`http`) and the fixed nonce
/// bucket (`nonce`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub id: &'static str,
    pub scale_ms: u64,
    pub limit: u32,
}

impl RateLimitKey {
    pub const fn new(id: &'static str, scale_ms: u64, limit: u32) -> Self {
        Self {
            id,
            scale_ms,
            limit,
        }
    }

    /// `(id="http", scale=1000ms, limit=10)`
    pub const DEFAULT_HTTP: Self = Self::new("http", 1000, 10);
    /// `(id="nonce", scale=1000ms, limit=20)`
    pub const DEFAULT_NONCE: Self = Self::new("nonce", 1000, 20);
}

/// A process-wide, keyed token-bucket gate. It is the only shared mutable
/// state across sessions and pollers (`spec.md` §5) and never sleeps on the
/// caller's behalf — on denial it returns `throttled` immediately so the
/// caller (the poller) can decide how to back off.
#[derive(Default)]
pub struct RateLimitGate {
    windows: Mutex<HashMap<RateLimitKey, VecDeque<Instant>>>,
}

impl RateLimitGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits one request against `key`'s sliding window. Returns
    /// `Err(AcmeError::Throttled)` if `limit` admissions have already
    /// happened within the trailing `scale_ms` window.
    pub fn admit(&self, key: RateLimitKey) -> Result<(), AcmeError> {
        let now = Instant::now();
        let window = Duration::from_millis(key.scale_ms);
        let mut windows = self.windows.lock().unwrap();
        let entries = windows.entry(key).or_default();
        while let Some(&oldest) = entries.front() {
            if now.duration_since(oldest) >= window {
                entries.pop_front();
            } else {
                break;
            }
        }
        if entries.len() >= key.limit as usize {
            return Err(AcmeError::Throttled(key.id));
        }
        entries.push_back(now);
        Ok(())
    }
}
