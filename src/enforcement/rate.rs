// src/enforcement/rate.rs
// Fixed-window rate limiting for the storefront gate

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::providers::{Clock, CounterStore};

const STORAGE_KEY_PREFIX: &str = "rl_";
const MAX_STORAGE_KEY_LEN: usize = 200;
const HASHED_KEY_PREFIX_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed { count: u64 },
    Limited { count: u64 },
    /// The counter store could not be used; the request is let through.
    FailedOpen,
}

impl RateLimitDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            RateLimitDecision::Allowed { .. } => "allowed",
            RateLimitDecision::Limited { .. } => "limited",
            RateLimitDecision::FailedOpen => "failed_open",
        }
    }

    pub fn is_allowed(self) -> bool {
        !matches!(self, RateLimitDecision::Limited { .. })
    }
}

/// Map an untrusted limiter key onto the storage alphabet `[A-Za-z0-9_.-]`.
/// Overlong keys keep a readable prefix and gain a digest of the raw key.
pub fn storage_key(raw: &str) -> String {
    let mapped: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let key = format!("{}{}", STORAGE_KEY_PREFIX, mapped);
    if key.len() <= MAX_STORAGE_KEY_LEN {
        return key;
    }
    let digest = Sha256::digest(raw.as_bytes());
    format!("{}_{:x}", &key[..HASHED_KEY_PREFIX_LEN], digest)
}

pub struct RateLimiter<'a> {
    store: &'a dyn CounterStore,
    clock: &'a dyn Clock,
}

impl<'a> RateLimiter<'a> {
    pub fn new(store: &'a dyn CounterStore, clock: &'a dyn Clock) -> Self {
        Self { store, clock }
    }

    /// Count one request against `key` and report whether it is within `limit` for the
    /// current window. Store failures fail open.
    pub fn check(&self, key: &str, limit: u32, window_secs: u64) -> RateLimitDecision {
        let storage_key = storage_key(key);
        let now = self.clock.now_unix();
        match self.store.increment_in_window(&storage_key, now, window_secs) {
            Ok(record) => {
                let decision = if record.count <= u64::from(limit) {
                    RateLimitDecision::Allowed {
                        count: record.count,
                    }
                } else {
                    RateLimitDecision::Limited {
                        count: record.count,
                    }
                };
                debug!(
                    key = %storage_key,
                    count = record.count,
                    limit,
                    decision = decision.as_str(),
                    "rate counter incremented"
                );
                decision
            }
            Err(err) => {
                let decision = RateLimitDecision::FailedOpen;
                warn!(
                    key = %storage_key,
                    error = %err,
                    decision = decision.as_str(),
                    "rate limiter failing open"
                );
                decision
            }
        }
    }

    pub fn check_and_increment(&self, key: &str, limit: u32, window_secs: u64) -> bool {
        self.check(key, limit, window_secs).is_allowed()
    }
}
