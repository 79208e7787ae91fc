// Swappable capabilities the gate is composed from.
// The entrypoint wires host-backed implementations; tests inject in-memory ones.

use thiserror::Error;

use crate::storefront::StorefrontRecord;

/// Classifies a User-Agent string. Kept behind a trait so a scoring model can replace the
/// pattern heuristic without touching the admission pipeline.
pub trait BotClassifier {
    fn is_bot(&self, user_agent: &str) -> bool;
}

/// `CountryOf(ip)`: an ISO-3166 alpha-2 code, or `None` when the address cannot be classified.
pub trait CountryLookup {
    fn country_of(&self, ip: &str) -> Option<String>;
}

/// Persisted fixed-window counter for one limiter key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterRecord {
    pub window_start: u64,
    pub count: u64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CounterStoreError {
    #[error("counter store unavailable")]
    Unavailable,
    #[error("timed out waiting for exclusive access to {0}")]
    LockTimeout(String),
    #[error("failed to persist counter {0}")]
    Persist(String),
}

/// Key-value counter with an atomic per-key "read, maybe reset, increment, persist" cycle.
pub trait CounterStore {
    /// Increment the counter for `key` inside the window ending `window_secs` after its start,
    /// starting a fresh window at `now` when none exists or the stored one expired.
    /// Returns the record as persisted.
    fn increment_in_window(
        &self,
        key: &str,
        now: u64,
        window_secs: u64,
    ) -> Result<CounterRecord, CounterStoreError>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("registry is not configured")]
    NotConfigured,
    #[error("registry connection failed: {0}")]
    Connection(String),
    #[error("registry query failed: {0}")]
    Query(String),
    #[error("registry row could not be decoded: {0}")]
    Decode(String),
    #[error("registry lookup exceeded {0} ms")]
    Timeout(u128),
}

/// Registry query contract: at most one eligible storefront for a client identifier.
/// Implementations apply the integration-type and active-status predicate themselves.
pub trait StorefrontRegistry {
    fn find_active(&self, client_id: &str) -> Result<Option<StorefrontRecord>, RegistryError>;
}

/// Wall clock in unix seconds.
pub trait Clock {
    fn now_unix(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}
