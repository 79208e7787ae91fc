// src/enforcement/mod.rs

pub mod counter_store;
pub mod rate;

pub use counter_store::{KeyLocks, KvCounterStore, UnavailableCounterStore};
pub use rate::{storage_key, RateLimitDecision, RateLimiter};
