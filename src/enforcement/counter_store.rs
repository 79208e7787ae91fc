// src/enforcement/counter_store.rs
// Fixed-window counters persisted in the key-value store, mutated under per-key locks.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use once_cell::sync::Lazy;
use tracing::warn;

use crate::providers::{CounterRecord, CounterStore, CounterStoreError, KeyValueStore};

// Serializes threads within one process only. Spin gives each request its own instance, so
// concurrent requests are not ordered by this table.
static PROCESS_KEY_LOCKS: Lazy<Arc<KeyLocks>> = Lazy::new(|| Arc::new(KeyLocks::default()));

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct KeyLock {
    held: Mutex<bool>,
    released: Condvar,
}

/// Table of per-key exclusive locks. Entries exist only while a key is locked or awaited.
#[derive(Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<String, Arc<KeyLock>>>,
}

impl KeyLocks {
    /// Wait up to `timeout` for exclusive access to `key`.
    pub fn acquire(&self, key: &str, timeout: Duration) -> Option<KeyGuard<'_>> {
        let lock = {
            let mut locks = lock_unpoisoned(&self.locks);
            Arc::clone(locks.entry(key.to_string()).or_default())
        };

        let held = lock_unpoisoned(&lock.held);
        let (mut held, _) = lock
            .released
            .wait_timeout_while(held, timeout, |held| *held)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *held {
            drop(held);
            self.forget_if_idle(key, &lock);
            return None;
        }
        *held = true;
        drop(held);

        Some(KeyGuard {
            owner: self,
            key: key.to_string(),
            lock,
        })
    }

    /// Number of keys currently locked or awaited.
    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.locks).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn forget_if_idle(&self, key: &str, lock: &Arc<KeyLock>) {
        let mut locks = lock_unpoisoned(&self.locks);
        // one reference in the table, one held by the caller
        if Arc::strong_count(lock) == 2 && !*lock_unpoisoned(&lock.held) {
            locks.remove(key);
        }
    }
}

/// Exclusive access to one key; released on drop.
pub struct KeyGuard<'a> {
    owner: &'a KeyLocks,
    key: String,
    lock: Arc<KeyLock>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        *lock_unpoisoned(&self.lock.held) = false;
        self.lock.released.notify_one();
        self.owner.forget_if_idle(&self.key, &self.lock);
    }
}

/// Counters stored as `"<window_start>|<count>"` under already-sanitized keys.
pub struct KvCounterStore<S> {
    store: S,
    locks: Arc<KeyLocks>,
    lock_timeout: Duration,
}

impl<S: KeyValueStore> KvCounterStore<S> {
    /// Uses the process-wide lock table so every store handle in this process serializes
    /// against the same keys.
    pub fn new(store: S, lock_timeout: Duration) -> Self {
        Self::with_locks(store, Arc::clone(&PROCESS_KEY_LOCKS), lock_timeout)
    }

    pub fn with_locks(store: S, locks: Arc<KeyLocks>, lock_timeout: Duration) -> Self {
        Self {
            store,
            locks,
            lock_timeout,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: KeyValueStore> CounterStore for KvCounterStore<S> {
    fn increment_in_window(
        &self,
        key: &str,
        now: u64,
        window_secs: u64,
    ) -> Result<CounterRecord, CounterStoreError> {
        let _guard = self
            .locks
            .acquire(key, self.lock_timeout)
            .ok_or_else(|| CounterStoreError::LockTimeout(key.to_string()))?;

        let stored = self.store.get(key).map_err(|err| {
            warn!(key, error = %err, "failed to read rate counter");
            CounterStoreError::Unavailable
        })?;

        let mut record = stored
            .as_deref()
            .and_then(decode_record)
            .filter(|record| now.saturating_sub(record.window_start) < window_secs)
            .unwrap_or(CounterRecord {
                window_start: now,
                count: 0,
            });
        record.count += 1;

        self.store
            .set(key, encode_record(&record).as_bytes())
            .map_err(|err| {
                warn!(key, error = %err, "failed to persist rate counter");
                CounterStoreError::Persist(key.to_string())
            })?;
        Ok(record)
    }
}

/// Used when the host store cannot be opened; every increment reports the outage.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableCounterStore;

impl CounterStore for UnavailableCounterStore {
    fn increment_in_window(
        &self,
        _key: &str,
        _now: u64,
        _window_secs: u64,
    ) -> Result<CounterRecord, CounterStoreError> {
        Err(CounterStoreError::Unavailable)
    }
}

pub fn encode_record(record: &CounterRecord) -> String {
    format!("{}|{}", record.window_start, record.count)
}

pub fn decode_record(raw: &[u8]) -> Option<CounterRecord> {
    let text = std::str::from_utf8(raw).ok()?;
    let (start, count) = text.trim().split_once('|')?;
    Some(CounterRecord {
        window_start: start.trim().parse().ok()?,
        count: count.trim().parse().ok()?,
    })
}
