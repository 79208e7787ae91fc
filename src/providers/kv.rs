use spin_sdk::key_value::Store;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("key-value store error: {0}")]
pub struct StoreError(pub String);

/// Byte-oriented key-value store used to persist rate counters.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;
}

impl KeyValueStore for Store {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Store::get(self, key).map_err(|e| StoreError(format!("{:?}", e)))
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        Store::set(self, key, value).map_err(|e| StoreError(format!("{:?}", e)))
    }
}
