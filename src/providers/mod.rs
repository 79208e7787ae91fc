pub mod contracts;
pub mod kv;

pub use contracts::{
    BotClassifier, Clock, CounterRecord, CounterStore, CounterStoreError, CountryLookup,
    RegistryError, StorefrontRegistry, SystemClock,
};
pub use kv::{KeyValueStore, StoreError};
