use crate::errors::StoreError;

/// Minimal string key-value persistence used for consent flags and the
/// durable user-property map.
///
/// Implementations must be cheap to call from any thread; values are opaque
/// strings to the store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}
