//! Durable key-value storage.
//!
//! Every other component persists through the [`KeyValueStore`] trait: values
//! are JSON strings, keys are either global (unprefixed) or user-scoped via
//! [`ScopedStore`], which derives `<name>_<user_id>` keys so cross-user
//! leakage is impossible by construction rather than by string convention.

pub mod memory;
pub mod scoped;

pub use memory::MemoryStore;
pub use scoped::ScopedStore;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Result;

/// Namespaced durable key-value store.
///
/// Implementations must tolerate concurrent callers under cooperative
/// scheduling; all mutations issued by the core are whole-value writes.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the raw JSON string stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value` (a JSON string) under `key`, replacing any prior value.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removes the value stored under `key`. Missing keys are not an error.
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Reads and deserializes a stored record.
///
/// A record that fails deserialization is quarantined: the raw value is moved
/// to `<key>.quarantine` and the read reports absent. Malformed data is never
/// surfaced as a parsed value and never panics the caller.
pub async fn read_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>> {
    let Some(raw) = store.get(key).await? else {
        return Ok(None);
    };

    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(err) => {
            tracing::warn!(key, error = %err, "quarantining malformed record");
            store.set(&format!("{key}.quarantine"), &raw).await?;
            store.remove(key).await?;
            Ok(None)
        }
    }
}

/// Serializes and stores a record under `key`.
pub async fn write_json<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw).await
}
