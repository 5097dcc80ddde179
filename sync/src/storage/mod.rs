//! Durable client-side key-value storage.
//!
//! The local mirror and the pending log persist through this trait. Values
//! are JSON strings; each write replaces the whole value under its key.

mod file;
mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

use crate::error::StorageError;
use async_trait::async_trait;
use vestry_engine::Timestamp;

/// A durable string key-value store.
#[async_trait]
pub trait DurableStorage: Send + Sync {
    /// Read a value. `Ok(None)` when the key was never written.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Replace the value stored under `key`.
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove a key. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Move an unreadable value out of the way under `<key>.corrupt-<now>`.
///
/// The original key is only removed once the copy is stored. If either step
/// fails the value stays where it was and [`StorageError::Corrupt`] is
/// returned, so callers must not overwrite `key`.
pub(crate) async fn quarantine(
    storage: &dyn DurableStorage,
    key: &str,
    raw: &str,
    reason: &str,
    now: Timestamp,
) -> Result<String, StorageError> {
    let target = format!("{key}.corrupt-{now}");
    let moved = match storage.set(&target, raw).await {
        Ok(()) => storage.remove(key).await,
        Err(e) => Err(e),
    };

    match moved {
        Ok(()) => {
            tracing::warn!(key, quarantined = %target, reason, "Quarantined unreadable value");
            Ok(target)
        }
        Err(e) => Err(StorageError::Corrupt {
            key: key.to_string(),
            message: format!("{reason} (could not quarantine: {e})"),
        }),
    }
}
