//! Key-value store trait definition.

use crate::error::StorageResult;
use async_trait::async_trait;
use std::sync::Arc;

/// A persistent key-value facility.
///
/// Keys and values are plain strings. The engine serializes its own
/// structures (JSON) before handing them to the store.
///
/// # Invariants
///
/// - `get_item` returns exactly the value last passed to `set_item` for that key
/// - `remove_item` and `multi_remove` succeed for keys that are absent
/// - `get_all_keys` lists keys in ascending order
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing
/// - [`super::FileStore`] - For persistent storage
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be written.
    async fn set_item(&self, key: &str, value: String) -> StorageResult<()>;

    /// Reads the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying medium cannot be read.
    async fn get_item(&self, key: &str) -> StorageResult<Option<String>>;

    /// Removes `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal fails.
    async fn remove_item(&self, key: &str) -> StorageResult<()>;

    /// Removes every key in `keys`.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered.
    async fn multi_remove(&self, keys: &[String]) -> StorageResult<()>;

    /// Lists every stored key in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the key set cannot be enumerated.
    async fn get_all_keys(&self) -> StorageResult<Vec<String>>;
}

#[async_trait]
impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    async fn set_item(&self, key: &str, value: String) -> StorageResult<()> {
        (**self).set_item(key, value).await
    }

    async fn get_item(&self, key: &str) -> StorageResult<Option<String>> {
        (**self).get_item(key).await
    }

    async fn remove_item(&self, key: &str) -> StorageResult<()> {
        (**self).remove_item(key).await
    }

    async fn multi_remove(&self, keys: &[String]) -> StorageResult<()> {
        (**self).multi_remove(keys).await
    }

    async fn get_all_keys(&self) -> StorageResult<Vec<String>> {
        (**self).get_all_keys().await
    }
}
