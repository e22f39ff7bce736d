//! Fault injection for store-level failures.

use async_trait::async_trait;
use mavuno_storage::{KeyValueStore, StorageError, StorageResult};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Wraps a store and rejects operations while switched on.
///
/// Writes (`set_item`, `remove_item`, `multi_remove`) fail with
/// [`StorageError::Rejected`]; reads fail with an I/O error.
#[derive(Debug)]
pub struct FaultyStore<S> {
    inner: S,
    reject_writes: AtomicBool,
    fail_reads: AtomicBool,
    rejected_writes: AtomicUsize,
}

impl<S: KeyValueStore> FaultyStore<S> {
    /// Wraps `inner`. All operations succeed until a fault is switched on.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            reject_writes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            rejected_writes: AtomicUsize::new(0),
        }
    }

    /// The wrapped store, bypassing fault injection.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Switches write rejection on or off.
    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Switches read failures on or off.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Number of writes rejected so far.
    pub fn rejected_writes(&self) -> usize {
        self.rejected_writes.load(Ordering::SeqCst)
    }

    fn check_write(&self, key: &str) -> StorageResult<()> {
        if self.reject_writes.load(Ordering::SeqCst) {
            self.rejected_writes.fetch_add(1, Ordering::SeqCst);
            return Err(StorageError::Rejected(format!("write to {key} rejected")));
        }
        Ok(())
    }

    fn check_read(&self) -> StorageResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Io(io::Error::other("injected read failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl<S: KeyValueStore> KeyValueStore for FaultyStore<S> {
    async fn set_item(&self, key: &str, value: String) -> StorageResult<()> {
        self.check_write(key)?;
        self.inner.set_item(key, value).await
    }

    async fn get_item(&self, key: &str) -> StorageResult<Option<String>> {
        self.check_read()?;
        self.inner.get_item(key).await
    }

    async fn remove_item(&self, key: &str) -> StorageResult<()> {
        self.check_write(key)?;
        self.inner.remove_item(key).await
    }

    async fn multi_remove(&self, keys: &[String]) -> StorageResult<()> {
        self.check_write(&keys.join(","))?;
        self.inner.multi_remove(keys).await
    }

    async fn get_all_keys(&self) -> StorageResult<Vec<String>> {
        self.check_read()?;
        self.inner.get_all_keys().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mavuno_storage::InMemoryStore;

    #[tokio::test]
    async fn passes_through_until_switched_on() {
        let store = FaultyStore::new(InMemoryStore::new());
        store.set_item("a", "1".into()).await.unwrap();

        store.set_reject_writes(true);
        let err = store.set_item("a", "2".into()).await.unwrap_err();
        assert!(matches!(err, StorageError::Rejected(_)));
        assert_eq!(store.rejected_writes(), 1);
        assert_eq!(store.get_item("a").await.unwrap().as_deref(), Some("1"));

        store.set_fail_reads(true);
        assert!(store.get_item("a").await.is_err());
        assert!(store.get_all_keys().await.is_err());

        store.set_reject_writes(false);
        store.set_fail_reads(false);
        store.remove_item("a").await.unwrap();
        assert!(store.inner().is_empty());
    }
}
