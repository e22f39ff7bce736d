//! Freshness-bounded cache of GET responses.
//!
//! Entries live in memory and are mirrored to the store under
//! `<cache_prefix><endpoint>`. Reads fall back to the store and hydrate the
//! in-memory map. Store reads go through the persistence writer, so they see
//! every removal issued before them, and a load that overlaps a clear is
//! discarded. Expiry is evaluated on read only: a stale entry is ignored
//! until it is overwritten or cleared, never swept in the background.

use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::events::EventSink;
use crate::persist::PersistWriter;
use mavuno_storage::KeyValueStore;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A cached response as persisted in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Endpoint the response belongs to.
    pub endpoint: String,
    /// Response body.
    pub data: Value,
    /// Unix milliseconds when stored.
    pub timestamp: u64,
    /// Freshness window in milliseconds.
    pub ttl: u64,
}

impl CacheEntry {
    /// Milliseconds since the entry was stored.
    pub fn age(&self, now_millis: u64) -> u64 {
        now_millis.saturating_sub(self.timestamp)
    }

    /// True while the entry is younger than its TTL.
    pub fn is_fresh(&self, now_millis: u64) -> bool {
        self.age(now_millis) < self.ttl
    }
}

/// Two-tier (memory + store) response cache.
pub struct DurableCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    /// Bumped by every clear, only while `entries` is write-locked.
    clears: AtomicU64,
    writer: PersistWriter,
    prefix: String,
    clock: Arc<dyn Clock>,
}

impl DurableCache {
    /// Creates the cache. Must be called within a Tokio runtime.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        config: &SyncConfig,
        clock: Arc<dyn Clock>,
        events: EventSink,
    ) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clears: AtomicU64::new(0),
            writer: PersistWriter::spawn(store, events),
            prefix: config.cache_prefix.clone(),
            clock,
        }
    }

    fn key(&self, endpoint: &str) -> String {
        format!("{}{}", self.prefix, endpoint)
    }

    /// Stores a response, replacing any previous entry for `endpoint`.
    ///
    /// The store write happens in the background; its failure is reported on
    /// the diagnostics channel only.
    pub fn put(&self, endpoint: &str, data: Value, ttl: Duration) {
        let entry = CacheEntry {
            endpoint: endpoint.to_string(),
            data,
            timestamp: self.clock.now_millis(),
            ttl: millis(ttl),
        };

        match serde_json::to_string(&entry) {
            Ok(raw) => {
                let mut entries = self.entries.write();
                self.writer.set(self.key(endpoint), raw);
                entries.insert(endpoint.to_string(), entry);
            }
            Err(e) => {
                warn!(endpoint, error = %e, "failed to serialize cache entry");
                self.entries.write().insert(endpoint.to_string(), entry);
            }
        }
        debug!(endpoint, ttl_ms = millis(ttl), "cached response");
    }

    /// Returns the cached body if a fresh entry exists.
    pub async fn get(&self, endpoint: &str) -> Option<Value> {
        let now = self.clock.now_millis();
        let entry = self.entry(endpoint).await?;
        if entry.is_fresh(now) {
            debug!(endpoint, age_ms = entry.age(now), "cache hit");
            Some(entry.data)
        } else {
            debug!(endpoint, age_ms = entry.age(now), ttl_ms = entry.ttl, "cache entry expired");
            None
        }
    }

    /// Returns the entry for `endpoint` whether or not it is fresh.
    pub async fn entry(&self, endpoint: &str) -> Option<CacheEntry> {
        let key = self.key(endpoint);
        loop {
            let (clears, pending) = {
                let entries = self.entries.read();
                if let Some(entry) = entries.get(endpoint) {
                    return Some(entry.clone());
                }
                (
                    self.clears.load(Ordering::Acquire),
                    self.writer.get(key.clone()),
                )
            };

            let raw = match pending.await {
                Ok(Some(raw)) => raw,
                Ok(None) => {
                    debug!(endpoint, "cache miss");
                    return None;
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "failed to read cache entry");
                    return None;
                }
            };

            let loaded: CacheEntry = match serde_json::from_str(&raw) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(key = %key, error = %e, "ignoring unreadable cache entry");
                    return None;
                }
            };

            let hydrated = {
                let mut entries = self.entries.write();
                if self.clears.load(Ordering::Acquire) == clears {
                    // A put that raced with the load wins.
                    Some(
                        entries
                            .entry(endpoint.to_string())
                            .or_insert(loaded)
                            .clone(),
                    )
                } else {
                    None
                }
            };
            match hydrated {
                Some(entry) => return Some(entry),
                None => debug!(endpoint, "cache cleared during load; reading again"),
            }
        }
    }

    /// Drops the entry for `endpoint`.
    pub async fn clear(&self, endpoint: &str) {
        let removed = {
            let mut entries = self.entries.write();
            entries.remove(endpoint);
            self.clears.fetch_add(1, Ordering::AcqRel);
            self.writer.remove_acked(vec![self.key(endpoint)])
        };
        removed.wait().await;
        debug!(endpoint, "cleared cache entry");
    }

    /// Drops every entry.
    pub async fn clear_all(&self) {
        let removed = {
            let mut entries = self.entries.write();
            entries.clear();
            self.clears.fetch_add(1, Ordering::AcqRel);
            self.writer.clear_prefix_acked(self.prefix.clone())
        };
        removed.wait().await;
        debug!("cleared cache");
    }

    /// Waits until every store write issued so far has been applied.
    pub async fn sync_persistence(&self) {
        self.writer.barrier().await;
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use mavuno_storage::InMemoryStore;
    use serde_json::json;

    const HOUR: Duration = Duration::from_millis(3_600_000);

    fn make_cache(store: Arc<InMemoryStore>, clock: Arc<ManualClock>) -> DurableCache {
        DurableCache::new(store, &SyncConfig::default(), clock, EventSink::default())
    }

    #[test]
    fn entry_freshness_boundary() {
        let entry = CacheEntry {
            endpoint: "/weather/Arusha".into(),
            data: json!({}),
            timestamp: 1_000,
            ttl: 500,
        };
        assert!(entry.is_fresh(1_000));
        assert!(entry.is_fresh(1_499));
        assert!(!entry.is_fresh(1_500));
        assert!(entry.is_fresh(900));
    }

    #[tokio::test]
    async fn put_then_get() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = make_cache(Arc::new(InMemoryStore::new()), clock);
        cache.put("/weather/Arusha", json!({"temp": 24}), HOUR);
        assert_eq!(cache.get("/weather/Arusha").await, Some(json!({"temp": 24})));
        assert_eq!(cache.get("/weather/Moshi").await, None);
    }

    #[tokio::test]
    async fn expired_entry_is_absent_but_kept() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = make_cache(Arc::new(InMemoryStore::new()), clock.clone());
        cache.put("/markets", json!([1, 2]), Duration::from_secs(60));

        clock.advance(Duration::from_secs(61));
        assert_eq!(cache.get("/markets").await, None);
        assert!(cache.entry("/markets").await.is_some());
    }

    #[tokio::test]
    async fn put_overwrites_previous_entry() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = make_cache(Arc::new(InMemoryStore::new()), clock.clone());
        cache.put("/markets", json!(1), Duration::from_secs(10));
        clock.advance(Duration::from_secs(20));
        cache.put("/markets", json!(2), Duration::from_secs(10));
        assert_eq!(cache.get("/markets").await, Some(json!(2)));
    }

    #[tokio::test]
    async fn put_persists_in_background() {
        let store = Arc::new(InMemoryStore::new());
        let cache = make_cache(store.clone(), Arc::new(ManualClock::new(5)));
        cache.put("/farms/1", json!({"name": "Shamba"}), HOUR);
        cache.sync_persistence().await;

        let raw = store.get_item("cache_/farms/1").await.unwrap().unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            value,
            json!({
                "endpoint": "/farms/1",
                "data": {"name": "Shamba"},
                "timestamp": 5,
                "ttl": 3_600_000
            })
        );
    }

    #[tokio::test]
    async fn get_hydrates_from_store() {
        let raw = json!({
            "endpoint": "/weather/Arusha",
            "data": {"temp": 21},
            "timestamp": 1_000,
            "ttl": 10_000
        })
        .to_string();
        let store = Arc::new(InMemoryStore::with_data([("cache_/weather/Arusha", raw)]));
        let cache = make_cache(store.clone(), Arc::new(ManualClock::new(2_000)));

        assert_eq!(cache.get("/weather/Arusha").await, Some(json!({"temp": 21})));

        // Served from memory once hydrated.
        store.clear();
        assert_eq!(cache.get("/weather/Arusha").await, Some(json!({"temp": 21})));
    }

    #[tokio::test]
    async fn stale_persisted_entry_is_absent() {
        let raw = json!({
            "endpoint": "/weather/Arusha",
            "data": {"temp": 21},
            "timestamp": 0,
            "ttl": 1_000
        })
        .to_string();
        let store = Arc::new(InMemoryStore::with_data([("cache_/weather/Arusha", raw)]));
        let cache = make_cache(store, Arc::new(ManualClock::new(5_000)));
        assert_eq!(cache.get("/weather/Arusha").await, None);
    }

    #[tokio::test]
    async fn corrupt_persisted_entry_is_absent() {
        let store = Arc::new(InMemoryStore::with_data([("cache_/x", "{oops")]));
        let cache = make_cache(store, Arc::new(ManualClock::new(0)));
        assert_eq!(cache.get("/x").await, None);
    }

    #[tokio::test]
    async fn clear_and_clear_all() {
        let store = Arc::new(InMemoryStore::with_data([("syncQueue", "[]")]));
        let cache = make_cache(store.clone(), Arc::new(ManualClock::new(0)));
        cache.put("/a", json!(1), HOUR);
        cache.put("/b", json!(2), HOUR);

        cache.clear("/a").await;
        assert_eq!(cache.get("/a").await, None);
        assert_eq!(cache.get("/b").await, Some(json!(2)));
        assert!(store.get_item("cache_/a").await.unwrap().is_none());

        cache.clear_all().await;
        assert_eq!(cache.get("/b").await, None);
        assert_eq!(store.get_all_keys().await.unwrap(), vec!["syncQueue"]);
    }

    #[tokio::test]
    async fn clear_racing_a_read_stays_cleared() {
        let store = Arc::new(InMemoryStore::new());
        let cache = make_cache(store.clone(), Arc::new(ManualClock::new(0)));
        cache.put("/orders", json!([1]), HOUR);
        cache.sync_persistence().await;

        let ((), during) = tokio::join!(cache.clear("/orders"), cache.get("/orders"));
        assert_eq!(during, None);
        assert_eq!(cache.get("/orders").await, None);
        assert!(store.get_item("cache_/orders").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn load_overlapping_clear_is_discarded() {
        let raw = json!({"endpoint": "/orders", "data": [1], "timestamp": 0, "ttl": 60_000})
            .to_string();
        let store = Arc::new(InMemoryStore::with_data([("cache_/orders", raw)]));
        let cache = make_cache(store.clone(), Arc::new(ManualClock::new(0)));

        // The read is submitted first and finds the old value in the store.
        let (during, ()) = tokio::join!(cache.get("/orders"), cache.clear_all());
        assert_eq!(during, None);
        assert_eq!(cache.entry("/orders").await, None);
        assert!(store.is_empty());
    }

    #[test]
    fn oversized_ttl_saturates() {
        assert_eq!(millis(Duration::MAX), u64::MAX);
        assert_eq!(millis(Duration::from_secs(2)), 2_000);
    }
}
