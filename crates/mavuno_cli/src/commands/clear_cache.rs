//! Clear-cache command implementation.

use super::{check_writes, open_store, CommandError};
use mavuno_storage::KeyValueStore;
use mavuno_sync_engine::{DurableCache, EventSink, SyncConfig, SystemClock};
use std::path::Path;
use std::sync::Arc;

/// Runs the clear-cache command.
pub async fn run(
    path: &Path,
    config: &SyncConfig,
    endpoint: Option<&str>,
) -> Result<(), CommandError> {
    let store = open_store(path).await?;
    let cleared = clear(store, config, endpoint).await?;
    match endpoint {
        Some(endpoint) if cleared == 0 => println!("No cache entry for {}", endpoint),
        Some(endpoint) => println!("Cleared cache entry for {}", endpoint),
        None => println!("Cleared {} cache entries", cleared),
    }
    Ok(())
}

/// Clears one endpoint, or every entry when `endpoint` is `None`.
/// Returns the number of entries that existed.
pub async fn clear(
    store: Arc<dyn KeyValueStore>,
    config: &SyncConfig,
    endpoint: Option<&str>,
) -> Result<usize, CommandError> {
    let existing = store
        .get_all_keys()
        .await?
        .into_iter()
        .filter(|key| match endpoint {
            Some(endpoint) => *key == config.cache_key(endpoint),
            None => key.starts_with(&config.cache_prefix),
        })
        .count();

    let events = EventSink::default();
    let mut rx = events.subscribe();
    let cache = DurableCache::new(store, config, Arc::new(SystemClock), events);
    match endpoint {
        Some(endpoint) => cache.clear(endpoint).await,
        None => cache.clear_all().await,
    }
    check_writes(&mut rx)?;

    Ok(existing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mavuno_storage::InMemoryStore;

    fn seeded() -> Arc<InMemoryStore> {
        Arc::new(InMemoryStore::with_data([
            ("cache_/a", r#"{"endpoint":"/a","data":1,"timestamp":0,"ttl":1}"#),
            ("cache_/b", r#"{"endpoint":"/b","data":2,"timestamp":0,"ttl":1}"#),
            ("syncQueue", "[]"),
        ]))
    }

    #[tokio::test]
    async fn clears_single_endpoint() {
        let store = seeded();
        let cleared = clear(store.clone(), &SyncConfig::default(), Some("/a"))
            .await
            .unwrap();
        assert_eq!(cleared, 1);
        assert_eq!(
            store.get_all_keys().await.unwrap(),
            vec!["cache_/b", "syncQueue"]
        );
    }

    #[tokio::test]
    async fn clears_everything_but_the_queue() {
        let store = seeded();
        let cleared = clear(store.clone(), &SyncConfig::default(), None).await.unwrap();
        assert_eq!(cleared, 2);
        assert_eq!(store.get_all_keys().await.unwrap(), vec!["syncQueue"]);
    }
}
