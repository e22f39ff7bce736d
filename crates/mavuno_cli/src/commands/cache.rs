//! Cache command implementation.

use super::{format_age, open_store, CommandError};
use mavuno_storage::KeyValueStore;
use mavuno_sync_engine::{Clock, DurableCache, EventSink, SyncConfig, SystemClock};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// One cached response.
#[derive(Debug, Serialize)]
pub struct CacheRow {
    /// Endpoint the response belongs to.
    pub endpoint: String,
    /// Milliseconds since the response was stored.
    pub age_ms: u64,
    /// Freshness window in milliseconds.
    pub ttl_ms: u64,
    /// Whether an offline read would still be served.
    pub fresh: bool,
    /// Size of the serialized body in bytes.
    pub size: usize,
}

/// Cache listing.
#[derive(Debug, Serialize)]
pub struct CacheListing {
    /// Readable entries, sorted by endpoint.
    pub entries: Vec<CacheRow>,
    /// Store keys under the cache prefix that could not be read.
    pub unreadable: Vec<String>,
}

/// Runs the cache command.
pub async fn run(path: &Path, config: &SyncConfig, format: &str) -> Result<(), CommandError> {
    let store = open_store(path).await?;
    let listing = collect(store, config, Arc::new(SystemClock)).await?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&listing)?);
        }
        _ => {
            print_text_output(&listing);
        }
    }

    Ok(())
}

/// Loads every cache entry in the store.
pub async fn collect(
    store: Arc<dyn KeyValueStore>,
    config: &SyncConfig,
    clock: Arc<dyn Clock>,
) -> Result<CacheListing, CommandError> {
    let keys = store.get_all_keys().await?;
    let now = clock.now_millis();
    let cache = DurableCache::new(store, config, clock, EventSink::default());

    let mut listing = CacheListing {
        entries: Vec::new(),
        unreadable: Vec::new(),
    };

    for key in keys {
        let Some(endpoint) = key.strip_prefix(&config.cache_prefix) else {
            continue;
        };
        match cache.entry(endpoint).await {
            Some(entry) => listing.entries.push(CacheRow {
                endpoint: entry.endpoint.clone(),
                age_ms: entry.age(now),
                ttl_ms: entry.ttl,
                fresh: entry.is_fresh(now),
                size: entry.data.to_string().len(),
            }),
            None => listing.unreadable.push(key),
        }
    }

    Ok(listing)
}

fn print_text_output(listing: &CacheListing) {
    println!("Cached responses: {}", listing.entries.len());
    if !listing.entries.is_empty() {
        println!();
    }
    for row in &listing.entries {
        println!(
            "  {:<7} {}  age {}  ttl {}  {} bytes",
            if row.fresh { "fresh" } else { "expired" },
            row.endpoint,
            format_age(row.age_ms),
            format_age(row.ttl_ms),
            row.size
        );
    }

    if !listing.unreadable.is_empty() {
        println!();
        println!("Unreadable entries:");
        for key in &listing.unreadable {
            println!("  {}", key);
        }
    }
}
