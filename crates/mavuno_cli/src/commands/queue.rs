//! Queue command implementation.

use super::{format_age, open_store, CommandError};
use mavuno_storage::KeyValueStore;
use mavuno_sync_engine::{
    Clock, DurableMutationQueue, EventSink, QueuedOperation, SyncConfig, SystemClock,
};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Pending queue listing.
#[derive(Debug, Serialize)]
pub struct QueueListing {
    /// Store key holding the queue.
    pub key: String,
    /// Number of pending operations.
    pub pending: usize,
    /// Operations in replay order.
    pub operations: Vec<QueuedOperation>,
}

/// Runs the queue command.
pub async fn run(path: &Path, config: &SyncConfig, format: &str) -> Result<(), CommandError> {
    let store = open_store(path).await?;
    let listing = collect(store, config).await?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&listing)?);
        }
        _ => {
            print_text_output(&listing, SystemClock.now_millis());
        }
    }

    Ok(())
}

/// Loads the pending operations.
pub async fn collect(
    store: Arc<dyn KeyValueStore>,
    config: &SyncConfig,
) -> Result<QueueListing, CommandError> {
    let queue =
        DurableMutationQueue::open(store, config, Arc::new(SystemClock), EventSink::default())
            .await?;
    let operations = queue.list();

    Ok(QueueListing {
        key: config.queue_key.clone(),
        pending: operations.len(),
        operations,
    })
}

fn print_text_output(listing: &QueueListing, now_millis: u64) {
    println!("Pending operations: {}", listing.pending);
    if listing.operations.is_empty() {
        return;
    }
    println!();
    for op in &listing.operations {
        println!(
            "  {}  {:<6} {}  attempts {}/{}  queued {} ago",
            op.id,
            op.method.as_str(),
            op.endpoint,
            op.attempts,
            op.max_attempts,
            format_age(now_millis.saturating_sub(op.enqueued_at))
        );
    }
}
