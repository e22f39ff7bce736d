//! CLI command implementations.

pub mod cache;
pub mod clear_cache;
pub mod drop_op;
pub mod queue;

use mavuno_storage::{FileStore, KeyValueStore};
use mavuno_sync_engine::SyncEvent;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Error type shared by the commands.
pub type CommandError = Box<dyn std::error::Error>;

/// Opens an existing store directory. Never creates one.
pub async fn open_store(path: &Path) -> Result<Arc<dyn KeyValueStore>, CommandError> {
    if !path.is_dir() {
        return Err(format!("No store found at {:?}", path).into());
    }
    Ok(Arc::new(FileStore::open(path).await?))
}

/// Fails if the engine reported a rejected store write.
pub fn check_writes(events: &mut broadcast::Receiver<SyncEvent>) -> Result<(), CommandError> {
    while let Ok(event) = events.try_recv() {
        if let SyncEvent::PersistenceWriteFailed { key, error } = event {
            return Err(format!("Failed to write {key}: {error}").into());
        }
    }
    Ok(())
}

/// Formats a millisecond duration as a short human string.
pub fn format_age(millis: u64) -> String {
    let secs = millis / 1000;
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 60 * 60 {
        format!("{}m", secs / 60)
    } else if secs < 24 * 60 * 60 {
        format!("{}h", secs / (60 * 60))
    } else {
        format!("{}d", secs / (24 * 60 * 60))
    }
}
