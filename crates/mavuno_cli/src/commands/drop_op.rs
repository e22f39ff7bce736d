//! Drop-op command implementation.

use super::{check_writes, open_store, CommandError};
use mavuno_storage::KeyValueStore;
use mavuno_sync_engine::{
    DurableMutationQueue, EventSink, OperationId, QueuedOperation, SyncConfig, SystemClock,
};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Runs the drop-op command.
pub async fn run(path: &Path, config: &SyncConfig, id: &str) -> Result<(), CommandError> {
    let store = open_store(path).await?;
    let dropped = drop_operation(store, config, id).await?;
    println!(
        "Dropped {} {} {} after {} attempt(s)",
        dropped.id, dropped.method, dropped.endpoint, dropped.attempts
    );
    Ok(())
}

/// Removes one operation from the persisted queue.
pub async fn drop_operation(
    store: Arc<dyn KeyValueStore>,
    config: &SyncConfig,
    id: &str,
) -> Result<QueuedOperation, CommandError> {
    let events = EventSink::default();
    let mut rx = events.subscribe();
    let queue = DurableMutationQueue::open(store, config, Arc::new(SystemClock), events).await?;

    let removed = queue
        .remove(&OperationId::from(id))
        .await
        .ok_or_else(|| format!("No queued operation with id {id}"))?;
    queue.sync_persistence().await;
    check_writes(&mut rx)?;

    info!(operation_id = %removed.id, endpoint = %removed.endpoint, "dropped queued operation");
    Ok(removed)
}
