//! Durable FIFO queue of mutations awaiting replay.
//!
//! The queue is held in memory and mirrored to a single store key as a JSON
//! array. Every change rewrites the whole snapshot through the component's
//! persistence writer; a rejected write is reported on the diagnostics
//! channel and the in-memory list stays authoritative.
//!
//! Retry policy lives in the coordinator: [`DurableMutationQueue::record_failure`]
//! only counts, it never drops.
//!
//! A caller may watch an operation for its final outcome. Whoever takes the
//! operation out of the queue resolves the watcher: a replay hands over its
//! result, any other removal reports [`SyncError::DeliveryAbandoned`].

use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventSink, SyncEvent};
use crate::persist::{Acked, PersistWriter};
use crate::transport::{Method, TransportRequest};
use mavuno_storage::KeyValueStore;
use parking_lot::{Mutex, RwLock};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

const ID_SUFFIX_LEN: usize = 9;

/// Identity of a queued operation: enqueue time plus a random suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    /// Generates an id for an operation enqueued at `now_millis`.
    pub fn generate(now_millis: u64) -> Self {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(ID_SUFFIX_LEN)
            .map(|c| char::from(c).to_ascii_lowercase())
            .collect();
        Self(format!("{now_millis}-{suffix}"))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OperationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for OperationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A mutation waiting to be replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedOperation {
    /// Unique id.
    pub id: OperationId,
    /// Target endpoint.
    pub endpoint: String,
    /// Request method (never GET in practice).
    pub method: Method,
    /// Request body.
    #[serde(default)]
    pub payload: Option<Value>,
    /// Unix milliseconds at enqueue.
    pub enqueued_at: u64,
    /// Failed replays so far.
    pub attempts: u32,
    /// Failed replays allowed before the operation is dropped.
    pub max_attempts: u32,
}

impl QueuedOperation {
    /// True once the operation has used up its attempts.
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// The live request that replays this operation.
    pub fn to_request(&self) -> TransportRequest {
        TransportRequest::new(self.endpoint.clone(), self.method, self.payload.clone())
    }
}

type Watcher = oneshot::Sender<SyncResult<Value>>;

/// Two-tier (memory + store) FIFO list of pending mutations.
pub struct DurableMutationQueue {
    operations: RwLock<Vec<QueuedOperation>>,
    watchers: Mutex<HashMap<OperationId, Watcher>>,
    writer: PersistWriter,
    events: EventSink,
    queue_key: String,
    max_attempts: u32,
    clock: Arc<dyn Clock>,
}

impl DurableMutationQueue {
    /// Opens the queue, loading any persisted snapshot.
    ///
    /// A snapshot that does not parse is logged and ignored; it is replaced
    /// on the next change.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn open(
        store: Arc<dyn KeyValueStore>,
        config: &SyncConfig,
        clock: Arc<dyn Clock>,
        events: EventSink,
    ) -> SyncResult<Self> {
        let operations = match store.get_item(&config.queue_key).await? {
            Some(raw) => match serde_json::from_str::<Vec<QueuedOperation>>(&raw) {
                Ok(operations) => operations,
                Err(e) => {
                    warn!(key = %config.queue_key, error = %e, "discarding unreadable queue snapshot");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        if !operations.is_empty() {
            info!(pending = operations.len(), "restored queued operations");
        }

        Ok(Self {
            operations: RwLock::new(operations),
            watchers: Mutex::new(HashMap::new()),
            writer: PersistWriter::spawn(store, events.clone()),
            events,
            queue_key: config.queue_key.clone(),
            max_attempts: config.max_attempts,
            clock,
        })
    }

    /// Appends a mutation and persists the new snapshot.
    pub async fn enqueue(
        &self,
        endpoint: impl Into<String>,
        method: Method,
        payload: Option<Value>,
    ) -> QueuedOperation {
        let operation = self.new_operation(endpoint, method, payload);
        self.enqueue_operation(operation).await
    }

    /// Builds a fresh operation without queuing it.
    pub fn new_operation(
        &self,
        endpoint: impl Into<String>,
        method: Method,
        payload: Option<Value>,
    ) -> QueuedOperation {
        let now = self.clock.now_millis();
        QueuedOperation {
            id: OperationId::generate(now),
            endpoint: endpoint.into(),
            method,
            payload,
            enqueued_at: now,
            attempts: 0,
            max_attempts: self.max_attempts,
        }
    }

    /// Appends a prepared operation and persists the new snapshot.
    pub async fn enqueue_operation(&self, operation: QueuedOperation) -> QueuedOperation {
        let persisted = {
            let mut operations = self.operations.write();
            operations.push(operation.clone());
            self.persist(&operations)
        };
        persisted.wait().await;

        info!(
            operation_id = %operation.id,
            endpoint = %operation.endpoint,
            method = %operation.method,
            "queued operation for replay"
        );
        operation
    }

    /// Pending operations in replay order.
    pub fn list(&self) -> Vec<QueuedOperation> {
        self.operations.read().clone()
    }

    /// Looks up one pending operation.
    pub fn get(&self, id: &OperationId) -> Option<QueuedOperation> {
        self.operations.read().iter().find(|op| &op.id == id).cloned()
    }

    /// Number of pending operations.
    pub fn len(&self) -> usize {
        self.operations.read().len()
    }

    /// True if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.operations.read().is_empty()
    }

    /// Registers interest in the final outcome of `id`.
    ///
    /// Must be called before the operation is enqueued so no replay can
    /// finish unobserved.
    pub(crate) fn watch(&self, id: OperationId) -> oneshot::Receiver<SyncResult<Value>> {
        let (tx, rx) = oneshot::channel();
        self.watchers.lock().insert(id, tx);
        rx
    }

    /// Removes an operation. Returns it if it was pending.
    ///
    /// A watcher of the operation receives [`SyncError::DeliveryAbandoned`].
    pub async fn remove(&self, id: &OperationId) -> Option<QueuedOperation> {
        self.settle(id, Err(SyncError::DeliveryAbandoned)).await
    }

    /// Removes an operation and hands `outcome` to its watcher, if any.
    pub(crate) async fn settle(
        &self,
        id: &OperationId,
        outcome: SyncResult<Value>,
    ) -> Option<QueuedOperation> {
        let (removed, persisted) = {
            let mut operations = self.operations.write();
            let index = operations.iter().position(|op| &op.id == id)?;
            let removed = operations.remove(index);
            (removed, self.persist(&operations))
        };
        persisted.wait().await;

        if let Some(watcher) = self.watchers.lock().remove(id) {
            let _ = watcher.send(outcome);
        }
        debug!(operation_id = %id, "removed queued operation");
        Some(removed)
    }

    /// Counts a failed replay. Returns the updated operation if it is pending.
    pub async fn record_failure(&self, id: &OperationId) -> Option<QueuedOperation> {
        let (updated, persisted) = {
            let mut operations = self.operations.write();
            let operation = operations.iter_mut().find(|op| &op.id == id)?;
            operation.attempts = operation.attempts.saturating_add(1);
            let updated = operation.clone();
            (updated, self.persist(&operations))
        };
        persisted.wait().await;

        debug!(
            operation_id = %id,
            attempts = updated.attempts,
            max_attempts = updated.max_attempts,
            "recorded replay failure"
        );
        Some(updated)
    }

    /// Waits until every snapshot write issued so far has been applied.
    pub async fn sync_persistence(&self) {
        self.writer.barrier().await;
    }

    /// Submits the snapshot while the caller still holds the list lock, so
    /// snapshots reach the writer in mutation order.
    fn persist(&self, operations: &[QueuedOperation]) -> Acked {
        self.write_snapshot(serde_json::to_string(operations))
    }

    /// An unserializable snapshot leaves the stored one untouched.
    fn write_snapshot(&self, snapshot: serde_json::Result<String>) -> Acked {
        match snapshot {
            Ok(raw) => self.writer.set_acked(self.queue_key.clone(), raw),
            Err(e) => {
                warn!(key = %self.queue_key, error = %e, "failed to serialize queue snapshot; write skipped");
                self.events.emit(SyncEvent::PersistenceWriteFailed {
                    key: self.queue_key.clone(),
                    error: e.to_string(),
                });
                Acked::rejected()
            }
        }
    }
}
