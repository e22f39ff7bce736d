//! Background persistence writer.
//!
//! All writes issued by one component go through a single task, so two
//! writes to the same key always land in the order they were issued even
//! when the caller does not wait for them. Reads submitted through the task
//! observe every write issued before them. Failures are logged and published
//! as [`SyncEvent::PersistenceWriteFailed`]; they never reach the caller.

use crate::events::{EventSink, SyncEvent};
use mavuno_storage::{KeyValueStore, StorageResult};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

type Ack = Option<oneshot::Sender<bool>>;

enum Command {
    Set { key: String, value: String, ack: Ack },
    Remove { keys: Vec<String>, ack: Ack },
    ClearPrefix { prefix: String, ack: Ack },
    Get {
        key: String,
        reply: oneshot::Sender<StorageResult<Option<String>>>,
    },
    Barrier(oneshot::Sender<()>),
}

/// Completion of a submitted write.
#[must_use = "dropping the handle does not cancel the write"]
pub(crate) struct Acked(oneshot::Receiver<bool>);

impl Acked {
    /// A handle for a write that was never submitted.
    pub(crate) fn rejected() -> Self {
        let (ack, done) = oneshot::channel();
        let _ = ack.send(false);
        Acked(done)
    }

    /// Waits for the write. Returns false if the store rejected it.
    pub(crate) async fn wait(self) -> bool {
        self.0.await.unwrap_or(false)
    }
}

/// Handle to a component's persistence task.
#[derive(Debug, Clone)]
pub(crate) struct PersistWriter {
    tx: mpsc::UnboundedSender<Command>,
}

impl PersistWriter {
    /// Spawns the writer task on the current runtime.
    pub(crate) fn spawn(store: Arc<dyn KeyValueStore>, events: EventSink) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(store, events, rx));
        Self { tx }
    }

    /// Queues a write without waiting for it.
    pub(crate) fn set(&self, key: String, value: String) {
        self.submit(Command::Set {
            key,
            value,
            ack: None,
        });
    }

    /// Queues a write; the returned handle resolves once it is applied.
    pub(crate) fn set_acked(&self, key: String, value: String) -> Acked {
        let (ack, done) = oneshot::channel();
        self.submit(Command::Set {
            key,
            value,
            ack: Some(ack),
        });
        Acked(done)
    }

    /// Queues removal of `keys`.
    pub(crate) fn remove_acked(&self, keys: Vec<String>) -> Acked {
        let (ack, done) = oneshot::channel();
        self.submit(Command::Remove {
            keys,
            ack: Some(ack),
        });
        Acked(done)
    }

    /// Queues removal of every key starting with `prefix`.
    pub(crate) fn clear_prefix_acked(&self, prefix: String) -> Acked {
        let (ack, done) = oneshot::channel();
        self.submit(Command::ClearPrefix {
            prefix,
            ack: Some(ack),
        });
        Acked(done)
    }

    /// Queues a read ordered after every write issued so far.
    ///
    /// A stopped writer reads as absent.
    pub(crate) fn get(&self, key: String) -> impl Future<Output = StorageResult<Option<String>>> {
        let (reply, done) = oneshot::channel();
        self.submit(Command::Get { key, reply });
        async move { done.await.unwrap_or(Ok(None)) }
    }

    /// Waits until every write issued before this call has been applied.
    pub(crate) async fn barrier(&self) {
        let (ack, done) = oneshot::channel();
        self.submit(Command::Barrier(ack));
        let _ = done.await;
    }

    fn submit(&self, command: Command) {
        if self.tx.send(command).is_err() {
            warn!("persistence writer has stopped; write discarded");
        }
    }
}

async fn run(
    store: Arc<dyn KeyValueStore>,
    events: EventSink,
    mut rx: mpsc::UnboundedReceiver<Command>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Set { key, value, ack } => {
                let ok = check(&events, &key, store.set_item(&key, value).await);
                reply(ack, ok);
            }
            Command::Remove { keys, ack } => {
                let label = keys.join(",");
                let ok = check(&events, &label, store.multi_remove(&keys).await);
                reply(ack, ok);
            }
            Command::ClearPrefix { prefix, ack } => {
                let ok = match store.get_all_keys().await {
                    Ok(keys) => {
                        let matching: Vec<String> =
                            keys.into_iter().filter(|k| k.starts_with(&prefix)).collect();
                        check(&events, &prefix, store.multi_remove(&matching).await)
                    }
                    Err(e) => check(&events, &prefix, Err(e)),
                };
                reply(ack, ok);
            }
            Command::Get { key, reply } => {
                let _ = reply.send(store.get_item(&key).await);
            }
            Command::Barrier(ack) => {
                let _ = ack.send(());
            }
        }
    }
    debug!("persistence writer stopped");
}

fn check(events: &EventSink, key: &str, result: StorageResult<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!(key, error = %e, "persistence write failed; keeping in-memory state");
            events.emit(SyncEvent::PersistenceWriteFailed {
                key: key.to_string(),
                error: e.to_string(),
            });
            false
        }
    }
}

fn reply(ack: Ack, ok: bool) {
    if let Some(ack) = ack {
        let _ = ack.send(ok);
    }
}
