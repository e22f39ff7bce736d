//! Diagnostics channel.
//!
//! Every component reports noteworthy outcomes here in addition to logging
//! them, so integrators can monitor queue health and storage failures.

use crate::queue::OperationId;
use tokio::sync::broadcast;

/// Summary of one flush pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Operations in the snapshot that were replayed.
    pub attempted: usize,
    /// Operations replayed successfully and removed.
    pub delivered: usize,
    /// Operations that failed and stay queued.
    pub retained: usize,
    /// Operations that exhausted their attempts and were removed.
    pub dropped: usize,
    /// True if the pass did not run (offline, or another pass in progress).
    pub skipped: bool,
}

impl FlushReport {
    /// A report for a pass that did not run.
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// Something observable happened inside the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Reachability changed (duplicates included).
    ConnectivityChanged {
        /// New state.
        online: bool,
    },
    /// A mutation was queued for replay.
    Queued {
        /// Queued operation.
        operation_id: OperationId,
        /// Target endpoint.
        endpoint: String,
    },
    /// A queued mutation was replayed successfully.
    Replayed {
        /// Replayed operation.
        operation_id: OperationId,
    },
    /// A replay failed and the operation stays queued.
    ReplayFailed {
        /// Failed operation.
        operation_id: OperationId,
        /// Attempts made so far.
        attempts: u32,
    },
    /// A queued mutation was dropped after its last attempt.
    RetryExhausted {
        /// Dropped operation.
        operation_id: OperationId,
        /// Target endpoint.
        endpoint: String,
        /// Attempts made.
        attempts: u32,
    },
    /// The store rejected a write; in-memory state is still authoritative.
    PersistenceWriteFailed {
        /// Store key being written.
        key: String,
        /// Store error message.
        error: String,
    },
    /// A flush pass started.
    FlushStarted {
        /// Operations in the snapshot.
        pending: usize,
    },
    /// A flush pass finished.
    FlushCompleted(FlushReport),
}

/// Sending half of the diagnostics channel.
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventSink {
    /// Creates a channel holding up to `capacity` undelivered events per receiver.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event. Having no subscribers is fine.
    pub fn emit(&self, event: SyncEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribes to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_without_subscribers_is_silent() {
        let sink = EventSink::new(4);
        sink.emit(SyncEvent::ConnectivityChanged { online: true });
    }

    #[tokio::test]
    async fn subscribers_receive_events() {
        let sink = EventSink::new(4);
        let mut rx = sink.subscribe();
        sink.emit(SyncEvent::FlushStarted { pending: 2 });
        assert_eq!(rx.recv().await.unwrap(), SyncEvent::FlushStarted { pending: 2 });
    }

    #[test]
    fn skipped_report() {
        let report = FlushReport::skipped();
        assert!(report.skipped);
        assert_eq!(report.attempted, 0);
    }
}
