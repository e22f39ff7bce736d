//! # Mavuno Sync Engine
//!
//! Offline-first request layer for the Mavuno marketplace client.
//!
//! This crate provides:
//! - A request façade that tries the network first and degrades gracefully
//! - A freshness-bounded response cache persisted across restarts
//! - A durable FIFO queue of mutations made while offline
//! - Replay of queued mutations on reconnect, with bounded retries
//! - Connectivity tracking and a diagnostics event channel
//! - HTTP transport abstraction
//!
//! ## Architecture
//!
//! [`SyncCoordinator`] is the single entry point. Every request is attempted
//! live first, bounded by a timeout. On failure:
//! 1. While online, the failure is returned to the caller unchanged
//! 2. Offline reads are answered from the [`DurableCache`] if fresh
//! 3. Offline writes are appended to the [`DurableMutationQueue`]
//!
//! When the [`ConnectivityObserver`] reports an offline -> online transition,
//! the coordinator replays the queue in FIFO order.
//!
//! ## Key Invariants
//!
//! - Reads are never queued and writes are never served from the cache
//! - A queued mutation is removed only on successful replay or exhaustion
//! - At most one flush pass runs at a time
//! - Storage failures never reach request callers

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod clock;
mod config;
mod connectivity;
mod coordinator;
mod error;
mod events;
mod http;
mod persist;
mod queue;
mod transport;

pub use cache::{CacheEntry, DurableCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{SyncConfig, DEFAULT_CACHE_PREFIX, DEFAULT_QUEUE_KEY};
pub use connectivity::{ConnectivityEvent, ConnectivityObserver, ConnectivityProbe};
pub use coordinator::{
    DeliveryHandle, RequestOptions, RequestOutcome, SyncCoordinator, SyncStats,
};
pub use error::{SyncError, SyncResult, TransportError};
pub use events::{EventSink, FlushReport, SyncEvent};
pub use http::{HttpClient, HttpResponse, HttpTransport};
pub use queue::{DurableMutationQueue, OperationId, QueuedOperation};
pub use transport::{Method, MockTransport, Transport, TransportRequest};
