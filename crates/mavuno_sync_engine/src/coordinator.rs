//! Request façade and replay coordinator.

use crate::cache::DurableCache;
use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::connectivity::{ConnectivityEvent, ConnectivityObserver};
use crate::error::{SyncError, SyncResult, TransportError};
use crate::events::{EventSink, FlushReport, SyncEvent};
use crate::queue::{DurableMutationQueue, OperationId, QueuedOperation};
use crate::transport::{Method, Transport, TransportRequest};
use mavuno_storage::KeyValueStore;
use parking_lot::RwLock;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Statistics about engine activity since startup.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Live attempts made, including replays.
    pub live_requests: u64,
    /// Live attempts that failed.
    pub live_failures: u64,
    /// Offline reads served from the cache.
    pub cache_hits: u64,
    /// Offline reads with no fresh cache entry.
    pub cache_misses: u64,
    /// Mutations queued.
    pub operations_queued: u64,
    /// Queued mutations replayed successfully.
    pub operations_replayed: u64,
    /// Queued mutations dropped after exhausting their attempts.
    pub operations_dropped: u64,
    /// Flush passes that ran.
    pub flushes_completed: u64,
    /// When the last flush pass finished.
    pub last_flush_time: Option<Instant>,
    /// Last error surfaced to a caller or hit during replay.
    pub last_error: Option<String>,
}

/// Per-request options.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// TTL for a cached GET response; defaults to the configured TTL.
    pub ttl: Option<Duration>,
    /// Live attempt timeout; defaults to the configured timeout.
    pub timeout: Option<Duration>,
    /// Endpoints whose cache entries are cleared after a successful live mutation.
    pub invalidate: Vec<String>,
}

impl RequestOptions {
    /// Options with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cache TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Sets the live attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Adds an endpoint to invalidate after a successful mutation.
    pub fn invalidating(mut self, endpoint: impl Into<String>) -> Self {
        self.invalidate.push(endpoint.into());
        self
    }
}

/// Result of a request that opted into delivery tracking.
#[derive(Debug)]
pub enum RequestOutcome {
    /// Answered now, live or from the cache.
    Completed(Value),
    /// Queued for replay; the handle resolves when replay succeeds or gives up.
    Queued(DeliveryHandle),
}

/// Future resolving to the eventual replay result of a queued mutation.
///
/// Only replays performed by the engine that issued the handle complete it;
/// an operation restored after a restart has no handle.
#[derive(Debug)]
pub struct DeliveryHandle {
    operation_id: OperationId,
    rx: oneshot::Receiver<SyncResult<Value>>,
}

impl DeliveryHandle {
    /// The queued operation this handle tracks.
    pub fn operation_id(&self) -> &OperationId {
        &self.operation_id
    }
}

impl Future for DeliveryHandle {
    type Output = SyncResult<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(SyncError::DeliveryAbandoned)))
    }
}

/// A request the coordinator could not answer directly.
enum Deferred {
    /// Final failure for the caller.
    Failed(SyncError),
    /// Mutation that failed while offline and still has to be queued.
    OfflineMutation {
        request: TransportRequest,
        failure: TransportError,
    },
}

/// Resets the flushing flag when a pass ends, however it ends.
struct FlushGuard<'a>(&'a AtomicBool);

impl<'a> FlushGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The single entry point for application requests.
///
/// Each request is attempted live first. On failure the coordinator consults
/// the connectivity observer: offline reads fall back to the cache, offline
/// writes are queued, and failures while online are returned unchanged.
/// Queued writes are replayed in FIFO order by [`SyncCoordinator::flush`].
pub struct SyncCoordinator<T: Transport> {
    config: SyncConfig,
    transport: T,
    connectivity: Arc<ConnectivityObserver>,
    cache: Arc<DurableCache>,
    queue: Arc<DurableMutationQueue>,
    events: EventSink,
    flushing: AtomicBool,
    stats: RwLock<SyncStats>,
}

impl<T: Transport> SyncCoordinator<T> {
    /// Assembles a coordinator from already constructed components.
    ///
    /// `events` should be the sink the cache and queue were built with.
    pub fn new(
        config: SyncConfig,
        transport: T,
        connectivity: Arc<ConnectivityObserver>,
        cache: Arc<DurableCache>,
        queue: Arc<DurableMutationQueue>,
        events: EventSink,
    ) -> Self {
        Self {
            config,
            transport,
            connectivity,
            cache,
            queue,
            events,
            flushing: AtomicBool::new(false),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Builds the cache and queue over `store` and assembles a coordinator.
    ///
    /// # Errors
    ///
    /// Returns an error if the persisted queue cannot be read.
    pub async fn open(
        config: SyncConfig,
        transport: T,
        store: Arc<dyn KeyValueStore>,
        connectivity: Arc<ConnectivityObserver>,
        clock: Arc<dyn Clock>,
    ) -> SyncResult<Self> {
        let events = EventSink::new(config.event_capacity);
        let cache = DurableCache::new(
            Arc::clone(&store),
            &config,
            Arc::clone(&clock),
            events.clone(),
        );
        let queue = DurableMutationQueue::open(store, &config, clock, events.clone()).await?;
        Ok(Self::new(
            config,
            transport,
            connectivity,
            Arc::new(cache),
            Arc::new(queue),
            events,
        ))
    }

    /// Gets the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Gets the connectivity observer.
    pub fn connectivity(&self) -> &Arc<ConnectivityObserver> {
        &self.connectivity
    }

    /// Gets the response cache.
    pub fn cache(&self) -> &Arc<DurableCache> {
        &self.cache
    }

    /// Gets the mutation queue.
    ///
    /// Removing an operation through the queue resolves its
    /// [`DeliveryHandle`] with [`SyncError::DeliveryAbandoned`].
    pub fn queue(&self) -> &Arc<DurableMutationQueue> {
        &self.queue
    }

    /// Pending mutations in replay order.
    pub fn pending_operations(&self) -> Vec<QueuedOperation> {
        self.queue.list()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns true while a flush pass is running.
    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::SeqCst)
    }

    /// Subscribes to the diagnostics channel.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Issues a request with default options.
    ///
    /// A mutation that fails while offline is queued and the caller still
    /// receives [`SyncError::Connectivity`] naming the queued operation.
    pub async fn request(
        &self,
        endpoint: &str,
        method: Method,
        payload: Option<Value>,
    ) -> SyncResult<Value> {
        self.request_with(endpoint, method, payload, RequestOptions::default())
            .await
    }

    /// Issues a request with explicit options.
    pub async fn request_with(
        &self,
        endpoint: &str,
        method: Method,
        payload: Option<Value>,
        options: RequestOptions,
    ) -> SyncResult<Value> {
        let request = TransportRequest::new(endpoint, method, payload);
        match self.dispatch(request, &options).await {
            Ok(body) => Ok(body),
            Err(Deferred::Failed(err)) => Err(err),
            Err(Deferred::OfflineMutation { request, failure }) => {
                let operation = self.queue.new_operation(
                    request.endpoint,
                    request.method,
                    request.payload,
                );
                let operation = self.queue_offline(operation).await;
                Err(SyncError::Connectivity {
                    source: failure,
                    queued: Some(operation.id),
                })
            }
        }
    }

    /// Issues a request; an offline mutation yields a [`DeliveryHandle`]
    /// instead of an error.
    pub async fn request_with_delivery(
        &self,
        endpoint: &str,
        method: Method,
        payload: Option<Value>,
        options: RequestOptions,
    ) -> SyncResult<RequestOutcome> {
        let request = TransportRequest::new(endpoint, method, payload);
        match self.dispatch(request, &options).await {
            Ok(body) => Ok(RequestOutcome::Completed(body)),
            Err(Deferred::Failed(err)) => Err(err),
            Err(Deferred::OfflineMutation { request, .. }) => {
                let operation = self.queue.new_operation(
                    request.endpoint,
                    request.method,
                    request.payload,
                );
                // Watched before the operation is visible to a flush.
                let rx = self.queue.watch(operation.id.clone());
                let operation = self.queue_offline(operation).await;
                Ok(RequestOutcome::Queued(DeliveryHandle {
                    operation_id: operation.id,
                    rx,
                }))
            }
        }
    }

    async fn dispatch(
        &self,
        request: TransportRequest,
        options: &RequestOptions,
    ) -> Result<Value, Deferred> {
        let timeout = options.timeout.unwrap_or(self.config.request_timeout);

        let failure = match self.send_live(&request, timeout).await {
            Ok(body) => {
                if request.method.is_mutation() {
                    for endpoint in &options.invalidate {
                        self.cache.clear(endpoint).await;
                    }
                } else {
                    let ttl = options.ttl.unwrap_or(self.config.default_ttl);
                    self.cache.put(&request.endpoint, body.clone(), ttl);
                }
                return Ok(body);
            }
            Err(failure) => failure,
        };

        if self.connectivity.is_online() {
            debug!(
                endpoint = %request.endpoint,
                method = %request.method,
                error = %failure,
                "live request failed while online"
            );
            let err = SyncError::TransientServer(failure);
            self.stats.write().last_error = Some(err.to_string());
            return Err(Deferred::Failed(err));
        }

        if request.method.is_mutation() {
            return Err(Deferred::OfflineMutation { request, failure });
        }

        match self.cache.get(&request.endpoint).await {
            Some(body) => {
                self.stats.write().cache_hits += 1;
                debug!(endpoint = %request.endpoint, "served offline read from cache");
                Ok(body)
            }
            None => {
                let err = SyncError::NoCachedDataAvailable {
                    endpoint: request.endpoint,
                };
                let mut stats = self.stats.write();
                stats.cache_misses += 1;
                stats.last_error = Some(err.to_string());
                Err(Deferred::Failed(err))
            }
        }
    }

    async fn queue_offline(&self, operation: QueuedOperation) -> QueuedOperation {
        let operation = self.queue.enqueue_operation(operation).await;
        self.stats.write().operations_queued += 1;
        self.events.emit(SyncEvent::Queued {
            operation_id: operation.id.clone(),
            endpoint: operation.endpoint.clone(),
        });
        operation
    }

    async fn send_live(
        &self,
        request: &TransportRequest,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        self.stats.write().live_requests += 1;
        debug!(endpoint = %request.endpoint, method = %request.method, "live request");

        let result = match tokio::time::timeout(timeout, self.transport.send(request, timeout)).await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        };

        if result.is_err() {
            self.stats.write().live_failures += 1;
        }
        result
    }

    /// Replays the queued mutations once, in FIFO order.
    ///
    /// Only operations queued before the pass starts are replayed. The pass is
    /// skipped while offline or while another pass is running.
    pub async fn flush(&self) -> FlushReport {
        if !self.connectivity.is_online() {
            debug!("flush skipped: offline");
            return FlushReport::skipped();
        }
        let Some(_guard) = FlushGuard::acquire(&self.flushing) else {
            debug!("flush skipped: already in progress");
            return FlushReport::skipped();
        };

        let snapshot = self.queue.list();
        let mut report = FlushReport::default();
        if snapshot.is_empty() {
            return report;
        }

        info!(pending = snapshot.len(), "flushing queued operations");
        self.events.emit(SyncEvent::FlushStarted {
            pending: snapshot.len(),
        });

        for operation in snapshot {
            report.attempted += 1;
            match self
                .send_live(&operation.to_request(), self.config.request_timeout)
                .await
            {
                Ok(body) => {
                    self.queue.settle(&operation.id, Ok(body)).await;
                    report.delivered += 1;
                    self.stats.write().operations_replayed += 1;
                    info!(operation_id = %operation.id, endpoint = %operation.endpoint, "replayed queued operation");
                    self.events.emit(SyncEvent::Replayed {
                        operation_id: operation.id.clone(),
                    });
                }
                Err(failure) => self.handle_replay_failure(&operation, failure, &mut report).await,
            }
        }

        {
            let mut stats = self.stats.write();
            stats.flushes_completed += 1;
            stats.last_flush_time = Some(Instant::now());
        }
        info!(
            delivered = report.delivered,
            retained = report.retained,
            dropped = report.dropped,
            "flush complete"
        );
        self.events.emit(SyncEvent::FlushCompleted(report.clone()));
        report
    }

    async fn handle_replay_failure(
        &self,
        operation: &QueuedOperation,
        failure: TransportError,
        report: &mut FlushReport,
    ) {
        self.stats.write().last_error = Some(failure.to_string());

        // None: removed by someone else while the call was in flight.
        let Some(updated) = self.queue.record_failure(&operation.id).await else {
            return;
        };

        if updated.is_exhausted() {
            self.queue
                .settle(
                    &operation.id,
                    Err(SyncError::RetryExhausted {
                        operation_id: operation.id.clone(),
                        attempts: updated.attempts,
                    }),
                )
                .await;
            report.dropped += 1;
            self.stats.write().operations_dropped += 1;
            error!(
                operation_id = %operation.id,
                endpoint = %operation.endpoint,
                method = %operation.method,
                attempts = updated.attempts,
                error = %failure,
                "dropping queued operation after final failed attempt"
            );
            self.events.emit(SyncEvent::RetryExhausted {
                operation_id: operation.id.clone(),
                endpoint: operation.endpoint.clone(),
                attempts: updated.attempts,
            });
        } else {
            report.retained += 1;
            warn!(
                operation_id = %operation.id,
                endpoint = %operation.endpoint,
                attempts = updated.attempts,
                max_attempts = updated.max_attempts,
                error = %failure,
                "replay failed; keeping operation queued"
            );
            self.events.emit(SyncEvent::ReplayFailed {
                operation_id: operation.id.clone(),
                attempts: updated.attempts,
            });
        }
    }

    /// Reacts to a connectivity report. Flushes on offline -> online only.
    pub async fn handle_connectivity_change(&self, event: ConnectivityEvent) -> Option<FlushReport> {
        self.events.emit(SyncEvent::ConnectivityChanged {
            online: event.online,
        });
        if event.came_online() {
            Some(self.flush().await)
        } else {
            None
        }
    }

    /// Waits until every cache and queue write issued so far has been applied.
    pub async fn sync_persistence(&self) {
        self.cache.sync_persistence().await;
        self.queue.sync_persistence().await;
    }
}

impl<T: Transport + 'static> SyncCoordinator<T> {
    /// Spawns a task that handles every connectivity report.
    ///
    /// The task runs until aborted through the returned handle.
    pub fn spawn_reconnect_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        let mut rx = self.connectivity.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        coordinator.handle_connectivity_change(event).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "connectivity listener lagged");
                        coordinator.flush().await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Spawns the periodic flush trigger if a flush interval is configured.
    pub fn spawn_periodic_flush(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let period = self.config.flush_interval?;
        let coordinator = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                interval.tick().await;
                if !coordinator.queue.is_empty() {
                    coordinator.flush().await;
                }
            }
        }))
    }
}
