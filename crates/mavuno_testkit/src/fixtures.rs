//! Engine fixtures.
//!
//! [`TestEngine`] wires a [`SyncCoordinator`] to a [`MockTransport`], a
//! [`ManualClock`] and a [`FaultyStore`], and starts online.

use crate::faults::FaultyStore;
use mavuno_storage::{FileStore, InMemoryStore, KeyValueStore};
use mavuno_sync_engine::{
    ConnectivityObserver, FlushReport, ManualClock, MockTransport, SyncConfig, SyncCoordinator,
};
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;
use tempfile::TempDir;

/// Clock reading every fixture starts from (2023-11-14T22:13:20Z).
pub const START_MILLIS: u64 = 1_700_000_000_000;

/// Coordinator type used by the fixtures.
pub type TestCoordinator = SyncCoordinator<Arc<MockTransport>>;

/// Store type used by the fixtures.
pub type TestStore = FaultyStore<Arc<dyn KeyValueStore>>;

/// A sync engine over fake collaborators.
pub struct TestEngine {
    /// The engine under test.
    pub coordinator: Arc<TestCoordinator>,
    /// Scripted transport.
    pub transport: Arc<MockTransport>,
    /// Clock driving cache ages and operation timestamps.
    pub clock: Arc<ManualClock>,
    /// Backing store with fault injection.
    pub store: Arc<TestStore>,
    /// Connectivity observer the coordinator consults.
    pub connectivity: Arc<ConnectivityObserver>,
    config: SyncConfig,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestEngine {
    /// Creates an engine over an in-memory store with default config.
    pub async fn memory() -> Self {
        Self::memory_with(SyncConfig::default()).await
    }

    /// Creates an engine over an in-memory store.
    pub async fn memory_with(config: SyncConfig) -> Self {
        let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());
        Self::build(store, None, config).await
    }

    /// Creates an engine over a file store in a temporary directory.
    pub async fn file() -> Self {
        Self::file_with(SyncConfig::default()).await
    }

    /// Creates an engine over a file store in a temporary directory.
    pub async fn file_with(config: SyncConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = FileStore::open(temp_dir.path())
            .await
            .expect("Failed to open file store");
        let store: Arc<dyn KeyValueStore> = Arc::new(store);
        Self::build(store, Some(temp_dir), config).await
    }

    async fn build(
        store: Arc<dyn KeyValueStore>,
        temp_dir: Option<TempDir>,
        config: SyncConfig,
    ) -> Self {
        let store = Arc::new(FaultyStore::new(store));
        let clock = Arc::new(ManualClock::new(START_MILLIS));
        let transport = Arc::new(MockTransport::new());
        Self::assemble(store, clock, transport, temp_dir, config).await
    }

    async fn assemble(
        store: Arc<TestStore>,
        clock: Arc<ManualClock>,
        transport: Arc<MockTransport>,
        temp_dir: Option<TempDir>,
        config: SyncConfig,
    ) -> Self {
        let connectivity = Arc::new(ConnectivityObserver::new());
        connectivity.report(Some(true));
        transport.set_connected(true);

        let coordinator = SyncCoordinator::open(
            config.clone(),
            Arc::clone(&transport),
            store.clone(),
            Arc::clone(&connectivity),
            clock.clone(),
        )
        .await
        .expect("Failed to open sync engine");

        Self {
            coordinator: Arc::new(coordinator),
            transport,
            clock,
            store,
            connectivity,
            config,
            _temp_dir: temp_dir,
        }
    }

    /// Drops the network and reports the device offline.
    pub fn go_offline(&self) {
        self.transport.set_connected(false);
        self.connectivity.report(Some(false));
    }

    /// Restores the network, reports the device online and runs the
    /// transition handler. Returns the flush report if a flush ran.
    pub async fn go_online(&self) -> Option<FlushReport> {
        self.transport.set_connected(true);
        let event = self.connectivity.report(Some(true));
        self.coordinator.handle_connectivity_change(event).await
    }

    /// Simulates a process restart: waits for pending writes, then opens a
    /// fresh engine over the same store, clock and transport. The new engine
    /// starts online.
    pub async fn restart(self) -> Self {
        self.coordinator.sync_persistence().await;
        let Self {
            store,
            clock,
            transport,
            config,
            _temp_dir,
            ..
        } = self;
        transport.clear_requests();
        Self::assemble(store, clock, transport, _temp_dir, config).await
    }
}

impl Deref for TestEngine {
    type Target = TestCoordinator;

    fn deref(&self) -> &Self::Target {
        &self.coordinator
    }
}

/// Runs a future to completion on a fresh current-thread runtime.
///
/// For proptest bodies, which cannot be async.
pub fn block_on<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime")
        .block_on(future)
}
