//! Network reachability tracking.
//!
//! The observer is the single source of truth for whether the device is
//! online. Platform glue feeds it with [`ConnectivityObserver::report`]; an
//! unavailable signal counts as offline so the engine degrades to cached
//! reads and queued writes instead of attempting doomed calls.

use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, info};

const EVENT_CAPACITY: usize = 64;

/// Platform facility answering "is the network reachable right now".
pub trait ConnectivityProbe: Send + Sync {
    /// Current reachability, or an error if the signal is unavailable.
    fn is_reachable(&self) -> Result<bool, String>;
}

/// One report from the platform signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityEvent {
    /// State after the report.
    pub online: bool,
    /// State before the report.
    pub previous: bool,
}

impl ConnectivityEvent {
    /// True for the offline -> online transition.
    pub fn came_online(&self) -> bool {
        self.online && !self.previous
    }

    /// True for the online -> offline transition.
    pub fn went_offline(&self) -> bool {
        !self.online && self.previous
    }
}

type Listener = Box<dyn Fn(ConnectivityEvent) + Send + Sync>;

/// Tracks reachability and fans out change notifications.
pub struct ConnectivityObserver {
    online: AtomicBool,
    events: broadcast::Sender<ConnectivityEvent>,
    listeners: RwLock<Vec<Listener>>,
}

impl ConnectivityObserver {
    /// Creates an observer that starts offline until the first report.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            online: AtomicBool::new(false),
            events,
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Creates an observer seeded from a probe. A failing probe means offline.
    pub fn with_probe(probe: &dyn ConnectivityProbe) -> Self {
        let observer = Self::new();
        let online = match probe.is_reachable() {
            Ok(online) => online,
            Err(e) => {
                info!(error = %e, "connectivity signal unavailable; assuming offline");
                false
            }
        };
        observer.online.store(online, Ordering::SeqCst);
        observer
    }

    /// Current state. Never blocks.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Records a platform report. `None` means the signal is unavailable.
    ///
    /// Listeners and subscribers are notified of every report, including
    /// ones that repeat the current state.
    pub fn report(&self, reachable: Option<bool>) -> ConnectivityEvent {
        let online = reachable.unwrap_or(false);
        let previous = self.online.swap(online, Ordering::SeqCst);
        let event = ConnectivityEvent { online, previous };

        if online != previous {
            info!(online, "connectivity changed");
        } else {
            debug!(online, "connectivity report without change");
        }

        for listener in self.listeners.read().iter() {
            listener(event);
        }
        let _ = self.events.send(event);
        event
    }

    /// Registers a callback run synchronously on every report.
    ///
    /// Callbacks must not register further callbacks.
    pub fn on_change<F>(&self, callback: F)
    where
        F: Fn(ConnectivityEvent) + Send + Sync + 'static,
    {
        self.listeners.write().push(Box::new(callback));
    }

    /// Subscribes to reports made from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.events.subscribe()
    }
}

impl Default for ConnectivityObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectivityObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectivityObserver")
            .field("online", &self.is_online())
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    struct FixedProbe(Result<bool, String>);

    impl ConnectivityProbe for FixedProbe {
        fn is_reachable(&self) -> Result<bool, String> {
            self.0.clone()
        }
    }

    #[test]
    fn starts_offline() {
        assert!(!ConnectivityObserver::new().is_online());
    }

    #[test]
    fn probe_seeds_state() {
        assert!(ConnectivityObserver::with_probe(&FixedProbe(Ok(true))).is_online());
        assert!(!ConnectivityObserver::with_probe(&FixedProbe(Ok(false))).is_online());
    }

    #[test]
    fn unavailable_probe_fails_open_to_offline() {
        let observer = ConnectivityObserver::with_probe(&FixedProbe(Err("no radio".into())));
        assert!(!observer.is_online());
    }

    #[test]
    fn unavailable_report_means_offline() {
        let observer = ConnectivityObserver::new();
        observer.report(Some(true));
        let event = observer.report(None);
        assert!(event.went_offline());
        assert!(!observer.is_online());
    }

    #[test]
    fn transitions_are_classified() {
        let observer = ConnectivityObserver::new();
        assert!(observer.report(Some(true)).came_online());
        let duplicate = observer.report(Some(true));
        assert!(!duplicate.came_online());
        assert!(!duplicate.went_offline());
        assert!(observer.report(Some(false)).went_offline());
    }

    #[test]
    fn listeners_see_every_report() {
        let observer = ConnectivityObserver::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        observer.on_change(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        observer.report(Some(true));
        observer.report(Some(true));
        observer.report(Some(false));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn subscribers_receive_events() {
        let observer = ConnectivityObserver::new();
        let mut rx = observer.subscribe();
        observer.report(Some(true));
        let event = rx.recv().await.unwrap();
        assert!(event.came_online());
    }
}
