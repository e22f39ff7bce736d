//! End-to-end scenarios for the offline-first engine.

use mavuno_storage::KeyValueStore;
use mavuno_testkit::prelude::*;
use serde_json::json;
use std::time::Duration;
use tokio::sync::broadcast;

const HOUR_MS: u64 = 3_600_000;

async fn next_matching<F>(rx: &mut broadcast::Receiver<SyncEvent>, mut matches: F) -> SyncEvent
where
    F: FnMut(&SyncEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test]
async fn offline_write_then_reconnect() {
    let engine = TestEngine::memory().await;
    engine.go_offline();

    let err = engine
        .request("/orders", Method::Post, Some(json!({"qty": 3})))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Connectivity { queued: Some(_), .. }));
    assert_eq!(engine.pending_operations().len(), 1);

    let report = engine.go_online().await.expect("transition should flush");
    assert_eq!(report.delivered, 1);

    let posts = engine.transport.requests_to(Method::Post, "/orders");
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].payload, Some(json!({"qty": 3})));
    assert!(engine.pending_operations().is_empty());
}

#[tokio::test]
async fn offline_read_with_cold_cache() {
    let engine = TestEngine::memory().await;
    engine.go_offline();

    let err = engine
        .request("/weather/Arusha", Method::Get, None)
        .await
        .unwrap_err();
    assert!(
        matches!(err, SyncError::NoCachedDataAvailable { ref endpoint } if endpoint == "/weather/Arusha")
    );
    assert!(engine.pending_operations().is_empty());
}

#[tokio::test]
async fn offline_read_with_warm_cache() {
    let engine = TestEngine::memory().await;
    let forecast = json!({"temp": 24, "rain": [0.1, 0.0, 2.5]});
    engine
        .transport
        .set_response(Method::Get, "/weather/Arusha", forecast.clone());

    engine
        .request_with(
            "/weather/Arusha",
            Method::Get,
            None,
            RequestOptions::new().with_ttl(Duration::from_millis(HOUR_MS)),
        )
        .await
        .unwrap();

    engine.go_offline();
    engine.clock.advance(Duration::from_millis(HOUR_MS - 1));
    let cached = engine
        .request("/weather/Arusha", Method::Get, None)
        .await
        .unwrap();
    assert_eq!(cached, forecast);
}

#[tokio::test]
async fn retry_exhaustion_after_three_failed_passes() {
    let engine = TestEngine::memory_with(SyncConfig::new().with_max_attempts(3)).await;
    engine.go_offline();
    let _ = engine
        .request("/orders/7", Method::Put, Some(json!({"qty": 5})))
        .await;
    let id = engine.pending_operations()[0].id.clone();

    // Reachable according to the platform, but every call still fails.
    engine.connectivity.report(Some(true));

    for pass in 1..=3 {
        let report = engine.flush().await;
        assert_eq!(report.attempted, 1);
        if pass < 3 {
            assert_eq!(report.retained, 1);
            assert!(engine.queue().get(&id).is_some(), "present after pass {pass}");
        } else {
            assert_eq!(report.dropped, 1);
            assert!(engine.queue().get(&id).is_none());
        }
    }

    engine.transport.set_connected(true);
    let report = engine.flush().await;
    assert_eq!(report.attempted, 0);
    assert!(engine.transport.requests().is_empty());
    assert_eq!(engine.stats().operations_dropped, 1);
}

#[tokio::test]
async fn exhaustion_is_published() {
    let engine = TestEngine::memory_with(SyncConfig::new().with_max_attempts(1)).await;
    engine.go_offline();
    let _ = engine.request("/orders", Method::Delete, None).await;

    let mut events = engine.subscribe();
    engine.transport.fail_next(1);
    engine.go_online().await;

    let event = next_matching(&mut events, |e| matches!(e, SyncEvent::RetryExhausted { .. })).await;
    assert!(matches!(
        event,
        SyncEvent::RetryExhausted { ref endpoint, attempts: 1, .. } if endpoint == "/orders"
    ));
}

#[tokio::test]
async fn fifo_across_endpoints() {
    let engine = TestEngine::memory().await;
    engine.go_offline();
    let _ = engine.request("/a", Method::Post, Some(json!({"n": 1}))).await;
    let _ = engine.request("/b", Method::Put, Some(json!({"n": 2}))).await;
    let _ = engine.request("/c", Method::Delete, None).await;

    engine.go_online().await;

    let order: Vec<_> = engine
        .transport
        .requests()
        .into_iter()
        .map(|r| (r.method, r.endpoint))
        .collect();
    assert_eq!(
        order,
        vec![
            (Method::Post, "/a".to_string()),
            (Method::Put, "/b".to_string()),
            (Method::Delete, "/c".to_string()),
        ]
    );
}

#[tokio::test]
async fn failed_head_does_not_block_later_operations() {
    let engine = TestEngine::memory().await;
    engine.go_offline();
    let _ = engine.request("/a", Method::Post, None).await;
    let _ = engine.request("/b", Method::Post, None).await;

    engine.transport.fail_next(1);
    let report = engine.go_online().await.unwrap();
    assert_eq!(report.retained, 1);
    assert_eq!(report.delivered, 1);

    let pending = engine.pending_operations();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].endpoint, "/a");
    assert_eq!(pending[0].attempts, 1);
}

#[tokio::test]
async fn concurrent_flushes_are_single_flight() {
    let engine = TestEngine::memory().await;
    engine.go_offline();
    for i in 0..3 {
        let _ = engine.request("/orders", Method::Post, Some(json!({"n": i}))).await;
    }
    engine.transport.set_connected(true);
    engine.connectivity.report(Some(true));
    engine.transport.set_latency(Duration::from_millis(20));

    let (first, second) = tokio::join!(engine.flush(), engine.flush());
    let reports = [first, second];
    assert_eq!(reports.iter().filter(|r| r.skipped).count(), 1);
    assert_eq!(reports.iter().map(|r| r.delivered).sum::<usize>(), 3);
    assert_eq!(engine.transport.requests_to(Method::Post, "/orders").len(), 3);
    assert!(!engine.is_flushing());
}

#[tokio::test]
async fn rapid_online_events_replay_each_operation_once() {
    let engine = TestEngine::memory().await;
    engine.go_offline();
    let _ = engine.request("/a", Method::Post, None).await;
    let _ = engine.request("/b", Method::Post, None).await;

    let mut events = engine.subscribe();
    let listener = engine.coordinator.spawn_reconnect_listener();
    engine.transport.set_latency(Duration::from_millis(10));
    engine.transport.set_connected(true);
    engine.connectivity.report(Some(true));
    engine.connectivity.report(Some(false));
    engine.connectivity.report(Some(true));
    engine.connectivity.report(Some(true));

    next_matching(&mut events, |e| matches!(e, SyncEvent::FlushCompleted(_))).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    listener.abort();

    assert_eq!(engine.transport.requests_to(Method::Post, "/a").len(), 1);
    assert_eq!(engine.transport.requests_to(Method::Post, "/b").len(), 1);
    assert!(engine.pending_operations().is_empty());
}

#[tokio::test]
async fn enqueue_during_flush_waits_for_next_pass() {
    let engine = TestEngine::memory().await;
    engine.go_offline();
    let _ = engine.request("/a", Method::Post, None).await;
    engine.transport.set_connected(true);
    engine.connectivity.report(Some(true));
    engine.transport.set_latency(Duration::from_millis(30));

    let late = async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        engine.queue().enqueue("/b", Method::Post, None).await
    };
    let (report, late_op) = tokio::join!(engine.flush(), late);

    assert_eq!(report.attempted, 1);
    assert_eq!(report.delivered, 1);
    assert_eq!(engine.pending_operations(), vec![late_op]);

    let next = engine.flush().await;
    assert_eq!(next.delivered, 1);
    assert!(engine.pending_operations().is_empty());
}

#[tokio::test]
async fn online_failures_are_not_queued_or_cached_over() {
    let engine = TestEngine::memory().await;
    engine
        .transport
        .set_response(Method::Get, "/markets", json!({"maize": 410}));
    engine.request("/markets", Method::Get, None).await.unwrap();

    engine.transport.set_failure(TransportError::Status {
        code: 502,
        message: "bad gateway".into(),
    });
    engine.transport.fail_next(2);

    let read = engine.request("/markets", Method::Get, None).await.unwrap_err();
    assert!(matches!(read, SyncError::TransientServer(TransportError::Status { code: 502, .. })));
    let write = engine.request("/orders", Method::Post, None).await.unwrap_err();
    assert!(write.is_retryable());
    assert!(engine.pending_operations().is_empty());
    assert_eq!(
        engine.cache().get("/markets").await,
        Some(json!({"maize": 410}))
    );
}

#[tokio::test]
async fn timeout_while_offline_falls_back() {
    let engine = TestEngine::memory_with(
        SyncConfig::new().with_request_timeout(Duration::from_millis(10)),
    )
    .await;
    engine.connectivity.report(Some(false));
    engine.transport.set_latency(Duration::from_millis(200));

    let err = engine
        .request("/orders", Method::Post, Some(json!({"qty": 1})))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::Connectivity {
            source: TransportError::Timeout,
            queued: Some(_)
        }
    ));
    assert_eq!(engine.pending_operations().len(), 1);
}

#[tokio::test]
async fn queue_write_failure_is_reported_not_raised() {
    let engine = TestEngine::memory().await;
    let mut events = engine.subscribe();
    engine.store.set_reject_writes(true);
    engine.go_offline();

    let err = engine
        .request("/orders", Method::Post, Some(json!({"qty": 3})))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Connectivity { queued: Some(_), .. }));
    assert_eq!(engine.pending_operations().len(), 1);

    let event = next_matching(&mut events, |e| {
        matches!(e, SyncEvent::PersistenceWriteFailed { .. })
    })
    .await;
    assert!(matches!(event, SyncEvent::PersistenceWriteFailed { ref key, .. } if key == "syncQueue"));
    assert!(engine.store.rejected_writes() >= 1);

    engine.store.set_reject_writes(false);
    engine.go_online().await;
    assert!(engine.pending_operations().is_empty());
}

#[tokio::test]
async fn cache_write_failure_is_reported_not_raised() {
    let engine = TestEngine::memory().await;
    let mut events = engine.subscribe();
    engine.store.set_reject_writes(true);

    let body = engine.request("/markets", Method::Get, None).await.unwrap();
    assert_eq!(body, serde_json::Value::Null);

    let event = next_matching(&mut events, |e| {
        matches!(e, SyncEvent::PersistenceWriteFailed { .. })
    })
    .await;
    assert!(matches!(event, SyncEvent::PersistenceWriteFailed { ref key, .. } if key == "cache_/markets"));

    engine.go_offline();
    assert!(engine.request("/markets", Method::Get, None).await.is_ok());
}

#[tokio::test]
async fn invalidation_is_opt_in() {
    let engine = TestEngine::memory().await;
    engine
        .transport
        .set_response(Method::Get, "/orders", json!([{"id": 1}]));
    engine.request("/orders", Method::Get, None).await.unwrap();

    engine
        .request("/orders", Method::Post, Some(json!({"qty": 1})))
        .await
        .unwrap();
    assert!(engine.cache().get("/orders").await.is_some());

    engine
        .request_with(
            "/orders",
            Method::Post,
            Some(json!({"qty": 2})),
            RequestOptions::new().invalidating("/orders"),
        )
        .await
        .unwrap();
    assert!(engine.cache().get("/orders").await.is_none());
    engine.sync_persistence().await;
    assert!(engine.store.get_item("cache_/orders").await.unwrap().is_none());
}

#[tokio::test]
async fn delivery_confirmation_on_request() {
    let engine = TestEngine::memory().await;
    engine
        .transport
        .set_response(Method::Post, "/orders", json!({"id": 42}));
    engine.go_offline();

    let outcome = engine
        .request_with_delivery(
            "/orders",
            Method::Post,
            Some(json!({"qty": 3})),
            RequestOptions::new(),
        )
        .await
        .unwrap();
    let RequestOutcome::Queued(handle) = outcome else {
        panic!("offline mutation should be queued");
    };

    engine.go_online().await;
    assert_eq!(handle.await.unwrap(), json!({"id": 42}));
}

#[tokio::test]
async fn queue_and_cache_survive_restart() {
    let engine = TestEngine::file().await;
    engine
        .transport
        .set_response(Method::Get, "/farms/1", json!({"name": "Shamba"}));
    engine.request("/farms/1", Method::Get, None).await.unwrap();
    engine.go_offline();
    let _ = engine
        .request("/orders", Method::Post, Some(json!({"qty": 3})))
        .await;

    let engine = engine.restart().await;
    engine.go_offline();
    assert_eq!(engine.pending_operations().len(), 1);
    assert_eq!(
        engine.request("/farms/1", Method::Get, None).await.unwrap(),
        json!({"name": "Shamba"})
    );

    engine.go_online().await;
    assert_eq!(engine.transport.requests_to(Method::Post, "/orders").len(), 1);
}
