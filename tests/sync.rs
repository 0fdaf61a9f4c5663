//! Sync Integration Tests
//!
//! Queue draining: ordering, partial failure, wake-up idempotence, client
//! notification and the background worker.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use offsync::adapters::{ChannelScheduler, Connectivity, ManualConnectivity, RetryScheduler};
use offsync::core::{
    content_hash, Adapters, DrainOutcome, OfflineWorker, RetryPolicy, SyncError, SyncWorker,
    SEARCH_CACHE,
};
use offsync::domain::{
    ClientMessage, HttpRequest, HttpResponse, LibraryEntry, QueueName, RetryIntent,
};
use reqwest::Method;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio_test::assert_ok;

fn saved_cursor(request: &HttpRequest) -> String {
    request.json::<LibraryEntry>().unwrap().cursor
}

async fn queue_saves(h: &Harness, cursors: &[&str]) {
    h.connectivity.set_online(false);
    for cursor in cursors {
        h.worker.handle_fetch(save_request(cursor)).await.unwrap();
    }
    h.connectivity.set_online(true);
}

#[tokio::test]
async fn test_drain_replays_in_enqueue_order() {
    let h = harness(FakeNetwork::ok_with("")).await;
    queue_saves(&h, &["a", "b", "c"]).await;

    let outcome = assert_ok!(h.worker.handle_wake(&RetryIntent::new("save")).await);
    assert_eq!(outcome, DrainOutcome::Completed { replayed: 3 });

    let calls = h.network.calls();
    let cursors: Vec<String> = calls.iter().map(saved_cursor).collect();
    assert_eq!(cursors, vec!["a", "b", "c"]);
    assert!(calls.iter().all(|call| call.method == Method::POST));
    assert!(calls.iter().all(|call| call.url.as_str() == API_URL));

    assert_eq!(h.worker.queues().len(QueueName::Save).await.unwrap(), 0);
}

#[tokio::test]
async fn test_drain_halts_at_first_failure() {
    let network = FakeNetwork::new(|request| {
        if saved_cursor(request) == "b" {
            Ok(HttpResponse::new(500))
        } else {
            Ok(HttpResponse::ok())
        }
    });
    let h = harness(network).await;
    queue_saves(&h, &["a", "b", "c"]).await;

    let outcome = h.worker.handle_wake(&RetryIntent::new("save")).await.unwrap();
    assert_eq!(
        outcome,
        DrainOutcome::Halted {
            replayed: 1,
            remaining: 2,
            error: "500 Internal Server Error".to_string(),
        }
    );

    // c was never attempted
    assert_eq!(h.network.call_count(), 2);

    let remaining: Vec<String> = h
        .worker
        .queues()
        .peek_all(QueueName::Save)
        .await
        .unwrap()
        .into_iter()
        .map(|item| serde_json::from_value::<LibraryEntry>(item).unwrap().cursor)
        .collect();
    assert_eq!(remaining, vec!["b", "c"]);
}

#[tokio::test]
async fn test_transport_error_keeps_items() {
    let h = harness(FakeNetwork::new(|_| anyhow::bail!("connection reset"))).await;

    h.connectivity.set_online(false);
    h.worker.handle_fetch(remove_request("x1")).await.unwrap();
    h.worker.handle_fetch(remove_request("x2")).await.unwrap();
    h.connectivity.set_online(true);

    let outcome = h.worker.handle_wake(&RetryIntent::new("remove")).await.unwrap();
    match outcome {
        DrainOutcome::Halted {
            replayed,
            remaining,
            error,
        } => {
            assert_eq!(replayed, 0);
            assert_eq!(remaining, 2);
            assert!(error.contains("connection reset"));
        }
        other => panic!("expected halted drain, got {:?}", other),
    }

    let queued = h.worker.queues().peek_all(QueueName::Remove).await.unwrap();
    assert_eq!(queued, vec![json!("x1"), json!("x2")]);
}

#[tokio::test]
async fn test_remove_replays_delete_by_cursor() {
    let h = harness(FakeNetwork::ok_with("")).await;

    h.connectivity.set_online(false);
    h.worker.handle_fetch(remove_request("abc123")).await.unwrap();
    h.connectivity.set_online(true);

    let outcome = h.worker.handle_wake(&RetryIntent::new("remove")).await.unwrap();
    assert_eq!(outcome, DrainOutcome::Completed { replayed: 1 });

    let calls = h.network.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method, Method::DELETE);
    assert_eq!(calls[0].url.as_str(), "https://app.example.com/api/abc123");
}

#[tokio::test]
async fn test_remove_replays_cursor_with_colon_under_api() {
    let h = harness(FakeNetwork::ok_with("")).await;

    h.connectivity.set_online(false);
    h.worker.handle_fetch(remove_request("x:y")).await.unwrap();
    h.worker.handle_fetch(remove_request("abc123")).await.unwrap();
    assert_eq!(
        h.worker.queues().peek_all(QueueName::Remove).await.unwrap(),
        vec![json!("x:y"), json!("abc123")]
    );
    h.connectivity.set_online(true);

    let outcome = h.worker.handle_wake(&RetryIntent::new("remove")).await.unwrap();
    assert_eq!(outcome, DrainOutcome::Completed { replayed: 2 });

    let urls: Vec<String> = h
        .network
        .calls()
        .iter()
        .map(|call| call.url.to_string())
        .collect();
    assert_eq!(
        urls,
        vec![
            "https://app.example.com/api/x:y",
            "https://app.example.com/api/abc123",
        ]
    );
}

#[tokio::test]
async fn test_end_to_end_save_then_spurious_wake() {
    let h = harness(FakeNetwork::ok_with("")).await;

    h.connectivity.set_online(false);
    h.worker.handle_fetch(save_request("abc123")).await.unwrap();
    assert_eq!(h.worker.queues().len(QueueName::Save).await.unwrap(), 1);

    h.connectivity.set_online(true);
    let intent = h.scheduler.intents().pop().unwrap();
    assert_eq!(intent, RetryIntent::new("save"));

    let outcome = h.worker.handle_wake(&intent).await.unwrap();
    assert_eq!(outcome, DrainOutcome::Completed { replayed: 1 });
    assert_eq!(h.worker.queues().len(QueueName::Save).await.unwrap(), 0);
    assert_eq!(saved_cursor(&h.network.calls()[0]), "abc123");

    let outcome = h.worker.handle_wake(&intent).await.unwrap();
    assert_eq!(outcome, DrainOutcome::Empty);
    assert_eq!(h.network.call_count(), 1);
}

#[tokio::test]
async fn test_search_retry_caches_and_notifies() {
    let results = r#"{"data":{"searchPublicAnimations":{"edges":[],"pageInfo":{}}}}"#;
    let h = harness(FakeNetwork::ok_with(results)).await;
    let body = r#"{"variables":{"query":"dog"}}"#;

    h.connectivity.set_online(false);
    let deferred = h.worker.handle_fetch(search_request(body)).await.unwrap();
    assert!(deferred.is_deferred_retry());

    let (_handle, mut messages) = h.worker.notifier().subscribe_channel();

    h.connectivity.set_online(true);
    let outcome = h
        .worker
        .handle_wake(&RetryIntent::new("search-retry"))
        .await
        .unwrap();
    assert_eq!(outcome, DrainOutcome::Completed { replayed: 1 });

    let replayed = &h.network.calls()[0];
    assert_eq!(replayed.url.as_str(), SEARCH_URL);
    assert_eq!(replayed.body_text(), body);

    assert_eq!(
        messages.try_recv().unwrap(),
        ClientMessage::SearchRetryResult {
            payload: json!({ "searchPublicAnimations": { "edges": [], "pageInfo": {} } }),
        }
    );

    let hash = content_hash(body.as_bytes());
    assert!(h.worker.cache().get(SEARCH_CACHE, &hash).unwrap().is_some());

    // Now answered from the cache without queueing
    h.connectivity.set_online(false);
    let cached = h.worker.handle_fetch(search_request(body)).await.unwrap();
    assert_eq!(cached.text(), results);
    assert_eq!(h.worker.queues().len(QueueName::SearchRetry).await.unwrap(), 0);
}

#[tokio::test]
async fn test_search_retry_keeps_non_utf8_body_bytes() {
    let h = harness(FakeNetwork::ok_with("{}")).await;
    let body = vec![b'{', 0xff, b'}'];
    let request = || HttpRequest::post(url(SEARCH_URL), body.clone());

    h.connectivity.set_online(false);
    let deferred = h.worker.handle_fetch(request()).await.unwrap();
    assert!(deferred.is_deferred_retry());
    h.connectivity.set_online(true);

    let outcome = h
        .worker
        .handle_wake(&RetryIntent::new("search-retry"))
        .await
        .unwrap();
    assert_eq!(outcome, DrainOutcome::Completed { replayed: 1 });
    assert_eq!(h.network.calls()[0].body, body);

    let hash = content_hash(&body);
    assert!(h.worker.cache().get(SEARCH_CACHE, &hash).unwrap().is_some());

    h.connectivity.set_online(false);
    let cached = h.worker.handle_fetch(request()).await.unwrap();
    assert!(!cached.is_deferred_retry());
    assert_eq!(cached.status, 200);
    assert_eq!(h.worker.queues().len(QueueName::SearchRetry).await.unwrap(), 0);
}

#[tokio::test]
async fn test_unknown_intent_is_rejected() {
    let h = harness(FakeNetwork::ok_with("")).await;

    let result = h.worker.handle_wake(&RetryIntent::new("sync-everything")).await;
    assert!(matches!(result, Err(SyncError::UnknownIntent(name)) if name == "sync-everything"));
    assert_eq!(h.network.call_count(), 0);
}

#[tokio::test]
async fn test_concurrent_wake_is_noop_while_draining() {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let network = FakeNetwork::ok_with("").gated(started.clone(), release.clone());
    let h = harness(network).await;
    queue_saves(&h, &["a"]).await;

    let coordinator = h.worker.coordinator();
    let first = tokio::spawn(async move { coordinator.drain(QueueName::Save).await });

    started.notified().await;
    let second = h.worker.handle_wake(&RetryIntent::new("save")).await.unwrap();
    assert_eq!(second, DrainOutcome::AlreadyDraining);

    // Other queues are not blocked
    let other = h.worker.handle_wake(&RetryIntent::new("remove")).await.unwrap();
    assert_eq!(other, DrainOutcome::Empty);

    release.notify_one();
    let first = first.await.unwrap().unwrap();
    assert_eq!(first, DrainOutcome::Completed { replayed: 1 });
    assert_eq!(h.network.call_count(), 1);
    assert!(h.worker.coordinator().draining().is_empty());
}

#[tokio::test]
async fn test_enqueue_during_drain_waits_for_next_wake() {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let network = FakeNetwork::ok_with("").gated(started.clone(), release.clone());
    let h = harness(network).await;
    queue_saves(&h, &["a"]).await;

    let coordinator = h.worker.coordinator();
    let drain = tokio::spawn(async move { coordinator.drain(QueueName::Save).await });

    started.notified().await;
    h.connectivity.set_online(false);
    h.worker.handle_fetch(save_request("late")).await.unwrap();
    release.notify_one();

    assert_eq!(
        drain.await.unwrap().unwrap(),
        DrainOutcome::Completed { replayed: 1 }
    );

    let pending = h.worker.queues().peek_all(QueueName::Save).await.unwrap();
    assert_eq!(pending, vec![serde_json::to_value(entry("late")).unwrap()]);
}

#[tokio::test]
async fn test_queue_survives_restart() {
    let home = TempDir::new().unwrap();
    let config = test_config(&home);

    {
        let h = harness_with(FakeNetwork::ok_with(""), config.clone(), TempDir::new().unwrap()).await;
        h.connectivity.set_online(false);
        h.worker.handle_fetch(save_request("persisted")).await.unwrap();
    }

    let h = harness_with(FakeNetwork::ok_with(""), config, home).await;
    let outcome = h.worker.handle_wake(&RetryIntent::new("save")).await.unwrap();
    assert_eq!(outcome, DrainOutcome::Completed { replayed: 1 });
    assert_eq!(saved_cursor(&h.network.calls()[0]), "persisted");
}

#[tokio::test]
async fn test_sync_worker_waits_for_connectivity() {
    let home = TempDir::new().unwrap();
    let config = test_config(&home);

    let network = Arc::new(FakeNetwork::ok_with(""));
    let connectivity = Arc::new(ManualConnectivity::new(false));
    let (scheduler, intents) = ChannelScheduler::new();
    let scheduler = Arc::new(scheduler);

    let worker = OfflineWorker::open(
        &config,
        Adapters {
            network: network.clone(),
            connectivity: connectivity.clone(),
            scheduler: scheduler.clone(),
        },
    )
    .await
    .unwrap();

    worker.handle_fetch(save_request("abc123")).await.unwrap();
    assert_eq!(network.call_count(), 0);

    let policy = RetryPolicy {
        initial_delay_ms: 10,
        max_delay_ms: 50,
        backoff_multiplier: 2.0,
        poll_interval_ms: 10,
    };
    let sync = SyncWorker::new(worker.coordinator(), worker.connectivity(), policy);
    let handle = tokio::spawn(sync.run(intents));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(network.call_count(), 0);
    assert!(!connectivity.is_online());

    connectivity.set_online(true);

    // Dropping every scheduler lets the worker stop once it has delivered
    drop(worker);
    drop(scheduler);

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("sync worker did not stop")
        .unwrap();

    assert_eq!(network.call_count(), 1);
    let store = offsync::core::QueueStore::open(config.queue_log_path()).await.unwrap();
    assert_eq!(store.len(QueueName::Save).await.unwrap(), 0);
}

#[tokio::test]
async fn test_sync_worker_resignals_halted_queue() {
    let home = TempDir::new().unwrap();
    let config = test_config(&home);

    let failures_left = Arc::new(std::sync::atomic::AtomicUsize::new(2));
    let counter = failures_left.clone();
    let network = Arc::new(FakeNetwork::new(move |_| {
        let left = counter.load(std::sync::atomic::Ordering::SeqCst);
        if left > 0 {
            counter.store(left - 1, std::sync::atomic::Ordering::SeqCst);
            Ok(HttpResponse::new(503))
        } else {
            Ok(HttpResponse::ok())
        }
    }));
    let connectivity = Arc::new(ManualConnectivity::new(true));
    let (scheduler, intents) = ChannelScheduler::new();

    let worker = OfflineWorker::open(
        &config,
        Adapters {
            network: network.clone(),
            connectivity: connectivity.clone(),
            scheduler: Arc::new(RecordingScheduler::default()),
        },
    )
    .await
    .unwrap();

    connectivity.set_online(false);
    worker.handle_fetch(save_request("flaky")).await.unwrap();
    connectivity.set_online(true);

    let policy = RetryPolicy {
        initial_delay_ms: 5,
        max_delay_ms: 20,
        backoff_multiplier: 2.0,
        poll_interval_ms: 5,
    };
    let sync = SyncWorker::new(worker.coordinator(), worker.connectivity(), policy);

    scheduler.register(RetryIntent::new("save")).await.unwrap();
    let handle = tokio::spawn(sync.run(intents));

    // Keep the channel open until the queue drains, then close it
    let queues = offsync::core::QueueStore::open(config.queue_log_path()).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while queues.len(QueueName::Save).await.unwrap() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("queue never drained");

    drop(scheduler);
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("sync worker did not stop")
        .unwrap();

    assert_eq!(network.call_count(), 3);
}
