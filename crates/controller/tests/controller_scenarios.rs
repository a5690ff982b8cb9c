//! End-to-end controller scenarios driven by an in-process event source.
//!
//! Scenarios covered:
//! - Index queries follow adds and deletes; workers see deletions as absence
//! - A key failing past the retry ceiling is dropped and reported once
//! - Workers stay parked until the source reports the initial listing
//! - No key is reconciled by two workers at once
//! - A panicking reconcile is contained and retried
//! - Shutdown stops the source, drains in-flight work, then completes
//! - A source that never syncs fails startup with a reported timeout
//! - A key failing while the queue drains is reported, not lost
//! - A sink that panics does not wedge shutdown

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use sluice_cache::{NAMESPACE_INDEX, namespace_index_func};
use sluice_controller::{
    Controller, ControllerConfig, ControllerStats, FailureReport, Notifier, ShutdownCoordinator,
    ShutdownPhase, ShutdownSignal, notification_channel, reconciler_fn,
};
use sluice_core::{Error, ObjectMeta, Result};
use tokio::task::JoinHandle;

#[derive(Debug)]
struct Pod {
    name: String,
    namespace: String,
    node_name: String,
}

impl ObjectMeta for Pod {
    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> Option<&str> {
        Some(&self.namespace)
    }
}

fn pod(namespace: &str, name: &str, node_name: &str) -> Pod {
    Pod {
        name: name.to_string(),
        namespace: namespace.to_string(),
        node_name: node_name.to_string(),
    }
}

type Reports = Arc<Mutex<Vec<FailureReport>>>;

fn fast_config(workers: usize) -> ControllerConfig {
    ControllerConfig {
        workers,
        base_delay_ms: 1,
        max_delay_ms: 50,
        resync_period_secs: 0,
        ..ControllerConfig::default()
    }
}

/// Build a pod controller with a node index and a recording sink, start it,
/// and hand back everything a scenario needs.
fn start<F, Fut>(
    config: ControllerConfig,
    reconcile: F,
) -> (
    Notifier<Pod>,
    Arc<ShutdownCoordinator>,
    Reports,
    Arc<sluice_cache::Cache<Pod>>,
    JoinHandle<Result<ControllerStats>>,
)
where
    F: Fn(String, Option<Arc<Pod>>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let reports: Reports = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let reports = Arc::clone(&reports);
        move |report: FailureReport| reports.lock().push(report)
    };

    let controller = Controller::builder()
        .with_meta_keys()
        .with_index(NAMESPACE_INDEX, namespace_index_func())
        .with_index("node", Arc::new(|p: &Pod| vec![p.node_name.clone()]))
        .with_reconciler(reconciler_fn(reconcile))
        .with_sink(sink)
        .with_config(config)
        .build()
        .unwrap();
    let cache = Arc::clone(controller.cache());

    let (notifier, notifications) = notification_channel(64);
    let shutdown = Arc::new(ShutdownCoordinator::new());
    let handle = tokio::spawn({
        let shutdown = Arc::clone(&shutdown);
        async move { controller.run(notifications, &shutdown).await }
    });

    (notifier, shutdown, reports, cache, handle)
}

/// Poll `condition` until it holds, failing after `limit`.
async fn eventually(limit: Duration, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + limit;
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in {limit:?}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Given pod1 on node1 in a synced cache
/// When pod1 is deleted
/// Then the node index forgets it and the worker sees the key as absent
#[tokio::test]
async fn node_index_follows_add_and_delete() {
    let seen: Arc<Mutex<Vec<(String, bool)>>> = Arc::new(Mutex::new(Vec::new()));
    let (notifier, shutdown, _reports, cache, handle) = start(fast_config(1), {
        let seen = Arc::clone(&seen);
        move |key, obj| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().push((key, obj.is_some()));
                Ok(())
            }
        }
    });

    let pod1 = Arc::new(pod("default", "pod1", "node1"));
    notifier.added(Arc::clone(&pod1)).await.unwrap();
    notifier.added(pod("default", "pod2", "node1")).await.unwrap();
    notifier.added(pod("kube-system", "pod3", "node2")).await.unwrap();
    notifier.synced().await.unwrap();
    eventually(Duration::from_secs(5), || seen.lock().len() == 3).await;

    let on_node1: HashSet<String> = cache
        .by_index("node", "node1")
        .unwrap()
        .iter()
        .map(|p| p.name.clone())
        .collect();
    assert_eq!(on_node1, HashSet::from(["pod1".to_string(), "pod2".to_string()]));

    notifier.deleted(Arc::clone(&pod1)).await.unwrap();
    eventually(Duration::from_secs(5), || seen.lock().len() == 4).await;

    let on_node1: Vec<String> = cache
        .by_index("node", "node1")
        .unwrap()
        .iter()
        .map(|p| p.name.clone())
        .collect();
    assert_eq!(on_node1, vec!["pod2".to_string()]);
    assert_eq!(
        seen.lock().last().cloned(),
        Some(("default/pod1".to_string(), false))
    );

    assert!(matches!(
        cache.by_index("zone", "a"),
        Err(Error::UnknownIndex { .. })
    ));

    shutdown.initiate_shutdown(ShutdownSignal::Programmatic);
    let stats = handle.await.unwrap().unwrap();
    assert_eq!(stats.reconciled, 4);
}

/// Given a reconciler that always fails for default/pod1 and a ceiling of 5
/// When the key is processed
/// Then it is attempted 6 times, dropped, reported once, and never dequeued again
#[tokio::test(start_paused = true)]
async fn key_dropped_after_retry_ceiling() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let (notifier, shutdown, reports, _cache, handle) = start(fast_config(1), {
        let attempts = Arc::clone(&attempts);
        move |key, _obj| {
            let attempts = Arc::clone(&attempts);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("cannot schedule {key}")
            }
        }
    });

    notifier.added(pod("default", "pod1", "node1")).await.unwrap();
    notifier.synced().await.unwrap();

    eventually(Duration::from_secs(10), || !reports.lock().is_empty()).await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(attempts.load(Ordering::SeqCst), 6);
    {
        let reports = reports.lock();
        assert_eq!(reports.len(), 1);
        match reports.first() {
            Some(FailureReport::Dropped { key, attempts, error }) => {
                assert_eq!(key, "default/pod1");
                assert_eq!(*attempts, 6);
                assert!(error.contains("cannot schedule default/pod1"));
            }
            other => panic!("unexpected report: {other:?}"),
        }
    }

    shutdown.initiate_shutdown(ShutdownSignal::Programmatic);
    let stats = handle.await.unwrap().unwrap();
    assert_eq!(stats.requeued, 5);
    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.reconciled, 0);
}

/// Given a source that lists 3 pods and reports sync only after a delay
/// When the controller starts
/// Then no reconcile happens before sync, and all 3 happen after
#[tokio::test(start_paused = true)]
async fn workers_wait_for_cache_sync() {
    let sync_sent = Arc::new(AtomicBool::new(false));
    let early = Arc::new(AtomicUsize::new(0));
    let calls = Arc::new(AtomicUsize::new(0));
    let (notifier, shutdown, _reports, cache, handle) = start(fast_config(2), {
        let sync_sent = Arc::clone(&sync_sent);
        let early = Arc::clone(&early);
        let calls = Arc::clone(&calls);
        move |_key, _obj| {
            if !sync_sent.load(Ordering::SeqCst) {
                early.fetch_add(1, Ordering::SeqCst);
            }
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        }
    });

    for name in ["pod1", "pod2", "pod3"] {
        notifier.added(pod("default", name, "node1")).await.unwrap();
    }
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(cache.len(), 3, "listing applied to the cache");
    assert_eq!(calls.load(Ordering::SeqCst), 0, "no reconcile before sync");

    sync_sent.store(true, Ordering::SeqCst);
    notifier.synced().await.unwrap();
    eventually(Duration::from_secs(5), || calls.load(Ordering::SeqCst) == 3).await;
    assert_eq!(early.load(Ordering::SeqCst), 0);

    shutdown.initiate_shutdown(ShutdownSignal::Programmatic);
    handle.await.unwrap().unwrap();
}

/// Given four workers and a source hammering three keys with updates
/// When every reconcile records the keys currently being reconciled
/// Then no key is ever reconciled twice concurrently
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn at_most_one_reconcile_per_key() {
    let active: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let calls = Arc::new(AtomicUsize::new(0));
    let (notifier, shutdown, _reports, _cache, handle) = start(fast_config(4), {
        let active = Arc::clone(&active);
        let overlaps = Arc::clone(&overlaps);
        let calls = Arc::clone(&calls);
        move |key, _obj| {
            let active = Arc::clone(&active);
            let overlaps = Arc::clone(&overlaps);
            let calls = Arc::clone(&calls);
            async move {
                if !active.lock().insert(key.clone()) {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
                active.lock().remove(&key);
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    });

    notifier.synced().await.unwrap();
    let producers: Vec<_> = (0..3)
        .map(|p| {
            let notifier = notifier.clone();
            tokio::spawn(async move {
                for i in 0..100usize {
                    let name = format!("pod{}", (i + p) % 3);
                    notifier.added(pod("default", &name, "node1")).await.unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.await.unwrap();
    }

    eventually(Duration::from_secs(10), || calls.load(Ordering::SeqCst) >= 3).await;
    shutdown.initiate_shutdown(ShutdownSignal::Programmatic);
    handle.await.unwrap().unwrap();

    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    assert!(active.lock().is_empty());
}

/// Given a reconciler that panics on its first call for pod1
/// When pod1 and pod2 are processed
/// Then the panic is reported, pod1 is retried, and pod2 is unaffected
#[tokio::test]
async fn panicking_reconcile_is_contained() {
    let panicked = Arc::new(AtomicBool::new(false));
    let (notifier, shutdown, reports, _cache, handle) = start(fast_config(2), {
        let panicked = Arc::clone(&panicked);
        move |key, _obj| {
            let panicked = Arc::clone(&panicked);
            async move {
                if key == "default/pod1" && !panicked.swap(true, Ordering::SeqCst) {
                    panic!("node lookup failed");
                }
                Ok(())
            }
        }
    });

    notifier.added(pod("default", "pod1", "node1")).await.unwrap();
    notifier.added(pod("default", "pod2", "node1")).await.unwrap();
    notifier.synced().await.unwrap();

    eventually(Duration::from_secs(5), || panicked.load(Ordering::SeqCst)).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    shutdown.initiate_shutdown(ShutdownSignal::Programmatic);
    let stats = handle.await.unwrap().unwrap();
    assert_eq!(stats.panics, 1);
    assert_eq!(stats.reconciled, 2);
    assert!(matches!(
        reports.lock().as_slice(),
        [FailureReport::WorkerPanicked { key, .. }] if key == "default/pod1"
    ));
}

/// Given a reconcile in flight when shutdown is requested
/// When the controller stops
/// Then the source sees the channel close, the in-flight reconcile finishes,
/// and the coordinator ends in the complete phase
#[tokio::test]
async fn shutdown_stops_source_then_drains() {
    let started = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicBool::new(false));
    let (notifier, shutdown, _reports, _cache, handle) = start(fast_config(1), {
        let started = Arc::clone(&started);
        let finished = Arc::clone(&finished);
        move |_key, _obj| {
            let started = Arc::clone(&started);
            let finished = Arc::clone(&finished);
            async move {
                started.store(true, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                finished.store(true, Ordering::SeqCst);
                Ok(())
            }
        }
    });

    notifier.added(pod("default", "slow", "node1")).await.unwrap();
    notifier.synced().await.unwrap();
    eventually(Duration::from_secs(5), || started.load(Ordering::SeqCst)).await;

    shutdown.initiate_shutdown(ShutdownSignal::Programmatic);
    let stats = handle.await.unwrap().unwrap();

    assert!(finished.load(Ordering::SeqCst), "in-flight reconcile drained");
    assert_eq!(stats.reconciled, 1);
    assert_eq!(shutdown.phase(), ShutdownPhase::Complete);
    assert!(notifier.is_closed());
    assert!(matches!(
        notifier.added(pod("default", "late", "node1")).await,
        Err(Error::SourceClosed)
    ));
}

/// Given a source that never reports sync
/// When the sync timeout elapses
/// Then startup fails, the sink gets a timeout report, and nothing is reconciled
#[tokio::test(start_paused = true)]
async fn cache_sync_timeout_is_fatal_and_reported() {
    let calls = Arc::new(AtomicUsize::new(0));
    let config = ControllerConfig {
        cache_sync_timeout_secs: 2,
        ..fast_config(1)
    };
    let (notifier, _shutdown, reports, _cache, handle) = start(config, {
        let calls = Arc::clone(&calls);
        move |_key, _obj| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        }
    });

    notifier.added(pod("default", "pod1", "node1")).await.unwrap();
    let result = handle.await.unwrap();

    assert!(matches!(result, Err(Error::CacheSyncTimeout { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        reports.lock().as_slice(),
        [FailureReport::CacheSyncTimeout {
            timeout: Duration::from_secs(2)
        }]
    );
    assert!(notifier.is_closed());
}

#[tokio::test]
async fn stop_before_sync_is_clean() {
    let (_notifier, shutdown, reports, _cache, handle) =
        start(fast_config(1), |_key, _obj| async { Ok(()) });

    shutdown.initiate_shutdown(ShutdownSignal::Sigterm);
    let stats = handle.await.unwrap().unwrap();

    assert_eq!(stats, ControllerStats::default());
    assert!(reports.lock().is_empty());
    assert_eq!(shutdown.phase(), ShutdownPhase::Complete);
}

/// Given a reconcile that fails after shutdown has begun
/// When the worker applies the retry policy
/// Then the refused retry is reported as a drop rather than lost
#[tokio::test]
async fn failure_during_drain_is_reported() {
    let started = Arc::new(AtomicBool::new(false));
    let (notifier, shutdown, reports, _cache, handle) = start(fast_config(1), {
        let started = Arc::clone(&started);
        move |_key, _obj| {
            let started = Arc::clone(&started);
            async move {
                started.store(true, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                anyhow::bail!("backend unavailable")
            }
        }
    });

    notifier.added(pod("default", "slow", "node1")).await.unwrap();
    notifier.synced().await.unwrap();
    eventually(Duration::from_secs(5), || started.load(Ordering::SeqCst)).await;

    shutdown.initiate_shutdown(ShutdownSignal::Programmatic);
    let stats = handle.await.unwrap().unwrap();

    assert_eq!(stats.requeued, 0);
    assert_eq!(stats.dropped, 1);
    assert!(matches!(
        reports.lock().as_slice(),
        [FailureReport::Dropped { key, attempts: 1, .. }] if key == "default/slow"
    ));
}

/// Given a sink that panics whenever a key is dropped
/// When two keys exhaust their retries and shutdown follows
/// Then both keys are still attempted and the controller stops
#[tokio::test]
async fn panicking_sink_does_not_wedge_shutdown() {
    let attempted = Arc::new(Mutex::new(HashSet::new()));
    let controller = Controller::builder()
        .with_meta_keys()
        .with_reconciler(reconciler_fn({
            let attempted = Arc::clone(&attempted);
            move |key: String, _obj: Option<Arc<Pod>>| {
                let attempted = Arc::clone(&attempted);
                async move {
                    attempted.lock().insert(key);
                    anyhow::bail!("always fails")
                }
            }
        }))
        .with_sink(|report: FailureReport| {
            if matches!(report, FailureReport::Dropped { .. }) {
                panic!("sink exploded");
            }
        })
        .with_config(ControllerConfig {
            max_retries: 0,
            ..fast_config(1)
        })
        .build()
        .unwrap();

    let (notifier, notifications) = notification_channel(16);
    let shutdown = Arc::new(ShutdownCoordinator::new());
    let handle = tokio::spawn({
        let shutdown = Arc::clone(&shutdown);
        async move { controller.run(notifications, &shutdown).await }
    });

    notifier.added(pod("default", "p", "node1")).await.unwrap();
    notifier.added(pod("default", "q", "node1")).await.unwrap();
    notifier.synced().await.unwrap();
    eventually(Duration::from_secs(5), || attempted.lock().len() == 2).await;

    shutdown.initiate_shutdown(ShutdownSignal::Programmatic);
    let stats = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("controller stopped")
        .unwrap()
        .unwrap();

    assert_eq!(stats.dropped, 2);
    assert_eq!(stats.panics, 2);
}
