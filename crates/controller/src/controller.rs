//! Controller: owns the cache and queue, wires the bridge to the workers,
//! and sequences startup and shutdown.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use futures::future::join_all;
use sluice_cache::{Cache, IndexFunc, Indexers, Lister};
use sluice_core::{Error, KeyFunc, ObjectMeta, Result, meta_namespace_key_func};
use sluice_workqueue::RateLimitingQueue;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::bridge::{BridgeStats, EventBridge};
use crate::config::ControllerConfig;
use crate::event::Notification;
use crate::reconciler::Reconciler;
use crate::shutdown::{ShutdownCoordinator, ShutdownPhase};
use crate::sink::{ErrorSink, FailureReport, TracingSink};
use crate::sync::wait_for_cache_sync;
use crate::worker::{Worker, WorkerCounters};

/// Totals for one controller run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerStats {
    /// Successful reconciles.
    pub reconciled: u64,
    /// Failed attempts scheduled for retry.
    pub requeued: u64,
    /// Keys dropped at the retry ceiling.
    pub dropped: u64,
    /// Reconcile calls that panicked.
    pub panics: u64,
    /// Notifications applied by the event bridge.
    pub notifications: u64,
}

impl ControllerStats {
    fn collect(counters: &WorkerCounters, bridge: BridgeStats) -> Self {
        Self {
            reconciled: counters.reconciled.load(Ordering::Relaxed),
            requeued: counters.requeued.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
            panics: counters.panics.load(Ordering::Relaxed),
            notifications: bridge.notifications,
        }
    }
}

/// Cache-backed, queue-driven reconciliation loop for objects of type `T`.
pub struct Controller<T> {
    cache: Arc<Cache<T>>,
    reconciler: Arc<dyn Reconciler<T>>,
    sink: Arc<dyn ErrorSink>,
    config: ControllerConfig,
    synced_tx: watch::Sender<bool>,
}

impl<T: Send + Sync + 'static> Controller<T> {
    /// Start building a controller.
    pub fn builder() -> ControllerBuilder<T> {
        ControllerBuilder::new()
    }

    /// The controller's cache, for read access from outside the workers.
    pub fn cache(&self) -> &Arc<Cache<T>> {
        &self.cache
    }

    /// The validated configuration this controller runs with.
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Receiver that turns true once the initial listing is in the cache.
    ///
    /// Closes when the controller stops.
    pub fn has_synced(&self) -> watch::Receiver<bool> {
        self.synced_tx.subscribe()
    }

    /// Run until `shutdown` fires.
    ///
    /// Startup: the event bridge starts consuming `notifications`, then
    /// workers are held back until the source reports the initial listing
    /// as applied. Shutdown: the bridge stops first (dropping the receiver),
    /// then the queue shuts down and drains, then the workers are joined.
    ///
    /// # Errors
    ///
    /// Returns `CacheSyncTimeout` if the initial listing does not arrive in
    /// time, or `CacheSyncAborted` if the source goes away before syncing.
    /// Per-key failures never surface here; they go to the error sink.
    pub async fn run(
        self,
        notifications: mpsc::Receiver<Notification<T>>,
        shutdown: &ShutdownCoordinator,
    ) -> Result<ControllerStats> {
        let config = &self.config;
        info!(
            workers = config.workers,
            max_retries = config.max_retries,
            "Starting controller"
        );

        let queue = Arc::new(RateLimitingQueue::with_exponential(
            config.base_delay(),
            config.max_delay(),
        ));
        let bridge = EventBridge::new(
            Arc::clone(&self.cache),
            Arc::clone(&queue),
            config.resync_period(),
        )
        .with_synced(self.synced_tx);
        let synced = bridge.has_synced();
        let (bridge_stop_tx, bridge_stop_rx) = watch::channel(false);
        let bridge_handle = tokio::spawn(bridge.run(notifications, bridge_stop_rx));

        let timeout = config.cache_sync_timeout();
        if let Err(e) = wait_for_cache_sync(synced, timeout, shutdown.subscribe()).await {
            if matches!(e, Error::CacheSyncTimeout { .. }) {
                self.sink.report(FailureReport::CacheSyncTimeout { timeout });
            }
            shutdown.advance(ShutdownPhase::StoppingSource);
            let _ = bridge_stop_tx.send(true);
            let bridge_stats = join_bridge(bridge_handle).await;
            queue.shut_down();
            shutdown.advance(ShutdownPhase::Complete);

            if matches!(e, Error::CacheSyncAborted) && shutdown.is_shutdown_initiated() {
                info!("Stopped before the cache synced");
                return Ok(ControllerStats::collect(&WorkerCounters::default(), bridge_stats));
            }
            error!(error = %e, "Cache sync failed, not starting workers");
            return Err(e);
        }

        let counters = Arc::new(WorkerCounters::default());
        let workers: Vec<_> = (0..config.workers)
            .map(|id| {
                tokio::spawn(
                    Worker {
                        id,
                        cache: Arc::clone(&self.cache),
                        queue: Arc::clone(&queue),
                        reconciler: Arc::clone(&self.reconciler),
                        sink: Arc::clone(&self.sink),
                        max_retries: config.max_retries,
                        counters: Arc::clone(&counters),
                    }
                    .run(),
                )
            })
            .collect();
        info!(workers = workers.len(), "Workers started");

        shutdown.wait().await;

        shutdown.advance(ShutdownPhase::StoppingSource);
        let _ = bridge_stop_tx.send(true);
        let bridge_stats = join_bridge(bridge_handle).await;

        shutdown.advance(ShutdownPhase::DrainingQueue);
        info!(
            queued = queue.len(),
            in_flight = queue.in_flight(),
            "Draining work queue"
        );
        queue.shut_down_with_drain().await;
        for result in join_all(workers).await {
            if let Err(e) = result {
                error!(error = %e, "Worker task failed");
            }
        }

        shutdown.advance(ShutdownPhase::Complete);
        let stats = ControllerStats::collect(&counters, bridge_stats);
        info!(
            reconciled = stats.reconciled,
            requeued = stats.requeued,
            dropped = stats.dropped,
            panics = stats.panics,
            "Controller stopped"
        );
        Ok(stats)
    }
}

impl<T: ObjectMeta + Send + Sync + 'static> Controller<T> {
    /// Read-only, namespace-aware view of the cache.
    pub fn lister(&self) -> Lister<T> {
        Lister::new(Arc::clone(&self.cache))
    }
}

async fn join_bridge(handle: tokio::task::JoinHandle<BridgeStats>) -> BridgeStats {
    handle.await.unwrap_or_else(|e| {
        warn!(error = %e, "Event bridge task failed");
        BridgeStats::default()
    })
}

/// Builder for [`Controller`].
pub struct ControllerBuilder<T> {
    cache: Option<Arc<Cache<T>>>,
    key_func: Option<KeyFunc<T>>,
    indexers: Indexers<T>,
    reconciler: Option<Arc<dyn Reconciler<T>>>,
    sink: Arc<dyn ErrorSink>,
    config: ControllerConfig,
}

impl<T: Send + Sync + 'static> ControllerBuilder<T> {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            cache: None,
            key_func: None,
            indexers: Indexers::new(),
            reconciler: None,
            sink: Arc::new(TracingSink),
            config: ControllerConfig::default(),
        }
    }

    /// Use an existing, empty or pre-populated cache.
    pub fn with_cache(mut self, cache: Arc<Cache<T>>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Key function for a cache the builder creates.
    pub fn with_key_func(mut self, key_func: KeyFunc<T>) -> Self {
        self.key_func = Some(key_func);
        self
    }

    /// Register a secondary index.
    pub fn with_index(mut self, name: impl Into<String>, index_func: IndexFunc<T>) -> Self {
        self.indexers.insert(name.into(), index_func);
        self
    }

    /// Set the reconciler.
    pub fn with_reconciler(mut self, reconciler: impl Reconciler<T> + 'static) -> Self {
        self.reconciler = Some(Arc::new(reconciler));
        self
    }

    /// Set where dropped keys and sync timeouts are reported.
    pub fn with_sink(mut self, sink: impl ErrorSink + 'static) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the controller.
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` if no reconciler was given, neither a cache nor a
    ///   key function was given, or the configuration is invalid
    /// - `IndexerPopulated` / `IndexConflict` if indices cannot be added to a
    ///   supplied cache
    pub fn build(self) -> Result<Controller<T>> {
        self.config.validate()?;

        let reconciler = self
            .reconciler
            .ok_or_else(|| Error::invalid_config("a reconciler is required"))?;

        let cache = match (self.cache, self.key_func) {
            (Some(cache), _) => {
                if !self.indexers.is_empty() {
                    cache.store().add_indexers(self.indexers)?;
                }
                cache
            }
            (None, Some(key_func)) => Arc::new(Cache::new(key_func, self.indexers)),
            (None, None) => {
                return Err(Error::invalid_config(
                    "a cache or a key function is required",
                ));
            }
        };

        Ok(Controller {
            cache,
            reconciler,
            sink: self.sink,
            config: self.config,
            synced_tx: watch::channel(false).0,
        })
    }
}

impl<T: ObjectMeta + Send + Sync + 'static> ControllerBuilder<T> {
    /// Key objects by `namespace/name`.
    pub fn with_meta_keys(self) -> Self {
        self.with_key_func(meta_namespace_key_func())
    }
}

impl<T: Send + Sync + 'static> Default for ControllerBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}
