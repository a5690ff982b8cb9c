//! Worker loop: dequeue a key, reconcile current state, apply retry policy.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use sluice_cache::Cache;
use sluice_core::ObjectKey;
use sluice_workqueue::RateLimitingQueue;
use tracing::{debug, error, info, warn};

use crate::reconciler::Reconciler;
use crate::sink::{ErrorSink, FailureReport};

/// Counters shared by all workers of one controller.
#[derive(Debug, Default)]
pub(crate) struct WorkerCounters {
    pub(crate) reconciled: AtomicU64,
    pub(crate) requeued: AtomicU64,
    pub(crate) dropped: AtomicU64,
    pub(crate) panics: AtomicU64,
}

/// Outcome of one reconcile attempt.
enum Attempt {
    Succeeded,
    Failed(String),
    Panicked(String),
}

/// A single worker bound to a controller's cache and queue.
pub(crate) struct Worker<T> {
    pub(crate) id: usize,
    pub(crate) cache: Arc<Cache<T>>,
    pub(crate) queue: Arc<RateLimitingQueue<ObjectKey>>,
    pub(crate) reconciler: Arc<dyn Reconciler<T>>,
    pub(crate) sink: Arc<dyn ErrorSink>,
    pub(crate) max_retries: u32,
    pub(crate) counters: Arc<WorkerCounters>,
}

impl<T: Send + Sync + 'static> Worker<T> {
    /// Process keys until the queue shuts down.
    ///
    /// A panic outside the reconcile call (in the sink, say) is caught
    /// here so the key is still released and the worker keeps going.
    pub(crate) async fn run(self) {
        debug!(worker = self.id, "Worker started");
        while let Some(key) = self.queue.get().await {
            self.process_guarded(&key).await;
        }
        debug!(worker = self.id, "Worker exiting");
    }

    /// [`Worker::process`] with a panic boundary. `done` is always called.
    async fn process_guarded(&self, key: &ObjectKey) {
        if let Err(payload) = AssertUnwindSafe(self.process(key)).catch_unwind().await {
            self.counters.panics.fetch_add(1, Ordering::Relaxed);
            error!(
                worker = self.id,
                key = %key,
                panic = %panic_message(payload.as_ref()),
                "Worker panicked outside reconcile, key released"
            );
        }
        self.queue.done(key);
    }

    /// Reconcile one dequeued key and apply the retry policy.
    async fn process(&self, key: &ObjectKey) {
        // Read at dequeue time; the triggering event may be stale.
        let current = self.cache.get_by_key(key);

        let attempt = match AssertUnwindSafe(self.reconciler.reconcile(key, current))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => Attempt::Succeeded,
            Ok(Err(e)) => Attempt::Failed(format!("{e:#}")),
            Err(payload) => Attempt::Panicked(panic_message(payload.as_ref())),
        };

        self.handle_result(key, attempt);
    }

    fn handle_result(&self, key: &ObjectKey, attempt: Attempt) {
        let error = match attempt {
            Attempt::Succeeded => {
                self.queue.forget(key);
                self.counters.reconciled.fetch_add(1, Ordering::Relaxed);
                debug!(worker = self.id, key = %key, "Reconciled");
                return;
            }
            Attempt::Failed(error) => error,
            Attempt::Panicked(message) => {
                self.counters.panics.fetch_add(1, Ordering::Relaxed);
                self.sink.report(FailureReport::WorkerPanicked {
                    worker: self.id,
                    key: key.clone(),
                    message: message.clone(),
                });
                message
            }
        };

        let requeues = self.queue.num_requeues(key);
        if requeues < self.max_retries {
            if self.queue.add_rate_limited(key.clone()) {
                warn!(
                    worker = self.id,
                    key = %key,
                    attempt = requeues + 1,
                    error = %error,
                    "Reconcile failed, retrying"
                );
                self.counters.requeued.fetch_add(1, Ordering::Relaxed);
                return;
            }
            info!(worker = self.id, key = %key, "Queue shutting down, retry refused");
        } else {
            info!(worker = self.id, key = %key, requeues, "Retry ceiling reached");
        }

        self.queue.forget(key);
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        self.sink.report(FailureReport::Dropped {
            key: key.clone(),
            attempts: requeues.saturating_add(1),
            error,
        });
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
