//! Applies source notifications to the cache and enqueues affected keys.
//!
//! The bridge always enqueues the key, never the object. Workers read the
//! cache at dequeue time, so several events for one key collapse into a
//! single reconcile against the freshest state.

use std::sync::Arc;
use std::time::Duration;

use sluice_cache::Cache;
use sluice_core::{ObjectKey, ResultExt};
use sluice_workqueue::RateLimitingQueue;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace};

use crate::event::{DeletedObject, Event, Notification};

/// Counters reported when the bridge stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Notifications applied.
    pub notifications: u64,
    /// Resync passes performed.
    pub resyncs: u64,
}

/// Consumes notifications, writes the cache, and feeds the queue.
pub struct EventBridge<T> {
    cache: Arc<Cache<T>>,
    queue: Arc<RateLimitingQueue<ObjectKey>>,
    resync_period: Option<Duration>,
    synced_tx: watch::Sender<bool>,
    stats: BridgeStats,
}

impl<T: Send + Sync + 'static> EventBridge<T> {
    /// Create a bridge over `cache` and `queue`.
    ///
    /// With a `resync_period`, every cached key is re-enqueued that often
    /// once the cache has synced.
    pub fn new(
        cache: Arc<Cache<T>>,
        queue: Arc<RateLimitingQueue<ObjectKey>>,
        resync_period: Option<Duration>,
    ) -> Self {
        let (synced_tx, _) = watch::channel(false);
        Self {
            cache,
            queue,
            resync_period: resync_period.filter(|period| !period.is_zero()),
            synced_tx,
            stats: BridgeStats::default(),
        }
    }

    /// Publish sync state on `synced_tx` instead of a private channel.
    pub fn with_synced(mut self, synced_tx: watch::Sender<bool>) -> Self {
        self.synced_tx = synced_tx;
        self
    }

    /// Receiver that turns true once the initial listing has been applied.
    pub fn has_synced(&self) -> watch::Receiver<bool> {
        self.synced_tx.subscribe()
    }

    /// Apply notifications until `stop` fires or the source hangs up.
    ///
    /// The receiver is dropped on return, so the source sees the channel
    /// close.
    pub async fn run(
        mut self,
        mut notifications: mpsc::Receiver<Notification<T>>,
        mut stop: watch::Receiver<bool>,
    ) -> BridgeStats {
        info!(
            resync_secs = self.resync_period.map(|p| p.as_secs()),
            "Event bridge started"
        );

        let mut resync = self.resync_period.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                biased;

                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        debug!("Event bridge stop requested");
                        break;
                    }
                }
                received = notifications.recv() => {
                    let Some(notification) = received else {
                        debug!("Event source closed");
                        break;
                    };
                    self.apply(notification);
                }
                () = next_resync(&mut resync) => {
                    self.resync();
                }
            }
        }

        drop(notifications);
        info!(
            notifications = self.stats.notifications,
            resyncs = self.stats.resyncs,
            "Event bridge stopped"
        );
        self.stats
    }

    /// Apply one notification.
    pub fn apply(&mut self, notification: Notification<T>) {
        self.stats.notifications = self.stats.notifications.saturating_add(1);
        match notification {
            Notification::Event(event) => self.apply_event(event),
            Notification::Replace(objects) => self.apply_replace(objects),
            Notification::Synced => {
                if !self.synced_tx.send_replace(true) {
                    info!(objects = self.cache.len(), "Initial listing applied");
                }
            }
        }
    }

    fn apply_event(&self, event: Event<T>) {
        let kind = event.kind();
        let key = match event {
            Event::Added(obj) => self.cache.add(obj).into_option_logged(),
            // The old object only mattered to the source.
            Event::Updated { new, .. } => self.cache.update(new).into_option_logged(),
            Event::Deleted(DeletedObject::Object(obj)) => {
                self.cache.delete(&obj).into_option_logged()
            }
            Event::Deleted(DeletedObject::Tombstone(tombstone)) => {
                self.cache.remove(&tombstone.key);
                Some(tombstone.key)
            }
        };

        if let Some(key) = key {
            trace!(key = %key, kind, "Enqueueing key");
            self.queue.add(key);
        }
    }

    fn apply_replace(&self, objects: Vec<Arc<T>>) {
        let count = objects.len();
        let Some(removed) = self.cache.replace(objects).into_option_logged() else {
            return;
        };
        debug!(objects = count, removed = removed.len(), "Cache replaced");

        for key in self.cache.list_keys().into_iter().chain(removed) {
            self.queue.add(key);
        }
    }

    fn resync(&mut self) {
        if !*self.synced_tx.borrow() {
            trace!("Skipping resync before initial sync");
            return;
        }
        let keys = self.cache.list_keys();
        debug!(keys = keys.len(), "Resyncing cached keys");
        for key in keys {
            self.queue.add(key);
        }
        self.stats.resyncs = self.stats.resyncs.saturating_add(1);
    }
}

/// Next resync tick, or never when resync is disabled.
async fn next_resync(resync: &mut Option<Interval>) {
    match resync {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
