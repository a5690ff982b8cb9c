//! Deduplicating work queue with in-flight tracking.
//!
//! An item is in at most one of two places at a time: waiting in the queue or
//! held by a worker. Adding an item that is already waiting is a no-op.
//! Adding an item that a worker holds marks it dirty; `done` puts it back.

use std::collections::{HashSet, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, trace};

/// Bounds every queued item satisfies.
pub trait QueueItem: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T: Clone + Eq + Hash + Debug + Send + Sync + 'static> QueueItem for T {}

struct QueueInner<T> {
    /// Items waiting to be handed out, in arrival order.
    queue: VecDeque<T>,
    /// Items that need processing: waiting, or re-added while in flight.
    dirty: HashSet<T>,
    /// Items currently held by a worker.
    processing: HashSet<T>,
    shutting_down: bool,
}

impl<T: QueueItem> QueueInner<T> {
    /// An in-flight item was re-added and will come back on `done`.
    fn has_pending_requeue(&self) -> bool {
        self.processing.iter().any(|item| self.dirty.contains(item))
    }
}

/// Deduplicating queue guaranteeing at most one in-flight holder per item.
pub struct Queue<T> {
    inner: Mutex<QueueInner<T>>,
    item_added: Notify,
    drained: Notify,
}

impl<T: QueueItem> Queue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                shutting_down: false,
            }),
            item_added: Notify::new(),
            drained: Notify::new(),
        }
    }

    /// Mark `item` as needing processing.
    ///
    /// Ignored after shutdown.
    pub fn add(&self, item: T) {
        {
            let mut inner = self.inner.lock();
            if inner.shutting_down {
                trace!(item = ?item, "Queue shutting down, dropping add");
                return;
            }
            if !inner.dirty.insert(item.clone()) {
                return;
            }
            if inner.processing.contains(&item) {
                trace!(item = ?item, "Item in flight, marked dirty");
                return;
            }
            inner.queue.push_back(item);
        }
        self.item_added.notify_one();
    }

    /// Wait for the next item.
    ///
    /// Returns `None` once the queue is shut down and nothing is left to
    /// hand out. The caller must call [`Queue::done`] with the returned item.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.item_added.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock();
                if let Some(item) = inner.queue.pop_front() {
                    inner.dirty.remove(&item);
                    inner.processing.insert(item.clone());
                    return Some(item);
                }
                if inner.shutting_down && !inner.has_pending_requeue() {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Release `item` after processing, re-queueing it if it was re-added
    /// in the meantime.
    pub fn done(&self, item: &T) {
        let (requeued, drained, shutting_down) = {
            let mut inner = self.inner.lock();
            inner.processing.remove(item);
            let requeued = inner.dirty.contains(item);
            if requeued {
                inner.queue.push_back(item.clone());
            }
            (requeued, inner.processing.is_empty(), inner.shutting_down)
        };

        if requeued {
            trace!(item = ?item, "Dirty item re-queued");
            self.item_added.notify_one();
        }
        if shutting_down {
            // Waiters may be holding out for this item's requeue.
            self.item_added.notify_waiters();
        }
        if drained {
            self.drained.notify_waiters();
        }
    }

    /// Number of items waiting to be handed out.
    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Whether nothing is waiting to be handed out.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }

    /// Number of items currently held by workers.
    pub fn in_flight(&self) -> usize {
        self.inner.lock().processing.len()
    }

    /// Stop accepting items. Waiting items are still handed out.
    pub fn shut_down(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.shutting_down {
                return;
            }
            inner.shutting_down = true;
            debug!(
                queued = inner.queue.len(),
                in_flight = inner.processing.len(),
                "Work queue shutting down"
            );
        }
        self.item_added.notify_waiters();
    }

    /// Shut down, then wait until every in-flight item is done.
    pub async fn shut_down_with_drain(&self) {
        self.shut_down();

        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.lock().processing.is_empty() {
                return;
            }

            notified.await;
        }
    }

    /// Whether [`Queue::shut_down`] has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.inner.lock().shutting_down
    }
}

impl<T: QueueItem> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}
