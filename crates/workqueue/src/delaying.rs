//! Work queue that can hold items back for a delay before adding them.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, trace, warn};

use crate::queue::{Queue, QueueItem};

/// An item waiting for its ready time.
struct Waiting<T> {
    item: T,
    ready_at: Instant,
}

/// Heap entry ordered by ready time, then insertion order.
struct Entry<T> {
    ready_at: Instant,
    seq: u64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ready_at
            .cmp(&other.ready_at)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Queue with `add_after`.
///
/// A single background task keeps delayed items in a min-heap. An item
/// waiting twice keeps the earlier ready time. Must be created inside a
/// Tokio runtime.
pub struct DelayingQueue<T> {
    queue: Arc<Queue<T>>,
    waiting_tx: mpsc::UnboundedSender<Waiting<T>>,
    stop_tx: watch::Sender<bool>,
}

impl<T: QueueItem> DelayingQueue<T> {
    /// Create the queue and spawn its waiting loop.
    pub fn new() -> Self {
        let queue = Arc::new(Queue::new());
        let (waiting_tx, waiting_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);

        tokio::spawn(waiting_loop(Arc::clone(&queue), waiting_rx, stop_rx));

        Self {
            queue,
            waiting_tx,
            stop_tx,
        }
    }

    /// Add `item` once `delay` has elapsed. A zero delay adds immediately.
    ///
    /// Returns `false` if the item was refused because the queue is
    /// shutting down; the caller still owns whatever that item stood for.
    pub fn add_after(&self, item: T, delay: Duration) -> bool {
        if self.queue.is_shutting_down() {
            debug!(item = ?item, "Queue shutting down, refusing delayed item");
            return false;
        }
        if delay.is_zero() {
            self.queue.add(item);
            return true;
        }

        let now = Instant::now();
        // Unrepresentable deadlines fire immediately rather than never.
        let ready_at = now.checked_add(delay).unwrap_or(now);
        if let Err(mpsc::error::SendError(Waiting { item, .. })) =
            self.waiting_tx.send(Waiting { item, ready_at })
        {
            debug!(item = ?item, "Waiting loop stopped, refusing delayed item");
            return false;
        }
        true
    }

    /// See [`Queue::add`].
    pub fn add(&self, item: T) {
        self.queue.add(item);
    }

    /// See [`Queue::get`].
    pub async fn get(&self) -> Option<T> {
        self.queue.get().await
    }

    /// See [`Queue::done`].
    pub fn done(&self, item: &T) {
        self.queue.done(item);
    }

    /// See [`Queue::len`].
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// See [`Queue::is_empty`].
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// See [`Queue::in_flight`].
    pub fn in_flight(&self) -> usize {
        self.queue.in_flight()
    }

    /// Stop the waiting loop, discarding pending delays, and shut down.
    pub fn shut_down(&self) {
        let _ = self.stop_tx.send(true);
        self.queue.shut_down();
    }

    /// Like [`DelayingQueue::shut_down`], then wait for in-flight items.
    pub async fn shut_down_with_drain(&self) {
        let _ = self.stop_tx.send(true);
        self.queue.shut_down_with_drain().await;
    }

    /// See [`Queue::is_shutting_down`].
    pub fn is_shutting_down(&self) -> bool {
        self.queue.is_shutting_down()
    }
}

impl<T: QueueItem> Default for DelayingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

async fn waiting_loop<T: QueueItem>(
    queue: Arc<Queue<T>>,
    mut waiting_rx: mpsc::UnboundedReceiver<Waiting<T>>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut heap: BinaryHeap<Reverse<Entry<T>>> = BinaryHeap::new();
    // Current ready time per item; heap entries that disagree are stale.
    let mut ready_times: HashMap<T, Instant> = HashMap::new();
    let mut seq: u64 = 0;

    loop {
        let now = Instant::now();
        while heap.peek().is_some_and(|Reverse(top)| top.ready_at <= now) {
            let Some(Reverse(entry)) = heap.pop() else {
                break;
            };
            if ready_times.get(&entry.item) == Some(&entry.ready_at) {
                ready_times.remove(&entry.item);
                queue.add(entry.item);
            }
        }

        let next_ready = heap.peek().map(|Reverse(top)| top.ready_at);

        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    if ready_times.is_empty() {
                        trace!("Waiting loop stopped");
                    } else {
                        warn!(
                            pending = ready_times.len(),
                            "Waiting loop stopped, discarding delayed items"
                        );
                    }
                    return;
                }
            }
            received = waiting_rx.recv() => {
                let Some(Waiting { item, ready_at }) = received else {
                    return;
                };
                let earlier = ready_times
                    .get(&item)
                    .is_none_or(|current| ready_at < *current);
                if earlier {
                    ready_times.insert(item.clone(), ready_at);
                    seq = seq.wrapping_add(1);
                    heap.push(Reverse(Entry { ready_at, seq, item }));
                }
            }
            () = sleep_until(next_ready.unwrap_or(now)), if next_ready.is_some() => {}
        }
    }
}
