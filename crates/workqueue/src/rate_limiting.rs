//! Delaying queue whose retry delays come from a [`RateLimiter`].

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::delaying::DelayingQueue;
use crate::queue::QueueItem;
use crate::rate_limiter::{ItemExponentialFailureRateLimiter, RateLimiter};

/// Work queue with per-item rate-limited retries.
pub struct RateLimitingQueue<T> {
    delaying: DelayingQueue<T>,
    limiter: Arc<dyn RateLimiter<T>>,
}

impl<T: QueueItem> RateLimitingQueue<T> {
    /// Create a queue using `limiter` for retry delays.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(limiter: Arc<dyn RateLimiter<T>>) -> Self {
        Self {
            delaying: DelayingQueue::new(),
            limiter,
        }
    }

    /// Create a queue with per-item exponential backoff.
    pub fn with_exponential(base_delay: Duration, max_delay: Duration) -> Self {
        Self::new(Arc::new(ItemExponentialFailureRateLimiter::new(
            base_delay, max_delay,
        )))
    }

    /// Schedule a retry of `item` after the limiter's delay.
    ///
    /// Returns `false` if the queue is shutting down and the retry was
    /// refused.
    pub fn add_rate_limited(&self, item: T) -> bool {
        let delay = self.limiter.when(&item);
        debug!(
            item = ?item,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Rate-limited requeue"
        );
        self.delaying.add_after(item, delay)
    }

    /// Clear the retry history of `item`.
    pub fn forget(&self, item: &T) {
        self.limiter.forget(item);
    }

    /// Retries recorded for `item`.
    pub fn num_requeues(&self, item: &T) -> u32 {
        self.limiter.num_requeues(item)
    }

    /// See [`Queue::add`](crate::Queue::add).
    pub fn add(&self, item: T) {
        self.delaying.add(item);
    }

    /// See [`DelayingQueue::add_after`].
    pub fn add_after(&self, item: T, delay: Duration) -> bool {
        self.delaying.add_after(item, delay)
    }

    /// See [`Queue::get`](crate::Queue::get).
    pub async fn get(&self) -> Option<T> {
        self.delaying.get().await
    }

    /// See [`Queue::done`](crate::Queue::done).
    pub fn done(&self, item: &T) {
        self.delaying.done(item);
    }

    /// See [`Queue::len`](crate::Queue::len).
    pub fn len(&self) -> usize {
        self.delaying.len()
    }

    /// See [`Queue::is_empty`](crate::Queue::is_empty).
    pub fn is_empty(&self) -> bool {
        self.delaying.is_empty()
    }

    /// See [`Queue::in_flight`](crate::Queue::in_flight).
    pub fn in_flight(&self) -> usize {
        self.delaying.in_flight()
    }

    /// See [`DelayingQueue::shut_down`].
    pub fn shut_down(&self) {
        self.delaying.shut_down();
    }

    /// See [`DelayingQueue::shut_down_with_drain`].
    pub async fn shut_down_with_drain(&self) {
        self.delaying.shut_down_with_drain().await;
    }

    /// See [`Queue::is_shutting_down`](crate::Queue::is_shutting_down).
    pub fn is_shutting_down(&self) -> bool {
        self.delaying.is_shutting_down()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use tokio::time::Instant;

    use super::*;

    /// Given a key that fails three times in a row
    /// When each failure is requeued through the limiter
    /// Then the waits grow 5ms, 10ms, 20ms
    #[tokio::test(start_paused = true)]
    async fn retries_back_off_exponentially() {
        let q = RateLimitingQueue::with_exponential(
            Duration::from_millis(5),
            Duration::from_secs(1000),
        );
        q.add("default/web");
        let mut key = q.get().await.unwrap();

        for expected_ms in [5u64, 10, 20] {
            let start = Instant::now();
            q.add_rate_limited(key);
            q.done(&key);
            key = q.get().await.unwrap();
            let waited = start.elapsed();
            assert!(waited >= Duration::from_millis(expected_ms));
            assert!(waited < Duration::from_millis(expected_ms * 2));
        }
        assert_eq!(q.num_requeues(&key), 3);
    }

    #[tokio::test]
    async fn forget_resets_retry_count() {
        let q = RateLimitingQueue::with_exponential(
            Duration::from_millis(1),
            Duration::from_millis(10),
        );
        q.add_rate_limited("k");
        q.add_rate_limited("k");
        assert_eq!(q.num_requeues(&"k"), 2);

        q.forget(&"k");
        assert_eq!(q.num_requeues(&"k"), 0);
    }

    #[tokio::test]
    async fn retry_refused_after_shutdown() {
        let q = RateLimitingQueue::with_exponential(
            Duration::from_millis(1),
            Duration::from_millis(10),
        );
        assert!(q.add_rate_limited("k"));
        q.shut_down();

        assert!(!q.add_rate_limited("k"));
        assert_eq!(q.get().await, None);
    }
}
