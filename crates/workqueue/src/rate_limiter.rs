//! Per-item retry delay policies.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

use crate::queue::QueueItem;

/// Decides how long an item waits before its next retry.
pub trait RateLimiter<T>: Send + Sync {
    /// Delay before the next retry of `item`; records one more failure.
    fn when(&self, item: &T) -> Duration;

    /// Clear the failure history of `item`.
    fn forget(&self, item: &T);

    /// Failures recorded for `item` since it was last forgotten.
    fn num_requeues(&self, item: &T) -> u32;
}

/// Calculate exponential backoff duration: `min(base * 2^attempt, max)`.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    2u32.checked_pow(attempt)
        .and_then(|factor| base.checked_mul(factor))
        .map_or(max, |delay| delay.min(max))
}

/// Exponential per-item backoff.
///
/// The n-th consecutive failure of an item (counting from zero) waits
/// `min(base * 2^n, max)`.
pub struct ItemExponentialFailureRateLimiter<T> {
    base_delay: Duration,
    max_delay: Duration,
    failures: Mutex<HashMap<T, u32>>,
}

impl<T: QueueItem> ItemExponentialFailureRateLimiter<T> {
    /// Create a limiter with the given base and cap.
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            failures: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: QueueItem> Default for ItemExponentialFailureRateLimiter<T> {
    fn default() -> Self {
        Self::new(Duration::from_millis(5), Duration::from_secs(1000))
    }
}

impl<T: QueueItem> RateLimiter<T> for ItemExponentialFailureRateLimiter<T> {
    fn when(&self, item: &T) -> Duration {
        let mut failures = self.failures.lock();
        let count = failures.entry(item.clone()).or_insert(0);
        let attempt = *count;
        *count = count.saturating_add(1);
        calculate_backoff(attempt, self.base_delay, self.max_delay)
    }

    fn forget(&self, item: &T) {
        self.failures.lock().remove(item);
    }

    fn num_requeues(&self, item: &T) -> u32 {
        self.failures.lock().get(item).copied().unwrap_or(0)
    }
}
