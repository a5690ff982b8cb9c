//! Work queues for reconciliation keys.
//!
//! Three layers, each wrapping the one before:
//!
//! - [`Queue`]: deduplicating FIFO with dirty/in-flight tracking; one worker
//!   holds a given item at a time
//! - [`DelayingQueue`]: adds `add_after` on top of a background timer heap
//! - [`RateLimitingQueue`]: retry delays chosen per item by a [`RateLimiter`]
//!
//! # Example
//!
//! ```ignore
//! let queue = RateLimitingQueue::with_exponential(
//!     Duration::from_millis(5),
//!     Duration::from_secs(1000),
//! );
//! queue.add("default/web".to_string());
//!
//! while let Some(key) = queue.get().await {
//!     match reconcile(&key).await {
//!         Ok(()) => queue.forget(&key),
//!         Err(_) => {
//!             queue.add_rate_limited(key.clone());
//!         }
//!     }
//!     queue.done(&key);
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod delaying;
pub mod queue;
pub mod rate_limiter;
pub mod rate_limiting;

pub use delaying::DelayingQueue;
pub use queue::{Queue, QueueItem};
pub use rate_limiter::{ItemExponentialFailureRateLimiter, RateLimiter, calculate_backoff};
pub use rate_limiting::RateLimitingQueue;
