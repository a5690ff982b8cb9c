//! Cache-backed, work-queue-driven reconciliation controller.
//!
//! Events flow one way: source → cache → queue → workers.
//!
//! - **Event bridge**: applies source notifications to the cache and
//!   enqueues the affected keys, never the objects
//! - **Workers**: dequeue a key, read the *current* cached object, call the
//!   reconciler, and retry failures with per-key exponential backoff up to a
//!   ceiling
//! - **Lifecycle**: workers wait for the initial listing (cache sync
//!   barrier); shutdown stops the bridge, drains the queue, then joins the
//!   workers
//!
//! # Example
//!
//! ```ignore
//! let (notifier, notifications) = notification_channel(DEFAULT_CHANNEL_CAPACITY);
//! let controller = Controller::builder()
//!     .with_meta_keys()
//!     .with_index(NAMESPACE_INDEX, namespace_index_func())
//!     .with_reconciler(reconciler_fn(|key: String, dep: Option<Arc<Deployment>>| async move {
//!         println!("{key}: {:?}", dep.map(|d| d.name.clone()));
//!         Ok(())
//!     }))
//!     .build()?;
//!
//! tokio::spawn(list_and_watch(notifier));
//! let stats = controller.run(notifications, &shutdown).await?;
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod bridge;
pub mod config;
pub mod controller;
pub mod event;
pub mod reconciler;
pub mod shutdown;
pub mod sink;
pub mod source;
pub mod sync;
mod worker;

pub use bridge::{BridgeStats, EventBridge};
pub use config::ControllerConfig;
pub use controller::{Controller, ControllerBuilder, ControllerStats};
pub use event::{DeletedFinalStateUnknown, DeletedObject, Event, Notification};
pub use reconciler::{Reconciler, ReconcilerFn, reconciler_fn};
pub use shutdown::{ShutdownCoordinator, ShutdownPhase, ShutdownSignal, install_signal_handlers};
pub use sink::{ErrorSink, FailureReport, TracingSink};
pub use source::{DEFAULT_CHANNEL_CAPACITY, Notifier, notification_channel};
pub use sync::wait_for_cache_sync;
