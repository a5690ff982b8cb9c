//! Thread-safe local cache with secondary indexing.
//!
//! - **Store**: key -> object map whose indices move in the same critical
//!   section as the write that produced them
//! - **Cache**: the store plus a key function, written by the event bridge
//! - **Lister**: read-only views, optionally scoped to a namespace
//!
//! # Example
//!
//! ```ignore
//! use sluice_cache::{Cache, NAMESPACE_INDEX, namespace_index_func};
//! use sluice_core::meta_namespace_key_func;
//!
//! let cache = Cache::builder(meta_namespace_key_func())
//!     .with_index(NAMESPACE_INDEX, namespace_index_func())
//!     .with_index("node", Arc::new(|p: &Pod| vec![p.node_name.clone()]))
//!     .build();
//!
//! cache.add(Arc::new(pod1))?;
//! let on_node1 = cache.by_index("node", "node1")?;
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod cache;
pub mod index;
pub mod lister;
pub mod store;

pub use cache::{Cache, CacheBuilder};
pub use index::{IndexFunc, Indexers, NAMESPACE_INDEX, namespace_index_func};
pub use lister::{Lister, NamespaceLister, everything};
pub use store::ThreadSafeStore;
