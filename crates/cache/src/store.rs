//! Key-level thread-safe store with index maintenance.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use sluice_core::{ObjectKey, Result};
use tracing::trace;

use crate::index::{Indexers, Indices};

struct StoreInner<T> {
    items: HashMap<ObjectKey, Arc<T>>,
    indices: Indices<T>,
}

/// Thread-safe key -> object map whose indices change atomically with it.
///
/// Objects are stored behind `Arc` and only ever replaced wholesale, so a
/// reader holding an `Arc<T>` never observes a partial update. Every write
/// and the index recomputation it implies happen under one write lock; the
/// lock is never held across an await point or a call outside this crate
/// other than the registered index functions.
pub struct ThreadSafeStore<T> {
    inner: RwLock<StoreInner<T>>,
}

impl<T: Send + Sync + 'static> ThreadSafeStore<T> {
    /// Create an empty store with the given indexers.
    pub fn new(indexers: Indexers<T>) -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                items: HashMap::new(),
                indices: Indices::new(indexers),
            }),
        }
    }

    /// Insert or replace the object stored under `key`.
    pub fn put(&self, key: impl Into<ObjectKey>, obj: Arc<T>) {
        let key = key.into();
        let mut guard = self.inner.write();
        let inner = &mut *guard;

        let old = inner.items.insert(key.clone(), Arc::clone(&obj));
        inner
            .indices
            .update(old.as_deref(), Some(obj.as_ref()), &key);
        trace!(key = %key, replaced = old.is_some(), "Stored object");
    }

    /// Remove `key` and every index entry it contributed.
    pub fn remove(&self, key: &str) -> Option<Arc<T>> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;

        let old = inner.items.remove(key);
        if let Some(ref obj) = old {
            inner.indices.update(Some(obj.as_ref()), None, key);
            trace!(key = %key, "Removed object");
        }
        old
    }

    /// Current object for `key`, if present.
    pub fn get(&self, key: &str) -> Option<Arc<T>> {
        self.inner.read().items.get(key).cloned()
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.read().items.contains_key(key)
    }

    /// Snapshot of every stored object.
    pub fn list(&self) -> Vec<Arc<T>> {
        self.inner.read().items.values().cloned().collect()
    }

    /// Snapshot of every stored key.
    pub fn list_keys(&self) -> Vec<ObjectKey> {
        self.inner.read().items.keys().cloned().collect()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.inner.read().items.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.read().items.is_empty()
    }

    /// Swap the whole content for `items` and rebuild every index.
    ///
    /// Returns the keys that were present before and are absent now.
    pub fn replace(&self, items: HashMap<ObjectKey, Arc<T>>) -> Vec<ObjectKey> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;

        let removed = inner
            .items
            .keys()
            .filter(|key| !items.contains_key(*key))
            .cloned()
            .collect();

        inner.items = items;
        inner.indices.rebuild(inner.items.iter());
        removed
    }

    /// Objects whose index function yields `value` for index `name`.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownIndex` if `name` was never registered.
    pub fn by_index(&self, name: &str, value: &str) -> Result<Vec<Arc<T>>> {
        let inner = self.inner.read();
        let keys = inner.indices.keys(name, value)?;
        Ok(keys
            .iter()
            .filter_map(|key| inner.items.get(key).cloned())
            .collect())
    }

    /// Keys whose index function yields `value` for index `name`.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownIndex` if `name` was never registered.
    pub fn index_keys(&self, name: &str, value: &str) -> Result<Vec<ObjectKey>> {
        self.inner.read().indices.keys(name, value)
    }

    /// Objects sharing at least one value of index `name` with `obj`.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownIndex` if `name` was never registered.
    pub fn index(&self, name: &str, obj: &T) -> Result<Vec<Arc<T>>> {
        let inner = self.inner.read();
        let keys: HashSet<ObjectKey> = inner.indices.keys_matching(name, obj)?;
        Ok(keys
            .iter()
            .filter_map(|key| inner.items.get(key).cloned())
            .collect())
    }

    /// Every value currently held by index `name`.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownIndex` if `name` was never registered.
    pub fn list_index_values(&self, name: &str) -> Result<Vec<String>> {
        self.inner.read().indices.values(name)
    }

    /// Whether index `name` is registered.
    pub fn has_index(&self, name: &str) -> bool {
        self.inner.read().indices.has_index(name)
    }

    /// Register more indexers.
    ///
    /// # Errors
    ///
    /// Returns `Error::IndexerPopulated` once the store holds items and
    /// `Error::IndexConflict` when a name is already registered.
    pub fn add_indexers(&self, indexers: Indexers<T>) -> Result<()> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        inner.indices.add_indexers(indexers, inner.items.len())
    }
}

impl<T: Send + Sync + 'static> Default for ThreadSafeStore<T> {
    fn default() -> Self {
        Self::new(Indexers::new())
    }
}
