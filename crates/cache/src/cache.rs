//! Object-level cache: a [`ThreadSafeStore`] keyed by a [`KeyFunc`].

use std::collections::HashMap;
use std::sync::Arc;

use sluice_core::{KeyFunc, ObjectKey, ObjectMeta, Result, meta_namespace_key_func};

use crate::index::{IndexFunc, Indexers};
use crate::store::ThreadSafeStore;

/// Local mirror of externally owned objects.
///
/// The cache is the single source of truth for "current state": the event
/// bridge writes it, workers read it at dequeue time.
pub struct Cache<T> {
    store: ThreadSafeStore<T>,
    key_func: KeyFunc<T>,
}

impl<T: Send + Sync + 'static> Cache<T> {
    /// Create a cache with a custom key function.
    pub fn new(key_func: KeyFunc<T>, indexers: Indexers<T>) -> Self {
        Self {
            store: ThreadSafeStore::new(indexers),
            key_func,
        }
    }

    /// Start building a cache with a custom key function.
    pub fn builder(key_func: KeyFunc<T>) -> CacheBuilder<T> {
        CacheBuilder {
            key_func,
            indexers: Indexers::new(),
        }
    }

    /// Key of `obj` under this cache's key function.
    ///
    /// # Errors
    ///
    /// Propagates the key function's error.
    pub fn key_of(&self, obj: &T) -> Result<ObjectKey> {
        (self.key_func)(obj)
    }

    /// Insert `obj`, returning its key.
    ///
    /// # Errors
    ///
    /// Propagates the key function's error; the cache is left untouched.
    pub fn add(&self, obj: Arc<T>) -> Result<ObjectKey> {
        let key = self.key_of(&obj)?;
        self.store.put(key.clone(), obj);
        Ok(key)
    }

    /// Replace the stored object with `obj`, returning its key.
    ///
    /// # Errors
    ///
    /// Propagates the key function's error; the cache is left untouched.
    pub fn update(&self, obj: Arc<T>) -> Result<ObjectKey> {
        self.add(obj)
    }

    /// Remove the object with the same key as `obj`.
    ///
    /// # Errors
    ///
    /// Propagates the key function's error.
    pub fn delete(&self, obj: &T) -> Result<ObjectKey> {
        let key = self.key_of(obj)?;
        self.store.remove(&key);
        Ok(key)
    }

    /// Insert or replace by key.
    pub fn put(&self, key: impl Into<ObjectKey>, obj: Arc<T>) {
        self.store.put(key, obj);
    }

    /// Remove by key.
    pub fn remove(&self, key: &str) -> Option<Arc<T>> {
        self.store.remove(key)
    }

    /// Current object for `key`.
    pub fn get_by_key(&self, key: &str) -> Option<Arc<T>> {
        self.store.get(key)
    }

    /// Current object with the same key as `obj`.
    ///
    /// # Errors
    ///
    /// Propagates the key function's error.
    pub fn get(&self, obj: &T) -> Result<Option<Arc<T>>> {
        Ok(self.store.get(&self.key_of(obj)?))
    }

    /// Replace the whole content with `objects`.
    ///
    /// Returns the keys that disappeared.
    ///
    /// # Errors
    ///
    /// Propagates the first key function error; the cache is left untouched.
    pub fn replace(&self, objects: Vec<Arc<T>>) -> Result<Vec<ObjectKey>> {
        let items = objects
            .into_iter()
            .map(|obj| -> Result<(ObjectKey, Arc<T>)> { Ok((self.key_of(&obj)?, obj)) })
            .collect::<Result<HashMap<_, _>>>()?;
        Ok(self.store.replace(items))
    }

    /// Snapshot of every cached object.
    pub fn list(&self) -> Vec<Arc<T>> {
        self.store.list()
    }

    /// Snapshot of every cached key.
    pub fn list_keys(&self) -> Vec<ObjectKey> {
        self.store.list_keys()
    }

    /// Number of cached objects.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Objects filed under `value` in index `name`.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownIndex` if `name` was never registered.
    pub fn by_index(&self, name: &str, value: &str) -> Result<Vec<Arc<T>>> {
        self.store.by_index(name, value)
    }

    /// Keys filed under `value` in index `name`.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownIndex` if `name` was never registered.
    pub fn index_keys(&self, name: &str, value: &str) -> Result<Vec<ObjectKey>> {
        self.store.index_keys(name, value)
    }

    /// The underlying key-level store.
    pub fn store(&self) -> &ThreadSafeStore<T> {
        &self.store
    }
}

impl<T: ObjectMeta + Send + Sync + 'static> Cache<T> {
    /// Cache keyed by `namespace/name` with no indexers.
    pub fn with_meta_keys() -> Self {
        Self::new(meta_namespace_key_func(), Indexers::new())
    }
}

/// Builder for [`Cache`].
pub struct CacheBuilder<T> {
    key_func: KeyFunc<T>,
    indexers: Indexers<T>,
}

impl<T: Send + Sync + 'static> CacheBuilder<T> {
    /// Register an index function under `name`.
    pub fn with_index(mut self, name: impl Into<String>, index_func: IndexFunc<T>) -> Self {
        self.indexers.insert(name.into(), index_func);
        self
    }

    /// Build the cache.
    pub fn build(self) -> Cache<T> {
        Cache::new(self.key_func, self.indexers)
    }
}
