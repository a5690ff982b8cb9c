//! Read-only listing over a cache, optionally scoped to a namespace.

use std::sync::Arc;

use sluice_core::{ObjectMeta, ResultExt};

use crate::cache::Cache;
use crate::index::NAMESPACE_INDEX;

/// Read-only view of a [`Cache`].
#[derive(Clone)]
pub struct Lister<T> {
    cache: Arc<Cache<T>>,
}

impl<T: ObjectMeta + Send + Sync + 'static> Lister<T> {
    /// Create a lister over `cache`.
    pub fn new(cache: Arc<Cache<T>>) -> Self {
        Self { cache }
    }

    /// Every cached object accepted by `selector`.
    pub fn list(&self, selector: impl Fn(&T) -> bool) -> Vec<Arc<T>> {
        self.cache
            .list()
            .into_iter()
            .filter(|obj| selector(obj))
            .collect()
    }

    /// A view restricted to `namespace`.
    pub fn namespaced(&self, namespace: impl Into<String>) -> NamespaceLister<T> {
        NamespaceLister {
            cache: Arc::clone(&self.cache),
            namespace: namespace.into(),
        }
    }
}

/// Accept every object.
pub fn everything<T>(_: &T) -> bool {
    true
}

/// Read-only view of one namespace of a [`Cache`].
pub struct NamespaceLister<T> {
    cache: Arc<Cache<T>>,
    namespace: String,
}

impl<T: ObjectMeta + Send + Sync + 'static> NamespaceLister<T> {
    /// Objects in this namespace accepted by `selector`.
    ///
    /// Uses the namespace index when the cache registers one and scans
    /// otherwise.
    pub fn list(&self, selector: impl Fn(&T) -> bool) -> Vec<Arc<T>> {
        let candidates = if self.cache.store().has_index(NAMESPACE_INDEX) {
            self.cache
                .by_index(NAMESPACE_INDEX, &self.namespace)
                .into_option_logged()
                .unwrap_or_default()
        } else {
            self.cache
                .list()
                .into_iter()
                .filter(|obj| obj.namespace().unwrap_or_default() == self.namespace)
                .collect()
        };

        candidates.into_iter().filter(|obj| selector(obj)).collect()
    }

    /// Object `name` in this namespace.
    pub fn get(&self, name: &str) -> Option<Arc<T>> {
        let key = if self.namespace.is_empty() {
            name.to_string()
        } else {
            format!("{}/{name}", self.namespace)
        };
        self.cache.get_by_key(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{Indexers, namespace_index_func};
    use sluice_core::meta_namespace_key_func;

    #[derive(Debug)]
    struct Deployment {
        name: String,
        namespace: String,
        replicas: u32,
    }

    impl ObjectMeta for Deployment {
        fn name(&self) -> &str {
            &self.name
        }

        fn namespace(&self) -> Option<&str> {
            Some(&self.namespace)
        }
    }

    fn seeded(indexed: bool) -> Lister<Deployment> {
        let mut indexers = Indexers::new();
        if indexed {
            indexers.insert(NAMESPACE_INDEX.to_string(), namespace_index_func());
        }
        let cache = Arc::new(Cache::new(meta_namespace_key_func(), indexers));
        for (ns, name, replicas) in [("default", "web", 3), ("default", "api", 0), ("ops", "web", 1)] {
            let _ = cache.add(Arc::new(Deployment {
                name: name.to_string(),
                namespace: ns.to_string(),
                replicas,
            }));
        }
        Lister::new(cache)
    }

    #[test]
    fn test_namespace_listing_with_and_without_index() {
        for indexed in [true, false] {
            let lister = seeded(indexed);
            let default = lister.namespaced("default").list(everything);
            assert_eq!(default.len(), 2, "indexed = {indexed}");
            assert!(default.iter().all(|d| d.namespace == "default"));
        }
    }

    #[test]
    fn test_selector_filters() {
        let lister = seeded(true);
        let scaled = lister.list(|d| d.replicas > 0);
        assert_eq!(scaled.len(), 2);
    }

    #[test]
    fn test_namespaced_get() {
        let lister = seeded(false);
        let web = lister.namespaced("ops").get("web");
        assert_eq!(web.map(|d| d.replicas), Some(1));
        assert!(lister.namespaced("ops").get("api").is_none());
    }
}
