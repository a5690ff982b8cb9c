//! Secondary indices derived from cached objects.
//!
//! An index maps each value produced by its [`IndexFunc`] to the set of keys
//! whose objects produced it. Indices are never mutated on their own; the
//! store updates them inside the same critical section as the item write.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use sluice_core::{Error, ObjectKey, ObjectMeta, Result};

/// Name of the built-in namespace index.
pub const NAMESPACE_INDEX: &str = "namespace";

/// Derives zero or more index values from an object.
pub type IndexFunc<T> = Arc<dyn Fn(&T) -> Vec<String> + Send + Sync>;

/// Registered index functions by index name.
pub type Indexers<T> = HashMap<String, IndexFunc<T>>;

/// Index value -> keys of the objects that produced it.
type Index = HashMap<String, HashSet<ObjectKey>>;

/// Index objects by namespace. Cluster-scoped objects land under `""`.
pub fn namespace_index_func<T: ObjectMeta + 'static>() -> IndexFunc<T> {
    Arc::new(|obj: &T| vec![obj.namespace().unwrap_or_default().to_string()])
}

/// Registered indexers together with the indices they maintain.
pub(crate) struct Indices<T> {
    indexers: Indexers<T>,
    indices: HashMap<String, Index>,
}

impl<T> Indices<T> {
    pub(crate) fn new(indexers: Indexers<T>) -> Self {
        let indices = indexers
            .keys()
            .map(|name| (name.clone(), Index::new()))
            .collect();
        Self { indexers, indices }
    }

    pub(crate) fn has_index(&self, name: &str) -> bool {
        self.indexers.contains_key(name)
    }

    /// Move `key` from the values `old` produced to the values `new` produces.
    pub(crate) fn update(&mut self, old: Option<&T>, new: Option<&T>, key: &str) {
        for (name, index_func) in &self.indexers {
            let old_values = old.map(|obj| index_func(obj)).unwrap_or_default();
            let new_values = new.map(|obj| index_func(obj)).unwrap_or_default();

            if old.is_some() && new.is_some() && old_values == new_values {
                continue;
            }

            let index = self.indices.entry(name.clone()).or_default();
            for value in &old_values {
                remove_key(index, value, key);
            }
            for value in new_values {
                index.entry(value).or_default().insert(key.to_string());
            }
        }
    }

    /// Drop every index entry and rebuild from `items`.
    pub(crate) fn rebuild<'a, I>(&mut self, items: I)
    where
        T: 'a,
        I: IntoIterator<Item = (&'a ObjectKey, &'a Arc<T>)>,
    {
        for index in self.indices.values_mut() {
            index.clear();
        }
        for (key, obj) in items {
            self.update(None, Some(obj.as_ref()), key);
        }
    }

    /// Keys filed under `value` in the named index.
    pub(crate) fn keys(&self, name: &str, value: &str) -> Result<Vec<ObjectKey>> {
        let index = self.index(name)?;
        Ok(index
            .get(value)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default())
    }

    /// Keys sharing at least one value of the named index with `obj`.
    pub(crate) fn keys_matching(&self, name: &str, obj: &T) -> Result<HashSet<ObjectKey>> {
        let index = self.index(name)?;
        let index_func = self
            .indexers
            .get(name)
            .ok_or_else(|| Error::unknown_index(name))?;

        Ok(index_func(obj)
            .iter()
            .filter_map(|value| index.get(value))
            .flatten()
            .cloned()
            .collect())
    }

    /// Every value currently present in the named index.
    pub(crate) fn values(&self, name: &str) -> Result<Vec<String>> {
        Ok(self.index(name)?.keys().cloned().collect())
    }

    /// Register additional indexers. Only allowed while the store is empty.
    pub(crate) fn add_indexers(&mut self, new: Indexers<T>, items: usize) -> Result<()> {
        if items > 0 {
            return Err(Error::IndexerPopulated { items });
        }
        if let Some(name) = new.keys().find(|name| self.indexers.contains_key(*name)) {
            return Err(Error::index_conflict(name.clone()));
        }

        for (name, index_func) in new {
            self.indices.insert(name.clone(), Index::new());
            self.indexers.insert(name, index_func);
        }
        Ok(())
    }

    fn index(&self, name: &str) -> Result<&Index> {
        self.indices
            .get(name)
            .ok_or_else(|| Error::unknown_index(name))
    }
}

fn remove_key(index: &mut Index, value: &str, key: &str) {
    if let Some(keys) = index.get_mut(value) {
        keys.remove(key);
        // Empty sets would leave stale values behind in `values()`.
        if keys.is_empty() {
            index.remove(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_letter() -> IndexFunc<String> {
        Arc::new(|s: &String| s.chars().take(1).map(String::from).collect())
    }

    fn indices() -> Indices<String> {
        let mut indexers = Indexers::new();
        indexers.insert("first".to_string(), first_letter());
        Indices::new(indexers)
    }

    #[test]
    fn test_update_moves_key_between_values() {
        let mut idx = indices();
        let apple = "apple".to_string();
        let banana = "banana".to_string();

        idx.update(None, Some(&apple), "k");
        assert_eq!(idx.keys("first", "a").ok(), Some(vec!["k".to_string()]));

        idx.update(Some(&apple), Some(&banana), "k");
        assert_eq!(idx.keys("first", "a").ok(), Some(Vec::new()));
        assert_eq!(idx.keys("first", "b").ok(), Some(vec!["k".to_string()]));
    }

    #[test]
    fn test_empty_values_are_pruned() {
        let mut idx = indices();
        let apple = "apple".to_string();

        idx.update(None, Some(&apple), "k");
        idx.update(Some(&apple), None, "k");

        assert_eq!(idx.values("first").ok(), Some(Vec::new()));
    }

    #[test]
    fn test_unknown_index_is_an_error() {
        let idx = indices();
        assert!(matches!(
            idx.keys("missing", "a"),
            Err(Error::UnknownIndex { .. })
        ));
        assert!(idx.values("missing").is_err());
    }

    #[test]
    fn test_add_indexers_rejects_conflicts_and_populated_stores() {
        let mut idx = indices();

        let mut dup = Indexers::new();
        dup.insert("first".to_string(), first_letter());
        assert!(matches!(
            idx.add_indexers(dup, 0),
            Err(Error::IndexConflict { .. })
        ));

        let mut fresh = Indexers::new();
        fresh.insert("len".to_string(), Arc::new(|s: &String| vec![s.len().to_string()]) as IndexFunc<String>);
        assert!(matches!(
            idx.add_indexers(fresh.clone(), 3),
            Err(Error::IndexerPopulated { items: 3 })
        ));
        assert!(idx.add_indexers(fresh, 0).is_ok());
        assert!(idx.has_index("len"));
    }
}
