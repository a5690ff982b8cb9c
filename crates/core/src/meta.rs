//! Object identity and key functions.
//!
//! A key is a stable string identity derived from an object's namespace and
//! name. It is the unit of deduplication in the work queue, of lookup in the
//! cache, and of membership in every index.

use std::sync::Arc;

use crate::error::Error;
use crate::result::Result;

/// String identity of a cached object, e.g. `default/pod1`.
pub type ObjectKey = String;

/// Shared key function used by caches and the event bridge.
///
/// Must be a pure function of object identity, never of mutable fields.
pub type KeyFunc<T> = Arc<dyn Fn(&T) -> Result<ObjectKey> + Send + Sync>;

/// Identity accessors for externally owned objects.
pub trait ObjectMeta {
    /// Object name, unique within its namespace.
    fn name(&self) -> &str;

    /// Object namespace. `None` or an empty string means cluster-scoped.
    fn namespace(&self) -> Option<&str>;
}

/// Compute `namespace/name`, or just `name` for cluster-scoped objects.
///
/// # Errors
///
/// Returns `Error::KeyFuncFailed` if the object has an empty name.
pub fn meta_namespace_key<T: ObjectMeta + ?Sized>(obj: &T) -> Result<ObjectKey> {
    let name = obj.name();
    if name.is_empty() {
        return Err(Error::key_func_failed("object has no name"));
    }

    match obj.namespace().filter(|ns| !ns.is_empty()) {
        Some(ns) => Ok(format!("{ns}/{name}")),
        None => Ok(name.to_string()),
    }
}

/// Key function for any `ObjectMeta` type.
pub fn meta_namespace_key_func<T: ObjectMeta + 'static>() -> KeyFunc<T> {
    Arc::new(|obj: &T| meta_namespace_key(obj))
}

/// Split a key produced by [`meta_namespace_key`] into namespace and name.
///
/// # Errors
///
/// Returns `Error::InvalidKey` if the key has more than two segments or an
/// empty name.
pub fn split_meta_namespace_key(key: &str) -> Result<(Option<&str>, &str)> {
    let mut parts = key.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(name), None, None) if !name.is_empty() => Ok((None, name)),
        (Some(ns), Some(name), None) if !name.is_empty() => {
            Ok(((!ns.is_empty()).then_some(ns), name))
        }
        _ => Err(Error::invalid_key(key, "unexpected key format")),
    }
}
