//! Change notifications delivered by an event source.

use std::sync::Arc;

use sluice_core::ObjectKey;

/// Object observed at deletion time.
#[derive(Debug)]
pub enum DeletedObject<T> {
    /// The final state of the deleted object.
    Object(Arc<T>),
    /// The source missed the deletion and only knows the key.
    Tombstone(DeletedFinalStateUnknown<T>),
}

impl<T> Clone for DeletedObject<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Object(obj) => Self::Object(Arc::clone(obj)),
            Self::Tombstone(tombstone) => Self::Tombstone(tombstone.clone()),
        }
    }
}

/// Tombstone for an object whose deletion was observed late.
#[derive(Debug)]
pub struct DeletedFinalStateUnknown<T> {
    /// Key of the deleted object.
    pub key: ObjectKey,
    /// Last state the source saw, possibly stale.
    pub last_known: Option<Arc<T>>,
}

impl<T> Clone for DeletedFinalStateUnknown<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            last_known: self.last_known.clone(),
        }
    }
}

/// A single object change.
#[derive(Debug)]
pub enum Event<T> {
    Added(Arc<T>),
    Updated { old: Arc<T>, new: Arc<T> },
    Deleted(DeletedObject<T>),
}

impl<T> Clone for Event<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Added(obj) => Self::Added(Arc::clone(obj)),
            Self::Updated { old, new } => Self::Updated {
                old: Arc::clone(old),
                new: Arc::clone(new),
            },
            Self::Deleted(deleted) => Self::Deleted(deleted.clone()),
        }
    }
}

impl<T> Event<T> {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Added(_) => "added",
            Self::Updated { .. } => "updated",
            Self::Deleted(_) => "deleted",
        }
    }
}

/// Everything an event source can tell the event bridge.
#[derive(Debug)]
pub enum Notification<T> {
    /// One object changed.
    Event(Event<T>),
    /// Full listing; the cache is replaced wholesale.
    Replace(Vec<Arc<T>>),
    /// The initial listing has been delivered.
    Synced,
}

impl<T> From<Event<T>> for Notification<T> {
    fn from(event: Event<T>) -> Self {
        Self::Event(event)
    }
}
