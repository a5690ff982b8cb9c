//! Sending half of the channel between an event source and the bridge.

use std::sync::Arc;

use sluice_core::{Error, ObjectKey, Result};
use tokio::sync::mpsc;

use crate::event::{DeletedFinalStateUnknown, DeletedObject, Event, Notification};

/// Default capacity of the notification channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Create a notification channel.
///
/// The [`Notifier`] goes to the event source; the receiver goes to
/// [`crate::Controller::run`].
pub fn notification_channel<T>(capacity: usize) -> (Notifier<T>, mpsc::Receiver<Notification<T>>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (Notifier { tx }, rx)
}

/// Handle an event source uses to report changes.
///
/// Every method waits for channel capacity, so a slow bridge applies
/// backpressure to the source.
pub struct Notifier<T> {
    tx: mpsc::Sender<Notification<T>>,
}

impl<T> Clone for Notifier<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> Notifier<T> {
    /// Report a new object.
    ///
    /// # Errors
    ///
    /// Returns `SourceClosed` if the bridge has stopped.
    pub async fn added(&self, obj: impl Into<Arc<T>>) -> Result<()> {
        self.send(Event::Added(obj.into()).into()).await
    }

    /// Report a changed object.
    ///
    /// # Errors
    ///
    /// Returns `SourceClosed` if the bridge has stopped.
    pub async fn updated(&self, old: impl Into<Arc<T>>, new: impl Into<Arc<T>>) -> Result<()> {
        self.send(
            Event::Updated {
                old: old.into(),
                new: new.into(),
            }
            .into(),
        )
        .await
    }

    /// Report a deleted object with its final state.
    ///
    /// # Errors
    ///
    /// Returns `SourceClosed` if the bridge has stopped.
    pub async fn deleted(&self, obj: impl Into<Arc<T>>) -> Result<()> {
        self.send(Event::Deleted(DeletedObject::Object(obj.into())).into())
            .await
    }

    /// Report a deletion whose final state was missed.
    ///
    /// # Errors
    ///
    /// Returns `SourceClosed` if the bridge has stopped.
    pub async fn deleted_final_state_unknown(
        &self,
        key: impl Into<ObjectKey>,
        last_known: Option<Arc<T>>,
    ) -> Result<()> {
        let tombstone = DeletedFinalStateUnknown {
            key: key.into(),
            last_known,
        };
        self.send(Event::Deleted(DeletedObject::Tombstone(tombstone)).into())
            .await
    }

    /// Deliver a full listing that replaces the cache.
    ///
    /// # Errors
    ///
    /// Returns `SourceClosed` if the bridge has stopped.
    pub async fn replace(&self, objects: Vec<Arc<T>>) -> Result<()> {
        self.send(Notification::Replace(objects)).await
    }

    /// Mark the initial listing as delivered.
    ///
    /// # Errors
    ///
    /// Returns `SourceClosed` if the bridge has stopped.
    pub async fn synced(&self) -> Result<()> {
        self.send(Notification::Synced).await
    }

    /// Send a raw notification.
    ///
    /// # Errors
    ///
    /// Returns `SourceClosed` if the bridge has stopped.
    pub async fn send(&self, notification: Notification<T>) -> Result<()> {
        self.tx
            .send(notification)
            .await
            .map_err(|_| Error::SourceClosed)
    }

    /// Whether the bridge has stopped receiving.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Wait until the bridge stops receiving.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }
}
