//! Per-key business logic invoked by workers.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

/// Brings the world in line with one cached object.
///
/// Called with the object's key and its current cached state, or `None` if
/// the object is gone. The same key is redelivered after failures, so
/// implementations must be idempotent. A call that never returns stalls
/// its worker.
#[async_trait]
pub trait Reconciler<T>: Send + Sync {
    async fn reconcile(&self, key: &str, obj: Option<Arc<T>>) -> anyhow::Result<()>;
}

/// Reconciler backed by an async closure.
pub struct ReconcilerFn<F, T> {
    f: F,
    _marker: PhantomData<fn(T)>,
}

/// Wrap `f` as a [`Reconciler`].
///
/// ```ignore
/// let reconciler = reconciler_fn(|key: String, dep: Option<Arc<Deployment>>| async move {
///     match dep {
///         Some(dep) => println!("sync {key}: {}", dep.name),
///         None => println!("{key} deleted"),
///     }
///     Ok(())
/// });
/// ```
pub fn reconciler_fn<T, F, Fut>(f: F) -> ReconcilerFn<F, T>
where
    F: Fn(String, Option<Arc<T>>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    ReconcilerFn {
        f,
        _marker: PhantomData,
    }
}

#[async_trait]
impl<T, F, Fut> Reconciler<T> for ReconcilerFn<F, T>
where
    T: Send + Sync + 'static,
    F: Fn(String, Option<Arc<T>>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn reconcile(&self, key: &str, obj: Option<Arc<T>>) -> anyhow::Result<()> {
        (self.f)(key.to_string(), obj).await
    }
}
