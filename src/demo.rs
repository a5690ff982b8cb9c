//! Demo objects, a scripted event source, and the index walkthrough.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sluice_cache::{Cache, Lister, NAMESPACE_INDEX, everything, namespace_index_func};
use sluice_controller::Notifier;
use sluice_core::{ObjectMeta, meta_namespace_key_func};
use tokio::sync::watch;
use tracing::{debug, info};

/// Index of pods by the node they run on.
pub const NODE_INDEX: &str = "node";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub name: String,
    pub namespace: String,
    pub replicas: u32,
}

impl Deployment {
    pub fn new(namespace: &str, name: &str, replicas: u32) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            replicas,
        }
    }

    fn scaled(&self, replicas: u32) -> Self {
        Self {
            replicas,
            ..self.clone()
        }
    }
}

impl ObjectMeta for Deployment {
    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> Option<&str> {
        Some(&self.namespace)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pod {
    pub name: String,
    pub namespace: String,
    pub node_name: String,
}

impl ObjectMeta for Pod {
    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> Option<&str> {
        Some(&self.namespace)
    }
}

/// Reconcile one deployment by printing what would be done.
///
/// Deployments named `flaky` always fail, to show retries and the drop.
pub async fn print_deployment(key: String, deployment: Option<Arc<Deployment>>) -> Result<()> {
    match deployment {
        Some(deployment) if deployment.name == "flaky" => {
            anyhow::bail!("image pull failed for {key}")
        }
        Some(deployment) => {
            println!("Sync deploy: {key} ({} replicas)", deployment.replicas);
        }
        None => println!("Delete deploy: {key}"),
    }
    Ok(())
}

/// Initial listing for the scripted source.
fn initial_deployments() -> Vec<Deployment> {
    vec![
        Deployment::new("default", "web", 2),
        Deployment::new("default", "api", 1),
        Deployment::new("default", "flaky", 1),
        Deployment::new("kube-system", "coredns", 2),
    ]
}

/// Play a short script of deployment changes, then idle until the
/// controller hangs up.
///
/// The `default` namespace is listed once `synced` reports the initial
/// listing as applied.
///
/// # Errors
///
/// Returns `SourceClosed` only if the controller stops before the initial
/// listing is delivered.
pub async fn scripted_deployments(
    notifier: Notifier<Deployment>,
    lister: Lister<Deployment>,
    synced: watch::Receiver<bool>,
    step: Duration,
) -> sluice_core::Result<()> {
    let listing: Vec<Arc<Deployment>> = initial_deployments().into_iter().map(Arc::new).collect();
    notifier.replace(listing).await?;
    notifier.synced().await?;

    tokio::select! {
        () = notifier.closed() => return Ok(()),
        applied = cache_synced(synced) => {
            if !applied {
                return Ok(());
            }
        }
    }

    for (idx, deploy) in lister.namespaced("default").list(everything).iter().enumerate() {
        info!(index = idx + 1, name = %deploy.name, "Listed deployment in default");
    }

    let web = Deployment::new("default", "web", 2);
    let api = Deployment::new("default", "api", 1);
    let script = [
        Script::Update(web.clone(), web.scaled(3)),
        Script::Delete(api.clone()),
        Script::Add(Deployment::new("default", "worker", 1)),
        Script::Update(web.scaled(3), web.scaled(5)),
        Script::Tombstone("kube-system/coredns".to_string()),
    ];

    for change in script {
        tokio::select! {
            () = notifier.closed() => return Ok(()),
            () = tokio::time::sleep(step) => {}
        }
        debug!(change = ?change, "Emitting scripted change");
        let sent = match change {
            Script::Add(deploy) => notifier.added(deploy).await,
            Script::Update(old, new) => notifier.updated(old, new).await,
            Script::Delete(deploy) => notifier.deleted(deploy).await,
            Script::Tombstone(key) => notifier.deleted_final_state_unknown(key, None).await,
        };
        if sent.is_err() {
            return Ok(());
        }
    }

    notifier.closed().await;
    Ok(())
}

async fn cache_synced(mut synced: watch::Receiver<bool>) -> bool {
    synced.wait_for(|synced| *synced).await.is_ok()
}

#[derive(Debug)]
enum Script {
    Add(Deployment),
    Update(Deployment, Deployment),
    Delete(Deployment),
    Tombstone(String),
}

/// Pods used by the index walkthrough.
pub fn walkthrough_pods() -> Vec<Pod> {
    [
        ("default", "pod1", "node1"),
        ("default", "pod2", "node1"),
        ("kube-system", "pod3", "node2"),
    ]
    .into_iter()
    .map(|(namespace, name, node_name)| Pod {
        name: name.to_string(),
        namespace: namespace.to_string(),
        node_name: node_name.to_string(),
    })
    .collect()
}

/// Cache of pods indexed by namespace and node.
pub fn pod_cache() -> Cache<Pod> {
    Cache::builder(meta_namespace_key_func())
        .with_index(NAMESPACE_INDEX, namespace_index_func())
        .with_index(NODE_INDEX, Arc::new(|pod: &Pod| vec![pod.node_name.clone()]))
        .build()
}

/// Sorted names of the pods under `index_name = value`.
///
/// # Errors
///
/// Fails if `index_name` is not registered.
pub fn names_by_index(cache: &Cache<Pod>, index_name: &str, value: &str) -> Result<Vec<String>> {
    let mut names: Vec<String> = cache
        .by_index(index_name, value)
        .with_context(|| format!("Failed to query index '{index_name}'"))?
        .iter()
        .map(|pod| pod.name.clone())
        .collect();
    names.sort();
    Ok(names)
}

/// Add the three pods and print index query results.
///
/// # Errors
///
/// Fails if a pod cannot be keyed or an index query fails.
pub fn index_walkthrough() -> Result<()> {
    let cache = pod_cache();
    for pod in walkthrough_pods() {
        cache.add(Arc::new(pod)).context("Failed to add pod")?;
    }

    println!("Pods in namespace default:");
    for name in names_by_index(&cache, NAMESPACE_INDEX, "default")? {
        println!("  {name}");
    }

    println!("Pods on node1:");
    for name in names_by_index(&cache, NODE_INDEX, "node1")? {
        println!("  {name}");
    }

    cache.remove("default/pod1");
    println!(
        "Pods on node1 after deleting pod1: {:?}",
        names_by_index(&cache, NODE_INDEX, "node1")?
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use sluice_controller::{Notification, notification_channel};

    use super::*;

    #[test]
    fn test_index_queries_match_walkthrough() {
        let cache = pod_cache();
        for pod in walkthrough_pods() {
            cache.add(Arc::new(pod)).unwrap();
        }

        assert_eq!(names_by_index(&cache, NAMESPACE_INDEX, "default").unwrap(), vec!["pod1", "pod2"]);
        assert_eq!(names_by_index(&cache, NODE_INDEX, "node1").unwrap(), vec!["pod1", "pod2"]);
        assert_eq!(names_by_index(&cache, NODE_INDEX, "node2").unwrap(), vec!["pod3"]);
        assert!(names_by_index(&cache, "zone", "a").is_err());

        cache.remove("default/pod1");
        assert_eq!(names_by_index(&cache, NODE_INDEX, "node1").unwrap(), vec!["pod2"]);
    }

    #[tokio::test]
    async fn test_print_deployment_fails_for_flaky() {
        let flaky = Arc::new(Deployment::new("default", "flaky", 1));
        assert!(print_deployment("default/flaky".into(), Some(flaky)).await.is_err());
        assert!(print_deployment("default/gone".into(), None).await.is_ok());
    }

    /// Given a scripted source
    /// When its receiver is read
    /// Then the listing and sync marker arrive before any change
    #[tokio::test(start_paused = true)]
    async fn test_script_starts_with_listing_then_sync() {
        let (notifier, mut rx) = notification_channel(16);
        let lister = Lister::new(Arc::new(Cache::with_meta_keys()));
        let (_synced_tx, synced) = watch::channel(true);
        let source = tokio::spawn(scripted_deployments(
            notifier,
            lister,
            synced,
            Duration::from_secs(1),
        ));

        assert!(matches!(rx.recv().await, Some(Notification::Replace(list)) if list.len() == 4));
        assert!(matches!(rx.recv().await, Some(Notification::Synced)));
        assert!(matches!(rx.recv().await, Some(Notification::Event(_))));

        drop(rx);
        assert!(source.await.unwrap().is_ok());
    }

    /// Given a controller that has not applied the initial listing yet
    /// When the source has sent its sync marker
    /// Then no scripted change is emitted until the cache reports synced
    #[tokio::test(start_paused = true)]
    async fn test_script_waits_for_cache_sync() {
        let (notifier, mut rx) = notification_channel(16);
        let lister = Lister::new(Arc::new(Cache::with_meta_keys()));
        let (synced_tx, synced) = watch::channel(false);
        let source = tokio::spawn(scripted_deployments(
            notifier,
            lister,
            synced,
            Duration::from_secs(1),
        ));

        assert!(matches!(rx.recv().await, Some(Notification::Replace(_))));
        assert!(matches!(rx.recv().await, Some(Notification::Synced)));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());

        synced_tx.send_replace(true);
        assert!(matches!(rx.recv().await, Some(Notification::Event(_))));

        drop(rx);
        assert!(source.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_script_stops_when_controller_never_syncs() {
        let (notifier, mut rx) = notification_channel(16);
        let lister = Lister::new(Arc::new(Cache::with_meta_keys()));
        let (synced_tx, synced) = watch::channel(false);
        let source = tokio::spawn(scripted_deployments(
            notifier,
            lister,
            synced,
            Duration::from_secs(1),
        ));

        assert!(matches!(rx.recv().await, Some(Notification::Replace(_))));
        assert!(matches!(rx.recv().await, Some(Notification::Synced)));
        drop(synced_tx);

        assert!(source.await.unwrap().is_ok());
    }
}
