//! Cache sync barrier.

use std::time::Duration;

use sluice_core::{Error, Result};
use tokio::sync::watch;
use tracing::{debug, info};

/// Wait until `synced` reports true.
///
/// # Errors
///
/// - `CacheSyncTimeout` if `timeout` elapses first
/// - `CacheSyncAborted` if `stop` fires first, or the bridge goes away
///   without ever syncing
pub async fn wait_for_cache_sync(
    mut synced: watch::Receiver<bool>,
    timeout: Duration,
    mut stop: watch::Receiver<bool>,
) -> Result<()> {
    debug!(timeout_secs = timeout.as_secs(), "Waiting for cache sync");

    let stopped = async move {
        if stop.wait_for(|stopped| *stopped).await.is_err() {
            // Nobody can stop us any more; let the other branches decide.
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        result = tokio::time::timeout(timeout, synced.wait_for(|synced| *synced)) => match result {
            Ok(Ok(_)) => {
                info!("Cache synced");
                Ok(())
            }
            Ok(Err(_)) => Err(Error::CacheSyncAborted),
            Err(_) => Err(Error::CacheSyncTimeout { timeout }),
        },
        () = stopped => Err(Error::CacheSyncAborted),
    }
}
