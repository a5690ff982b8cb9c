//! # Sluice - reconciliation controller demo
//!
//! ## Commands
//!
//! - `run`: starts a deployment controller fed by a scripted in-process
//!   source and runs until SIGTERM/SIGINT
//! - `index`: adds three pods to an indexed cache and prints namespace and
//!   node queries
//!
//! ## Shutdown
//!
//! Signals go through the `ShutdownCoordinator`: the event bridge stops
//! first, the work queue drains, then the workers exit.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

mod cli;
mod demo;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use sluice_cache::{NAMESPACE_INDEX, namespace_index_func};
use sluice_controller::{
    Controller, ControllerConfig, DEFAULT_CHANNEL_CAPACITY, ShutdownCoordinator,
    install_signal_handlers, notification_channel, reconciler_fn,
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands};
use crate::demo::Deployment;

/// Delay between scripted source changes.
const SCRIPT_STEP: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            config,
            workers,
            max_retries,
        } => run(config, workers, max_retries).await,
        Commands::Index => demo::index_walkthrough(),
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Resolve the configuration: file (or defaults), then CLI overrides.
fn load_config(
    path: Option<PathBuf>,
    workers: Option<usize>,
    max_retries: Option<u32>,
) -> Result<ControllerConfig> {
    let mut config = match path {
        Some(path) => ControllerConfig::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ControllerConfig::default(),
    };

    if let Some(workers) = workers {
        config = config.with_workers(workers);
    }
    if let Some(max_retries) = max_retries {
        config = config.with_max_retries(max_retries);
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn run(path: Option<PathBuf>, workers: Option<usize>, max_retries: Option<u32>) -> Result<()> {
    let start_time = Instant::now();
    let config = load_config(path, workers, max_retries)?;

    let shutdown = Arc::new(ShutdownCoordinator::new());
    let signals = install_signal_handlers(Arc::clone(&shutdown));

    let controller = Controller::<Deployment>::builder()
        .with_meta_keys()
        .with_index(NAMESPACE_INDEX, namespace_index_func())
        .with_reconciler(reconciler_fn(demo::print_deployment))
        .with_config(config)
        .build()
        .context("Failed to build controller")?;

    let (notifier, notifications) = notification_channel(DEFAULT_CHANNEL_CAPACITY);
    let source = tokio::spawn(demo::scripted_deployments(
        notifier,
        controller.lister(),
        controller.has_synced(),
        SCRIPT_STEP,
    ));

    info!(
        startup_ms = u64::try_from(start_time.elapsed().as_millis()).unwrap_or(u64::MAX),
        "Sluice is running. Press Ctrl+C to stop."
    );
    let stats = controller
        .run(notifications, &shutdown)
        .await
        .context("Controller failed")?;

    match source.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Scripted source stopped early"),
        Err(e) => warn!(error = %e, "Scripted source task failed"),
    }
    signals.abort();

    info!(
        reconciled = stats.reconciled,
        requeued = stats.requeued,
        dropped = stats.dropped,
        panics = stats.panics,
        notifications = stats.notifications,
        "Shutdown complete"
    );
    Ok(())
}
