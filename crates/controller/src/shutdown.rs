//! Process-wide stop signal and shutdown phase tracking.
//!
//! Handles SIGTERM/SIGINT and fans the stop out over a watch channel to the
//! event bridge, the cache sync barrier, and the controller run loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Shutdown signal types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGTERM signal received
    Sigterm,
    /// SIGINT signal received (Ctrl+C)
    Sigint,
    /// Programmatic shutdown requested
    Programmatic,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sigterm => write!(f, "SIGTERM"),
            Self::Sigint => write!(f, "SIGINT"),
            Self::Programmatic => write!(f, "PROGRAMMATIC"),
        }
    }
}

/// Where the controller is in its shutdown sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownPhase {
    /// Normal operation, no shutdown initiated
    Running,
    /// Stop requested, not yet acted on
    Initiating,
    /// Event bridge is stopping; no new events are accepted
    StoppingSource,
    /// Queue shut down; workers finish what they hold
    DrainingQueue,
    /// Workers joined
    Complete,
}

/// Shutdown coordinator shared by the embedding process and the controller.
pub struct ShutdownCoordinator {
    phase: RwLock<ShutdownPhase>,
    shutdown_initiated: AtomicBool,
    signal: RwLock<Option<ShutdownSignal>>,
    stop_tx: watch::Sender<bool>,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    pub fn new() -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            phase: RwLock::new(ShutdownPhase::Running),
            shutdown_initiated: AtomicBool::new(false),
            signal: RwLock::new(None),
            stop_tx,
        }
    }

    /// Get the current shutdown phase
    pub fn phase(&self) -> ShutdownPhase {
        *self.phase.read()
    }

    /// Advance to `phase`. Phases never move backwards.
    pub fn advance(&self, phase: ShutdownPhase) {
        let mut current = self.phase.write();
        if phase > *current {
            debug!(from = ?*current, to = ?phase, "Shutdown phase");
            *current = phase;
        }
    }

    /// Check if shutdown has been initiated
    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }

    /// Signal that triggered shutdown, if any.
    pub fn signal(&self) -> Option<ShutdownSignal> {
        *self.signal.read()
    }

    /// Receiver that turns true once shutdown is initiated.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }

    /// Initiate graceful shutdown. Later calls are ignored.
    pub fn initiate_shutdown(&self, signal: ShutdownSignal) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!("Shutdown already in progress, ignoring duplicate signal");
            return;
        }

        info!(
            signal = %signal,
            subscribers = self.stop_tx.receiver_count(),
            "Initiating graceful shutdown"
        );
        *self.signal.write() = Some(signal);
        self.advance(ShutdownPhase::Initiating);
        self.stop_tx.send_replace(true);
    }

    /// Wait until shutdown is initiated.
    pub async fn wait(&self) {
        let mut rx = self.subscribe();
        // The sender lives in self, so the channel cannot close here.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Install OS signal handlers (SIGTERM, SIGINT)
pub fn install_signal_handlers(coordinator: Arc<ShutdownCoordinator>) -> tokio::task::JoinHandle<()> {
    info!("Installing OS signal handlers");

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    return;
                }
            };

            let mut sigint = match signal(SignalKind::interrupt()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "Failed to install SIGINT handler");
                    return;
                }
            };

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM");
                    coordinator.initiate_shutdown(ShutdownSignal::Sigterm);
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT");
                    coordinator.initiate_shutdown(ShutdownSignal::Sigint);
                }
            }
        }

        #[cfg(not(unix))]
        {
            // Windows doesn't have SIGTERM, only SIGINT (Ctrl+C)
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl+C");
                return;
            }

            info!("Received Ctrl+C");
            coordinator.initiate_shutdown(ShutdownSignal::Sigint);
        }
    })
}
