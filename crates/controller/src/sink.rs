//! Where failures the controller cannot retry end up.

use std::fmt;
use std::time::Duration;

use sluice_core::ObjectKey;
use tracing::error;

/// A failure surfaced to the embedding process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReport {
    /// A key exhausted its retries, or failed while the queue was
    /// draining, and was dropped.
    Dropped {
        key: ObjectKey,
        attempts: u32,
        error: String,
    },
    /// The initial listing did not complete in time.
    CacheSyncTimeout { timeout: Duration },
    /// A reconcile call panicked. The key is still retried.
    WorkerPanicked {
        worker: usize,
        key: ObjectKey,
        message: String,
    },
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dropped {
                key,
                attempts,
                error,
            } => write!(f, "dropped {key} after {attempts} attempts: {error}"),
            Self::CacheSyncTimeout { timeout } => {
                write!(f, "cache did not sync within {timeout:?}")
            }
            Self::WorkerPanicked {
                worker,
                key,
                message,
            } => write!(f, "worker {worker} panicked reconciling {key}: {message}"),
        }
    }
}

/// Receives failure reports.
///
/// Called from worker tasks; implementations must not block for long. A
/// panic in `report` is caught by the worker and logged.
pub trait ErrorSink: Send + Sync {
    fn report(&self, report: FailureReport);
}

/// Logs every report at `error` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn report(&self, report: FailureReport) {
        match &report {
            FailureReport::Dropped { key, attempts, .. } => {
                error!(key = %key, attempts, report = %report, "Dropping key after retries");
            }
            FailureReport::CacheSyncTimeout { timeout } => {
                error!(timeout_secs = timeout.as_secs(), "Cache sync timed out");
            }
            FailureReport::WorkerPanicked { worker, key, .. } => {
                error!(worker, key = %key, report = %report, "Reconcile panicked");
            }
        }
    }
}

impl<F> ErrorSink for F
where
    F: Fn(FailureReport) + Send + Sync,
{
    fn report(&self, report: FailureReport) {
        self(report);
    }
}
