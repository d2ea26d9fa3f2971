//! Shutdown coordination

use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;

use super::signals::{wait_for_shutdown_signal, ShutdownReason};
use crate::registry::UnitKey;

/// One-shot shutdown trigger
///
/// Any number of signals or programmatic requests may arrive; only the first
/// [`trigger`](Self::trigger) wins and runs the shutdown sequence.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    requested: CancellationToken,
    triggered: AtomicBool,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask whoever waits in [`wait`](Self::wait) to shut down
    pub fn request(&self) {
        self.requested.cancel();
    }

    /// Whether a shutdown was requested
    pub fn is_requested(&self) -> bool {
        self.requested.is_cancelled()
    }

    /// Claim the shutdown; `true` only for the first caller
    pub fn trigger(&self) -> bool {
        !self.triggered.swap(true, Ordering::SeqCst)
    }

    /// Whether the shutdown sequence was claimed
    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Wait for a termination signal or a programmatic request
    pub async fn wait(&self) -> ShutdownReason {
        tokio::select! {
            biased;
            _ = self.requested.cancelled() => ShutdownReason::Internal,
            result = wait_for_shutdown_signal() => match result {
                Ok(reason) => reason,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to install signal handlers");
                    self.requested.cancelled().await;
                    ShutdownReason::Internal
                }
            },
        }
    }
}

/// Outcome of the shutdown sequence
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Units that returned within the join timeout, in stop order
    pub stopped: Vec<UnitKey>,
    /// Units still running when the join timeout elapsed
    pub timed_out: Vec<UnitKey>,
    /// Units without a stop function, left to process exit
    pub abandoned: Vec<UnitKey>,
    /// Whether the front end stopped in time
    pub front_end_stopped: bool,
}

impl ShutdownReport {
    /// Whether every unit and the front end stopped in time
    pub fn is_clean(&self) -> bool {
        self.timed_out.is_empty() && self.abandoned.is_empty() && self.front_end_stopped
    }
}
