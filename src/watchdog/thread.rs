//! Thread watchdog
//!
//! Periodically scans the registry and restarts every supervised unit whose
//! execution ended without a stop request. There is no backoff: a unit that
//! crashes right after every restart is restarted on every tick.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::registry::{
    RegistryError, RestartableUnit, Runnable, Stoppable, ThreadRegistry, UnitBody, UnitCategory,
    UnitHandle, UnitKey, UnitState,
};
use crate::ticker::Ticker;

/// Registered name of the thread watchdog unit
pub const THREAD_WATCHDOG: &str = "thread_watchdog";

/// Outcome of a single registry scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Units restarted during this scan
    pub restarted: Vec<UnitKey>,
    /// Abandoned units seen and skipped
    pub abandoned: usize,
    /// Units whose restart could not be spawned
    pub failed: Vec<UnitKey>,
}

/// Supervisor for registered units
pub struct ThreadWatchDog {
    registry: Arc<ThreadRegistry>,
    ticker: Ticker,
    /// Held for the duration of a scan so `stop` can wait one out
    scan_lock: Mutex<()>,
}

impl ThreadWatchDog {
    /// Create a watchdog over `registry` ticking every `interval`
    pub fn new(registry: Arc<ThreadRegistry>, interval: Duration) -> Self {
        Self {
            registry,
            ticker: Ticker::new(interval),
            scan_lock: Mutex::new(()),
        }
    }

    /// Register the watchdog as an unsupervised unit and start it
    pub fn start(self: &Arc<Self>) -> Result<UnitHandle, RegistryError> {
        let unit = RestartableUnit::new(
            UnitKey::new(UnitCategory::Watchdog, THREAD_WATCHDOG),
            UnitBody::Stoppable(Arc::clone(self) as Arc<dyn Stoppable>),
        )
        .unsupervised();

        let handle = self.registry.register(unit)?;
        handle.start()?;

        tracing::info!(
            interval_ms = self.ticker.interval().as_millis() as u64,
            "Thread watchdog started"
        );

        Ok(handle)
    }

    /// Run one scan over every registered unit
    ///
    /// Does nothing once the watchdog has been stopped.
    pub fn scan(&self) -> ScanReport {
        let _scan = self.scan_lock.lock();
        let mut report = ScanReport::default();

        if self.ticker.is_stopped() {
            return report;
        }

        for handle in self.registry.list_all() {
            if !handle.is_supervised() {
                continue;
            }

            match handle.state() {
                UnitState::Abandoned => {
                    tracing::debug!(unit = %handle.key(), "Skipping abandoned unit");
                    report.abandoned += 1;
                }
                UnitState::Stopped => match handle.restart_if_crashed() {
                    Ok(true) => report.restarted.push(handle.key().clone()),
                    Ok(false) => {}
                    Err(e) => {
                        tracing::error!(unit = %handle.key(), error = %e, "Failed to restart unit");
                        report.failed.push(handle.key().clone());
                    }
                },
                UnitState::Created | UnitState::Running | UnitState::Stopping => {}
            }
        }

        report
    }

    /// Halt future scans
    ///
    /// Waits for an in-flight scan to finish, so no restart happens after
    /// this returns.
    pub fn stop(&self) {
        let first = self.ticker.stop();
        let _scan = self.scan_lock.lock();
        if first {
            tracing::info!("Thread watchdog stopped");
        }
    }

    /// Whether the watchdog has been stopped
    pub fn is_stopped(&self) -> bool {
        self.ticker.is_stopped()
    }
}

impl Runnable for ThreadWatchDog {
    fn run(&self) {
        while self.ticker.wait() {
            let report = self.scan();
            if !report.restarted.is_empty() {
                tracing::debug!(restarted = report.restarted.len(), "Watchdog scan complete");
            }
        }
    }
}

impl Stoppable for ThreadWatchDog {
    fn stop(&self) {
        ThreadWatchDog::stop(self);
    }
}
