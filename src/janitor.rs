//! Recording retention sweep
//!
//! The janitor deletes recordings older than the retention window: first the
//! artifact on disk, then the database row. A sweep never fails as a whole.
//! Whatever it could not finish stays eligible and is retried on the next run,
//! so re-running over partially cleaned state is safe.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Deserialize;

use crate::db::RecordingStore;
use crate::registry::{
    RegistryError, RestartableUnit, Runnable, Stoppable, ThreadRegistry, UnitBody, UnitCategory,
    UnitHandle, UnitKey,
};
use crate::ticker::Ticker;

/// Registered name of the janitor unit
pub const RECORDING_JANITOR: &str = "recording_janitor";

/// Recorder and retention settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Folder recordings are written to
    pub folder: PathBuf,

    /// Days to keep recordings
    pub retain: u32,

    /// Interval between retention sweeps
    #[serde(deserialize_with = "crate::config::secs::deserialize")]
    pub cleanup_interval: Duration,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            folder: PathBuf::from("/recordings"),
            retain: 7,
            cleanup_interval: Duration::from_secs(60 * 60),
        }
    }
}

impl RecorderConfig {
    /// Retention window as a signed duration
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retain))
    }
}

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Recordings past the retention window
    pub expired: usize,
    /// Artifacts deleted from disk
    pub files_removed: usize,
    /// Artifacts that were already gone
    pub files_missing: usize,
    /// Database rows deleted
    pub rows_removed: usize,
    /// Failures left for the next run
    pub errors: usize,
}

/// Periodic retention sweep over stored recordings
pub struct RecordingJanitor {
    store: Arc<dyn RecordingStore>,
    retention: chrono::Duration,
    ticker: Ticker,
    sweep_lock: Mutex<()>,
}

impl RecordingJanitor {
    /// Create a janitor from recorder settings
    pub fn new(store: Arc<dyn RecordingStore>, config: &RecorderConfig) -> Self {
        Self::with_retention(store, config.retention(), config.cleanup_interval)
    }

    /// Create a janitor with an explicit retention window and interval
    pub fn with_retention(
        store: Arc<dyn RecordingStore>,
        retention: chrono::Duration,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            retention,
            ticker: Ticker::new(interval),
            sweep_lock: Mutex::new(()),
        }
    }

    /// Register the janitor's schedule in `registry`, start it, and run one
    /// sweep immediately on the calling thread
    pub fn start(
        self: &Arc<Self>,
        registry: &ThreadRegistry,
    ) -> Result<(UnitHandle, SweepReport), RegistryError> {
        let unit = RestartableUnit::new(
            UnitKey::new(UnitCategory::Janitor, RECORDING_JANITOR),
            UnitBody::Stoppable(Arc::clone(self) as Arc<dyn Stoppable>),
        );
        let handle = registry.register(unit)?;
        handle.start()?;

        tracing::debug!("Running initial recording sweep");
        let report = self.sweep();

        Ok((handle, report))
    }

    /// Sweep recordings older than the retention window
    pub fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now())
    }

    /// Sweep as if the current time were `now`
    pub fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let _sweep = self.sweep_lock.lock();
        let mut report = SweepReport::default();
        let cutoff = now - self.retention;

        let expired = match self.store.recordings_older_than(cutoff) {
            Ok(expired) => expired,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list expired recordings");
                report.errors += 1;
                return report;
            }
        };
        report.expired = expired.len();

        for recording in expired {
            let Some(id) = recording.id else {
                continue;
            };

            match std::fs::remove_file(&recording.path) {
                Ok(()) => report.files_removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => report.files_missing += 1,
                Err(e) => {
                    tracing::warn!(
                        recording = id,
                        path = %recording.path.display(),
                        error = %e,
                        "Failed to delete recording, retrying next sweep"
                    );
                    report.errors += 1;
                    continue;
                }
            }

            match self.store.remove_recording(id) {
                Ok(()) => report.rows_removed += 1,
                Err(e) => {
                    tracing::warn!(
                        recording = id,
                        error = %e,
                        "Failed to delete recording row, retrying next sweep"
                    );
                    report.errors += 1;
                }
            }
        }

        if report.expired > 0 {
            tracing::info!(
                expired = report.expired,
                removed = report.rows_removed,
                errors = report.errors,
                "Recording sweep complete"
            );
        }

        report
    }

    /// Halt future sweeps, waiting out one in progress
    pub fn stop(&self) {
        self.ticker.stop();
        let _sweep = self.sweep_lock.lock();
    }
}

impl Runnable for RecordingJanitor {
    fn run(&self) {
        while self.ticker.wait() {
            self.sweep();
        }
    }
}

impl Stoppable for RecordingJanitor {
    fn stop(&self) {
        RecordingJanitor::stop(self);
    }
}
