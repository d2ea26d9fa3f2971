//! Subprocess watchdog
//!
//! Supervises child processes (video decoders) owned by pipelines. The
//! watchdog only detects exits; what happens next is decided by the owner's
//! recovery hook, since only the owner knows how to rebuild the command line.

use std::process::{Child, ExitStatus};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::registry::{
    RegistryError, RestartableUnit, Runnable, Stoppable, ThreadRegistry, UnitBody, UnitCategory,
    UnitHandle, UnitKey,
};
use crate::ticker::Ticker;

/// Registered name of the subprocess watchdog unit
pub const SUBPROCESS_WATCHDOG: &str = "subprocess_watchdog";

/// What the owner wants done with an exited process
#[derive(Debug)]
pub enum ExitDecision {
    /// Keep supervising, now watching this freshly spawned child
    Replace(Child),
    /// Stop supervising; the owner deals with the failure
    Release,
}

/// Owner of a supervised process
///
/// `on_process_exit` runs synchronously on the watchdog's thread.
pub trait ProcessOwner: Send + Sync {
    /// Called once per observed exit with the process name and exit status
    fn on_process_exit(&self, name: &str, status: ExitStatus) -> ExitDecision;
}

struct SupervisedProcess {
    id: u64,
    name: String,
    owner: Weak<dyn ProcessOwner>,
    child: Mutex<Child>,
    last_alive: Mutex<Instant>,
}

/// Reference to a supervised process, held by its owner
#[derive(Clone)]
pub struct ProcessHandle {
    process: Arc<SupervisedProcess>,
}

impl ProcessHandle {
    /// Process name given at supervision time
    pub fn name(&self) -> &str {
        &self.process.name
    }

    /// OS process id of the current child
    pub fn pid(&self) -> u32 {
        self.process.child.lock().id()
    }

    /// Last time the watchdog saw the process alive
    pub fn last_alive(&self) -> Instant {
        *self.process.last_alive.lock()
    }

    /// Kill the current child and reap it
    ///
    /// Killing an already exited child is not an error.
    pub fn kill(&self) -> std::io::Result<()> {
        let mut child = self.process.child.lock();
        match child.try_wait()? {
            Some(_) => Ok(()),
            None => {
                child.kill()?;
                child.wait().map(|_| ())
            }
        }
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("id", &self.process.id)
            .field("name", &self.process.name)
            .finish()
    }
}

/// Outcome of a single subprocess scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessScanReport {
    /// Processes seen alive
    pub alive: usize,
    /// Processes replaced by their owner
    pub replaced: Vec<String>,
    /// Processes released by their owner (or orphaned)
    pub released: Vec<String>,
}

/// Supervisor for child processes
pub struct SubprocessWatchDog {
    processes: Mutex<Vec<Arc<SupervisedProcess>>>,
    next_id: AtomicU64,
    ticker: Ticker,
    scan_lock: Mutex<()>,
}

impl SubprocessWatchDog {
    /// Create a watchdog ticking every `interval`
    pub fn new(interval: Duration) -> Self {
        Self {
            processes: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            ticker: Ticker::new(interval),
            scan_lock: Mutex::new(()),
        }
    }

    /// Register the watchdog in `registry` as an unsupervised unit and start it
    pub fn start(self: &Arc<Self>, registry: &ThreadRegistry) -> Result<UnitHandle, RegistryError> {
        let unit = RestartableUnit::new(
            UnitKey::new(UnitCategory::Watchdog, SUBPROCESS_WATCHDOG),
            UnitBody::Stoppable(Arc::clone(self) as Arc<dyn Stoppable>),
        )
        .unsupervised();

        let handle = registry.register(unit)?;
        handle.start()?;

        tracing::info!(
            interval_ms = self.ticker.interval().as_millis() as u64,
            "Subprocess watchdog started"
        );

        Ok(handle)
    }

    /// Start supervising `child` on behalf of `owner`
    pub fn supervise(
        &self,
        name: impl Into<String>,
        child: Child,
        owner: Weak<dyn ProcessOwner>,
    ) -> ProcessHandle {
        let process = Arc::new(SupervisedProcess {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            owner,
            child: Mutex::new(child),
            last_alive: Mutex::new(Instant::now()),
        });

        tracing::debug!(
            process = %process.name,
            pid = process.child.lock().id(),
            "Supervising process"
        );

        self.processes.lock().push(Arc::clone(&process));
        ProcessHandle { process }
    }

    /// Stop supervising a process; the process itself is left alone
    pub fn release(&self, handle: &ProcessHandle) -> bool {
        self.remove(handle.process.id)
    }

    /// Number of supervised processes
    pub fn len(&self) -> usize {
        self.processes.lock().len()
    }

    /// Whether no process is supervised
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run one liveness check over every supervised process
    pub fn scan(&self) -> ProcessScanReport {
        let _scan = self.scan_lock.lock();
        let mut report = ProcessScanReport::default();

        if self.ticker.is_stopped() {
            return report;
        }

        let processes: Vec<_> = self.processes.lock().clone();
        for process in processes {
            let status = process.child.lock().try_wait();
            let status = match status {
                Ok(None) => {
                    *process.last_alive.lock() = Instant::now();
                    report.alive += 1;
                    continue;
                }
                Ok(Some(status)) => status,
                Err(e) => {
                    tracing::error!(process = %process.name, error = %e, "Failed to poll process");
                    continue;
                }
            };

            tracing::warn!(process = %process.name, %status, "Supervised process exited");

            let Some(owner) = process.owner.upgrade() else {
                tracing::debug!(process = %process.name, "Owner gone, releasing process");
                self.remove(process.id);
                report.released.push(process.name.clone());
                continue;
            };

            match owner.on_process_exit(&process.name, status) {
                ExitDecision::Replace(mut child) => {
                    // Installed under the list lock so a concurrent release
                    // either sees the new child or makes us reap it
                    let processes = self.processes.lock();
                    if processes.iter().any(|p| p.id == process.id) {
                        tracing::info!(
                            process = %process.name,
                            pid = child.id(),
                            "Process replaced by owner"
                        );
                        *process.child.lock() = child;
                        *process.last_alive.lock() = Instant::now();
                        report.replaced.push(process.name.clone());
                    } else {
                        drop(processes);
                        tracing::debug!(
                            process = %process.name,
                            pid = child.id(),
                            "Process released during recovery, killing replacement"
                        );
                        let _ = child.kill();
                        let _ = child.wait();
                        report.released.push(process.name.clone());
                    }
                }
                ExitDecision::Release => {
                    self.remove(process.id);
                    report.released.push(process.name.clone());
                }
            }
        }

        report
    }

    /// Halt future ticks
    ///
    /// Supervised processes keep running; terminating them is the owners' job.
    pub fn stop(&self) {
        let first = self.ticker.stop();
        let _scan = self.scan_lock.lock();
        if first {
            tracing::info!(supervised = self.len(), "Subprocess watchdog stopped");
        }
    }

    /// Whether the watchdog has been stopped
    pub fn is_stopped(&self) -> bool {
        self.ticker.is_stopped()
    }

    fn remove(&self, id: u64) -> bool {
        let mut processes = self.processes.lock();
        let before = processes.len();
        processes.retain(|process| process.id != id);
        processes.len() != before
    }
}

impl Runnable for SubprocessWatchDog {
    fn run(&self) {
        while self.ticker.wait() {
            self.scan();
        }
    }
}

impl Stoppable for SubprocessWatchDog {
    fn stop(&self) {
        SubprocessWatchDog::stop(self);
    }
}
