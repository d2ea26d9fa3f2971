//! Restartable unit and lifecycle types
//!
//! A unit wraps a body (something [`Runnable`], optionally [`Stoppable`]),
//! its identity and its lifecycle state. Every execution of the body runs on
//! a dedicated thread; the unit records how that execution ended so the
//! watchdog can tell a crash from a requested stop.
//!
//! # Lifecycle
//!
//! ```text
//! Created ──start──► Running ──request_stop──► Stopping ──return──► Stopped
//!                      │  ▲                                            │
//!                      │  └──────────── watchdog restart ──────────────┤
//!                      │                (no stop requested)            │
//!                      ├──return (crash)──────────────────────────────►┘
//!                      └──request_stop (no stop fn)──► Abandoned
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::error::RegistryError;
use super::key::UnitKey;

/// Body of a unit that can be run on its own thread
pub trait Runnable: Send + Sync + 'static {
    /// Run the unit's work. Returning (or panicking) ends the execution.
    fn run(&self);
}

/// Body of a unit that can be asked to stop cooperatively
pub trait Stoppable: Runnable {
    /// Ask a running [`Runnable::run`] to return.
    ///
    /// Called from a thread other than the unit's own.
    fn stop(&self);
}

/// The work a unit executes, branched on whether it can be stopped
#[derive(Clone)]
pub enum UnitBody {
    /// Body without a stop function; abandoned at shutdown
    Runnable(Arc<dyn Runnable>),
    /// Body with a cooperative stop function; joined at shutdown
    Stoppable(Arc<dyn Stoppable>),
}

impl UnitBody {
    /// Wrap a plain closure as a non-stoppable body
    pub fn from_fn<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        UnitBody::Runnable(Arc::new(FnRunnable(run)))
    }

    /// Wrap a pair of closures as a stoppable body
    pub fn from_fns<F, S>(run: F, stop: S) -> Self
    where
        F: Fn() + Send + Sync + 'static,
        S: Fn() + Send + Sync + 'static,
    {
        UnitBody::Stoppable(Arc::new(FnStoppable { run, stop }))
    }

    /// Whether the body has a cooperative stop function
    pub fn is_stoppable(&self) -> bool {
        matches!(self, UnitBody::Stoppable(_))
    }

    fn run(&self) {
        match self {
            UnitBody::Runnable(body) => body.run(),
            UnitBody::Stoppable(body) => body.run(),
        }
    }
}

struct FnRunnable<F>(F);

impl<F> Runnable for FnRunnable<F>
where
    F: Fn() + Send + Sync + 'static,
{
    fn run(&self) {
        (self.0)()
    }
}

struct FnStoppable<F, S> {
    run: F,
    stop: S,
}

impl<F, S> Runnable for FnStoppable<F, S>
where
    F: Fn() + Send + Sync + 'static,
    S: Fn() + Send + Sync + 'static,
{
    fn run(&self) {
        (self.run)()
    }
}

impl<F, S> Stoppable for FnStoppable<F, S>
where
    F: Fn() + Send + Sync + 'static,
    S: Fn() + Send + Sync + 'static,
{
    fn stop(&self) {
        (self.stop)()
    }
}

/// Lifecycle state of a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitState {
    /// Registered, never started
    Created,
    /// An execution is in flight
    Running,
    /// Stop requested, execution still in flight
    Stopping,
    /// No execution in flight
    Stopped,
    /// Stop requested on a unit without a stop function; never joined
    Abandoned,
}

/// How the most recent execution ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// The body returned
    Returned,
    /// The body panicked
    Panicked,
}

/// Point-in-time view of a unit
#[derive(Debug, Clone)]
pub struct UnitSnapshot {
    /// Unit identity
    pub key: UnitKey,
    /// Current state
    pub state: UnitState,
    /// Number of executions started so far
    pub generation: u64,
    /// Number of watchdog restarts
    pub restarts: u64,
    /// Whether a stop was requested since the last explicit start
    pub stop_requested: bool,
    /// Whether an execution is currently in flight
    pub alive: bool,
    /// How the most recent execution ended
    pub last_exit: Option<ExitKind>,
    /// Time since the last state transition
    pub since_transition: Duration,
}

struct Lifecycle {
    state: UnitState,
    stop_requested: bool,
    generation: u64,
    restarts: u64,
    alive: bool,
    last_exit: Option<ExitKind>,
    last_transition: Instant,
    thread: Option<JoinHandle<()>>,
}

/// A managed execution unit
///
/// State transitions happen under a single lock, so a stop request racing
/// with the body's own return is always observed consistently by the
/// watchdog.
pub struct RestartableUnit {
    key: UnitKey,
    body: UnitBody,
    supervised: bool,
    lifecycle: Mutex<Lifecycle>,
    exited: Condvar,
}

impl RestartableUnit {
    /// Create a new unit in the `Created` state
    pub fn new(key: UnitKey, body: UnitBody) -> Self {
        Self {
            key,
            body,
            supervised: true,
            lifecycle: Mutex::new(Lifecycle {
                state: UnitState::Created,
                stop_requested: false,
                generation: 0,
                restarts: 0,
                alive: false,
                last_exit: None,
                last_transition: Instant::now(),
                thread: None,
            }),
            exited: Condvar::new(),
        }
    }

    /// Exclude this unit from watchdog restarts
    pub fn unsupervised(mut self) -> Self {
        self.supervised = false;
        self
    }

    /// Get the unit key
    pub fn key(&self) -> &UnitKey {
        &self.key
    }

    /// Whether the watchdog may restart this unit
    pub fn is_supervised(&self) -> bool {
        self.supervised
    }

    /// Whether the unit has a cooperative stop function
    pub fn is_stoppable(&self) -> bool {
        self.body.is_stoppable()
    }

    /// Get the current state
    pub fn state(&self) -> UnitState {
        self.lifecycle.lock().state
    }

    /// Get a snapshot of the unit's lifecycle
    pub fn snapshot(&self) -> UnitSnapshot {
        let lifecycle = self.lifecycle.lock();
        UnitSnapshot {
            key: self.key.clone(),
            state: lifecycle.state,
            generation: lifecycle.generation,
            restarts: lifecycle.restarts,
            stop_requested: lifecycle.stop_requested,
            alive: lifecycle.alive,
            last_exit: lifecycle.last_exit,
            since_transition: lifecycle.last_transition.elapsed(),
        }
    }

    /// Start an execution unless one is already in flight
    ///
    /// Returns `Ok(true)` if a new execution was launched.
    pub(crate) fn start(self: &Arc<Self>) -> Result<bool, RegistryError> {
        let mut lifecycle = self.lifecycle.lock();

        match lifecycle.state {
            UnitState::Created | UnitState::Stopped => {}
            UnitState::Running | UnitState::Stopping => return Ok(false),
            UnitState::Abandoned => {
                tracing::debug!(unit = %self.key, "Not starting abandoned unit");
                return Ok(false);
            }
        }

        lifecycle.stop_requested = false;
        self.launch(&mut lifecycle)?;

        tracing::debug!(
            unit = %self.key,
            generation = lifecycle.generation,
            "Unit started"
        );

        Ok(true)
    }

    /// Start a new execution if the last one ended without a stop request
    ///
    /// The check and the launch happen under the same lock as
    /// [`request_stop`](Self::request_stop), so a unit that is being stopped
    /// is never resurrected.
    pub(crate) fn restart_if_crashed(self: &Arc<Self>) -> Result<bool, RegistryError> {
        let mut lifecycle = self.lifecycle.lock();

        if !self.supervised
            || lifecycle.state != UnitState::Stopped
            || lifecycle.stop_requested
            || lifecycle.last_exit.is_none()
        {
            return Ok(false);
        }

        self.launch(&mut lifecycle)?;
        lifecycle.restarts += 1;

        tracing::warn!(
            unit = %self.key,
            generation = lifecycle.generation,
            restarts = lifecycle.restarts,
            "Restarted unit after unexpected exit"
        );

        Ok(true)
    }

    /// Request the unit to stop
    ///
    /// Stoppable units get their stop function called (outside the lock) and
    /// move to `Stopping`; non-stoppable running units are marked `Abandoned`.
    /// Returns the state after the request.
    pub(crate) fn request_stop(&self) -> UnitState {
        let mut lifecycle = self.lifecycle.lock();
        let already_requested = lifecycle.stop_requested;
        lifecycle.stop_requested = true;

        if lifecycle.state != UnitState::Running {
            return lifecycle.state;
        }

        match &self.body {
            UnitBody::Stoppable(body) => {
                let body = Arc::clone(body);
                lifecycle.state = UnitState::Stopping;
                lifecycle.last_transition = Instant::now();
                drop(lifecycle);

                if !already_requested {
                    tracing::debug!(unit = %self.key, "Stop requested");
                }
                body.stop();
                UnitState::Stopping
            }
            UnitBody::Runnable(_) => {
                lifecycle.state = UnitState::Abandoned;
                lifecycle.last_transition = Instant::now();

                tracing::warn!(
                    unit = %self.key,
                    "Unit has no stop function, abandoning it"
                );
                UnitState::Abandoned
            }
        }
    }

    /// Wait for the in-flight execution to return
    ///
    /// Returns `true` if no execution is in flight when this returns.
    /// Abandoned units are never waited on.
    pub(crate) fn join(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut lifecycle = self.lifecycle.lock();

        if lifecycle.state == UnitState::Abandoned {
            return !lifecycle.alive;
        }

        while lifecycle.alive {
            if self.exited.wait_until(&mut lifecycle, deadline).timed_out() {
                return !lifecycle.alive;
            }
        }

        let thread = lifecycle.thread.take();
        drop(lifecycle);

        // The thread has already reported its exit; this only reaps it.
        if let Some(thread) = thread {
            let _ = thread.join();
        }

        true
    }

    fn launch(self: &Arc<Self>, lifecycle: &mut Lifecycle) -> Result<(), RegistryError> {
        let generation = lifecycle.generation + 1;
        let unit = Arc::clone(self);

        let thread = thread::Builder::new()
            .name(self.key.name.clone())
            .spawn(move || unit.execute(generation))
            .map_err(|source| RegistryError::Spawn {
                key: self.key.clone(),
                source,
            })?;

        lifecycle.generation = generation;
        lifecycle.state = UnitState::Running;
        lifecycle.alive = true;
        lifecycle.last_transition = Instant::now();
        // A previous execution's thread has already reported its exit
        lifecycle.thread = Some(thread);

        Ok(())
    }

    fn execute(&self, generation: u64) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.body.run()));
        let exit = match outcome {
            Ok(()) => ExitKind::Returned,
            Err(_) => ExitKind::Panicked,
        };
        self.on_exit(generation, exit);
    }

    fn on_exit(&self, generation: u64, exit: ExitKind) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.generation != generation {
            return;
        }

        lifecycle.alive = false;
        lifecycle.last_exit = Some(exit);
        lifecycle.last_transition = Instant::now();
        if lifecycle.state != UnitState::Abandoned {
            lifecycle.state = UnitState::Stopped;
        }
        let stop_requested = lifecycle.stop_requested;
        drop(lifecycle);

        self.exited.notify_all();

        match (stop_requested, exit) {
            (true, _) => tracing::info!(unit = %self.key, generation, "Unit stopped"),
            (false, ExitKind::Returned) => tracing::warn!(
                unit = %self.key,
                generation,
                "Unit exited without a stop request"
            ),
            (false, ExitKind::Panicked) => {
                tracing::error!(unit = %self.key, generation, "Unit panicked")
            }
        }
    }
}

impl std::fmt::Debug for RestartableUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lifecycle = self.lifecycle.lock();
        f.debug_struct("RestartableUnit")
            .field("key", &self.key)
            .field("state", &lifecycle.state)
            .field("generation", &lifecycle.generation)
            .field("supervised", &self.supervised)
            .finish()
    }
}

/// Reference to a registered unit
///
/// Handles are cheap to clone; the registry holds the authoritative catalog.
#[derive(Debug, Clone)]
pub struct UnitHandle(Arc<RestartableUnit>);

impl UnitHandle {
    pub(super) fn new(unit: Arc<RestartableUnit>) -> Self {
        Self(unit)
    }

    /// Get the unit key
    pub fn key(&self) -> &UnitKey {
        self.0.key()
    }

    /// Get the current state
    pub fn state(&self) -> UnitState {
        self.0.state()
    }

    /// Get a snapshot of the unit's lifecycle
    pub fn snapshot(&self) -> UnitSnapshot {
        self.0.snapshot()
    }

    /// Whether the unit has a cooperative stop function
    pub fn is_stoppable(&self) -> bool {
        self.0.is_stoppable()
    }

    /// Whether the watchdog may restart this unit
    pub fn is_supervised(&self) -> bool {
        self.0.is_supervised()
    }

    /// Start the unit on a dedicated thread; no-op if already running
    pub fn start(&self) -> Result<bool, RegistryError> {
        self.0.start()
    }

    /// Request the unit to stop; see [`RestartableUnit`] lifecycle
    pub fn request_stop(&self) -> UnitState {
        self.0.request_stop()
    }

    /// Wait up to `timeout` for the unit's execution to return
    pub fn join(&self, timeout: Duration) -> bool {
        self.0.join(timeout)
    }

    pub(crate) fn restart_if_crashed(&self) -> Result<bool, RegistryError> {
        self.0.restart_if_crashed()
    }

    /// Whether two handles refer to the same unit
    pub fn ptr_eq(&self, other: &UnitHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::test_support::{wait_until, Worker};

    fn handle(unit: RestartableUnit) -> UnitHandle {
        UnitHandle::new(Arc::new(unit))
    }

    #[test]
    fn test_start_runs_on_dedicated_thread() {
        let seen = Arc::new(Mutex::new(None));
        let seen_in_unit = Arc::clone(&seen);
        let unit = handle(RestartableUnit::new(
            UnitKey::camera("porch"),
            UnitBody::from_fn(move || {
                *seen_in_unit.lock() = thread::current().name().map(str::to_owned);
            }),
        ));

        assert!(unit.start().unwrap());
        assert!(unit.join(Duration::from_secs(5)));
        assert_eq!(seen.lock().as_deref(), Some("porch"));
    }

    #[test]
    fn test_start_is_idempotent_while_running() {
        let worker = Worker::new();
        let unit = handle(RestartableUnit::new(UnitKey::camera("a"), worker.body()));

        assert!(unit.start().unwrap());
        assert!(!unit.start().unwrap());
        assert_eq!(unit.snapshot().generation, 1);
        assert!(wait_until(Duration::from_secs(5), || worker.runs() == 1));

        unit.request_stop();
        assert!(unit.join(Duration::from_secs(5)));
    }

    #[test]
    fn test_natural_return_is_restartable() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let unit = handle(RestartableUnit::new(
            UnitKey::camera("a"),
            UnitBody::from_fn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        ));

        unit.start().unwrap();
        assert!(unit.join(Duration::from_secs(5)));

        let snapshot = unit.snapshot();
        assert_eq!(snapshot.state, UnitState::Stopped);
        assert_eq!(snapshot.last_exit, Some(ExitKind::Returned));
        assert!(!snapshot.stop_requested);

        assert!(unit.restart_if_crashed().unwrap());
        assert!(unit.join(Duration::from_secs(5)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let snapshot = unit.snapshot();
        assert_eq!(snapshot.generation, 2);
        assert_eq!(snapshot.restarts, 1);
    }

    #[test]
    fn test_panic_counts_as_crash() {
        let unit = handle(RestartableUnit::new(
            UnitKey::camera("a"),
            UnitBody::from_fn(|| panic!("decoder exploded")),
        ));

        unit.start().unwrap();
        assert!(unit.join(Duration::from_secs(5)));

        let snapshot = unit.snapshot();
        assert_eq!(snapshot.state, UnitState::Stopped);
        assert_eq!(snapshot.last_exit, Some(ExitKind::Panicked));
        assert!(unit.restart_if_crashed().unwrap());
        assert!(unit.join(Duration::from_secs(5)));
    }

    #[test]
    fn test_requested_stop_is_not_restarted() {
        let worker = Worker::new();
        let unit = handle(RestartableUnit::new(UnitKey::camera("a"), worker.body()));

        unit.start().unwrap();
        assert_eq!(unit.request_stop(), UnitState::Stopping);
        assert!(unit.join(Duration::from_secs(5)));

        assert_eq!(unit.state(), UnitState::Stopped);
        assert!(!unit.restart_if_crashed().unwrap());
        assert_eq!(worker.stops(), 1);
    }

    #[test]
    fn test_stop_racing_natural_return_never_resurrects() {
        for _ in 0..50 {
            let unit = handle(RestartableUnit::new(
                UnitKey::camera("racer"),
                UnitBody::from_fns(|| {}, || {}),
            ));

            unit.start().unwrap();
            unit.request_stop();
            assert!(unit.join(Duration::from_secs(5)));

            assert!(!unit.restart_if_crashed().unwrap());
            assert_eq!(unit.snapshot().generation, 1);
        }
    }

    #[test]
    fn test_request_stop_without_stop_fn_abandons() {
        let release = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&release);
        let unit = handle(RestartableUnit::new(
            UnitKey::camera("legacy"),
            UnitBody::from_fn(move || {
                while !flag.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(5));
                }
            }),
        ));

        unit.start().unwrap();
        assert_eq!(unit.request_stop(), UnitState::Abandoned);

        // Abandoned units are not waited on
        let started = Instant::now();
        assert!(!unit.join(Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(1));

        release.store(true, Ordering::SeqCst);
        assert!(wait_until(Duration::from_secs(5), || !unit.snapshot().alive));
        assert_eq!(unit.state(), UnitState::Abandoned);
        assert!(!unit.restart_if_crashed().unwrap());
    }

    #[test]
    fn test_join_times_out_on_uncooperative_unit() {
        let release = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&release);
        let unit = handle(RestartableUnit::new(
            UnitKey::camera("stubborn"),
            UnitBody::from_fns(
                move || {
                    while !flag.load(Ordering::SeqCst) {
                        thread::sleep(Duration::from_millis(5));
                    }
                },
                || {},
            ),
        ));

        unit.start().unwrap();
        unit.request_stop();
        assert!(!unit.join(Duration::from_millis(50)));
        assert_eq!(unit.state(), UnitState::Stopping);

        release.store(true, Ordering::SeqCst);
        assert!(unit.join(Duration::from_secs(5)));
        assert_eq!(unit.state(), UnitState::Stopped);
    }

    #[test]
    fn test_unsupervised_unit_is_not_restarted() {
        let unit = handle(
            RestartableUnit::new(UnitKey::camera("a"), UnitBody::from_fn(|| {})).unsupervised(),
        );

        unit.start().unwrap();
        assert!(unit.join(Duration::from_secs(5)));
        assert!(!unit.restart_if_crashed().unwrap());
    }

    #[test]
    fn test_explicit_start_after_stop() {
        let worker = Worker::new();
        let unit = handle(RestartableUnit::new(UnitKey::camera("a"), worker.body()));

        unit.start().unwrap();
        unit.request_stop();
        assert!(unit.join(Duration::from_secs(5)));

        worker.reset();
        assert!(unit.start().unwrap());
        assert!(!unit.snapshot().stop_requested);
        unit.request_stop();
        assert!(unit.join(Duration::from_secs(5)));
        assert_eq!(unit.snapshot().generation, 2);
    }
}
