//! Interruptible fixed-interval ticker
//!
//! Periodic units (the watchdogs and the janitor) block on a [`Ticker`]
//! between runs. Stopping the ticker wakes the waiting thread immediately,
//! so a stop never has to wait out a full interval.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Fixed-interval ticker that can be stopped from another thread
#[derive(Debug)]
pub struct Ticker {
    interval: Duration,
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl Ticker {
    /// Create a ticker firing every `interval`
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            stopped: Mutex::new(false),
            wake: Condvar::new(),
        }
    }

    /// Tick interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Block for one interval
    ///
    /// Returns `false` if the ticker was stopped before or during the wait.
    pub fn wait(&self) -> bool {
        let deadline = Instant::now() + self.interval;
        let mut stopped = self.stopped.lock();
        while !*stopped {
            if self.wake.wait_until(&mut stopped, deadline).timed_out() {
                return !*stopped;
            }
        }
        false
    }

    /// Stop the ticker and wake any waiter
    ///
    /// Returns `true` for the call that actually stopped it.
    pub fn stop(&self) -> bool {
        let first = !std::mem::replace(&mut *self.stopped.lock(), true);
        self.wake.notify_all();
        first
    }

    /// Whether the ticker has been stopped
    pub fn is_stopped(&self) -> bool {
        *self.stopped.lock()
    }
}
