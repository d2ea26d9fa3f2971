//! Shared helpers for unit tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::bus::{ContextClosed, DeliveryContext, Task};
use crate::registry::UnitBody;

/// Poll `predicate` until it holds or `timeout` elapses
pub(crate) fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

#[derive(Default)]
struct WorkerState {
    stop: AtomicBool,
    crash: AtomicBool,
    runs: AtomicUsize,
    stops: AtomicUsize,
}

/// Cooperative test body that loops until stopped or told to crash
#[derive(Clone, Default)]
pub(crate) struct Worker {
    state: Arc<WorkerState>,
}

impl Worker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Stoppable unit body driving this worker
    pub(crate) fn body(&self) -> UnitBody {
        let run_state = Arc::clone(&self.state);
        let stop_state = Arc::clone(&self.state);
        UnitBody::from_fns(
            move || {
                run_state.runs.fetch_add(1, Ordering::SeqCst);
                loop {
                    if run_state.stop.load(Ordering::SeqCst) {
                        return;
                    }
                    if run_state.crash.swap(false, Ordering::SeqCst) {
                        return;
                    }
                    thread::sleep(Duration::from_millis(2));
                }
            },
            move || {
                stop_state.stops.fetch_add(1, Ordering::SeqCst);
                stop_state.stop.store(true, Ordering::SeqCst);
            },
        )
    }

    /// Make the current execution return without a stop request
    pub(crate) fn crash(&self) {
        self.state.crash.store(true, Ordering::SeqCst);
    }

    /// Clear the stop flag so the body can run again
    pub(crate) fn reset(&self) {
        self.state.stop.store(false, Ordering::SeqCst);
    }

    pub(crate) fn runs(&self) -> usize {
        self.state.runs.load(Ordering::SeqCst)
    }

    pub(crate) fn stops(&self) -> usize {
        self.state.stops.load(Ordering::SeqCst)
    }
}

/// Delivery context that queues tasks until the test runs them
#[derive(Default)]
pub(crate) struct ManualContext {
    tasks: Mutex<VecDeque<Task>>,
    closed: AtomicBool,
}

impl ManualContext {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Run queued tasks, including ones scheduled while running
    pub(crate) fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let task = self.tasks.lock().pop_front();
            match task {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    pub(crate) fn pending(&self) -> usize {
        self.tasks.lock().len()
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl DeliveryContext for ManualContext {
    fn schedule(&self, task: Task) -> Result<(), ContextClosed> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ContextClosed);
        }
        self.tasks.lock().push_back(task);
        Ok(())
    }
}
