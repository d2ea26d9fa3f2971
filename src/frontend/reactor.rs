//! Single-threaded reactor front end
//!
//! Drives a current-thread tokio runtime on a dedicated `frontend` thread.
//! Scheduled callbacks are run one at a time in FIFO order until the reactor
//! is cancelled.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::FrontEnd;
use crate::bus::{ContextClosed, DeliveryContext, Task};
use crate::error::{Error, Result};

/// Name of the reactor thread
pub const FRONTEND_THREAD: &str = "frontend";

struct ReactorContext {
    sender: mpsc::UnboundedSender<Task>,
    cancel: CancellationToken,
}

impl DeliveryContext for ReactorContext {
    fn schedule(&self, task: Task) -> std::result::Result<(), ContextClosed> {
        if self.cancel.is_cancelled() {
            return Err(ContextClosed);
        }
        self.sender.send(task).map_err(|_| ContextClosed)
    }
}

struct Running {
    thread: JoinHandle<()>,
    exited: Receiver<()>,
}

/// Built-in front end running callbacks on its own thread
pub struct Reactor {
    context: Arc<ReactorContext>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Task>>>,
    running: Mutex<Option<Running>>,
    executed: Arc<AtomicU64>,
}

impl Reactor {
    /// Create a reactor; callbacks scheduled before `start` are queued
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            context: Arc::new(ReactorContext {
                sender,
                cancel: CancellationToken::new(),
            }),
            receiver: Mutex::new(Some(receiver)),
            running: Mutex::new(None),
            executed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of callbacks run so far
    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    /// Token cancelled when the reactor stops
    pub fn cancellation_token(&self) -> CancellationToken {
        self.context.cancel.clone()
    }
}

impl Default for Reactor {
    fn default() -> Self {
        Self::new()
    }
}

impl FrontEnd for Reactor {
    fn start(&self) -> Result<()> {
        let Some(mut receiver) = self.receiver.lock().take() else {
            return Err(Error::FrontEnd("reactor already started".into()));
        };

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let cancel = self.context.cancel.clone();
        let executed = Arc::clone(&self.executed);
        let (exited_tx, exited) = crossbeam_channel::bounded(1);

        let thread = thread::Builder::new()
            .name(FRONTEND_THREAD.into())
            .spawn(move || {
                runtime.block_on(async move {
                    loop {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => break,
                            task = receiver.recv() => match task {
                                Some(task) => {
                                    if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                                        tracing::error!("Front end callback panicked");
                                    }
                                    executed.fetch_add(1, Ordering::Relaxed);
                                }
                                None => break,
                            },
                        }
                    }
                });
                let _ = exited_tx.send(());
            })?;

        *self.running.lock() = Some(Running { thread, exited });

        tracing::info!(thread = FRONTEND_THREAD, "Front end started");
        Ok(())
    }

    fn context(&self) -> Arc<dyn DeliveryContext> {
        self.context.clone()
    }

    fn stop(&self) {
        if !self.context.cancel.is_cancelled() {
            self.context.cancel.cancel();
            tracing::info!("Front end stop requested");
        }
    }

    fn join(&self, timeout: Duration) -> bool {
        let mut running = self.running.lock();
        let Some(state) = running.as_ref() else {
            return true;
        };

        match state.exited.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
            Err(RecvTimeoutError::Timeout) => return false,
        }

        if let Some(state) = running.take() {
            let _ = state.thread.join();
        }
        tracing::info!("Front end stopped");
        true
    }
}
