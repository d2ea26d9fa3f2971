//! Delivery context abstraction
//!
//! A delivery context is a single-threaded execution context (the front end)
//! that runs scheduled callbacks one at a time, in the order they were
//! scheduled.

/// Unit of work scheduled on a delivery context
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// The delivery context no longer accepts work
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Delivery context is closed")]
pub struct ContextClosed;

/// Execution context that EventBus deliveries are marshalled onto
pub trait DeliveryContext: Send + Sync {
    /// Queue `task` to run on the context
    ///
    /// Must not block and must preserve scheduling order.
    fn schedule(&self, task: Task) -> Result<(), ContextClosed>;
}
