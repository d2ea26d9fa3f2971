//! Front end collaborator
//!
//! The front end owns the single-threaded execution context that event bus
//! callbacks are delivered into. The orchestrator starts it before any
//! pipeline and stops it last.

use std::sync::Arc;
use std::time::Duration;

use crate::bus::DeliveryContext;
use crate::error::Result;

pub mod reactor;

pub use reactor::{Reactor, FRONTEND_THREAD};

/// Single-threaded network/API surface
pub trait FrontEnd: Send + Sync {
    /// Start the front end's execution context
    fn start(&self) -> Result<()>;

    /// Context that schedules callbacks onto the front end
    fn context(&self) -> Arc<dyn DeliveryContext>;

    /// Ask the front end to stop
    fn stop(&self);

    /// Wait for the front end to stop; `true` if it stopped in time
    fn join(&self, timeout: Duration) -> bool;
}
