//! nvr-rs: supervised multi-camera NVR pipelines
//!
//! Every long-running piece of work (camera pipelines, the watchdogs
//! themselves, the retention janitor, the message publisher) runs as a unit
//! in a shared [`ThreadRegistry`]. Two watchdogs keep it alive:
//!
//! - [`ThreadWatchDog`] restarts units whose execution ended without a stop
//!   request.
//! - [`SubprocessWatchDog`] notices exited decoder processes and hands them
//!   back to the pipeline that owns them.
//!
//! Pipelines publish frames and detections on an [`EventBus`] whose
//! callbacks run on the single-threaded front end, never on the publisher's
//! thread.
//!
//! # Example
//!
//! ```no_run
//! use nvr_rs::{NvrConfig, Orchestrator};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = NvrConfig::load("/config/config.json")?;
//!     let orchestrator = Orchestrator::builder(config).build();
//!     let reason = orchestrator.run_until_signal()?;
//!     println!("{reason}");
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod config;
pub mod db;
pub mod error;
pub mod frontend;
pub mod janitor;
pub mod messaging;
pub mod orchestrator;
pub mod pipeline;
pub mod registry;
pub mod ticker;
pub mod watchdog;

#[cfg(test)]
pub(crate) mod test_support;

pub use bus::{BusConfig, BusEvent, EventBus, OverflowPolicy, Subscription};
pub use config::{CameraConfig, NvrConfig};
pub use error::{Error, Result};
pub use janitor::{RecordingJanitor, SweepReport};
pub use orchestrator::{Orchestrator, ShutdownReason, ShutdownReport, StartupReport};
pub use registry::{
    RestartableUnit, Runnable, Stoppable, ThreadRegistry, UnitBody, UnitCategory, UnitHandle,
    UnitKey, UnitState,
};
pub use watchdog::{SubprocessWatchDog, ThreadWatchDog};
