//! Top-level lifecycle controller
//!
//! Startup, in order:
//!
//! ```text
//!   watchdogs ─► front end ─► event bus ─► janitor (+ sweep) ─► messaging
//!       ─► detector / post-processors ─► camera setup (concurrent) ─► start cameras
//! ```
//!
//! Shutdown runs once, whichever of SIGINT, SIGTERM or
//! [`Orchestrator::request_shutdown`] comes first:
//!
//! ```text
//!   stop watchdogs ─► stop + join cameras ─► stop messaging, janitor ─► stop front end
//! ```

pub mod lifecycle;
pub mod shutdown;
pub mod signals;

pub use lifecycle::{Orchestrator, OrchestratorBuilder, StartupReport};
pub use shutdown::{ShutdownCoordinator, ShutdownReport};
pub use signals::{wait_for_shutdown_signal, ShutdownReason};
