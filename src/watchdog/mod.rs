//! Thread and subprocess watchdogs
//!
//! Two independent supervisors, each running as an unsupervised unit in the
//! `watchdog` category:
//!
//! - [`ThreadWatchDog`] restarts registered units whose execution ended
//!   without a stop request.
//! - [`SubprocessWatchDog`] detects exited child processes and hands them
//!   back to their owning pipeline's recovery hook.
//!
//! Both must be stopped before any pipeline is asked to stop, otherwise a
//! unit being torn down could be restarted.

pub mod config;
pub mod subprocess;
pub mod thread;

pub use config::WatchdogConfig;
pub use subprocess::{
    ExitDecision, ProcessHandle, ProcessOwner, ProcessScanReport, SubprocessWatchDog,
    SUBPROCESS_WATCHDOG,
};
pub use thread::{ScanReport, ThreadWatchDog, THREAD_WATCHDOG};
