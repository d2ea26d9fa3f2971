//! Thread registry for supervised units
//!
//! The registry is the single catalog of managed execution units. Each unit
//! runs its body on a dedicated thread and records how every execution ended,
//! which is what the thread watchdog reads to decide on restarts.
//!
//! # Architecture
//!
//! ```text
//!                        Arc<ThreadRegistry>
//!                   ┌──────────────────────────────┐
//!                   │ units: HashMap<Category,     │
//!                   │   Vec<UnitHandle> (ordered)> │
//!                   └──────────────┬───────────────┘
//!                                  │ snapshot
//!        ┌─────────────────────────┼─────────────────────────┐
//!        ▼                         ▼                         ▼
//!   [Orchestrator]          [ThreadWatchDog]            [Shutdown]
//!   register/start          restart_if_crashed          request_stop/join
//! ```
//!
//! No lock is held while a caller iterates a snapshot, and no lock is held
//! while a unit's body or stop function runs.

pub mod error;
pub mod key;
pub mod store;
pub mod unit;

pub use error::RegistryError;
pub use key::{UnitCategory, UnitKey};
pub use store::{RegistryStats, ThreadRegistry};
pub use unit::{
    ExitKind, RestartableUnit, Runnable, Stoppable, UnitBody, UnitHandle, UnitSnapshot, UnitState,
};
