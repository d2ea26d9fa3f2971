//! Cross-thread publish/subscribe
//!
//! The event bus lets camera pipelines running on their own threads hand
//! data to the single-threaded front end without blocking either side.
//!
//! # Architecture
//!
//! ```text
//!   [pipeline thread] ──publish──┐
//!   [pipeline thread] ──publish──┼──► per-subscriber inbox (bounded)
//!   [pipeline thread] ──publish──┘            │
//!                                             │ schedule drain (once)
//!                                             ▼
//!                               [delivery context: front end thread]
//!                                   callback(item), in publish order
//! ```
//!
//! Publishers never run subscriber code. A full inbox applies the configured
//! [`OverflowPolicy`] instead of blocking.

pub mod config;
pub mod context;
pub mod event;
pub mod event_bus;
pub mod subscriber;
pub mod topic;

pub use config::{BusConfig, OverflowPolicy};
pub use context::{ContextClosed, DeliveryContext, Task};
pub use event::{BusEvent, CameraStatus, FrameEvent};
pub use event_bus::{EventBus, Subscription};
pub use subscriber::SubscriberStats;
