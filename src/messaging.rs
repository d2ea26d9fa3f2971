//! Messaging collaborator
//!
//! A message publisher forwards events to an external broker. It connects
//! once during startup and then runs its blocking publish loop as a unit in
//! the `messaging` category, so a crashed loop is restarted like any other
//! unit.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::registry::{
    RestartableUnit, Runnable, Stoppable, ThreadRegistry, UnitBody, UnitCategory, UnitHandle,
    UnitKey,
};

/// Registered name of the message publisher unit
pub const MESSAGE_PUBLISHER: &str = "message_publisher";

/// Broker publisher; `run` is the publish loop and `stop` must unblock it
pub trait MessagePublisher: Stoppable {
    /// Connect to the broker; called once before the unit starts
    fn connect(&self) -> Result<()>;
}

/// Connect `publisher`, then register it as the messaging unit and start it
///
/// A publisher that fails to connect is never registered.
pub fn start_publisher(
    publisher: Arc<dyn MessagePublisher>,
    registry: &ThreadRegistry,
) -> Result<UnitHandle> {
    publisher
        .connect()
        .map_err(|e| Error::Messaging(format!("connect failed: {e}")))?;

    let body: Arc<dyn Stoppable> = Arc::new(PublisherBody(publisher));
    let unit = RestartableUnit::new(
        UnitKey::new(UnitCategory::Messaging, MESSAGE_PUBLISHER),
        UnitBody::Stoppable(body),
    );

    let handle = registry.register(unit)?;
    handle.start()?;
    Ok(handle)
}

struct PublisherBody(Arc<dyn MessagePublisher>);

impl Runnable for PublisherBody {
    fn run(&self) {
        self.0.run();
    }
}

impl Stoppable for PublisherBody {
    fn stop(&self) {
        self.0.stop();
    }
}
