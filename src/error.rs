//! Error types for nvr-rs

use crate::bus::ContextClosed;
use crate::config::ConfigError;
use crate::db::DatabaseError;
use crate::pipeline::SetupError;
use crate::registry::RegistryError;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-level error
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    ContextClosed(#[from] ContextClosed),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The front end could not be started or run
    #[error("Front end error: {0}")]
    FrontEnd(String),

    /// A message publisher failed to connect or publish
    #[error("Messaging error: {0}")]
    Messaging(String),

    #[error("Orchestrator already started")]
    AlreadyStarted,

    #[error("Shutdown in progress")]
    ShuttingDown,
}
