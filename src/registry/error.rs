//! Registry error types
//!
//! Error types for thread registry operations.

use super::key::UnitKey;

/// Error type for registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A unit with the same category and name is already registered
    #[error("Unit already registered: {0}")]
    DuplicateUnit(UnitKey),
    /// The operating system refused to spawn the unit's thread
    #[error("Failed to spawn thread for {key}: {source}")]
    Spawn {
        /// Unit that could not be started
        key: UnitKey,
        /// Underlying spawn error
        #[source]
        source: std::io::Error,
    },
}
