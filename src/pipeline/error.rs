//! Setup error types

/// Error raised while building a capability or a camera pipeline
///
/// Setup errors are local: the affected camera or post-processor is logged
/// and skipped, everything else keeps starting.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// The camera's stream could not be probed
    #[error("Failed to probe camera {camera}: {reason}")]
    Probe {
        /// Camera name
        camera: String,
        /// What went wrong
        reason: String,
    },
    /// An external program could not be started
    #[error("Failed to spawn {program} for camera {camera}: {source}")]
    Spawn {
        /// Camera name
        camera: String,
        /// Program that failed to start
        program: String,
        /// Underlying spawn error
        #[source]
        source: std::io::Error,
    },
    /// A post-processor could not be loaded
    #[error("Failed to load post processor {kind}: {reason}")]
    PostProcessor {
        /// Post-processor type name
        kind: String,
        /// What went wrong
        reason: String,
    },
    /// The detector could not be loaded
    #[error("Failed to load detector: {0}")]
    Detector(String),
}
