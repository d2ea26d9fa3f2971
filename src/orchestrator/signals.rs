//! OS termination signals

/// Why the system is shutting down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    CtrlC,
    Term,
    Internal,
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ShutdownReason::CtrlC => "Interrupt signal received",
            ShutdownReason::Term => "Terminate signal received",
            ShutdownReason::Internal => "Shutdown requested internally",
        })
    }
}

/// Complete when the process receives SIGINT or SIGTERM (Ctrl-C elsewhere)
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<ShutdownReason> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => Ok(ShutdownReason::CtrlC),
        _ = sigterm.recv() => Ok(ShutdownReason::Term),
    }
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<ShutdownReason> {
    tokio::signal::ctrl_c().await?;
    Ok(ShutdownReason::CtrlC)
}
