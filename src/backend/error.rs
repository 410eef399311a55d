use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during backend operations.
///
/// Cloneable so one failure can be delivered to every caller waiting on the
/// same backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The backend did not pass its health check in time.
    #[error("Backend for '{logdir}' did not become ready within {timeout:?}")]
    StartTimeout { logdir: String, timeout: Duration },

    /// The backend process exited after it was ready.
    #[error("Backend for '{logdir}' exited unexpectedly")]
    Crashed { logdir: String },

    /// The process could not be started, or died before becoming healthy.
    #[error("Failed to launch backend for '{logdir}': {reason}")]
    LaunchFailed { logdir: String, reason: String },

    /// Every port in the configured range is taken.
    #[error("No free backend port in range {start}-{end}")]
    PortExhausted { start: u16, end: u32 },

    #[error("Router is shutting down")]
    ShuttingDown,

    #[error("Failed to stop backend for '{logdir}': {reason}")]
    TerminateFailed { logdir: String, reason: String },
}
