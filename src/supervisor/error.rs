//! Error types for the process supervisor.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while starting, watching or stopping a supervised process.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The executable could not be launched.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The process exited before it became ready.
    #[error("{name} exited before becoming ready ({status})")]
    ExitedEarly { name: String, status: String },

    /// The readiness probe never succeeded within the timeout; the process was killed.
    #[error("timeout whilst waiting for {name} to start after {timeout:?}")]
    NotReady { name: String, timeout: Duration },

    #[error("I/O error supervising {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// The supervising task is gone.
    #[error("supervisor for {0} is no longer running")]
    Closed(String),
}
