//! Error type for the network orchestrator.

use std::path::PathBuf;

use thiserror::Error;

use crate::components::ComponentError;
use crate::console::ConsoleError;
use crate::identity::IdentityError;
use crate::model::ConfigError;
use crate::protocol::ProtocolError;
use crate::supervisor::SupervisorError;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Component(#[from] ComponentError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Console(#[from] ConsoleError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid state file {path}: {source}")]
    State {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("task failed: {0}")]
    Task(String),

    /// A failure while bringing the network up, tagged with the stage it happened in.
    #[error("{stage}: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: Box<NetworkError>,
    },
}

impl NetworkError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| NetworkError::Io { path, source }
    }

    /// The stage a start-up failure happened in, if known.
    pub fn stage(&self) -> Option<&'static str> {
        match self {
            NetworkError::Stage { stage, .. } => Some(stage),
            _ => None,
        }
    }
}

/// Tags an error with the orchestrator stage it came from.
pub(crate) trait StageExt<T> {
    fn stage(self, stage: &'static str) -> Result<T, NetworkError>;
}

impl<T, E: Into<NetworkError>> StageExt<T> for Result<T, E> {
    fn stage(self, stage: &'static str) -> Result<T, NetworkError> {
        self.map_err(|e| match e.into() {
            staged @ NetworkError::Stage { .. } => staged,
            other => NetworkError::Stage {
                stage,
                source: Box::new(other),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Stage is named in message.
    #[test]
    fn test_stage_is_named_in_message() {
        let result: Result<(), ConfigError> = Err(ConfigError::PortsExhausted { start: 2000, end: 3000 });
        let error = result.stage("allocating ports").unwrap_err();
        assert_eq!(error.stage(), Some("allocating ports"));
        assert_eq!(
            error.to_string(),
            "allocating ports: failed to allocate port, port range 2000-3000 exceeded"
        );
    }

    /// Innermost stage wins.
    #[test]
    fn test_innermost_stage_wins() {
        let inner: Result<(), NetworkError> = Err(NetworkError::Task("boom".to_string())).stage("starting peers");
        let error = inner.stage("starting components").unwrap_err();
        assert_eq!(error.stage(), Some("starting peers"));
    }
}
