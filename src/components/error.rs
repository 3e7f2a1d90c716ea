//! Error types for component materialization and start-up.

use std::path::PathBuf;

use thiserror::Error;

use crate::identity::IdentityError;
use crate::protocol::ProtocolError;
use crate::supervisor::SupervisorError;

#[derive(Debug, Error)]
pub enum ComponentError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} not defined")]
    MissingEnv(&'static str),

    #[error("core.yaml missing {0} section")]
    MissingSection(&'static str),

    #[error("invalid core.yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to enroll using certificate authority: {0}")]
    Enroll(String),

    #[error("timeout whilst waiting for {0} to start")]
    Timeout(&'static str),

    #[error("failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

impl ComponentError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| ComponentError::Io { path, source }
    }
}
