use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("failed to bind console port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid console URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("{frontend} is already running")]
    AlreadyRunning { frontend: String },

    #[error("{frontend} stopped abnormally: {reason}")]
    Stopped { frontend: String, reason: String },
}
