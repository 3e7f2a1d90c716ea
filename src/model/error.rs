//! Error types for configuration loading and validation.

use thiserror::Error;

/// A configuration problem, always detected before any process is started.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("port {port} is out of range, must be between 1 and 65535")]
    InvalidPort { port: u32 },

    #[error("cannot specify port {port}, must be outside port range {start}-{end}")]
    PortInPool { port: u32, start: u16, end: u16 },

    #[error("failed to allocate port, port range {start}-{end} exceeded")]
    PortsExhausted { start: u16, end: u16 },

    #[error("invalid timeout {value:?}: {source}")]
    Timeout {
        value: String,
        #[source]
        source: humantime::DurationError,
    },

    #[error("organization names must not be empty")]
    EmptyOrganizationName,

    #[error("organization {name:?} produces MSP ID {msp_id} which is already in use")]
    DuplicateMspId { name: String, msp_id: String },

    #[error("channel names must not be empty")]
    EmptyChannelName,

    #[error("channel {channel} has no endorsing organizations")]
    NoChannelOrganizations { channel: String },

    #[error("channel {channel} references unknown endorsing organization {organization}")]
    UnknownOrganization { channel: String, organization: String },

    #[error("TLS certificate, private key and CA must all be supplied together")]
    IncompleteTls,

    #[error("TLS material supplied but TLS is not enabled")]
    TlsNotEnabled,

    #[error("invalid TLS {field}, must be file or base64 encoded PEM: {reason}")]
    TlsMaterial { field: &'static str, reason: String },

    #[error("{variable} is not valid unicode")]
    NotUnicode { variable: &'static str },

    #[error("cannot determine home directory: {0}")]
    Home(#[source] std::io::Error),
}
