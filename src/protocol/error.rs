//! Error types for the protocol engine and block retrieval.

use thiserror::Error;

use crate::identity::IdentityError;

/// Errors raised while building, sending or interpreting ledger messages.
///
/// These surface to the caller of the specific operation; they are never globally fatal
/// on their own.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("malformed ledger message: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("{0} is missing from a ledger message")]
    MissingField(&'static str),

    #[error("invalid endpoint {0}")]
    InvalidEndpoint(String),

    #[error("connection failed: {0}")]
    Connect(#[from] tonic::transport::Error),

    #[error("rpc failed: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("timed out after {0:?} waiting for {1}")]
    Timeout(std::time::Duration, &'static str),

    // ----- seek exactness -----
    #[error("no blocks returned by seek info request")]
    NoBlocks,

    #[error("multiple blocks returned by seek info request")]
    MultipleBlocks,

    #[error("expected block {expected}, received block {actual}")]
    UnexpectedBlock { expected: u64, actual: u64 },

    #[error("received filtered block where a full block was requested")]
    FilteredBlock,

    #[error("bad deliver response: status {status}")]
    DeliverStatus { status: i32 },

    #[error("deliver stream closed without a status")]
    StreamClosed,

    // ----- ordering and endorsement -----
    #[error("bad broadcast response: status {status}, info {info}")]
    BroadcastStatus { status: i32, info: String },

    #[error("bad proposal response: status {status}, message {message}")]
    Endorsement { status: i32, message: String },

    #[error("proposal response from endorsing node is missing its {0}")]
    IncompleteResponse(&'static str),

    #[error("no endorsing nodes supplied")]
    NoEndorsers,

    // ----- configuration -----
    #[error("no differences detected between original and updated config")]
    NoDifferences,

    #[error("configuration does not contain {0}")]
    Lookup(String),

    #[error("configuration block must contain exactly one transaction, found {0}")]
    ConfigBlockShape(usize),
}

impl ProtocolError {
    /// Whether a seek that failed this way may succeed if retried shortly after.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProtocolError::DeliverStatus { .. }
                | ProtocolError::NoBlocks
                | ProtocolError::StreamClosed
                | ProtocolError::Timeout(..)
        )
    }
}
