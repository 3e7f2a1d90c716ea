//! Connections to ledger nodes and the chaincode client built on them.
//!
//! [`OrdererConnection`] and [`PeerConnection`] implement the capabilities in
//! [`crate::framework`] over gRPC; [`ChaincodeClient`] works with any implementation of
//! those capabilities.

pub mod chaincode;
pub mod grpc;
pub mod orderer;
pub mod peer;

pub use chaincode::{ChaincodeClient, ChaincodeDefinition};
pub use orderer::OrdererConnection;
pub use peer::PeerConnection;
