//! The ledger components a network is made of.
//!
//! ## Architecture Note
//! A component knows how to lay itself out on disk, which command line and environment
//! its server binary needs, and what "ready" means for it. Running the process is left
//! to [`crate::supervisor`]; deciding when and in what order to start components is left
//! to [`crate::lifecycle`].

pub mod ca;
pub mod couchdb;
pub mod endpoint;
pub mod error;
pub mod msp;
pub mod orderer;
pub mod peer;

pub use ca::CaNode;
pub use couchdb::{CouchDb, CouchDbProxy, COUCHDB_URL};
pub use endpoint::{grpc_scheme, http_scheme, Endpoint};
pub use error::ComponentError;
pub use msp::{write_msp_directory, write_tls_directory, TlsFiles};
pub use orderer::OrdererNode;
pub use peer::{PeerEndpoints, PeerNode};
