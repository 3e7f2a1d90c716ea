//! Capabilities shared by every ledger connection, and a mock ledger for tests.
//!
//! # Main Components
//!
//! - [`Signer`], [`Deliverer`], [`Broadcaster`], [`Endorser`] - what a connection can do
//! - [`SigningIdentity`] - an MSP ID and identity with no connection attached
//!
//! # Testing
//!
//! See the [`mock`] module for a scriptable fake ledger node.

mod capability;
pub mod mock;

pub use capability::{BlockHandler, Broadcaster, Deliverer, Endorser, Signer, SigningIdentity};
