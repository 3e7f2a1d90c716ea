//! # Ledger Capabilities
//!
//! The narrow interfaces the protocol engine needs from a connection to a ledger node.
//!
//! ## Architecture Note
//! An administrative connection to the ordering node and one to an endorsing node both
//! stream blocks, but they speak different RPCs and decode different responses. Rather
//! than one connection type with a mode flag, each connection kind implements the
//! capabilities it actually has:
//!
//! | Capability      | Ordering node | Endorsing node |
//! |-----------------|:-------------:|:--------------:|
//! | [`Signer`]      | yes           | yes            |
//! | [`Deliverer`]   | yes           | yes            |
//! | [`Broadcaster`] | yes           |                |
//! | [`Endorser`]    |               | yes            |
//!
//! Protocol functions take `&dyn Deliverer` (and so on), which is also what lets the
//! mock ledger stand in for real nodes.

use async_trait::async_trait;

use crate::identity::Identity;
use crate::protocol::ProtocolError;
use crate::protos::common::{Block, Envelope};
use crate::protos::peer::{ProposalResponse, SignedProposal};

/// Called once per delivered block. Returning an error ends the stream with that error.
pub type BlockHandler<'a> = dyn FnMut(Block) -> Result<(), ProtocolError> + Send + 'a;

/// Anything that signs on behalf of an MSP.
pub trait Signer: Send + Sync {
    fn msp_id(&self) -> &str;
    fn identity(&self) -> &Identity;
}

/// Anything that can stream blocks for a seek request.
#[async_trait]
pub trait Deliverer: Signer {
    /// Sends a signed seek envelope and calls `on_block` for every block received.
    ///
    /// Implementations fail on a non-success delivery status and bound the stream's
    /// total duration.
    async fn deliver(&self, envelope: Envelope, on_block: &mut BlockHandler<'_>) -> Result<(), ProtocolError>;
}

/// Anything that accepts transactions for ordering.
#[async_trait]
pub trait Broadcaster: Signer {
    /// Submits an envelope and waits for the ordering service to acknowledge it.
    async fn broadcast(&self, envelope: Envelope) -> Result<(), ProtocolError>;
}

/// Anything that endorses proposals.
#[async_trait]
pub trait Endorser: Deliverer {
    async fn process_proposal(&self, proposal: SignedProposal) -> Result<ProposalResponse, ProtocolError>;
}

/// A bare MSP ID and identity pair, for signing without a connection.
#[derive(Debug, Clone)]
pub struct SigningIdentity {
    msp_id: String,
    identity: Identity,
}

impl SigningIdentity {
    pub fn new(msp_id: impl Into<String>, identity: Identity) -> Self {
        Self {
            msp_id: msp_id.into(),
            identity,
        }
    }
}

impl Signer for SigningIdentity {
    fn msp_id(&self) -> &str {
        &self.msp_id
    }

    fn identity(&self) -> &Identity {
        &self.identity
    }
}
