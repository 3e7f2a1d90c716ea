//! Administrative connection to an endorsing node.

use async_trait::async_trait;
use tonic::transport::Channel;
use tracing::instrument;
use url::Url;

use super::grpc::{self, PEER_DELIVER, PEER_PROCESS_PROPOSAL};
use crate::framework::{BlockHandler, Deliverer, Endorser, Signer};
use crate::identity::Identity;
use crate::protocol::{proposal, ProtocolError};
use crate::protos::common::{Block, Envelope, Status};
use crate::protos::peer::deliver_response::Type;
use crate::protos::peer::{DeliverResponse, ProposalResponse, SignedProposal};

/// A gRPC connection to an endorsing node, acting as its organization's admin.
#[derive(Clone)]
pub struct PeerConnection {
    url: Url,
    channel: Channel,
    msp_id: String,
    identity: Identity,
}

impl std::fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnection")
            .field("url", &self.url.as_str())
            .field("msp_id", &self.msp_id)
            .finish_non_exhaustive()
    }
}

impl PeerConnection {
    /// Opens a lazy connection to `url` (`grpc://` or `grpcs://`).
    pub fn connect(url: &Url, tls_ca: Option<&str>, msp_id: &str, identity: Identity) -> Result<Self, ProtocolError> {
        Ok(Self {
            url: url.clone(),
            channel: grpc::connect(url, tls_ca)?,
            msp_id: msp_id.to_string(),
            identity,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Joins the channel whose genesis block is `genesis`.
    pub async fn join_channel(&self, genesis: &Block) -> Result<(), ProtocolError> {
        proposal::join_channel(self, genesis).await
    }

    /// The channels this node has joined.
    pub async fn list_channels(&self) -> Result<Vec<String>, ProtocolError> {
        proposal::list_channels(self).await
    }

    /// Installs a chaincode package and returns its package ID.
    pub async fn install_chaincode(&self, package: &[u8]) -> Result<String, ProtocolError> {
        proposal::install_package(self, package).await
    }
}

impl Signer for PeerConnection {
    fn msp_id(&self) -> &str {
        &self.msp_id
    }

    fn identity(&self) -> &Identity {
        &self.identity
    }
}

#[async_trait]
impl Deliverer for PeerConnection {
    #[instrument(skip_all, fields(url = %self.url))]
    async fn deliver(&self, envelope: Envelope, on_block: &mut BlockHandler<'_>) -> Result<(), ProtocolError> {
        grpc::bounded(async {
            let mut stream =
                grpc::open_stream::<Envelope, DeliverResponse>(&self.channel, PEER_DELIVER, envelope).await?;
            loop {
                let Some(response) = stream.message().await? else {
                    return Err(ProtocolError::StreamClosed);
                };
                match response.r#type {
                    Some(Type::Block(block)) => on_block(block)?,
                    Some(Type::FilteredBlock(_)) => return Err(ProtocolError::FilteredBlock),
                    Some(Type::Status(status)) if status == Status::Success as i32 => return Ok(()),
                    Some(Type::Status(status)) => return Err(ProtocolError::DeliverStatus { status }),
                    None => return Err(ProtocolError::MissingField("deliver response type")),
                }
            }
        })
        .await
    }
}

#[async_trait]
impl Endorser for PeerConnection {
    #[instrument(skip_all, fields(url = %self.url))]
    async fn process_proposal(&self, proposal: SignedProposal) -> Result<ProposalResponse, ProtocolError> {
        grpc::unary(&self.channel, PEER_PROCESS_PROPOSAL, proposal).await
    }
}
