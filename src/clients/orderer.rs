//! Administrative connection to the ordering node.

use async_trait::async_trait;
use tonic::transport::Channel;
use tracing::{debug, instrument};
use url::Url;

use super::grpc::{self, ORDERER_BROADCAST, ORDERER_DELIVER};
use crate::framework::{BlockHandler, Broadcaster, Deliverer, Signer};
use crate::identity::Identity;
use crate::protocol::ProtocolError;
use crate::protos::common::{Envelope, Status};
use crate::protos::orderer::deliver_response::Type;
use crate::protos::orderer::{BroadcastResponse, DeliverResponse};

/// A gRPC connection to the ordering node, acting as one organization's admin.
#[derive(Clone)]
pub struct OrdererConnection {
    url: Url,
    channel: Channel,
    msp_id: String,
    identity: Identity,
}

impl std::fmt::Debug for OrdererConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrdererConnection")
            .field("url", &self.url.as_str())
            .field("msp_id", &self.msp_id)
            .finish_non_exhaustive()
    }
}

impl OrdererConnection {
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
}

impl Signer for OrdererConnection {
    fn msp_id(&self) -> &str {
        &self.msp_id
    }

    fn identity(&self) -> &Identity {
        &self.identity
    }
}

#[async_trait]
impl Deliverer for OrdererConnection {
    #[instrument(skip_all, fields(url = %self.url))]
    async fn deliver(&self, envelope: Envelope, on_block: &mut BlockHandler<'_>) -> Result<(), ProtocolError> {
        grpc::bounded(async {
            let mut stream =
                grpc::open_stream::<Envelope, DeliverResponse>(&self.channel, ORDERER_DELIVER, envelope).await?;
            loop {
                let Some(response) = stream.message().await? else {
                    return Err(ProtocolError::StreamClosed);
                };
                match response.r#type {
                    Some(Type::Block(block)) => on_block(block)?,
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
impl Broadcaster for OrdererConnection {
    #[instrument(skip_all, fields(url = %self.url))]
    async fn broadcast(&self, envelope: Envelope) -> Result<(), ProtocolError> {
        let mut stream =
            grpc::open_stream::<Envelope, BroadcastResponse>(&self.channel, ORDERER_BROADCAST, envelope).await?;
        let response = stream.message().await?.ok_or(ProtocolError::StreamClosed)?;
        debug!(?response, "Broadcast acknowledged");
        if response.status != Status::Success as i32 {
            return Err(ProtocolError::BroadcastStatus {
                status: response.status,
                info: response.info,
            });
        }
        Ok(())
    }
}
