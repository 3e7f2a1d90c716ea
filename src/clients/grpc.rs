//! Shared gRPC plumbing: lazily connected channels and hand-wired unary and streaming
//! calls over the prost codec.

use std::time::Duration;

use prost::Message;
use tonic::client::Grpc;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};
use tonic::{Request, Streaming};
use url::Url;

use crate::protocol::ProtocolError;

/// Upper bound on a single deliver stream.
pub const DELIVER_TIMEOUT: Duration = Duration::from_secs(30);

const PROBE_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on a unary call, and on the response head of a streaming one.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) const ORDERER_BROADCAST: &str = "/orderer.AtomicBroadcast/Broadcast";
pub(crate) const ORDERER_DELIVER: &str = "/orderer.AtomicBroadcast/Deliver";
pub(crate) const PEER_DELIVER: &str = "/protos.Deliver/Deliver";
pub(crate) const PEER_PROCESS_PROPOSAL: &str = "/protos.Endorser/ProcessProposal";

fn endpoint(url: &Url, tls_ca: Option<&str>) -> Result<Endpoint, ProtocolError> {
    let host = url
        .host_str()
        .ok_or_else(|| ProtocolError::InvalidEndpoint(url.to_string()))?;
    let port = url
        .port()
        .ok_or_else(|| ProtocolError::InvalidEndpoint(url.to_string()))?;
    let endpoint = match (url.scheme(), tls_ca) {
        ("grpc", _) => Endpoint::from_shared(format!("http://{host}:{port}"))?,
        ("grpcs", Some(ca)) => {
            let tls = ClientTlsConfig::new()
                .ca_certificate(Certificate::from_pem(ca))
                .domain_name(host);
            Endpoint::from_shared(format!("https://{host}:{port}"))?.tls_config(tls)?
        }
        _ => return Err(ProtocolError::InvalidEndpoint(url.to_string())),
    };
    Ok(endpoint.connect_timeout(CONNECT_TIMEOUT).timeout(REQUEST_TIMEOUT))
}

/// Creates a lazily connected channel to a `grpc://` or `grpcs://` URL.
///
/// `grpcs` requires `tls_ca`, the PEM certificate the server's certificate chains to.
pub fn connect(url: &Url, tls_ca: Option<&str>) -> Result<Channel, ProtocolError> {
    Ok(endpoint(url, tls_ca)?.connect_lazy())
}

/// Whether a connection to `url` can be established right now.
pub async fn reachable(url: &Url, tls_ca: Option<&str>) -> bool {
    match endpoint(url, tls_ca) {
        Ok(endpoint) => endpoint.connect_timeout(PROBE_CONNECT_TIMEOUT).connect().await.is_ok(),
        Err(_) => false,
    }
}

async fn ready(grpc: &mut Grpc<Channel>) -> Result<(), ProtocolError> {
    grpc.ready()
        .await
        .map_err(|e| tonic::Status::unknown(format!("Service was not ready: {e}")).into())
}

/// Sends a single request message on a bidirectional stream and returns the response stream.
pub(crate) async fn open_stream<Req, Resp>(
    channel: &Channel,
    path: &'static str,
    request: Req,
) -> Result<Streaming<Resp>, ProtocolError>
where
    Req: Message + Send + Sync + 'static,
    Resp: Message + Default + Send + Sync + 'static,
{
    let mut grpc = Grpc::new(channel.clone());
    ready(&mut grpc).await?;
    let codec: ProstCodec<Req, Resp> = ProstCodec::default();
    let request = Request::new(tokio_stream::iter(vec![request]));
    let response = grpc
        .streaming(request, PathAndQuery::from_static(path), codec)
        .await?;
    Ok(response.into_inner())
}

pub(crate) async fn unary<Req, Resp>(channel: &Channel, path: &'static str, request: Req) -> Result<Resp, ProtocolError>
where
    Req: Message + Send + Sync + 'static,
    Resp: Message + Default + Send + Sync + 'static,
{
    let mut grpc = Grpc::new(channel.clone());
    ready(&mut grpc).await?;
    let codec: ProstCodec<Req, Resp> = ProstCodec::default();
    let response = grpc
        .unary(Request::new(request), PathAndQuery::from_static(path), codec)
        .await?;
    Ok(response.into_inner())
}

/// Runs a deliver stream to completion within [`DELIVER_TIMEOUT`].
pub(crate) async fn bounded<F, T>(stream: F) -> Result<T, ProtocolError>
where
    F: std::future::Future<Output = Result<T, ProtocolError>>,
{
    tokio::time::timeout(DELIVER_TIMEOUT, stream)
        .await
        .map_err(|_| ProtocolError::Timeout(DELIVER_TIMEOUT, "deliver stream"))?
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Plain gRPC URL connects lazily.
    #[tokio::test]
    async fn test_plain_grpc_url_connects_lazily() {
        let url = Url::parse("grpc://localhost:2001").unwrap();
        assert!(connect(&url, None).is_ok());
    }

    /// TLS URL without CA is rejected.
    #[tokio::test]
    async fn test_tls_url_without_ca_is_rejected() {
        let url = Url::parse("grpcs://localhost:2001").unwrap();
        assert!(matches!(connect(&url, None), Err(ProtocolError::InvalidEndpoint(_))));
    }

    /// Other schemes are rejected.
    #[tokio::test]
    async fn test_other_schemes_are_rejected() {
        let url = Url::parse("http://localhost:2001").unwrap();
        assert!(matches!(connect(&url, None), Err(ProtocolError::InvalidEndpoint(_))));
    }
}
