//! Proposals, endorsements and endorsed transactions.
//!
//! A proposal is signed once and sent unchanged to every endorsing node that has to
//! endorse it. Only when every node answers with status 200 are the responses turned
//! into a transaction: the first node's response payload plus every node's endorsement.

use std::collections::BTreeMap;

use futures::future::try_join_all;
use prost::Message;
use tracing::{debug, instrument};

use super::builder::{decode, envelope, header, payload};
use super::{ProtocolError, TransactionId};
use crate::framework::{Endorser, Signer};
use crate::protos::common::{Block, Envelope, Header, HeaderType, Status};
use crate::protos::peer::chaincode_spec::Type as ChaincodeType;
use crate::protos::peer::lifecycle::{InstallChaincodeArgs, InstallChaincodeResult};
use crate::protos::peer::{
    ChaincodeActionPayload, ChaincodeEndorsedAction, ChaincodeHeaderExtension, ChaincodeId,
    ChaincodeInput, ChaincodeInvocationSpec, ChaincodeProposalPayload,
    ChaincodeSpec, ChannelQueryResponse, Proposal, ProposalResponse, SignedProposal, Transaction,
    TransactionAction,
};

/// The configuration system chaincode.
pub const CSCC: &str = "cscc";
/// The chaincode lifecycle system chaincode.
pub const LIFECYCLE: &str = "_lifecycle";

/// A chaincode invocation to propose.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub header_type: HeaderType,
    pub channel: String,
    pub chaincode: String,
    pub function: String,
    pub args: Vec<Vec<u8>>,
    pub transient: BTreeMap<String, Vec<u8>>,
}

impl Invocation {
    /// An endorser transaction invoking `function` of `chaincode` on `channel`.
    pub fn new(channel: &str, chaincode: &str, function: &str) -> Self {
        Self {
            header_type: HeaderType::EndorserTransaction,
            channel: channel.to_string(),
            chaincode: chaincode.to_string(),
            function: function.to_string(),
            args: Vec::new(),
            transient: BTreeMap::new(),
        }
    }

    /// A call into the configuration system chaincode, which is not bound to a channel.
    pub fn system_config(function: &str) -> Self {
        Self {
            header_type: HeaderType::Config,
            ..Self::new("", CSCC, function)
        }
    }

    pub fn arg(mut self, arg: impl Into<Vec<u8>>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Vec<u8>>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn transient(mut self, transient: BTreeMap<String, Vec<u8>>) -> Self {
        self.transient = transient;
        self
    }
}

/// A signed proposal together with the pieces needed to turn its endorsements into a
/// transaction later.
#[derive(Debug, Clone)]
pub struct PreparedProposal {
    pub tx_id: TransactionId,
    pub channel: String,
    pub proposal: Proposal,
    pub signed: SignedProposal,
}

/// Builds and signs a proposal for `invocation`.
pub fn prepare<S: Signer + ?Sized>(signer: &S, invocation: &Invocation) -> Result<PreparedProposal, ProtocolError> {
    let tx_id = TransactionId::new(signer);
    let chaincode_id = ChaincodeId {
        name: invocation.chaincode.clone(),
        ..Default::default()
    };
    let extension = ChaincodeHeaderExtension {
        chaincode_id: Some(chaincode_id.clone()),
    }
    .encode_to_vec();
    let header = header(invocation.header_type, &invocation.channel, &tx_id, extension);

    let mut args = Vec::with_capacity(invocation.args.len() + 1);
    args.push(invocation.function.as_bytes().to_vec());
    args.extend(invocation.args.iter().cloned());
    let spec = ChaincodeInvocationSpec {
        chaincode_spec: Some(ChaincodeSpec {
            r#type: ChaincodeType::Golang as i32,
            chaincode_id: Some(chaincode_id),
            input: Some(ChaincodeInput {
                args,
                ..Default::default()
            }),
            timeout: 0,
        }),
    };
    let proposal_payload = ChaincodeProposalPayload {
        input: spec.encode_to_vec(),
        transient_map: invocation.transient.clone(),
    };
    let proposal = Proposal {
        header: header.encode_to_vec(),
        payload: proposal_payload.encode_to_vec(),
        extension: Vec::new(),
    };
    let proposal_bytes = proposal.encode_to_vec();
    let signature = signer.identity().sign(&[&proposal_bytes])?;
    Ok(PreparedProposal {
        tx_id,
        channel: invocation.channel.clone(),
        proposal,
        signed: SignedProposal {
            proposal_bytes,
            signature,
        },
    })
}

/// Fails unless the endorsing node reported success.
pub fn check_response(response: &ProposalResponse) -> Result<(), ProtocolError> {
    let result = response
        .response
        .as_ref()
        .ok_or(ProtocolError::IncompleteResponse("response"))?;
    if result.status != Status::Success as i32 {
        return Err(ProtocolError::Endorsement {
            status: result.status,
            message: result.message.clone(),
        });
    }
    Ok(())
}

/// The payload returned by the chaincode.
pub fn response_payload(response: &ProposalResponse) -> Vec<u8> {
    response
        .response
        .as_ref()
        .map(|result| result.payload.clone())
        .unwrap_or_default()
}

/// Sends the proposal to every endorser and requires every one of them to succeed.
///
/// Responses come back in endorser order. The first failure (transport error or
/// non-success status) is returned and the rest are discarded.
#[instrument(skip_all, fields(tx_id = %prepared.tx_id, endorsers = endorsers.len()))]
pub async fn endorse(
    endorsers: &[&dyn Endorser],
    prepared: &PreparedProposal,
) -> Result<Vec<ProposalResponse>, ProtocolError> {
    if endorsers.is_empty() {
        return Err(ProtocolError::NoEndorsers);
    }
    let requests = endorsers.iter().map(|endorser| async move {
        let response = endorser.process_proposal(prepared.signed.clone()).await?;
        check_response(&response)?;
        Ok::<_, ProtocolError>(response)
    });
    let responses = try_join_all(requests).await?;
    debug!(count = responses.len(), "Proposal endorsed");
    Ok(responses)
}

/// Assembles the endorsed transaction and signs it as an envelope.
///
/// `signer` must be the identity that created the proposal.
pub fn transaction_envelope<S: Signer + ?Sized>(
    signer: &S,
    prepared: &PreparedProposal,
    responses: &[ProposalResponse],
) -> Result<Envelope, ProtocolError> {
    let first = responses.first().ok_or(ProtocolError::NoEndorsers)?;
    let endorsements = responses
        .iter()
        .map(|response| {
            response
                .endorsement
                .clone()
                .ok_or(ProtocolError::IncompleteResponse("endorsement"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let header: Header = decode(&prepared.proposal.header)?;
    let action_payload = ChaincodeActionPayload {
        chaincode_proposal_payload: prepared.proposal.payload.clone(),
        action: Some(ChaincodeEndorsedAction {
            proposal_response_payload: first.payload.clone(),
            endorsements,
        }),
    };
    let transaction = Transaction {
        actions: vec![TransactionAction {
            header: header.signature_header.clone(),
            payload: action_payload.encode_to_vec(),
        }],
    };
    envelope(&payload(header, &transaction), signer)
}

/// Asks an endorsing node to join the channel whose genesis block is `genesis`.
#[instrument(skip_all)]
pub async fn join_channel(endorser: &dyn Endorser, genesis: &Block) -> Result<(), ProtocolError> {
    let invocation = Invocation::system_config("JoinChain").arg(genesis.encode_to_vec());
    let prepared = prepare(endorser, &invocation)?;
    let response = endorser.process_proposal(prepared.signed).await?;
    check_response(&response)
}

/// Lists the channels an endorsing node has joined.
#[instrument(skip_all)]
pub async fn list_channels(endorser: &dyn Endorser) -> Result<Vec<String>, ProtocolError> {
    let prepared = prepare(endorser, &Invocation::system_config("GetChannels"))?;
    let response = endorser.process_proposal(prepared.signed).await?;
    check_response(&response)?;
    let channels: ChannelQueryResponse = decode(&response_payload(&response))?;
    Ok(channels
        .channels
        .into_iter()
        .map(|channel| channel.channel_id)
        .collect())
}

/// Installs a chaincode package on one endorsing node using that node's own identity.
#[instrument(skip_all, fields(package_bytes = package.len()))]
pub async fn install_package(endorser: &dyn Endorser, package: &[u8]) -> Result<String, ProtocolError> {
    let args = InstallChaincodeArgs {
        chaincode_install_package: package.to_vec(),
    };
    let invocation = Invocation::new("", LIFECYCLE, "InstallChaincode").arg(args.encode_to_vec());
    let prepared = prepare(endorser, &invocation)?;
    let response = endorser.process_proposal(prepared.signed).await?;
    check_response(&response)?;
    let result: InstallChaincodeResult = decode(&response_payload(&response))?;
    debug!(package_id = %result.package_id, "Chaincode installed");
    Ok(result.package_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::SigningIdentity;
    use crate::identity::Identity;
    use crate::protocol::builder::envelope_channel_header;
    use crate::protos::common::{ChannelHeader, Payload, SignatureHeader};
    use crate::protos::peer::{Endorsement, Response};

    fn signer() -> SigningIdentity {
        SigningIdentity::new("Org1MSP", Identity::builder("Org1 Admin").build().unwrap())
    }

    fn response(status: i32, payload: &[u8], endorser: &[u8]) -> ProposalResponse {
        ProposalResponse {
            response: Some(Response {
                status,
                message: format!("status {status}"),
                payload: Vec::new(),
            }),
            payload: payload.to_vec(),
            endorsement: Some(Endorsement {
                endorser: endorser.to_vec(),
                signature: b"sig".to_vec(),
            }),
            ..Default::default()
        }
    }

    /// Proposal carries function and chaincode.
    #[test]
    fn test_proposal_carries_function_and_chaincode() {
        let signer = signer();
        let invocation = Invocation::new("channel1", "asset", "CreateAsset").args(["a1", "blue"]);
        let prepared = prepare(&signer, &invocation).unwrap();

        let header: Header = decode(&prepared.proposal.header).unwrap();
        let channel_header: ChannelHeader = decode(&header.channel_header).unwrap();
        assert_eq!(channel_header.tx_id, prepared.tx_id.as_str());
        assert_eq!(channel_header.channel_id, "channel1");
        let extension: ChaincodeHeaderExtension = decode(&channel_header.extension).unwrap();
        assert_eq!(extension.chaincode_id.unwrap().name, "asset");

        let payload: ChaincodeProposalPayload = decode(&prepared.proposal.payload).unwrap();
        let spec: ChaincodeInvocationSpec = decode(&payload.input).unwrap();
        let input = spec.chaincode_spec.unwrap().input.unwrap();
        assert_eq!(input.args, vec![b"CreateAsset".to_vec(), b"a1".to_vec(), b"blue".to_vec()]);
        assert_eq!(prepared.signed.proposal_bytes, prepared.proposal.encode_to_vec());
    }

    /// System config calls are channel-less.
    #[test]
    fn test_system_config_calls_are_channel_less() {
        let prepared = prepare(&signer(), &Invocation::system_config("GetChannels")).unwrap();
        let header: Header = decode(&prepared.proposal.header).unwrap();
        let channel_header: ChannelHeader = decode(&header.channel_header).unwrap();
        assert_eq!(channel_header.r#type, HeaderType::Config as i32);
        assert!(channel_header.channel_id.is_empty());
    }

    /// A non-success status is reported verbatim.
    #[test]
    fn test_non_success_status_is_reported_verbatim() {
        let result = check_response(&response(500, b"", b"peer0"));
        match result {
            Err(ProtocolError::Endorsement { status, message }) => {
                assert_eq!(status, 500);
                assert_eq!(message, "status 500");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    /// Transaction uses first payload and every endorsement.
    #[test]
    fn test_transaction_uses_first_payload_and_every_endorsement() {
        let signer = signer();
        let prepared = prepare(&signer, &Invocation::new("channel1", "asset", "CreateAsset")).unwrap();
        let responses = [response(200, b"first", b"peer0"), response(200, b"second", b"peer1")];
        let envelope = transaction_envelope(&signer, &prepared, &responses).unwrap();

        let channel_header = envelope_channel_header(&envelope.encode_to_vec()).unwrap();
        assert_eq!(channel_header.tx_id, prepared.tx_id.as_str());
        let payload: Payload = decode(&envelope.payload).unwrap();
        let transaction: Transaction = decode(&payload.data).unwrap();
        let action = &transaction.actions[0];
        let signature_header: SignatureHeader = decode(&action.header).unwrap();
        assert_eq!(signature_header.nonce, prepared.tx_id.nonce());

        let action_payload: ChaincodeActionPayload = decode(&action.payload).unwrap();
        assert_eq!(action_payload.chaincode_proposal_payload, prepared.proposal.payload);
        let endorsed = action_payload.action.unwrap();
        assert_eq!(endorsed.proposal_response_payload, b"first");
        assert_eq!(endorsed.endorsements.len(), 2);
        assert_eq!(endorsed.endorsements[1].endorser, b"peer1");
    }
}
