//! # Chaincode Client
//!
//! Moves chaincode through its lifecycle and invokes it: install, approve, commit,
//! submit and evaluate.
//!
//! ## Architecture Note
//! Every operation shares one algorithm. A proposal signed by the first endorsing node's
//! identity is sent to every endorsing node, and every node must answer with success.
//! One refusal fails the whole operation with that node's status and message, and
//! nothing is sent to the ordering service.
//!
//! Ordered operations (submit, approve, commit) then assemble the endorsed transaction,
//! note the first endorsing node's ledger height, broadcast, and poll forward from that
//! height until a block contains the transaction. The whole wait is bounded by the
//! client's timeout.

use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use prost::Message;
use tracing::{debug, info, instrument};

use crate::framework::{Broadcaster, Endorser};
use crate::protocol::blocks::{newest_block, wait_for_transaction, SeekBehavior};
use crate::protocol::builder::block_number;
use crate::protocol::proposal::{
    endorse, install_package, prepare, response_payload, transaction_envelope, Invocation, LIFECYCLE,
};
use crate::protocol::{PreparedProposal, ProtocolError};
use crate::protos::peer::lifecycle::chaincode_source::{self, Local};
use crate::protos::peer::lifecycle::{
    ApproveChaincodeDefinitionForMyOrgArgs, ChaincodeSource, CommitChaincodeDefinitionArgs,
};
use crate::protos::peer::ProposalResponse;

/// Default bound on waiting for a transaction to commit.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A chaincode definition as approved and committed on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChaincodeDefinition {
    pub sequence: i64,
    pub name: String,
    pub version: String,
    /// The installed package to run; required to approve, ignored by commit.
    pub package_id: Option<String>,
    pub init_required: bool,
}

/// Client for chaincode operations against a set of endorsing nodes and the ordering node.
#[derive(Clone)]
pub struct ChaincodeClient {
    endorsers: Vec<Arc<dyn Endorser>>,
    orderer: Arc<dyn Broadcaster>,
    timeout: Duration,
}

impl std::fmt::Debug for ChaincodeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChaincodeClient")
            .field("endorsers", &self.endorsers.len())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ChaincodeClient {
    pub fn new(endorsers: Vec<Arc<dyn Endorser>>, orderer: Arc<dyn Broadcaster>) -> Self {
        Self {
            endorsers,
            orderer,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn first(&self) -> Result<&dyn Endorser, ProtocolError> {
        self.endorsers
            .first()
            .map(|endorser| endorser.as_ref())
            .ok_or(ProtocolError::NoEndorsers)
    }

    /// Installs `package` on every endorsing node, each signing with its own identity,
    /// and returns the package ID.
    #[instrument(skip_all, fields(endorsers = self.endorsers.len()))]
    pub async fn install(&self, package: &[u8]) -> Result<String, ProtocolError> {
        if self.endorsers.is_empty() {
            return Err(ProtocolError::NoEndorsers);
        }
        let installs = self
            .endorsers
            .iter()
            .map(|endorser| install_package(endorser.as_ref(), package));
        let package_ids = try_join_all(installs).await?;
        let package_id = package_ids.into_iter().next().ok_or(ProtocolError::NoEndorsers)?;
        info!(%package_id, "Chaincode installed");
        Ok(package_id)
    }

    /// Approves `definition` for the endorsing nodes' organization.
    #[instrument(skip(self))]
    pub async fn approve(&self, channel: &str, definition: &ChaincodeDefinition) -> Result<(), ProtocolError> {
        let source = match &definition.package_id {
            Some(package_id) => chaincode_source::Type::LocalPackage(Local {
                package_id: package_id.clone(),
            }),
            None => chaincode_source::Type::Unavailable(chaincode_source::Unavailable {}),
        };
        let args = ApproveChaincodeDefinitionForMyOrgArgs {
            sequence: definition.sequence,
            name: definition.name.clone(),
            version: definition.version.clone(),
            init_required: definition.init_required,
            source: Some(ChaincodeSource { r#type: Some(source) }),
            ..Default::default()
        };
        let invocation =
            Invocation::new(channel, LIFECYCLE, "ApproveChaincodeDefinitionForMyOrg").arg(args.encode_to_vec());
        self.submit_invocation(&invocation).await.map(drop)
    }

    /// Commits `definition` on `channel`.
    #[instrument(skip(self))]
    pub async fn commit(&self, channel: &str, definition: &ChaincodeDefinition) -> Result<(), ProtocolError> {
        let args = CommitChaincodeDefinitionArgs {
            sequence: definition.sequence,
            name: definition.name.clone(),
            version: definition.version.clone(),
            init_required: definition.init_required,
            ..Default::default()
        };
        let invocation = Invocation::new(channel, LIFECYCLE, "CommitChaincodeDefinition").arg(args.encode_to_vec());
        self.submit_invocation(&invocation).await.map(drop)
    }

    /// Invokes `function` and waits for the transaction to commit, returning the
    /// chaincode's result.
    #[instrument(skip(self, args))]
    pub async fn submit(&self, channel: &str, chaincode: &str, function: &str, args: &[&str]) -> Result<Vec<u8>, ProtocolError> {
        let invocation = Invocation::new(channel, chaincode, function).args(args.iter().copied());
        self.submit_invocation(&invocation).await
    }

    /// Invokes `function` without ordering the result.
    #[instrument(skip(self, args))]
    pub async fn evaluate(&self, channel: &str, chaincode: &str, function: &str, args: &[&str]) -> Result<Vec<u8>, ProtocolError> {
        let invocation = Invocation::new(channel, chaincode, function).args(args.iter().copied());
        let (_, responses) = self.execute(&invocation).await?;
        Ok(responses.first().map(response_payload).unwrap_or_default())
    }

    /// Endorses and orders an arbitrary invocation.
    pub async fn submit_invocation(&self, invocation: &Invocation) -> Result<Vec<u8>, ProtocolError> {
        let (prepared, responses) = self.execute(invocation).await?;
        self.order(&prepared, &responses).await?;
        Ok(responses.first().map(response_payload).unwrap_or_default())
    }

    async fn execute(&self, invocation: &Invocation) -> Result<(PreparedProposal, Vec<ProposalResponse>), ProtocolError> {
        let prepared = prepare(self.first()?, invocation)?;
        debug!(tx_id = %prepared.tx_id, function = %invocation.function, "Proposal prepared");
        let endorsers: Vec<&dyn Endorser> = self.endorsers.iter().map(|endorser| endorser.as_ref()).collect();
        let responses = endorse(&endorsers, &prepared).await?;
        Ok((prepared, responses))
    }

    async fn order(&self, prepared: &PreparedProposal, responses: &[ProposalResponse]) -> Result<(), ProtocolError> {
        let first = self.first()?;
        let envelope = transaction_envelope(first, prepared, responses)?;
        let current = newest_block(first, &prepared.channel, SeekBehavior::FailIfNotReady).await?;
        let next = block_number(&current)? + 1;
        self.orderer.broadcast(envelope).await?;
        debug!(tx_id = %prepared.tx_id, next, "Transaction broadcast, waiting for commit");
        let committed = tokio::time::timeout(
            self.timeout,
            wait_for_transaction(first, &prepared.channel, next, prepared.tx_id.as_str()),
        )
        .await
        .map_err(|_| ProtocolError::Timeout(self.timeout, "transaction commit"))??;
        info!(tx_id = %prepared.tx_id, block = committed, "Transaction committed");
        Ok(())
    }
}
