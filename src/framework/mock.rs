//! # Mock Ledger
//!
//! A scriptable stand-in for ordering and endorsing nodes, for testing the protocol
//! engine and the chaincode client without running any ledger processes.
//!
//! Each capability has its own queue of expectations, consumed in order:
//!
//! ```ignore
//! let peer = MockLedger::new("Org1MSP", admin);
//! peer.expect_proposal().return_status(200);
//! peer.expect_deliver().return_blocks(vec![block(5, &[])]);
//! peer.expect_deliver().return_status(404);
//!
//! // ... drive the code under test with `&peer` ...
//!
//! peer.verify(); // every expectation was used
//! ```
//!
//! A submission's transaction ID is random, so a commit block cannot be scripted up
//! front. `expect_deliver().return_committed(n, &orderer)` builds block `n` from the
//! envelopes `orderer` has been sent by the time the seek arrives.
//!
//! Every request the mock serves is recorded and can be inspected afterwards with
//! [`MockLedger::seeks`], [`MockLedger::broadcasts`] and [`MockLedger::proposals`].
//! A request with no matching expectation panics, failing the test.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use prost::Message;

use super::{BlockHandler, Broadcaster, Deliverer, Endorser, Signer};
use crate::identity::Identity;
use crate::protocol::builder::envelope_channel_header;
use crate::protocol::ProtocolError;
use crate::protos::common::{
    Block, BlockData, BlockHeader, BlockMetadata, BlockMetadataIndex, ChannelHeader, Envelope,
    Header, LastConfig, Metadata, Payload,
};
use crate::protos::orderer::SeekInfo;
use crate::protos::peer::{Endorsement, ProposalResponse, Response, SignedProposal};

// =============================================================================
// EXPECTATIONS
// =============================================================================

enum Blocks {
    Fixed(Vec<Block>),
    /// Built when the seek arrives, from whatever the ordering mock has been sent by then.
    Committed { number: u64, orderer: Shared },
}

impl Blocks {
    fn resolve(self) -> Vec<Block> {
        match self {
            Blocks::Fixed(blocks) => blocks,
            Blocks::Committed { number, orderer } => {
                let tx_ids: Vec<String> = lock(&orderer)
                    .seen_broadcasts
                    .iter()
                    .filter_map(|envelope| envelope_channel_header(&envelope.encode_to_vec()).ok())
                    .map(|header| header.tx_id)
                    .collect();
                let tx_ids: Vec<&str> = tx_ids.iter().map(String::as_str).collect();
                vec![block(number, &tx_ids)]
            }
        }
    }
}

struct DeliverOutcome {
    blocks: Blocks,
    result: Result<(), ProtocolError>,
}

#[derive(Default)]
struct Script {
    deliveries: VecDeque<DeliverOutcome>,
    broadcasts: VecDeque<Result<(), ProtocolError>>,
    proposals: VecDeque<Result<ProposalResponse, ProtocolError>>,
    seen_seeks: Vec<Envelope>,
    seen_broadcasts: Vec<Envelope>,
    seen_proposals: Vec<SignedProposal>,
}

type Shared = Arc<Mutex<Script>>;

fn lock(script: &Shared) -> MutexGuard<'_, Script> {
    script.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A fake ledger node implementing every capability.
#[derive(Clone)]
pub struct MockLedger {
    msp_id: String,
    identity: Identity,
    script: Shared,
}

impl MockLedger {
    pub fn new(msp_id: impl Into<String>, identity: Identity) -> Self {
        Self {
            msp_id: msp_id.into(),
            identity,
            script: Arc::default(),
        }
    }

    /// Expects a `deliver` call.
    pub fn expect_deliver(&self) -> DeliverExpectationBuilder {
        DeliverExpectationBuilder {
            script: self.script.clone(),
        }
    }

    /// Expects a `broadcast` call.
    pub fn expect_broadcast(&self) -> BroadcastExpectationBuilder {
        BroadcastExpectationBuilder {
            script: self.script.clone(),
        }
    }

    /// Expects a `process_proposal` call.
    pub fn expect_proposal(&self) -> ProposalExpectationBuilder {
        ProposalExpectationBuilder {
            script: self.script.clone(),
        }
    }

    /// Seek envelopes received, in order.
    pub fn seeks(&self) -> Vec<Envelope> {
        lock(&self.script).seen_seeks.clone()
    }

    /// The seek info of every seek received, in order.
    pub fn seek_infos(&self) -> Vec<SeekInfo> {
        self.seeks()
            .iter()
            .filter_map(|envelope| Payload::decode(envelope.payload.as_slice()).ok())
            .filter_map(|payload| SeekInfo::decode(payload.data.as_slice()).ok())
            .collect()
    }

    /// Envelopes broadcast, in order.
    pub fn broadcasts(&self) -> Vec<Envelope> {
        lock(&self.script).seen_broadcasts.clone()
    }

    /// Signed proposals received, in order.
    pub fn proposals(&self) -> Vec<SignedProposal> {
        lock(&self.script).seen_proposals.clone()
    }

    /// Panics unless every expectation was consumed.
    pub fn verify(&self) {
        let script = lock(&self.script);
        let remaining = script.deliveries.len() + script.broadcasts.len() + script.proposals.len();
        if remaining > 0 {
            panic!(
                "Not all expectations were met. {} remaining ({} deliver, {} broadcast, {} proposal)",
                remaining,
                script.deliveries.len(),
                script.broadcasts.len(),
                script.proposals.len()
            );
        }
    }
}

impl Signer for MockLedger {
    fn msp_id(&self) -> &str {
        &self.msp_id
    }

    fn identity(&self) -> &Identity {
        &self.identity
    }
}

#[async_trait]
impl Deliverer for MockLedger {
    async fn deliver(&self, envelope: Envelope, on_block: &mut BlockHandler<'_>) -> Result<(), ProtocolError> {
        let outcome = {
            let mut script = lock(&self.script);
            script.seen_seeks.push(envelope);
            script.deliveries.pop_front()
        };
        let Some(outcome) = outcome else {
            panic!("Unexpected deliver request");
        };
        for block in outcome.blocks.resolve() {
            on_block(block)?;
        }
        outcome.result
    }
}

#[async_trait]
impl Broadcaster for MockLedger {
    async fn broadcast(&self, envelope: Envelope) -> Result<(), ProtocolError> {
        let mut script = lock(&self.script);
        script.seen_broadcasts.push(envelope);
        match script.broadcasts.pop_front() {
            Some(result) => result,
            None => panic!("Unexpected broadcast request"),
        }
    }
}

#[async_trait]
impl Endorser for MockLedger {
    async fn process_proposal(&self, proposal: SignedProposal) -> Result<ProposalResponse, ProtocolError> {
        let mut script = lock(&self.script);
        script.seen_proposals.push(proposal);
        match script.proposals.pop_front() {
            Some(result) => result,
            None => panic!("Unexpected proposal request"),
        }
    }
}

// =============================================================================
// EXPECTATION BUILDERS
// =============================================================================

/// Builder for `deliver` expectations.
pub struct DeliverExpectationBuilder {
    script: Shared,
}

impl DeliverExpectationBuilder {
    /// Streams `blocks`, then ends successfully.
    pub fn return_blocks(self, blocks: Vec<Block>) {
        self.push(Blocks::Fixed(blocks), Ok(()));
    }

    /// Streams block `number` holding every transaction broadcast to `orderer` before
    /// this seek arrived.
    pub fn return_committed(self, number: u64, orderer: &MockLedger) {
        let orderer = orderer.script.clone();
        self.push(Blocks::Committed { number, orderer }, Ok(()));
    }

    /// Ends the stream with a non-success delivery status and no blocks.
    pub fn return_status(self, status: i32) {
        self.push(Blocks::Fixed(Vec::new()), Err(ProtocolError::DeliverStatus { status }));
    }

    pub fn return_err(self, error: ProtocolError) {
        self.push(Blocks::Fixed(Vec::new()), Err(error));
    }

    fn push(self, blocks: Blocks, result: Result<(), ProtocolError>) {
        lock(&self.script)
            .deliveries
            .push_back(DeliverOutcome { blocks, result });
    }
}

/// Builder for `broadcast` expectations.
pub struct BroadcastExpectationBuilder {
    script: Shared,
}

impl BroadcastExpectationBuilder {
    pub fn return_ok(self) {
        lock(&self.script).broadcasts.push_back(Ok(()));
    }

    pub fn return_err(self, error: ProtocolError) {
        lock(&self.script).broadcasts.push_back(Err(error));
    }
}

/// Builder for `process_proposal` expectations.
pub struct ProposalExpectationBuilder {
    script: Shared,
}

impl ProposalExpectationBuilder {
    /// Answers with `status` and an empty payload, endorsed by this mock.
    pub fn return_status(self, status: i32) {
        self.return_response(response(status, Vec::new()));
    }

    /// Answers with status 200 and `payload` as the chaincode's return value.
    pub fn return_payload(self, payload: Vec<u8>) {
        self.return_response(response(200, payload));
    }

    pub fn return_response(self, response: ProposalResponse) {
        lock(&self.script).proposals.push_back(Ok(response));
    }

    pub fn return_err(self, error: ProtocolError) {
        lock(&self.script).proposals.push_back(Err(error));
    }
}

fn response(status: i32, payload: Vec<u8>) -> ProposalResponse {
    ProposalResponse {
        version: 1,
        timestamp: None,
        response: Some(Response {
            status,
            message: if status == 200 { String::new() } else { format!("mock status {status}") },
            payload,
        }),
        payload: b"proposal response payload".to_vec(),
        endorsement: Some(Endorsement {
            endorser: b"mock endorser".to_vec(),
            signature: b"mock signature".to_vec(),
        }),
    }
}

// =============================================================================
// BLOCK FIXTURES
// =============================================================================

/// A block numbered `number` holding one envelope per transaction ID.
pub fn block(number: u64, tx_ids: &[&str]) -> Block {
    let data = tx_ids
        .iter()
        .map(|tx_id| {
            let channel_header = ChannelHeader {
                tx_id: tx_id.to_string(),
                ..Default::default()
            };
            let payload = Payload {
                header: Some(Header {
                    channel_header: channel_header.encode_to_vec(),
                    signature_header: Vec::new(),
                }),
                data: Vec::new(),
            };
            Envelope {
                payload: payload.encode_to_vec(),
                signature: Vec::new(),
            }
            .encode_to_vec()
        })
        .collect();
    Block {
        header: Some(BlockHeader {
            number,
            previous_hash: Vec::new(),
            data_hash: Vec::new(),
        }),
        data: Some(BlockData { data }),
        metadata: Some(BlockMetadata {
            metadata: vec![Vec::new(); 5],
        }),
    }
}

/// Records `index` as the last configuration block in `block`'s metadata.
pub fn with_last_config(mut block: Block, index: u64) -> Block {
    let metadata = Metadata {
        value: LastConfig { index }.encode_to_vec(),
        signatures: Vec::new(),
    };
    if let Some(slots) = block.metadata.as_mut() {
        if let Some(slot) = slots.metadata.get_mut(BlockMetadataIndex::LastConfig as usize) {
            *slot = metadata.encode_to_vec();
        }
    }
    block
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock() -> MockLedger {
        MockLedger::new("Org1MSP", Identity::builder("Org1 Admin").build().unwrap())
    }

    /// Serves expectations in order.
    #[tokio::test]
    async fn test_serves_expectations_in_order() {
        let ledger = mock();
        ledger.expect_deliver().return_blocks(vec![block(3, &["tx1"])]);
        ledger.expect_deliver().return_status(404);

        let mut received = Vec::new();
        ledger
            .deliver(Envelope::default(), &mut |block: Block| -> Result<(), ProtocolError> {
                received.push(block);
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(received.len(), 1);

        let result = ledger
            .deliver(Envelope::default(), &mut |_: Block| -> Result<(), ProtocolError> { Ok(()) })
            .await;
        assert!(matches!(result, Err(ProtocolError::DeliverStatus { status: 404 })));
        assert_eq!(ledger.seeks().len(), 2);
        ledger.verify();
    }

    #[tokio::test]
    #[should_panic(expected = "Not all expectations were met")]
    async fn verify_fails_with_unused_expectations() {
        let ledger = mock();
        ledger.expect_broadcast().return_ok();
        ledger.verify();
    }
}
