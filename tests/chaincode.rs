use std::sync::Arc;
use std::time::Duration;

use microfab::clients::{ChaincodeClient, ChaincodeDefinition};
use microfab::framework::mock::{block, MockLedger};
use microfab::framework::{Broadcaster, Endorser};
use microfab::model::Organization;
use microfab::protocol::ProtocolError;
use microfab::protos::peer::lifecycle::InstallChaincodeResult;
use prost::Message;

struct Network {
    org1: MockLedger,
    org2: MockLedger,
    orderer: MockLedger,
}

impl Network {
    fn new() -> Self {
        let org1 = Organization::new("Org1", None).expect("Org1");
        let org2 = Organization::new("Org2", None).expect("Org2");
        let orderer = Organization::new("Orderer", None).expect("Orderer");
        Self {
            org1: MockLedger::new(org1.msp_id(), org1.admin().clone()),
            org2: MockLedger::new(org2.msp_id(), org2.admin().clone()),
            orderer: MockLedger::new(orderer.msp_id(), orderer.admin().clone()),
        }
    }

    fn client(&self) -> ChaincodeClient {
        let endorsers: Vec<Arc<dyn Endorser>> = vec![Arc::new(self.org1.clone()), Arc::new(self.org2.clone())];
        let orderer: Arc<dyn Broadcaster> = Arc::new(self.orderer.clone());
        ChaincodeClient::new(endorsers, orderer)
    }

    fn verify(&self) {
        self.org1.verify();
        self.org2.verify();
        self.orderer.verify();
    }
}

/// One endorsing node refusing fails the whole operation, and nothing is ordered.
#[tokio::test]
async fn test_partial_endorsement_is_never_ordered() {
    let network = Network::new();
    network.org1.expect_proposal().return_status(200);
    network.org2.expect_proposal().return_status(500);

    let result = network.client().submit("channel1", "asset", "CreateAsset", &["a1"]).await;

    match result {
        Err(ProtocolError::Endorsement { status, message }) => {
            assert_eq!(status, 500);
            assert_eq!(message, "mock status 500");
        }
        other => panic!("expected endorsement failure, got {other:?}"),
    }
    assert!(network.orderer.broadcasts().is_empty());
    assert!(network.org1.seeks().is_empty(), "no ledger height lookup before endorsement");
}

/// A transport failure on any endorsing node is just as fatal.
#[tokio::test]
async fn test_unreachable_endorser_fails_the_operation() {
    let network = Network::new();
    network.org1.expect_proposal().return_status(200);
    network
        .org2
        .expect_proposal()
        .return_err(ProtocolError::Rpc(tonic::Status::unavailable("connection refused")));

    let result = network.client().evaluate("channel1", "asset", "ReadAsset", &["a1"]).await;
    assert!(matches!(result, Err(ProtocolError::Rpc(_))));
    assert!(network.orderer.broadcasts().is_empty());
}

/// A fully endorsed submission is broadcast once and confirmed by the block that holds it.
#[tokio::test]
async fn test_submit_waits_for_commit() {
    let network = Network::new();
    network.org1.expect_proposal().return_payload(b"created".to_vec());
    network.org2.expect_proposal().return_payload(b"created".to_vec());
    network.org1.expect_deliver().return_blocks(vec![block(4, &[])]);
    network.orderer.expect_broadcast().return_ok();
    network.org1.expect_deliver().return_committed(5, &network.orderer);

    let result = network
        .client()
        .submit("channel1", "asset", "CreateAsset", &["a1", "blue"])
        .await
        .expect("submitted");

    assert_eq!(result, b"created");
    assert_eq!(network.org1.proposals().len(), 1);
    assert_eq!(network.org2.proposals().len(), 1);
    assert_eq!(network.orderer.broadcasts().len(), 1);
    network.verify();
}

/// A failed seek while waiting for the commit ends the operation with that failure.
#[tokio::test]
async fn test_commit_wait_surfaces_retrieval_errors() {
    let network = Network::new();
    network.org1.expect_proposal().return_status(200);
    network.org2.expect_proposal().return_status(200);
    network.org1.expect_deliver().return_blocks(vec![block(4, &[])]);
    network.orderer.expect_broadcast().return_ok();
    network.org1.expect_deliver().return_err(ProtocolError::Timeout(Duration::from_secs(30), "deliver"));

    let result = network
        .client()
        .with_timeout(Duration::from_secs(5))
        .submit("channel1", "asset", "CreateAsset", &["a1"])
        .await;
    assert!(matches!(result, Err(ProtocolError::Timeout(_, "deliver"))));
    network.verify();
}

/// Evaluation endorses but never touches the ordering service.
#[tokio::test]
async fn test_evaluate_is_not_ordered() {
    let network = Network::new();
    network.org1.expect_proposal().return_payload(b"{\"id\":\"a1\"}".to_vec());
    network.org2.expect_proposal().return_payload(b"{\"id\":\"a1\"}".to_vec());

    let result = network
        .client()
        .evaluate("channel1", "asset", "ReadAsset", &["a1"])
        .await
        .expect("evaluated");

    assert_eq!(result, b"{\"id\":\"a1\"}");
    assert!(network.orderer.broadcasts().is_empty());
    network.verify();
}

/// Installation signs a separate proposal per endorsing node and returns the package ID.
#[tokio::test]
async fn test_install_returns_package_id() {
    let network = Network::new();
    let installed = InstallChaincodeResult {
        package_id: "asset_1.0:abc123".to_string(),
        ..Default::default()
    }
    .encode_to_vec();
    network.org1.expect_proposal().return_payload(installed.clone());
    network.org2.expect_proposal().return_payload(installed);

    let package_id = network.client().install(b"package bytes").await.expect("installed");

    assert_eq!(package_id, "asset_1.0:abc123");
    assert_ne!(
        network.org1.proposals()[0].signature,
        network.org2.proposals()[0].signature,
        "each node signs its own proposal"
    );
    network.verify();
}

/// Approve and commit go through the same endorse-order-confirm path.
#[tokio::test]
async fn test_approve_then_commit() {
    let network = Network::new();
    let definition = ChaincodeDefinition {
        sequence: 1,
        name: "asset".to_string(),
        version: "1.0".to_string(),
        package_id: Some("asset_1.0:abc123".to_string()),
        init_required: false,
    };
    for next in [5, 6] {
        network.org1.expect_proposal().return_status(200);
        network.org2.expect_proposal().return_status(200);
        network.org1.expect_deliver().return_blocks(vec![block(next - 1, &[])]);
        network.orderer.expect_broadcast().return_ok();
        network.org1.expect_deliver().return_committed(next, &network.orderer);
    }

    let client = network.client();
    client.approve("channel1", &definition).await.expect("approved");
    client.commit("channel1", &definition).await.expect("committed");

    assert_eq!(network.orderer.broadcasts().len(), 2);
    network.verify();
}
