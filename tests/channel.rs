use std::collections::BTreeMap;

use microfab::framework::mock::{with_last_config, MockLedger};
use microfab::model::Organization;
use microfab::protocol::builder::{decode, genesis_block};
use microfab::protocol::channel::{update_channel, ANCHOR_PEERS_VALUE};
use microfab::protocol::{ChannelOption, MspDefinition, ProtocolError};
use microfab::protos::common::{
    Block, Config, ConfigEnvelope, ConfigGroup, ConfigUpdate, ConfigUpdateEnvelope, Envelope,
    Payload, SignatureHeader,
};
use microfab::protos::msp::SerializedIdentity;
use microfab::protos::peer::AnchorPeers;
use prost::Message;

/// The current configuration of a channel whose only member is `member`, as a config block.
fn config_block(member: &Organization) -> Block {
    let application = ConfigGroup {
        version: 1,
        groups: BTreeMap::from([(
            member.msp_id().to_string(),
            MspDefinition::from_organization(member, None).member_group(),
        )]),
        mod_policy: "Admins".to_string(),
        ..Default::default()
    };
    let config = Config {
        sequence: 1,
        channel_group: Some(ConfigGroup {
            groups: BTreeMap::from([("Application".to_string(), application)]),
            mod_policy: "Admins".to_string(),
            ..Default::default()
        }),
    };
    let payload = Payload {
        header: None,
        data: ConfigEnvelope {
            config: Some(config),
            last_update: None,
        }
        .encode_to_vec(),
    };
    let envelope = Envelope {
        payload: payload.encode_to_vec(),
        signature: Vec::new(),
    };
    with_last_config(genesis_block(&envelope), 0)
}

fn submitted_update(envelope: &Envelope) -> (ConfigUpdate, SignatureHeader) {
    let payload: Payload = decode(&envelope.payload).expect("payload");
    let config_update_envelope: ConfigUpdateEnvelope = decode(&payload.data).expect("config update envelope");
    let update = decode(&config_update_envelope.config_update).expect("config update");
    let signature_header = decode(&config_update_envelope.signatures[0].signature_header).expect("signature header");
    (update, signature_header)
}

/// Adding Org2 to a channel that only holds Org1 writes both organizations under a bumped
/// Application group and reads back Org1 alone.
#[tokio::test]
async fn test_adding_an_organization_diffs_against_current_config() {
    let org1 = Organization::new("Org1", None).expect("Org1");
    let org2 = Organization::new("Org2", None).expect("Org2");
    let orderer = MockLedger::new(org1.msp_id(), org1.admin().clone());
    orderer.expect_deliver().return_blocks(vec![config_block(&org1)]);
    orderer.expect_broadcast().return_ok();

    update_channel(
        &orderer,
        &orderer,
        "channel1",
        &[ChannelOption::AddMsp(MspDefinition::from_organization(&org2, None))],
    )
    .await
    .expect("update submitted");
    orderer.verify();

    let broadcasts = orderer.broadcasts();
    assert_eq!(broadcasts.len(), 1);
    let (update, _) = submitted_update(&broadcasts[0]);
    assert_eq!(update.channel_id, "channel1");

    let write = &update.write_set.expect("write set").groups["Application"];
    assert_eq!(write.version, 2);
    assert_eq!(write.groups.keys().collect::<Vec<_>>(), vec!["Org1MSP", "Org2MSP"]);
    assert_eq!(write.groups["Org1MSP"].version, 0);
    assert!(write.groups["Org1MSP"].values.is_empty(), "unchanged member carries its version only");
    assert!(write.groups["Org2MSP"].values.contains_key("MSP"));

    let read = &update.read_set.expect("read set").groups["Application"];
    assert_eq!(read.version, 1);
    assert_eq!(read.groups.keys().collect::<Vec<_>>(), vec!["Org1MSP"]);
}

/// An anchor peer can be added in the same update as its organization, and the update is
/// signed by whoever the options name.
#[tokio::test]
async fn test_anchor_peer_update_signed_as_member_admin() {
    let org1 = Organization::new("Org1", None).expect("Org1");
    let org2 = Organization::new("Org2", None).expect("Org2");
    let orderer = MockLedger::new(org1.msp_id(), org1.admin().clone());
    orderer.expect_deliver().return_blocks(vec![config_block(&org1)]);
    orderer.expect_broadcast().return_ok();

    let options = [
        ChannelOption::AddMsp(MspDefinition::from_organization(&org2, None)),
        ChannelOption::AnchorPeer {
            msp_id: "Org2MSP".to_string(),
            host: "org2peer-api.127-0-0-1.nip.io".to_string(),
            port: 8080,
        },
        ChannelOption::UsingMspId("Org2MSP".to_string()),
        ChannelOption::UsingIdentity(org2.admin().clone()),
    ];
    update_channel(&orderer, &orderer, "channel1", &options)
        .await
        .expect("update submitted");

    let (update, signature_header) = submitted_update(&orderer.broadcasts()[0]);
    let org2_group = &update.write_set.expect("write set").groups["Application"].groups["Org2MSP"];
    let anchor_peers: AnchorPeers = decode(&org2_group.values[ANCHOR_PEERS_VALUE].value).expect("anchor peers");
    assert_eq!(anchor_peers.anchor_peers.len(), 1);
    assert_eq!(anchor_peers.anchor_peers[0].host, "org2peer-api.127-0-0-1.nip.io");
    assert_eq!(anchor_peers.anchor_peers[0].port, 8080);

    let creator: SerializedIdentity = decode(&signature_header.creator).expect("creator");
    assert_eq!(creator.mspid, "Org2MSP");
    assert_eq!(creator.id_bytes, org2.admin().certificate_pem().as_bytes());
}

/// Options out of dependency order fail before anything is sent.
#[tokio::test]
async fn test_anchor_peer_for_unknown_organization_is_not_broadcast() {
    let org1 = Organization::new("Org1", None).expect("Org1");
    let orderer = MockLedger::new(org1.msp_id(), org1.admin().clone());
    orderer.expect_deliver().return_blocks(vec![config_block(&org1)]);

    let result = update_channel(
        &orderer,
        &orderer,
        "channel1",
        &[ChannelOption::AnchorPeer {
            msp_id: "Org2MSP".to_string(),
            host: "org2peer-api.127-0-0-1.nip.io".to_string(),
            port: 8080,
        }],
    )
    .await;

    assert!(matches!(result, Err(ProtocolError::Lookup(_))));
    assert!(orderer.broadcasts().is_empty());
    orderer.verify();
}

/// An update that changes nothing is refused rather than submitted empty.
#[tokio::test]
async fn test_no_op_update_is_an_error() {
    let org1 = Organization::new("Org1", None).expect("Org1");
    let orderer = MockLedger::new(org1.msp_id(), org1.admin().clone());
    orderer.expect_deliver().return_blocks(vec![config_block(&org1)]);

    let result = update_channel(
        &orderer,
        &orderer,
        "channel1",
        &[ChannelOption::RemoveMspId("Org9MSP".to_string())],
    )
    .await;

    assert!(matches!(result, Err(ProtocolError::NoDifferences)));
    assert!(orderer.broadcasts().is_empty());
}
