//! Genesis block for the ordering service's system channel.
//!
//! The block written here is the only way the ordering node learns the network's
//! initial trust roots, so it has to be on disk before the process starts.

use std::collections::BTreeMap;

use prost::Message;
use tracing::{debug, instrument};

use super::builder::{envelope, genesis_block as wrap_genesis, header, payload};
use super::msp::MspDefinition;
use super::policy::{
    implicit_meta_config_policy, implicit_meta_policy, ADMINS, BLOCK_VALIDATION, ENDORSEMENT,
    LIFECYCLE_ENDORSEMENT, READERS, WRITERS,
};
use super::{ProtocolError, TransactionId};
use crate::framework::Signer;
use crate::model::Organization;
use crate::protos::common::implicit_meta_policy::Rule;
use crate::protos::common::{
    BlockDataHashingStructure, Block, Capabilities, Capability, Config, ConfigEnvelope,
    ConfigGroup, ConfigPolicy, ConfigValue, HashingAlgorithm, HeaderType, OrdererAddresses,
};
use crate::protos::orderer::{etcdraft, BatchSize, BatchTimeout, ConsensusType};

/// Name of the ordering service's system channel.
pub const SYSTEM_CHANNEL: &str = "testchainid";

/// Name of the consortium every endorsing organization belongs to.
pub const CONSORTIUM: &str = "SampleConsortium";

pub const APPLICATION_GROUP: &str = "Application";
pub const ORDERER_GROUP: &str = "Orderer";
pub const CONSORTIUMS_GROUP: &str = "Consortiums";
pub const CAPABILITIES_VALUE: &str = "Capabilities";

const ORDERER_ADMINS: &str = "/Channel/Orderer/Admins";
const CHANNEL_CAPABILITY: &str = "V2_0";

/// How the single ordering node reaches consensus with itself.
#[derive(Debug, Clone)]
pub enum Consensus {
    Solo,
    /// Raft with one consenter, used when TLS is enabled.
    EtcdRaft {
        host: String,
        port: u32,
        tls_certificate: String,
    },
}

/// Everything the genesis block is built from.
#[derive(Debug)]
pub struct GenesisParameters<'a> {
    pub ordering_organization: &'a Organization,
    pub consortium: &'a [&'a Organization],
    /// External `host:port` of the ordering node.
    pub orderer_address: String,
    pub capability_level: &'a str,
    pub consensus: Consensus,
    pub tls_ca: Option<&'a str>,
}

pub(crate) fn capabilities_value(level: &str) -> ConfigValue {
    ConfigValue {
        version: 0,
        value: Capabilities {
            capabilities: BTreeMap::from([(level.to_string(), Capability {})]),
        }
        .encode_to_vec(),
        mod_policy: ADMINS.to_string(),
    }
}

fn value<M: Message>(message: &M, mod_policy: &str) -> ConfigValue {
    ConfigValue {
        version: 0,
        value: message.encode_to_vec(),
        mod_policy: mod_policy.to_string(),
    }
}

fn policies(entries: &[(&str, &str)]) -> BTreeMap<String, ConfigPolicy> {
    entries
        .iter()
        .map(|(name, sub_policy)| (name.to_string(), implicit_meta_config_policy(Rule::Any, sub_policy)))
        .collect()
}

/// The application group template shared by the genesis block and channel creation.
pub(crate) fn application_group(capability_level: &str) -> ConfigGroup {
    ConfigGroup {
        version: 0,
        groups: BTreeMap::new(),
        values: BTreeMap::from([(CAPABILITIES_VALUE.to_string(), capabilities_value(capability_level))]),
        policies: policies(&[
            (ADMINS, ADMINS),
            (ENDORSEMENT, ENDORSEMENT),
            (LIFECYCLE_ENDORSEMENT, ENDORSEMENT),
            (READERS, READERS),
            (WRITERS, WRITERS),
        ]),
        mod_policy: ADMINS.to_string(),
    }
}

fn consensus_type(consensus: &Consensus) -> ConsensusType {
    match consensus {
        Consensus::Solo => ConsensusType {
            r#type: "solo".to_string(),
            metadata: Vec::new(),
            state: 0,
        },
        Consensus::EtcdRaft {
            host,
            port,
            tls_certificate,
        } => {
            let metadata = etcdraft::ConfigMetadata {
                consenters: vec![etcdraft::Consenter {
                    host: host.clone(),
                    port: *port,
                    client_tls_cert: tls_certificate.as_bytes().to_vec(),
                    server_tls_cert: tls_certificate.as_bytes().to_vec(),
                }],
                options: Some(etcdraft::Options {
                    tick_interval: "500ms".to_string(),
                    election_tick: 10,
                    heartbeat_tick: 1,
                    max_inflight_blocks: 5,
                    snapshot_interval_size: 16 * 1024 * 1024,
                }),
            };
            ConsensusType {
                r#type: "etcdraft".to_string(),
                metadata: metadata.encode_to_vec(),
                state: 0,
            }
        }
    }
}

fn orderer_group(parameters: &GenesisParameters<'_>) -> ConfigGroup {
    let ordering = MspDefinition::from_organization(parameters.ordering_organization, parameters.tls_ca);
    ConfigGroup {
        version: 0,
        groups: BTreeMap::from([(ordering.msp_id.clone(), ordering.member_group())]),
        values: BTreeMap::from([
            (
                "BatchSize".to_string(),
                value(
                    &BatchSize {
                        max_message_count: 10,
                        absolute_max_bytes: 103_809_024,
                        preferred_max_bytes: 524_288,
                    },
                    ADMINS,
                ),
            ),
            (
                "BatchTimeout".to_string(),
                value(&BatchTimeout { timeout: "100ms".to_string() }, ADMINS),
            ),
            (CAPABILITIES_VALUE.to_string(), capabilities_value(CHANNEL_CAPABILITY)),
            (
                "ChannelRestrictions".to_string(),
                ConfigValue {
                    version: 0,
                    value: Vec::new(),
                    mod_policy: ADMINS.to_string(),
                },
            ),
            ("ConsensusType".to_string(), value(&consensus_type(&parameters.consensus), ADMINS)),
        ]),
        policies: policies(&[
            (ADMINS, ADMINS),
            (BLOCK_VALIDATION, WRITERS),
            (READERS, READERS),
            (WRITERS, WRITERS),
        ]),
        mod_policy: ADMINS.to_string(),
    }
}

fn consortiums_group(parameters: &GenesisParameters<'_>) -> ConfigGroup {
    let members = parameters
        .consortium
        .iter()
        .map(|organization| {
            let definition = MspDefinition::from_organization(organization, parameters.tls_ca);
            (definition.msp_id.clone(), definition.member_group())
        })
        .collect();
    let consortium = ConfigGroup {
        version: 0,
        groups: members,
        values: BTreeMap::from([(
            "ChannelCreationPolicy".to_string(),
            value(&implicit_meta_policy(Rule::Any, ADMINS), ORDERER_ADMINS),
        )]),
        policies: BTreeMap::new(),
        mod_policy: ORDERER_ADMINS.to_string(),
    };
    ConfigGroup {
        version: 0,
        groups: BTreeMap::from([(CONSORTIUM.to_string(), consortium)]),
        values: BTreeMap::new(),
        policies: BTreeMap::new(),
        mod_policy: ORDERER_ADMINS.to_string(),
    }
}

/// Builds the full system channel configuration tree.
pub fn system_channel_config(parameters: &GenesisParameters<'_>) -> Config {
    let channel_group = ConfigGroup {
        version: 0,
        groups: BTreeMap::from([
            (APPLICATION_GROUP.to_string(), application_group(parameters.capability_level)),
            (CONSORTIUMS_GROUP.to_string(), consortiums_group(parameters)),
            (ORDERER_GROUP.to_string(), orderer_group(parameters)),
        ]),
        values: BTreeMap::from([
            (
                "BlockDataHashingStructure".to_string(),
                value(&BlockDataHashingStructure { width: u32::MAX }, ADMINS),
            ),
            (CAPABILITIES_VALUE.to_string(), capabilities_value(CHANNEL_CAPABILITY)),
            (
                "HashingAlgorithm".to_string(),
                value(&HashingAlgorithm { name: "SHA256".to_string() }, ADMINS),
            ),
            (
                "OrdererAddresses".to_string(),
                value(
                    &OrdererAddresses {
                        addresses: vec![parameters.orderer_address.clone()],
                    },
                    ORDERER_ADMINS,
                ),
            ),
        ]),
        policies: policies(&[(ADMINS, ADMINS), (READERS, READERS), (WRITERS, WRITERS)]),
        mod_policy: ADMINS.to_string(),
    };
    Config {
        sequence: 0,
        channel_group: Some(channel_group),
    }
}

/// Builds and signs block 0 of the system channel.
#[instrument(skip_all, fields(orderer = %parameters.orderer_address))]
pub fn genesis_block(signer: &dyn Signer, parameters: &GenesisParameters<'_>) -> Result<Block, ProtocolError> {
    debug!(consensus = ?parameters.consensus, "Building genesis block");
    let config = system_channel_config(parameters);
    let tx_id = TransactionId::new(signer);
    let header = header(HeaderType::Config, SYSTEM_CHANNEL, &tx_id, Vec::new());
    let config_envelope = ConfigEnvelope {
        config: Some(config),
        last_update: None,
    };
    let envelope = envelope(&payload(header, &config_envelope), signer)?;
    Ok(wrap_genesis(&envelope))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::SigningIdentity;
    use crate::protocol::builder::{decode, envelope_channel_header};
    use crate::protos::common::{Envelope, Payload};

    fn parameters<'a>(
        ordering: &'a Organization,
        consortium: &'a [&'a Organization],
        consensus: Consensus,
    ) -> GenesisParameters<'a> {
        GenesisParameters {
            ordering_organization: ordering,
            consortium,
            orderer_address: "orderer-api.127-0-0-1.nip.io:8080".to_string(),
            capability_level: "V2_0",
            consensus,
            tls_ca: None,
        }
    }

    /// Genesis block holds full configuration.
    #[test]
    fn test_genesis_block_holds_full_configuration() {
        let ordering = Organization::new("Orderer", None).unwrap();
        let org1 = Organization::new("Org1", None).unwrap();
        let org2 = Organization::new("Org2", None).unwrap();
        let consortium = [&org1, &org2];
        let signer = SigningIdentity::new(ordering.msp_id(), ordering.admin().clone());
        let block = genesis_block(&signer, &parameters(&ordering, &consortium, Consensus::Solo)).unwrap();

        let data = &block.data.as_ref().unwrap().data[0];
        let channel_header = envelope_channel_header(data).unwrap();
        assert_eq!(channel_header.channel_id, SYSTEM_CHANNEL);
        assert_eq!(channel_header.r#type, HeaderType::Config as i32);

        let envelope: Envelope = decode(data).unwrap();
        let payload: Payload = decode(&envelope.payload).unwrap();
        let config_envelope: ConfigEnvelope = decode(&payload.data).unwrap();
        let channel = config_envelope.config.unwrap().channel_group.unwrap();

        let members = &channel.groups[CONSORTIUMS_GROUP].groups[CONSORTIUM].groups;
        assert_eq!(members.keys().collect::<Vec<_>>(), vec!["Org1MSP", "Org2MSP"]);
        assert!(channel.groups[ORDERER_GROUP].groups.contains_key("OrdererMSP"));
        let consensus: ConsensusType =
            decode(&channel.groups[ORDERER_GROUP].values["ConsensusType"].value).unwrap();
        assert_eq!(consensus.r#type, "solo");
        let addresses: OrdererAddresses = decode(&channel.values["OrdererAddresses"].value).unwrap();
        assert_eq!(addresses.addresses, vec!["orderer-api.127-0-0-1.nip.io:8080"]);
    }

    /// TLS selects raft with one consenter.
    #[test]
    fn test_tls_selects_raft_with_one_consenter() {
        let ordering = Organization::new("Orderer", None).unwrap();
        let consensus = Consensus::EtcdRaft {
            host: "orderer-api.127-0-0-1.nip.io".to_string(),
            port: 8080,
            tls_certificate: "cert".to_string(),
        };
        let config = system_channel_config(&parameters(&ordering, &[], consensus));
        let orderer = &config.channel_group.unwrap().groups[ORDERER_GROUP];
        let consensus: ConsensusType = decode(&orderer.values["ConsensusType"].value).unwrap();
        assert_eq!(consensus.r#type, "etcdraft");
        let metadata: etcdraft::ConfigMetadata = decode(&consensus.metadata).unwrap();
        assert_eq!(metadata.consenters.len(), 1);
        assert_eq!(metadata.consenters[0].server_tls_cert, b"cert");
    }
}
