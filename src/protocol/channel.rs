//! # Channel Creation & Update
//!
//! A channel is changed by editing a configuration tree with a list of [`ChannelOption`]s
//! and submitting the result as a signed config update to the ordering service.
//!
//! ## Architecture Note
//! Options are plain values applied in order by [`ChannelEditor`]; the first failing
//! option stops the whole operation. Options that depend on each other must be listed in
//! dependency order (an anchor peer needs its organization group to exist already), and
//! getting that wrong yields [`ProtocolError::Lookup`] rather than a half-edited tree.
//!
//! Creation never looks at the ledger. Submitting the same creation twice is rejected by
//! the ordering service, not here.

use std::collections::BTreeMap;

use prost::Message;
use tracing::{debug, info, instrument};

use super::builder::{decode, envelope, header, payload, signature_header};
use super::configtx::{channel_config, compute_update};
use super::genesis::{application_group, capabilities_value, APPLICATION_GROUP, CAPABILITIES_VALUE, CONSORTIUM};
use super::msp::MspDefinition;
use super::policy::{add_to_policy, remove_from_policy, ADMINS, READERS, WRITERS};
use super::{ProtocolError, TransactionId};
use crate::framework::{Broadcaster, Deliverer, Signer, SigningIdentity};
use crate::identity::Identity;
use crate::protos::common::{
    Config, ConfigGroup, ConfigSignature, ConfigUpdate, ConfigUpdateEnvelope, ConfigValue,
    Consortium, HeaderType, Policy, PolicyType,
};
use crate::protos::msp::msp_role::MspRoleType;
use crate::protos::peer::{AnchorPeer, AnchorPeers};

pub const ANCHOR_PEERS_VALUE: &str = "AnchorPeers";
const CONSORTIUM_VALUE: &str = "Consortium";

/// One edit to a channel's configuration, or a choice of who signs the update.
#[derive(Debug, Clone)]
pub enum ChannelOption {
    /// Adds an empty organization group; used when creating a channel from consortium members.
    AddMspId(String),
    /// Adds a full organization definition to an existing channel.
    AddMsp(MspDefinition),
    RemoveMspId(String),
    AddAdmin(String),
    RemoveAdmin(String),
    AddWriter(String),
    RemoveWriter(String),
    AddReader(String),
    RemoveReader(String),
    CapabilityLevel(String),
    AnchorPeer { msp_id: String, host: String, port: u16 },
    UsingMspId(String),
    UsingIdentity(Identity),
}

/// A configuration tree being edited together with the identity that will sign it.
#[derive(Debug)]
pub struct ChannelEditor {
    config: Config,
    msp_id: String,
    identity: Identity,
}

impl ChannelEditor {
    pub fn new(config: Config, signer: &(impl Signer + ?Sized)) -> Self {
        Self {
            config,
            msp_id: signer.msp_id().to_string(),
            identity: signer.identity().clone(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Applies each option in turn, stopping at the first failure.
    pub fn apply(&mut self, options: &[ChannelOption]) -> Result<(), ProtocolError> {
        options.iter().try_for_each(|option| self.apply_one(option))
    }

    fn apply_one(&mut self, option: &ChannelOption) -> Result<(), ProtocolError> {
        match option {
            ChannelOption::AddMspId(msp_id) => {
                self.application()?
                    .groups
                    .insert(msp_id.clone(), ConfigGroup::default());
            }
            ChannelOption::AddMsp(definition) => {
                let group = definition.channel_group()?;
                self.application()?.groups.insert(definition.msp_id.clone(), group);
            }
            ChannelOption::RemoveMspId(msp_id) => {
                self.application()?.groups.remove(msp_id);
            }
            ChannelOption::AddAdmin(msp_id) => {
                add_to_policy(self.application_policy(ADMINS)?, msp_id, MspRoleType::Admin)?;
            }
            ChannelOption::RemoveAdmin(msp_id) => {
                remove_from_policy(self.application_policy(ADMINS)?, msp_id)?;
            }
            ChannelOption::AddWriter(msp_id) => {
                add_to_policy(self.application_policy(WRITERS)?, msp_id, MspRoleType::Member)?;
            }
            ChannelOption::RemoveWriter(msp_id) => {
                remove_from_policy(self.application_policy(WRITERS)?, msp_id)?;
            }
            ChannelOption::AddReader(msp_id) => {
                add_to_policy(self.application_policy(READERS)?, msp_id, MspRoleType::Member)?;
            }
            ChannelOption::RemoveReader(msp_id) => {
                remove_from_policy(self.application_policy(READERS)?, msp_id)?;
            }
            ChannelOption::CapabilityLevel(level) => {
                let application = self.application()?;
                let fresh = capabilities_value(level);
                match application.values.get_mut(CAPABILITIES_VALUE) {
                    Some(existing) => existing.value = fresh.value,
                    None => {
                        application.values.insert(CAPABILITIES_VALUE.to_string(), fresh);
                    }
                }
            }
            ChannelOption::AnchorPeer { msp_id, host, port } => {
                let organization = self
                    .application()?
                    .groups
                    .get_mut(msp_id)
                    .ok_or_else(|| ProtocolError::Lookup(format!("an MSP with ID {msp_id}")))?;
                let value = organization
                    .values
                    .entry(ANCHOR_PEERS_VALUE.to_string())
                    .or_insert_with(|| ConfigValue {
                        version: 0,
                        value: AnchorPeers::default().encode_to_vec(),
                        mod_policy: ADMINS.to_string(),
                    });
                let mut anchor_peers: AnchorPeers = decode(&value.value)?;
                anchor_peers.anchor_peers.push(AnchorPeer {
                    host: host.clone(),
                    port: i32::from(*port),
                });
                value.value = anchor_peers.encode_to_vec();
            }
            ChannelOption::UsingMspId(msp_id) => self.msp_id = msp_id.clone(),
            ChannelOption::UsingIdentity(identity) => self.identity = identity.clone(),
        }
        Ok(())
    }

    fn application(&mut self) -> Result<&mut ConfigGroup, ProtocolError> {
        self.config
            .channel_group
            .as_mut()
            .and_then(|channel| channel.groups.get_mut(APPLICATION_GROUP))
            .ok_or_else(|| ProtocolError::Lookup("an Application group".to_string()))
    }

    fn application_policy(&mut self, name: &str) -> Result<&mut Policy, ProtocolError> {
        let policy = self
            .application()?
            .policies
            .get_mut(name)
            .and_then(|config_policy| config_policy.policy.as_mut())
            .ok_or_else(|| ProtocolError::Lookup(format!("an Application {name} policy")))?;
        if policy.r#type != PolicyType::Signature as i32 {
            return Err(ProtocolError::Lookup(format!("a signature policy for Application {name}")));
        }
        Ok(policy)
    }

    fn into_parts(self) -> (Config, SigningIdentity) {
        let signer = SigningIdentity::new(self.msp_id, self.identity);
        (self.config, signer)
    }
}

fn consortium_value() -> ConfigValue {
    ConfigValue {
        version: 0,
        value: Consortium {
            name: CONSORTIUM.to_string(),
        }
        .encode_to_vec(),
        mod_policy: String::new(),
    }
}

/// The update that asks the ordering service to create `channel`, before options apply.
fn creation_update(channel: &str) -> ConfigUpdate {
    let read_set = ConfigGroup {
        groups: BTreeMap::from([(APPLICATION_GROUP.to_string(), ConfigGroup::default())]),
        values: BTreeMap::from([(CONSORTIUM_VALUE.to_string(), consortium_value())]),
        ..Default::default()
    };
    let write_set = ConfigGroup {
        groups: BTreeMap::from([(
            APPLICATION_GROUP.to_string(),
            ConfigGroup {
                version: 1,
                ..application_group("V2_0")
            },
        )]),
        values: BTreeMap::from([(CONSORTIUM_VALUE.to_string(), consortium_value())]),
        ..Default::default()
    };
    ConfigUpdate {
        channel_id: channel.to_string(),
        read_set: Some(read_set),
        write_set: Some(write_set),
        isolated_data: BTreeMap::new(),
    }
}

/// Signs a config update and wraps it into the envelope the ordering service expects.
pub fn config_update_envelope(
    signer: &(impl Signer + ?Sized),
    update: &ConfigUpdate,
) -> Result<crate::protos::common::Envelope, ProtocolError> {
    let tx_id = TransactionId::new(signer);
    let header = header(HeaderType::ConfigUpdate, &update.channel_id, &tx_id, Vec::new());
    let config_update = update.encode_to_vec();
    let signature_header = signature_header(&tx_id).encode_to_vec();
    let signature = signer.identity().sign(&[&signature_header, &config_update])?;
    let config_update_envelope = ConfigUpdateEnvelope {
        config_update,
        signatures: vec![ConfigSignature {
            signature_header,
            signature,
        }],
    };
    envelope(&payload(header, &config_update_envelope), signer)
}

/// Builds the creation update for `channel` with `options` applied, and the signer to use.
pub fn channel_creation(
    signer: &(impl Signer + ?Sized),
    channel: &str,
    options: &[ChannelOption],
) -> Result<(ConfigUpdate, SigningIdentity), ProtocolError> {
    let mut update = creation_update(channel);
    let config = Config {
        sequence: 0,
        channel_group: update.write_set.take(),
    };
    let mut editor = ChannelEditor::new(config, signer);
    editor.apply(options)?;
    let (config, signer) = editor.into_parts();
    let write_set = config
        .channel_group
        .ok_or(ProtocolError::MissingField("write set"))?;

    let members: Vec<String> = write_set
        .groups
        .get(APPLICATION_GROUP)
        .map(|application| application.groups.keys().cloned().collect())
        .unwrap_or_default();
    if let Some(application) = update
        .read_set
        .as_mut()
        .and_then(|read_set| read_set.groups.get_mut(APPLICATION_GROUP))
    {
        for msp_id in members {
            application.groups.insert(msp_id, ConfigGroup::default());
        }
    }
    update.write_set = Some(write_set);
    Ok((update, signer))
}

/// Creates `channel` on the ordering service.
#[instrument(skip(broadcaster, options), fields(options = options.len()))]
pub async fn create_channel(
    broadcaster: &dyn Broadcaster,
    channel: &str,
    options: &[ChannelOption],
) -> Result<(), ProtocolError> {
    let (update, signer) = channel_creation(broadcaster, channel, options)?;
    debug!(?update, "Channel creation update built");
    let envelope = config_update_envelope(&signer, &update)?;
    broadcaster.broadcast(envelope).await?;
    info!(channel, "Channel creation submitted");
    Ok(())
}

/// Computes the update that applies `options` to the current configuration `original`.
pub fn channel_update(
    signer: &(impl Signer + ?Sized),
    channel: &str,
    original: &Config,
    options: &[ChannelOption],
) -> Result<(ConfigUpdate, SigningIdentity), ProtocolError> {
    let mut editor = ChannelEditor::new(original.clone(), signer);
    editor.apply(options)?;
    let (updated, signer) = editor.into_parts();
    let update = compute_update(channel, original, &updated)?;
    Ok((update, signer))
}

/// Updates an existing channel: fetch its configuration from `deliverer`, edit a copy,
/// diff, and submit through `broadcaster`.
#[instrument(skip(deliverer, broadcaster, options), fields(options = options.len()))]
pub async fn update_channel(
    deliverer: &dyn Deliverer,
    broadcaster: &dyn Broadcaster,
    channel: &str,
    options: &[ChannelOption],
) -> Result<(), ProtocolError> {
    let original = channel_config(deliverer, channel).await?;
    let (update, signer) = channel_update(broadcaster, channel, &original, options)?;
    debug!(?update, "Channel config update computed");
    let envelope = config_update_envelope(&signer, &update)?;
    broadcaster.broadcast(envelope).await?;
    info!(channel, "Channel update submitted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Organization;
    use crate::protocol::policy::{empty_signature_policy, policy_msp_ids};
    use crate::protos::common::ConfigPolicy;

    fn signer() -> SigningIdentity {
        let organization = Organization::new("Org1", None).unwrap();
        SigningIdentity::new(organization.msp_id(), organization.admin().clone())
    }

    /// Creation mirrors members into read set.
    #[test]
    fn test_creation_mirrors_members_into_read_set() {
        let options = [
            ChannelOption::CapabilityLevel("V2_0".to_string()),
            ChannelOption::AddMspId("Org1MSP".to_string()),
            ChannelOption::AddMspId("Org2MSP".to_string()),
        ];
        let (update, _) = channel_creation(&signer(), "channel1", &options).unwrap();

        let read = &update.read_set.unwrap();
        assert_eq!(
            read.groups[APPLICATION_GROUP].groups.keys().collect::<Vec<_>>(),
            vec!["Org1MSP", "Org2MSP"]
        );
        let consortium: Consortium = decode(&read.values[CONSORTIUM_VALUE].value).unwrap();
        assert_eq!(consortium.name, "SampleConsortium");

        let write = &update.write_set.unwrap().groups[APPLICATION_GROUP];
        assert_eq!(write.version, 1);
        assert_eq!(write.mod_policy, ADMINS);
        assert_eq!(write.groups.len(), 2);
        assert!(write.policies.contains_key("LifecycleEndorsement"));
    }

    /// Anchor peer before its organization is a lookup error.
    #[test]
    fn test_anchor_peer_before_its_organization_is_a_lookup_error() {
        let options = [ChannelOption::AnchorPeer {
            msp_id: "Org1MSP".to_string(),
            host: "org1peer-api.127-0-0-1.nip.io".to_string(),
            port: 8080,
        }];
        let result = channel_creation(&signer(), "channel1", &options);
        assert!(matches!(result, Err(ProtocolError::Lookup(_))));
    }

    /// Using MSP ID changes the signer.
    #[test]
    fn test_using_msp_id_changes_the_signer() {
        let options = [ChannelOption::UsingMspId("Org9MSP".to_string())];
        let (_, signer) = channel_creation(&signer(), "channel1", &options).unwrap();
        assert_eq!(signer.msp_id(), "Org9MSP");
    }

    /// Admin edits need a signature policy.
    #[test]
    fn test_admin_edits_need_a_signature_policy() {
        let mut application = application_group("V2_0");
        let result = ChannelEditor::new(
            Config {
                sequence: 0,
                channel_group: Some(ConfigGroup {
                    groups: BTreeMap::from([(APPLICATION_GROUP.to_string(), application.clone())]),
                    ..Default::default()
                }),
            },
            &signer(),
        )
        .apply(&[ChannelOption::AddAdmin("Org1MSP".to_string())]);
        assert!(matches!(result, Err(ProtocolError::Lookup(_))));

        application.policies.insert(
            ADMINS.to_string(),
            ConfigPolicy {
                version: 0,
                policy: Some(empty_signature_policy()),
                mod_policy: ADMINS.to_string(),
            },
        );
        let mut editor = ChannelEditor::new(
            Config {
                sequence: 0,
                channel_group: Some(ConfigGroup {
                    groups: BTreeMap::from([(APPLICATION_GROUP.to_string(), application)]),
                    ..Default::default()
                }),
            },
            &signer(),
        );
        editor
            .apply(&[
                ChannelOption::AddAdmin("Org1MSP".to_string()),
                ChannelOption::AddAdmin("Org2MSP".to_string()),
                ChannelOption::RemoveAdmin("Org1MSP".to_string()),
            ])
            .unwrap();
        let policy = editor.config().channel_group.as_ref().unwrap().groups[APPLICATION_GROUP].policies
            [ADMINS]
            .policy
            .as_ref()
            .unwrap();
        assert_eq!(policy_msp_ids(policy).unwrap(), vec!["Org2MSP"]);
    }

    /// Config update envelope carries one signature.
    #[test]
    fn test_config_update_envelope_carries_one_signature() {
        let signer = signer();
        let (update, _) = channel_creation(&signer, "channel1", &[]).unwrap();
        let envelope = config_update_envelope(&signer, &update).unwrap();
        let payload: crate::protos::common::Payload = decode(&envelope.payload).unwrap();
        let config_update_envelope: ConfigUpdateEnvelope = decode(&payload.data).unwrap();
        assert_eq!(config_update_envelope.signatures.len(), 1);
        assert_eq!(
            config_update_envelope.signatures[0].signature_header,
            payload.header.unwrap().signature_header
        );
        let decoded: ConfigUpdate = decode(&config_update_envelope.config_update).unwrap();
        assert_eq!(decoded.channel_id, "channel1");
    }
}
