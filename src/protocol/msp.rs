//! MSP configuration values and per-organization configuration groups.

use std::collections::BTreeMap;

use prost::Message;

use super::policy::{
    add_to_policy, empty_signature_policy, signature_policy, ADMINS, ENDORSEMENT, READERS, WRITERS,
};
use super::ProtocolError;
use crate::model::Organization;
use crate::protos::common::{ConfigGroup, ConfigPolicy, ConfigValue, Policy};
use crate::protos::msp::msp_role::MspRoleType;
use crate::protos::msp::{FabricCryptoConfig, FabricMspConfig, FabricNodeOus, FabricOuIdentifier, MspConfig};

pub const MSP_VALUE: &str = "MSP";

/// Organization groups inside the application group are administered by the channel's
/// application admins.
const APPLICATION_ADMINS: &str = "/Channel/Application/Admins";

/// The trust material an organization contributes to channel configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MspDefinition {
    pub msp_id: String,
    pub root_certs: Vec<String>,
    pub admin_certs: Vec<String>,
    pub tls_root_certs: Vec<String>,
}

impl MspDefinition {
    /// The definition of an organization, optionally trusting a network-wide TLS CA.
    pub fn from_organization(organization: &Organization, tls_ca: Option<&str>) -> Self {
        Self {
            msp_id: organization.msp_id().to_string(),
            root_certs: vec![organization.ca().certificate_pem().to_string()],
            admin_certs: vec![organization.admin().certificate_pem().to_string()],
            tls_root_certs: tls_ca.map(str::to_string).into_iter().collect(),
        }
    }

    fn fabric_config(&self) -> FabricMspConfig {
        FabricMspConfig {
            name: self.msp_id.clone(),
            root_certs: to_bytes(&self.root_certs),
            admins: to_bytes(&self.admin_certs),
            tls_root_certs: to_bytes(&self.tls_root_certs),
            crypto_config: Some(FabricCryptoConfig {
                signature_hash_family: "SHA2".to_string(),
                identity_identifier_hash_function: "SHA256".to_string(),
            }),
            fabric_node_ous: Some(node_ous()),
            ..Default::default()
        }
    }

    /// The `MSP` configuration value.
    pub fn config_value(&self) -> ConfigValue {
        ConfigValue {
            version: 0,
            value: MspConfig {
                r#type: 0,
                config: self.fabric_config().encode_to_vec(),
            }
            .encode_to_vec(),
            mod_policy: ADMINS.to_string(),
        }
    }

    /// The group used for consortium members and ordering organizations: every policy is
    /// satisfied by any member.
    pub fn member_group(&self) -> ConfigGroup {
        let member = ConfigPolicy {
            version: 0,
            policy: Some(signature_policy(&self.msp_id, MspRoleType::Member)),
            mod_policy: ADMINS.to_string(),
        };
        let policies = [ADMINS, READERS, WRITERS, ENDORSEMENT]
            .into_iter()
            .map(|name| (name.to_string(), member.clone()))
            .collect();
        ConfigGroup {
            version: 0,
            groups: BTreeMap::new(),
            values: BTreeMap::from([(MSP_VALUE.to_string(), self.config_value())]),
            policies,
            mod_policy: APPLICATION_ADMINS.to_string(),
        }
    }

    /// The group added to an existing channel: admins need the admin role, readers and
    /// writers any member.
    pub fn channel_group(&self) -> Result<ConfigGroup, ProtocolError> {
        let mut admins = empty_signature_policy();
        add_to_policy(&mut admins, &self.msp_id, MspRoleType::Admin)?;
        let mut members = empty_signature_policy();
        add_to_policy(&mut members, &self.msp_id, MspRoleType::Member)?;
        let config_policy = |policy: Policy| ConfigPolicy {
            version: 0,
            policy: Some(policy),
            mod_policy: ADMINS.to_string(),
        };
        Ok(ConfigGroup {
            version: 0,
            groups: BTreeMap::new(),
            values: BTreeMap::from([(MSP_VALUE.to_string(), self.config_value())]),
            policies: BTreeMap::from([
                (ADMINS.to_string(), config_policy(admins)),
                (WRITERS.to_string(), config_policy(members.clone())),
                (READERS.to_string(), config_policy(members)),
            ]),
            mod_policy: ADMINS.to_string(),
        })
    }
}

fn to_bytes(certificates: &[String]) -> Vec<Vec<u8>> {
    certificates.iter().map(|pem| pem.as_bytes().to_vec()).collect()
}

fn node_ous() -> FabricNodeOus {
    let ou = |identifier: &str| {
        Some(FabricOuIdentifier {
            certificate: Vec::new(),
            organizational_unit_identifier: identifier.to_string(),
        })
    };
    FabricNodeOus {
        enable: true,
        client_ou_identifier: ou("client"),
        peer_ou_identifier: ou("peer"),
        admin_ou_identifier: ou("admin"),
        orderer_ou_identifier: ou("orderer"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::builder::decode;
    use crate::protocol::policy::policy_msp_ids;

    /// Member group carries MSP and policies.
    #[test]
    fn test_member_group_carries_msp_and_policies() {
        let organization = Organization::new("Org1", None).unwrap();
        let definition = MspDefinition::from_organization(&organization, Some("tls-ca"));
        let group = definition.member_group();

        assert_eq!(group.mod_policy, "/Channel/Application/Admins");
        assert_eq!(
            group.policies.keys().collect::<Vec<_>>(),
            vec!["Admins", "Endorsement", "Readers", "Writers"]
        );
        let msp: MspConfig = decode(&group.values[MSP_VALUE].value).unwrap();
        let fabric: FabricMspConfig = decode(&msp.config).unwrap();
        assert_eq!(fabric.name, "Org1MSP");
        assert_eq!(fabric.root_certs, vec![organization.ca().certificate_pem().as_bytes().to_vec()]);
        assert_eq!(fabric.tls_root_certs, vec![b"tls-ca".to_vec()]);
        assert!(fabric.fabric_node_ous.unwrap().enable);
    }

    /// Channel group distinguishes admins.
    #[test]
    fn test_channel_group_distinguishes_admins() {
        let definition = MspDefinition {
            msp_id: "Org2MSP".to_string(),
            root_certs: vec![],
            admin_certs: vec![],
            tls_root_certs: vec![],
        };
        let group = definition.channel_group().unwrap();
        let admins = group.policies[ADMINS].policy.as_ref().unwrap();
        assert_eq!(policy_msp_ids(admins).unwrap(), vec!["Org2MSP"]);
        assert_eq!(group.mod_policy, ADMINS);
    }
}
