//! Policy encodings: implicit-meta rules and N-out-of-M signature policies.
//!
//! Signature policies list their principals in `identities` and refer to them by
//! position through `SignedBy` rules. Adding or removing a principal keeps those
//! positions contiguous.

use prost::Message;

use super::builder::decode;
use super::ProtocolError;
use crate::protos::common::implicit_meta_policy::Rule;
use crate::protos::common::signature_policy::{NOutOf, Type};
use crate::protos::common::{
    ConfigPolicy, ImplicitMetaPolicy, Policy, PolicyType, SignaturePolicy, SignaturePolicyEnvelope,
};
use crate::protos::msp::msp_principal::Classification;
use crate::protos::msp::msp_role::MspRoleType;
use crate::protos::msp::{MspPrincipal, MspRole};

pub const ADMINS: &str = "Admins";
pub const READERS: &str = "Readers";
pub const WRITERS: &str = "Writers";
pub const ENDORSEMENT: &str = "Endorsement";
pub const LIFECYCLE_ENDORSEMENT: &str = "LifecycleEndorsement";
pub const BLOCK_VALIDATION: &str = "BlockValidation";

pub fn implicit_meta_policy(rule: Rule, sub_policy: &str) -> Policy {
    Policy {
        r#type: PolicyType::ImplicitMeta as i32,
        value: ImplicitMetaPolicy {
            sub_policy: sub_policy.to_string(),
            rule: rule as i32,
        }
        .encode_to_vec(),
    }
}

/// An implicit-meta policy administered by the enclosing group's `Admins`.
pub fn implicit_meta_config_policy(rule: Rule, sub_policy: &str) -> ConfigPolicy {
    ConfigPolicy {
        version: 0,
        policy: Some(implicit_meta_policy(rule, sub_policy)),
        mod_policy: ADMINS.to_string(),
    }
}

fn signed_by(index: usize) -> SignaturePolicy {
    SignaturePolicy {
        r#type: Some(Type::SignedBy(i32::try_from(index).unwrap_or(i32::MAX))),
    }
}

fn role_principal(msp_id: &str, role: MspRoleType) -> MspPrincipal {
    MspPrincipal {
        principal_classification: Classification::Role as i32,
        principal: MspRole {
            msp_identifier: msp_id.to_string(),
            role: role as i32,
        }
        .encode_to_vec(),
    }
}

/// A 1-of policy satisfied by any principal with `role` in `msp_id`.
pub fn signature_policy(msp_id: &str, role: MspRoleType) -> Policy {
    let envelope = SignaturePolicyEnvelope {
        version: 0,
        rule: Some(SignaturePolicy {
            r#type: Some(Type::NOutOf(NOutOf {
                n: 1,
                rules: vec![signed_by(0)],
            })),
        }),
        identities: vec![role_principal(msp_id, role)],
    };
    Policy {
        r#type: PolicyType::Signature as i32,
        value: envelope.encode_to_vec(),
    }
}

/// A 1-of policy with no principals yet.
pub fn empty_signature_policy() -> Policy {
    let envelope = SignaturePolicyEnvelope {
        version: 0,
        rule: Some(SignaturePolicy {
            r#type: Some(Type::NOutOf(NOutOf { n: 1, rules: Vec::new() })),
        }),
        identities: Vec::new(),
    };
    Policy {
        r#type: PolicyType::Signature as i32,
        value: envelope.encode_to_vec(),
    }
}

fn n_out_of(envelope: &mut SignaturePolicyEnvelope) -> Result<&mut NOutOf, ProtocolError> {
    match envelope.rule.as_mut().and_then(|rule| rule.r#type.as_mut()) {
        Some(Type::NOutOf(n_out_of)) => Ok(n_out_of),
        _ => Err(ProtocolError::Lookup("an N-out-of signature rule".to_string())),
    }
}

/// Appends a principal to a signature policy.
pub fn add_to_policy(policy: &mut Policy, msp_id: &str, role: MspRoleType) -> Result<(), ProtocolError> {
    let mut envelope: SignaturePolicyEnvelope = decode(&policy.value)?;
    let index = envelope.identities.len();
    envelope.identities.push(role_principal(msp_id, role));
    n_out_of(&mut envelope)?.rules.push(signed_by(index));
    policy.value = envelope.encode_to_vec();
    Ok(())
}

/// Removes every principal for `msp_id` and renumbers the remaining rules.
pub fn remove_from_policy(policy: &mut Policy, msp_id: &str) -> Result<(), ProtocolError> {
    let mut envelope: SignaturePolicyEnvelope = decode(&policy.value)?;
    let mut identities = Vec::with_capacity(envelope.identities.len());
    for identity in envelope.identities.drain(..) {
        let role: MspRole = decode(&identity.principal)?;
        if role.msp_identifier != msp_id {
            identities.push(identity);
        }
    }
    let rules = (0..identities.len()).map(signed_by).collect();
    envelope.identities = identities;
    n_out_of(&mut envelope)?.rules = rules;
    policy.value = envelope.encode_to_vec();
    Ok(())
}

/// The MSP IDs named by a signature policy, in rule order.
pub fn policy_msp_ids(policy: &Policy) -> Result<Vec<String>, ProtocolError> {
    let envelope: SignaturePolicyEnvelope = decode(&policy.value)?;
    envelope
        .identities
        .iter()
        .map(|identity| decode::<MspRole>(&identity.principal).map(|role| role.msp_identifier))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule_indexes(policy: &Policy) -> Vec<i32> {
        let mut envelope: SignaturePolicyEnvelope = decode(&policy.value).unwrap();
        n_out_of(&mut envelope)
            .unwrap()
            .rules
            .iter()
            .map(|rule| match rule.r#type {
                Some(Type::SignedBy(index)) => index,
                _ => panic!("unexpected rule"),
            })
            .collect()
    }

    /// Add and remove keep indexes contiguous.
    #[test]
    fn test_add_and_remove_keep_indexes_contiguous() {
        let mut policy = empty_signature_policy();
        for msp_id in ["Org1MSP", "Org2MSP", "Org3MSP"] {
            add_to_policy(&mut policy, msp_id, MspRoleType::Admin).unwrap();
        }
        assert_eq!(rule_indexes(&policy), vec![0, 1, 2]);

        remove_from_policy(&mut policy, "Org2MSP").unwrap();
        assert_eq!(policy_msp_ids(&policy).unwrap(), vec!["Org1MSP", "Org3MSP"]);
        assert_eq!(rule_indexes(&policy), vec![0, 1]);
    }

    /// Removing unknown principal is a no-op.
    #[test]
    fn test_removing_unknown_principal_is_a_no_op() {
        let mut policy = signature_policy("Org1MSP", MspRoleType::Member);
        remove_from_policy(&mut policy, "Org9MSP").unwrap();
        assert_eq!(policy_msp_ids(&policy).unwrap(), vec!["Org1MSP"]);
        assert_eq!(rule_indexes(&policy), vec![0]);
    }

    /// Implicit-meta policies encode rule and sub policy.
    #[test]
    fn test_implicit_meta_policies_encode_rule_and_sub_policy() {
        let policy = implicit_meta_config_policy(Rule::Majority, ENDORSEMENT);
        assert_eq!(policy.mod_policy, ADMINS);
        let inner = policy.policy.unwrap();
        assert_eq!(inner.r#type, PolicyType::ImplicitMeta as i32);
        let meta: ImplicitMetaPolicy = decode(&inner.value).unwrap();
        assert_eq!(meta.sub_policy, ENDORSEMENT);
        assert_eq!(meta.rule, Rule::Majority as i32);
    }
}
