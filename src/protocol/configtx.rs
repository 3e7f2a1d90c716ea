//! Configuration diff.
//!
//! The ledger validates a config update against the version numbers of the current
//! configuration, so an update is computed by walking the original and updated trees
//! side by side:
//!
//! * an element whose content is unchanged goes into the read set at its current
//!   version and is otherwise left out;
//! * a changed element goes into the write set at version + 1;
//! * a new element goes into the write set at version 0;
//! * a group whose membership or mod policy changed is itself bumped, and every
//!   unchanged member is listed in both sets so the ledger can check them.

use std::collections::BTreeMap;

use super::blocks::{config_block, SeekBehavior};
use super::builder::decode;
use super::ProtocolError;
use crate::framework::Deliverer;
use crate::protos::common::{
    Config, ConfigEnvelope, ConfigGroup, ConfigPolicy, ConfigUpdate, ConfigValue, Envelope, Payload,
};

struct MapUpdate<T> {
    read: BTreeMap<String, T>,
    write: BTreeMap<String, T>,
    same: BTreeMap<String, T>,
    members_changed: bool,
}

impl<T> Default for MapUpdate<T> {
    fn default() -> Self {
        Self {
            read: BTreeMap::new(),
            write: BTreeMap::new(),
            same: BTreeMap::new(),
            members_changed: false,
        }
    }
}

fn policies_update(
    original: &BTreeMap<String, ConfigPolicy>,
    updated: &BTreeMap<String, ConfigPolicy>,
) -> MapUpdate<ConfigPolicy> {
    let mut result = MapUpdate::default();
    for (name, before) in original {
        let Some(after) = updated.get(name) else {
            result.members_changed = true;
            continue;
        };
        if before.mod_policy == after.mod_policy && before.policy == after.policy {
            result.same.insert(
                name.clone(),
                ConfigPolicy {
                    version: before.version,
                    ..Default::default()
                },
            );
        } else {
            result.write.insert(
                name.clone(),
                ConfigPolicy {
                    version: before.version + 1,
                    policy: after.policy.clone(),
                    mod_policy: after.mod_policy.clone(),
                },
            );
        }
    }
    for (name, after) in updated {
        if !original.contains_key(name) {
            result.members_changed = true;
            result.write.insert(
                name.clone(),
                ConfigPolicy {
                    version: 0,
                    policy: after.policy.clone(),
                    mod_policy: after.mod_policy.clone(),
                },
            );
        }
    }
    result
}

fn values_update(
    original: &BTreeMap<String, ConfigValue>,
    updated: &BTreeMap<String, ConfigValue>,
) -> MapUpdate<ConfigValue> {
    let mut result = MapUpdate::default();
    for (name, before) in original {
        let Some(after) = updated.get(name) else {
            result.members_changed = true;
            continue;
        };
        if before.mod_policy == after.mod_policy && before.value == after.value {
            result.same.insert(
                name.clone(),
                ConfigValue {
                    version: before.version,
                    ..Default::default()
                },
            );
        } else {
            result.write.insert(
                name.clone(),
                ConfigValue {
                    version: before.version + 1,
                    value: after.value.clone(),
                    mod_policy: after.mod_policy.clone(),
                },
            );
        }
    }
    for (name, after) in updated {
        if !original.contains_key(name) {
            result.members_changed = true;
            result.write.insert(
                name.clone(),
                ConfigValue {
                    version: 0,
                    value: after.value.clone(),
                    mod_policy: after.mod_policy.clone(),
                },
            );
        }
    }
    result
}

fn groups_update(
    original: &BTreeMap<String, ConfigGroup>,
    updated: &BTreeMap<String, ConfigGroup>,
) -> MapUpdate<ConfigGroup> {
    let mut result = MapUpdate::default();
    for (name, before) in original {
        let Some(after) = updated.get(name) else {
            result.members_changed = true;
            continue;
        };
        let (read, write, changed) = group_update(before, after);
        if changed {
            result.read.insert(name.clone(), read);
            result.write.insert(name.clone(), write);
        } else {
            result.same.insert(name.clone(), read);
        }
    }
    for (name, after) in updated {
        if !original.contains_key(name) {
            result.members_changed = true;
            let (_, write, _) = group_update(&ConfigGroup::default(), after);
            result.write.insert(
                name.clone(),
                ConfigGroup {
                    version: 0,
                    mod_policy: after.mod_policy.clone(),
                    ..write
                },
            );
        }
    }
    result
}

fn merge_same<T: Clone>(update: &mut MapUpdate<T>) {
    for (name, same) in std::mem::take(&mut update.same) {
        update.read.insert(name.clone(), same.clone());
        update.write.insert(name, same);
    }
}

/// Returns the read set, the write set, and whether anything under the group changed.
fn group_update(original: &ConfigGroup, updated: &ConfigGroup) -> (ConfigGroup, ConfigGroup, bool) {
    let mut policies = policies_update(&original.policies, &updated.policies);
    let mut values = values_update(&original.values, &updated.values);
    let mut groups = groups_update(&original.groups, &updated.groups);

    let membership_changed = policies.members_changed
        || values.members_changed
        || groups.members_changed
        || original.mod_policy != updated.mod_policy;

    if !membership_changed {
        let untouched = policies.read.is_empty()
            && policies.write.is_empty()
            && values.read.is_empty()
            && values.write.is_empty()
            && groups.read.is_empty()
            && groups.write.is_empty();
        if untouched {
            let version_only = ConfigGroup {
                version: original.version,
                ..Default::default()
            };
            return (version_only.clone(), version_only, false);
        }
        let read = ConfigGroup {
            version: original.version,
            policies: policies.read,
            values: values.read,
            groups: groups.read,
            ..Default::default()
        };
        let write = ConfigGroup {
            version: original.version,
            policies: policies.write,
            values: values.write,
            groups: groups.write,
            ..Default::default()
        };
        return (read, write, true);
    }

    merge_same(&mut policies);
    merge_same(&mut values);
    merge_same(&mut groups);
    let read = ConfigGroup {
        version: original.version,
        policies: policies.read,
        values: values.read,
        groups: groups.read,
        ..Default::default()
    };
    let write = ConfigGroup {
        version: original.version + 1,
        policies: policies.write,
        values: values.write,
        groups: groups.write,
        mod_policy: updated.mod_policy.clone(),
    };
    (read, write, true)
}

/// Computes the update that turns `original` into `updated` on `channel`.
pub fn compute_update(channel: &str, original: &Config, updated: &Config) -> Result<ConfigUpdate, ProtocolError> {
    let original_group = original
        .channel_group
        .as_ref()
        .ok_or(ProtocolError::MissingField("original channel group"))?;
    let updated_group = updated
        .channel_group
        .as_ref()
        .ok_or(ProtocolError::MissingField("updated channel group"))?;
    let (read_set, write_set, changed) = group_update(original_group, updated_group);
    if !changed {
        return Err(ProtocolError::NoDifferences);
    }
    Ok(ConfigUpdate {
        channel_id: channel.to_string(),
        read_set: Some(read_set),
        write_set: Some(write_set),
        isolated_data: BTreeMap::new(),
    })
}

/// Extracts the configuration carried by a config block.
pub fn config_from_block(block: &crate::protos::common::Block) -> Result<Config, ProtocolError> {
    let data = block.data.as_ref().map(|data| data.data.as_slice()).unwrap_or_default();
    let [envelope] = data else {
        return Err(ProtocolError::ConfigBlockShape(data.len()));
    };
    let envelope: Envelope = decode(envelope)?;
    let payload: Payload = decode(&envelope.payload)?;
    let config_envelope: ConfigEnvelope = decode(&payload.data)?;
    config_envelope
        .config
        .ok_or(ProtocolError::MissingField("config"))
}

/// Fetches the current configuration of a channel.
pub async fn channel_config<D: Deliverer + ?Sized>(deliverer: &D, channel: &str) -> Result<Config, ProtocolError> {
    let block = config_block(deliverer, channel, SeekBehavior::FailIfNotReady).await?;
    config_from_block(&block)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(version: u64, groups: &[(&str, ConfigGroup)]) -> ConfigGroup {
        ConfigGroup {
            version,
            groups: groups
                .iter()
                .map(|(name, group)| (name.to_string(), group.clone()))
                .collect(),
            mod_policy: "Admins".to_string(),
            ..Default::default()
        }
    }

    fn config(channel_group: ConfigGroup) -> Config {
        Config {
            sequence: 3,
            channel_group: Some(channel_group),
        }
    }

    /// Identical configs have no differences.
    #[test]
    fn test_identical_configs_have_no_differences() {
        let original = config(group(0, &[("Application", group(1, &[]))]));
        let result = compute_update("channel1", &original, &original.clone());
        assert!(matches!(result, Err(ProtocolError::NoDifferences)));
    }

    /// Changed value is bumped in write set only.
    #[test]
    fn test_changed_value_is_bumped_in_write_set_only() {
        let mut application = group(1, &[]);
        application.values.insert(
            "Capabilities".to_string(),
            ConfigValue {
                version: 2,
                value: b"old".to_vec(),
                mod_policy: "Admins".to_string(),
            },
        );
        let original = config(group(0, &[("Application", application.clone())]));
        let mut updated = original.clone();
        updated.channel_group.as_mut().unwrap().groups.get_mut("Application").unwrap().values
            .get_mut("Capabilities").unwrap().value = b"new".to_vec();

        let update = compute_update("channel1", &original, &updated).unwrap();
        let write = &update.write_set.unwrap().groups["Application"];
        assert_eq!(write.version, 1, "membership unchanged, group version kept");
        assert_eq!(write.values["Capabilities"].version, 3);
        assert_eq!(write.values["Capabilities"].value, b"new");
        let read = &update.read_set.unwrap().groups["Application"];
        assert!(read.values.is_empty());
    }

    /// Removed policy bumps group.
    #[test]
    fn test_removed_policy_bumps_group() {
        let mut application = group(1, &[]);
        application.policies.insert("Readers".to_string(), ConfigPolicy::default());
        application.policies.insert("Writers".to_string(), ConfigPolicy::default());
        let original = config(group(0, &[("Application", application)]));
        let mut updated = original.clone();
        updated.channel_group.as_mut().unwrap().groups.get_mut("Application").unwrap()
            .policies.remove("Writers");

        let update = compute_update("channel1", &original, &updated).unwrap();
        let write = &update.write_set.unwrap().groups["Application"];
        assert_eq!(write.version, 2);
        assert_eq!(write.policies.keys().collect::<Vec<_>>(), vec!["Readers"]);
    }
}
