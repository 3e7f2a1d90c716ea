//! Network configuration.
//!
//! The configuration is a single JSON document carried by the `MICROFAB_CONFIG`
//! environment variable and overlaid on the defaults below; any field the document
//! leaves out keeps its default value.
//!
//! | Field                     | Default                 |
//! |---------------------------|-------------------------|
//! | `domain`                  | `127-0-0-1.nip.io`      |
//! | `port`                    | `8080`                  |
//! | `directory`               | `$MICROFAB_HOME/data`   |
//! | `ordering_organization`   | `Orderer`               |
//! | `endorsing_organizations` | `[Org1]`                |
//! | `channels`                | `channel1` with `Org1`  |
//! | `capability_level`        | `V2_0`                  |
//! | `couchdb`                 | `true`                  |
//! | `certificate_authorities` | `true`                  |
//! | `timeout`                 | `30s`                   |
//! | `tls`                     | disabled                |

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{msp_id_for, ConfigError};

/// Environment variable carrying the configuration document.
pub const CONFIG_ENV: &str = "MICROFAB_CONFIG";

/// Environment variable naming the installation home directory.
pub const HOME_ENV: &str = "MICROFAB_HOME";

/// First port handed out to components.
pub const PORT_RANGE_START: u16 = 2000;

/// One past the last port handed out to components.
pub const PORT_RANGE_END: u16 = 3000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationConfig {
    pub name: String,
}

impl OrganizationConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    pub endorsing_organizations: Vec<String>,
    /// Overrides the network-wide capability level for this channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability_level: Option<String>,
}

/// TLS settings. Each material field is either a file path or base64-encoded PEM.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca: Option<String>,
}

/// Externally supplied TLS material, resolved to PEM text.
#[derive(Debug, Clone)]
pub struct TlsMaterial {
    pub certificate: String,
    pub private_key: String,
    pub ca: String,
}

impl TlsConfig {
    fn supplied(&self) -> usize {
        [&self.certificate, &self.private_key, &self.ca]
            .iter()
            .filter(|field| field.is_some())
            .count()
    }

    /// Resolves the externally supplied material, if any was configured.
    pub fn material(&self) -> Result<Option<TlsMaterial>, ConfigError> {
        match (&self.certificate, &self.private_key, &self.ca) {
            (Some(certificate), Some(private_key), Some(ca)) => Ok(Some(TlsMaterial {
                certificate: read_material("certificate", certificate)?,
                private_key: read_material("private key", private_key)?,
                ca: read_material("CA", ca)?,
            })),
            (None, None, None) => Ok(None),
            _ => Err(ConfigError::IncompleteTls),
        }
    }
}

fn read_material(field: &'static str, value: &str) -> Result<String, ConfigError> {
    if let Ok(contents) = fs::read_to_string(value) {
        return Ok(contents);
    }
    let decoded = base64::decode(value).map_err(|e| ConfigError::TlsMaterial {
        field,
        reason: e.to_string(),
    })?;
    String::from_utf8(decoded).map_err(|e| ConfigError::TlsMaterial {
        field,
        reason: e.to_string(),
    })
}

/// The complete network configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub domain: String,
    pub port: u32,
    pub directory: PathBuf,
    pub ordering_organization: OrganizationConfig,
    pub endorsing_organizations: Vec<OrganizationConfig>,
    pub channels: Vec<ChannelConfig>,
    pub capability_level: String,
    pub couchdb: bool,
    pub certificate_authorities: bool,
    pub timeout: String,
    pub tls: TlsConfig,
}

impl Default for Config {
    fn default() -> Self {
        let home = home_directory().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            domain: "127-0-0-1.nip.io".to_string(),
            port: 8080,
            directory: home.join("data"),
            ordering_organization: OrganizationConfig::new("Orderer"),
            endorsing_organizations: vec![OrganizationConfig::new("Org1")],
            channels: vec![ChannelConfig {
                name: "channel1".to_string(),
                endorsing_organizations: vec!["Org1".to_string()],
                capability_level: None,
            }],
            capability_level: "V2_0".to_string(),
            couchdb: true,
            certificate_authorities: true,
            timeout: "30s".to_string(),
            tls: TlsConfig::default(),
        }
    }
}

/// The installation home: `$MICROFAB_HOME`, or the current directory when unset.
pub fn home_directory() -> Result<PathBuf, ConfigError> {
    match env::var_os(HOME_ENV) {
        Some(home) => Ok(PathBuf::from(home)),
        None => env::current_dir().map_err(ConfigError::Home),
    }
}

impl Config {
    /// Loads the configuration from the environment and validates it.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_variable(env::var(CONFIG_ENV))
    }

    fn from_variable(variable: Result<String, env::VarError>) -> Result<Self, ConfigError> {
        match variable {
            Ok(document) => Self::from_json(&document),
            Err(env::VarError::NotPresent) => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
            Err(env::VarError::NotUnicode(_)) => Err(ConfigError::NotUnicode { variable: CONFIG_ENV }),
        }
    }

    /// Overlays a JSON document on the defaults and validates the result.
    pub fn from_json(document: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(document)?;
        debug!(?config, "Loaded configuration");
        config.validate()?;
        Ok(config)
    }

    /// Parsed startup timeout.
    pub fn timeout(&self) -> Result<Duration, ConfigError> {
        humantime::parse_duration(&self.timeout).map_err(|source| ConfigError::Timeout {
            value: self.timeout.clone(),
            source,
        })
    }

    /// The external port as a socket port, once validated.
    pub fn external_port(&self) -> u16 {
        u16::try_from(self.port).unwrap_or_default()
    }

    /// The capability level for a channel, falling back to the network-wide level.
    pub fn channel_capability_level<'a>(&'a self, channel: &'a ChannelConfig) -> &'a str {
        channel
            .capability_level
            .as_deref()
            .filter(|level| !level.is_empty())
            .unwrap_or(&self.capability_level)
    }

    /// SHA-256 over the canonical JSON form. Any field change produces a different hash.
    pub fn hash(&self) -> Result<Vec<u8>, ConfigError> {
        let canonical = serde_json::to_vec(self)?;
        Ok(Sha256::digest(&canonical).to_vec())
    }

    /// Checks everything that can be checked without touching the network.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 || self.port > u32::from(u16::MAX) {
            return Err(ConfigError::InvalidPort { port: self.port });
        }
        if (u32::from(PORT_RANGE_START)..u32::from(PORT_RANGE_END)).contains(&self.port) {
            return Err(ConfigError::PortInPool {
                port: self.port,
                start: PORT_RANGE_START,
                end: PORT_RANGE_END,
            });
        }
        self.timeout()?;

        let mut msp_ids = HashSet::new();
        let organizations =
            std::iter::once(&self.ordering_organization).chain(&self.endorsing_organizations);
        for organization in organizations {
            if organization.name.trim().is_empty() {
                return Err(ConfigError::EmptyOrganizationName);
            }
            let msp_id = msp_id_for(&organization.name);
            if !msp_ids.insert(msp_id.clone()) {
                return Err(ConfigError::DuplicateMspId {
                    name: organization.name.clone(),
                    msp_id,
                });
            }
        }

        for channel in &self.channels {
            if channel.name.is_empty() {
                return Err(ConfigError::EmptyChannelName);
            }
            if channel.endorsing_organizations.is_empty() {
                return Err(ConfigError::NoChannelOrganizations {
                    channel: channel.name.clone(),
                });
            }
            for organization in &channel.endorsing_organizations {
                let known = self
                    .endorsing_organizations
                    .iter()
                    .any(|candidate| &candidate.name == organization);
                if !known {
                    return Err(ConfigError::UnknownOrganization {
                        channel: channel.name.clone(),
                        organization: organization.clone(),
                    });
                }
            }
        }

        match self.tls.supplied() {
            0 => {}
            3 if self.tls.enabled => {}
            3 => return Err(ConfigError::TlsNotEnabled),
            _ => return Err(ConfigError::IncompleteTls),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// An unset variable means defaults; one that is not unicode is an error, never defaults.
    #[test]
    fn test_config_variable_must_be_unicode() {
        let config = Config::from_variable(Err(env::VarError::NotPresent)).unwrap();
        assert_eq!(config.port, Config::default().port);

        let invalid = std::ffi::OsString::from("not checked");
        let error = Config::from_variable(Err(env::VarError::NotUnicode(invalid))).unwrap_err();
        assert!(matches!(error, ConfigError::NotUnicode { variable: CONFIG_ENV }));
    }

    /// Defaults are valid.
    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.timeout().unwrap(), Duration::from_secs(30));
        assert_eq!(config.channels[0].endorsing_organizations, vec!["Org1"]);
    }

    /// Overlay keeps missing fields.
    #[test]
    fn test_overlay_keeps_missing_fields() {
        let config = Config::from_json(r#"{"port": 9090, "couchdb": false}"#).unwrap();
        assert_eq!(config.port, 9090);
        assert!(!config.couchdb);
        assert_eq!(config.domain, "127-0-0-1.nip.io");
        assert_eq!(config.ordering_organization.name, "Orderer");
    }

    /// Rejects invalid JSON.
    #[test]
    fn test_rejects_invalid_json() {
        assert!(matches!(Config::from_json("{port"), Err(ConfigError::Json(_))));
    }

    /// Rejects ports outside range or inside pool.
    #[test]
    fn test_rejects_ports_outside_range_or_inside_pool() {
        assert!(matches!(
            Config::from_json(r#"{"port": 70000}"#),
            Err(ConfigError::InvalidPort { port: 70000 })
        ));
        assert!(matches!(
            Config::from_json(r#"{"port": 2500}"#),
            Err(ConfigError::PortInPool { port: 2500, .. })
        ));
        assert!(matches!(Config::from_json(r#"{"port": -1}"#), Err(ConfigError::Json(_))));
    }

    /// Rejects bad timeout.
    #[test]
    fn test_rejects_bad_timeout() {
        assert!(matches!(
            Config::from_json(r#"{"timeout": "soon"}"#),
            Err(ConfigError::Timeout { .. })
        ));
    }

    /// Rejects colliding MSP IDs.
    #[test]
    fn test_rejects_colliding_msp_ids() {
        let document = r#"{"endorsing_organizations": [{"name": "Org1"}, {"name": "Org-1"}],
                           "channels": []}"#;
        assert!(matches!(
            Config::from_json(document),
            Err(ConfigError::DuplicateMspId { .. })
        ));
    }

    /// Rejects unknown channel members.
    #[test]
    fn test_rejects_unknown_channel_members() {
        let document = r#"{"channels": [{"name": "c", "endorsing_organizations": ["Org9"]}]}"#;
        assert!(matches!(
            Config::from_json(document),
            Err(ConfigError::UnknownOrganization { .. })
        ));
    }

    /// Rejects partial or unused TLS material.
    #[test]
    fn test_rejects_partial_or_unused_tls_material() {
        let partial = r#"{"tls": {"enabled": true, "certificate": "x"}}"#;
        assert!(matches!(Config::from_json(partial), Err(ConfigError::IncompleteTls)));
        let unused = r#"{"tls": {"certificate": "x", "private_key": "y", "ca": "z"}}"#;
        assert!(matches!(Config::from_json(unused), Err(ConfigError::TlsNotEnabled)));
    }

    /// Hash changes with any field.
    #[test]
    fn test_hash_changes_with_any_field() {
        let config = Config::default();
        let mut changed = config.clone();
        changed.capability_level = "V1_4_2".to_string();
        assert_eq!(config.hash().unwrap(), config.clone().hash().unwrap());
        assert_ne!(config.hash().unwrap(), changed.hash().unwrap());
    }

    /// Channel capability override.
    #[test]
    fn test_channel_capability_override() {
        let mut config = Config::default();
        assert_eq!(config.channel_capability_level(&config.channels[0]), "V2_0");
        config.channels[0].capability_level = Some("V1_4_2".to_string());
        let channel = config.channels[0].clone();
        assert_eq!(config.channel_capability_level(&channel), "V1_4_2");
    }
}
