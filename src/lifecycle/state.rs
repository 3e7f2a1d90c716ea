//! Bootstrap state persisted between runs.
//!
//! ## Architecture Note
//! A restart against an unchanged configuration must come back as the same network: the
//! same CA material, and no attempt to create channels that already exist on the ledger.
//! The state file records the configuration hash next to every organization's CA and the
//! TLS identity. When the hash still matches, that material is rehydrated; when it does
//! not, the working directory is wiped and the network bootstrapped from scratch.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};

use super::NetworkError;
use crate::identity::{base64_bytes, Identity, IdentityBlob, IdentityError};

pub const STATE_FILE: &str = "state.json";

/// `{hash, cas: {orgName: identityBlob}, tls: identityBlob|null}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(with = "base64_bytes")]
    pub hash: Vec<u8>,
    pub cas: BTreeMap<String, IdentityBlob>,
    pub tls: Option<IdentityBlob>,
}

impl PersistedState {
    pub fn new(hash: Vec<u8>) -> Self {
        Self {
            hash,
            cas: BTreeMap::new(),
            tls: None,
        }
    }

    pub fn path(directory: &Path) -> PathBuf {
        directory.join(STATE_FILE)
    }

    /// Reads the state file in `directory`. A missing file is not an error.
    pub async fn load(directory: &Path) -> Result<Option<Self>, NetworkError> {
        let path = Self::path(directory);
        let contents = match fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No state file");
                return Ok(None);
            }
            Err(e) => return Err(NetworkError::io(path)(e)),
        };
        let state = serde_json::from_slice(&contents).map_err(|source| NetworkError::State { path, source })?;
        Ok(Some(state))
    }

    pub async fn save(&self, directory: &Path) -> Result<(), NetworkError> {
        let path = Self::path(directory);
        let contents = serde_json::to_vec(self).map_err(|source| NetworkError::State {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, contents).await.map_err(NetworkError::io(&path))?;
        info!(path = %path.display(), "Saved state");
        Ok(())
    }

    /// Whether this state was written for a configuration with `hash`.
    pub fn matches(&self, hash: &[u8]) -> bool {
        self.hash == hash
    }

    pub fn set_ca(&mut self, organization: &str, ca: &Identity) {
        self.cas.insert(organization.to_string(), ca.to_blob());
    }

    pub fn ca(&self, organization: &str) -> Result<Option<Identity>, IdentityError> {
        self.cas.get(organization).map(Identity::from_blob).transpose()
    }

    pub fn tls(&self) -> Result<Option<Identity>, IdentityError> {
        self.tls.as_ref().map(Identity::from_blob).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A missing state file loads as `None`.
    #[tokio::test]
    async fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(PersistedState::load(dir.path()).await.unwrap().is_none());
    }

    /// Identities survive a save.
    #[tokio::test]
    async fn test_identities_survive_a_save() {
        let dir = tempfile::tempdir().unwrap();
        let ca = Identity::builder("Org1 CA").ca(true).build().unwrap();
        let tls = Identity::builder("*.127-0-0-1.nip.io").build().unwrap();
        let mut state = PersistedState::new(vec![1, 2, 3]);
        state.set_ca("Org1", &ca);
        state.tls = Some(tls.to_blob());
        state.save(dir.path()).await.unwrap();

        let loaded = PersistedState::load(dir.path()).await.unwrap().unwrap();
        assert!(loaded.matches(&[1, 2, 3]));
        assert!(!loaded.matches(&[1, 2, 4]));
        let restored = loaded.ca("Org1").unwrap().unwrap();
        assert_eq!(restored.certificate_pem(), ca.certificate_pem());
        assert_eq!(restored.private_key_pem(), ca.private_key_pem());
        assert!(loaded.ca("Org2").unwrap().is_none());
        assert_eq!(loaded.tls().unwrap().unwrap().certificate_pem(), tls.certificate_pem());
    }

    /// Wire form uses base64.
    #[tokio::test]
    async fn test_wire_form_uses_base64() {
        let dir = tempfile::tempdir().unwrap();
        PersistedState::new(vec![0xff]).save(dir.path()).await.unwrap();
        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join(STATE_FILE)).unwrap()).unwrap();
        assert_eq!(raw["hash"], "/w==");
        assert_eq!(raw["cas"], serde_json::json!({}));
        assert!(raw["tls"].is_null());
    }

    /// Corrupt file is an error.
    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(STATE_FILE), b"not json").unwrap();
        let error = PersistedState::load(dir.path()).await.unwrap_err();
        assert!(matches!(error, NetworkError::State { .. }));
    }
}
