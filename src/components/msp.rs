//! MSP and TLS material on disk.

use std::path::{Path, PathBuf};

use tokio::fs;

use super::error::ComponentError;
use crate::identity::Identity;

/// NodeOU classification shared by every MSP directory.
pub const NODE_OUS: &str = "NodeOUs:
  Enable: true
  ClientOUIdentifier:
    Certificate: cacerts/ca.pem
    OrganizationalUnitIdentifier: client
  AdminOUIdentifier:
    Certificate: cacerts/ca.pem
    OrganizationalUnitIdentifier: admin
  PeerOUIdentifier:
    Certificate: cacerts/ca.pem
    OrganizationalUnitIdentifier: peer
  OrdererOUIdentifier:
    Certificate: cacerts/ca.pem
    OrganizationalUnitIdentifier: orderer
";

pub(crate) async fn create_dirs(dirs: &[PathBuf]) -> Result<(), ComponentError> {
    for dir in dirs {
        fs::create_dir_all(dir).await.map_err(ComponentError::io(dir))?;
    }
    Ok(())
}

pub(crate) async fn write_file(path: PathBuf, contents: impl AsRef<[u8]>) -> Result<(), ComponentError> {
    fs::write(&path, contents).await.map_err(ComponentError::io(path))
}

/// Writes an MSP directory for `identity` that an ordering or endorsing node (or an
/// administrator's tooling) can load.
pub async fn write_msp_directory(directory: &Path, identity: &Identity) -> Result<(), ComponentError> {
    create_dirs(&[
        directory.to_path_buf(),
        directory.join("admincerts"),
        directory.join("cacerts"),
        directory.join("keystore"),
        directory.join("signcerts"),
    ])
    .await?;
    write_file(directory.join("config.yaml"), NODE_OUS).await?;
    write_file(directory.join("keystore").join("key.pem"), identity.private_key_pem()).await?;
    write_file(directory.join("signcerts").join("cert.pem"), identity.certificate_pem()).await?;
    if let Some(ca) = identity.ca_pem() {
        write_file(directory.join("cacerts").join("ca.pem"), ca).await?;
    }
    Ok(())
}

/// Paths of TLS material written for a component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub certificate: PathBuf,
    pub private_key: PathBuf,
    pub ca: PathBuf,
}

impl TlsFiles {
    pub fn in_directory(directory: &Path) -> Self {
        Self {
            certificate: directory.join("cert.pem"),
            private_key: directory.join("key.pem"),
            ca: directory.join("ca.pem"),
        }
    }
}

/// Writes `cert.pem`, `key.pem` and `ca.pem` for the TLS identity into `directory`.
pub async fn write_tls_directory(directory: &Path, tls: &Identity) -> Result<TlsFiles, ComponentError> {
    create_dirs(&[directory.to_path_buf()]).await?;
    let files = TlsFiles::in_directory(directory);
    write_file(files.certificate.clone(), tls.certificate_pem()).await?;
    write_file(files.private_key.clone(), tls.private_key_pem()).await?;
    write_file(files.ca.clone(), tls.trust_anchor_pem()).await?;
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// MSP directory layout.
    #[tokio::test]
    async fn test_msp_directory_layout() {
        let dir = tempfile::tempdir().unwrap();
        let ca = Identity::builder("Org1 CA").ca(true).build().unwrap();
        let admin = Identity::builder("Org1 Admin").signed_by(&ca).build().unwrap();
        let msp = dir.path().join("msp");
        write_msp_directory(&msp, &admin).await.unwrap();

        assert!(msp.join("admincerts").is_dir());
        assert_eq!(std::fs::read_to_string(msp.join("config.yaml")).unwrap(), NODE_OUS);
        assert_eq!(
            std::fs::read_to_string(msp.join("signcerts/cert.pem")).unwrap(),
            admin.certificate_pem()
        );
        assert_eq!(
            std::fs::read_to_string(msp.join("cacerts/ca.pem")).unwrap(),
            ca.certificate_pem()
        );
    }

    /// A self-signed identity has no cacerts.
    #[tokio::test]
    async fn test_self_signed_identity_has_no_cacerts() {
        let dir = tempfile::tempdir().unwrap();
        let ca = Identity::builder("Org1 CA").ca(true).build().unwrap();
        write_msp_directory(dir.path(), &ca).await.unwrap();
        assert!(!dir.path().join("cacerts/ca.pem").exists());
    }
}
