//! Per-organization certificate authorities.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use serde::Deserialize;
use tracing::{debug, info, instrument};

use super::endpoint::Endpoint;
use super::error::ComponentError;
use super::msp::{create_dirs, write_file, write_tls_directory, TlsFiles};
use super::orderer::path_string;
use crate::identity::Identity;
use crate::model::Organization;
use crate::supervisor::{AllOf, HttpStatus, ProcessSpec, ReadinessProbe, Supervisor};

pub const CA_PROGRAM: &str = "fabric-ca-server";

/// Bootstrap registrar created by `--boot`.
pub const BOOTSTRAP_ID: &str = "admin";
pub const BOOTSTRAP_SECRET: &str = "adminpw";

/// A `fabric-ca-server` issuing from an organization's CA identity.
#[derive(Debug, Clone)]
pub struct CaNode {
    organization: Arc<Organization>,
    directory: PathBuf,
    api: Endpoint,
    operations: Endpoint,
    tls: Option<Identity>,
}

#[derive(Debug, Deserialize)]
struct EnrollResponse {
    success: bool,
    result: Option<EnrollResult>,
}

#[derive(Debug, Deserialize)]
struct EnrollResult {
    #[serde(rename = "Cert")]
    cert: String,
}

impl CaNode {
    pub fn new(
        organization: Arc<Organization>,
        directory: impl Into<PathBuf>,
        api: Endpoint,
        operations: Endpoint,
        tls: Option<Identity>,
    ) -> Self {
        Self {
            organization,
            directory: directory.into(),
            api,
            operations,
            tls,
        }
    }

    pub fn organization(&self) -> &Arc<Organization> {
        &self.organization
    }

    /// Component ID and CA name, `<org label>ca`.
    pub fn id(&self) -> String {
        format!("{}ca", self.organization.label())
    }

    pub fn api(&self) -> &Endpoint {
        &self.api
    }

    pub fn operations(&self) -> &Endpoint {
        &self.operations
    }

    fn tls_ca(&self) -> Option<&str> {
        self.tls.as_ref().map(Identity::trust_anchor_pem)
    }

    fn client(&self) -> Result<reqwest::Client, ComponentError> {
        let mut builder = reqwest::Client::builder();
        if let Some(ca) = self.tls_ca() {
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(ca.as_bytes())?);
        }
        Ok(builder.build()?)
    }

    pub fn process_spec(&self, tls: Option<&TlsFiles>) -> ProcessSpec {
        let mut spec = ProcessSpec::new(self.id(), CA_PROGRAM, self.directory.join("logs").join("ca.log"))
            .current_dir(&self.directory)
            .args([
                "start".to_string(),
                "--boot".to_string(),
                format!("{BOOTSTRAP_ID}:{BOOTSTRAP_SECRET}"),
                "--ca.certfile".to_string(),
                path_string(&self.directory.join("ca-cert.pem")),
                "--ca.keyfile".to_string(),
                path_string(&self.directory.join("ca-key.pem")),
                "--port".to_string(),
                self.api.port().to_string(),
                "--operations.listenaddress".to_string(),
                format!("0.0.0.0:{}", self.operations.port()),
                "--ca.name".to_string(),
                self.id(),
            ]);
        if let Some(files) = tls {
            let certificate = path_string(&files.certificate);
            let key = path_string(&files.private_key);
            spec = spec.args([
                "--tls.enabled".to_string(),
                "--tls.certfile".to_string(),
                certificate.clone(),
                "--tls.keyfile".to_string(),
                key.clone(),
                "--operations.tls.enabled".to_string(),
                "--operations.tls.certfile".to_string(),
                certificate,
                "--operations.tls.keyfile".to_string(),
                key,
            ]);
        }
        spec
    }

    /// `/healthz` on the operations endpoint and `/api/v1/cainfo` on the API endpoint.
    fn probe(&self) -> Box<dyn ReadinessProbe> {
        let healthz = HttpStatus::healthz(self.operations.internal(), self.tls_ca());
        let mut cainfo = self.api.internal().clone();
        cainfo.set_path("/api/v1/cainfo");
        let cainfo = HttpStatus::new(cainfo, 200, self.tls_ca());
        Box::new(AllOf(vec![Box::new(healthz), Box::new(cainfo)]))
    }

    #[instrument(skip_all, fields(org = %self.organization.name()))]
    pub async fn start(&self, timeout: Duration) -> Result<Supervisor, ComponentError> {
        create_dirs(&[self.directory.join("logs")]).await?;
        let ca = self.organization.ca();
        write_file(self.directory.join("ca-cert.pem"), ca.certificate_pem()).await?;
        write_file(self.directory.join("ca-key.pem"), ca.private_key_pem()).await?;
        let tls = match &self.tls {
            Some(tls) => Some(write_tls_directory(&self.directory.join("tls"), tls).await?),
            None => None,
        };
        let supervisor = Supervisor::start(self.process_spec(tls.as_ref()), self.probe(), timeout).await?;
        info!(api = %self.api.internal(), "CA started");
        Ok(supervisor)
    }

    /// Enrolls `id` with `secret` and returns the issued identity, named `name`.
    #[instrument(skip(self, secret))]
    pub async fn enroll(&self, name: &str, id: &str, secret: &str) -> Result<Identity, ComponentError> {
        let (csr, private_key) = certificate_request(id)?;
        let mut url = self.api.internal().clone();
        url.set_path("/api/v1/enroll");
        let response = self
            .client()?
            .post(url)
            .basic_auth(id, Some(secret))
            .json(&serde_json::json!({ "certificate_request": csr }))
            .send()
            .await?;
        if response.status().as_u16() != 201 {
            return Err(ComponentError::Enroll(response.status().to_string()));
        }
        let body: EnrollResponse = response.json().await?;
        debug!(success = body.success, "Enroll response");
        let certificate = match body.result {
            Some(result) if body.success => result.cert,
            _ => return Err(ComponentError::Enroll("unsuccessful response".to_string())),
        };
        let certificate = base64::decode(certificate).map_err(|e| ComponentError::Enroll(e.to_string()))?;
        let certificate = String::from_utf8(certificate).map_err(|e| ComponentError::Enroll(e.to_string()))?;
        Ok(Identity::from_pem(
            name,
            &certificate,
            &private_key,
            Some(self.organization.ca().certificate_pem()),
        )?)
    }

    /// Enrolls the bootstrap registrar and binds it as the organization's CA admin.
    pub async fn enroll_admin(&self) -> Result<(), ComponentError> {
        let name = format!("{} CA Admin", self.organization.name());
        let identity = self.enroll(&name, BOOTSTRAP_ID, BOOTSTRAP_SECRET).await?;
        if self.organization.set_ca_admin(identity).is_err() {
            debug!("CA admin already bound");
        }
        Ok(())
    }
}

/// A PEM certificate signing request for `common_name` and the PEM private key it was
/// made with.
fn certificate_request(common_name: &str) -> Result<(String, String), ComponentError> {
    let enroll = |e: rcgen::Error| ComponentError::Enroll(e.to_string());
    let key_pair = KeyPair::generate().map_err(enroll)?;
    let mut params = CertificateParams::default();
    let mut subject = DistinguishedName::new();
    subject.push(DnType::CommonName, common_name);
    params.distinguished_name = subject;
    let csr = params.serialize_request(&key_pair).map_err(enroll)?;
    Ok((csr.pem().map_err(enroll)?, key_pair.serialize_pem()))
}
