//! The ordering node.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use prost::Message;
use tracing::{debug, info, instrument};

use super::endpoint::Endpoint;
use super::error::ComponentError;
use super::msp::{create_dirs, write_file, write_msp_directory, write_tls_directory, TlsFiles};
use crate::clients::{grpc, OrdererConnection};
use crate::framework::SigningIdentity;
use crate::identity::Identity;
use crate::model::Organization;
use crate::protocol::genesis::{genesis_block, Consensus, GenesisParameters};
use crate::supervisor::{AllOf, Check, HttpStatus, ProcessSpec, ReadinessProbe, Supervisor};

pub const ORDERER_PROGRAM: &str = "orderer";

/// The single ordering node of the network.
#[derive(Debug, Clone)]
pub struct OrdererNode {
    organization: Arc<Organization>,
    identity: Identity,
    directory: PathBuf,
    api: Endpoint,
    operations: Endpoint,
    tls: Option<Identity>,
}

impl OrdererNode {
    /// Issues the node identity (`<org> Orderer`, OU `orderer`) from the organization's CA.
    pub fn new(
        organization: Arc<Organization>,
        directory: impl Into<PathBuf>,
        api: Endpoint,
        operations: Endpoint,
        tls: Option<Identity>,
    ) -> Result<Self, ComponentError> {
        let identity = Identity::builder(format!("{} Orderer", organization.name()))
            .organizational_unit("orderer")
            .signed_by(organization.ca())
            .build()?;
        Ok(Self {
            organization,
            identity,
            directory: directory.into(),
            api,
            operations,
            tls,
        })
    }

    pub fn organization(&self) -> &Arc<Organization> {
        &self.organization
    }

    pub fn msp_id(&self) -> &str {
        self.organization.msp_id()
    }

    pub fn api(&self) -> &Endpoint {
        &self.api
    }

    pub fn operations(&self) -> &Endpoint {
        &self.operations
    }

    pub fn tls(&self) -> Option<&Identity> {
        self.tls.as_ref()
    }

    pub fn genesis_path(&self) -> PathBuf {
        self.directory.join("config").join("genesisblock")
    }

    fn tls_ca(&self) -> Option<&str> {
        self.tls.as_ref().map(Identity::trust_anchor_pem)
    }

    fn consensus(&self) -> Consensus {
        match &self.tls {
            Some(tls) => Consensus::EtcdRaft {
                host: self.api.external_hostname().to_string(),
                port: u32::from(self.api.external_port()),
                tls_certificate: tls.certificate_pem().to_string(),
            },
            None => Consensus::Solo,
        }
    }

    /// Builds the system channel genesis block for `consortium` and writes it to the
    /// bootstrap location.
    #[instrument(skip_all, fields(consortium = consortium.len()))]
    pub async fn write_genesis_block(&self, consortium: &[&Organization], capability_level: &str) -> Result<(), ComponentError> {
        create_dirs(&[self.directory.join("config")]).await?;
        let signer = SigningIdentity::new(self.msp_id(), self.identity.clone());
        let parameters = GenesisParameters {
            ordering_organization: &self.organization,
            consortium,
            orderer_address: self.api.external_host(),
            capability_level,
            consensus: self.consensus(),
            tls_ca: self.tls_ca(),
        };
        let block = genesis_block(&signer, &parameters)?;
        write_file(self.genesis_path(), block.encode_to_vec()).await?;
        debug!(path = %self.genesis_path().display(), "Genesis block written");
        Ok(())
    }

    /// Environment for `orderer start`.
    pub fn process_spec(&self, tls: Option<&TlsFiles>) -> ProcessSpec {
        let dir = |name: &str| path_string(&self.directory.join(name));
        let data = self.directory.join("data");
        let mut spec = ProcessSpec::new("orderer", ORDERER_PROGRAM, self.directory.join("logs").join("orderer.log"))
            .arg("start")
            .env("FABRIC_LOGGING_SPEC", "info")
            .env("ORDERER_GENERAL_LOCALMSPDIR", dir("msp"))
            .env("ORDERER_GENERAL_LOCALMSPID", self.msp_id())
            .env("ORDERER_GENERAL_BOOTSTRAPMETHOD", "file")
            .env("ORDERER_GENERAL_BOOTSTRAPFILE", path_string(&self.genesis_path()))
            .env("ORDERER_FILELEDGER_LOCATION", path_string(&data))
            .env("ORDERER_CONSENSUS_WALDIR", path_string(&data.join("etcdraft").join("wal")))
            .env("ORDERER_CONSENSUS_SNAPDIR", path_string(&data.join("etcdraft").join("snapshot")))
            .env("ORDERER_METRICS_PROVIDER", "prometheus")
            .env("ORDERER_GENERAL_LISTENADDRESS", "0.0.0.0")
            .env("ORDERER_GENERAL_LISTENPORT", self.api.port().to_string())
            .env("ORDERER_OPERATIONS_LISTENADDRESS", format!("0.0.0.0:{}", self.operations.port()));
        if let Some(files) = tls {
            spec = spec
                .env("ORDERER_GENERAL_TLS_ENABLED", "true")
                .env("ORDERER_GENERAL_TLS_CERTIFICATE", path_string(&files.certificate))
                .env("ORDERER_GENERAL_TLS_PRIVATEKEY", path_string(&files.private_key))
                .env("ORDERER_GENERAL_TLS_ROOTCAS", path_string(&files.ca))
                .env("ORDERER_OPERATIONS_TLS_ENABLED", "true")
                .env("ORDERER_OPERATIONS_TLS_CERTIFICATE", path_string(&files.certificate))
                .env("ORDERER_OPERATIONS_TLS_PRIVATEKEY", path_string(&files.private_key));
        }
        spec
    }

    /// `/healthz` on the operations endpoint, then a gRPC connection to the API endpoint.
    fn probe(&self) -> Box<dyn ReadinessProbe> {
        let healthz = HttpStatus::healthz(self.operations.internal(), self.tls_ca());
        let url = self.api.internal().clone();
        let tls_ca = self.tls_ca().map(str::to_string);
        let connect = Check::new(format!("gRPC connect {url}"), move || {
            let url = url.clone();
            let tls_ca = tls_ca.clone();
            async move { grpc::reachable(&url, tls_ca.as_deref()).await }.boxed()
        });
        Box::new(AllOf(vec![Box::new(healthz), Box::new(connect)]))
    }

    /// Materializes directories and starts the process. The genesis block must already
    /// have been written.
    #[instrument(skip_all, fields(org = %self.organization.name()))]
    pub async fn start(&self, timeout: Duration) -> Result<Supervisor, ComponentError> {
        create_dirs(&[
            self.directory.join("config"),
            self.directory.join("data"),
            self.directory.join("logs"),
        ])
        .await?;
        write_msp_directory(&self.directory.join("msp"), &self.identity).await?;
        let tls = match &self.tls {
            Some(tls) => Some(write_tls_directory(&self.directory.join("tls"), tls).await?),
            None => None,
        };
        let supervisor = Supervisor::start(self.process_spec(tls.as_ref()), self.probe(), timeout).await?;
        info!(api = %self.api.internal(), "Orderer started");
        Ok(supervisor)
    }

    /// Administrative connection over the internal endpoint.
    pub fn connect(&self, msp_id: &str, identity: Identity) -> Result<OrdererConnection, ComponentError> {
        Ok(OrdererConnection::connect(self.api.internal(), self.tls_ca(), msp_id, identity)?)
    }
}

pub(crate) fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
