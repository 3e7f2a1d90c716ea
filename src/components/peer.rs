//! Endorsing nodes.
//!
//! ## Architecture Note
//! A peer is configured through `core.yaml`. Rather than templating the whole file, the
//! installation's own `core.yaml` (found through `FABRIC_CFG_PATH`) is loaded as a YAML
//! tree, the handful of keys that matter on a single host are overwritten, and the result
//! is written into the peer's own config directory. A missing section is an error rather
//! than something to invent, since it means the installation is not what we expect.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_yaml::{Mapping, Value};
use tracing::{info, instrument};

use super::endpoint::Endpoint;
use super::error::ComponentError;
use super::msp::{create_dirs, write_file, write_msp_directory, write_tls_directory, TlsFiles};
use super::orderer::path_string;
use crate::clients::PeerConnection;
use crate::identity::Identity;
use crate::model::Organization;
use crate::supervisor::{AllOf, Check, HttpStatus, ProcessSpec, ReadinessProbe, Supervisor};

pub const PEER_PROGRAM: &str = "peer";
pub const FABRIC_CFG_PATH: &str = "FABRIC_CFG_PATH";

/// Credentials the peer uses for its state database; the CouchDB proxy forwards them.
pub const COUCHDB_USERNAME: &str = "admin";
pub const COUCHDB_PASSWORD: &str = "adminpw";

/// External chaincode builders shipped under `$MICROFAB_HOME/builders`, with the
/// environment each one propagates.
const BUILDERS: &[(&str, &str, &[&str])] = &[
    ("golang", "golang", &["GOCACHE", "GOENV", "GOROOT", "HOME"]),
    ("java", "java", &["HOME", "JAVA_HOME", "MAVEN_OPTS"]),
    ("node", "node", &["HOME", "npm_config_cache"]),
    ("ccaas", "chaincode-as-a-service-builder", &["CHAINCODE_AS_A_SERVICE_BUILDER_CONFIG"]),
    ("external", "external-service-builder", &["HOME"]),
];

/// The three listeners of a peer.
#[derive(Debug, Clone)]
pub struct PeerEndpoints {
    pub api: Endpoint,
    pub chaincode: Endpoint,
    pub operations: Endpoint,
}

/// One organization's endorsing node.
#[derive(Debug, Clone)]
pub struct PeerNode {
    organization: Arc<Organization>,
    identity: Identity,
    directory: PathBuf,
    home: PathBuf,
    endpoints: PeerEndpoints,
    couchdb_port: Option<u16>,
    tls: Option<Identity>,
}

impl PeerNode {
    /// Issues the node identity (`<org> Peer`, OU `peer`) from the organization's CA.
    /// `home` is where the chaincode builders live.
    pub fn new(
        organization: Arc<Organization>,
        directory: impl Into<PathBuf>,
        home: impl Into<PathBuf>,
        endpoints: PeerEndpoints,
        tls: Option<Identity>,
    ) -> Result<Self, ComponentError> {
        let identity = Identity::builder(format!("{} Peer", organization.name()))
            .organizational_unit("peer")
            .signed_by(organization.ca())
            .build()?;
        Ok(Self {
            organization,
            identity,
            directory: directory.into(),
            home: home.into(),
            endpoints,
            couchdb_port: None,
            tls,
        })
    }

    /// Keeps world state in CouchDB, reached through the organization's proxy on `port`.
    pub fn with_couchdb(mut self, port: u16) -> Self {
        self.couchdb_port = Some(port);
        self
    }

    pub fn organization(&self) -> &Arc<Organization> {
        &self.organization
    }

    pub fn msp_id(&self) -> &str {
        self.organization.msp_id()
    }

    /// Component ID, `<org label>peer`.
    pub fn id(&self) -> String {
        format!("{}peer", self.organization.label())
    }

    pub fn api(&self) -> &Endpoint {
        &self.endpoints.api
    }

    pub fn chaincode(&self) -> &Endpoint {
        &self.endpoints.chaincode
    }

    pub fn operations(&self) -> &Endpoint {
        &self.endpoints.operations
    }

    pub fn tls(&self) -> Option<&Identity> {
        self.tls.as_ref()
    }

    fn tls_ca(&self) -> Option<&str> {
        self.tls.as_ref().map(Identity::trust_anchor_pem)
    }

    fn config_dir(&self) -> PathBuf {
        self.directory.join("config")
    }

    /// Derives this peer's `core.yaml` from the installation's `template`.
    pub fn core_config(&self, template: &str, tls: Option<&TlsFiles>) -> Result<String, ComponentError> {
        let mut config: Value = serde_yaml::from_str(template)?;
        let data = self.directory.join("data");
        let endpoints = &self.endpoints;

        let peer = section(&mut config, &["peer"], "peer")?;
        set(peer, "id", self.id());
        set(peer, "mspConfigPath", path_string(&self.directory.join("msp")));
        set(peer, "localMspId", self.msp_id());
        set(peer, "fileSystemPath", path_string(&data));
        set(peer, "address", format!("0.0.0.0:{}", endpoints.api.port()));
        set(peer, "listenAddress", format!("0.0.0.0:{}", endpoints.api.port()));
        set(peer, "chaincodeListenAddress", format!("0.0.0.0:{}", endpoints.chaincode.port()));

        let gossip = section(&mut config, &["peer", "gossip"], "peer.gossip")?;
        let gossip_host = endpoints.api.internal_host();
        set(gossip, "bootstrap", gossip_host.clone());
        set(gossip, "useLeaderElection", false);
        set(gossip, "orgLeader", true);
        set(gossip, "endpoint", gossip_host.clone());
        set(gossip, "externalEndpoint", gossip_host);

        set(section(&mut config, &["metrics"], "metrics")?, "provider", "prometheus");
        let operations = section(&mut config, &["operations"], "operations")?;
        set(operations, "listenAddress", format!("0.0.0.0:{}", endpoints.operations.port()));
        set(section(&mut config, &["vm"], "vm")?, "endpoint", "");

        let builders: Vec<Value> = BUILDERS
            .iter()
            .map(|(dir, name, environment)| {
                let mut builder = Mapping::new();
                set(&mut builder, "path", path_string(&self.home.join("builders").join(dir)));
                set(&mut builder, "name", *name);
                set(
                    &mut builder,
                    "propagateEnvironment",
                    environment.iter().map(|var| Value::from(*var)).collect::<Vec<_>>(),
                );
                Value::Mapping(builder)
            })
            .collect();
        set(section(&mut config, &["chaincode"], "chaincode")?, "externalBuilders", builders);

        let snapshots = section(&mut config, &["ledger", "snapshots"], "ledger.snapshots")?;
        set(snapshots, "rootDir", path_string(&data.join("snapshots")));

        if let Some(port) = self.couchdb_port {
            set(section(&mut config, &["ledger", "state"], "ledger.state")?, "stateDatabase", "CouchDB");
            let couchdb = section(
                &mut config,
                &["ledger", "state", "couchDBConfig"],
                "ledger.state.couchDBConfig",
            )?;
            set(couchdb, "couchDBAddress", format!("localhost:{port}"));
            set(couchdb, "username", COUCHDB_USERNAME);
            set(couchdb, "password", COUCHDB_PASSWORD);
        }

        if let Some(files) = tls {
            let peer_tls = section(&mut config, &["peer", "tls"], "peer.tls")?;
            set(peer_tls, "enabled", true);
            set(peer_tls, "cert", file_ref(&files.certificate));
            set(peer_tls, "key", file_ref(&files.private_key));
            set(peer_tls, "rootcert", file_ref(&files.ca));
            set(peer_tls, "clientRootCAs", file_ref(&files.ca));
            let operations_tls = section(&mut config, &["operations", "tls"], "operations.tls")?;
            set(operations_tls, "enabled", true);
            set(operations_tls, "cert", file_ref(&files.certificate));
            set(operations_tls, "key", file_ref(&files.private_key));
        }

        Ok(serde_yaml::to_string(&config)?)
    }

    pub fn process_spec(&self) -> ProcessSpec {
        ProcessSpec::new(self.id(), PEER_PROGRAM, self.directory.join("logs").join("peer.log"))
            .args(["node", "start"])
            .env(FABRIC_CFG_PATH, path_string(&self.config_dir()))
    }

    /// `/healthz` on the operations endpoint, then `GetChannels` as the organization admin.
    fn probe(&self) -> Box<dyn ReadinessProbe> {
        let healthz = HttpStatus::healthz(self.operations().internal(), self.tls_ca());
        let url = self.api().internal().clone();
        let tls_ca = self.tls_ca().map(str::to_string);
        let msp_id = self.msp_id().to_string();
        let admin = self.organization.admin().clone();
        let channels = Check::new(format!("GetChannels {url}"), move || {
            let connection = PeerConnection::connect(&url, tls_ca.as_deref(), &msp_id, admin.clone());
            async move {
                match connection {
                    Ok(connection) => connection.list_channels().await.is_ok(),
                    Err(_) => false,
                }
            }
            .boxed()
        });
        Box::new(AllOf(vec![Box::new(healthz), Box::new(channels)]))
    }

    /// Materializes directories, MSP, TLS and `core.yaml`, then starts the process.
    #[instrument(skip_all, fields(org = %self.organization.name()))]
    pub async fn start(&self, timeout: Duration) -> Result<Supervisor, ComponentError> {
        let installation = std::env::var_os(FABRIC_CFG_PATH).ok_or(ComponentError::MissingEnv(FABRIC_CFG_PATH))?;
        let template_path = Path::new(&installation).join("core.yaml");
        let template = tokio::fs::read_to_string(&template_path)
            .await
            .map_err(ComponentError::io(&template_path))?;

        create_dirs(&[
            self.config_dir(),
            self.directory.join("data"),
            self.directory.join("logs"),
        ])
        .await?;
        write_msp_directory(&self.directory.join("msp"), &self.identity).await?;
        let tls = match &self.tls {
            Some(tls) => Some(write_tls_directory(&self.directory.join("tls"), tls).await?),
            None => None,
        };
        let core = self.core_config(&template, tls.as_ref())?;
        write_file(self.config_dir().join("core.yaml"), core).await?;

        let supervisor = Supervisor::start(self.process_spec(), self.probe(), timeout).await?;
        info!(api = %self.api().internal(), "Peer started");
        Ok(supervisor)
    }

    /// Administrative connection over the internal endpoint.
    pub fn connect(&self, msp_id: &str, identity: Identity) -> Result<PeerConnection, ComponentError> {
        Ok(PeerConnection::connect(self.api().internal(), self.tls_ca(), msp_id, identity)?)
    }

    /// Connection as the organization's own admin.
    pub fn admin_connection(&self) -> Result<PeerConnection, ComponentError> {
        self.connect(self.msp_id(), self.organization.admin().clone())
    }
}

fn section<'a>(config: &'a mut Value, path: &[&str], name: &'static str) -> Result<&'a mut Mapping, ComponentError> {
    let mut current = config;
    for key in path {
        current = current
            .as_mapping_mut()
            .and_then(|mapping| mapping.get_mut(*key))
            .ok_or(ComponentError::MissingSection(name))?;
    }
    current.as_mapping_mut().ok_or(ComponentError::MissingSection(name))
}

fn set(mapping: &mut Mapping, key: &str, value: impl Into<Value>) {
    mapping.insert(Value::from(key), value.into());
}

fn file_ref(path: &Path) -> Value {
    let mut mapping = Mapping::new();
    set(&mut mapping, "file", path_string(path));
    Value::Mapping(mapping)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = "
peer:
  id: jdoe
  gossip:
    bootstrap: 127.0.0.1:7051
  tls:
    enabled: false
metrics:
  provider: disabled
operations:
  listenAddress: 127.0.0.1:9443
  tls:
    enabled: false
vm:
  endpoint: unix:///var/run/docker.sock
chaincode:
  externalBuilders: []
ledger:
  state:
    stateDatabase: goleveldb
    couchDBConfig:
      couchDBAddress: 127.0.0.1:5984
  snapshots:
    rootDir: /var/hyperledger/production/snapshots
";

    fn node() -> PeerNode {
        let organization = Arc::new(Organization::new("Org1", None).unwrap());
        let domain = "127-0-0-1.nip.io";
        let endpoints = PeerEndpoints {
            api: Endpoint::new("grpc", "org1peer-api", domain, 8080, 2002).unwrap(),
            chaincode: Endpoint::new("grpc", "org1peer-chaincode", domain, 8080, 2003).unwrap(),
            operations: Endpoint::new("http", "org1peer-operations", domain, 8080, 2004).unwrap(),
        };
        PeerNode::new(organization, "/data/peer-org1", "/opt/microfab", endpoints, None).unwrap()
    }

    fn lookup<'a>(value: &'a Value, path: &[&str]) -> &'a Value {
        path.iter().fold(value, |current, key| &current[*key])
    }

    /// Core config overrides single-host settings.
    #[test]
    fn test_core_config_overrides_single_host_settings() {
        let node = node().with_couchdb(2005);
        let config: Value = serde_yaml::from_str(&node.core_config(TEMPLATE, None).unwrap()).unwrap();

        assert_eq!(lookup(&config, &["peer", "id"]).as_str(), Some("org1peer"));
        assert_eq!(lookup(&config, &["peer", "localMspId"]).as_str(), Some("Org1MSP"));
        assert_eq!(lookup(&config, &["peer", "listenAddress"]).as_str(), Some("0.0.0.0:2002"));
        assert_eq!(lookup(&config, &["peer", "chaincodeListenAddress"]).as_str(), Some("0.0.0.0:2003"));
        assert_eq!(lookup(&config, &["peer", "gossip", "endpoint"]).as_str(), Some("localhost:2002"));
        assert_eq!(lookup(&config, &["operations", "listenAddress"]).as_str(), Some("0.0.0.0:2004"));
        assert_eq!(lookup(&config, &["metrics", "provider"]).as_str(), Some("prometheus"));
        assert_eq!(lookup(&config, &["vm", "endpoint"]).as_str(), Some(""));
        assert_eq!(lookup(&config, &["ledger", "state", "stateDatabase"]).as_str(), Some("CouchDB"));
        assert_eq!(
            lookup(&config, &["ledger", "state", "couchDBConfig", "couchDBAddress"]).as_str(),
            Some("localhost:2005")
        );
        let builders = lookup(&config, &["chaincode", "externalBuilders"]).as_sequence().unwrap();
        assert_eq!(builders.len(), 5);
        assert_eq!(builders[0]["path"].as_str(), Some("/opt/microfab/builders/golang"));
        assert_eq!(lookup(&config, &["peer", "tls", "enabled"]).as_bool(), Some(false));
    }

    /// LevelDB is kept without CouchDB.
    #[test]
    fn test_leveldb_is_kept_without_couchdb() {
        let config: Value = serde_yaml::from_str(&node().core_config(TEMPLATE, None).unwrap()).unwrap();
        assert_eq!(lookup(&config, &["ledger", "state", "stateDatabase"]).as_str(), Some("goleveldb"));
    }

    /// TLS files are referenced.
    #[test]
    fn test_tls_files_are_referenced() {
        let files = TlsFiles::in_directory(Path::new("/data/peer-org1/tls"));
        let config: Value = serde_yaml::from_str(&node().core_config(TEMPLATE, Some(&files)).unwrap()).unwrap();
        assert_eq!(lookup(&config, &["peer", "tls", "enabled"]).as_bool(), Some(true));
        assert_eq!(
            lookup(&config, &["peer", "tls", "rootcert", "file"]).as_str(),
            Some("/data/peer-org1/tls/ca.pem")
        );
        assert_eq!(
            lookup(&config, &["operations", "tls", "key", "file"]).as_str(),
            Some("/data/peer-org1/tls/key.pem")
        );
    }

    /// Missing section is reported.
    #[test]
    fn test_missing_section_is_reported() {
        let error = node().core_config("peer:\n  id: x\n", None).unwrap_err();
        assert!(matches!(error, ComponentError::MissingSection("peer.gossip")));
    }

    /// Peer process points at generated config.
    #[test]
    fn test_peer_process_points_at_generated_config() {
        let spec = node().process_spec();
        assert_eq!(spec.name, "org1peer");
        assert_eq!(spec.args, vec!["node", "start"]);
        assert_eq!(spec.env, vec![(FABRIC_CFG_PATH.to_string(), "/data/peer-org1/config".to_string())]);
    }
}
