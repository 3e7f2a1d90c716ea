//! # Network Orchestrator
//!
//! Brings a network up from a [`Config`], keeps it running until a termination signal
//! arrives, and tears it down again.
//!
//! ## Architecture Note
//! Start-up runs as a fixed sequence of stages. Work inside a stage that does not depend
//! on itself (creating organizations, starting components, creating channels) fans out
//! through a [`TaskGroup`]; the stage as a whole finishes before the next begins.
//!
//! | # | Stage | Concurrent |
//! |---|---|---|
//! | 1 | load state, or wipe the working directory | |
//! | 2 | TLS identity | |
//! | 3 | organizations, sorted by name | yes |
//! | 4 | wait for CouchDB | |
//! | 5 | orderer, peers (with CouchDB proxies) and CAs | yes |
//! | 6 | console and other frontends | |
//! | 7 | admin connections | |
//! | 8 | channels, fresh bootstrap only | yes |
//! | 9 | save state, listen for signals | |
//!
//! Whatever has been started is recorded in [`Running`] as it happens, so a failure at
//! any stage tears down exactly what exists. Ports are allocated up front in a fixed
//! order so that a restart lays the network out the same way.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use tokio::fs;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use super::error::StageExt;
use super::ports::PortAllocator;
use super::state::PersistedState;
use super::tasks::TaskGroup;
use super::NetworkError;
use crate::clients::{ChaincodeClient, OrdererConnection, PeerConnection};
use crate::components::{
    grpc_scheme, http_scheme, write_msp_directory, CaNode, ComponentError, CouchDb, CouchDbProxy, Endpoint,
    OrdererNode, PeerEndpoints, PeerNode, COUCHDB_URL,
};
use crate::console::{Component, Console, Frontend};
use crate::framework::{Broadcaster, Endorser};
use crate::identity::Identity;
use crate::model::{home_directory, Config, ConfigError, Organization};
use crate::protocol::blocks::{poll_genesis_block, GENESIS_POLL_INTERVAL};
use crate::protocol::channel::{create_channel, update_channel};
use crate::protocol::ChannelOption;
use crate::supervisor::Supervisor;

/// A component and the supervisor of its process.
#[derive(Debug)]
pub struct Started<T> {
    pub node: T,
    pub supervisor: Supervisor,
}

/// Everything a network has started, in the order it will be torn down.
#[derive(Default)]
struct Running {
    console: Option<Console>,
    frontends_started: usize,
    cas: Vec<Started<CaNode>>,
    peers: Vec<Started<PeerNode>>,
    proxies: Vec<CouchDbProxy>,
    orderer: Option<Started<OrdererNode>>,
    orderer_connection: Option<OrdererConnection>,
    peer_connections: Vec<PeerConnection>,
    signals: Option<watch::Receiver<bool>>,
}

/// A single-host ledger network.
pub struct Network {
    config: Config,
    home: PathBuf,
    frontends: Vec<Box<dyn Frontend>>,
    running: Option<Running>,
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("domain", &self.config.domain)
            .field("directory", &self.config.directory)
            .field("running", &self.running.is_some())
            .finish_non_exhaustive()
    }
}

impl Network {
    /// Validates `config`. Nothing is touched until [`start`](Self::start).
    pub fn new(config: Config) -> Result<Self, NetworkError> {
        config.validate()?;
        Ok(Self {
            config,
            home: home_directory()?,
            frontends: Vec::new(),
            running: None,
        })
    }

    /// Adds an HTTP collaborator, started after the console and stopped before it.
    pub fn with_frontend(mut self, frontend: Box<dyn Frontend>) -> Self {
        self.frontends.push(frontend);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Started peers, sorted by organization name.
    pub fn peers(&self) -> Vec<&PeerNode> {
        self.running
            .as_ref()
            .map(|running| running.peers.iter().map(|peer| &peer.node).collect())
            .unwrap_or_default()
    }

    pub fn orderer(&self) -> Option<&OrdererNode> {
        self.running
            .as_ref()
            .and_then(|running| running.orderer.as_ref())
            .map(|orderer| &orderer.node)
    }

    /// A chaincode client endorsing on every peer, each as its organization's admin.
    pub fn chaincode_client(&self) -> Option<ChaincodeClient> {
        let running = self.running.as_ref()?;
        let orderer = running.orderer_connection.clone()?;
        let endorsers: Vec<Arc<dyn Endorser>> = running
            .peer_connections
            .iter()
            .map(|connection| Arc::new(connection.clone()) as Arc<dyn Endorser>)
            .collect();
        let orderer: Arc<dyn Broadcaster> = Arc::new(orderer);
        Some(ChaincodeClient::new(endorsers, orderer))
    }

    /// Brings the network up. Calling it again while running does nothing.
    ///
    /// On failure everything started so far is torn down and the error names the stage.
    pub async fn start(&mut self) -> Result<(), NetworkError> {
        if self.running.is_some() {
            debug!("Network already running");
            return Ok(());
        }
        let started = Instant::now();
        info!(domain = %self.config.domain, port = self.config.port, "Starting network");
        let mut running = Running::default();
        match self.bring_up(&mut running).await {
            Ok(()) => {
                info!(latency_ms = %started.elapsed().as_millis(), "Network started");
                self.running = Some(running);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Network failed to start");
                teardown(&mut running, &mut self.frontends).await;
                Err(e)
            }
        }
    }

    /// Tears the network down: frontends, CAs, peers, CouchDB proxies, then the orderer.
    /// Failures are logged and do not stop the remaining steps.
    pub async fn stop(&mut self) {
        if let Some(mut running) = self.running.take() {
            teardown(&mut running, &mut self.frontends).await;
        }
    }

    /// Blocks until SIGINT or SIGTERM, then stops the network.
    pub async fn wait(&mut self) {
        let Some(running) = self.running.as_mut() else {
            return;
        };
        if let Some(signals) = running.signals.as_mut() {
            if signals.wait_for(|received| *received).await.is_err() {
                warn!("Signal listener went away");
            }
        }
        self.stop().await;
    }

    async fn bring_up(&mut self, running: &mut Running) -> Result<(), NetworkError> {
        let timeout = self.config.timeout()?;
        let hash = self.config.hash()?;

        let restored = self.restore(&hash).await.stage("preparing working directory")?;
        let tls = self.tls_identity(restored.as_ref()).stage("creating TLS identity")?;
        let (ordering, endorsing) = self
            .create_organizations(restored.as_ref())
            .await
            .stage("creating organizations")?;
        self.write_admin_directories(&ordering, &endorsing)
            .await
            .stage("writing admin MSP directories")?;

        let couchdb = if self.config.couchdb {
            let couchdb = self.couchdb(tls.is_some()).stage("waiting for CouchDB")?;
            couchdb.wait_for(timeout).await.stage("waiting for CouchDB")?;
            Some(couchdb)
        } else {
            None
        };

        let layout = Layout {
            domain: self.config.domain.clone(),
            external_port: self.config.external_port(),
            directory: self.config.directory.clone(),
            home: self.home.clone(),
            tls: tls.clone(),
            timeout,
        };
        let plan = LaunchPlan::allocate(
            &PortAllocator::default(),
            &endorsing,
            couchdb.is_some(),
            self.config.certificate_authorities,
        )
        .stage("allocating ports")?;
        self.start_components(running, &layout, &plan, &ordering, &endorsing, couchdb.clone(), restored.is_some())
            .await
            .stage("starting components")?;

        self.start_frontends(running, &layout, plan.console, &ordering, &endorsing, couchdb)
            .await
            .stage("starting frontends")?;

        connect_admins(running, &ordering).stage("connecting to components")?;

        if restored.is_none() {
            self.create_channels(running, &endorsing, timeout)
                .await
                .stage("creating channels")?;
        } else {
            info!("Configuration unchanged, channels already exist");
        }

        bootstrap_state(hash, &ordering, &endorsing, tls.as_ref())
            .save(&self.config.directory)
            .await
            .stage("saving state")?;

        running.signals = Some(listen_for_signals());
        Ok(())
    }

    /// Returns the persisted state if it was written for this configuration. Otherwise
    /// the working directory is wiped and recreated.
    async fn restore(&self, hash: &[u8]) -> Result<Option<PersistedState>, NetworkError> {
        let directory = &self.config.directory;
        match PersistedState::load(directory).await {
            Ok(Some(state)) if state.matches(hash) => {
                info!(directory = %directory.display(), "Restoring state");
                return Ok(Some(state));
            }
            Ok(Some(_)) => info!("Configuration changed, bootstrapping from scratch"),
            Ok(None) => debug!("No previous state"),
            Err(e) => warn!(error = %e, "Ignoring unreadable state"),
        }
        match fs::remove_dir_all(directory).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(NetworkError::io(directory)(e)),
        }
        fs::create_dir_all(directory).await.map_err(NetworkError::io(directory))?;
        Ok(None)
    }

    /// Persisted, supplied, or freshly generated for `*.<domain>` and `localhost`.
    fn tls_identity(&self, restored: Option<&PersistedState>) -> Result<Option<Identity>, NetworkError> {
        if !self.config.tls.enabled {
            return Ok(None);
        }
        if let Some(tls) = restored.map(PersistedState::tls).transpose()?.flatten() {
            return Ok(Some(tls));
        }
        if let Some(material) = self.config.tls.material()? {
            let identity = Identity::from_pem("TLS", &material.certificate, &material.private_key, Some(&material.ca))?;
            return Ok(Some(identity));
        }
        let wildcard = format!("*.{}", self.config.domain);
        let identity = Identity::builder(wildcard.clone())
            .subject_alt_names([wildcard, "localhost".to_string()])
            .build()?;
        Ok(Some(identity))
    }

    #[instrument(skip_all)]
    async fn create_organizations(
        &self,
        restored: Option<&PersistedState>,
    ) -> Result<(Arc<Organization>, Vec<Arc<Organization>>), NetworkError> {
        let names = std::iter::once(&self.config.ordering_organization)
            .chain(&self.config.endorsing_organizations)
            .map(|organization| organization.name.clone());
        let mut group = TaskGroup::new();
        for (index, name) in names.enumerate() {
            let ca = restored.map(|state| state.ca(&name)).transpose()?.flatten();
            group.spawn(async move {
                let organization = tokio::task::spawn_blocking(move || Organization::new(&name, ca))
                    .await
                    .map_err(|e| NetworkError::Task(e.to_string()))??;
                info!(name = organization.name(), msp_id = organization.msp_id(), "Created organization");
                Ok::<_, NetworkError>((index, Arc::new(organization)))
            });
        }
        let mut ordering = None;
        let mut endorsing = Vec::new();
        for (index, organization) in group.join().await? {
            if index == 0 {
                ordering = Some(organization);
            } else {
                endorsing.push(organization);
            }
        }
        endorsing.sort_by(|a, b| a.name().cmp(b.name()));
        let ordering = ordering.ok_or_else(|| NetworkError::Task("ordering organization missing".to_string()))?;
        Ok((ordering, endorsing))
    }

    async fn write_admin_directories(
        &self,
        ordering: &Organization,
        endorsing: &[Arc<Organization>],
    ) -> Result<(), ComponentError> {
        for organization in std::iter::once(ordering).chain(endorsing.iter().map(Arc::as_ref)) {
            let directory = self.config.directory.join(format!("admin-{}", organization.label()));
            write_msp_directory(&directory, organization.admin()).await?;
        }
        Ok(())
    }

    fn couchdb(&self, tls: bool) -> Result<CouchDb, ComponentError> {
        let external = format!("{}://couchdb.{}:{}", http_scheme(tls), self.config.domain, self.config.port);
        Ok(CouchDb::new(Url::parse(COUCHDB_URL)?, Url::parse(&external)?))
    }

    #[allow(clippy::too_many_arguments)]
    async fn start_components(
        &self,
        running: &mut Running,
        layout: &Layout,
        plan: &LaunchPlan,
        ordering: &Arc<Organization>,
        endorsing: &[Arc<Organization>],
        couchdb: Option<CouchDb>,
        reuse_genesis: bool,
    ) -> Result<(), NetworkError> {
        let mut group = TaskGroup::new();
        group.spawn(launch_orderer(
            layout.clone(),
            ordering.clone(),
            endorsing.to_vec(),
            self.config.capability_level.clone(),
            plan.orderer,
            reuse_genesis,
        ));
        for (organization, ports) in endorsing.iter().zip(&plan.organizations) {
            group.spawn(launch_peer(layout.clone(), organization.clone(), ports.peer, couchdb.clone()));
            if let Some(ca) = ports.ca {
                group.spawn(launch_ca(layout.clone(), organization.clone(), ca));
            }
        }
        info!(components = group.len(), "Starting components");
        for launched in group.join().await? {
            match launched {
                Launched::Orderer(orderer) => running.orderer = Some(orderer),
                Launched::Peer(peer, proxy) => {
                    running.peers.push(peer);
                    running.proxies.extend(proxy);
                }
                Launched::Ca(ca) => running.cas.push(ca),
            }
        }
        running.peers.sort_by(|a, b| a.node.organization().name().cmp(b.node.organization().name()));
        running.cas.sort_by(|a, b| a.node.organization().name().cmp(b.node.organization().name()));
        Ok(())
    }

    async fn start_frontends(
        &mut self,
        running: &mut Running,
        layout: &Layout,
        console_port: u16,
        ordering: &Arc<Organization>,
        endorsing: &[Arc<Organization>],
        couchdb: Option<CouchDb>,
    ) -> Result<(), NetworkError> {
        let mut components = Vec::new();
        if let Some(orderer) = &running.orderer {
            components.push(Component::Orderer(orderer.node.clone()));
        }
        components.push(Component::Organization(ordering.clone()));
        components.extend(endorsing.iter().cloned().map(Component::Organization));
        components.extend(running.peers.iter().map(|peer| Component::Peer(peer.node.clone())));
        components.extend(running.cas.iter().map(|ca| Component::Ca(ca.node.clone())));
        components.extend(couchdb.map(Component::CouchDb));

        let url = format!(
            "{}://console.{}:{}",
            http_scheme(layout.tls.is_some()),
            layout.domain,
            layout.external_port
        );
        let mut console = Console::new(console_port, &url)?;
        for component in &components {
            console.register(component);
        }
        console.start().await?;
        running.console = Some(console);

        for frontend in &mut self.frontends {
            for component in &components {
                frontend.register(component);
            }
            frontend.start().await?;
            running.frontends_started += 1;
            info!(frontend = frontend.name(), "Frontend started");
        }
        Ok(())
    }

    async fn create_channels(
        &self,
        running: &Running,
        endorsing: &[Arc<Organization>],
        timeout: Duration,
    ) -> Result<(), NetworkError> {
        let orderer = running
            .orderer
            .as_ref()
            .map(|orderer| orderer.node.clone())
            .ok_or_else(|| NetworkError::Task("orderer not started".to_string()))?;
        let mut group = TaskGroup::new();
        for channel in &self.config.channels {
            let members: Vec<Arc<Organization>> = endorsing
                .iter()
                .filter(|organization| channel.endorsing_organizations.iter().any(|name| name == organization.name()))
                .cloned()
                .collect();
            let peers: Vec<(PeerNode, PeerConnection)> = running
                .peers
                .iter()
                .zip(&running.peer_connections)
                .filter(|(peer, _)| members.iter().any(|member| Arc::ptr_eq(member, peer.node.organization())))
                .map(|(peer, connection)| (peer.node.clone(), connection.clone()))
                .collect();
            group.spawn(create_and_join(ChannelPlan {
                name: channel.name.clone(),
                capability_level: self.config.channel_capability_level(channel).to_string(),
                members,
                orderer: orderer.clone(),
                peers,
                timeout,
            }));
        }
        group.join().await?;
        Ok(())
    }
}

/// Where components live and how they are addressed.
#[derive(Debug, Clone)]
struct Layout {
    domain: String,
    external_port: u16,
    directory: PathBuf,
    home: PathBuf,
    tls: Option<Identity>,
    timeout: Duration,
}

impl Layout {
    fn endpoint(&self, scheme: &str, label: &str, port: u16) -> Result<Endpoint, ComponentError> {
        Ok(Endpoint::new(scheme, label, &self.domain, self.external_port, port)?)
    }

    fn secure(&self) -> bool {
        self.tls.is_some()
    }
}

#[derive(Debug, Clone, Copy)]
struct PeerPorts {
    api: u16,
    chaincode: u16,
    operations: u16,
    couchdb: Option<u16>,
}

#[derive(Debug, Clone, Copy)]
struct OrganizationPorts {
    peer: PeerPorts,
    ca: Option<[u16; 2]>,
}

/// Every port the network needs, allocated in a fixed order.
#[derive(Debug)]
struct LaunchPlan {
    orderer: [u16; 2],
    organizations: Vec<OrganizationPorts>,
    console: u16,
}

impl LaunchPlan {
    fn allocate(
        ports: &PortAllocator,
        endorsing: &[Arc<Organization>],
        couchdb: bool,
        certificate_authorities: bool,
    ) -> Result<Self, ConfigError> {
        let orderer = ports.allocate_many::<2>()?;
        let mut organizations = Vec::with_capacity(endorsing.len());
        for _ in endorsing {
            let [api, chaincode, operations] = ports.allocate_many::<3>()?;
            let couchdb = if couchdb { Some(ports.allocate()?) } else { None };
            let ca = if certificate_authorities {
                Some(ports.allocate_many::<2>()?)
            } else {
                None
            };
            organizations.push(OrganizationPorts {
                peer: PeerPorts {
                    api,
                    chaincode,
                    operations,
                    couchdb,
                },
                ca,
            });
        }
        Ok(Self {
            orderer,
            organizations,
            console: ports.allocate()?,
        })
    }
}

enum Launched {
    Orderer(Started<OrdererNode>),
    Peer(Started<PeerNode>, Option<CouchDbProxy>),
    Ca(Started<CaNode>),
}

#[instrument(skip_all, fields(org = %organization.name()))]
async fn launch_orderer(
    layout: Layout,
    organization: Arc<Organization>,
    consortium: Vec<Arc<Organization>>,
    capability_level: String,
    [api, operations]: [u16; 2],
    reuse_genesis: bool,
) -> Result<Launched, NetworkError> {
    let node = OrdererNode::new(
        organization,
        layout.directory.join("orderer"),
        layout.endpoint(grpc_scheme(layout.secure()), "orderer-api", api)?,
        layout.endpoint(http_scheme(layout.secure()), "orderer-operations", operations)?,
        layout.tls.clone(),
    )?;
    let existing = fs::try_exists(node.genesis_path()).await.unwrap_or(false);
    if reuse_genesis && existing {
        info!("Reusing existing genesis block");
    } else {
        let members: Vec<&Organization> = consortium.iter().map(Arc::as_ref).collect();
        node.write_genesis_block(&members, &capability_level).await?;
    }
    let supervisor = node.start(layout.timeout).await?;
    Ok(Launched::Orderer(Started { node, supervisor }))
}

#[instrument(skip_all, fields(org = %organization.name()))]
async fn launch_peer(
    layout: Layout,
    organization: Arc<Organization>,
    ports: PeerPorts,
    couchdb: Option<CouchDb>,
) -> Result<Launched, NetworkError> {
    let label = organization.label();
    let endpoints = PeerEndpoints {
        api: layout.endpoint(grpc_scheme(layout.secure()), &format!("{label}peer-api"), ports.api)?,
        chaincode: layout.endpoint(grpc_scheme(layout.secure()), &format!("{label}peer-chaincode"), ports.chaincode)?,
        operations: layout.endpoint(http_scheme(layout.secure()), &format!("{label}peer-operations"), ports.operations)?,
    };
    let mut node = PeerNode::new(
        organization,
        layout.directory.join(format!("peer-{label}")),
        layout.home.clone(),
        endpoints,
        layout.tls.clone(),
    )?;
    let proxy = match (couchdb, ports.couchdb) {
        (Some(couchdb), Some(port)) => {
            node = node.with_couchdb(port);
            Some(couchdb.start_proxy(&label, port).await?)
        }
        _ => None,
    };
    let supervisor = node.start(layout.timeout).await?;
    Ok(Launched::Peer(Started { node, supervisor }, proxy))
}

#[instrument(skip_all, fields(org = %organization.name()))]
async fn launch_ca(
    layout: Layout,
    organization: Arc<Organization>,
    [api, operations]: [u16; 2],
) -> Result<Launched, NetworkError> {
    let label = organization.label();
    let node = CaNode::new(
        organization,
        layout.directory.join(format!("ca-{label}")),
        layout.endpoint(http_scheme(layout.secure()), &format!("{label}ca-api"), api)?,
        layout.endpoint(http_scheme(layout.secure()), &format!("{label}ca-operations"), operations)?,
        layout.tls.clone(),
    );
    let supervisor = node.start(layout.timeout).await?;
    node.enroll_admin().await?;
    Ok(Launched::Ca(Started { node, supervisor }))
}

fn connect_admins(running: &mut Running, ordering: &Organization) -> Result<(), ComponentError> {
    for peer in &running.peers {
        running.peer_connections.push(peer.node.admin_connection()?);
    }
    if let Some(orderer) = &running.orderer {
        running.orderer_connection = Some(orderer.node.connect(ordering.msp_id(), ordering.admin().clone())?);
    }
    Ok(())
}

struct ChannelPlan {
    name: String,
    capability_level: String,
    members: Vec<Arc<Organization>>,
    orderer: OrdererNode,
    peers: Vec<(PeerNode, PeerConnection)>,
    timeout: Duration,
}

/// Creates the channel as a randomly chosen member's admin, publishes every member
/// peer as an anchor peer, then joins those peers.
#[instrument(skip_all, fields(channel = %plan.name))]
async fn create_and_join(plan: ChannelPlan) -> Result<(), NetworkError> {
    info!(members = plan.members.len(), "Creating channel");
    let creator = {
        let mut rng = rand::thread_rng();
        plan.members.choose(&mut rng).cloned()
    };
    let creator = creator.ok_or_else(|| ConfigError::NoChannelOrganizations {
        channel: plan.name.clone(),
    })?;
    let connection = plan.orderer.connect(creator.msp_id(), creator.admin().clone())?;

    let mut options = vec![ChannelOption::CapabilityLevel(plan.capability_level.clone())];
    options.extend(plan.members.iter().map(|member| ChannelOption::AddMspId(member.msp_id().to_string())));
    create_channel(&connection, &plan.name, &options).await?;
    let genesis = poll_genesis_block(&connection, &plan.name, GENESIS_POLL_INTERVAL, plan.timeout).await?;
    debug!(creator = creator.name(), "Channel created");

    for (peer, _) in &plan.peers {
        let organization = peer.organization();
        let options = [
            ChannelOption::UsingMspId(organization.msp_id().to_string()),
            ChannelOption::UsingIdentity(organization.admin().clone()),
            ChannelOption::AnchorPeer {
                msp_id: organization.msp_id().to_string(),
                host: peer.api().external_hostname().to_string(),
                port: peer.api().external_port(),
            },
        ];
        update_channel(&connection, &connection, &plan.name, &options).await?;
    }

    let joins = plan.peers.iter().map(|(peer, connection)| {
        let genesis = &genesis;
        async move {
            connection.join_channel(genesis).await?;
            info!(org = peer.organization().name(), "Joined channel");
            Ok::<_, NetworkError>(())
        }
    });
    futures::future::try_join_all(joins).await?;
    info!("Created and joined channel");
    Ok(())
}

/// The state written after a successful start: this configuration's hash, every
/// organization's CA and the TLS identity.
fn bootstrap_state(
    hash: Vec<u8>,
    ordering: &Organization,
    endorsing: &[Arc<Organization>],
    tls: Option<&Identity>,
) -> PersistedState {
    let mut state = PersistedState::new(hash);
    state.set_ca(ordering.name(), ordering.ca());
    for organization in endorsing {
        state.set_ca(organization.name(), organization.ca());
    }
    state.tls = tls.map(Identity::to_blob);
    state
}

async fn teardown(running: &mut Running, frontends: &mut [Box<dyn Frontend>]) {
    info!("Stopping network");
    let started = running.frontends_started;
    for frontend in frontends.iter_mut().take(started).rev() {
        if let Err(e) = frontend.stop().await {
            error!(frontend = frontend.name(), error = %e, "Failed to stop frontend");
        }
    }
    running.frontends_started = 0;
    if let Some(mut console) = running.console.take() {
        if let Err(e) = console.stop().await {
            error!(error = %e, "Failed to stop console");
        }
    }
    for ca in running.cas.drain(..) {
        stop_process(ca.supervisor).await;
    }
    for peer in running.peers.drain(..) {
        stop_process(peer.supervisor).await;
    }
    for proxy in running.proxies.drain(..) {
        proxy.stop().await;
    }
    if let Some(orderer) = running.orderer.take() {
        stop_process(orderer.supervisor).await;
    }
    running.orderer_connection = None;
    running.peer_connections.clear();
    info!("Network stopped");
}

async fn stop_process(supervisor: Supervisor) {
    if let Err(e) = supervisor.stop().await {
        error!(name = supervisor.name(), error = %e, "Failed to stop process");
    }
    supervisor.join().await;
}

/// Flips to `true` on SIGINT or SIGTERM.
fn listen_for_signals() -> watch::Receiver<bool> {
    let (sender, receiver) = watch::channel(false);
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for SIGINT");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT"),
            _ = terminate => info!("Received SIGTERM"),
        }
        let _ = sender.send(true);
    });
    receiver
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OrganizationConfig;

    fn organizations(names: &[&str]) -> Vec<Arc<Organization>> {
        names.iter().map(|name| Arc::new(Organization::new(name, None).unwrap())).collect()
    }

    /// Ports follow a fixed order.
    #[test]
    fn test_ports_follow_a_fixed_order() {
        let ports = PortAllocator::default();
        let plan = LaunchPlan::allocate(&ports, &organizations(&["Org1", "Org2"]), true, true).unwrap();
        assert_eq!(plan.orderer, [2000, 2001]);
        let org1 = plan.organizations[0];
        assert_eq!((org1.peer.api, org1.peer.chaincode, org1.peer.operations), (2002, 2003, 2004));
        assert_eq!(org1.peer.couchdb, Some(2005));
        assert_eq!(org1.ca, Some([2006, 2007]));
        assert_eq!(plan.organizations[1].peer.api, 2008);
        assert_eq!(plan.console, 2014);
    }

    /// Optional components take no ports.
    #[test]
    fn test_optional_components_take_no_ports() {
        let ports = PortAllocator::default();
        let plan = LaunchPlan::allocate(&ports, &organizations(&["Org1"]), false, false).unwrap();
        assert_eq!(plan.organizations[0].peer.couchdb, None);
        assert_eq!(plan.organizations[0].ca, None);
        assert_eq!(plan.console, 2005);
    }

    /// Too many organizations exhaust the pool.
    #[test]
    fn test_too_many_organizations_exhaust_the_pool() {
        let ports = PortAllocator::new(2000, 2010);
        let error = LaunchPlan::allocate(&ports, &organizations(&["Org1", "Org2"]), true, true).unwrap_err();
        assert!(matches!(error, ConfigError::PortsExhausted { .. }));
    }

    /// Restore wipes directory on mismatch.
    #[tokio::test]
    async fn test_restore_wipes_directory_on_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.directory = dir.path().join("data");
        std::fs::create_dir_all(&config.directory).unwrap();
        std::fs::write(config.directory.join("leftover"), b"x").unwrap();
        PersistedState::new(vec![9]).save(&config.directory).await.unwrap();

        let network = Network::new(config).unwrap();
        let hash = network.config.hash().unwrap();
        assert!(network.restore(&hash).await.unwrap().is_none());
        assert!(!network.config.directory.join("leftover").exists());
        assert!(network.config.directory.is_dir());
    }

    /// Restore keeps matching state.
    #[tokio::test]
    async fn test_restore_keeps_matching_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.directory = dir.path().join("data");
        std::fs::create_dir_all(&config.directory).unwrap();
        let hash = config.hash().unwrap();
        PersistedState::new(hash.clone()).save(&config.directory).await.unwrap();

        let network = Network::new(config).unwrap();
        let restored = network.restore(&hash).await.unwrap().unwrap();
        assert!(restored.matches(&hash));
        assert!(network.config.directory.join("state.json").exists());
    }

    fn two_org_config(directory: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.directory = directory.join("data");
        config.endorsing_organizations = vec![OrganizationConfig::new("Org2"), OrganizationConfig::new("Org1")];
        config
    }

    /// The start stages up to organization creation, then the state write that ends a start.
    async fn bootstrap(network: &Network) -> (bool, Vec<Arc<Organization>>) {
        let hash = network.config.hash().unwrap();
        let restored = network.restore(&hash).await.unwrap();
        let (ordering, endorsing) = network.create_organizations(restored.as_ref()).await.unwrap();
        bootstrap_state(hash, &ordering, &endorsing, None)
            .save(&network.config.directory)
            .await
            .unwrap();
        let mut organizations = vec![ordering];
        organizations.extend(endorsing);
        (restored.is_some(), organizations)
    }

    fn ca_material(organizations: &[Arc<Organization>]) -> Vec<(String, String)> {
        organizations
            .iter()
            .map(|organization| {
                (
                    organization.msp_id().to_string(),
                    organization.ca().certificate_pem().to_string(),
                )
            })
            .collect()
    }

    /// Starting twice against an unchanged configuration restores the same MSP IDs and
    /// CA material, and the second start is recognised as a restore.
    #[tokio::test]
    async fn test_unchanged_config_restores_organizations() {
        let dir = tempfile::tempdir().unwrap();
        let network = Network::new(two_org_config(dir.path())).unwrap();

        let (first_restored, first) = bootstrap(&network).await;
        let (second_restored, second) = bootstrap(&network).await;

        assert!(!first_restored);
        assert!(second_restored, "channel creation is skipped on the second start");
        assert_eq!(ca_material(&first), ca_material(&second));
        let names: Vec<_> = second.iter().map(|organization| organization.name()).collect();
        assert_eq!(names, ["Orderer", "Org1", "Org2"]);
        assert_ne!(
            first[1].admin().certificate_pem(),
            second[1].admin().certificate_pem(),
            "administrators are always reissued"
        );
    }

    /// Changing any field wipes the working directory and issues fresh CA material.
    #[tokio::test]
    async fn test_changed_config_rebootstraps_organizations() {
        let dir = tempfile::tempdir().unwrap();
        let original = Network::new(two_org_config(dir.path())).unwrap();
        let (_, first) = bootstrap(&original).await;
        std::fs::write(original.config.directory.join("leftover"), b"x").unwrap();

        let mut config = two_org_config(dir.path());
        config.timeout = "45s".to_string();
        let changed = Network::new(config).unwrap();
        let (restored, second) = bootstrap(&changed).await;

        assert!(!restored);
        assert!(!changed.config.directory.join("leftover").exists());
        for (before, after) in first.iter().zip(&second) {
            assert_eq!(before.msp_id(), after.msp_id());
            assert_ne!(before.ca().certificate_pem(), after.ca().certificate_pem());
        }
    }

    /// Generated TLS identity covers localhost.
    #[test]
    fn test_generated_tls_identity_covers_localhost() {
        let mut config = Config::default();
        config.tls.enabled = true;
        let network = Network::new(config).unwrap();
        let tls = network.tls_identity(None).unwrap().unwrap();
        assert_eq!(tls.name(), "*.127-0-0-1.nip.io");
        assert!(network.tls_identity(None).unwrap().is_some());

        let mut config = Config::default();
        config.tls.enabled = false;
        assert!(Network::new(config).unwrap().tls_identity(None).unwrap().is_none());
    }

    /// Stop without start is harmless.
    #[tokio::test]
    async fn test_stop_without_start_is_harmless() {
        let mut network = Network::new(Config::default()).unwrap();
        network.stop().await;
        network.wait().await;
        assert!(!network.is_running());
        assert!(network.chaincode_client().is_none());
    }
}
