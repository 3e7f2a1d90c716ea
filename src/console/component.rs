//! JSON descriptions of registered components, in the shape client tooling imports.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use url::Url;

use crate::components::{CaNode, CouchDb, Endpoint, OrdererNode, PeerNode};
use crate::identity::Identity;
use crate::model::Organization;

/// Anything the network hands to a [`Frontend`](super::Frontend).
#[derive(Debug, Clone)]
pub enum Component {
    Organization(Arc<Organization>),
    Orderer(OrdererNode),
    Peer(PeerNode),
    Ca(CaNode),
    CouchDb(CouchDb),
}

/// Rewrites external URLs to the host a request actually arrived on.
#[derive(Debug, Clone, Default)]
pub struct HostRewrite {
    target: Option<(String, Option<u16>)>,
}

impl HostRewrite {
    /// Leaves URLs alone when the request came in on the console's own external host.
    pub fn for_request(console: &Url, host: Option<&str>) -> Self {
        let Some(host) = host else {
            return Self::default();
        };
        if host == authority(console) {
            return Self::default();
        }
        match Url::parse(&format!("http://{host}")) {
            Ok(parsed) => Self {
                target: parsed.host_str().map(|name| (name.to_string(), parsed.port())),
            },
            Err(_) => Self::default(),
        }
    }

    pub fn apply(&self, url: &Url) -> String {
        let Some((host, port)) = &self.target else {
            return url.to_string();
        };
        let mut rewritten = url.clone();
        if rewritten.set_host(Some(host)).is_err() || rewritten.set_port(*port).is_err() {
            return url.to_string();
        }
        rewritten.to_string()
    }
}

fn authority(url: &Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        _ => String::new(),
    }
}

#[derive(Debug, Serialize)]
struct Options {
    #[serde(rename = "grpc.default_authority")]
    default_authority: String,
    #[serde(rename = "grpc.ssl_target_name_override")]
    ssl_target_name_override: String,
}

impl Options {
    fn for_endpoint(endpoint: &Endpoint) -> Self {
        Self {
            default_authority: endpoint.external_host(),
            ssl_target_name_override: endpoint.external_host(),
        }
    }
}

#[derive(Debug, Serialize)]
struct IdentityView {
    id: String,
    display_name: String,
    #[serde(rename = "type")]
    kind: &'static str,
    cert: String,
    private_key: String,
    msp_id: String,
    wallet: String,
}

impl IdentityView {
    fn new(id: String, identity: &Identity, organization: &Organization) -> Self {
        Self {
            id,
            display_name: identity.name().to_string(),
            kind: "identity",
            cert: base64::encode(identity.certificate_pem()),
            private_key: base64::encode(identity.private_key_pem()),
            msp_id: organization.msp_id().to_string(),
            wallet: organization.name().to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct NodeView {
    id: String,
    display_name: String,
    #[serde(rename = "type")]
    kind: &'static str,
    api_url: String,
    api_options: Options,
    #[serde(skip_serializing_if = "Option::is_none")]
    chaincode_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    chaincode_options: Option<Options>,
    operations_url: String,
    operations_options: Options,
    #[serde(skip_serializing_if = "Option::is_none")]
    ca_name: Option<String>,
    msp_id: String,
    wallet: String,
    identity: String,
}

impl Component {
    /// Every description this component contributes, keyed by component ID.
    pub fn describe(&self, rewrite: &HostRewrite, into: &mut BTreeMap<String, Value>) {
        match self {
            Component::Organization(organization) => {
                let id = format!("{}admin", organization.label());
                let view = IdentityView::new(id.clone(), organization.admin(), organization);
                insert(into, id, &view);
            }
            Component::Orderer(orderer) => {
                let organization = orderer.organization();
                let view = NodeView {
                    id: "orderer".to_string(),
                    display_name: "Orderer".to_string(),
                    kind: "fabric-orderer",
                    api_url: rewrite.apply(orderer.api().external()),
                    api_options: Options::for_endpoint(orderer.api()),
                    chaincode_url: None,
                    chaincode_options: None,
                    operations_url: rewrite.apply(orderer.operations().external()),
                    operations_options: Options::for_endpoint(orderer.operations()),
                    ca_name: None,
                    msp_id: orderer.msp_id().to_string(),
                    wallet: organization.name().to_string(),
                    identity: organization.admin().name().to_string(),
                };
                insert(into, view.id.clone(), &view);
            }
            Component::Peer(peer) => {
                let organization = peer.organization();
                let view = NodeView {
                    id: peer.id(),
                    display_name: format!("{} Peer", organization.name()),
                    kind: "fabric-peer",
                    api_url: rewrite.apply(peer.api().external()),
                    api_options: Options::for_endpoint(peer.api()),
                    chaincode_url: Some(rewrite.apply(peer.chaincode().external())),
                    chaincode_options: Some(Options::for_endpoint(peer.chaincode())),
                    operations_url: rewrite.apply(peer.operations().external()),
                    operations_options: Options::for_endpoint(peer.operations()),
                    ca_name: None,
                    msp_id: peer.msp_id().to_string(),
                    wallet: organization.name().to_string(),
                    identity: organization.admin().name().to_string(),
                };
                insert(into, view.id.clone(), &view);
                let (id, gateway) = gateway(peer, rewrite);
                into.insert(id, gateway);
            }
            Component::Ca(ca) => {
                let organization = ca.organization();
                let identity = organization
                    .ca_admin()
                    .map(|admin| admin.name().to_string())
                    .unwrap_or_default();
                let view = NodeView {
                    id: ca.id(),
                    display_name: format!("{} CA", organization.name()),
                    kind: "fabric-ca",
                    api_url: rewrite.apply(ca.api().external()),
                    api_options: Options::for_endpoint(ca.api()),
                    chaincode_url: None,
                    chaincode_options: None,
                    operations_url: rewrite.apply(ca.operations().external()),
                    operations_options: Options::for_endpoint(ca.operations()),
                    ca_name: Some(ca.id()),
                    msp_id: organization.msp_id().to_string(),
                    wallet: organization.name().to_string(),
                    identity,
                };
                insert(into, view.id.clone(), &view);
                if let Some(admin) = organization.ca_admin() {
                    let id = format!("{}caadmin", organization.label());
                    insert(into, id.clone(), &IdentityView::new(id, admin, organization));
                }
            }
            Component::CouchDb(_) => {}
        }
    }
}

fn insert<T: Serialize>(into: &mut BTreeMap<String, Value>, id: String, view: &T) {
    if let Ok(value) = serde_json::to_value(view) {
        into.insert(id, value);
    }
}

/// A connection profile for the organization's gateway.
fn gateway(peer: &PeerNode, rewrite: &HostRewrite) -> (String, Value) {
    let organization = peer.organization();
    let id = format!("{}gateway", organization.label());
    let host = peer.api().external_host();
    let name = format!("{} Gateway", organization.name());
    let value = json!({
        "id": id,
        "display_name": name,
        "type": "gateway",
        "name": name,
        "version": "1.0",
        "wallet": organization.name(),
        "client": {
            "organization": organization.name(),
            "connection": {
                "timeout": {
                    "peer": { "endorser": "300" },
                    "orderer": "300"
                }
            }
        },
        "organizations": {
            organization.name(): {
                "mspid": peer.msp_id(),
                "peers": [host]
            }
        },
        "peers": {
            host.clone(): {
                "url": rewrite.apply(peer.api().external()),
                "grpcOptions": {
                    "grpc.default_authority": host,
                    "grpc.ssl_target_name_override": host
                }
            }
        }
    });
    (id, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn console_url() -> Url {
        Url::parse("http://console.127-0-0-1.nip.io:8080").unwrap()
    }

    /// External host is left alone.
    #[test]
    fn test_external_host_is_left_alone() {
        let rewrite = HostRewrite::for_request(&console_url(), Some("console.127-0-0-1.nip.io:8080"));
        let target = Url::parse("grpc://org1peer-api.127-0-0-1.nip.io:8080").unwrap();
        assert_eq!(rewrite.apply(&target), "grpc://org1peer-api.127-0-0-1.nip.io:8080");
    }

    /// Other hosts are substituted.
    #[test]
    fn test_other_hosts_are_substituted() {
        let rewrite = HostRewrite::for_request(&console_url(), Some("localhost:9090"));
        let target = Url::parse("grpc://org1peer-api.127-0-0-1.nip.io:8080").unwrap();
        assert_eq!(rewrite.apply(&target), "grpc://localhost:9090");
        let target = Url::parse("http://org1peer-operations.127-0-0-1.nip.io:8080").unwrap();
        assert_eq!(rewrite.apply(&target), "http://localhost:9090/");
    }

    /// Organization admins are published as identities.
    #[test]
    fn test_organization_admin_identity() {
        let organization = Arc::new(Organization::new("Org1", None).unwrap());
        let mut components = BTreeMap::new();
        Component::Organization(organization.clone()).describe(&HostRewrite::default(), &mut components);
        let admin = &components["org1admin"];
        assert_eq!(admin["type"], "identity");
        assert_eq!(admin["display_name"], "Org1 Admin");
        assert_eq!(admin["msp_id"], "Org1MSP");
        assert_eq!(admin["wallet"], "Org1");
        let cert = base64::decode(admin["cert"].as_str().unwrap()).unwrap();
        assert_eq!(String::from_utf8(cert).unwrap(), organization.admin().certificate_pem());
    }
}
