//! The shared CouchDB state database and the per-organization proxies in front of it.
//!
//! ## Architecture Note
//! One CouchDB instance serves every peer. Each organization's peer talks to its own
//! proxy, which prefixes database names with `<org>_` on the way in and strips the
//! prefix from `/_all_dbs` on the way out, so peers never see each other's state.
//! CouchDB itself always runs over plain HTTP because peers do not support TLS to it.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use super::error::ComponentError;
use crate::supervisor::{HttpStatus, ReadinessProbe, POLL_INTERVAL};

/// Where the shared CouchDB listens.
pub const COUCHDB_URL: &str = "http://localhost:5984";

/// The shared CouchDB instance; started outside this process.
#[derive(Debug, Clone)]
pub struct CouchDb {
    internal: Url,
    external: Url,
}

impl CouchDb {
    pub fn new(internal: Url, external: Url) -> Self {
        Self { internal, external }
    }

    pub fn internal(&self) -> &Url {
        &self.internal
    }

    pub fn external(&self) -> &Url {
        &self.external
    }

    /// Blocks until `GET /_up` answers 200, polling every [`POLL_INTERVAL`].
    #[instrument(skip(self), fields(url = %self.internal))]
    pub async fn wait_for(&self, timeout: Duration) -> Result<(), ComponentError> {
        let mut up = self.internal.clone();
        up.set_path("/_up");
        let probe = HttpStatus::ok(up);
        let poll = async {
            let mut ticker = tokio::time::interval(POLL_INTERVAL);
            loop {
                ticker.tick().await;
                if probe.ready().await {
                    return;
                }
            }
        };
        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| ComponentError::Timeout("CouchDB"))?;
        info!("CouchDB has started");
        Ok(())
    }

    /// Starts a proxy for the organization labelled `prefix` on `port`.
    #[instrument(skip(self))]
    pub async fn start_proxy(&self, prefix: &str, port: u16) -> Result<CouchDbProxy, ComponentError> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|source| ComponentError::Bind { port, source })?;
        let state = Arc::new(ProxyState {
            client: reqwest::Client::new(),
            target: self.internal.clone(),
            prefix: prefix.to_string(),
        });
        let router = Router::new().fallback(forward).with_state(state);
        let (shutdown, signal) = oneshot::channel::<()>();
        let name = prefix.to_string();
        let task = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = signal.await;
                })
                .await;
            if let Err(e) = served {
                error!(prefix = %name, error = %e, "CouchDB proxy failed");
            }
        });
        info!("CouchDB proxy started");
        Ok(CouchDbProxy {
            prefix: prefix.to_string(),
            port,
            shutdown: Some(shutdown),
            task,
        })
    }
}

/// A running per-organization proxy.
#[derive(Debug)]
pub struct CouchDbProxy {
    prefix: String,
    port: u16,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl CouchDbProxy {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Err(e) = self.task.await {
            warn!(prefix = %self.prefix, error = %e, "CouchDB proxy task failed");
        }
    }
}

struct ProxyState {
    client: reqwest::Client,
    target: Url,
    prefix: String,
}

/// Rewrites a database path to the organization's namespace. The root and system paths
/// (starting with `/_`) are left alone.
pub fn rewrite_path(prefix: &str, path: &str) -> String {
    if path == "/" || path.starts_with("/_") {
        path.to_string()
    } else {
        format!("/{prefix}_{}", path.trim_start_matches('/'))
    }
}

/// Keeps system databases and the organization's own databases, without the prefix.
pub fn filter_databases(prefix: &str, databases: Vec<String>) -> Vec<String> {
    let own = format!("{prefix}_");
    databases
        .into_iter()
        .filter_map(|db| {
            if db.starts_with('_') {
                Some(db)
            } else {
                db.strip_prefix(&own).map(str::to_string)
            }
        })
        .collect()
}

async fn forward(
    State(proxy): State<Arc<ProxyState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = rewrite_path(&proxy.prefix, uri.path());
    let mut target = proxy.target.clone();
    target.set_path(&path);
    target.set_query(uri.query());
    debug!(%method, from = %uri.path(), to = %path, "Proxying");

    let mut request = proxy.client.request(method, target).body(body);
    for (name, value) in headers.iter().filter(|(name, _)| *name != header::HOST) {
        request = request.header(name, value);
    }
    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => return (StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
    };

    let status = response.status();
    let mut builder = Response::builder().status(status);
    for (name, value) in response.headers() {
        if name != header::CONTENT_LENGTH && name != header::TRANSFER_ENCODING {
            builder = builder.header(name, value);
        }
    }
    let mut bytes = match response.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => return (StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
    };
    if path == "/_all_dbs" && status == StatusCode::OK {
        match serde_json::from_slice::<Vec<String>>(&bytes) {
            Ok(databases) => {
                let filtered = filter_databases(&proxy.prefix, databases);
                bytes = serde_json::to_vec(&filtered).unwrap_or_default().into();
            }
            Err(e) => return (StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
        }
    }
    builder
        .body(Body::from(bytes))
        .unwrap_or_else(|e| (StatusCode::BAD_GATEWAY, e.to_string()).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Json;

    /// Database paths are namespaced.
    #[test]
    fn test_database_paths_are_namespaced() {
        assert_eq!(rewrite_path("org1", "/mychannel_lscc"), "/org1_mychannel_lscc");
        assert_eq!(rewrite_path("org1", "/mychannel_/_design/x"), "/org1_mychannel_/_design/x");
        assert_eq!(rewrite_path("org1", "/"), "/");
        assert_eq!(rewrite_path("org1", "/_all_dbs"), "/_all_dbs");
        assert_eq!(rewrite_path("org1", "/_up"), "/_up");
    }

    /// Other organizations are hidden.
    #[test]
    fn test_other_organizations_are_hidden() {
        let databases = vec![
            "_replicator".to_string(),
            "org1_mychannel_".to_string(),
            "org2_mychannel_".to_string(),
            "unrelated".to_string(),
        ];
        assert_eq!(filter_databases("org1", databases), vec!["_replicator", "mychannel_"]);
    }

    async fn fake_couchdb() -> Url {
        let router = Router::new()
            .route("/_up", get(|| async { Json(serde_json::json!({ "status": "ok" })) }))
            .route(
                "/_all_dbs",
                get(|| async { Json(vec!["_users", "org1_channel1_", "org2_channel1_"]) }),
            )
            .route("/org1_channel1_", get(|| async { "org1 database" }));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        Url::parse(&format!("http://{addr}")).unwrap()
    }

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
    }

    /// Proxy namespaces requests.
    #[tokio::test]
    async fn test_proxy_namespaces_requests() {
        let upstream = fake_couchdb().await;
        let couchdb = CouchDb::new(upstream.clone(), upstream);
        couchdb.wait_for(Duration::from_secs(5)).await.unwrap();

        let port = free_port();
        let proxy = couchdb.start_proxy("org1", port).await.unwrap();
        let base = format!("http://127.0.0.1:{port}");

        let databases: Vec<String> = reqwest::get(format!("{base}/_all_dbs")).await.unwrap().json().await.unwrap();
        assert_eq!(databases, vec!["_users", "channel1_"]);

        let body = reqwest::get(format!("{base}/channel1_")).await.unwrap().text().await.unwrap();
        assert_eq!(body, "org1 database");

        proxy.stop().await;
    }

    /// Waiting for absent CouchDB times out.
    #[tokio::test]
    async fn test_waiting_for_absent_couchdb_times_out() {
        let url = Url::parse(&format!("http://127.0.0.1:{}", free_port())).unwrap();
        let couchdb = CouchDb::new(url.clone(), url);
        let error = couchdb.wait_for(Duration::from_millis(600)).await.unwrap_err();
        assert!(matches!(error, ComponentError::Timeout("CouchDB")));
    }
}
