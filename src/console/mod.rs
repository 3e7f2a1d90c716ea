//! The read-only console API and the seam for HTTP frontends.
//!
//! ## Architecture Note
//! Frontends are the HTTP collaborators that sit in front of a running network: this
//! console, and the host-name routing proxy that lets one external port reach every
//! component. The network registers each started [`Component`] with every frontend,
//! starts frontends last and stops them first.
//!
//! The console answers three routes:
//!
//! | Route | Response |
//! |---|---|
//! | `GET /ak/api/v1/health` | `{}` |
//! | `GET /ak/api/v1/components` | every component description |
//! | `GET /ak/api/v1/components/{id}` | one description, or 404 |
//!
//! Descriptions are built per request. A CA admin identity is bound only once its CA
//! has answered enrollment, and URLs depend on the `Host` the request arrived on.

pub mod component;
pub mod error;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};
use url::Url;

pub use component::{Component, HostRewrite};
pub use error::ConsoleError;

/// An HTTP collaborator of the network.
#[async_trait]
pub trait Frontend: Send + Sync {
    fn name(&self) -> &str;

    fn register(&mut self, component: &Component);

    async fn start(&mut self) -> Result<(), ConsoleError>;

    async fn stop(&mut self) -> Result<(), ConsoleError>;
}

struct ConsoleState {
    url: Url,
    components: Vec<Component>,
}

impl ConsoleState {
    fn describe(&self, headers: &HeaderMap) -> BTreeMap<String, Value> {
        let host = headers.get(header::HOST).and_then(|value| value.to_str().ok());
        let rewrite = HostRewrite::for_request(&self.url, host);
        let mut descriptions = BTreeMap::new();
        for component in &self.components {
            component.describe(&rewrite, &mut descriptions);
        }
        descriptions
    }
}

struct Running {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Serves component descriptions on `port`; `url` is its external address.
pub struct Console {
    port: u16,
    url: Url,
    components: Vec<Component>,
    running: Option<Running>,
}

impl Console {
    pub fn new(port: u16, url: &str) -> Result<Self, ConsoleError> {
        Ok(Self {
            port,
            url: Url::parse(url)?,
            components: Vec::new(),
            running: None,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn router(&self) -> Router {
        let state = Arc::new(ConsoleState {
            url: self.url.clone(),
            components: self.components.clone(),
        });
        Router::new()
            .route("/ak/api/v1/health", get(health))
            .route("/ak/api/v1/components", get(list_components))
            .route("/ak/api/v1/components/{id}", get(get_component))
            .with_state(state)
    }
}

async fn health() -> Json<Value> {
    Json(serde_json::json!({}))
}

async fn list_components(State(state): State<Arc<ConsoleState>>, headers: HeaderMap) -> Json<Vec<Value>> {
    Json(state.describe(&headers).into_values().collect())
}

async fn get_component(
    State(state): State<Arc<ConsoleState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    match state.describe(&headers).remove(&id) {
        Some(component) => Json(component).into_response(),
        None => {
            debug!(%id, "Unknown component");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

#[async_trait]
impl Frontend for Console {
    fn name(&self) -> &str {
        "console"
    }

    fn register(&mut self, component: &Component) {
        self.components.push(component.clone());
    }

    #[instrument(skip(self), fields(port = self.port))]
    async fn start(&mut self) -> Result<(), ConsoleError> {
        if self.running.is_some() {
            return Err(ConsoleError::AlreadyRunning {
                frontend: self.name().to_string(),
            });
        }
        let port = self.port;
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|source| ConsoleError::Bind { port, source })?;
        let router = self.router();
        let (shutdown, signal) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = signal.await;
                })
                .await;
            if let Err(e) = served {
                error!(error = %e, "Console server failed");
            }
        });
        self.running = Some(Running { shutdown, task });
        info!(url = %self.url, "Console started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), ConsoleError> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        let _ = running.shutdown.send(());
        running.task.await.map_err(|e| ConsoleError::Stopped {
            frontend: self.name().to_string(),
            reason: e.to_string(),
        })?;
        info!("Console stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Organization;

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
    }

    /// Serves registered components.
    #[tokio::test]
    async fn test_serves_registered_components() {
        let port = free_port();
        let mut console = Console::new(port, "http://console.127-0-0-1.nip.io:8080").unwrap();
        let org1 = Arc::new(Organization::new("Org1", None).unwrap());
        console.register(&Component::Organization(org1));
        console.start().await.unwrap();

        let base = format!("http://127.0.0.1:{port}/ak/api/v1");
        let health: Value = reqwest::get(format!("{base}/health")).await.unwrap().json().await.unwrap();
        assert_eq!(health, serde_json::json!({}));

        let components: Vec<Value> = reqwest::get(format!("{base}/components")).await.unwrap().json().await.unwrap();
        assert_eq!(components.len(), 1);
        assert_eq!(components[0]["id"], "org1admin");

        let admin = reqwest::get(format!("{base}/components/org1admin")).await.unwrap();
        assert_eq!(admin.status(), 200);
        let missing = reqwest::get(format!("{base}/components/nope")).await.unwrap();
        assert_eq!(missing.status(), 404);

        console.stop().await.unwrap();
    }

    /// Second start is rejected.
    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let mut console = Console::new(free_port(), "http://console.127-0-0-1.nip.io:8080").unwrap();
        console.start().await.unwrap();
        assert!(matches!(console.start().await, Err(ConsoleError::AlreadyRunning { .. })));
        console.stop().await.unwrap();
        console.stop().await.unwrap();
    }
}
