//! Readiness probes.
//!
//! A probe answers one question: is the process ready yet? The supervisor calls it on a
//! fixed interval until it says yes or the start-up timeout expires. A probe must not
//! fail; anything short of "ready" is simply "not yet".

use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::trace;
use url::Url;

/// Decides whether a supervised process is ready.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn ready(&self) -> bool;

    /// Short description for logs.
    fn describe(&self) -> String;
}

const PROBE_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Ready when an HTTP GET of `url` answers with the expected status.
#[derive(Debug, Clone)]
pub struct HttpStatus {
    url: Url,
    expected: u16,
    client: reqwest::Client,
}

impl HttpStatus {
    /// `GET url` must return 200.
    pub fn ok(url: Url) -> Self {
        Self::new(url, 200, None)
    }

    /// `GET url` must return `expected`; `tls_ca` is trusted for `https` URLs.
    pub fn new(url: Url, expected: u16, tls_ca: Option<&str>) -> Self {
        let mut builder = reqwest::Client::builder().timeout(PROBE_REQUEST_TIMEOUT);
        if let Some(certificate) = tls_ca.and_then(|pem| reqwest::Certificate::from_pem(pem.as_bytes()).ok()) {
            builder = builder.add_root_certificate(certificate);
        }
        let client = builder.build().unwrap_or_default();
        Self { url, expected, client }
    }

    /// The health endpoint of an operations server: `GET <base>/healthz` must return 200.
    pub fn healthz(operations: &Url, tls_ca: Option<&str>) -> Self {
        let mut url = operations.clone();
        url.set_path("/healthz");
        Self::new(url, 200, tls_ca)
    }
}

#[async_trait]
impl ReadinessProbe for HttpStatus {
    async fn ready(&self) -> bool {
        match self.client.get(self.url.clone()).send().await {
            Ok(response) => response.status().as_u16() == self.expected,
            Err(e) => {
                trace!(url = %self.url, error = %e, "Probe request failed");
                false
            }
        }
    }

    fn describe(&self) -> String {
        format!("GET {} -> {}", self.url, self.expected)
    }
}

/// Ready when an arbitrary async check succeeds. Used for protocol-level smoke checks.
pub struct Check {
    description: String,
    check: Box<dyn Fn() -> BoxFuture<'static, bool> + Send + Sync>,
}

impl Check {
    pub fn new<F>(description: impl Into<String>, check: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, bool> + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            check: Box::new(check),
        }
    }
}

#[async_trait]
impl ReadinessProbe for Check {
    async fn ready(&self) -> bool {
        (self.check)().await
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

/// Ready when every inner probe is ready, checked in order.
pub struct AllOf(pub Vec<Box<dyn ReadinessProbe>>);

#[async_trait]
impl ReadinessProbe for AllOf {
    async fn ready(&self) -> bool {
        for probe in &self.0 {
            if !probe.ready().await {
                return false;
            }
        }
        true
    }

    fn describe(&self) -> String {
        self.0
            .iter()
            .map(|probe| probe.describe())
            .collect::<Vec<_>>()
            .join(" and ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// All of requires every probe.
    #[tokio::test]
    async fn test_all_of_requires_every_probe() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let probe = AllOf(vec![
            Box::new(Check::new("yes", || async { true }.boxed())),
            Box::new(Check::new("no", move || {
                counted.fetch_add(1, Ordering::SeqCst);
                async { false }.boxed()
            })),
        ]);
        assert!(!probe.ready().await);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(probe.describe(), "yes and no");
    }

    /// Unreachable HTTP endpoint is not ready.
    #[tokio::test]
    async fn test_unreachable_http_endpoint_is_not_ready() {
        let probe = HttpStatus::ok(Url::parse("http://127.0.0.1:1/healthz").unwrap());
        assert!(!probe.ready().await);
    }
}
