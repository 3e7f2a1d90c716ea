//! Component endpoints.
//!
//! Every listener a component opens has two addresses. The internal one is
//! `localhost:<allocated port>` and is what this process talks to. The external one is
//! `<label>.<domain>:<configured port>` and is what clients outside see, routed by the
//! HTTP proxy on the host name.

use url::Url;

/// URL scheme for gRPC listeners.
pub fn grpc_scheme(tls: bool) -> &'static str {
    if tls {
        "grpcs"
    } else {
        "grpc"
    }
}

/// URL scheme for HTTP listeners.
pub fn http_scheme(tls: bool) -> &'static str {
    if tls {
        "https"
    } else {
        "http"
    }
}

/// The internal and external addresses of one listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    port: u16,
    internal: Url,
    external: Url,
}

impl Endpoint {
    pub fn new(scheme: &str, label: &str, domain: &str, external_port: u16, port: u16) -> Result<Self, url::ParseError> {
        Ok(Self {
            port,
            internal: Url::parse(&format!("{scheme}://localhost:{port}"))?,
            external: Url::parse(&format!("{scheme}://{label}.{domain}:{external_port}"))?,
        })
    }

    /// The allocated port the component listens on.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn internal(&self) -> &Url {
        &self.internal
    }

    pub fn external(&self) -> &Url {
        &self.external
    }

    /// `localhost:<port>`.
    pub fn internal_host(&self) -> String {
        format!("localhost:{}", self.port)
    }

    /// `<label>.<domain>:<external port>`.
    pub fn external_host(&self) -> String {
        format!("{}:{}", self.external_hostname(), self.external_port())
    }

    pub fn external_hostname(&self) -> &str {
        self.external.host_str().unwrap_or_default()
    }

    pub fn external_port(&self) -> u16 {
        self.external.port_or_known_default().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Internal and external endpoint addresses.
    #[test]
    fn test_endpoint_addresses() {
        let endpoint = Endpoint::new(grpc_scheme(false), "org1peer-api", "127-0-0-1.nip.io", 8080, 2001).unwrap();
        assert_eq!(endpoint.internal().as_str(), "grpc://localhost:2001");
        assert_eq!(endpoint.external().as_str(), "grpc://org1peer-api.127-0-0-1.nip.io:8080");
        assert_eq!(endpoint.external_host(), "org1peer-api.127-0-0-1.nip.io:8080");
        assert_eq!(endpoint.internal_host(), "localhost:2001");
    }

    /// Default HTTPS port is reported.
    #[test]
    fn test_default_https_port_is_reported() {
        let endpoint = Endpoint::new(http_scheme(true), "console", "example.org", 443, 2005).unwrap();
        assert_eq!(endpoint.external_port(), 443);
        assert_eq!(endpoint.external_host(), "console.example.org:443");
    }
}
