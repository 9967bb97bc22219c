use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Whether a route is served over plain HTTP only or also terminated with TLS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    Plain,
    Tls,
}

impl fmt::Display for TlsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain => f.write_str("plain"),
            Self::Tls => f.write_str("tls"),
        }
    }
}

/// Hostname to backend mapping consulted by the proxy on every connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    /// Lowercased hostname without port
    pub hostname: String,
    /// Service that owns the route
    pub service: String,
    /// Address the proxy dials
    pub backend: SocketAddr,
    pub tls: TlsMode,
    /// Leaf certificate file when `tls` is `Tls`
    pub certificate: Option<PathBuf>,
}

impl RouteEntry {
    pub fn new(hostname: &str, service: impl Into<String>, backend: SocketAddr) -> Self {
        Self {
            hostname: normalize_host(hostname),
            service: service.into(),
            backend,
            tls: TlsMode::Plain,
            certificate: None,
        }
    }

    #[must_use]
    pub fn with_certificate(mut self, certificate: PathBuf) -> Self {
        self.tls = TlsMode::Tls;
        self.certificate = Some(certificate);
        self
    }
}

/// Lowercase a host and strip any `:port` suffix and trailing dot.
///
/// Bracketed IPv6 literals keep their brackets.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let without_port = if host.starts_with('[') {
        host.find(']').map_or(host, |end| &host[..=end])
    } else {
        host.rsplit_once(':')
            .filter(|(_, port)| port.chars().all(|c| c.is_ascii_digit()))
            .map_or(host, |(name, _)| name)
    };
    without_port.trim_end_matches('.').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("API.Shop.Test"), "api.shop.test");
        assert_eq!(normalize_host("api.shop.test:8443"), "api.shop.test");
        assert_eq!(normalize_host("api.shop.test."), "api.shop.test");
        assert_eq!(normalize_host("[::1]:8080"), "[::1]");
        assert_eq!(normalize_host(" localhost "), "localhost");
    }

    #[test]
    fn test_with_certificate_switches_mode() {
        let addr: SocketAddr = "127.0.0.1:3000".parse().unwrap();
        let route = RouteEntry::new("Api.Test", "api", addr);
        assert_eq!(route.hostname, "api.test");
        assert_eq!(route.tls, TlsMode::Plain);

        let route = route.with_certificate(PathBuf::from("/tmp/api.test.pem"));
        assert_eq!(route.tls, TlsMode::Tls);
        assert!(route.certificate.is_some());
    }
}
