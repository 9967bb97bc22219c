use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

use super::error::Result;
use crate::infrastructure::certs::CertificateManager;

/// Picks the leaf certificate for the SNI name, or the default certificate.
///
/// The handshake never fails for lack of a leaf: unknown names, clients
/// without SNI and lookup errors all get the self-signed fallback.
#[derive(Debug)]
pub struct SniResolver {
    certs: Arc<CertificateManager>,
}

impl SniResolver {
    pub fn new(certs: Arc<CertificateManager>) -> Self {
        Self { certs }
    }

    fn fallback(&self) -> Option<Arc<CertifiedKey>> {
        match self.certs.default_certificate() {
            Ok(key) => Some(key),
            Err(e) => {
                tracing::error!(error = %e, "default certificate unavailable");
                None
            }
        }
    }
}

impl ResolvesServerCert for SniResolver {
    fn resolve(&self, hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let Some(name) = hello.server_name() else {
            tracing::debug!("client sent no SNI, serving default certificate");
            return self.fallback();
        };

        // Runs inside the handshake on a runtime worker. Leaves are provisioned
        // before their route is published, so this is a memory hit; it only
        // reads disk or signs a new leaf for an expired or unprovisioned host.
        match self.certs.lookup(name) {
            Ok(Some(key)) => Some(key),
            Ok(None) => {
                tracing::warn!(host = %name, "no certificate issued for host, serving default certificate");
                self.fallback()
            }
            Err(e) => {
                tracing::warn!(host = %name, error = %e, "certificate lookup failed, serving default certificate");
                self.fallback()
            }
        }
    }
}

/// TLS acceptor backed by [`SniResolver`], HTTP/1.1 only.
pub fn acceptor(certs: Arc<CertificateManager>) -> Result<TlsAcceptor> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(SniResolver::new(certs)));
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}
