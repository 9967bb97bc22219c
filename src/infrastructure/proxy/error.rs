use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while accepting or routing a proxied connection.
///
/// None of these are fatal to the proxy except `Bind` and `Tls` at startup;
/// per-connection errors are answered with [`ProxyError::status`] when a
/// status applies and then logged.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("No service is registered for host '{0}'")]
    UnknownHost(String),

    #[error("Backend {backend} for '{host}' is unavailable after {attempts} attempts: {source}")]
    BackendUnavailable {
        host: String,
        backend: SocketAddr,
        attempts: u32,
        #[source]
        source: io::Error,
    },

    #[error("Request has no Host header")]
    MissingHost,

    #[error("Request head exceeds {0} bytes")]
    HeadTooLarge(usize),

    #[error("Timed out after {0:?} waiting for the request head")]
    HeadTimeout(Duration),

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Client closed the connection before sending a request")]
    ClientClosed,

    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] io::Error),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ProxyError {
    /// HTTP status sent back to the client for this error, if any.
    pub fn status(&self) -> Option<(u16, &'static str)> {
        match self {
            Self::UnknownHost(_) => Some((502, "Bad Gateway")),
            Self::BackendUnavailable { .. } => Some((503, "Service Unavailable")),
            Self::MissingHost | Self::MalformedRequest(_) => Some((400, "Bad Request")),
            Self::HeadTooLarge(_) => Some((431, "Request Header Fields Too Large")),
            Self::HeadTimeout(_) => Some((408, "Request Timeout")),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_statuses() {
        assert_eq!(ProxyError::UnknownHost("x.test".into()).status(), Some((502, "Bad Gateway")));

        let unavailable = ProxyError::BackendUnavailable {
            host: "api.test".into(),
            backend: SocketAddr::from(([127, 0, 0, 1], 3000)),
            attempts: 3,
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        assert_eq!(unavailable.status().map(|s| s.0), Some(503));
        assert!(unavailable.to_string().contains("after 3 attempts"));
        assert!(ProxyError::ClientClosed.status().is_none());
    }
}
