//! HTTP health probing for supervised services.

use async_trait::async_trait;
use reqwest::redirect::Policy;

use crate::domain::models::HealthCheck;
use crate::domain::ports::HealthProbe;

/// Probes `http://127.0.0.1:<port><path>`; any 2xx or 3xx answer is healthy.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: reqwest::Client,
    host: String,
}

impl HttpHealthProbe {
    pub fn new() -> Self {
        Self::with_host("127.0.0.1")
    }

    pub fn with_host(host: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .no_proxy()
            .build()
            .unwrap_or_default();
        Self {
            client,
            host: host.into(),
        }
    }
}

impl Default for HttpHealthProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, port: u16, check: &HealthCheck) -> bool {
        let url = format!("http://{}:{port}{}", self.host, check.path);

        match self.client.get(&url).timeout(check.timeout).send().await {
            Ok(response) => {
                let status = response.status();
                let healthy = status.is_success() || status.is_redirection();
                if !healthy {
                    tracing::debug!(url = %url, status = %status, "health probe returned error status");
                }
                healthy
            }
            Err(e) => {
                tracing::trace!(url = %url, error = %e, "health probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn check(path: &str) -> HealthCheck {
        HealthCheck {
            path: path.to_string(),
            interval: Duration::from_secs(1),
            timeout: Duration::from_millis(500),
            retries: 3,
        }
    }

    fn port_of(server: &mockito::ServerGuard) -> u16 {
        server
            .host_with_port()
            .rsplit_once(':')
            .and_then(|(_, port)| port.parse().ok())
            .unwrap()
    }

    #[tokio::test]
    async fn test_probe_success_and_redirect() {
        let mut server = mockito::Server::new_async().await;
        let _ok = server.mock("GET", "/health").with_status(200).create_async().await;
        let _moved = server
            .mock("GET", "/moved")
            .with_status(302)
            .with_header("location", "/elsewhere")
            .create_async()
            .await;

        let probe = HttpHealthProbe::new();
        let port = port_of(&server);
        assert!(probe.probe(port, &check("/health")).await);
        assert!(probe.probe(port, &check("/moved")).await);
    }

    #[tokio::test]
    async fn test_probe_server_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server.mock("GET", "/health").with_status(503).create_async().await;

        let probe = HttpHealthProbe::new();
        assert!(!probe.probe(port_of(&server), &check("/health")).await);
    }

    #[tokio::test]
    async fn test_probe_connection_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let probe = HttpHealthProbe::new();
        assert!(!probe.probe(port, &check("/health")).await);
    }
}
