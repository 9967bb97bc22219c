use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use super::error::{ProxyError, Result};
use super::http::{error_response, read_head, MAX_HEAD_BYTES};
use super::relay::relay;
use crate::domain::models::{ProxyConfig, RouteEntry};
use crate::services::ServiceRegistry;

/// Listener and per-connection limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySettings {
    pub bind: String,
    pub http_port: u16,
    /// `None` disables the TLS listener
    pub https_port: Option<u16>,
    pub dial_timeout: Duration,
    pub dial_attempts: u32,
    pub header_timeout: Duration,
    pub max_head_bytes: usize,
}

impl From<&ProxyConfig> for ProxySettings {
    fn from(config: &ProxyConfig) -> Self {
        Self {
            bind: config.bind.clone(),
            http_port: config.http_port,
            https_port: config.https.then_some(config.https_port),
            dial_timeout: Duration::from_millis(config.dial_timeout_ms),
            dial_attempts: config.dial_attempts.max(1),
            header_timeout: Duration::from_millis(config.header_timeout_ms),
            max_head_bytes: MAX_HEAD_BYTES,
        }
    }
}

/// Resolves hostnames through the registry and dials the backend.
#[derive(Debug, Clone)]
pub struct ProxyRouter {
    registry: Arc<ServiceRegistry>,
    dial_timeout: Duration,
    dial_attempts: u32,
}

impl ProxyRouter {
    pub fn new(registry: Arc<ServiceRegistry>, dial_timeout: Duration, dial_attempts: u32) -> Self {
        Self {
            registry,
            dial_timeout,
            dial_attempts: dial_attempts.max(1),
        }
    }

    /// Find the route for `hostname` and open a connection to its backend.
    ///
    /// # Errors
    /// `UnknownHost` when no route exists, `BackendUnavailable` when every
    /// dial attempt failed or timed out
    pub async fn route_request(&self, hostname: &str) -> Result<(Arc<RouteEntry>, TcpStream)> {
        let route = self
            .registry
            .resolve(hostname)
            .await
            .ok_or_else(|| ProxyError::UnknownHost(hostname.to_string()))?;

        let mut backoff = ExponentialBackoff {
            current_interval: Duration::from_millis(50),
            initial_interval: Duration::from_millis(50),
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: Duration::from_millis(500),
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match timeout(self.dial_timeout, TcpStream::connect(route.backend)).await {
                Ok(Ok(stream)) => {
                    // Best effort; latency only
                    let _ = stream.set_nodelay(true);
                    return Ok((route, stream));
                }
                Ok(Err(e)) => e,
                Err(_) => io::Error::new(io::ErrorKind::TimedOut, "dial timed out"),
            };

            if attempt >= self.dial_attempts {
                return Err(ProxyError::BackendUnavailable {
                    host: route.hostname.clone(),
                    backend: route.backend,
                    attempts: attempt,
                    source: error,
                });
            }
            tracing::debug!(host = %route.hostname, backend = %route.backend, attempt, error = %error, "backend dial failed, retrying");
            tokio::time::sleep(backoff.next_backoff().unwrap_or(backoff.max_interval)).await;
        }
    }
}

struct ProxyContext {
    router: ProxyRouter,
    header_timeout: Duration,
    max_head_bytes: usize,
}

/// Bound HTTP and optional HTTPS listeners.
pub struct ProxyServer {
    http: TcpListener,
    https: Option<(TcpListener, TlsAcceptor)>,
    ctx: Arc<ProxyContext>,
}

impl ProxyServer {
    /// Bind the listeners. The HTTPS listener is bound only when both a port
    /// and an acceptor are given.
    ///
    /// # Errors
    /// `Bind` when a listener address is invalid or in use
    pub async fn bind(
        settings: &ProxySettings,
        registry: Arc<ServiceRegistry>,
        tls: Option<TlsAcceptor>,
    ) -> Result<Self> {
        let http = bind_listener(&settings.bind, settings.http_port).await?;
        let https = match (settings.https_port, tls) {
            (Some(port), Some(acceptor)) => Some((bind_listener(&settings.bind, port).await?, acceptor)),
            _ => None,
        };

        Ok(Self {
            http,
            https,
            ctx: Arc::new(ProxyContext {
                router: ProxyRouter::new(registry, settings.dial_timeout, settings.dial_attempts),
                header_timeout: settings.header_timeout,
                max_head_bytes: settings.max_head_bytes,
            }),
        })
    }

    pub fn http_addr(&self) -> io::Result<SocketAddr> {
        self.http.local_addr()
    }

    pub fn https_addr(&self) -> Option<io::Result<SocketAddr>> {
        self.https.as_ref().map(|(listener, _)| listener.local_addr())
    }

    /// Accept connections until `shutdown` fires; open relays are cancelled too.
    pub async fn run(self, shutdown: CancellationToken) {
        let Self { http, https, ctx } = self;

        let plain = accept_loop(http, None, ctx.clone(), shutdown.clone());
        match https {
            Some((listener, acceptor)) => {
                let secure = accept_loop(listener, Some(acceptor), ctx, shutdown);
                tokio::join!(plain, secure);
            }
            None => plain.await,
        }
        tracing::info!("proxy stopped");
    }
}

async fn bind_listener(host: &str, port: u16) -> Result<TcpListener> {
    let addr = format!("{host}:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| ProxyError::Bind {
            addr: addr.clone(),
            source,
        })?;
    tracing::info!(addr = %addr, "proxy listening");
    Ok(listener)
}

async fn accept_loop(
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    ctx: Arc<ProxyContext>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        // e.g. EMFILE; back off briefly and keep accepting
                        tracing::warn!(error = %e, "accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        continue;
                    }
                };
                let ctx = ctx.clone();
                let tls = tls.clone();
                let cancel = shutdown.child_token();
                tokio::spawn(async move {
                    handle_connection(stream, peer, tls, ctx, cancel).await;
                });
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    tls: Option<TlsAcceptor>,
    ctx: Arc<ProxyContext>,
    cancel: CancellationToken,
) {
    let result = match tls {
        None => proxy_connection(stream, peer, "http", None, &ctx, &cancel).await,
        Some(acceptor) => match timeout(ctx.header_timeout, acceptor.accept(stream)).await {
            Ok(Ok(tls_stream)) => {
                let sni = tls_stream.get_ref().1.server_name().map(str::to_string);
                proxy_connection(tls_stream, peer, "https", sni, &ctx, &cancel).await
            }
            Ok(Err(e)) => Err(ProxyError::Handshake(e)),
            Err(_) => Err(ProxyError::HeadTimeout(ctx.header_timeout)),
        },
    };

    match result {
        Ok(()) | Err(ProxyError::ClientClosed) => {}
        Err(e @ (ProxyError::UnknownHost(_) | ProxyError::BackendUnavailable { .. })) => {
            tracing::warn!(peer = %peer, error = %e, "request not routed");
        }
        Err(e) => tracing::debug!(peer = %peer, error = %e, "connection failed"),
    }
}

async fn proxy_connection<S>(
    mut client: S,
    peer: SocketAddr,
    proto: &str,
    sni: Option<String>,
    ctx: &ProxyContext,
    cancel: &CancellationToken,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let head = match read_head(&mut client, ctx.max_head_bytes, ctx.header_timeout).await {
        Ok(head) => head,
        Err(e) => return reject(client, e).await,
    };

    let header_host = head.host().map(str::to_string);
    let Some(target) = sni.or_else(|| header_host.clone()) else {
        return reject(client, ProxyError::MissingHost).await;
    };

    let (route, mut backend) = match ctx.router.route_request(&target).await {
        Ok(found) => found,
        Err(e) => return reject(client, e).await,
    };

    let forwarded_host = header_host.unwrap_or_else(|| target.clone());
    backend
        .write_all(&head.forwarded(peer, proto, &forwarded_host))
        .await?;

    tracing::debug!(host = %route.hostname, service = %route.service, peer = %peer, "relaying connection");
    let stats = relay(client, backend, cancel).await;
    tracing::debug!(
        host = %route.hostname,
        bytes_up = stats.client_to_backend,
        bytes_down = stats.backend_to_client,
        "connection closed"
    );
    Ok(())
}

/// Answer the client with the error's status (if any) and close.
async fn reject<S>(mut client: S, error: ProxyError) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    if let Some((status, reason)) = error.status() {
        let body = error_response(status, reason, &error.to_string());
        // Client may have hung up already
        let _ = client.write_all(&body).await;
        let _ = client.shutdown().await;
    }
    Err(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn settings() -> ProxySettings {
        ProxySettings {
            bind: "127.0.0.1".into(),
            http_port: 0,
            https_port: None,
            dial_timeout: Duration::from_millis(200),
            dial_attempts: 2,
            header_timeout: Duration::from_secs(2),
            max_head_bytes: MAX_HEAD_BYTES,
        }
    }

    #[test]
    fn test_settings_from_config() {
        let config = ProxyConfig {
            https: false,
            dial_attempts: 0,
            ..ProxyConfig::default()
        };
        let settings = ProxySettings::from(&config);
        assert_eq!(settings.https_port, None);
        assert_eq!(settings.dial_attempts, 1);
        assert_eq!(settings.http_port, 8080);
    }

    #[tokio::test]
    async fn test_unknown_host_answers_502() {
        let registry = Arc::new(ServiceRegistry::new());
        let server = ProxyServer::bind(&settings(), registry, None).await.unwrap();
        let addr = server.http_addr().unwrap();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(server.run(shutdown.clone()));

        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_all(b"GET / HTTP/1.1\r\nHost: nowhere.test\r\n\r\n").await.unwrap();
        let mut response = String::new();
        conn.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 502 Bad Gateway"), "{response}");

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_host_answers_400() {
        let registry = Arc::new(ServiceRegistry::new());
        let server = ProxyServer::bind(&settings(), registry, None).await.unwrap();
        let addr = server.http_addr().unwrap();
        let shutdown = CancellationToken::new();
        tokio::spawn(server.run(shutdown.clone()));

        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_all(b"GET / HTTP/1.0\r\n\r\n").await.unwrap();
        let mut response = String::new();
        conn.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 400 Bad Request"));
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_route_request_backend_unavailable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let backend = listener.local_addr().unwrap();
        drop(listener);

        let registry = Arc::new(ServiceRegistry::new());
        registry.register(RouteEntry::new("api.test", "api", backend)).await;
        let router = ProxyRouter::new(registry, Duration::from_millis(100), 3);

        let err = router.route_request("api.test").await.unwrap_err();
        assert!(matches!(err, ProxyError::BackendUnavailable { attempts: 3, .. }));
    }
}
