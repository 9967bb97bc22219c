//! Integration tests for the reverse proxy and TLS termination.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use lokl::domain::models::RouteEntry;
use lokl::infrastructure::certs::CertificateManager;
use lokl::infrastructure::proxy::{acceptor, ProxyServer, ProxySettings, MAX_HEAD_BYTES};
use lokl::services::ServiceRegistry;

fn settings(https: bool) -> ProxySettings {
    ProxySettings {
        bind: "127.0.0.1".into(),
        http_port: 0,
        https_port: https.then_some(0),
        dial_timeout: Duration::from_millis(300),
        dial_attempts: 2,
        header_timeout: Duration::from_secs(2),
        max_head_bytes: MAX_HEAD_BYTES,
    }
}

/// Backend answering every connection with the request head it received.
async fn echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut conn, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match conn.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    head.len()
                );
                let _ = conn.write_all(response.as_bytes()).await;
                let _ = conn.write_all(&head).await;
            });
        }
    });
    addr
}

async fn start_proxy(
    registry: Arc<ServiceRegistry>,
    certs: Option<Arc<CertificateManager>>,
) -> (SocketAddr, Option<SocketAddr>, CancellationToken) {
    let tls = certs.map(|c| acceptor(c).unwrap());
    let server = ProxyServer::bind(&settings(tls.is_some()), registry, tls)
        .await
        .unwrap();
    let http = server.http_addr().unwrap();
    let https = server.https_addr().map(|r| r.unwrap());
    let shutdown = CancellationToken::new();
    tokio::spawn(server.run(shutdown.clone()));
    (http, https, shutdown)
}

async fn roundtrip<S>(mut conn: S, request: &str) -> String
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    conn.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), conn.read_to_end(&mut response))
        .await
        .expect("proxy did not close the connection")
        .ok();
    String::from_utf8_lossy(&response).into_owned()
}

#[tokio::test]
async fn test_unknown_host_is_502_promptly() {
    let registry = Arc::new(ServiceRegistry::new());
    let (http, _, shutdown) = start_proxy(registry, None).await;

    let started = Instant::now();
    let conn = TcpStream::connect(http).await.unwrap();
    let response = roundtrip(conn, "GET / HTTP/1.1\r\nHost: ghost.shop.test\r\n\r\n").await;

    assert!(response.starts_with("HTTP/1.1 502"), "{response}");
    assert!(response.contains("ghost.shop.test"));
    assert!(started.elapsed() < Duration::from_secs(1));
    shutdown.cancel();
}

#[tokio::test]
async fn test_routes_to_backend_with_forwarded_headers() {
    let backend = echo_backend().await;
    let registry = Arc::new(ServiceRegistry::new());
    registry
        .register(RouteEntry::new("api.shop.test", "api", backend))
        .await;
    let (http, _, shutdown) = start_proxy(Arc::clone(&registry), None).await;

    let conn = TcpStream::connect(http).await.unwrap();
    let response = roundtrip(
        conn,
        "GET /orders?id=7 HTTP/1.1\r\nHost: API.shop.test\r\nX-Forwarded-For: 10.0.0.9\r\nX-Forwarded-Proto: https\r\n\r\n",
    )
    .await;

    assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
    assert!(response.contains("GET /orders?id=7 HTTP/1.1"));
    assert!(response.contains("X-Forwarded-For: 10.0.0.9, 127.0.0.1"));
    assert!(response.contains("X-Forwarded-Proto: http\r\n"));
    assert!(!response.contains("X-Forwarded-Proto: https"));
    assert!(response.to_ascii_lowercase().contains("x-forwarded-host: api.shop.test"));
    shutdown.cancel();
}

#[tokio::test]
async fn test_dead_backend_is_503() {
    let backend = SocketAddr::from(([127, 0, 0, 1], common::free_port()));
    let registry = Arc::new(ServiceRegistry::new());
    registry
        .register(RouteEntry::new("api.shop.test", "api", backend))
        .await;
    let (http, _, shutdown) = start_proxy(registry, None).await;

    let conn = TcpStream::connect(http).await.unwrap();
    let response = roundtrip(conn, "GET / HTTP/1.1\r\nHost: api.shop.test\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 503"), "{response}");
    shutdown.cancel();
}

#[tokio::test]
async fn test_route_removed_while_running() {
    let backend = echo_backend().await;
    let registry = Arc::new(ServiceRegistry::new());
    registry
        .register(RouteEntry::new("api.shop.test", "api", backend))
        .await;
    let (http, _, shutdown) = start_proxy(Arc::clone(&registry), None).await;

    let conn = TcpStream::connect(http).await.unwrap();
    let ok = roundtrip(conn, "GET / HTTP/1.1\r\nHost: api.shop.test\r\n\r\n").await;
    assert!(ok.starts_with("HTTP/1.1 200"));

    registry.unregister("api").await;
    let conn = TcpStream::connect(http).await.unwrap();
    let gone = roundtrip(conn, "GET / HTTP/1.1\r\nHost: api.shop.test\r\n\r\n").await;
    assert!(gone.starts_with("HTTP/1.1 502"), "{gone}");
    shutdown.cancel();
}

#[tokio::test]
async fn test_tls_terminated_with_leaf_from_local_ca() {
    let home = common::temp_dir();
    let certs = Arc::new(CertificateManager::new(home.path()));
    let ca = certs.ensure_ca().unwrap();
    let leaf = certs.ensure_leaf("api.shop.test").unwrap();

    let backend = echo_backend().await;
    let registry = Arc::new(ServiceRegistry::new());
    registry
        .register(RouteEntry::new("api.shop.test", "api", backend).with_certificate(leaf.cert_path))
        .await;
    let (_, https, shutdown) = start_proxy(registry, Some(Arc::clone(&certs))).await;
    let https = https.expect("https listener");

    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut ca.cert_pem.as_bytes()) {
        roots.add(cert.unwrap()).unwrap();
    }
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let client = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = tokio_rustls::TlsConnector::from(Arc::new(client));

    let tcp = TcpStream::connect(https).await.unwrap();
    let name = rustls::pki_types::ServerName::try_from("api.shop.test").unwrap();
    let tls = connector.connect(name, tcp).await.expect("TLS handshake failed");

    let response = roundtrip(tls, "GET / HTTP/1.1\r\nHost: api.shop.test\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
    assert!(response.contains("X-Forwarded-Proto: https"));
    shutdown.cancel();
}
