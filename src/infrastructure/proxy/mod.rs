//! Host-based reverse proxy with TLS termination
//!
//! Each accepted connection is routed once, on its first request head: the
//! SNI name (or the `Host` header for plain HTTP) selects a route from the
//! [`ServiceRegistry`](crate::services::ServiceRegistry), forwarding headers
//! are injected, and the rest of the connection is relayed byte for byte.

pub mod error;
pub mod http;
pub mod relay;
pub mod server;
pub mod tls;

pub use error::{ProxyError, Result};
pub use http::{error_response, read_head, RequestHead, MAX_HEAD_BYTES};
pub use relay::{relay, RelayStats};
pub use server::{ProxyRouter, ProxyServer, ProxySettings};
pub use tls::{acceptor, SniResolver};
