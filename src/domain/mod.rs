//! Domain layer for the lokl orchestrator
//!
//! This module contains the core data model shared by the supervisor,
//! the registry and the proxy, plus the ports infrastructure implements.

pub mod models;
pub mod ports;

pub use models::{
    CertificateBundle, ExitReason, HealthCheck, HealthStatus, RestartPolicy, RouteEntry,
    ServiceDefinition, ServiceInstance, ServiceState, TlsMode,
};
