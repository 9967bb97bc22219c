pub mod certificate;
pub mod config;
pub mod instance;
pub mod route;
pub mod service;

pub use certificate::CertificateBundle;
pub use config::{
    HealthConfig, LoggingConfig, ProjectConfig, ProxyConfig, ServiceConfig, SupervisorConfig,
    TlsConfig,
};
pub use instance::{ExitReason, HealthStatus, ServiceInstance, ServiceState};
pub use route::{normalize_host, RouteEntry, TlsMode};
pub use service::{HealthCheck, RestartPolicy, ServiceDefinition};
