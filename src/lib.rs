//! lokl - local development orchestrator
//!
//! lokl reads a project file describing a set of services, runs them as
//! supervised child processes in dependency order, and exposes each one
//! under a stable hostname through a reverse proxy that terminates TLS with
//! certificates from a local certificate authority.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): service, instance, route and config models
//! - **Service Layer** (`services`): dependency ordering and the service registry
//! - **Application Layer** (`application`): process supervisor and orchestrator lifecycle
//! - **Infrastructure Layer** (`infrastructure`): config loading, proxy, certificates,
//!   hosts file, control socket, logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use lokl::application::{Orchestrator, OrchestratorOptions};
//! use lokl::infrastructure::config::ConfigLoader;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::load("lokl.yaml")?;
//!     let orchestrator = Orchestrator::start(config, &OrchestratorOptions::default()).await?;
//!     orchestrator.run().await
//! }
//! ```

pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use application::{Orchestrator, OrchestratorOptions, Supervisor, SupervisorError};
pub use domain::models::{
    RouteEntry, ServiceDefinition, ServiceInstance, ServiceState, TlsMode,
};
pub use infrastructure::config::{ConfigError, ConfigLoader, LoadedConfig};
pub use services::{DependencyResolver, ServiceRegistry};
