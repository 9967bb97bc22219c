use std::time::Duration;
use thiserror::Error;

use crate::domain::models::ExitReason;

/// Errors that can occur while supervising services
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Service '{service}' cannot start: dependency '{dependency}' is not running")]
    DependencyNotReady { service: String, dependency: String },

    #[error("Failed to spawn service '{service}': {source}")]
    ProcessSpawn {
        service: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Service '{service}' did not become ready within {timeout:?}")]
    HealthCheckTimeout { service: String, timeout: Duration },

    #[error("Service '{service}' exited during startup ({reason})")]
    EarlyExit { service: String, reason: ExitReason },

    #[error("Service '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Service '{0}' gave up after reaching the restart limit")]
    RestartLimit(String),

    #[error("Start of '{0}' was cancelled by a stop request")]
    StartCancelled(String),

    #[error("Supervisor is shutting down")]
    ShuttingDown,
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
