use async_trait::async_trait;

use crate::domain::models::HealthCheck;

/// Checks whether a service answering on `port` is healthy.
///
/// The supervisor uses it both for readiness while `Starting` and for the
/// periodic checks while `Running`. Implementations must respect
/// `check.timeout` and never block past it.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, port: u16, check: &HealthCheck) -> bool;
}
