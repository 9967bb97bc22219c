//! Port trait definitions
//!
//! Traits the application layer depends on and infrastructure implements:
//! - `HealthProbe`: readiness and liveness checks against a service's port

pub mod health_probe;

pub use health_probe::HealthProbe;
