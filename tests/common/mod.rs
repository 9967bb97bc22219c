//! Common test utilities for integration tests
//!
//! Provides shared fixtures, helpers, and test utilities used across
//! multiple integration test files.

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use lokl::application::{Supervisor, SupervisorSettings};
use lokl::domain::models::{HealthCheck, ServiceInstance, ServiceState};
use lokl::domain::ports::HealthProbe;
use lokl::services::ServiceRegistry;

/// Create a temporary directory for test isolation
///
/// Returns a TempDir that will be cleaned up when dropped.
pub fn temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Write `yaml` as `lokl.yaml` inside a fresh temp directory.
pub fn write_config(yaml: &str) -> (TempDir, PathBuf) {
    let dir = temp_dir();
    let path = dir.path().join("lokl.yaml");
    std::fs::write(&path, yaml).expect("Failed to write config");
    (dir, path)
}

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
/// Call this at the beginning of tests that need logging.
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// A loopback port nothing is listening on right now.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .map(|addr| addr.port())
        .expect("Failed to find a free port")
}

/// Health probe with a switchable answer.
pub struct FixedProbe {
    pub healthy: AtomicBool,
    pub calls: AtomicUsize,
}

impl FixedProbe {
    pub fn new(healthy: bool) -> Arc<Self> {
        Arc::new(Self {
            healthy: AtomicBool::new(healthy),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl HealthProbe for FixedProbe {
    async fn probe(&self, _port: u16, _check: &HealthCheck) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.healthy.load(Ordering::SeqCst)
    }
}

/// Supervisor timings short enough for tests.
pub fn fast_settings() -> SupervisorSettings {
    SupervisorSettings {
        start_timeout: Duration::from_secs(3),
        stop_timeout: Duration::from_secs(2),
        ready_grace: Duration::from_millis(100),
        initial_backoff: Duration::from_millis(50),
        max_backoff: Duration::from_millis(400),
        max_restarts: Some(3),
        dependency_poll: Duration::from_millis(20),
    }
}

pub fn supervisor(settings: SupervisorSettings) -> Supervisor {
    Supervisor::new(settings, Arc::new(ServiceRegistry::new()), FixedProbe::new(true))
}

/// Wait until the current instance of `name` reaches `state`.
pub async fn wait_for_state(supervisor: &Supervisor, name: &str, state: ServiceState) -> ServiceInstance {
    let mut rx = supervisor
        .watch_instance(name)
        .await
        .unwrap_or_else(|| panic!("{name} has no instance"));
    let found = tokio::time::timeout(Duration::from_secs(15), rx.wait_for(|i| i.state == state))
        .await
        .unwrap_or_else(|_| panic!("{name} never reached {state}"))
        .expect("instance watch closed")
        .clone();
    found
}

/// Wait for a condition to be true with timeout
///
/// Polls the predicate every 50ms until it returns true or timeout is reached.
pub async fn wait_for<F>(mut predicate: F, timeout_ms: u64) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    let timeout = Duration::from_millis(timeout_ms);

    while start.elapsed() < timeout {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    false
}
