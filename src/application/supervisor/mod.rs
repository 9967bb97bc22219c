//! Process supervision
//!
//! Each started service gets one [`InstanceHandle`] and one supervising
//! task. The task owns the child process, the readiness and health timers and
//! the restart backoff; the [`Supervisor`] only records requests and waits for
//! the task to settle.
//!
//! ```text
//! start(name) ─► Pending ─► Starting ─► Running ─► Stopping ─► Stopped
//!                              │           │
//!                              └─► Crashed ◄┘ ─► (backoff) ─► Starting
//! ```

mod backoff;
mod error;
mod instance;
mod logs;
mod process;

pub use backoff::RestartBackoff;
pub use error::{Result, SupervisorError};
pub use logs::{LogBuffer, LogLine, LogStream, LOG_BUFFER_LINES};
pub use process::ServiceProcess;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch, RwLock};
use uuid::Uuid;

use crate::domain::models::{ServiceDefinition, ServiceInstance, ServiceState, SupervisorConfig};
use crate::domain::ports::HealthProbe;
use crate::infrastructure::certs::CertificateManager;
use crate::services::{DesiredState, ServiceRegistry};
use instance::InstanceHandle;

/// Extra time allowed after the SIGKILL escalation for the task to settle.
const STOP_SETTLE_MARGIN: Duration = Duration::from_secs(5);

/// Timing knobs for supervision, converted from [`SupervisorConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorSettings {
    pub start_timeout: Duration,
    pub stop_timeout: Duration,
    pub ready_grace: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_restarts: Option<u32>,
    /// Poll interval while `start_all` waits for dependencies
    pub dependency_poll: Duration,
}

impl From<&SupervisorConfig> for SupervisorSettings {
    fn from(config: &SupervisorConfig) -> Self {
        Self {
            start_timeout: Duration::from_secs(config.start_timeout_secs),
            stop_timeout: Duration::from_secs(config.stop_timeout_secs),
            ready_grace: Duration::from_millis(config.ready_grace_ms),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            max_restarts: config.max_restarts,
            dependency_poll: Duration::from_millis(100),
        }
    }
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self::from(&SupervisorConfig::default())
    }
}

/// A state change of one service instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupervisorEvent {
    pub service: String,
    pub instance_id: Uuid,
    pub from: ServiceState,
    pub to: ServiceState,
    pub at: DateTime<Utc>,
}

/// What a reconcile pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
    pub unchanged: Vec<String>,
    /// Services that could not be started again, with the reason
    pub failed: Vec<(String, String)>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Shared by the supervisor and every supervising task.
pub(crate) struct SupervisorContext {
    pub(crate) settings: SupervisorSettings,
    pub(crate) registry: Arc<ServiceRegistry>,
    pub(crate) probe: Arc<dyn HealthProbe>,
    pub(crate) certs: Option<Arc<CertificateManager>>,
    pub(crate) events: broadcast::Sender<SupervisorEvent>,
}

/// Starts, monitors, restarts and stops service processes.
pub struct Supervisor {
    ctx: Arc<SupervisorContext>,
    definitions: RwLock<Vec<ServiceDefinition>>,
    instances: RwLock<HashMap<String, Arc<InstanceHandle>>>,
    logs: Mutex<HashMap<String, Arc<LogBuffer>>>,
    shutting_down: AtomicBool,
}

impl Supervisor {
    pub fn new(
        settings: SupervisorSettings,
        registry: Arc<ServiceRegistry>,
        probe: Arc<dyn HealthProbe>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            ctx: Arc::new(SupervisorContext {
                settings,
                registry,
                probe,
                certs: None,
                events,
            }),
            definitions: RwLock::new(Vec::new()),
            instances: RwLock::new(HashMap::new()),
            logs: Mutex::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Issue a leaf certificate for every hostname before it is routed.
    #[must_use]
    pub fn with_certificates(mut self, certs: Arc<CertificateManager>) -> Self {
        if let Some(ctx) = Arc::get_mut(&mut self.ctx) {
            ctx.certs = Some(certs);
        }
        self
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.ctx.settings
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.ctx.registry
    }

    /// Install the initial definition set (already in start order).
    pub async fn load(&self, definitions: Vec<ServiceDefinition>) {
        self.ctx.registry.seed(&definitions).await;
        *self.definitions.write().await = definitions;
    }

    async fn definition(&self, name: &str) -> Option<ServiceDefinition> {
        self.definitions
            .read()
            .await
            .iter()
            .find(|d| d.name == name)
            .cloned()
    }

    fn log_buffer(&self, name: &str) -> Arc<LogBuffer> {
        let mut logs = self.logs.lock().unwrap_or_else(PoisonError::into_inner);
        logs.entry(name.to_string())
            .or_insert_with(|| Arc::new(LogBuffer::new(LOG_BUFFER_LINES)))
            .clone()
    }

    async fn handle(&self, name: &str) -> Option<Arc<InstanceHandle>> {
        self.instances.read().await.get(name).cloned()
    }

    /// Start one service.
    ///
    /// # Errors
    /// `UnknownService`, `AlreadyRunning`, `DependencyNotReady` when a
    /// declared dependency is not `Running`, or `ShuttingDown`
    pub async fn start(&self, name: &str) -> Result<Uuid> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(SupervisorError::ShuttingDown);
        }
        let definition = self
            .definition(name)
            .await
            .ok_or_else(|| SupervisorError::UnknownService(name.to_string()))?;

        // A crashed instance still backing off is replaced, not duplicated
        if let Some(existing) = self.handle(name).await {
            let state = existing.snapshot().state;
            if state.is_active() && !existing.is_finished() {
                return Err(SupervisorError::AlreadyRunning(name.to_string()));
            }
            if !existing.is_finished() {
                existing.request_stop(&self.ctx, self.ctx.settings.stop_timeout).await;
                existing
                    .wait_stopped(&self.ctx, self.ctx.settings.stop_timeout + STOP_SETTLE_MARGIN)
                    .await;
            }
        }

        let mut instances = self.instances.write().await;
        for dependency in &definition.depends_on {
            let running = instances
                .get(dependency)
                .is_some_and(|h| h.snapshot().state == ServiceState::Running);
            if !running {
                return Err(SupervisorError::DependencyNotReady {
                    service: name.to_string(),
                    dependency: dependency.clone(),
                });
            }
        }
        if let Some(existing) = instances.get(name) {
            if !existing.is_finished() {
                return Err(SupervisorError::AlreadyRunning(name.to_string()));
            }
        }

        let handle = InstanceHandle::new(definition, self.log_buffer(name));
        let snapshot = handle.snapshot();
        instances.insert(name.to_string(), handle.clone());
        drop(instances);

        self.ctx.registry.update_instance(&snapshot).await;
        self.ctx.registry.set_desired(name, DesiredState::Running).await;
        tracing::info!(service = %name, instance_id = %snapshot.id, "starting service");

        tokio::spawn(handle.run(self.ctx.clone()));
        Ok(snapshot.id)
    }

    /// Start every `autostart` service concurrently.
    ///
    /// Each start waits for its dependencies, giving up when a dependency
    /// ends up stopped or crashed, or after a bounded wait.
    pub async fn start_all(&self) -> Vec<(String, SupervisorError)> {
        let names: Vec<String> = self
            .definitions
            .read()
            .await
            .iter()
            .filter(|d| d.autostart)
            .map(|d| d.name.clone())
            .collect();
        self.start_batch(&names).await
    }

    async fn start_batch(&self, names: &[String]) -> Vec<(String, SupervisorError)> {
        let batch: HashSet<&str> = names.iter().map(String::as_str).collect();
        // A stop arriving while a start waits for dependencies flips this back
        for name in names {
            self.ctx.registry.set_desired(name, DesiredState::Running).await;
        }
        let starts = names.iter().map(|name| {
            let batch = &batch;
            async move { (name.clone(), self.start_when_ready(name, batch).await) }
        });

        join_all(starts)
            .await
            .into_iter()
            .filter_map(|(name, result)| match result {
                Ok(_) | Err(SupervisorError::StartCancelled(_)) => None,
                Err(e) => {
                    tracing::error!(service = %name, error = %e, "service failed to start");
                    Some((name, e))
                }
            })
            .collect()
    }

    async fn start_when_ready(&self, name: &str, batch: &HashSet<&str>) -> Result<Uuid> {
        let settings = &self.ctx.settings;
        let limit = u32::try_from(batch.len()).unwrap_or(u32::MAX).max(1);
        let deadline = Instant::now() + settings.start_timeout.saturating_mul(limit);

        loop {
            if self.stop_requested(name).await {
                tracing::info!(service = %name, "stop requested while waiting for dependencies");
                return Err(SupervisorError::StartCancelled(name.to_string()));
            }
            match self.start(name).await {
                Err(SupervisorError::DependencyNotReady {
                    service,
                    dependency,
                }) => {
                    if Instant::now() >= deadline || self.dependency_failed(&dependency, batch).await {
                        return Err(SupervisorError::DependencyNotReady {
                            service,
                            dependency,
                        });
                    }
                    tracing::debug!(service = %name, dependency = %dependency, "waiting for dependency");
                    tokio::time::sleep(settings.dependency_poll).await;
                }
                other => return other,
            }
        }
    }

    async fn stop_requested(&self, name: &str) -> bool {
        self.ctx
            .registry
            .service(name)
            .await
            .is_some_and(|record| record.desired == DesiredState::Stopped)
    }

    /// Whether a dependency can no longer become `Running` without user action.
    async fn dependency_failed(&self, dependency: &str, batch: &HashSet<&str>) -> bool {
        match self.handle(dependency).await {
            Some(handle) => {
                handle.is_finished() && handle.snapshot().state != ServiceState::Running
            }
            None => !batch.contains(dependency),
        }
    }

    /// Stop a service with the configured grace period.
    ///
    /// # Errors
    /// `UnknownService` when the name is not defined and was never started
    pub async fn stop(&self, name: &str) -> Result<()> {
        self.stop_with_timeout(name, self.ctx.settings.stop_timeout).await
    }

    /// SIGTERM the process group, SIGKILL after `grace`; ends `Stopped`.
    ///
    /// # Errors
    /// `UnknownService` when the name is not defined and was never started
    pub async fn stop_with_timeout(&self, name: &str, grace: Duration) -> Result<()> {
        let handle = self.handle(name).await;
        if handle.is_none() && self.definition(name).await.is_none() {
            return Err(SupervisorError::UnknownService(name.to_string()));
        }
        self.ctx.registry.set_desired(name, DesiredState::Stopped).await;

        let Some(handle) = handle else {
            return Ok(());
        };
        if handle.snapshot().state == ServiceState::Stopped {
            return Ok(());
        }

        tracing::info!(service = %name, grace_ms = grace.as_millis(), "stopping service");
        handle.request_stop(&self.ctx, grace).await;
        handle.wait_stopped(&self.ctx, grace + STOP_SETTLE_MARGIN).await;
        Ok(())
    }

    /// Stop then start; also revives a terminal `Crashed` or `Stopped` service.
    ///
    /// # Errors
    /// Same as [`Supervisor::start`]
    pub async fn restart(&self, name: &str) -> Result<Uuid> {
        self.stop(name).await?;
        self.start(name).await
    }

    /// Apply a new definition set: stop removed, restart changed, start new.
    ///
    /// Unchanged services are not touched. `definitions` must already be in
    /// start order.
    pub async fn reconcile(&self, definitions: Vec<ServiceDefinition>) -> ReconcileReport {
        let old = self.definitions.read().await.clone();
        let old_by_name: HashMap<&str, &ServiceDefinition> =
            old.iter().map(|d| (d.name.as_str(), d)).collect();
        let new_names: HashSet<&str> = definitions.iter().map(|d| d.name.as_str()).collect();

        let mut report = ReconcileReport::default();
        for def in &definitions {
            match old_by_name.get(def.name.as_str()) {
                None => report.added.push(def.name.clone()),
                Some(previous) if **previous != *def => report.changed.push(def.name.clone()),
                Some(_) => report.unchanged.push(def.name.clone()),
            }
        }
        report.removed = old
            .iter()
            .filter(|d| !new_names.contains(d.name.as_str()))
            .map(|d| d.name.clone())
            .collect();

        // Changed services come back only if they were meant to be running
        let mut to_start = Vec::new();
        for def in old.iter().rev() {
            let removed = report.removed.contains(&def.name);
            let changed = report.changed.contains(&def.name);
            if !removed && !changed {
                continue;
            }
            let desired = self
                .ctx
                .registry
                .service(&def.name)
                .await
                .map(|r| r.desired)
                .unwrap_or_default();
            if changed && desired == DesiredState::Running {
                to_start.push(def.name.clone());
            }
            if let Err(e) = self.stop(&def.name).await {
                tracing::warn!(service = %def.name, error = %e, "failed to stop service during reload");
            }
            if removed {
                self.instances.write().await.remove(&def.name);
                self.logs
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&def.name);
            }
        }

        for def in &definitions {
            if def.autostart && report.added.contains(&def.name) {
                to_start.push(def.name.clone());
            }
        }
        // Keep start order
        to_start.sort_by_key(|name| definitions.iter().position(|d| &d.name == name));

        self.ctx.registry.seed(&definitions).await;
        *self.definitions.write().await = definitions;

        report.failed = self
            .start_batch(&to_start)
            .await
            .into_iter()
            .map(|(name, e)| (name, e.to_string()))
            .collect();

        tracing::info!(
            added = report.added.len(),
            removed = report.removed.len(),
            changed = report.changed.len(),
            unchanged = report.unchanged.len(),
            "configuration reconciled"
        );
        report
    }

    /// Stop every service in reverse start order and refuse new starts.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let order: Vec<String> = self
            .definitions
            .read()
            .await
            .iter()
            .rev()
            .map(|d| d.name.clone())
            .collect();

        for name in order {
            if let Err(e) = self.stop(&name).await {
                tracing::warn!(service = %name, error = %e, "failed to stop service during shutdown");
            }
        }
        tracing::info!("all services stopped");
    }

    /// Last `lines` captured lines for a service (all buffered lines if `None`).
    ///
    /// # Errors
    /// `UnknownService` when the name is not defined
    pub async fn logs(&self, name: &str, lines: Option<usize>) -> Result<Vec<LogLine>> {
        if self.definition(name).await.is_none() && self.handle(name).await.is_none() {
            return Err(SupervisorError::UnknownService(name.to_string()));
        }
        Ok(self.log_buffer(name).tail(lines))
    }

    /// Live feed of a service's output, including future restarts.
    ///
    /// # Errors
    /// `UnknownService` when the name is not defined
    pub async fn subscribe_logs(&self, name: &str) -> Result<broadcast::Receiver<LogLine>> {
        if self.definition(name).await.is_none() && self.handle(name).await.is_none() {
            return Err(SupervisorError::UnknownService(name.to_string()));
        }
        Ok(self.log_buffer(name).subscribe())
    }

    /// Current snapshot of a service's instance, if it was ever started.
    pub async fn instance(&self, name: &str) -> Option<ServiceInstance> {
        self.handle(name).await.map(|h| h.snapshot())
    }

    /// Follow the snapshots of a service's current instance.
    pub async fn watch_instance(&self, name: &str) -> Option<watch::Receiver<ServiceInstance>> {
        self.handle(name).await.map(|h| h.subscribe())
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.ctx.events.subscribe()
    }
}
