//! Orchestrator lifecycle
//!
//! Owns everything `lokl start` creates: the registry, the supervisor, the
//! certificate manager, the proxy listeners and the control socket. State is
//! created in [`Orchestrator::start`] and torn down in [`Orchestrator::stop`];
//! nothing is global.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::supervisor::{
    ReconcileReport, Supervisor, SupervisorError, SupervisorSettings,
};
use crate::infrastructure::certs::CertificateManager;
use crate::infrastructure::config::{ConfigError, ConfigLoader, LoadedConfig};
use crate::infrastructure::control::{
    ControlHandler, ControlRequest, ControlResponse, ControlServer, ErrorKind, ProxyStatus,
    StatusReport,
};
use crate::infrastructure::health::HttpHealthProbe;
use crate::infrastructure::hosts;
use crate::infrastructure::proxy::{self, ProxyServer, ProxySettings};
use crate::services::ServiceRegistry;

/// Where persisted state lives, independent of the project config.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorOptions {
    /// Installation directory for the CA; `None` uses the platform data dir
    pub home: Option<PathBuf>,
}

/// A running orchestrator.
pub struct Orchestrator {
    config: RwLock<LoadedConfig>,
    supervisor: Arc<Supervisor>,
    proxy: ProxyStatus,
    started_at: DateTime<Utc>,
    /// Fired by a shutdown request or a signal
    shutdown: CancellationToken,
    /// Fired after services stopped; ends the listeners
    listeners: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Bind the proxy and control socket, then start every autostart service.
    ///
    /// Services start in the background; this returns once the listeners
    /// are up.
    ///
    /// # Errors
    /// CA creation failures, listener bind failures, or another orchestrator
    /// already serving the project's control socket
    pub async fn start(config: LoadedConfig, options: &OrchestratorOptions) -> Result<Arc<Self>> {
        let registry = Arc::new(ServiceRegistry::new());

        let certs = if config.proxy.https {
            let dir = match &options.home {
                Some(home) => home.clone(),
                None => CertificateManager::default_dir()?,
            };
            let manager = Arc::new(
                CertificateManager::new(dir).with_leaf_validity_days(config.tls.leaf_validity_days),
            );
            let ca = {
                let manager = manager.clone();
                tokio::task::spawn_blocking(move || manager.ensure_ca())
                    .await
                    .context("certificate task panicked")?
                    .context("Failed to prepare the local certificate authority")?
            };
            tracing::info!(path = %ca.cert_path.display(), expires = %ca.not_after, "local CA ready");
            Some(manager)
        } else {
            None
        };

        let mut supervisor = Supervisor::new(
            SupervisorSettings::from(&config.supervisor),
            registry.clone(),
            Arc::new(HttpHealthProbe::new()),
        );
        if let Some(certs) = &certs {
            supervisor = supervisor.with_certificates(certs.clone());
        }
        let supervisor = Arc::new(supervisor);

        let tls = match &certs {
            Some(certs) => Some(proxy::acceptor(certs.clone()).context("Failed to configure TLS")?),
            None => None,
        };
        let proxy_server = ProxyServer::bind(&ProxySettings::from(&config.proxy), registry, tls)
            .await
            .context("Failed to start the proxy")?;
        let proxy_status = ProxyStatus {
            http: proxy_server.http_addr()?.to_string(),
            https: proxy_server.https_addr().transpose()?.map(|a| a.to_string()),
        };

        let control = ControlServer::bind(&config.socket_path())
            .await
            .context("Failed to open the control socket")?;

        supervisor.load(config.services.clone()).await;
        let hostnames = config.hostnames();

        let orchestrator = Arc::new(Self {
            config: RwLock::new(config),
            supervisor,
            proxy: proxy_status,
            started_at: Utc::now(),
            shutdown: CancellationToken::new(),
            listeners: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        });

        let proxy_task = tokio::spawn(proxy_server.run(orchestrator.listeners.clone()));
        let control_task = tokio::spawn(control.run(orchestrator.clone(), orchestrator.listeners.clone()));

        let starter = {
            let supervisor = orchestrator.supervisor.clone();
            tokio::spawn(async move {
                let failures = supervisor.start_all().await;
                if failures.is_empty() {
                    tracing::info!("all services started");
                } else {
                    tracing::warn!(failed = failures.len(), "some services failed to start");
                }
            })
        };

        let dns_check = tokio::spawn(async move {
            let missing = hosts::unresolved(&hostnames).await;
            for host in &missing {
                tracing::warn!(host = %host, "hostname does not resolve to 127.0.0.1; run `lokl dns setup`");
            }
        });

        orchestrator.track([proxy_task, control_task, starter, dns_check]);
        tracing::info!(
            http = %orchestrator.proxy.http,
            https = orchestrator.proxy.https.as_deref().unwrap_or("disabled"),
            "lokl started"
        );
        Ok(orchestrator)
    }

    fn track(&self, handles: impl IntoIterator<Item = JoinHandle<()>>) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(handles);
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    pub fn proxy_status(&self) -> &ProxyStatus {
        &self.proxy
    }

    /// Ask the orchestrator to shut down; [`Orchestrator::run`] then returns.
    pub fn request_shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait for Ctrl-C, SIGTERM or a shutdown request, then stop everything.
    ///
    /// # Errors
    /// Failure to install the signal handlers
    pub async fn run(&self) -> Result<()> {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .context("Failed to install SIGTERM handler")?;

        tokio::select! {
            () = self.shutdown.cancelled() => tracing::info!("shutdown requested"),
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                tracing::info!("interrupt received, shutting down");
            }
            _ = terminate.recv() => tracing::info!("SIGTERM received, shutting down"),
        }

        self.stop().await;
        Ok(())
    }

    /// Stop services in reverse dependency order, then close the listeners.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        self.supervisor.shutdown().await;
        self.listeners.cancel();

        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "background task failed");
            }
        }
        tracing::info!("lokl stopped");
    }

    pub async fn status(&self) -> StatusReport {
        let config = self.config.read().await;
        let registry = self.supervisor.registry();
        StatusReport {
            project: config.name.clone(),
            config: config.path.clone(),
            pid: std::process::id(),
            started_at: self.started_at,
            proxy: self.proxy.clone(),
            services: registry.services().await,
            routes: registry.snapshot().await,
        }
    }

    /// Re-read the config file and reconcile running services with it.
    ///
    /// An invalid file leaves everything running as before.
    ///
    /// # Errors
    /// The new file's `ConfigError`
    pub async fn reload(&self) -> std::result::Result<ReconcileReport, ConfigError> {
        let path = self.config.read().await.path.clone();
        let loaded = match ConfigLoader::load(&path) {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "reload rejected");
                return Err(e);
            }
        };

        {
            let current = self.config.read().await;
            if current.proxy != loaded.proxy || current.supervisor != loaded.supervisor {
                tracing::warn!("proxy and supervisor settings apply after a restart of lokl");
            }
        }

        let report = self.supervisor.reconcile(loaded.services.clone()).await;
        *self.config.write().await = loaded;
        Ok(report)
    }

    async fn stream_logs(
        &self,
        name: &str,
        lines: Option<usize>,
        follow: bool,
        responses: &mpsc::Sender<ControlResponse>,
    ) -> std::result::Result<(), SupervisorError> {
        // Subscribe before reading the backlog so no line falls in between
        let mut live = self.supervisor.subscribe_logs(name).await?;
        let backlog = self.supervisor.logs(name, lines).await?;
        let last_seen = backlog.last().map(|l| l.timestamp);

        for line in backlog {
            if responses.send(ControlResponse::LogLine(line)).await.is_err() {
                return Ok(());
            }
        }

        if follow {
            loop {
                let line = tokio::select! {
                    () = self.shutdown.cancelled() => break,
                    () = responses.closed() => return Ok(()),
                    received = live.recv() => match received {
                        Ok(line) => line,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::debug!(service = %name, skipped, "log follower lagged");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                };
                if last_seen.is_some_and(|seen| line.timestamp <= seen) {
                    continue;
                }
                if responses.send(ControlResponse::LogLine(line)).await.is_err() {
                    return Ok(());
                }
            }
        }

        // Receiver may be gone already
        let _ = responses.send(ControlResponse::End).await;
        Ok(())
    }
}

/// Wire error kind for a supervisor error.
pub fn error_kind(error: &SupervisorError) -> ErrorKind {
    match error {
        SupervisorError::UnknownService(_) => ErrorKind::UnknownService,
        SupervisorError::DependencyNotReady { .. } => ErrorKind::DependencyNotReady,
        SupervisorError::ProcessSpawn { .. } => ErrorKind::ProcessSpawn,
        SupervisorError::HealthCheckTimeout { .. } => ErrorKind::HealthCheckTimeout,
        _ => ErrorKind::Internal,
    }
}

fn reply<T>(result: std::result::Result<T, SupervisorError>, message: String) -> ControlResponse {
    match result {
        Ok(_) => ControlResponse::ok(message),
        Err(e) => ControlResponse::error(error_kind(&e), e),
    }
}

#[async_trait]
impl ControlHandler for Orchestrator {
    async fn handle(&self, request: ControlRequest, responses: mpsc::Sender<ControlResponse>) {
        let response = match request {
            ControlRequest::Status => ControlResponse::Status(self.status().await),
            ControlRequest::StartService { name } => {
                let result = self.supervisor.start(&name).await;
                reply(result, format!("{name} starting"))
            }
            ControlRequest::StopService { name } => {
                let result = self.supervisor.stop(&name).await;
                reply(result, format!("{name} stopped"))
            }
            ControlRequest::RestartService { name } => {
                let result = self.supervisor.restart(&name).await;
                reply(result, format!("{name} restarting"))
            }
            ControlRequest::Reload => match self.reload().await {
                Ok(report) if report.is_noop() => ControlResponse::ok("configuration unchanged"),
                Ok(report) => ControlResponse::ok(format!(
                    "reloaded: {} added, {} changed, {} removed{}",
                    report.added.len(),
                    report.changed.len(),
                    report.removed.len(),
                    if report.failed.is_empty() {
                        String::new()
                    } else {
                        format!(", {} failed to start", report.failed.len())
                    }
                )),
                Err(e) => ControlResponse::error(ErrorKind::Config, e),
            },
            ControlRequest::Shutdown => {
                self.request_shutdown();
                ControlResponse::ok("shutting down")
            }
            ControlRequest::Logs {
                name,
                lines,
                follow,
            } => match self.stream_logs(&name, lines, follow, &responses).await {
                Ok(()) => return,
                Err(e) => ControlResponse::error(error_kind(&e), e),
            },
        };

        // Client may have disconnected
        let _ = responses.send(response).await;
    }
}
