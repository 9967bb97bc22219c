//! Per-instance supervising task.

use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use super::backoff::RestartBackoff;
use super::error::SupervisorError;
use super::logs::LogBuffer;
use super::process::ServiceProcess;
use super::{SupervisorContext, SupervisorEvent};
use crate::domain::models::{
    ExitReason, HealthStatus, RouteEntry, ServiceDefinition, ServiceInstance, ServiceState,
};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(200);

struct InstanceState {
    instance: ServiceInstance,
    stop_requested: bool,
    stop_grace: Option<Duration>,
}

/// How one process run ended.
enum RunOutcome {
    /// Stop was requested; the instance is `Stopped`
    Stopped,
    /// The instance is `Crashed`
    Failed {
        exit: Option<ExitReason>,
        ran_for: Duration,
    },
}

enum Readiness {
    Ready,
    TimedOut,
    Exited(std::io::Result<ExitReason>),
    Cancelled,
}

/// One supervised run of a service definition.
///
/// Exit events and user stop requests are both applied under `state`,
/// so a crash racing a stop resolves to `Stopped`.
pub(crate) struct InstanceHandle {
    pub(crate) definition: ServiceDefinition,
    state: Mutex<InstanceState>,
    snapshot: watch::Sender<ServiceInstance>,
    done: watch::Sender<bool>,
    cancel: CancellationToken,
    pub(crate) logs: Arc<LogBuffer>,
}

impl InstanceHandle {
    pub(crate) fn new(definition: ServiceDefinition, logs: Arc<LogBuffer>) -> Arc<Self> {
        let instance = ServiceInstance::new(&definition.name);
        let (snapshot, _) = watch::channel(instance.clone());
        let (done, _) = watch::channel(false);
        Arc::new(Self {
            definition,
            state: Mutex::new(InstanceState {
                instance,
                stop_requested: false,
                stop_grace: None,
            }),
            snapshot,
            done,
            cancel: CancellationToken::new(),
            logs,
        })
    }

    /// Latest published snapshot.
    pub(crate) fn snapshot(&self) -> ServiceInstance {
        self.snapshot.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ServiceInstance> {
        self.snapshot.subscribe()
    }

    /// Whether the supervising task has finished.
    pub(crate) fn is_finished(&self) -> bool {
        *self.done.borrow()
    }

    /// Record a stop request and cancel the supervising task.
    pub(crate) async fn request_stop(&self, ctx: &SupervisorContext, grace: Duration) {
        let mut st = self.state.lock().await;
        st.stop_requested = true;
        st.stop_grace = Some(grace);
        if matches!(st.instance.state, ServiceState::Starting | ServiceState::Running) {
            self.transition(ctx, &mut st, ServiceState::Stopping).await;
        }
        drop(st);
        self.cancel.cancel();
    }

    /// Wait for the task to finish, then make sure the final state is `Stopped`.
    pub(crate) async fn wait_stopped(&self, ctx: &SupervisorContext, limit: Duration) {
        let mut done = self.done.subscribe();
        let finished = async {
            while !*done.borrow_and_update() {
                if done.changed().await.is_err() {
                    break;
                }
            }
        };
        if timeout(limit, finished).await.is_err() {
            tracing::warn!(service = %self.definition.name, "supervising task did not finish in time");
        }
        let mut st = self.state.lock().await;
        if st.stop_requested && st.instance.state != ServiceState::Stopped {
            self.finish_stopped(ctx, &mut st).await;
        }
    }

    async fn transition(
        &self,
        ctx: &SupervisorContext,
        st: &mut InstanceState,
        next: ServiceState,
    ) {
        let from = st.instance.state;
        if let Err(e) = st.instance.transition_to(next) {
            tracing::error!(service = %self.definition.name, error = %e, "rejected state change");
            return;
        }
        if from.is_routable() {
            ctx.registry.unregister(&self.definition.name).await;
        }
        if matches!(next, ServiceState::Stopped | ServiceState::Crashed) {
            st.instance.pid = None;
        }
        self.publish(ctx, st).await;

        tracing::info!(
            service = %self.definition.name,
            from = %from,
            to = %next,
            "service state changed"
        );
        // No subscribers is fine
        let _ = ctx.events.send(SupervisorEvent {
            service: self.definition.name.clone(),
            instance_id: st.instance.id,
            from,
            to: next,
            at: Utc::now(),
        });
    }

    async fn publish(&self, ctx: &SupervisorContext, st: &InstanceState) {
        ctx.registry.update_instance(&st.instance).await;
        self.snapshot.send_replace(st.instance.clone());
    }

    /// Walk whatever state we are in to `Stopped` along valid transitions.
    async fn finish_stopped(&self, ctx: &SupervisorContext, st: &mut InstanceState) {
        if matches!(st.instance.state, ServiceState::Starting | ServiceState::Running) {
            self.transition(ctx, st, ServiceState::Stopping).await;
        }
        if st.instance.state != ServiceState::Stopped {
            self.transition(ctx, st, ServiceState::Stopped).await;
        }
    }

    async fn crash(&self, ctx: &SupervisorContext, st: &mut InstanceState, error: Option<String>) {
        st.instance.last_error = error;
        self.transition(ctx, st, ServiceState::Crashed).await;
    }

    /// Supervising task body: run, restart per policy, stop on cancel.
    pub(crate) async fn run(self: Arc<Self>, ctx: Arc<SupervisorContext>) {
        let settings = &ctx.settings;
        let name = self.definition.name.clone();
        let mut backoff = RestartBackoff::new(settings.initial_backoff, settings.max_backoff);
        let mut consecutive_restarts: u32 = 0;

        loop {
            let (exit, ran_for) = match self.run_once(&ctx).await {
                RunOutcome::Stopped => break,
                RunOutcome::Failed { exit, ran_for } => (exit, ran_for),
            };

            if ran_for > backoff.ceiling() {
                backoff.reset();
                consecutive_restarts = 0;
            }

            if !self.definition.restart.should_restart(exit.as_ref()) {
                tracing::info!(service = %name, policy = %self.definition.restart, "not restarting");
                break;
            }

            if settings
                .max_restarts
                .is_some_and(|limit| consecutive_restarts >= limit)
            {
                let mut st = self.state.lock().await;
                st.instance.last_error = Some(SupervisorError::RestartLimit(name.clone()).to_string());
                self.publish(&ctx, &st).await;
                tracing::error!(service = %name, restarts = consecutive_restarts, "restart limit reached");
                break;
            }

            let delay = backoff.next_delay();
            tracing::info!(
                service = %name,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                attempt = consecutive_restarts + 1,
                "restarting after backoff"
            );

            tokio::select! {
                () = sleep(delay) => {}
                () = self.cancel.cancelled() => break,
            }

            let mut st = self.state.lock().await;
            if st.stop_requested {
                break;
            }
            consecutive_restarts += 1;
            st.instance.restart_count += 1;
            self.transition(&ctx, &mut st, ServiceState::Starting).await;
        }

        let mut st = self.state.lock().await;
        if st.stop_requested && st.instance.state != ServiceState::Stopped {
            self.finish_stopped(&ctx, &mut st).await;
        }
        drop(st);
        self.done.send_replace(true);
    }

    async fn stop_grace(&self, ctx: &SupervisorContext) -> Duration {
        self.state
            .lock()
            .await
            .stop_grace
            .unwrap_or(ctx.settings.stop_timeout)
    }

    /// Terminate `process` after a stop request and settle on `Stopped`.
    async fn stop_process(&self, ctx: &SupervisorContext, mut process: ServiceProcess) -> RunOutcome {
        let grace = self.stop_grace(ctx).await;
        let exit = match process.terminate(grace).await {
            Ok(reason) => Some(reason),
            Err(e) => {
                tracing::warn!(service = %self.definition.name, error = %e, "error while stopping process");
                None
            }
        };

        let mut st = self.state.lock().await;
        st.instance.last_exit = exit.or(st.instance.last_exit);
        self.finish_stopped(ctx, &mut st).await;
        RunOutcome::Stopped
    }

    async fn run_once(&self, ctx: &SupervisorContext) -> RunOutcome {
        let name = &self.definition.name;

        let spawned = ServiceProcess::spawn(&self.definition, &self.logs);
        let mut st = self.state.lock().await;
        let mut process = match spawned {
            Ok(process) => process,
            Err(source) => {
                if st.stop_requested {
                    self.finish_stopped(ctx, &mut st).await;
                    return RunOutcome::Stopped;
                }
                let err = SupervisorError::ProcessSpawn {
                    service: name.clone(),
                    source,
                };
                tracing::error!(service = %name, error = %err, "spawn failed");
                st.instance.last_exit = None;
                self.crash(ctx, &mut st, Some(err.to_string())).await;
                return RunOutcome::Failed {
                    exit: None,
                    ran_for: Duration::ZERO,
                };
            }
        };

        st.instance.pid = Some(process.pid());
        st.instance.started_at = Some(Utc::now());
        st.instance.health = HealthStatus::Unknown;
        if st.stop_requested {
            drop(st);
            return self.stop_process(ctx, process).await;
        }
        if st.instance.state == ServiceState::Pending {
            self.transition(ctx, &mut st, ServiceState::Starting).await;
        } else {
            self.publish(ctx, &st).await;
        }
        drop(st);

        let pid = process.pid();
        let readiness = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Readiness::Cancelled,
            exit = process.wait() => Readiness::Exited(exit),
            ready = self.wait_ready(ctx, pid) => {
                if ready { Readiness::Ready } else { Readiness::TimedOut }
            }
        };

        match readiness {
            Readiness::Cancelled => return self.stop_process(ctx, process).await,
            Readiness::Exited(exit) => return self.on_exit(ctx, exit, Duration::ZERO, true).await,
            Readiness::TimedOut => {
                let err = SupervisorError::HealthCheckTimeout {
                    service: name.clone(),
                    timeout: ctx.settings.start_timeout,
                };
                tracing::error!(service = %name, error = %err, "service failed to become ready");
                let exit = process.terminate(ctx.settings.stop_timeout).await.ok();

                let mut st = self.state.lock().await;
                st.instance.last_exit = exit;
                if st.stop_requested {
                    self.finish_stopped(ctx, &mut st).await;
                    return RunOutcome::Stopped;
                }
                self.crash(ctx, &mut st, Some(err.to_string())).await;
                return RunOutcome::Failed {
                    exit: None,
                    ran_for: Duration::ZERO,
                };
            }
            Readiness::Ready => {}
        }

        let route = self.build_route(ctx).await;

        let mut st = self.state.lock().await;
        if st.stop_requested {
            drop(st);
            return self.stop_process(ctx, process).await;
        }
        if self.definition.health.is_some() {
            st.instance.health = HealthStatus::Healthy;
        }
        self.transition(ctx, &mut st, ServiceState::Running).await;
        if let Some(route) = route {
            ctx.registry.register(route).await;
        }
        drop(st);

        self.watch_running(ctx, process).await
    }

    /// Readiness: health check success, or still alive after the grace period.
    async fn wait_ready(&self, ctx: &SupervisorContext, pid: u32) -> bool {
        let settings = &ctx.settings;
        let check = self.definition.health.as_ref();
        let port = self.definition.port;

        let ready = async {
            match (check, port) {
                (Some(check), Some(port)) => loop {
                    if ctx.probe.probe(port, check).await {
                        break;
                    }
                    sleep(READY_POLL_INTERVAL).await;
                },
                _ => sleep(settings.ready_grace).await,
            }
        };

        let ok = timeout(settings.start_timeout, ready).await.is_ok();
        tracing::debug!(service = %self.definition.name, pid, ready = ok, "readiness check finished");
        ok
    }

    async fn build_route(&self, ctx: &SupervisorContext) -> Option<RouteEntry> {
        let (Some(hostname), Some(port)) = (&self.definition.hostname, self.definition.port) else {
            return None;
        };
        let backend = SocketAddr::from(([127, 0, 0, 1], port));
        let route = RouteEntry::new(hostname, &self.definition.name, backend);

        let Some(certs) = ctx.certs.clone() else {
            return Some(route);
        };

        let host = hostname.clone();
        match tokio::task::spawn_blocking(move || certs.ensure_leaf(&host)).await {
            Ok(Ok(bundle)) => Some(route.with_certificate(bundle.cert_path)),
            Ok(Err(e)) => {
                tracing::warn!(host = %hostname, error = %e, "leaf certificate unavailable, default certificate will be served");
                Some(route)
            }
            Err(e) => {
                tracing::warn!(host = %hostname, error = %e, "certificate task failed");
                Some(route)
            }
        }
    }

    /// Periodic health checks until the process exits or a stop arrives.
    async fn watch_running(&self, ctx: &SupervisorContext, mut process: ServiceProcess) -> RunOutcome {
        let name = &self.definition.name;
        let running_since = Instant::now();
        let mut failures: u32 = 0;
        let check = self.definition.health.clone();
        let port = self.definition.port;

        let mut ticker = check.as_ref().map(|c| {
            let mut interval = tokio::time::interval(c.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval
        });
        if let Some(ticker) = ticker.as_mut() {
            // Skip first tick (fires immediately)
            ticker.tick().await;
        }

        loop {
            let tick = async {
                match ticker.as_mut() {
                    Some(ticker) => {
                        ticker.tick().await;
                    }
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                () = self.cancel.cancelled() => return self.stop_process(ctx, process).await,
                exit = process.wait() => {
                    return self.on_exit(ctx, exit, running_since.elapsed(), false).await;
                }
                () = tick => {
                    let (Some(check), Some(port)) = (check.as_ref(), port) else { continue };
                    let healthy = ctx.probe.probe(port, check).await;
                    failures = if healthy { 0 } else { failures + 1 };

                    let status = if healthy {
                        HealthStatus::Healthy
                    } else if failures >= check.retries {
                        HealthStatus::Unhealthy
                    } else {
                        continue;
                    };

                    let mut st = self.state.lock().await;
                    if st.instance.health != status {
                        if status == HealthStatus::Unhealthy {
                            tracing::warn!(service = %name, consecutive_failures = failures, "service unhealthy");
                        } else {
                            tracing::info!(service = %name, "service healthy again");
                        }
                        st.instance.health = status;
                        self.publish(ctx, &st).await;
                    }
                }
            }
        }
    }

    async fn on_exit(
        &self,
        ctx: &SupervisorContext,
        exit: std::io::Result<ExitReason>,
        ran_for: Duration,
        during_start: bool,
    ) -> RunOutcome {
        let name = &self.definition.name;
        let reason = match exit {
            Ok(reason) => Some(reason),
            Err(e) => {
                tracing::warn!(service = %name, error = %e, "failed to collect exit status");
                None
            }
        };

        let mut st = self.state.lock().await;
        st.instance.last_exit = reason;
        if st.stop_requested {
            self.finish_stopped(ctx, &mut st).await;
            return RunOutcome::Stopped;
        }

        let error = match (during_start, reason) {
            (true, Some(reason)) => Some(
                SupervisorError::EarlyExit {
                    service: name.clone(),
                    reason,
                }
                .to_string(),
            ),
            _ => None,
        };
        tracing::warn!(
            service = %name,
            exit = %reason.map_or_else(|| "unknown".to_string(), |r| r.to_string()),
            "process exited"
        );
        self.crash(ctx, &mut st, error).await;

        RunOutcome::Failed {
            exit: reason,
            ran_for,
        }
    }
}
