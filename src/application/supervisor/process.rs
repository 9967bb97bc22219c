//! Spawning and signalling service process groups.

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::timeout;

use super::logs::{LogBuffer, LogStream};
use crate::domain::models::{ExitReason, ServiceDefinition};

/// A running `sh -c` process leading its own process group.
#[derive(Debug)]
pub struct ServiceProcess {
    child: Child,
    pid: u32,
}

impl ServiceProcess {
    /// Spawn the service command with output captured into `logs`.
    pub fn spawn(definition: &ServiceDefinition, logs: &Arc<LogBuffer>) -> io::Result<Self> {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&definition.command)
            .envs(&definition.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);
        if let Some(dir) = &definition.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn()?;
        let pid = child
            .id()
            .ok_or_else(|| io::Error::other("process exited before its pid was read"))?;

        if let Some(stdout) = child.stdout.take() {
            let logs = Arc::clone(logs);
            tokio::spawn(async move { logs.capture(stdout, LogStream::Stdout).await });
        }
        if let Some(stderr) = child.stderr.take() {
            let logs = Arc::clone(logs);
            tokio::spawn(async move { logs.capture(stderr, LogStream::Stderr).await });
        }

        tracing::debug!(service = %definition.name, pid, command = %definition.command, "process spawned");
        Ok(Self { child, pid })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Wait for the process to exit. Cancel safe.
    pub async fn wait(&mut self) -> io::Result<ExitReason> {
        self.child.wait().await.map(ExitReason::from)
    }

    /// Send `signal` to the whole process group.
    pub fn signal(&self, signal: Signal) -> nix::Result<()> {
        let pgid = i32::try_from(self.pid).map_err(|_| nix::errno::Errno::EINVAL)?;
        killpg(Pid::from_raw(pgid), signal)
    }

    /// SIGTERM the group, then SIGKILL once `grace` has elapsed.
    pub async fn terminate(&mut self, grace: Duration) -> io::Result<ExitReason> {
        if let Err(e) = self.signal(Signal::SIGTERM) {
            tracing::debug!(pid = self.pid, error = %e, "SIGTERM not delivered");
        }

        if let Ok(result) = timeout(grace, self.child.wait()).await {
            return result.map(ExitReason::from);
        }

        tracing::warn!(
            pid = self.pid,
            grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
            "process ignored SIGTERM, sending SIGKILL"
        );
        if let Err(e) = self.signal(Signal::SIGKILL) {
            tracing::debug!(pid = self.pid, error = %e, "SIGKILL not delivered");
            self.child.start_kill()?;
        }
        self.wait().await
    }
}
