use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::ExitStatus;
use uuid::Uuid;

/// Lifecycle state of a supervised service instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    /// Instance created, process not spawned yet
    #[default]
    Pending,
    /// Process spawned, waiting for readiness
    Starting,
    /// Ready and routable
    Running,
    /// Graceful termination in progress
    Stopping,
    /// Stopped on request
    Stopped,
    /// Exited unexpectedly or failed to become ready
    Crashed,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Crashed => "crashed",
        }
    }

    /// Valid transitions from this state.
    pub fn valid_transitions(&self) -> &'static [ServiceState] {
        match self {
            Self::Pending => &[Self::Starting, Self::Crashed, Self::Stopped],
            Self::Starting => &[Self::Running, Self::Crashed, Self::Stopping],
            Self::Running => &[Self::Stopping, Self::Crashed],
            Self::Stopping => &[Self::Stopped],
            Self::Crashed => &[Self::Starting, Self::Stopped],
            Self::Stopped => &[],
        }
    }

    pub fn can_transition_to(&self, next: Self) -> bool {
        self.valid_transitions().contains(&next)
    }

    /// Routes exist only for running instances.
    pub fn is_routable(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Whether a process may currently be alive for this state.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Starting | Self::Running | Self::Stopping)
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "value")]
pub enum ExitReason {
    /// Exited with a status code
    Code(i32),
    /// Terminated by a signal
    Signal(i32),
}

impl ExitReason {
    pub fn success(&self) -> bool {
        matches!(self, Self::Code(0))
    }
}

impl From<ExitStatus> for ExitReason {
    fn from(status: ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        match (status.code(), status.signal()) {
            (Some(code), _) => Self::Code(code),
            (None, Some(signal)) => Self::Signal(signal),
            (None, None) => Self::Code(-1),
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exit {code}"),
            Self::Signal(signal) => write!(f, "signal {signal}"),
        }
    }
}

/// Result of the most recent health probes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => f.write_str("-"),
            Self::Healthy => f.write_str("healthy"),
            Self::Unhealthy => f.write_str("unhealthy"),
        }
    }
}

/// Point-in-time view of a service instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    /// Identity of this instance; a manual restart creates a new one
    pub id: Uuid,
    pub name: String,
    pub state: ServiceState,
    /// OS process id of the current process, if one is alive
    pub pid: Option<u32>,
    /// When the current process was spawned
    pub started_at: Option<DateTime<Utc>>,
    /// Automatic restarts performed by the restart policy
    pub restart_count: u32,
    pub last_exit: Option<ExitReason>,
    pub health: HealthStatus,
    /// Last error that moved the instance to `Crashed`
    pub last_error: Option<String>,
}

impl ServiceInstance {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            state: ServiceState::Pending,
            pid: None,
            started_at: None,
            restart_count: 0,
            last_exit: None,
            health: HealthStatus::Unknown,
            last_error: None,
        }
    }

    /// Move to `next`, rejecting transitions the state machine forbids.
    pub fn transition_to(&mut self, next: ServiceState) -> Result<(), String> {
        if !self.state.can_transition_to(next) {
            return Err(format!(
                "Cannot transition service '{}' from {} to {}",
                self.name, self.state, next
            ));
        }
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        let mut instance = ServiceInstance::new("api");
        assert_eq!(instance.state, ServiceState::Pending);

        instance.transition_to(ServiceState::Starting).unwrap();
        instance.transition_to(ServiceState::Running).unwrap();
        instance.transition_to(ServiceState::Crashed).unwrap();
        instance.transition_to(ServiceState::Starting).unwrap();
        instance.transition_to(ServiceState::Running).unwrap();
        instance.transition_to(ServiceState::Stopping).unwrap();
        instance.transition_to(ServiceState::Stopped).unwrap();

        assert!(instance.transition_to(ServiceState::Starting).is_err());
        assert_eq!(instance.state, ServiceState::Stopped);
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!ServiceState::Pending.can_transition_to(ServiceState::Running));
        assert!(!ServiceState::Running.can_transition_to(ServiceState::Stopped));
        assert!(!ServiceState::Stopping.can_transition_to(ServiceState::Crashed));
        assert!(ServiceState::Crashed.can_transition_to(ServiceState::Stopped));
    }

    #[test]
    fn test_only_running_is_routable() {
        for state in [
            ServiceState::Pending,
            ServiceState::Starting,
            ServiceState::Stopping,
            ServiceState::Stopped,
            ServiceState::Crashed,
        ] {
            assert!(!state.is_routable(), "{state} should not be routable");
        }
        assert!(ServiceState::Running.is_routable());
    }

    #[test]
    fn test_exit_reason_display() {
        assert_eq!(ExitReason::Code(3).to_string(), "exit 3");
        assert_eq!(ExitReason::Signal(15).to_string(), "signal 15");
        assert!(ExitReason::Code(0).success());
        assert!(!ExitReason::Signal(9).success());
    }
}
