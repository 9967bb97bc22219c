use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use super::instance::ExitReason;

/// A validated, developer-defined service.
///
/// Definitions are produced by the config loader and compared structurally
/// during reconcile: any field difference counts as a changed definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDefinition {
    /// Unique service name (the key under `services:`)
    pub name: String,
    /// Shell command used to start the service
    pub command: String,
    /// Working directory, already resolved against the config file location
    pub working_dir: Option<PathBuf>,
    /// Environment overrides (project env merged under service env)
    pub env: BTreeMap<String, String>,
    /// Port the service listens on
    pub port: Option<u16>,
    /// Fully-qualified hostname the proxy publishes the service under
    pub hostname: Option<String>,
    /// Optional HTTP health check
    pub health: Option<HealthCheck>,
    /// What to do when the process exits on its own
    pub restart: RestartPolicy,
    /// Services that must be running before this one starts
    pub depends_on: Vec<String>,
    /// Whether `start` launches this service automatically
    pub autostart: bool,
}

impl ServiceDefinition {
    /// Create a definition with defaults for everything but name and command.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            working_dir: None,
            env: BTreeMap::new(),
            port: None,
            hostname: None,
            health: None,
            restart: RestartPolicy::default(),
            depends_on: Vec::new(),
            autostart: true,
        }
    }

    /// Whether the proxy should publish this service.
    pub fn is_routable(&self) -> bool {
        self.hostname.is_some() && self.port.is_some()
    }
}

/// HTTP health check descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    /// Request path, e.g. `/health`
    pub path: String,
    /// Delay between periodic probes once running
    pub interval: Duration,
    /// Per-probe timeout
    pub timeout: Duration,
    /// Consecutive failures before the service is marked unhealthy
    pub retries: u32,
}

/// Restart policy applied when a process exits without being asked to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    /// Never restart automatically
    Never,
    /// Restart only after a non-zero exit or a signal
    #[default]
    OnFailure,
    /// Restart after any exit
    Always,
}

impl RestartPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Never => "never",
            Self::OnFailure => "on-failure",
            Self::Always => "always",
        }
    }

    /// Decide whether an exit should be followed by an automatic restart.
    ///
    /// `None` means the service never reached a process (spawn failure or
    /// readiness timeout); that counts as a failure.
    pub fn should_restart(&self, exit: Option<&ExitReason>) -> bool {
        match self {
            Self::Never => false,
            Self::Always => true,
            Self::OnFailure => exit.is_none_or(|reason| !reason.success()),
        }
    }
}

impl fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_policy_decisions() {
        let ok = ExitReason::Code(0);
        let failed = ExitReason::Code(1);
        let killed = ExitReason::Signal(9);

        assert!(!RestartPolicy::Never.should_restart(Some(&failed)));
        assert!(RestartPolicy::Always.should_restart(Some(&ok)));
        assert!(RestartPolicy::OnFailure.should_restart(Some(&failed)));
        assert!(RestartPolicy::OnFailure.should_restart(Some(&killed)));
        assert!(RestartPolicy::OnFailure.should_restart(None));
        assert!(!RestartPolicy::OnFailure.should_restart(Some(&ok)));
    }

    #[test]
    fn test_restart_policy_yaml_names() {
        let policy: RestartPolicy = serde_yaml::from_str("on-failure").unwrap();
        assert_eq!(policy, RestartPolicy::OnFailure);
        assert_eq!(RestartPolicy::Always.to_string(), "always");
        assert!(serde_yaml::from_str::<RestartPolicy>("sometimes").is_err());
    }

    #[test]
    fn test_routable_requires_host_and_port() {
        let mut def = ServiceDefinition::new("api", "run");
        assert!(!def.is_routable());
        def.hostname = Some("api.test".into());
        assert!(!def.is_routable());
        def.port = Some(3000);
        assert!(def.is_routable());
    }
}
