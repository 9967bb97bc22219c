use figment::providers::{Format, Serialized, Yaml};
use figment::Figment;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::domain::models::{
    HealthCheck, LoggingConfig, ProjectConfig, ProxyConfig, ServiceConfig, ServiceDefinition,
    SupervisorConfig, TlsConfig,
};
use crate::services::dependency_resolver::{DependencyError, DependencyResolver};

/// Name of the project file looked up when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "lokl.yaml";

/// Directory next to the config file holding runtime state.
pub const STATE_DIR: &str = ".lokl";

const SUPPORTED_VERSION: u32 = 1;

/// Configuration error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("Unsupported config version: {0}. Supported: 1")]
    UnsupportedVersion(u32),

    #[error("Project name cannot be empty")]
    EmptyName,

    #[error("No services defined")]
    NoServices,

    #[error("Service '{0}' has no command")]
    MissingCommand(String),

    #[error("Service '{0}' declares an image; container services are not supported")]
    ImageNotSupported(String),

    #[error("Service '{service}' has invalid port {port}. Must be between 1 and 65535")]
    InvalidPort { service: String, port: u32 },

    #[error("Service '{service}' declares {reason} but no port")]
    PortRequired {
        service: String,
        reason: &'static str,
    },

    #[error("Port {port} is used by both '{first}' and '{second}'")]
    DuplicatePort {
        port: u16,
        first: String,
        second: String,
    },

    #[error("Hostname '{hostname}' is used by both '{first}' and '{second}'")]
    DuplicateHostname {
        hostname: String,
        first: String,
        second: String,
    },

    #[error("Service '{service}' uses short host '{host}' but proxy.domain is not set")]
    DomainRequired { service: String, host: String },

    #[error("Service '{service}' has invalid host '{host}'")]
    InvalidHostname { service: String, host: String },

    #[error("Service '{service}' depends on unknown service '{dependency}'")]
    UnknownDependency { service: String, dependency: String },

    #[error("Service '{0}' depends on itself")]
    SelfDependency(String),

    #[error("Dependency cycle detected: {0}")]
    DependencyCycle(String),

    #[error("Invalid {field}: must be greater than zero")]
    InvalidTiming { field: String },

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must be less than max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

impl From<DependencyError> for ConfigError {
    fn from(err: DependencyError) -> Self {
        match err {
            DependencyError::Unknown {
                service,
                dependency,
            } => Self::UnknownDependency {
                service,
                dependency,
            },
            DependencyError::SelfReference(service) => Self::SelfDependency(service),
            DependencyError::Cycle(path) => Self::DependencyCycle(path.join(" -> ")),
        }
    }
}

/// A validated project, services in start order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedConfig {
    /// Config file the project was loaded from
    pub path: PathBuf,
    /// Directory containing the config file
    pub root: PathBuf,
    pub name: String,
    pub proxy: ProxyConfig,
    pub supervisor: SupervisorConfig,
    pub tls: TlsConfig,
    pub logging: LoggingConfig,
    /// Definitions ordered dependencies-first
    pub services: Vec<ServiceDefinition>,
}

impl LoadedConfig {
    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    /// Control socket of the orchestrator running this project.
    pub fn socket_path(&self) -> PathBuf {
        socket_path_for(&self.path)
    }

    /// Log directory resolved against the project root.
    pub fn log_dir(&self) -> Option<PathBuf> {
        self.logging.log_dir.as_ref().map(|dir| self.root.join(dir))
    }

    pub fn service(&self, name: &str) -> Option<&ServiceDefinition> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Every hostname published by the project, in start order.
    pub fn hostnames(&self) -> Vec<String> {
        self.services
            .iter()
            .filter(|s| s.is_routable())
            .filter_map(|s| s.hostname.clone())
            .collect()
    }
}

/// Control socket path for a config file, without loading it.
pub fn socket_path_for(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(STATE_DIR)
        .join("lokl.sock")
}

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate a project file.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. The YAML file at `path`
    pub fn load(path: impl AsRef<Path>) -> Result<LoadedConfig, ConfigError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());

        let project: ProjectConfig = Figment::new()
            .merge(Serialized::defaults(ProjectConfig::default()))
            .merge(Yaml::file(&path))
            .extract()
            .map_err(|e| ConfigError::Parse {
                path: path.clone(),
                message: e.to_string(),
            })?;

        Self::build(project, &path)
    }

    /// Parse a project from YAML text as if it lived at `path`.
    pub fn parse(contents: &str, path: impl AsRef<Path>) -> Result<LoadedConfig, ConfigError> {
        let path = path.as_ref();
        let project: ProjectConfig = Figment::new()
            .merge(Serialized::defaults(ProjectConfig::default()))
            .merge(Yaml::string(contents))
            .extract()
            .map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        Self::build(project, path)
    }

    fn build(project: ProjectConfig, path: &Path) -> Result<LoadedConfig, ConfigError> {
        Self::validate(&project)?;

        let root = path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

        let definitions = project
            .services
            .iter()
            .map(|(name, service)| Self::definition(name, service, &project, &root))
            .collect::<Result<Vec<_>, _>>()?;

        Self::check_unique(&definitions)?;
        let services = Self::start_order(&definitions)?;

        Ok(LoadedConfig {
            path: path.to_path_buf(),
            root,
            name: project.name,
            proxy: project.proxy,
            supervisor: project.supervisor,
            tls: project.tls,
            logging: project.logging,
            services,
        })
    }

    /// Deterministic start order: dependencies first, ties broken by name.
    pub fn start_order(
        definitions: &[ServiceDefinition],
    ) -> Result<Vec<ServiceDefinition>, ConfigError> {
        Ok(DependencyResolver::new().topological_sort(definitions)?)
    }

    /// Validate project-wide settings after loading
    pub fn validate(config: &ProjectConfig) -> Result<(), ConfigError> {
        if config.version != SUPPORTED_VERSION {
            return Err(ConfigError::UnsupportedVersion(config.version));
        }

        if config.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }

        if config.services.is_empty() {
            return Err(ConfigError::NoServices);
        }

        let supervisor = &config.supervisor;
        let proxy = &config.proxy;
        for (field, value) in [
            ("supervisor.start_timeout_secs", supervisor.start_timeout_secs),
            ("supervisor.stop_timeout_secs", supervisor.stop_timeout_secs),
            ("supervisor.ready_grace_ms", supervisor.ready_grace_ms),
            ("supervisor.initial_backoff_ms", supervisor.initial_backoff_ms),
            ("proxy.dial_timeout_ms", proxy.dial_timeout_ms),
            ("proxy.dial_attempts", u64::from(proxy.dial_attempts)),
            ("proxy.header_timeout_ms", proxy.header_timeout_ms),
            ("tls.leaf_validity_days", u64::from(config.tls.leaf_validity_days)),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidTiming {
                    field: field.to_string(),
                });
            }
        }

        if supervisor.initial_backoff_ms >= supervisor.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                supervisor.initial_backoff_ms,
                supervisor.max_backoff_ms,
            ));
        }

        if proxy.http_port == 0 || (proxy.https && proxy.https_port == 0) {
            return Err(ConfigError::ValidationFailed(
                "proxy ports must be between 1 and 65535".to_string(),
            ));
        }
        if proxy.https && proxy.http_port == proxy.https_port {
            return Err(ConfigError::ValidationFailed(format!(
                "proxy.http_port and proxy.https_port are both {}",
                proxy.http_port
            )));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        Ok(())
    }

    fn definition(
        name: &str,
        service: &ServiceConfig,
        project: &ProjectConfig,
        root: &Path,
    ) -> Result<ServiceDefinition, ConfigError> {
        if service.image.is_some() {
            return Err(ConfigError::ImageNotSupported(name.to_string()));
        }
        if service.command.trim().is_empty() {
            return Err(ConfigError::MissingCommand(name.to_string()));
        }

        let port = match service.port {
            Some(port) => Some(u16::try_from(port).ok().filter(|p| *p != 0).ok_or_else(
                || ConfigError::InvalidPort {
                    service: name.to_string(),
                    port,
                },
            )?),
            None => None,
        };

        let hostname = service
            .host
            .as_deref()
            .map(|host| Self::hostname(name, host, project.proxy.domain.as_deref()))
            .transpose()?;

        if port.is_none() {
            if hostname.is_some() {
                return Err(ConfigError::PortRequired {
                    service: name.to_string(),
                    reason: "a host",
                });
            }
            if service.health.is_some() {
                return Err(ConfigError::PortRequired {
                    service: name.to_string(),
                    reason: "a health check",
                });
            }
        }

        let health = service
            .health
            .as_ref()
            .map(|health| {
                for (field, value) in [
                    ("interval_secs", health.interval_secs),
                    ("timeout_ms", health.timeout_ms),
                    ("retries", u64::from(health.retries)),
                ] {
                    if value == 0 {
                        return Err(ConfigError::InvalidTiming {
                            field: format!("services.{name}.health.{field}"),
                        });
                    }
                }
                let path = if health.path.starts_with('/') {
                    health.path.clone()
                } else {
                    format!("/{}", health.path)
                };
                Ok(HealthCheck {
                    path,
                    interval: Duration::from_secs(health.interval_secs),
                    timeout: Duration::from_millis(health.timeout_ms),
                    retries: health.retries,
                })
            })
            .transpose()?;

        let mut env: BTreeMap<String, String> = project.env.clone();
        env.extend(service.env.clone());

        let working_dir = match &service.path {
            Some(path) => root.join(path),
            None => root.to_path_buf(),
        };

        Ok(ServiceDefinition {
            name: name.to_string(),
            command: service.command.trim().to_string(),
            working_dir: Some(working_dir),
            env,
            port,
            hostname,
            health,
            restart: service.restart,
            depends_on: service.depends_on.clone(),
            autostart: service.autostart,
        })
    }

    /// Normalize a host alias, joining short names to the project domain.
    fn hostname(service: &str, host: &str, domain: Option<&str>) -> Result<String, ConfigError> {
        let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
        let valid = !host.is_empty()
            && host
                .split('.')
                .all(|label| {
                    !label.is_empty()
                        && !label.starts_with('-')
                        && !label.ends_with('-')
                        && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
                });
        if !valid {
            return Err(ConfigError::InvalidHostname {
                service: service.to_string(),
                host,
            });
        }

        if host.contains('.') {
            return Ok(host);
        }

        let domain = domain
            .map(|d| d.trim().trim_matches('.').to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .ok_or_else(|| ConfigError::DomainRequired {
                service: service.to_string(),
                host: host.clone(),
            })?;
        Ok(format!("{host}.{domain}"))
    }

    fn check_unique(definitions: &[ServiceDefinition]) -> Result<(), ConfigError> {
        let mut ports: HashMap<u16, &str> = HashMap::new();
        let mut hosts: HashMap<&str, &str> = HashMap::new();

        for def in definitions {
            if let Some(port) = def.port {
                if let Some(first) = ports.insert(port, &def.name) {
                    return Err(ConfigError::DuplicatePort {
                        port,
                        first: first.to_string(),
                        second: def.name.clone(),
                    });
                }
            }
            if let Some(hostname) = def.hostname.as_deref() {
                if let Some(first) = hosts.insert(hostname, &def.name) {
                    return Err(ConfigError::DuplicateHostname {
                        hostname: hostname.to_string(),
                        first: first.to_string(),
                        second: def.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}
