use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::service::RestartPolicy;

/// Top-level structure of a `lokl.yaml` project file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct ProjectConfig {
    /// Schema version, only `1` is supported
    #[serde(default = "default_version")]
    pub version: u32,

    /// Project name, used for the hosts file block marker
    #[serde(default)]
    pub name: String,

    /// Environment applied to every service (service `env` wins)
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub proxy: ProxyConfig,

    #[serde(default)]
    pub supervisor: SupervisorConfig,

    #[serde(default)]
    pub tls: TlsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Services keyed by their unique name
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
}

const fn default_version() -> u32 {
    1
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            name: String::new(),
            env: BTreeMap::new(),
            proxy: ProxyConfig::default(),
            supervisor: SupervisorConfig::default(),
            tls: TlsConfig::default(),
            logging: LoggingConfig::default(),
            services: BTreeMap::new(),
        }
    }
}

/// Reverse proxy listeners and backend dialling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct ProxyConfig {
    /// Base domain joined to short service hostnames
    #[serde(default)]
    pub domain: Option<String>,

    /// Serve a TLS listener next to the plain one
    #[serde(default = "default_true")]
    pub https: bool,

    /// Listener address
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_http_port")]
    pub http_port: u16,

    #[serde(default = "default_https_port")]
    pub https_port: u16,

    /// Per-attempt timeout when connecting to a backend
    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,

    /// Connection attempts before answering 503
    #[serde(default = "default_dial_attempts")]
    pub dial_attempts: u32,

    /// Time allowed for a client to send its request head
    #[serde(default = "default_header_timeout_ms")]
    pub header_timeout_ms: u64,
}

const fn default_true() -> bool {
    true
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

const fn default_http_port() -> u16 {
    8080
}

const fn default_https_port() -> u16 {
    8443
}

const fn default_dial_timeout_ms() -> u64 {
    2000
}

const fn default_dial_attempts() -> u32 {
    3
}

const fn default_header_timeout_ms() -> u64 {
    10_000
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            domain: None,
            https: default_true(),
            bind: default_bind(),
            http_port: default_http_port(),
            https_port: default_https_port(),
            dial_timeout_ms: default_dial_timeout_ms(),
            dial_attempts: default_dial_attempts(),
            header_timeout_ms: default_header_timeout_ms(),
        }
    }
}

/// Process supervision timing and restart limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct SupervisorConfig {
    /// Time allowed for a service to become ready
    #[serde(default = "default_start_timeout_secs")]
    pub start_timeout_secs: u64,

    /// Grace period between SIGTERM and SIGKILL
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,

    /// Liveness window for services without a health check
    #[serde(default = "default_ready_grace_ms")]
    pub ready_grace_ms: u64,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Automatic restarts before staying crashed, `None` for unlimited
    #[serde(default = "default_max_restarts")]
    pub max_restarts: Option<u32>,
}

const fn default_start_timeout_secs() -> u64 {
    30
}

const fn default_stop_timeout_secs() -> u64 {
    10
}

const fn default_ready_grace_ms() -> u64 {
    1000
}

const fn default_initial_backoff_ms() -> u64 {
    500
}

const fn default_max_backoff_ms() -> u64 {
    30_000
}

#[allow(clippy::unnecessary_wraps)]
const fn default_max_restarts() -> Option<u32> {
    Some(10)
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            start_timeout_secs: default_start_timeout_secs(),
            stop_timeout_secs: default_stop_timeout_secs(),
            ready_grace_ms: default_ready_grace_ms(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_restarts: default_max_restarts(),
        }
    }
}

/// Certificate issuance settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct TlsConfig {
    #[serde(default = "default_leaf_validity_days")]
    pub leaf_validity_days: u32,
}

const fn default_leaf_validity_days() -> u32 {
    90
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            leaf_validity_days: default_leaf_validity_days(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files, relative to the config file
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Rotation: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// One entry under `services:`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct ServiceConfig {
    /// Shell command
    #[serde(default)]
    pub command: String,

    /// Container image; parsed only so it can be rejected with a clear error
    #[serde(default)]
    pub image: Option<String>,

    /// Working directory relative to the config file
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Kept wider than `u16` so out-of-range values get a precise error
    #[serde(default)]
    pub port: Option<u32>,

    /// Hostname alias, short names are joined to `proxy.domain`
    #[serde(default)]
    pub host: Option<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub restart: RestartPolicy,

    #[serde(default = "default_true")]
    pub autostart: bool,

    #[serde(default)]
    pub health: Option<HealthConfig>,
}

/// HTTP health check settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct HealthConfig {
    pub path: String,

    #[serde(default = "default_health_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_health_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_health_retries")]
    pub retries: u32,
}

const fn default_health_interval_secs() -> u64 {
    10
}

const fn default_health_timeout_ms() -> u64 {
    3000
}

const fn default_health_retries() -> u32 {
    3
}
