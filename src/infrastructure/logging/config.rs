use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::domain::models::LoggingConfig;

/// Logging configuration resolved for one process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty)
    #[serde(default = "default_format")]
    pub format: LogFormat,

    /// Directory for log files (optional, if None logs only to the console)
    pub log_dir: Option<PathBuf>,

    /// Where console output goes
    #[serde(default)]
    pub console: ConsoleTarget,

    /// Log rotation policy
    #[serde(default)]
    pub rotation: RotationPolicy,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    #[default]
    Daily,
    Hourly,
    Never,
}

/// Console sink. Client commands log to stderr so stdout stays machine-readable.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleTarget {
    #[default]
    Stdout,
    Stderr,
    Off,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_format(),
            log_dir: None,
            console: ConsoleTarget::default(),
            rotation: RotationPolicy::default(),
        }
    }
}

impl LogConfig {
    /// Build from the project's `logging` section; `log_dir` must already be resolved.
    pub fn from_project(logging: &LoggingConfig, log_dir: Option<PathBuf>) -> Self {
        Self {
            level: logging.level.to_lowercase(),
            format: match logging.format.as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
            log_dir,
            console: ConsoleTarget::Stdout,
            rotation: match logging.rotation.as_str() {
                "hourly" => RotationPolicy::Hourly,
                "never" => RotationPolicy::Never,
                _ => RotationPolicy::Daily,
            },
        }
    }

    /// Quiet stderr-only logging for commands that talk to a running orchestrator.
    pub fn client(level: Option<&str>) -> Self {
        Self {
            level: level.unwrap_or("warn").to_lowercase(),
            format: LogFormat::Pretty,
            log_dir: None,
            console: ConsoleTarget::Stderr,
            rotation: RotationPolicy::Never,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_format() -> LogFormat {
    LogFormat::Pretty
}
