//! Newline-delimited JSON messages exchanged over the control socket.
//!
//! Every message is one JSON object on one line, tagged by `type`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::application::supervisor::LogLine;
use crate::domain::models::RouteEntry;
use crate::services::ServiceRecord;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlRequest {
    Status,
    StartService {
        name: String,
    },
    StopService {
        name: String,
    },
    RestartService {
        name: String,
    },
    Reload,
    Shutdown,
    Logs {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lines: Option<usize>,
        #[serde(default)]
        follow: bool,
    },
}

impl ControlRequest {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::StartService { .. } => "start_service",
            Self::StopService { .. } => "stop_service",
            Self::RestartService { .. } => "restart_service",
            Self::Reload => "reload",
            Self::Shutdown => "shutdown",
            Self::Logs { .. } => "logs",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlResponse {
    Status(StatusReport),
    Ok { message: String },
    LogLine(LogLine),
    End,
    Error { kind: ErrorKind, message: String },
}

impl ControlResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self::Ok {
            message: message.into(),
        }
    }

    pub fn error(kind: ErrorKind, message: impl fmt::Display) -> Self {
        Self::Error {
            kind,
            message: message.to_string(),
        }
    }

    /// Whether this response ends a request's reply.
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::LogLine(_))
    }
}

/// Error taxonomy carried over the wire so the CLI can pick an exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    DependencyNotReady,
    ProcessSpawn,
    HealthCheckTimeout,
    Proxy,
    Certificate,
    UnknownService,
    Unreachable,
    Internal,
}

impl ErrorKind {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config => 2,
            Self::DependencyNotReady => 3,
            Self::ProcessSpawn => 4,
            Self::HealthCheckTimeout => 5,
            Self::Proxy => 6,
            Self::Certificate => 7,
            Self::Unreachable => 8,
            Self::UnknownService | Self::Internal => 1,
        }
    }
}

/// Addresses the proxy is listening on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyStatus {
    pub http: String,
    pub https: Option<String>,
}

/// Everything `lokl status` shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub project: String,
    pub config: PathBuf,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub proxy: ProxyStatus,
    /// In start order
    pub services: Vec<ServiceRecord>,
    /// Ordered by hostname
    pub routes: Vec<RouteEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::supervisor::LogStream;

    #[test]
    fn test_request_wire_format() {
        let request: ControlRequest =
            serde_json::from_str(r#"{"type":"stop_service","name":"api"}"#).unwrap();
        assert_eq!(request, ControlRequest::StopService { name: "api".into() });

        let logs: ControlRequest = serde_json::from_str(r#"{"type":"logs","name":"api"}"#).unwrap();
        assert_eq!(
            logs,
            ControlRequest::Logs {
                name: "api".into(),
                lines: None,
                follow: false
            }
        );

        let json = serde_json::to_string(&ControlRequest::Reload).unwrap();
        assert_eq!(json, r#"{"type":"reload"}"#);
        assert!(serde_json::from_str::<ControlRequest>(r#"{"type":"explode"}"#).is_err());
    }

    #[test]
    fn test_response_wire_format() {
        let json = serde_json::to_value(ControlResponse::error(ErrorKind::Config, "bad port")).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["kind"], "config");
        assert_eq!(json["message"], "bad port");

        let line = ControlResponse::LogLine(LogLine {
            timestamp: Utc::now(),
            stream: LogStream::Stderr,
            line: "boom".into(),
        });
        let json = serde_json::to_value(&line).unwrap();
        assert_eq!(json["type"], "log_line");
        assert_eq!(json["line"], "boom");
        assert_eq!(json["stream"], "stderr");
        assert!(!line.is_final());
        assert!(ControlResponse::End.is_final());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(ErrorKind::Config.exit_code(), 2);
        assert_eq!(ErrorKind::DependencyNotReady.exit_code(), 3);
        assert_eq!(ErrorKind::Certificate.exit_code(), 7);
        assert_eq!(ErrorKind::Unreachable.exit_code(), 8);
        assert_eq!(ErrorKind::Internal.exit_code(), 1);
    }
}
