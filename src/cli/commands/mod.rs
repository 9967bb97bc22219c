//! CLI command implementations.

pub mod ca;
pub mod dns;
pub mod logs;
pub mod reload;
pub mod service;
pub mod start;
pub mod status;

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::cli::output::{output, MessageOutput};
use crate::cli::Cli;
use crate::infrastructure::config::socket_path_for;
use crate::infrastructure::control::{ControlClient, ControlResponse};
use crate::infrastructure::logging::{LogConfig, LoggerImpl};

/// Flags shared by every subcommand.
#[derive(Debug, Clone)]
pub struct GlobalArgs {
    pub config: PathBuf,
    pub json: bool,
    pub log_level: Option<String>,
    pub home: Option<PathBuf>,
}

impl From<&Cli> for GlobalArgs {
    fn from(cli: &Cli) -> Self {
        Self {
            config: cli.config.clone(),
            json: cli.json,
            log_level: cli.log_level.clone(),
            home: cli.home.clone(),
        }
    }
}

impl GlobalArgs {
    /// Client for the orchestrator serving this config file.
    pub fn control_client(&self) -> ControlClient {
        ControlClient::new(socket_path(&self.config))
    }

    /// Stderr logging for commands that do not run the orchestrator.
    pub fn client_logger(&self) -> Result<LoggerImpl> {
        LoggerImpl::init(&LogConfig::client(self.log_level.as_deref()))
    }
}

fn socket_path(config: &Path) -> PathBuf {
    let config = std::path::absolute(config).unwrap_or_else(|_| config.to_path_buf());
    socket_path_for(&config)
}

/// Print a final `ok` reply.
pub(crate) fn print_reply(response: ControlResponse, json_mode: bool) {
    let message = match response {
        ControlResponse::Ok { message } => message,
        other => format!("{other:?}"),
    };
    output(&MessageOutput::new(message), json_mode);
}
