//! Command-line interface
//!
//! `lokl start` runs the orchestrator in the foreground; every other
//! subcommand either talks to it over the control socket or works on local
//! files (hosts file, CA).

pub mod commands;
pub mod output;
pub mod types;

pub use commands::GlobalArgs;
pub use types::{CaCommands, Cli, Commands, DnsCommands};

use crate::application::{error_kind, SupervisorError};
use crate::infrastructure::certs::CertificateError;
use crate::infrastructure::config::ConfigError;
use crate::infrastructure::control::{ControlError, ErrorKind};
use crate::infrastructure::proxy::ProxyError;

/// Run the parsed command line.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let globals = GlobalArgs::from(&cli);
    match cli.command {
        Commands::Start { service } => commands::start::execute(service, &globals).await,
        Commands::Stop { service } => commands::service::stop(service, &globals).await,
        Commands::Restart { service } => commands::service::restart(service, &globals).await,
        Commands::Status => commands::status::execute(&globals).await,
        Commands::Logs {
            service,
            follow,
            lines,
        } => commands::logs::execute(service, follow, lines, &globals).await,
        Commands::Reload => commands::reload::execute(&globals).await,
        Commands::Dns(command) => commands::dns::execute(command, &globals).await,
        Commands::Ca(command) => commands::ca::execute(command, &globals).await,
    }
}

/// Error kind of the first recognised error in the chain.
pub fn classify(err: &anyhow::Error) -> ErrorKind {
    for cause in err.chain() {
        if cause.downcast_ref::<ConfigError>().is_some() {
            return ErrorKind::Config;
        }
        if let Some(e) = cause.downcast_ref::<ControlError>() {
            return e.kind();
        }
        if let Some(e) = cause.downcast_ref::<SupervisorError>() {
            return error_kind(e);
        }
        if cause.downcast_ref::<ProxyError>().is_some() {
            return ErrorKind::Proxy;
        }
        if cause.downcast_ref::<CertificateError>().is_some() {
            return ErrorKind::Certificate;
        }
    }
    ErrorKind::Internal
}

/// Print `err` and exit with the code for its kind.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    let kind = classify(&err);

    if json_mode {
        let body = serde_json::json!({
            "error": {
                "kind": kind,
                "message": format!("{err:#}"),
            }
        });
        eprintln!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("Error: {err:#}");
    }

    std::process::exit(kind.exit_code())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use std::path::PathBuf;

    #[test]
    fn test_classify_config_error_behind_context() {
        let err = Err::<(), _>(ConfigError::NoServices)
            .context("Failed to load lokl.yaml")
            .unwrap_err();
        assert_eq!(classify(&err), ErrorKind::Config);
        assert_eq!(classify(&err).exit_code(), 2);
    }

    #[test]
    fn test_classify_unreachable_socket() {
        let err = anyhow::Error::new(ControlError::NotRunning {
            path: PathBuf::from("/p/.lokl/lokl.sock"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        });
        assert_eq!(classify(&err).exit_code(), 8);
    }

    #[test]
    fn test_classify_remote_kind() {
        let err = anyhow::Error::new(ControlError::Remote {
            kind: ErrorKind::HealthCheckTimeout,
            message: "api did not become ready".into(),
        });
        assert_eq!(classify(&err).exit_code(), 5);
    }

    #[test]
    fn test_classify_supervisor_error() {
        let err = anyhow::Error::new(SupervisorError::DependencyNotReady {
            service: "api".into(),
            dependency: "db".into(),
        });
        assert_eq!(classify(&err).exit_code(), 3);
    }

    #[test]
    fn test_classify_unknown_error() {
        let err = anyhow::anyhow!("something else");
        assert_eq!(classify(&err).exit_code(), 1);
    }
}
