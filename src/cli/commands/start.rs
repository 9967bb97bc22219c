//! Implementation of the `lokl start` command.

use anyhow::{Context, Result};
use serde::Serialize;

use super::{print_reply, GlobalArgs};
use crate::application::{Orchestrator, OrchestratorOptions};
use crate::cli::output::{output, CommandOutput};
use crate::infrastructure::config::ConfigLoader;
use crate::infrastructure::control::ControlRequest;
use crate::infrastructure::logging::{LogConfig, LoggerImpl};

#[derive(Debug, Serialize)]
pub struct StartOutput {
    pub project: String,
    pub services: usize,
    pub http: String,
    pub https: Option<String>,
}

impl CommandOutput for StartOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![format!(
            "lokl running {} ({} service{})",
            self.project,
            self.services,
            if self.services == 1 { "" } else { "s" }
        )];
        lines.push(format!("  http:  {}", self.http));
        if let Some(https) = &self.https {
            lines.push(format!("  https: {https}"));
        }
        lines.push("Press Ctrl-C to stop.".to_string());
        lines.join("\n")
    }
}

pub async fn execute(service: Option<String>, globals: &GlobalArgs) -> Result<()> {
    if let Some(name) = service {
        return start_service(name, globals).await;
    }

    let config = ConfigLoader::load(&globals.config)
        .with_context(|| format!("Failed to load {}", globals.config.display()))?;

    let mut log_config = LogConfig::from_project(&config.logging, config.log_dir());
    if let Some(level) = &globals.log_level {
        log_config.level = level.to_lowercase();
    }
    let _logger = LoggerImpl::init(&log_config)?;

    tracing::info!(
        project = %config.name,
        config = %config.path.display(),
        services = config.services.len(),
        "starting lokl"
    );

    let project = config.name.clone();
    let services = config.services.len();
    let options = OrchestratorOptions {
        home: globals.home.clone(),
    };
    let orchestrator = Orchestrator::start(config, &options)
        .await
        .context("Failed to start lokl")?;

    let proxy = orchestrator.proxy_status();
    output(
        &StartOutput {
            project,
            services,
            http: proxy.http.clone(),
            https: proxy.https.clone(),
        },
        globals.json,
    );

    orchestrator.run().await
}

async fn start_service(name: String, globals: &GlobalArgs) -> Result<()> {
    let _logger = globals.client_logger()?;
    let response = globals
        .control_client()
        .request(&ControlRequest::StartService { name })
        .await?;
    print_reply(response, globals.json);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_output_human() {
        let out = StartOutput {
            project: "shop".into(),
            services: 2,
            http: "127.0.0.1:8080".into(),
            https: Some("127.0.0.1:8443".into()),
        };
        let text = out.to_human();
        assert!(text.contains("lokl running shop (2 services)"));
        assert!(text.contains("https: 127.0.0.1:8443"));
    }

    #[test]
    fn test_start_output_without_https() {
        let out = StartOutput {
            project: "shop".into(),
            services: 1,
            http: "127.0.0.1:8080".into(),
            https: None,
        };
        let text = out.to_human();
        assert!(text.contains("(1 service)"));
        assert!(!text.contains("https"));
    }
}
