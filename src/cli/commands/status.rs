//! Implementation of the `lokl status` command.

use anyhow::{bail, Result};
use serde::Serialize;

use super::GlobalArgs;
use crate::cli::output::{output, CommandOutput, StatusFormatter};
use crate::infrastructure::control::{ControlRequest, ControlResponse, StatusReport};

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct StatusOutput {
    pub report: StatusReport,
}

impl CommandOutput for StatusOutput {
    fn to_human(&self) -> String {
        let report = &self.report;
        let formatter = StatusFormatter::new();

        let mut lines = vec![format!(
            "{} (pid {}, up since {})",
            report.project,
            report.pid,
            report.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        )];
        lines.push(format!("config: {}", report.config.display()));
        lines.push(format!("http:   {}", report.proxy.http));
        if let Some(https) = &report.proxy.https {
            lines.push(format!("https:  {https}"));
        }

        lines.push(String::new());
        lines.push(formatter.format_services(&report.services));

        lines.push(String::new());
        if report.routes.is_empty() {
            lines.push("No active routes".to_string());
        } else {
            lines.push(formatter.format_routes(&report.routes));
        }

        lines.join("\n")
    }
}

pub async fn execute(globals: &GlobalArgs) -> Result<()> {
    let _logger = globals.client_logger()?;
    let response = globals
        .control_client()
        .request(&ControlRequest::Status)
        .await?;

    let ControlResponse::Status(report) = response else {
        bail!("Unexpected reply to status request: {response:?}");
    };

    output(&StatusOutput { report }, globals.json);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{HealthStatus, RouteEntry, ServiceState};
    use crate::infrastructure::control::ProxyStatus;
    use crate::services::{DesiredState, ServiceRecord};
    use chrono::Utc;
    use std::path::PathBuf;

    fn report(routes: Vec<RouteEntry>) -> StatusReport {
        StatusReport {
            project: "shop".into(),
            config: PathBuf::from("/work/shop/lokl.yaml"),
            pid: 42,
            started_at: Utc::now(),
            proxy: ProxyStatus {
                http: "127.0.0.1:8080".into(),
                https: None,
            },
            services: vec![ServiceRecord {
                name: "api".into(),
                hostname: Some("api.shop.test".into()),
                port: Some(3000),
                desired: DesiredState::Running,
                state: ServiceState::Running,
                health: HealthStatus::Healthy,
                instance_id: None,
                pid: Some(1000),
                started_at: Some(Utc::now()),
                restart_count: 0,
                last_exit: None,
                last_error: None,
            }],
            routes,
        }
    }

    #[test]
    fn test_status_human_lists_services_and_routes() {
        let route = RouteEntry::new("api.shop.test", "api", "127.0.0.1:3000".parse().unwrap());
        let text = StatusOutput {
            report: report(vec![route]),
        }
        .to_human();

        assert!(text.contains("shop (pid 42"));
        assert!(text.contains("api.shop.test"));
        assert!(text.contains("127.0.0.1:3000"));
        assert!(!text.contains("No active routes"));
    }

    #[test]
    fn test_status_human_without_routes() {
        let text = StatusOutput {
            report: report(Vec::new()),
        }
        .to_human();
        assert!(text.contains("No active routes"));
    }

    #[test]
    fn test_status_json_is_the_report() {
        let json = StatusOutput {
            report: report(Vec::new()),
        }
        .to_json();
        assert_eq!(json["project"], "shop");
        assert_eq!(json["services"][0]["state"], "running");
    }
}
