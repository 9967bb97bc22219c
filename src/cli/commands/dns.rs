//! Implementation of the `lokl dns` commands.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;

use super::GlobalArgs;
use crate::cli::output::{output, CommandOutput};
use crate::cli::types::DnsCommands;
use crate::infrastructure::config::{ConfigLoader, LoadedConfig};
use crate::infrastructure::hosts::{self, HostsFile};

#[derive(Debug, Serialize)]
pub struct DnsChangeOutput {
    pub hosts_file: PathBuf,
    pub action: &'static str,
    pub hostnames: Vec<String>,
}

impl CommandOutput for DnsChangeOutput {
    fn to_human(&self) -> String {
        match self.action {
            "setup" if self.hostnames.is_empty() => {
                "No hostnames declared; nothing written".to_string()
            }
            "setup" => {
                let mut lines = vec![format!(
                    "Mapped {} hostname(s) to 127.0.0.1 in {}",
                    self.hostnames.len(),
                    self.hosts_file.display()
                )];
                lines.extend(self.hostnames.iter().map(|h| format!("  {h}")));
                lines.join("\n")
            }
            _ if self.hostnames.is_empty() => {
                format!("No lokl entries in {}", self.hosts_file.display())
            }
            _ => format!(
                "Removed {} hostname(s) from {}",
                self.hostnames.len(),
                self.hosts_file.display()
            ),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HostCheck {
    pub hostname: String,
    pub in_hosts_file: bool,
    pub resolves_to_loopback: bool,
}

#[derive(Debug, Serialize)]
pub struct DnsCheckOutput {
    pub hosts: Vec<HostCheck>,
}

impl CommandOutput for DnsCheckOutput {
    fn to_human(&self) -> String {
        if self.hosts.is_empty() {
            return "No hostnames declared".to_string();
        }

        let mut lines: Vec<String> = self
            .hosts
            .iter()
            .map(|check| {
                let icon = if check.resolves_to_loopback { "✓" } else { "✗" };
                let note = match (check.resolves_to_loopback, check.in_hosts_file) {
                    (true, _) => "",
                    (false, true) => " (listed in hosts file but not resolving)",
                    (false, false) => " (not resolving to loopback)",
                };
                format!("{icon} {}{note}", check.hostname)
            })
            .collect();

        if self.hosts.iter().any(|c| !c.resolves_to_loopback) {
            lines.push("Run `lokl dns setup` with administrator rights to add them.".to_string());
        }
        lines.join("\n")
    }
}

pub async fn execute(command: DnsCommands, globals: &GlobalArgs) -> Result<()> {
    let _logger = globals.client_logger()?;
    let config = ConfigLoader::load(&globals.config)
        .with_context(|| format!("Failed to load {}", globals.config.display()))?;

    match command {
        DnsCommands::Setup { hosts_file } => setup(&config, hosts_file, globals.json),
        DnsCommands::Remove { hosts_file } => remove(&config, hosts_file, globals.json),
        DnsCommands::Check { hosts_file } => check(&config, hosts_file, globals.json).await,
    }
}

fn setup(config: &LoadedConfig, path: PathBuf, json_mode: bool) -> Result<()> {
    let hostnames = config.hostnames();
    let file = HostsFile::at(path, &config.name);
    if !hostnames.is_empty() {
        file.setup(&hostnames)?;
        tracing::info!(hosts_file = %file.path().display(), count = hostnames.len(), "hosts entries written");
    }

    output(
        &DnsChangeOutput {
            hosts_file: file.path().to_path_buf(),
            action: "setup",
            hostnames,
        },
        json_mode,
    );
    Ok(())
}

fn remove(config: &LoadedConfig, path: PathBuf, json_mode: bool) -> Result<()> {
    let file = HostsFile::at(path, &config.name);
    let listed = file.entries()?;
    if file.remove()? {
        tracing::info!(hosts_file = %file.path().display(), "hosts entries removed");
    }

    output(
        &DnsChangeOutput {
            hosts_file: file.path().to_path_buf(),
            action: "remove",
            hostnames: listed,
        },
        json_mode,
    );
    Ok(())
}

async fn check(config: &LoadedConfig, path: PathBuf, json_mode: bool) -> Result<()> {
    let file = HostsFile::at(path, &config.name);
    // A missing or unreadable hosts file only means nothing is listed
    let listed = file.entries().unwrap_or_default();

    let mut checks = Vec::new();
    for hostname in config.hostnames() {
        checks.push(HostCheck {
            in_hosts_file: listed.contains(&hostname),
            resolves_to_loopback: hosts::resolves_to_loopback(&hostname).await,
            hostname,
        });
    }

    output(&DnsCheckOutput { hosts: checks }, json_mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_output_lists_hosts() {
        let out = DnsChangeOutput {
            hosts_file: PathBuf::from("/etc/hosts"),
            action: "setup",
            hostnames: vec!["api.shop.test".into(), "web.shop.test".into()],
        };
        let text = out.to_human();
        assert!(text.starts_with("Mapped 2 hostname(s)"));
        assert!(text.contains("  web.shop.test"));
    }

    #[test]
    fn test_remove_output_when_nothing_listed() {
        let out = DnsChangeOutput {
            hosts_file: PathBuf::from("/etc/hosts"),
            action: "remove",
            hostnames: Vec::new(),
        };
        assert_eq!(out.to_human(), "No lokl entries in /etc/hosts");
    }

    #[test]
    fn test_check_output_hints_setup() {
        let out = DnsCheckOutput {
            hosts: vec![
                HostCheck {
                    hostname: "localhost".into(),
                    in_hosts_file: false,
                    resolves_to_loopback: true,
                },
                HostCheck {
                    hostname: "api.shop.test".into(),
                    in_hosts_file: false,
                    resolves_to_loopback: false,
                },
            ],
        };
        let text = out.to_human();
        assert!(text.contains("✓ localhost"));
        assert!(text.contains("✗ api.shop.test (not resolving to loopback)"));
        assert!(text.contains("lokl dns setup"));
    }
}
