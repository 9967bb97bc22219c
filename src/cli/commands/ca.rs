//! Implementation of the `lokl ca` commands.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use super::GlobalArgs;
use crate::cli::output::{output, CommandOutput};
use crate::cli::types::CaCommands;
use crate::infrastructure::certs::{trust_ca, CertificateManager, TrustOutcome};

#[derive(Debug, Serialize)]
pub struct CaPathOutput {
    pub certificate: PathBuf,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

impl CommandOutput for CaPathOutput {
    fn to_human(&self) -> String {
        self.certificate.display().to_string()
    }
}

#[derive(Debug, Serialize)]
pub struct CaInstallOutput {
    pub certificate: PathBuf,
    pub store: &'static str,
    pub location: PathBuf,
}

impl CommandOutput for CaInstallOutput {
    fn to_human(&self) -> String {
        format!(
            "Trusted {} in the {} ({})",
            self.certificate.display(),
            self.store,
            self.location.display()
        )
    }
}

pub async fn execute(command: CaCommands, globals: &GlobalArgs) -> Result<()> {
    let _logger = globals.client_logger()?;

    let dir = match &globals.home {
        Some(home) => home.clone(),
        None => CertificateManager::default_dir()?,
    };
    let manager = Arc::new(CertificateManager::new(dir));

    let ca = {
        let manager = Arc::clone(&manager);
        tokio::task::spawn_blocking(move || manager.ensure_ca())
            .await
            .context("CA task panicked")??
    };
    let certificate = manager.ca_cert_path();

    match command {
        CaCommands::Path => output(
            &CaPathOutput {
                certificate,
                expires_at: ca.not_after,
            },
            globals.json,
        ),
        CaCommands::Install => {
            let path = certificate.clone();
            let outcome = tokio::task::spawn_blocking(move || trust_ca(&path))
                .await
                .context("trust task panicked")??;
            let (store, location) = match outcome {
                TrustOutcome::Keychain(path) => ("login keychain", path),
                TrustOutcome::SystemStore(path) => ("system trust store", path),
            };
            output(
                &CaInstallOutput {
                    certificate,
                    store,
                    location,
                },
                globals.json,
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_output_human() {
        let out = CaInstallOutput {
            certificate: PathBuf::from("/home/me/.local/share/lokl/ca.pem"),
            store: "system trust store",
            location: PathBuf::from("/usr/local/share/ca-certificates/lokl.crt"),
        };
        assert_eq!(
            out.to_human(),
            "Trusted /home/me/.local/share/lokl/ca.pem in the system trust store \
             (/usr/local/share/ca-certificates/lokl.crt)"
        );
    }
}
