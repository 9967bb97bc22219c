//! Installing the local CA into the operating system trust store.

use std::path::{Path, PathBuf};
use std::process::Command;

use super::error::{CertificateError, Result};

/// Where the CA ended up after a successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustOutcome {
    /// Added to the login keychain
    Keychain(PathBuf),
    /// Copied into a system anchor directory and the store refreshed
    SystemStore(PathBuf),
}

/// Install `ca_cert` as a trusted root.
///
/// macOS uses the login keychain. Linux copies into the Debian or Fedora
/// anchor directory and runs the matching update tool, which usually needs
/// root.
pub fn trust_ca(ca_cert: &Path) -> Result<TrustOutcome> {
    if !ca_cert.is_file() {
        return Err(CertificateError::Trust(format!(
            "{} does not exist; run `lokl start` or `lokl ca path` first",
            ca_cert.display()
        )));
    }

    #[cfg(target_os = "macos")]
    {
        trust_macos(ca_cert)
    }

    #[cfg(not(target_os = "macos"))]
    {
        trust_linux(ca_cert)
    }
}

#[cfg(target_os = "macos")]
fn trust_macos(ca_cert: &Path) -> Result<TrustOutcome> {
    let home = dirs::home_dir()
        .ok_or_else(|| CertificateError::Trust("cannot locate home directory".to_string()))?;
    let keychain = home.join("Library/Keychains/login.keychain-db");

    run(Command::new("security")
        .arg("add-trusted-cert")
        .arg("-d")
        .arg("-r")
        .arg("trustRoot")
        .arg("-k")
        .arg(&keychain)
        .arg(ca_cert))?;

    tracing::info!(keychain = %keychain.display(), "trusted local CA");
    Ok(TrustOutcome::Keychain(keychain))
}

#[cfg(not(target_os = "macos"))]
fn trust_linux(ca_cert: &Path) -> Result<TrustOutcome> {
    let stores = [
        ("/usr/local/share/ca-certificates", "update-ca-certificates"),
        ("/etc/pki/ca-trust/source/anchors", "update-ca-trust"),
    ];

    let (dir, tool) = stores
        .iter()
        .find(|(dir, _)| Path::new(dir).is_dir())
        .ok_or_else(|| {
            CertificateError::Trust(
                "no supported system trust store found; import the CA manually".to_string(),
            )
        })?;

    let target = Path::new(dir).join("lokl-local-ca.crt");
    std::fs::copy(ca_cert, &target).map_err(|e| CertificateError::io(&target, e))?;
    run(&mut Command::new(tool))?;

    tracing::info!(path = %target.display(), "trusted local CA");
    Ok(TrustOutcome::SystemStore(target))
}

fn run(command: &mut Command) -> Result<()> {
    let program = command.get_program().to_string_lossy().into_owned();
    let status = command
        .status()
        .map_err(|e| CertificateError::Trust(format!("failed to run {program}: {e}")))?;

    if status.success() {
        Ok(())
    } else {
        Err(CertificateError::Trust(format!(
            "{program} failed with status {status}"
        )))
    }
}
