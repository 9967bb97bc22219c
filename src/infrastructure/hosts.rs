//! `/etc/hosts` management for project hostnames.
//!
//! lokl owns one marked block per project:
//!
//! ```text
//! # lokl:shop - START
//! 127.0.0.1 api.shop.test
//! # lokl:shop - END
//! ```
//!
//! Lines outside the block are never touched.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const HOSTS_FILE: &str = "/etc/hosts";

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum HostsError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {} (administrator rights are usually required): {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, HostsError>;

/// The project's block in a hosts file.
#[derive(Debug, Clone)]
pub struct HostsFile {
    path: PathBuf,
    project: String,
}

impl HostsFile {
    /// The system hosts file.
    pub fn system(project: impl Into<String>) -> Self {
        Self::at(HOSTS_FILE, project)
    }

    pub fn at(path: impl Into<PathBuf>, project: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            project: project.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn start_marker(&self) -> String {
        format!("# lokl:{} - START", self.project)
    }

    fn end_marker(&self) -> String {
        format!("# lokl:{} - END", self.project)
    }

    /// Block mapping every hostname to loopback, without a trailing newline.
    pub fn render_block(&self, hostnames: &[String]) -> String {
        let mut block = self.start_marker();
        block.push('\n');
        for host in hostnames {
            block.push_str(&format!("127.0.0.1 {host}\n"));
        }
        block.push_str(&self.end_marker());
        block
    }

    /// `content` with this project's block removed.
    pub fn strip_block(&self, content: &str) -> String {
        let start = self.start_marker();
        let end = self.end_marker();
        let mut inside = false;
        let mut out = String::with_capacity(content.len());

        for line in content.lines() {
            if line == start {
                inside = true;
                continue;
            }
            if line == end {
                inside = false;
                continue;
            }
            if !inside {
                out.push_str(line);
                out.push('\n');
            }
        }
        out
    }

    /// Hostnames currently listed in this project's block.
    pub fn listed(&self, content: &str) -> Vec<String> {
        let start = self.start_marker();
        let end = self.end_marker();
        content
            .lines()
            .skip_while(|line| *line != start)
            .skip(1)
            .take_while(|line| *line != end)
            .filter_map(|line| line.split_whitespace().nth(1).map(str::to_string))
            .collect()
    }

    fn read(&self) -> Result<String> {
        fs::read_to_string(&self.path).map_err(|source| HostsError::Read {
            path: self.path.clone(),
            source,
        })
    }

    fn write(&self, content: &str) -> Result<()> {
        fs::write(&self.path, content).map_err(|source| HostsError::Write {
            path: self.path.clone(),
            source,
        })
    }

    /// Replace the project's block with one listing `hostnames`.
    ///
    /// # Errors
    /// Read or write failures, typically a permission error
    pub fn setup(&self, hostnames: &[String]) -> Result<()> {
        let cleaned = self.strip_block(&self.read()?);
        if hostnames.is_empty() {
            return self.write(&cleaned);
        }

        let content = format!(
            "{}\n\n{}\n",
            cleaned.trim_end_matches('\n'),
            self.render_block(hostnames)
        );
        self.write(&content)?;
        tracing::info!(path = %self.path.display(), hosts = hostnames.len(), "hosts file updated");
        Ok(())
    }

    /// Remove the project's block; returns whether one was present.
    ///
    /// # Errors
    /// Read or write failures, typically a permission error
    pub fn remove(&self) -> Result<bool> {
        let content = self.read()?;
        if !content.lines().any(|line| line == self.start_marker()) {
            return Ok(false);
        }
        self.write(&self.strip_block(&content))?;
        tracing::info!(path = %self.path.display(), "hosts file block removed");
        Ok(true)
    }

    /// Hostnames currently in the project's block on disk.
    ///
    /// # Errors
    /// Read failures
    pub fn entries(&self) -> Result<Vec<String>> {
        Ok(self.listed(&self.read()?))
    }
}

/// Whether `host` resolves to 127.0.0.1 or ::1.
pub async fn resolves_to_loopback(host: &str) -> bool {
    match tokio::time::timeout(LOOKUP_TIMEOUT, tokio::net::lookup_host((host, 80))).await {
        Ok(Ok(mut addrs)) => addrs.any(|addr| addr.ip().is_loopback()),
        Ok(Err(e)) => {
            tracing::debug!(host = %host, error = %e, "hostname lookup failed");
            false
        }
        Err(_) => false,
    }
}

/// The subset of `hostnames` that does not resolve to loopback.
pub async fn unresolved(hostnames: &[String]) -> Vec<String> {
    let checks = hostnames.iter().map(|host| async move {
        (!resolves_to_loopback(host).await).then(|| host.clone())
    });
    futures::future::join_all(checks)
        .await
        .into_iter()
        .flatten()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "127.0.0.1 localhost\n::1 localhost\n";

    fn hosts(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_setup_and_remove_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts");
        fs::write(&path, BASE).unwrap();
        let file = HostsFile::at(&path, "shop");

        file.setup(&hosts(&["api.shop.test", "web.shop.test"])).unwrap();
        let written = fs::read_to_string(&path).unwrap();
        assert!(written.starts_with(BASE));
        assert!(written.contains("# lokl:shop - START\n127.0.0.1 api.shop.test\n127.0.0.1 web.shop.test\n# lokl:shop - END\n"));
        assert_eq!(file.entries().unwrap(), hosts(&["api.shop.test", "web.shop.test"]));

        // Setup twice keeps a single block
        file.setup(&hosts(&["api.shop.test"])).unwrap();
        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(written.matches("# lokl:shop - START").count(), 1);
        assert_eq!(file.entries().unwrap(), hosts(&["api.shop.test"]));

        assert!(file.remove().unwrap());
        let restored = fs::read_to_string(&path).unwrap();
        assert!(!restored.contains("lokl"));
        assert!(restored.starts_with(BASE));
        assert!(!file.remove().unwrap());
    }

    #[test]
    fn test_other_projects_untouched() {
        let other = HostsFile::at("/unused", "blog");
        let shop = HostsFile::at("/unused", "shop");
        let content = format!(
            "{BASE}{}\n{}\n",
            other.render_block(&hosts(&["blog.test"])),
            shop.render_block(&hosts(&["shop.test"]))
        );

        let stripped = shop.strip_block(&content);
        assert!(stripped.contains("# lokl:blog - START"));
        assert!(stripped.contains("blog.test"));
        assert!(!stripped.contains("shop.test"));
        assert_eq!(other.listed(&content), hosts(&["blog.test"]));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let file = HostsFile::at("/nonexistent/lokl/hosts", "shop");
        assert!(matches!(file.remove(), Err(HostsError::Read { .. })));
    }

    #[tokio::test]
    async fn test_localhost_resolves_to_loopback() {
        assert!(resolves_to_loopback("localhost").await);
        let missing = unresolved(&hosts(&["localhost", "no-such-host.invalid"])).await;
        assert_eq!(missing, hosts(&["no-such-host.invalid"]));
    }
}
