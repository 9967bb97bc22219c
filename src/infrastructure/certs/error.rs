use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while creating, loading or trusting certificates
#[derive(Error, Debug)]
pub enum CertificateError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Certificate generation failed: {0}")]
    Generation(#[from] rcgen::Error),

    #[error("Invalid certificate material in {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("TLS key rejected: {0}")]
    Tls(#[from] rustls::Error),

    #[error("Cannot determine installation directory; set LOKL_HOME")]
    NoInstallDir,

    #[error("Leaf {} was not issued by the current local CA", .0.display())]
    ForeignLeaf(PathBuf),

    #[error("Invalid hostname for certificate: {0}")]
    InvalidHostname(String),

    #[error("Failed to trust CA: {0}")]
    Trust(String),
}

impl CertificateError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CertificateError>;
