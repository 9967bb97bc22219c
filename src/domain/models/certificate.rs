use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// PEM-encoded certificate and key, with where they live on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateBundle {
    pub cert_pem: String,
    pub key_pem: String,
    /// End of the validity window
    pub not_after: DateTime<Utc>,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl CertificateBundle {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.not_after
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}
