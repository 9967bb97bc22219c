use chrono::{DateTime, Utc};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
};
use rustls::pki_types::CertificateDer;
use rustls::sign::CertifiedKey;
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::{FromDer, X509Certificate};

use super::error::{CertificateError, Result};
use crate::domain::models::{normalize_host, CertificateBundle};

const CA_COMMON_NAME: &str = "lokl local development CA";
const CA_ORGANIZATION: &str = "lokl";
const CA_CERT_FILE: &str = "ca.pem";
const CA_KEY_FILE: &str = "ca-key.pem";
const LEAF_DIR: &str = "certs";
const DEFAULT_CA_VALIDITY_DAYS: u32 = 3650;
const DEFAULT_LEAF_VALIDITY_DAYS: u32 = 90;

/// CA bundle plus the rcgen handles needed to sign leaves.
struct CaMaterial {
    bundle: CertificateBundle,
    cert: Certificate,
    key: KeyPair,
}

#[derive(Clone)]
struct LeafEntry {
    bundle: CertificateBundle,
    certified: Arc<CertifiedKey>,
}

/// Issues and persists the local CA and per-host leaf certificates.
///
/// Layout under the installation directory:
/// `ca.pem`, `ca-key.pem` and `certs/<host>.pem`, `certs/<host>-key.pem`.
pub struct CertificateManager {
    dir: PathBuf,
    ca_validity_days: u32,
    leaf_validity_days: u32,
    ca: Mutex<Option<Arc<CaMaterial>>>,
    leaves: Mutex<HashMap<String, LeafEntry>>,
    fallback: Mutex<Option<Arc<CertifiedKey>>>,
}

impl fmt::Debug for CertificateManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateManager")
            .field("dir", &self.dir)
            .field("leaf_validity_days", &self.leaf_validity_days)
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CertificateManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ca_validity_days: DEFAULT_CA_VALIDITY_DAYS,
            leaf_validity_days: DEFAULT_LEAF_VALIDITY_DAYS,
            ca: Mutex::new(None),
            leaves: Mutex::new(HashMap::new()),
            fallback: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_leaf_validity_days(mut self, days: u32) -> Self {
        self.leaf_validity_days = days;
        self
    }

    /// `<data_dir>/lokl`, used when `LOKL_HOME` is not set.
    pub fn default_dir() -> Result<PathBuf> {
        dirs::data_dir()
            .map(|dir| dir.join("lokl"))
            .ok_or(CertificateError::NoInstallDir)
    }

    pub fn ca_cert_path(&self) -> PathBuf {
        self.dir.join(CA_CERT_FILE)
    }

    pub fn ca_key_path(&self) -> PathBuf {
        self.dir.join(CA_KEY_FILE)
    }

    fn leaf_paths(&self, hostname: &str) -> (PathBuf, PathBuf) {
        let dir = self.dir.join(LEAF_DIR);
        (
            dir.join(format!("{hostname}.pem")),
            dir.join(format!("{hostname}-key.pem")),
        )
    }

    /// Create the CA on first use; later calls return the persisted bytes.
    pub fn ensure_ca(&self) -> Result<CertificateBundle> {
        Ok(self.ca_material()?.bundle.clone())
    }

    fn ca_material(&self) -> Result<Arc<CaMaterial>> {
        let mut slot = lock(&self.ca);
        if let Some(ca) = slot.as_ref() {
            return Ok(Arc::clone(ca));
        }

        let cert_path = self.ca_cert_path();
        let key_path = self.ca_key_path();
        let material = if cert_path.is_file() && key_path.is_file() {
            Self::load_ca(&cert_path, &key_path)?
        } else {
            self.generate_ca(&cert_path, &key_path)?
        };

        let material = Arc::new(material);
        *slot = Some(Arc::clone(&material));
        Ok(material)
    }

    fn load_ca(cert_path: &Path, key_path: &Path) -> Result<CaMaterial> {
        let cert_pem = read_to_string(cert_path)?;
        let key_pem = read_to_string(key_path)?;

        let key = KeyPair::from_pem(&key_pem).map_err(|e| CertificateError::parse(key_path, e))?;
        let params = CertificateParams::from_ca_cert_pem(&cert_pem)
            .map_err(|e| CertificateError::parse(cert_path, e))?;
        // Re-signing yields a handle with the persisted subject and key; the
        // persisted PEM stays the one handed out.
        let cert = params.self_signed(&key)?;
        let not_after = read_not_after(&cert_pem).map_err(|e| CertificateError::parse(cert_path, e))?;

        tracing::debug!(path = %cert_path.display(), "loaded local CA");

        Ok(CaMaterial {
            bundle: CertificateBundle {
                cert_pem,
                key_pem,
                not_after,
                cert_path: cert_path.to_path_buf(),
                key_path: key_path.to_path_buf(),
            },
            cert,
            key,
        })
    }

    fn generate_ca(&self, cert_path: &Path, key_path: &Path) -> Result<CaMaterial> {
        let mut params = CertificateParams::new(Vec::<String>::new())?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, CA_COMMON_NAME);
        dn.push(DnType::OrganizationName, CA_ORGANIZATION);
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages.push(KeyUsagePurpose::KeyCertSign);
        params.key_usages.push(KeyUsagePurpose::CrlSign);
        params.key_usages.push(KeyUsagePurpose::DigitalSignature);
        let not_after = validity(&mut params, self.ca_validity_days);

        let key = KeyPair::generate()?;
        let cert = params.self_signed(&key)?;
        let cert_pem = cert.pem();
        let key_pem = key.serialize_pem();

        fs::create_dir_all(&self.dir).map_err(|e| CertificateError::io(&self.dir, e))?;
        write_private(key_path, &key_pem)?;
        fs::write(cert_path, &cert_pem).map_err(|e| CertificateError::io(cert_path, e))?;

        tracing::info!(path = %cert_path.display(), "generated local CA");

        Ok(CaMaterial {
            bundle: CertificateBundle {
                cert_pem,
                key_pem,
                not_after,
                cert_path: cert_path.to_path_buf(),
                key_path: key_path.to_path_buf(),
            },
            cert,
            key,
        })
    }

    /// Return an unexpired leaf for `hostname`, generating one if needed.
    ///
    /// Looks in memory, then on disk, then signs a fresh leaf with the CA.
    pub fn ensure_leaf(&self, hostname: &str) -> Result<CertificateBundle> {
        let hostname = normalize_host(hostname);
        check_hostname(&hostname)?;

        let mut leaves = lock(&self.leaves);
        self.leaf_entry(&mut leaves, &hostname, true)?
            .map(|entry| entry.bundle)
            .ok_or(CertificateError::InvalidHostname(hostname))
    }

    /// Signing material for an already issued leaf, regenerating it if expired.
    ///
    /// Returns `None` for hosts that never had a leaf.
    pub fn lookup(&self, hostname: &str) -> Result<Option<Arc<CertifiedKey>>> {
        let hostname = normalize_host(hostname);
        if check_hostname(&hostname).is_err() {
            return Ok(None);
        }

        let mut leaves = lock(&self.leaves);
        Ok(self
            .leaf_entry(&mut leaves, &hostname, false)?
            .map(|entry| entry.certified))
    }

    fn leaf_entry(
        &self,
        leaves: &mut HashMap<String, LeafEntry>,
        hostname: &str,
        create: bool,
    ) -> Result<Option<LeafEntry>> {
        let now = Utc::now();
        let (cert_path, key_path) = self.leaf_paths(hostname);

        if let Some(entry) = leaves.get(hostname) {
            if !entry.bundle.is_expired_at(now) {
                return Ok(Some(entry.clone()));
            }
            tracing::info!(host = %hostname, "leaf certificate expired, regenerating");
        } else {
            let on_disk = cert_path.is_file() && key_path.is_file();
            if !on_disk && !create {
                return Ok(None);
            }
            if on_disk {
                match self.load_leaf(&cert_path, &key_path) {
                    Ok(entry) if !entry.bundle.is_expired_at(now) => {
                        leaves.insert(hostname.to_string(), entry.clone());
                        return Ok(Some(entry));
                    }
                    Ok(_) => {
                        tracing::info!(host = %hostname, "leaf certificate expired, regenerating");
                    }
                    Err(CertificateError::ForeignLeaf(_)) => {
                        tracing::info!(host = %hostname, "leaf certificate issued by a previous CA, regenerating");
                    }
                    Err(e) => {
                        tracing::warn!(host = %hostname, error = %e, "unreadable leaf certificate, regenerating");
                    }
                }
            }
        }

        let entry = self.generate_leaf(hostname, &cert_path, &key_path)?;
        leaves.insert(hostname.to_string(), entry.clone());
        Ok(Some(entry))
    }

    fn load_leaf(&self, cert_path: &Path, key_path: &Path) -> Result<LeafEntry> {
        let cert_pem = read_to_string(cert_path)?;
        let key_pem = read_to_string(key_path)?;
        let not_after = read_not_after(&cert_pem).map_err(|e| CertificateError::parse(cert_path, e))?;
        let ca = self.ca_material()?;
        if !signed_by(&cert_pem, &ca.bundle.cert_pem).map_err(|e| CertificateError::parse(cert_path, e))? {
            return Err(CertificateError::ForeignLeaf(cert_path.to_path_buf()));
        }
        let certified = certified_key(&cert_pem, &key_pem, Some(&ca.bundle.cert_pem))
            .map_err(|e| CertificateError::parse(cert_path, e))?;

        Ok(LeafEntry {
            bundle: CertificateBundle {
                cert_pem,
                key_pem,
                not_after,
                cert_path: cert_path.to_path_buf(),
                key_path: key_path.to_path_buf(),
            },
            certified,
        })
    }

    fn generate_leaf(&self, hostname: &str, cert_path: &Path, key_path: &Path) -> Result<LeafEntry> {
        let ca = self.ca_material()?;

        let mut params = CertificateParams::new(vec![hostname.to_string()])?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, hostname);
        dn.push(DnType::OrganizationName, CA_ORGANIZATION);
        params.distinguished_name = dn;
        params.is_ca = IsCa::NoCa;
        params.key_usages.push(KeyUsagePurpose::DigitalSignature);
        params.key_usages.push(KeyUsagePurpose::KeyEncipherment);
        params
            .extended_key_usages
            .push(ExtendedKeyUsagePurpose::ServerAuth);
        let not_after = validity(&mut params, self.leaf_validity_days);

        let key = KeyPair::generate()?;
        let cert = params.signed_by(&key, &ca.cert, &ca.key)?;
        let cert_pem = cert.pem();
        let key_pem = key.serialize_pem();

        let dir = self.dir.join(LEAF_DIR);
        fs::create_dir_all(&dir).map_err(|e| CertificateError::io(&dir, e))?;
        write_private(key_path, &key_pem)?;
        fs::write(cert_path, &cert_pem).map_err(|e| CertificateError::io(cert_path, e))?;

        let certified = certified_key(&cert_pem, &key_pem, Some(&ca.bundle.cert_pem))
            .map_err(|e| CertificateError::parse(cert_path, e))?;

        tracing::info!(host = %hostname, expires = %not_after, "issued leaf certificate");

        Ok(LeafEntry {
            bundle: CertificateBundle {
                cert_pem,
                key_pem,
                not_after,
                cert_path: cert_path.to_path_buf(),
                key_path: key_path.to_path_buf(),
            },
            certified,
        })
    }

    /// In-memory self-signed `localhost` certificate served when no leaf matches.
    pub fn default_certificate(&self) -> Result<Arc<CertifiedKey>> {
        let mut slot = lock(&self.fallback);
        if let Some(key) = slot.as_ref() {
            return Ok(Arc::clone(key));
        }

        let mut params = CertificateParams::new(vec![
            "localhost".to_string(),
            "127.0.0.1".to_string(),
        ])?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "localhost");
        params.distinguished_name = dn;
        validity(&mut params, DEFAULT_LEAF_VALIDITY_DAYS);

        let key = KeyPair::generate()?;
        let cert = params.self_signed(&key)?;
        let certified = certified_key(&cert.pem(), &key.serialize_pem(), None)
            .map_err(|e| CertificateError::parse("<default>", e))?;

        *slot = Some(Arc::clone(&certified));
        Ok(certified)
    }
}

/// Set a validity window starting an hour ago; returns the expiry.
fn validity(params: &mut CertificateParams, days: u32) -> DateTime<Utc> {
    let now = time::OffsetDateTime::now_utc();
    let not_after = now + time::Duration::days(i64::from(days));
    params.not_before = now - time::Duration::hours(1);
    params.not_after = not_after;
    DateTime::from_timestamp(not_after.unix_timestamp(), 0).unwrap_or_default()
}

fn check_hostname(hostname: &str) -> Result<()> {
    let valid = !hostname.is_empty()
        && hostname.len() <= 253
        && hostname
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
        && !hostname.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(CertificateError::InvalidHostname(hostname.to_string()))
    }
}

fn read_to_string(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| CertificateError::io(path, e))
}

/// Write a private key readable only by the owner.
fn write_private(path: &Path, contents: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .map_err(|e| CertificateError::io(path, e))?;
    file.write_all(contents.as_bytes())
        .map_err(|e| CertificateError::io(path, e))
}

/// Expiry of the first certificate in a PEM document.
pub(crate) fn read_not_after(pem: &str) -> std::result::Result<DateTime<Utc>, String> {
    let (_, pem) = parse_x509_pem(pem.as_bytes()).map_err(|e| e.to_string())?;
    let (_, cert) = X509Certificate::from_der(pem.contents.as_slice()).map_err(|e| e.to_string())?;
    let timestamp = cert.validity().not_after.timestamp();
    DateTime::from_timestamp(timestamp, 0).ok_or_else(|| format!("invalid expiry {timestamp}"))
}

/// Whether the first certificate in `cert_pem` carries a valid signature by `issuer_pem`.
pub(crate) fn signed_by(cert_pem: &str, issuer_pem: &str) -> std::result::Result<bool, String> {
    let (_, cert) = parse_x509_pem(cert_pem.as_bytes()).map_err(|e| e.to_string())?;
    let (_, issuer) = parse_x509_pem(issuer_pem.as_bytes()).map_err(|e| e.to_string())?;
    let (_, cert) = X509Certificate::from_der(cert.contents.as_slice()).map_err(|e| e.to_string())?;
    let (_, issuer) = X509Certificate::from_der(issuer.contents.as_slice()).map_err(|e| e.to_string())?;
    Ok(cert.verify_signature(Some(issuer.public_key())).is_ok())
}

/// Build rustls signing material from PEM, appending the issuer to the chain.
fn certified_key(
    cert_pem: &str,
    key_pem: &str,
    issuer_pem: Option<&str>,
) -> std::result::Result<Arc<CertifiedKey>, String> {
    let mut chain: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_pem.as_bytes())
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| e.to_string())?;
    if let Some(issuer) = issuer_pem {
        for cert in rustls_pemfile::certs(&mut issuer.as_bytes()) {
            chain.push(cert.map_err(|e| e.to_string())?);
        }
    }
    let key = rustls_pemfile::private_key(&mut key_pem.as_bytes())
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "no private key found".to_string())?;
    let signing_key =
        rustls::crypto::ring::sign::any_supported_type(&key).map_err(|e| e.to_string())?;

    Ok(Arc::new(CertifiedKey::new(chain, signing_key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn test_ca_created_with_private_key_mode() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CertificateManager::new(dir.path());

        let ca = manager.ensure_ca().unwrap();
        assert!(ca.cert_pem.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(!ca.is_expired());

        let mode = fs::metadata(manager.ca_key_path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_leaf_cached_and_signed_by_ca() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CertificateManager::new(dir.path());

        let first = manager.ensure_leaf("API.shop.test").unwrap();
        let second = manager.ensure_leaf("api.shop.test").unwrap();
        assert_eq!(first, second);
        assert!(first.cert_path.ends_with("certs/api.shop.test.pem"));

        let (_, pem) = parse_x509_pem(first.cert_pem.as_bytes()).unwrap();
        let (_, cert) = X509Certificate::from_der(pem.contents.as_slice()).unwrap();
        let issuer = cert.issuer().to_string();
        assert!(issuer.contains(CA_COMMON_NAME), "issuer was {issuer}");
    }

    #[test]
    fn test_signed_by_rejects_other_issuer() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CertificateManager::new(dir.path());
        let other = tempfile::tempdir().unwrap();
        let other_ca = CertificateManager::new(other.path()).ensure_ca().unwrap();

        let ca = manager.ensure_ca().unwrap();
        let leaf = manager.ensure_leaf("api.test").unwrap();
        assert!(signed_by(&leaf.cert_pem, &ca.cert_pem).unwrap());
        assert!(!signed_by(&leaf.cert_pem, &other_ca.cert_pem).unwrap());
    }

    #[test]
    fn test_expired_leaf_regenerated_on_access() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CertificateManager::new(dir.path()).with_leaf_validity_days(0);

        let first = manager.ensure_leaf("web.test").unwrap();
        assert!(first.is_expired());
        let second = manager.ensure_leaf("web.test").unwrap();
        assert_ne!(first.cert_pem, second.cert_pem);
    }

    #[test]
    fn test_lookup_unknown_host() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CertificateManager::new(dir.path());

        assert!(manager.lookup("nobody.test").unwrap().is_none());
        manager.ensure_leaf("api.test").unwrap();
        assert!(manager.lookup("api.test").unwrap().is_some());
    }

    #[test]
    fn test_lookup_after_provisioning_skips_disk() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CertificateManager::new(dir.path());
        let leaf = manager.ensure_leaf("api.test").unwrap();

        fs::remove_file(&leaf.cert_path).unwrap();
        fs::remove_file(&leaf.key_path).unwrap();
        assert!(manager.lookup("api.test").unwrap().is_some());
        assert!(!leaf.cert_path.exists());
    }

    #[test]
    fn test_invalid_hostname_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CertificateManager::new(dir.path());
        assert!(matches!(
            manager.ensure_leaf("../etc/passwd"),
            Err(CertificateError::InvalidHostname(_))
        ));
    }

    #[test]
    fn test_default_certificate_reused() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CertificateManager::new(dir.path());

        let first = manager.default_certificate().unwrap();
        let second = manager.default_certificate().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!dir.path().join(CA_CERT_FILE).exists());
    }
}
