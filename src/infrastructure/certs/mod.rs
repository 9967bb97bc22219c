//! Local certificate authority
//!
//! A CA generated once per installation directory signs per-host leaf
//! certificates for the TLS listener.

pub mod error;
pub mod manager;
pub mod trust;

pub use error::CertificateError;
pub use manager::CertificateManager;
pub use trust::{trust_ca, TrustOutcome};
