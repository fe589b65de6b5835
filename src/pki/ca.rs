//! Development certificate authority.
//!
//! Shards, the origin and clients all authenticate each other with leaf
//! certificates chained to one CA. This module generates that CA and issues
//! leaves carrying both the server and client authentication purposes, so a
//! single node certificate can accept and initiate connections.
//!
//! # Security Model
//!
//! - Leaf private keys are written with 0600 permissions
//! - The output directory has 0700 permissions
//! - The CA key is never written; regenerate to rotate
//!
//! # Example
//!
//! ```ignore
//! use shardproxy::pki::DevCa;
//!
//! let ca = DevCa::generate()?;
//! let node = ca.issue(&["localhost", "127.0.0.1"])?;
//! ```

use super::error::PkiError;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
    string::Ia5String,
};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::net::IpAddr;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use time::{Duration, OffsetDateTime};
use tracing::{debug, info};

/// Validity period for development certificates.
const CERT_VALIDITY_DAYS: i64 = 365;

/// Backdate `not_before` to tolerate small clock differences between nodes.
const CLOCK_SKEW_MINUTES: i64 = 5;

/// Names placed on the default node certificate.
pub const NODE_NAMES: &[&str] = &["localhost", "127.0.0.1"];

/// A CA that lives only in memory.
pub struct DevCa {
    key_pair: KeyPair,
    params: CertificateParams,
    cert_pem: String,
}

/// A leaf certificate and its private key, both PEM encoded.
#[derive(Clone)]
pub struct IssuedCert {
    /// PEM-encoded certificate.
    pub cert_pem: String,
    /// PEM-encoded private key.
    pub key_pem: String,
}

impl std::fmt::Debug for IssuedCert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCert")
            .field("cert_pem", &self.cert_pem.len())
            .field("key_pem", &"<redacted>")
            .finish()
    }
}

/// Paths written by [`write_node_bundle`].
#[derive(Debug, Clone)]
pub struct BundlePaths {
    /// CA certificate.
    pub ca: PathBuf,
    /// Node certificate.
    pub cert: PathBuf,
    /// Node private key.
    pub key: PathBuf,
}

impl DevCa {
    /// Generate a new self-signed CA.
    ///
    /// # Errors
    ///
    /// Returns error if key generation or self-signing fails.
    pub fn generate() -> Result<Self, PkiError> {
        info!("Generating development CA certificate");

        let key_pair = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P384_SHA384)
            .map_err(|e| PkiError::KeyGeneration(e.to_string()))?;

        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String("shardproxy Development CA".to_string()),
        );
        dn.push(
            DnType::OrganizationName,
            DnValue::Utf8String("shardproxy".to_string()),
        );
        params.distinguished_name = dn;

        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        set_validity(&mut params);

        let cert = params
            .clone()
            .self_signed(&key_pair)
            .map_err(|e| PkiError::CertGeneration(e.to_string()))?;

        Ok(Self {
            key_pair,
            params,
            cert_pem: cert.pem(),
        })
    }

    /// CA certificate as PEM.
    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    /// Issue a leaf certificate for the given DNS names or IP addresses.
    ///
    /// The first name becomes the common name. Names that parse as IP
    /// addresses become IP SANs; everything else is a DNS SAN.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - No names specified
    /// - A name is not a valid DNS name
    /// - Key generation or signing fails
    pub fn issue(&self, names: &[&str]) -> Result<IssuedCert, PkiError> {
        let first = names.first().ok_or(PkiError::NoNames)?;
        debug!("Issuing certificate for {:?}", names);

        let key_pair = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P384_SHA384)
            .map_err(|e| PkiError::KeyGeneration(e.to_string()))?;

        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, DnValue::Utf8String((*first).to_string()));
        params.distinguished_name = dn;

        params.subject_alt_names = names
            .iter()
            .map(|name| subject_alt_name(name))
            .collect::<Result<Vec<_>, _>>()?;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        set_validity(&mut params);

        let issuer = Issuer::from_params(&self.params, &self.key_pair);
        let cert = params
            .signed_by(&key_pair, &issuer)
            .map_err(|e| PkiError::Signing(e.to_string()))?;

        Ok(IssuedCert {
            cert_pem: cert.pem(),
            key_pem: key_pair.serialize_pem(),
        })
    }

    /// Issue the default node certificate (`localhost`, `127.0.0.1`).
    pub fn issue_node(&self) -> Result<IssuedCert, PkiError> {
        self.issue(NODE_NAMES)
    }
}

fn set_validity(params: &mut CertificateParams) {
    let now = OffsetDateTime::now_utc();
    params.not_before = now - Duration::minutes(CLOCK_SKEW_MINUTES);
    params.not_after = now + Duration::days(CERT_VALIDITY_DAYS);
}

fn subject_alt_name(name: &str) -> Result<SanType, PkiError> {
    if let Ok(ip) = name.parse::<IpAddr>() {
        return Ok(SanType::IpAddress(ip));
    }
    Ia5String::try_from(name)
        .map(SanType::DnsName)
        .map_err(|_| PkiError::InvalidName(name.to_string()))
}

/// Generate a CA and one node certificate into `dir`.
///
/// Writes `ca.pem`, `node.pem` and `node.key`. The directory is created with
/// 0700 permissions and the key with 0600.
///
/// # Errors
///
/// Returns error if generation fails or any file cannot be written.
pub fn write_node_bundle(dir: &Path) -> Result<BundlePaths, PkiError> {
    fs::create_dir_all(dir).map_err(PkiError::CreateDir)?;
    fs::set_permissions(dir, fs::Permissions::from_mode(0o700)).map_err(PkiError::Permissions)?;

    let ca = DevCa::generate()?;
    let node = ca.issue_node()?;

    let paths = BundlePaths {
        ca: dir.join("ca.pem"),
        cert: dir.join("node.pem"),
        key: dir.join("node.key"),
    };

    fs::write(&paths.ca, ca.cert_pem()).map_err(PkiError::WriteFile)?;
    fs::write(&paths.cert, &node.cert_pem).map_err(PkiError::WriteFile)?;
    write_restricted_file(&paths.key, &node.key_pem)?;

    info!("Wrote development certificates to {:?}", dir);
    Ok(paths)
}

/// Write a file with restricted permissions (0600).
fn write_restricted_file(path: &Path, content: &str) -> Result<(), PkiError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .map_err(PkiError::WriteFile)?;

    file.write_all(content.as_bytes())
        .map_err(PkiError::WriteFile)?;

    Ok(())
}
