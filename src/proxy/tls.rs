//! Mutually authenticated TLS for every hop.
//!
//! This module provides:
//! - [`TlsMaterial`]: CA, node certificate and key, loaded from PEM
//! - TLS acceptor for shards and the origin (requires a client certificate)
//! - TLS connector for clients and shards (presents the node certificate)
//!
//! Both sides trust only the configured CA. A peer without a certificate
//! chained to it fails the handshake.
//!
//! # Example
//!
//! ```ignore
//! use shardproxy::proxy::tls::{TlsMaterial, create_tls_acceptor, create_tls_connector};
//!
//! let material = TlsMaterial::from_files(&ca, &cert, &key)?;
//! let acceptor = create_tls_acceptor(&material)?;
//! let connector = create_tls_connector(&material)?;
//! ```

use super::error::ProxyError;
use crate::pki::{DevCa, IssuedCert};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::debug;

/// PEM-encoded trust anchor and node identity.
#[derive(Clone)]
pub struct TlsMaterial {
    ca_pem: String,
    cert_pem: String,
    key_pem: String,
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("ca_pem", &self.ca_pem.len())
            .field("cert_pem", &self.cert_pem.len())
            .field("key_pem", &"<redacted>")
            .finish()
    }
}

impl TlsMaterial {
    /// Build material from PEM strings.
    pub fn from_pem(
        ca_pem: impl Into<String>,
        cert_pem: impl Into<String>,
        key_pem: impl Into<String>,
    ) -> Self {
        Self {
            ca_pem: ca_pem.into(),
            cert_pem: cert_pem.into(),
            key_pem: key_pem.into(),
        }
    }

    /// Build material from a CA and a certificate it issued.
    pub fn from_issued(ca: &DevCa, issued: &IssuedCert) -> Self {
        Self::from_pem(ca.cert_pem(), issued.cert_pem.clone(), issued.key_pem.clone())
    }

    /// Load material from PEM files.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::TlsMaterial`] naming the first unreadable file.
    pub fn from_files(ca: &Path, cert: &Path, key: &Path) -> Result<Self, ProxyError> {
        let read = |path: &Path| {
            fs::read_to_string(path).map_err(|e| ProxyError::TlsMaterial {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
        };
        Ok(Self::from_pem(read(ca)?, read(cert)?, read(key)?))
    }

    fn roots(&self) -> Result<RootCertStore, ProxyError> {
        let mut roots = RootCertStore::empty();
        for cert in parse_certs(&self.ca_pem)? {
            roots.add(cert)?;
        }
        debug!("Loaded {} trust anchors", roots.len());
        Ok(roots)
    }

    fn chain(&self) -> Result<Vec<CertificateDer<'static>>, ProxyError> {
        parse_certs(&self.cert_pem)
    }

    fn private_key(&self) -> Result<PrivateKeyDer<'static>, ProxyError> {
        rustls_pemfile::private_key(&mut self.key_pem.as_bytes())
            .map_err(|e| ProxyError::Tls(format!("Failed to parse private key PEM: {}", e)))?
            .ok_or_else(|| ProxyError::Tls("No private key found in PEM".into()))
    }
}

fn parse_certs(pem: &str) -> Result<Vec<CertificateDer<'static>>, ProxyError> {
    let certs = rustls_pemfile::certs(&mut pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ProxyError::Tls(format!("Failed to parse certificate PEM: {}", e)))?;

    if certs.is_empty() {
        return Err(ProxyError::Tls("No certificates found in PEM".into()));
    }
    Ok(certs)
}

/// Create a TLS acceptor that requires client certificates.
///
/// Used by shards (accepting clients) and the origin (accepting shards).
pub fn create_tls_acceptor(material: &TlsMaterial) -> Result<TlsAcceptor, ProxyError> {
    let verifier = WebPkiClientVerifier::builder(Arc::new(material.roots()?))
        .build()
        .map_err(|e| ProxyError::Tls(format!("Failed to build client verifier: {}", e)))?;

    let config = ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(material.chain()?, material.private_key()?)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Create a TLS connector that presents the node certificate.
///
/// Used by clients (connecting to shards) and shards (connecting to the
/// origin). Servers are verified against the configured CA only.
pub fn create_tls_connector(material: &TlsMaterial) -> Result<TlsConnector, ProxyError> {
    let config = ClientConfig::builder()
        .with_root_certificates(material.roots()?)
        .with_client_auth_cert(material.chain()?, material.private_key()?)?;

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Convert a host name or IP string to a ServerName for TLS connection.
pub fn to_server_name(name: &str) -> Result<ServerName<'static>, ProxyError> {
    ServerName::try_from(name.to_string())
        .map_err(|_| ProxyError::Tls(format!("Invalid server name: {}", name)))
}
