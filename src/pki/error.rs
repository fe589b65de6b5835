//! Error types for development PKI operations.

use thiserror::Error;

/// Errors related to CA and leaf certificate generation.
#[derive(Debug, Error)]
pub enum PkiError {
    /// Failed to create the output directory.
    #[error("Failed to create directory: {0}")]
    CreateDir(#[source] std::io::Error),

    /// Failed to set file permissions.
    #[error("Failed to set permissions: {0}")]
    Permissions(#[source] std::io::Error),

    /// Failed to generate key pair.
    #[error("Failed to generate key pair: {0}")]
    KeyGeneration(String),

    /// Failed to generate certificate.
    #[error("Failed to generate certificate: {0}")]
    CertGeneration(String),

    /// Name cannot be used as a subject alternative name.
    #[error("Invalid subject name '{0}'")]
    InvalidName(String),

    /// No names specified for certificate generation.
    #[error("No names specified for certificate")]
    NoNames,

    /// Failed to sign certificate.
    #[error("Failed to sign certificate: {0}")]
    Signing(String),

    /// Failed to write certificate or key file.
    #[error("Failed to write file: {0}")]
    WriteFile(#[source] std::io::Error),
}
