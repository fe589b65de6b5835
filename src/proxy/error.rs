//! Error types for shard and origin operations.
//!
//! This module defines structured error types for the serving path:
//! - Server errors (binding, accept, shutdown)
//! - TLS errors (material loading, handshake)
//! - Origin errors (connect, round-trip timeout)
//! - Framing errors (see [`FrameError`])

use crate::filter::FilterError;
use crate::protocol::FrameError;
use std::path::PathBuf;
use thiserror::Error;

/// Unified error type for proxy operations.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// I/O error (socket operations, file access).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing error on a client or origin channel.
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// TLS error during handshake or configuration.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Failed to load PEM material from disk.
    #[error("Failed to load TLS material from {path:?}: {message}")]
    TlsMaterial {
        /// File that failed to load.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// Blacklist or membership filter could not be built.
    #[error("Blacklist error: {0}")]
    Filter(#[from] FilterError),

    /// Failed to bind a listener.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// The address we tried to bind.
        addr: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to connect to the origin or a shard.
    #[error("Failed to connect to '{addr}': {message}")]
    Connect {
        /// The address we tried to connect to.
        addr: String,
        /// Error message.
        message: String,
    },

    /// Operation did not complete in time.
    #[error("Timed out: {0}")]
    Timeout(&'static str),

    /// Shard index outside the configured identity list.
    #[error("No shard at index {0}")]
    UnknownShard(usize),

    /// A shard task or child process stopped unexpectedly.
    #[error("Shard '{name}' failed: {message}")]
    ShardFailed {
        /// Shard name.
        name: String,
        /// Error message.
        message: String,
    },
}

impl From<rustls::Error> for ProxyError {
    fn from(err: rustls::Error) -> Self {
        ProxyError::Tls(err.to_string())
    }
}

impl ProxyError {
    /// True for errors that mean the peer went away mid-exchange.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ProxyError::Frame(FrameError::Disconnected) => true,
            ProxyError::Frame(FrameError::Io(e)) | ProxyError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}
