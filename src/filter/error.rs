//! Filter error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while building a shard's blacklist filter.
#[derive(Debug, Error)]
pub enum FilterError {
    /// The membership filter is too small for its fixed probe moduli.
    #[error("Membership filter needs more than {minimum} bits, got {requested}")]
    TooSmall {
        /// Bits requested by configuration.
        requested: usize,
        /// The largest fixed probe modulus; the filter must exceed it.
        minimum: usize,
    },

    /// The blacklist source could not be read.
    #[error("Failed to read blacklist {path}: {source}")]
    Read {
        /// Path of the blacklist source.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}
