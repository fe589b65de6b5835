//! Development PKI for mutually authenticated channels.
//!
//! Every hop in the cluster (client to shard, shard to origin) runs over
//! TLS with client certificates. [`DevCa`] produces the material needed to
//! run the cluster locally and in tests.

mod ca;
mod error;

pub use ca::{BundlePaths, DevCa, IssuedCert, NODE_NAMES, write_node_bundle};
pub use error::PkiError;
