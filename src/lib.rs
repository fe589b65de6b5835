//! shardproxy: sharded caching proxy with a blacklist gate
//!
//! This crate provides a fixed set of proxy shards in front of a single
//! origin server. Every hop is mutually authenticated TLS.
//!
//! # Security Model
//!
//! The gate is **fail-closed** by default: a key that hits the membership
//! filter is denied without consulting the exact blacklist. Opting into the
//! `confirm` policy trades that for an exact check on every filter hit.
//!
//! # Architecture
//!
//! - **Rendezvous**: deterministic key to shard routing shared by clients
//!   and the supervisor
//! - **Filter**: per-shard membership filter and exact blacklist partition
//! - **Cache**: per-shard object cache with single-flight fills
//! - **Proxy**: the shard server and its per-connection state machine
//! - **Origin**: the object store, its TLS server and client
//! - **Supervisor**: brings up every shard as a task or a child process
//! - **Config**: Hierarchical TOML configuration
//! - **Telemetry**: Structured syslog logging for audit trails

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod cache;
pub mod cli;
pub mod cli_handler;
pub mod client;
pub mod config;
pub mod filter;
pub mod origin;
pub mod pki;
pub mod protocol;
pub mod proxy;
pub mod rendezvous;
pub mod supervisor;
pub mod telemetry;
