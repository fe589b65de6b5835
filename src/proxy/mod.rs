//! The proxy shard.
//!
//! A shard owns one slice of the blacklist and one object cache, and answers
//! exactly one request per mutually authenticated TLS connection:
//! - Blacklist gate: membership filter in front of the exact key set
//! - Object cache with single-flight fills from the origin
//! - Per-connection state machine tying the two together
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────────────── shard ────────────────────────┐
//!  ┌────────┐ TLS │ ┌─────────┐   ┌──────────┐   ┌─────────────┐          │
//!  │ client │────▶│ │ handler │──▶│   gate   │──▶│ ObjectCache │──miss──┐ │
//!  └────────┘◀────│ └─────────┘   │ (filter, │   │ single-     │        │ │
//!        reply    │               │  exact)  │   │ flight fill │        │ │
//!                 │               └──────────┘   └─────────────┘        │ │
//!                 └─────────────────────────────────────────────────────┼─┘
//!                                                                 TLS   ▼
//!                                                               ┌────────┐
//!                                                               │ origin │
//!                                                               └────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use shardproxy::proxy::{ShardServer, ShardState};
//!
//! let state = ShardState::load(&config, index, origin, audit)?;
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let server = ShardServer::bind(&config.cluster.bind_host, state, &material, shutdown_rx).await?;
//! server.run().await?;
//! ```

pub mod error;
pub mod handler;
pub mod policy;
pub mod server;
pub mod tls;

// Re-export main types for convenient access
pub use error::ProxyError;
pub use handler::{ConnectionSession, SessionOutcome, Timeouts, handle_connection};
pub use policy::{AccessGate, DenyReason, FilterPolicy, GateDecision};
pub use server::{ShardServer, ShardState};
pub use tls::{TlsMaterial, create_tls_acceptor, create_tls_connector};
