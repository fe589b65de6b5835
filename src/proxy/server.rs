//! Shard server implementation.
//!
//! This module provides the listener that runs one shard:
//! - Binds `bind_host:port` for its identity
//! - Wraps each accepted socket in a mutually authenticated TLS session
//! - Dispatches the session to [`handle_connection`] in its own task
//!
//! # Architecture
//!
//! All connections on a shard share one [`ShardState`]: the blacklist gate
//! built from this shard's partition, the object cache, and the origin
//! source. The gate is read-only after startup and the cache guards its own
//! fills, so the state is shared behind a plain `Arc`.
//!
//! # Example
//!
//! ```ignore
//! let state = ShardState::load(&config, 0, origin, audit)?;
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let server = ShardServer::bind(&config.cluster.bind_host, state, &material, shutdown_rx).await?;
//! server.run().await?;
//! ```

use super::error::ProxyError;
use super::handler::{ConnectionSession, SessionOutcome, Timeouts, handle_connection};
use super::policy::AccessGate;
use super::tls::{TlsMaterial, create_tls_acceptor};
use crate::cache::{FillMode, ObjectCache};
use crate::config::Config;
use crate::filter::Blacklist;
use crate::origin::ObjectSource;
use crate::rendezvous::ShardIdentity;
use crate::telemetry::{AuditEvent, AuditLogger};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, trace, warn};

/// Everything one shard needs to answer requests.
pub struct ShardState {
    /// Position in the configured shard list.
    pub index: usize,
    /// This shard's identity.
    pub identity: ShardIdentity,
    /// Blacklist gate over this shard's partition.
    pub gate: AccessGate,
    /// Objects fetched so far.
    pub cache: ObjectCache,
    /// Where cache misses are filled from.
    pub origin: Arc<dyn ObjectSource>,
    /// Audit trail.
    pub audit: Arc<AuditLogger>,
    /// Per-request time limits.
    pub timeouts: Timeouts,
}

impl ShardState {
    /// Assemble shard state from parts.
    pub fn new(
        index: usize,
        identity: ShardIdentity,
        gate: AccessGate,
        fill: FillMode,
        origin: Arc<dyn ObjectSource>,
        audit: Arc<AuditLogger>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            index,
            identity,
            gate,
            cache: ObjectCache::new(fill),
            origin,
            audit,
            timeouts,
        }
    }

    /// Build the state for shard `index` of `config`.
    ///
    /// Loads the blacklist source, keeps the lines this shard owns and
    /// builds the gate over them.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::UnknownShard`] for an index outside the shard
    /// list, or [`ProxyError::Filter`] if the blacklist cannot be read or
    /// the filter cannot be built.
    pub fn load(
        config: &Config,
        index: usize,
        origin: Arc<dyn ObjectSource>,
        audit: Arc<AuditLogger>,
    ) -> Result<Self, ProxyError> {
        let shards = &config.cluster.shards;
        let identity = shards
            .get(index)
            .cloned()
            .ok_or(ProxyError::UnknownShard(index))?;

        let blacklist = Blacklist::load_partition(&config.blacklist.path, shards, index)?;
        let gate = AccessGate::new(
            blacklist,
            config.blacklist.filter_bits,
            config.blacklist.policy,
        )?;

        debug!(
            "Shard {} gate ready: {} entries, filter {:.4} full, policy {:?}",
            identity.name,
            gate.blacklist_len(),
            gate.filter().fill_ratio(),
            gate.policy()
        );

        Ok(Self::new(
            index,
            identity,
            gate,
            config.cache.fill,
            origin,
            audit,
            config.timeouts.to_timeouts(),
        ))
    }
}

/// A bound shard listener.
pub struct ShardServer {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    state: Arc<ShardState>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ShardServer {
    /// Bind the listener for `state.identity` on `host`.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Bind`] if the port is unavailable, or a TLS
    /// error if the material is unusable. Both are fatal to the shard.
    pub async fn bind(
        host: &str,
        state: ShardState,
        material: &TlsMaterial,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<Self, ProxyError> {
        let acceptor = create_tls_acceptor(material)?;
        let addr = format!("{}:{}", host, state.identity.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ProxyError::Bind { addr, source })?;

        info!(
            "Shard {} listening on {}",
            state.identity.name,
            listener.local_addr()?
        );

        Ok(Self {
            listener,
            acceptor,
            state: Arc::new(state),
            shutdown_rx,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ProxyError> {
        Ok(self.listener.local_addr()?)
    }

    /// Shared state, for inspection.
    pub fn state(&self) -> Arc<ShardState> {
        self.state.clone()
    }

    /// Run the accept loop until the shutdown signal is received.
    pub async fn run(self) -> Result<(), ProxyError> {
        let started = Instant::now();
        let name = self.state.identity.name.clone();

        self.state.audit.log(AuditEvent::ShardStart {
            shard: name.clone(),
            addr: self.local_addr()?.to_string(),
            blacklist_entries: self.state.gate.blacklist_len(),
            pid: std::process::id(),
        });

        let mut shutdown_rx = self.shutdown_rx.clone();
        if !*shutdown_rx.borrow() {
            loop {
                tokio::select! {
                    accept_result = self.listener.accept() => {
                        match accept_result {
                            Ok((stream, peer)) => {
                                trace!("Shard {} accepted connection from {}", name, peer);
                                self.spawn_connection_handler(stream, peer);
                            }
                            Err(e) => {
                                warn!("Failed to accept connection: {}", e);
                            }
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!("Shard {} shutting down", name);
                            break;
                        }
                    }
                }
            }
        }

        self.state.audit.log(AuditEvent::ShardStop {
            shard: name,
            uptime_sec: started.elapsed().as_secs(),
        });
        Ok(())
    }

    /// Spawn a task to handle a single connection.
    fn spawn_connection_handler(&self, stream: TcpStream, peer: SocketAddr) {
        let acceptor = self.acceptor.clone();
        let state = self.state.clone();

        tokio::spawn(async move {
            let mut session = ConnectionSession::new(Some(peer));
            let handshake = tokio::time::timeout(state.timeouts.client_read, acceptor.accept(stream));
            let mut tls = match handshake.await {
                Ok(Ok(tls)) => tls,
                Ok(Err(e)) => {
                    warn!("TLS handshake with {} failed: {}", peer, e);
                    return;
                }
                Err(_) => {
                    debug!("TLS handshake with {} timed out", peer);
                    return;
                }
            };

            match handle_connection(&mut tls, &state, &mut session).await {
                Ok(SessionOutcome::Disconnected) => {
                    trace!("Session {} ended without a request", session);
                }
                Ok(outcome) => {
                    debug!("Session {} finished: {:?}", session, outcome);
                }
                Err(e) if e.is_disconnect() => debug!("Connection ended: {}", e),
                Err(e) => warn!("Connection error: {}", e),
            }
        });
    }
}
