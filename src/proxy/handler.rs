//! Per-connection request handling.
//!
//! Each accepted connection carries exactly one request:
//!
//! ```text
//! read key ──▶ gate ──deny──▶ "Access Denied."
//!               │
//!             allow
//!               ▼
//!        cache get_or_fill ──hit/filled──▶ "<key>: <content>"
//!               │
//!               ├──not found──▶ "Access Denied. File does not exist."
//!               └──origin err─▶ "Access Denied. Origin unavailable."
//! ```
//!
//! The handler is generic over the stream so the state machine can be
//! driven over in-memory pipes as well as TLS sockets.

use super::error::ProxyError;
use super::policy::{DenyReason, GateDecision};
use super::server::ShardState;
use crate::cache::Fill;
use crate::protocol::{FrameError, Reply, read_key, write_reply};
use crate::telemetry::AuditEvent;
use bytes::Bytes;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Time limits applied by the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Bound on reading the request frame.
    pub client_read: Duration,
    /// Bound on one origin round trip.
    pub origin: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            client_read: Duration::from_secs(5),
            origin: Duration::from_secs(5),
        }
    }
}

/// One accepted client connection.
#[derive(Debug, Clone)]
pub struct ConnectionSession {
    /// Unique ID used to correlate log lines and audit events.
    pub id: Uuid,
    /// Remote address, when the transport has one.
    pub peer: Option<SocketAddr>,
    /// Requested key, once read.
    pub key: Option<String>,
}

impl ConnectionSession {
    /// Start a session for a new connection.
    pub fn new(peer: Option<SocketAddr>) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            key: None,
        }
    }
}

impl fmt::Display for ConnectionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.peer {
            Some(peer) => write!(f, "{} ({})", self.id, peer),
            None => write!(f, "{}", self.id),
        }
    }
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The client went away or sent nothing usable. No reply was written.
    Disconnected,
    /// The gate denied the key.
    Denied(DenyReason),
    /// The origin does not hold the key.
    NotFound,
    /// The origin could not be reached.
    Unavailable,
    /// The object was returned.
    Served {
        /// True when no origin fetch was made for this request.
        from_cache: bool,
    },
}

/// Run one request to completion on `stream`.
///
/// Read failures end the session as [`SessionOutcome::Disconnected`]
/// without a reply. Once a key has been read, every path writes exactly one
/// reply frame before returning.
///
/// # Errors
///
/// Returns an error only if writing the reply fails.
pub async fn handle_connection<S>(
    stream: &mut S,
    state: &ShardState,
    session: &mut ConnectionSession,
) -> Result<SessionOutcome, ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let key = match tokio::time::timeout(state.timeouts.client_read, read_key(stream)).await {
        Ok(Ok(key)) => key,
        Ok(Err(FrameError::Disconnected)) => {
            trace!("Session {} closed before sending a key", session);
            return Ok(SessionOutcome::Disconnected);
        }
        Ok(Err(e)) => {
            debug!("Session {} sent an unusable request: {}", session, e);
            return Ok(SessionOutcome::Disconnected);
        }
        Err(_) => {
            debug!("Session {} timed out waiting for a key", session);
            return Ok(SessionOutcome::Disconnected);
        }
    };
    session.key = Some(key.clone());
    debug!("Session {} requested '{}'", session, key);

    let (reply, outcome) = match state.gate.check(&key) {
        GateDecision::Deny(reason) => {
            info!("Denied '{}' on {}: {}", key, state.identity.name, reason);
            state.audit.log(AuditEvent::RequestDenied {
                shard: state.identity.name.clone(),
                session: session.id,
                key: key.clone(),
                reason,
            });
            (Reply::Denied, SessionOutcome::Denied(reason))
        }
        GateDecision::Allow => serve(state, session, &key).await,
    };

    write_reply(stream, &reply).await?;
    if let Err(e) = stream.shutdown().await {
        trace!("Session {} shutdown: {}", session, e);
    }

    Ok(outcome)
}

/// Resolve an allowed key through the cache and origin.
async fn serve(
    state: &ShardState,
    session: &ConnectionSession,
    key: &str,
) -> (Reply, SessionOutcome) {
    let origin_timeout = state.timeouts.origin;
    let fill = state
        .cache
        .get_or_fill(key, || async {
            let reply = tokio::time::timeout(origin_timeout, state.origin.fetch(key))
                .await
                .map_err(|_| ProxyError::Timeout("origin round trip"))??;
            Ok::<_, ProxyError>(reply.into_content())
        })
        .await;

    match fill {
        Ok(Fill::NotFound) => {
            debug!("Origin has no '{}'", key);
            state.audit.log(AuditEvent::ObjectMissing {
                shard: state.identity.name.clone(),
                session: session.id,
                key: key.to_string(),
            });
            (Reply::NotFound, SessionOutcome::NotFound)
        }
        Ok(Fill::Cached(content)) => served(state, session, key, content, true),
        Ok(Fill::Fetched(content)) => served(state, session, key, content, false),
        Err(e) => {
            warn!("Origin fetch for '{}' failed: {}", key, e);
            state.audit.log(AuditEvent::OriginFailure {
                shard: state.identity.name.clone(),
                session: session.id,
                key: key.to_string(),
                error: e.to_string(),
            });
            (Reply::Unavailable, SessionOutcome::Unavailable)
        }
    }
}

fn served(
    state: &ShardState,
    session: &ConnectionSession,
    key: &str,
    content: Bytes,
    from_cache: bool,
) -> (Reply, SessionOutcome) {
    debug!(
        "Serving '{}' ({} bytes, {})",
        key,
        content.len(),
        if from_cache { "cached" } else { "fetched" }
    );
    state.audit.log(AuditEvent::ObjectServed {
        shard: state.identity.name.clone(),
        session: session.id,
        key: key.to_string(),
        from_cache,
        bytes: content.len(),
    });
    (
        Reply::Object {
            key: key.to_string(),
            content,
        },
        SessionOutcome::Served { from_cache },
    )
}
