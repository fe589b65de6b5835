//! Audit event types for structured logging.
//!
//! These events are logged to syslog with the `SHARD_PROXY` tag so every
//! access decision a shard makes leaves a trail.

use crate::proxy::policy::DenyReason;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Audit events for access logging.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Shard finished loading and started accepting connections.
    ShardStart {
        /// Shard name.
        shard: String,
        /// Address the shard listens on.
        addr: String,
        /// Number of blacklist entries this shard owns.
        blacklist_entries: usize,
        /// Process ID hosting the shard.
        pid: u32,
    },

    /// Request denied by the blacklist gate.
    RequestDenied {
        /// Shard name.
        shard: String,
        /// Connection session ID.
        session: Uuid,
        /// Requested key.
        key: String,
        /// Which check denied the key.
        reason: DenyReason,
    },

    /// Object returned to the client.
    ObjectServed {
        /// Shard name.
        shard: String,
        /// Connection session ID.
        session: Uuid,
        /// Requested key.
        key: String,
        /// Whether the content came from the cache without an origin fetch.
        from_cache: bool,
        /// Content length in bytes.
        bytes: usize,
    },

    /// Origin reported that the key does not exist.
    ObjectMissing {
        /// Shard name.
        shard: String,
        /// Connection session ID.
        session: Uuid,
        /// Requested key.
        key: String,
    },

    /// Origin fetch failed.
    OriginFailure {
        /// Shard name.
        shard: String,
        /// Connection session ID.
        session: Uuid,
        /// Requested key.
        key: String,
        /// Error description.
        error: String,
    },

    /// Shard stopped accepting connections.
    ShardStop {
        /// Shard name.
        shard: String,
        /// Time the shard was serving, in seconds.
        uptime_sec: u64,
    },
}

/// Wrapper for serializing events with timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct TimestampedEvent<'a> {
    /// ISO8601 timestamp.
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,

    /// The actual event (flattened into this struct).
    #[serde(flatten)]
    pub event: &'a AuditEvent,
}

impl AuditEvent {
    /// Wrap this event with a timestamp for serialization.
    pub fn with_timestamp(&self) -> TimestampedEvent<'_> {
        TimestampedEvent {
            timestamp: Utc::now(),
            event: self,
        }
    }
}
