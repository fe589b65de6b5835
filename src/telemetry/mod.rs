//! Telemetry and audit logging for shardproxy.
//!
//! This module provides structured logging to syslog with the `SHARD_PROXY` tag.
//! Every access decision a shard makes is recorded as an audit event.
//!
//! # Architecture
//!
//! - **Audit logging** (syslog): access events go to syslog, never stdout/stderr
//! - **Debug logging** (tracing): development logs go to stderr via `tracing`
//! - These are completely separate concerns
//!
//! # Usage
//!
//! ```ignore
//! use shardproxy::telemetry::{AuditEvent, AuditLogger};
//! use std::sync::Arc;
//!
//! let audit = Arc::new(AuditLogger::from_config(true));
//! audit.log(AuditEvent::ShardStop {
//!     shard: "shard-1".to_string(),
//!     uptime_sec: 42,
//! });
//! ```
//!
//! # Event Format
//!
//! Events are logged as JSON with an ISO8601 timestamp:
//!
//! ```json
//! {"ts":"2026-01-07T14:32:01Z","event":"request_denied","shard":"shard-2","session":"…","key":"secret.txt","reason":"filter"}
//! ```

mod error;
mod events;
mod syslog;

pub use error::TelemetryError;
pub use events::{AuditEvent, TimestampedEvent};
pub use syslog::{AuditLogger, SYSLOG_TAG};
