//! Syslog integration for audit logging.
//!
//! All audit events are logged to syslog with the `SHARD_PROXY` tag.

use std::sync::Mutex;

use syslog::{Facility, Formatter3164};
use tracing::{debug, error, warn};

use super::error::TelemetryError;
use super::events::AuditEvent;

/// Syslog tag for all audit events.
pub const SYSLOG_TAG: &str = "SHARD_PROXY";

enum Sink {
    Syslog(Mutex<syslog::Logger<syslog::LoggerBackend, Formatter3164>>),
    Memory(Mutex<Vec<String>>),
    Null,
}

/// Audit logger that writes structured JSON events to syslog.
///
/// Shared between shards and connection handlers behind an `Arc`.
pub struct AuditLogger {
    sink: Sink,
}

impl AuditLogger {
    /// Create a new audit logger connected to syslog.
    ///
    /// Uses Unix socket connection to local syslog daemon.
    pub fn new() -> Result<Self, TelemetryError> {
        let formatter = Formatter3164 {
            facility: Facility::LOG_USER,
            hostname: None,
            process: SYSLOG_TAG.to_string(),
            pid: std::process::id(),
        };

        let writer = syslog::unix(formatter)
            .map_err(|e| TelemetryError::SyslogConnection(e.to_string()))?;

        debug!("Connected to syslog with tag '{}'", SYSLOG_TAG);
        Ok(Self {
            sink: Sink::Syslog(Mutex::new(writer)),
        })
    }

    /// Connect to syslog when `enabled`, falling back to a null logger.
    ///
    /// A missing syslog daemon must not keep the cluster from serving.
    pub fn from_config(enabled: bool) -> Self {
        if !enabled {
            return Self::new_null();
        }
        match Self::new() {
            Ok(logger) => logger,
            Err(e) => {
                warn!("Audit logging disabled: {}", e);
                Self::new_null()
            }
        }
    }

    /// Create a null audit logger that discards all events.
    pub fn new_null() -> Self {
        Self { sink: Sink::Null }
    }

    /// Create a logger that keeps serialized events in memory.
    pub fn new_memory() -> Self {
        Self {
            sink: Sink::Memory(Mutex::new(Vec::new())),
        }
    }

    /// Serialize an event with its timestamp.
    pub fn render(event: &AuditEvent) -> Result<String, TelemetryError> {
        Ok(serde_json::to_string(&event.with_timestamp())?)
    }

    /// Log an audit event.
    ///
    /// If this is a null logger, the event is silently discarded.
    pub fn log(&self, event: AuditEvent) {
        if matches!(self.sink, Sink::Null) {
            return;
        }

        let json = match Self::render(&event) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize audit event: {}", e);
                return;
            }
        };

        match &self.sink {
            Sink::Syslog(writer) => match writer.lock() {
                Ok(mut writer) => {
                    if let Err(e) = writer.info(&json) {
                        error!("Failed to write to syslog: {}", e);
                    }
                }
                Err(e) => {
                    error!("Failed to acquire syslog writer lock: {}", e);
                }
            },
            Sink::Memory(events) => match events.lock() {
                Ok(mut events) => events.push(json.clone()),
                Err(e) => error!("Failed to acquire audit buffer lock: {}", e),
            },
            Sink::Null => {}
        }
        debug!("Logged audit event: {}", json);
    }

    /// Events recorded by a memory logger, oldest first.
    pub fn recorded(&self) -> Vec<String> {
        match &self.sink {
            Sink::Memory(events) => events.lock().map(|e| e.clone()).unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    /// Check if this is a null logger.
    pub fn is_null(&self) -> bool {
        matches!(self.sink, Sink::Null)
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new_null()
    }
}
