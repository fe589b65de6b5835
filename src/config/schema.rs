//! Configuration schema definitions.
//!
//! This module defines the structure of the shardproxy configuration files.
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. Embedded defaults
//! 2. System config: `/etc/shardproxy/config.toml`
//! 3. User config: `~/.config/shardproxy/config.toml`
//! 4. Additional config file (via `--config` flag)
//! 5. CLI flags (highest priority)
//!
//! Every process in a cluster (supervisor, shard children, clients) must
//! resolve the same `[cluster]` section, since ownership of a key depends on
//! the ordered shard list.

use super::error::ConfigError;
use crate::cache::FillMode;
use crate::filter::{FIXED_MODULI, MembershipFilter};
use crate::proxy::handler::Timeouts;
use crate::proxy::policy::FilterPolicy;
use crate::rendezvous::ShardIdentity;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Shard set and listener settings.
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Blacklist source and filter settings.
    #[serde(default)]
    pub blacklist: BlacklistConfig,

    /// Cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Origin settings.
    #[serde(default)]
    pub origin: OriginConfig,

    /// TLS material.
    #[serde(default)]
    pub tls: TlsConfig,

    /// Time limits.
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
}

impl Config {
    /// Merge another config into this one.
    ///
    /// Scalars are overridden when the other value is not the default.
    /// The shard list is replaced as a whole, never appended, so every
    /// process sees an identical ordered list.
    pub fn merge(&mut self, other: Config) {
        self.general.merge(other.general);
        self.cluster.merge(other.cluster);
        self.blacklist.merge(other.blacklist);
        self.cache.merge(other.cache);
        self.origin.merge(other.origin);
        self.tls.merge(other.tls);
        self.timeouts.merge(other.timeouts);
    }

    /// Check the invariants the cluster depends on.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if:
    /// - The shard list is empty
    /// - Two shards share a name, or a non-zero port
    /// - The filter is not larger than the largest fixed modulus
    /// - A timeout is zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        let shards = &self.cluster.shards;
        if shards.is_empty() {
            return Err(invalid("cluster.shards", "at least one shard is required"));
        }

        let mut names = HashSet::new();
        let mut ports = HashSet::new();
        for shard in shards {
            if shard.name.is_empty() {
                return Err(invalid("cluster.shards", "shard names must not be empty"));
            }
            if !names.insert(shard.name.as_str()) {
                return Err(invalid(
                    "cluster.shards",
                    format!("duplicate shard name '{}'", shard.name),
                ));
            }
            // Port 0 asks the OS for an ephemeral port, so it may repeat.
            if shard.port != 0 && !ports.insert(shard.port) {
                return Err(invalid(
                    "cluster.shards",
                    format!("duplicate shard port {}", shard.port),
                ));
            }
        }

        if let Err(e) = MembershipFilter::new(self.blacklist.filter_bits) {
            return Err(invalid("blacklist.filter_bits", e.to_string()));
        }

        if self.timeouts.client_read_ms == 0 {
            return Err(invalid("timeouts.client_read_ms", "must be greater than zero"));
        }
        if self.timeouts.origin_ms == 0 {
            return Err(invalid("timeouts.origin_ms", "must be greater than zero"));
        }

        Ok(())
    }
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.into(),
    }
}

/// General application settings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error. Empty uses `-v`.
    #[serde(default)]
    pub log_level: String,

    /// Send audit events to syslog.
    #[serde(default)]
    pub audit_syslog: bool,
}

impl GeneralConfig {
    fn merge(&mut self, other: GeneralConfig) {
        if !other.log_level.is_empty() {
            self.log_level = other.log_level;
        }
        if other.audit_syslog {
            self.audit_syslog = true;
        }
    }
}

/// How the supervisor hosts its shards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterMode {
    /// Every shard runs as a task set inside the supervisor process.
    #[default]
    Tasks,
    /// Every shard runs in its own child process.
    Processes,
}

/// Shard set and listener settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ClusterConfig {
    /// Host every shard binds to.
    #[serde(default = "default_bind_host")]
    pub bind_host: String,

    /// Shard hosting model.
    #[serde(default)]
    pub mode: ClusterMode,

    /// Ordered shard identities. Order is part of the routing contract.
    #[serde(default = "default_shards")]
    pub shards: Vec<ShardIdentity>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
            mode: ClusterMode::default(),
            shards: default_shards(),
        }
    }
}

impl ClusterConfig {
    fn merge(&mut self, other: ClusterConfig) {
        if other.bind_host != default_bind_host() {
            self.bind_host = other.bind_host;
        }
        if other.mode != ClusterMode::default() {
            self.mode = other.mode;
        }
        if other.shards != default_shards() {
            self.shards = other.shards;
        }
    }
}

fn default_bind_host() -> String {
    "127.0.0.1".to_string()
}

/// Five shards on consecutive local ports.
fn default_shards() -> Vec<ShardIdentity> {
    (1..=5u16)
        .map(|i| ShardIdentity::new(format!("shard-{}", i), 9000 + i))
        .collect()
}

/// Blacklist source and filter settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BlacklistConfig {
    /// Line-oriented blacklist shared by every shard.
    #[serde(default = "default_blacklist_path")]
    pub path: PathBuf,

    /// Membership filter size in bits.
    #[serde(default = "default_filter_bits")]
    pub filter_bits: usize,

    /// Treatment of filter hits.
    #[serde(default)]
    pub policy: FilterPolicy,
}

impl Default for BlacklistConfig {
    fn default() -> Self {
        Self {
            path: default_blacklist_path(),
            filter_bits: default_filter_bits(),
            policy: FilterPolicy::default(),
        }
    }
}

impl BlacklistConfig {
    fn merge(&mut self, other: BlacklistConfig) {
        if other.path != default_blacklist_path() {
            self.path = other.path;
        }
        if other.filter_bits != default_filter_bits() {
            self.filter_bits = other.filter_bits;
        }
        if other.policy != FilterPolicy::default() {
            self.policy = other.policy;
        }
    }
}

fn default_blacklist_path() -> PathBuf {
    PathBuf::from("blacklisted.txt")
}

fn default_filter_bits() -> usize {
    crate::filter::DEFAULT_FILTER_BITS
}

/// Cache settings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Fill serialization mode.
    #[serde(default)]
    pub fill: FillMode,
}

impl CacheConfig {
    fn merge(&mut self, other: CacheConfig) {
        if other.fill != FillMode::default() {
            self.fill = other.fill;
        }
    }
}

/// Origin settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct OriginConfig {
    /// Address shards fetch from and the origin server binds.
    #[serde(default = "default_origin_address")]
    pub address: String,

    /// Directory served by `shardproxy origin`.
    #[serde(default = "default_catalog_dir")]
    pub catalog_dir: PathBuf,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            address: default_origin_address(),
            catalog_dir: default_catalog_dir(),
        }
    }
}

impl OriginConfig {
    fn merge(&mut self, other: OriginConfig) {
        if other.address != default_origin_address() {
            self.address = other.address;
        }
        if other.catalog_dir != default_catalog_dir() {
            self.catalog_dir = other.catalog_dir;
        }
    }
}

fn default_origin_address() -> String {
    "127.0.0.1:9998".to_string()
}

fn default_catalog_dir() -> PathBuf {
    PathBuf::from("objects")
}

/// TLS material paths.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TlsConfig {
    /// CA certificate every peer must chain to.
    #[serde(default = "default_ca_path")]
    pub ca: PathBuf,

    /// This node's certificate.
    #[serde(default = "default_cert_path")]
    pub cert: PathBuf,

    /// This node's private key.
    #[serde(default = "default_key_path")]
    pub key: PathBuf,

    /// Name expected on shard and origin certificates.
    #[serde(default = "default_server_name")]
    pub server_name: String,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            ca: default_ca_path(),
            cert: default_cert_path(),
            key: default_key_path(),
            server_name: default_server_name(),
        }
    }
}

impl TlsConfig {
    fn merge(&mut self, other: TlsConfig) {
        if other.ca != default_ca_path() {
            self.ca = other.ca;
        }
        if other.cert != default_cert_path() {
            self.cert = other.cert;
        }
        if other.key != default_key_path() {
            self.key = other.key;
        }
        if other.server_name != default_server_name() {
            self.server_name = other.server_name;
        }
    }
}

fn default_ca_path() -> PathBuf {
    PathBuf::from("certs/ca.pem")
}

fn default_cert_path() -> PathBuf {
    PathBuf::from("certs/node.pem")
}

fn default_key_path() -> PathBuf {
    PathBuf::from("certs/node.key")
}

fn default_server_name() -> String {
    "localhost".to_string()
}

/// Time limits in milliseconds.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TimeoutsConfig {
    /// Bound on reading a client's request frame.
    #[serde(default = "default_client_read_ms")]
    pub client_read_ms: u64,

    /// Bound on one origin round trip.
    #[serde(default = "default_origin_ms")]
    pub origin_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            client_read_ms: default_client_read_ms(),
            origin_ms: default_origin_ms(),
        }
    }
}

impl TimeoutsConfig {
    fn merge(&mut self, other: TimeoutsConfig) {
        if other.client_read_ms != default_client_read_ms() {
            self.client_read_ms = other.client_read_ms;
        }
        if other.origin_ms != default_origin_ms() {
            self.origin_ms = other.origin_ms;
        }
    }

    /// Convert to handler time limits.
    pub fn to_timeouts(&self) -> Timeouts {
        Timeouts {
            client_read: Duration::from_millis(self.client_read_ms),
            origin: Duration::from_millis(self.origin_ms),
        }
    }
}

fn default_client_read_ms() -> u64 {
    5_000
}

fn default_origin_ms() -> u64 {
    5_000
}

/// Smallest accepted filter size in bits.
pub fn min_filter_bits() -> usize {
    FIXED_MODULI.iter().copied().max().unwrap_or(0) as usize + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_mirror_reference_deployment() {
        let config = Config::default();
        assert_eq!(config.cluster.shards.len(), 5);
        assert_eq!(config.cluster.shards[0], ShardIdentity::new("shard-1", 9001));
        assert_eq!(config.origin.address, "127.0.0.1:9998");
        assert_eq!(config.blacklist.path, PathBuf::from("blacklisted.txt"));
        assert_eq!(config.blacklist.policy, FilterPolicy::FailClosed);
        assert_eq!(config.cache.fill, FillMode::PerKey);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_file_parses_to_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_parse_full_file() {
        let config: Config = toml::from_str(
            r#"
            [general]
            log_level = "debug"
            audit_syslog = true

            [cluster]
            bind_host = "0.0.0.0"
            mode = "processes"

            [[cluster.shards]]
            name = "alpha"
            port = 7001

            [[cluster.shards]]
            name = "beta"
            port = 7002

            [blacklist]
            path = "/etc/shardproxy/blacklist.txt"
            filter_bits = 65536
            policy = "confirm"

            [cache]
            fill = "shard_wide"

            [origin]
            address = "10.0.0.5:9998"
            catalog_dir = "/srv/objects"

            [tls]
            server_name = "origin.internal"

            [timeouts]
            client_read_ms = 250
            origin_ms = 750
            "#,
        )
        .unwrap();

        assert_eq!(config.general.log_level, "debug");
        assert!(config.general.audit_syslog);
        assert_eq!(config.cluster.mode, ClusterMode::Processes);
        assert_eq!(config.cluster.shards.len(), 2);
        assert_eq!(config.blacklist.policy, FilterPolicy::Confirm);
        assert_eq!(config.cache.fill, FillMode::ShardWide);
        assert_eq!(config.tls.server_name, "origin.internal");
        assert_eq!(config.tls.ca, PathBuf::from("certs/ca.pem"));
        assert_eq!(
            config.timeouts.to_timeouts().client_read,
            Duration::from_millis(250)
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_shard_list_replaced_not_appended() {
        let mut config = Config::default();
        let other: Config = toml::from_str(
            r#"
            [[cluster.shards]]
            name = "only"
            port = 7000
            "#,
        )
        .unwrap();

        config.merge(other);
        assert_eq!(config.cluster.shards, vec![ShardIdentity::new("only", 7000)]);
    }

    #[test]
    fn test_merge_keeps_values_not_overridden() {
        let mut config = Config::default();
        config.origin.address = "10.0.0.1:9998".to_string();

        let other: Config = toml::from_str("[timeouts]\norigin_ms = 100\n").unwrap();
        config.merge(other);

        assert_eq!(config.origin.address, "10.0.0.1:9998");
        assert_eq!(config.timeouts.origin_ms, 100);
    }

    #[test]
    fn test_validate_rejects_empty_shards() {
        let mut config = Config::default();
        config.cluster.shards.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "cluster.shards"
        ));
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let mut config = Config::default();
        config.cluster.shards = vec![ShardIdentity::new("a", 1), ShardIdentity::new("a", 2)];
        assert!(config.validate().is_err());

        config.cluster.shards = vec![ShardIdentity::new("a", 1), ShardIdentity::new("b", 1)];
        assert!(config.validate().is_err());

        config.cluster.shards = vec![ShardIdentity::new("a", 0), ShardIdentity::new("b", 0)];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_small_filter() {
        let mut config = Config::default();
        config.blacklist.filter_bits = 19793;
        assert!(config.validate().is_err());
        config.blacklist.filter_bits = min_filter_bits();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let mut config = Config::default();
        config.timeouts.origin_ms = 0;
        assert!(config.validate().is_err());
    }
}
