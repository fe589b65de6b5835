//! Configuration system for shardproxy.
//!
//! This module provides TOML configuration loading with hierarchy merging.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. System config: `/etc/shardproxy/config.toml`
//! 2. User config: `~/.config/shardproxy/config.toml`
//! 3. Additional config file (via `--config` flag)
//! 4. CLI flags (highest priority)
//!
//! Every file is optional except one named with `--config`; without any
//! file the embedded defaults describe a five-shard local cluster.
//!
//! # Merge Behavior
//!
//! - **Scalars** (addresses, paths, timeouts) are **overridden**
//! - **The shard list** is **replaced** as a whole
//!
//! # Cluster Definition
//!
//! ```toml
//! [cluster]
//! bind_host = "127.0.0.1"
//! mode = "tasks"
//!
//! [[cluster.shards]]
//! name = "shard-1"
//! port = 9001
//! ```

mod error;
mod loader;
mod schema;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{
    BlacklistConfig, CacheConfig, ClusterConfig, ClusterMode, Config, GeneralConfig,
    OriginConfig, TimeoutsConfig, TlsConfig, min_filter_bits,
};
