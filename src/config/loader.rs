//! Configuration loading with hierarchy merging.
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. Embedded defaults (compiled into binary)
//! 2. System config: `/etc/shardproxy/config.toml`
//! 3. User config: `~/.config/shardproxy/config.toml`
//! 4. Additional config file (via `--config` flag)
//! 5. CLI flags (highest priority)
//!
//! Scalars are **overridden**. The shard list is **replaced**.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::ConfigError;
use super::schema::Config;
use crate::cli::{Cli, Commands};

/// System-wide configuration path.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/shardproxy/config.toml";

/// User configuration directory name.
pub const USER_CONFIG_DIR: &str = "shardproxy";

/// User configuration filename.
pub const USER_CONFIG_FILE: &str = "config.toml";

/// Configuration loader with support for hierarchy merging.
pub struct ConfigLoader {
    /// Path to system-wide configuration.
    system_path: PathBuf,
    /// Path to user configuration.
    user_path: PathBuf,
}

impl ConfigLoader {
    /// Create a new ConfigLoader with default paths.
    #[must_use]
    pub fn new() -> Self {
        let user_config_dir = Self::user_config_dir()
            .unwrap_or_else(|_| PathBuf::from(".config").join(USER_CONFIG_DIR));

        Self {
            system_path: PathBuf::from(SYSTEM_CONFIG_PATH),
            user_path: user_config_dir.join(USER_CONFIG_FILE),
        }
    }

    /// Create a ConfigLoader with custom paths (for testing).
    #[must_use]
    pub fn with_paths(system_path: PathBuf, user_path: PathBuf) -> Self {
        Self {
            system_path,
            user_path,
        }
    }

    /// Directory holding the user's shardproxy configuration.
    pub fn user_config_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|p| p.join(USER_CONFIG_DIR))
            .ok_or(ConfigError::NoHomeDirectory)
    }

    /// Load, merge and validate configuration from all sources.
    ///
    /// Missing system and user files are skipped. A missing `--config` file,
    /// invalid TOML, or a config that fails [`Config::validate`] is an error.
    pub fn load(&self, cli: &Cli) -> Result<Config, ConfigError> {
        // Start with embedded defaults
        let mut config = Config::default();
        debug!("Loaded embedded default configuration");

        // Load and merge system config
        if let Some(system_config) = self.load_file(&self.system_path)? {
            config.merge(system_config);
            debug!("Loaded system config from {:?}", self.system_path);
        } else {
            debug!("No system config found at {:?}", self.system_path);
        }

        // Load and merge user config
        if let Some(user_config) = self.load_file(&self.user_path)? {
            config.merge(user_config);
            debug!("Loaded user config from {:?}", self.user_path);
        } else {
            debug!("No user config found at {:?}", self.user_path);
        }

        // Load and merge additional config file from CLI
        if let Some(ref cli_config_path) = cli.config {
            match self.load_file(cli_config_path)? {
                Some(cli_config) => {
                    config.merge(cli_config);
                    debug!("Loaded additional config from {:?}", cli_config_path);
                }
                None => {
                    // Unlike system/user config, a missing CLI-specified config is an error
                    return Err(ConfigError::ReadError {
                        path: cli_config_path.clone(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            "Specified config file not found",
                        ),
                    });
                }
            }
        }

        // Apply CLI flags (highest priority)
        apply_cli_overrides(&mut config, &cli.command);

        config.validate()?;
        Ok(config)
    }

    /// Load a config file, returning None if it doesn't exist.
    pub fn load_file(&self, path: &Path) -> Result<Option<Config>, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let config: Config =
                    toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
                        path: path.to_path_buf(),
                        source: e,
                    })?;
                Ok(Some(config))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ConfigError::ReadError {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_cli_overrides(config: &mut Config, command: &Commands) {
    match command {
        Commands::Supervise { mode, blacklist } => {
            if let Some(mode) = mode {
                config.cluster.mode = (*mode).into();
                debug!("Cluster mode set from CLI: {:?}", config.cluster.mode);
            }
            if let Some(path) = blacklist {
                config.blacklist.path = path.clone();
                debug!("Blacklist path set from CLI: {:?}", path);
            }
        }
        Commands::Origin { catalog, listen } => {
            if let Some(dir) = catalog {
                config.origin.catalog_dir = dir.clone();
            }
            if let Some(addr) = listen {
                config.origin.address = addr.clone();
            }
        }
        Commands::Fetch { .. } | Commands::GenCerts { .. } | Commands::InternalShard { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterMode;
    use crate::rendezvous::ShardIdentity;
    use tempfile::tempdir;

    fn create_test_cli() -> Cli {
        Cli {
            command: Commands::Fetch {
                key: "hello.txt".to_string(),
                shard: None,
            },
            config: None,
            verbose: 0,
        }
    }

    #[test]
    fn test_missing_files_use_defaults() {
        let dir = tempdir().unwrap();
        let loader = ConfigLoader::with_paths(
            dir.path().join("nonexistent_system.toml"),
            dir.path().join("nonexistent_user.toml"),
        );

        let config = loader.load(&create_test_cli()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_user_config_overrides_system() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("system.toml"),
            "[origin]\naddress = \"10.0.0.1:9998\"\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("user.toml"),
            "[origin]\naddress = \"10.0.0.2:9998\"\n",
        )
        .unwrap();

        let loader =
            ConfigLoader::with_paths(dir.path().join("system.toml"), dir.path().join("user.toml"));
        let config = loader.load(&create_test_cli()).unwrap();

        assert_eq!(config.origin.address, "10.0.0.2:9998");
    }

    #[test]
    fn test_shard_list_is_replaced() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("system.toml"),
            r#"
            [[cluster.shards]]
            name = "a"
            port = 7001

            [[cluster.shards]]
            name = "b"
            port = 7002
            "#,
        )
        .unwrap();
        fs::write(
            dir.path().join("user.toml"),
            r#"
            [[cluster.shards]]
            name = "c"
            port = 7003
            "#,
        )
        .unwrap();

        let loader =
            ConfigLoader::with_paths(dir.path().join("system.toml"), dir.path().join("user.toml"));
        let config = loader.load(&create_test_cli()).unwrap();

        assert_eq!(config.cluster.shards, vec![ShardIdentity::new("c", 7003)]);
    }

    #[test]
    fn test_cli_config_file_applied_last() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("user.toml"), "[timeouts]\norigin_ms = 100\n").unwrap();
        fs::write(dir.path().join("extra.toml"), "[timeouts]\norigin_ms = 200\n").unwrap();

        let loader =
            ConfigLoader::with_paths(dir.path().join("system.toml"), dir.path().join("user.toml"));
        let mut cli = create_test_cli();
        cli.config = Some(dir.path().join("extra.toml"));

        let config = loader.load(&cli).unwrap();
        assert_eq!(config.timeouts.origin_ms, 200);
    }

    #[test]
    fn test_missing_cli_config_is_error() {
        let dir = tempdir().unwrap();
        let loader =
            ConfigLoader::with_paths(dir.path().join("system.toml"), dir.path().join("user.toml"));
        let mut cli = create_test_cli();
        cli.config = Some(dir.path().join("missing.toml"));

        let result = loader.load(&cli);
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn test_cli_flags_override_files() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("user.toml"),
            "[cluster]\nmode = \"tasks\"\n[blacklist]\npath = \"from-file.txt\"\n",
        )
        .unwrap();

        let loader =
            ConfigLoader::with_paths(dir.path().join("system.toml"), dir.path().join("user.toml"));
        let cli = Cli {
            command: Commands::Supervise {
                mode: Some(crate::cli::ModeArg::Processes),
                blacklist: Some(PathBuf::from("from-cli.txt")),
            },
            config: None,
            verbose: 0,
        };

        let config = loader.load(&cli).unwrap();
        assert_eq!(config.cluster.mode, ClusterMode::Processes);
        assert_eq!(config.blacklist.path, PathBuf::from("from-cli.txt"));
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("invalid.toml"), "this is not valid TOML [[[").unwrap();

        let loader =
            ConfigLoader::with_paths(dir.path().join("invalid.toml"), dir.path().join("user.toml"));
        let result = loader.load(&create_test_cli());

        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn test_invalid_values_rejected_at_load() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("user.toml"), "[blacklist]\nfilter_bits = 100\n").unwrap();

        let loader =
            ConfigLoader::with_paths(dir.path().join("system.toml"), dir.path().join("user.toml"));
        let result = loader.load(&create_test_cli());

        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }
}
