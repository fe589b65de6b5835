//! Command-line interface definitions for shardproxy.
//!
//! Uses clap's derive API for type-safe argument parsing.

use crate::config::ClusterMode;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Sharded caching proxy with a blacklist gate.
///
/// shardproxy runs a fixed set of proxy shards in front of a single origin.
/// Clients pick a shard with rendezvous hashing, each shard filters requests
/// against its slice of the blacklist, and allowed objects are cached after
/// the first origin fetch. Every hop uses mutually authenticated TLS.
#[derive(Parser, Debug)]
#[command(name = "shardproxy")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Commands,

    /// Path to additional config file.
    ///
    /// This config file is merged on top of system and user configs,
    /// giving it the highest priority (except for CLI flags).
    #[arg(short = 'c', long = "config", value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity.
    ///
    /// Can be specified multiple times:
    /// -v    = info level
    /// -vv   = debug level
    /// -vvv  = trace level
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

/// Shard hosting model as accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// All shards as tasks in one process.
    Tasks,
    /// One child process per shard.
    Processes,
}

impl From<ModeArg> for ClusterMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Tasks => ClusterMode::Tasks,
            ModeArg::Processes => ClusterMode::Processes,
        }
    }
}

/// Subcommands for shardproxy.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start every configured shard and serve until interrupted.
    Supervise {
        /// Override the shard hosting model.
        #[arg(long = "mode", value_enum)]
        mode: Option<ModeArg>,

        /// Override the blacklist source.
        #[arg(long = "blacklist", value_name = "PATH")]
        blacklist: Option<PathBuf>,
    },

    /// Serve a directory of objects as the origin.
    Origin {
        /// Override the directory to serve.
        #[arg(long = "catalog", value_name = "DIR")]
        catalog: Option<PathBuf>,

        /// Override the listen address.
        #[arg(long = "listen", value_name = "ADDR")]
        listen: Option<String>,
    },

    /// Request one object through the cluster.
    Fetch {
        /// Object key.
        key: String,

        /// Send the request to this shard index instead of the routed one.
        #[arg(long = "shard", value_name = "N")]
        shard: Option<usize>,
    },

    /// Write a development CA and node certificate to a directory.
    GenCerts {
        /// Output directory.
        dir: PathBuf,
    },

    /// Run a single shard (hidden).
    ///
    /// Spawned by `supervise --mode processes`. It should not be invoked
    /// directly by users.
    #[command(name = "internal-shard", hide = true)]
    InternalShard {
        /// Position of the shard in the configured list.
        #[arg(long = "index", required = true)]
        index: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_supervise() {
        let cli = Cli::parse_from(["shardproxy", "supervise"]);
        assert_eq!(cli.verbose, 0);
        assert!(cli.config.is_none());
        match cli.command {
            Commands::Supervise { mode, blacklist } => {
                assert!(mode.is_none());
                assert!(blacklist.is_none());
            }
            _ => panic!("Expected Supervise command"),
        }
    }

    #[test]
    fn test_cli_parse_supervise_with_options() {
        let cli = Cli::parse_from([
            "shardproxy",
            "-vv",
            "supervise",
            "--mode",
            "processes",
            "--blacklist",
            "/tmp/deny.txt",
            "-c",
            "/tmp/cluster.toml",
        ]);

        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/cluster.toml")));
        match cli.command {
            Commands::Supervise { mode, blacklist } => {
                assert_eq!(mode, Some(ModeArg::Processes));
                assert_eq!(blacklist, Some(PathBuf::from("/tmp/deny.txt")));
            }
            _ => panic!("Expected Supervise command"),
        }
    }

    #[test]
    fn test_cli_parse_fetch() {
        let cli = Cli::parse_from(["shardproxy", "fetch", "hello.txt", "--shard", "3"]);
        match cli.command {
            Commands::Fetch { key, shard } => {
                assert_eq!(key, "hello.txt");
                assert_eq!(shard, Some(3));
            }
            _ => panic!("Expected Fetch command"),
        }
    }

    #[test]
    fn test_cli_parse_gen_certs() {
        let cli = Cli::parse_from(["shardproxy", "gen-certs", "certs"]);
        assert!(matches!(cli.command, Commands::GenCerts { dir } if dir == PathBuf::from("certs")));
    }

    #[test]
    fn test_internal_shard_command() {
        let cli = Cli::parse_from(["shardproxy", "internal-shard", "--index", "2"]);
        assert!(matches!(cli.command, Commands::InternalShard { index: 2 }));
    }

    #[test]
    fn test_missing_command_is_error() {
        assert!(Cli::try_parse_from(["shardproxy"]).is_err());
    }

    #[test]
    fn test_mode_conversion() {
        assert_eq!(ClusterMode::from(ModeArg::Tasks), ClusterMode::Tasks);
        assert_eq!(ClusterMode::from(ModeArg::Processes), ClusterMode::Processes);
    }
}
