//! shardproxy: sharded caching proxy with a blacklist gate
//!
//! This is the main entry point for the shardproxy binary. It handles CLI
//! argument parsing, configuration loading and tracing setup, then hands the
//! subcommand to the command handler.
//!
//! # I/O Architecture
//!
//! - **Audit logging**: Goes to syslog (not stdout/stderr) when enabled
//! - **Debug logging**: Always stderr
//! - **stdout**: Reserved for command output. Shard children use it to
//!   report their bound address to the supervisor

use anyhow::{Context, Result};
use clap::Parser;
use shardproxy::{
    cli::Cli,
    cli_handler::{handle_command, needs_config},
    config::ConfigLoader,
};
use tracing::debug;

fn main() -> Result<()> {
    // Parse CLI arguments first (before any other initialization)
    let cli = Cli::parse();

    // Load configuration with hierarchy merging
    let config = if needs_config(&cli.command) {
        Some(
            ConfigLoader::new()
                .load(&cli)
                .context("Failed to load configuration")?,
        )
    } else {
        None
    };

    let log_level = config
        .as_ref()
        .map(|c| c.general.log_level.as_str())
        .unwrap_or_default();
    init_tracing(cli.verbose, log_level)?;

    debug!("Parsed CLI arguments: {:?}", cli);
    debug!("Loaded configuration: {:?}", config);

    handle_command(cli.command, config, cli.verbose)
}

/// Initialize the tracing subscriber for debug/development logging.
///
/// This is separate from the audit telemetry which goes to syslog.
///
/// # Verbosity Levels
/// - 0 (default): `RUST_LOG`, then the configured log level, then warnings
/// - 1 (-v): Info level
/// - 2 (-vv): Debug level
/// - 3+ (-vvv): Trace level
fn init_tracing(verbose: u8, log_level: &str) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            if log_level.is_empty() {
                EnvFilter::new("warn")
            } else {
                EnvFilter::new(log_level)
            }
        }),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}
