//! Command handling for shardproxy.
//!
//! Each subcommand builds its own Tokio runtime and runs to completion.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cli::Commands;
use crate::client::ShardClient;
use crate::config::{ClusterMode, Config};
use crate::origin::{Catalog, ObjectSource, OriginClient, OriginServer};
use crate::pki;
use crate::proxy::TlsMaterial;
use crate::supervisor::{self, Supervisor};
use crate::telemetry::AuditLogger;

/// Run a subcommand.
///
/// `config` is the resolved configuration; commands that need it fail if
/// it is absent.
pub fn handle_command(command: Commands, config: Option<Config>, verbose: u8) -> Result<()> {
    match command {
        Commands::Supervise { .. } => run_supervisor(&require(config)?, verbose),
        Commands::Origin { .. } => run_origin(&require(config)?),
        Commands::Fetch { key, shard } => run_fetch(&require(config)?, &key, shard),
        Commands::GenCerts { dir } => run_gen_certs(&dir),
        Commands::InternalShard { index } => run_internal_shard(index),
    }
}

/// Whether `command` needs the layered configuration.
pub fn needs_config(command: &Commands) -> bool {
    !matches!(
        command,
        Commands::GenCerts { .. } | Commands::InternalShard { .. }
    )
}

fn require(config: Option<Config>) -> Result<Config> {
    config.context("Configuration was not loaded")
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")
}

fn load_material(config: &Config) -> Result<TlsMaterial> {
    TlsMaterial::from_files(&config.tls.ca, &config.tls.cert, &config.tls.key)
        .context("Failed to load TLS material (run `shardproxy gen-certs` first?)")
}

/// Flip `shutdown_tx` on Ctrl-C.
fn stop_on_ctrl_c(shutdown_tx: Arc<watch::Sender<bool>>) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupted, shutting down"),
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
        shutdown_tx.send_replace(true);
    });
}

fn run_supervisor(config: &Config, verbose: u8) -> Result<()> {
    let rt = runtime()?;
    let audit = Arc::new(AuditLogger::from_config(config.general.audit_syslog));
    let supervisor = Supervisor::new(config.clone(), audit);

    rt.block_on(async {
        let handle = match config.cluster.mode {
            ClusterMode::Tasks => {
                let material = load_material(config)?;
                let origin = OriginClient::new(
                    config.origin.address.clone(),
                    &config.tls.server_name,
                    &material,
                    config.timeouts.to_timeouts().origin,
                )
                .context("Failed to configure origin client")?;
                let origin: Arc<dyn ObjectSource> = Arc::new(origin);
                supervisor
                    .start(origin, &material)
                    .await
                    .context("Failed to start shards")?
            }
            ClusterMode::Processes => {
                let exe =
                    std::env::current_exe().context("Failed to get current executable path")?;
                supervisor
                    .start_processes(&exe, verbose)
                    .await
                    .context("Failed to start shard processes")?
            }
        };

        for (shard, addr) in handle.shards().iter().zip(handle.addrs()) {
            info!("{} ready on {}", shard.name, addr);
        }

        stop_on_ctrl_c(handle.shutdown_sender());
        handle.wait().await.context("Shard cluster failed")
    })
}

fn run_origin(config: &Config) -> Result<()> {
    let rt = runtime()?;
    let material = load_material(config)?;
    let catalog = Catalog::Directory(config.origin.catalog_dir.clone());

    rt.block_on(async {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = OriginServer::bind(&config.origin.address, catalog, &material, shutdown_rx)
            .await
            .context("Failed to start origin")?;
        info!(
            "Serving {:?} on {}",
            config.origin.catalog_dir,
            server.local_addr()?
        );

        stop_on_ctrl_c(Arc::new(shutdown_tx));
        server.run().await?;
        info!("Origin answered {} requests", server.requests_served());
        Ok(())
    })
}

fn run_fetch(config: &Config, key: &str, shard: Option<usize>) -> Result<()> {
    let rt = runtime()?;
    let material = load_material(config)?;
    let timeouts = config.timeouts.to_timeouts();
    let client = ShardClient::new(
        config.cluster.bind_host.clone(),
        config.cluster.shards.clone(),
        &config.tls.server_name,
        &material,
        timeouts.client_read + timeouts.origin,
    )?;

    let index = shard.unwrap_or_else(|| client.route(key));
    debug!(
        "Key '{}' routes to shard {}, sending to shard {}",
        key,
        client.route(key),
        index
    );

    let reply = rt
        .block_on(client.fetch_from(index, key))
        .with_context(|| format!("Request for '{}' failed", key))?;
    println!("{}", reply);
    Ok(())
}

fn run_gen_certs(dir: &Path) -> Result<()> {
    let paths = pki::write_node_bundle(dir)
        .with_context(|| format!("Failed to write certificates to {:?}", dir))?;
    println!("CA certificate:   {}", paths.ca.display());
    println!("Node certificate: {}", paths.cert.display());
    println!("Node key:         {}", paths.key.display());
    Ok(())
}

/// Run one shard under a process-mode supervisor.
fn run_internal_shard(index: usize) -> Result<()> {
    let rt = runtime()?;
    rt.block_on(async {
        supervisor::run_child(index, tokio::io::stdin(), tokio::io::stdout())
            .await
            .with_context(|| format!("Shard {} failed", index))
    })
}
