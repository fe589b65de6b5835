//! Shard supervision and lifecycle management.
//!
//! The supervisor brings up every configured shard and ties their lifetimes
//! together. Two hosting models are supported:
//!
//! - **Tasks**: every shard is a [`ShardServer`] inside this process.
//! - **Processes**: every shard is a child running `internal-shard --index i`.
//!   The resolved config is handed over as one frame on the child's stdin,
//!   and the child reports its bound address as one line on stdout. The
//!   stdin pipe then stays open as the control channel: the child stops when
//!   it closes or when the child is reparented.
//!
//! Startup is all-or-nothing. Once serving, a shard that fails brings the
//! rest down with it.

use crate::config::Config;
use crate::origin::{ObjectSource, OriginClient};
use crate::protocol::{read_frame, write_frame};
use crate::proxy::error::ProxyError;
use crate::proxy::server::{ShardServer, ShardState};
use crate::proxy::tls::TlsMaterial;
use crate::rendezvous::ShardIdentity;
use crate::telemetry::AuditLogger;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Bound on the config frame handed to a child.
const CONTROL_FRAME_LIMIT: usize = 1 << 20;

/// How long a child may take to load and bind.
const CHILD_READY_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a child may take to stop after its control channel closes.
const CHILD_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// How often a child checks whether its parent is still alive.
const PARENT_POLL_INTERVAL: Duration = Duration::from_millis(500);

type ShardTasks = JoinSet<(usize, Result<(), ProxyError>)>;

/// Starts the shards described by a config.
pub struct Supervisor {
    config: Config,
    audit: Arc<AuditLogger>,
}

impl Supervisor {
    /// Create a supervisor for a validated config.
    pub fn new(config: Config, audit: Arc<AuditLogger>) -> Self {
        Self { config, audit }
    }

    /// The config shards are started from.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start every shard as a task in this process.
    ///
    /// Every shard loads its blacklist partition and binds its port before
    /// any of them starts accepting.
    ///
    /// # Errors
    ///
    /// Returns the first load or bind error. No shard is left running.
    pub async fn start(
        &self,
        origin: Arc<dyn ObjectSource>,
        material: &TlsMaterial,
    ) -> Result<SupervisorHandle, ProxyError> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let count = self.config.cluster.shards.len();

        let mut servers = Vec::with_capacity(count);
        for index in 0..count {
            let state = ShardState::load(&self.config, index, origin.clone(), self.audit.clone())?;
            let server = ShardServer::bind(
                &self.config.cluster.bind_host,
                state,
                material,
                shutdown_rx.clone(),
            )
            .await?;
            servers.push(server);
        }

        let mut shards = Vec::with_capacity(count);
        let mut addrs = Vec::with_capacity(count);
        for server in &servers {
            let addr = server.local_addr()?;
            shards.push(ShardIdentity::new(
                server.state().identity.name.clone(),
                addr.port(),
            ));
            addrs.push(addr);
        }

        let mut tasks = ShardTasks::new();
        for (index, server) in servers.into_iter().enumerate() {
            tasks.spawn(async move { (index, server.run().await) });
        }

        info!("Started {} shards as tasks", count);
        Ok(SupervisorHandle {
            shards,
            addrs,
            shutdown_tx: Arc::new(shutdown_tx),
            tasks,
        })
    }

    /// Start every shard as a child process of `exe`.
    ///
    /// Children are started one at a time; each must report its bound
    /// address before the next is spawned.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::ShardFailed`] if a child exits or stays silent
    /// during startup. Children already started are killed.
    pub async fn start_processes(
        &self,
        exe: &Path,
        verbose: u8,
    ) -> Result<SupervisorHandle, ProxyError> {
        let payload = serde_json::to_vec(&self.config).map_err(io::Error::from)?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut started = Vec::with_capacity(self.config.cluster.shards.len());
        for (index, identity) in self.config.cluster.shards.iter().enumerate() {
            let mut child = spawn_child(exe, index, verbose)?;
            let (mut stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
                (Some(stdin), Some(stdout)) => (stdin, stdout),
                _ => {
                    return Err(ProxyError::ShardFailed {
                        name: identity.name.clone(),
                        message: "child pipes unavailable".to_string(),
                    });
                }
            };

            write_frame(&mut stdin, &payload, CONTROL_FRAME_LIMIT).await?;
            let addr = await_ready(&identity.name, stdout).await?;
            info!(
                "Shard {} running as pid {:?} on {}",
                identity.name,
                child.id(),
                addr
            );
            started.push((index, identity.name.clone(), child, stdin, addr));
        }

        let mut shards = Vec::with_capacity(started.len());
        let mut addrs = Vec::with_capacity(started.len());
        let mut tasks = ShardTasks::new();
        for (index, name, child, stdin, addr) in started {
            shards.push(ShardIdentity::new(name.clone(), addr.port()));
            addrs.push(addr);
            tasks.spawn(supervise_child(index, name, child, stdin, shutdown_rx.clone()));
        }

        Ok(SupervisorHandle {
            shards,
            addrs,
            shutdown_tx: Arc::new(shutdown_tx),
            tasks,
        })
    }
}

/// A running set of shards.
pub struct SupervisorHandle {
    shards: Vec<ShardIdentity>,
    addrs: Vec<SocketAddr>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    tasks: ShardTasks,
}

impl SupervisorHandle {
    /// Shard identities with the ports actually bound.
    ///
    /// Names and order match the config, so routing is unchanged.
    pub fn shards(&self) -> &[ShardIdentity] {
        &self.shards
    }

    /// Bound listener addresses, in shard order.
    pub fn addrs(&self) -> &[SocketAddr] {
        &self.addrs
    }

    /// Sender that stops every shard when `true` is sent.
    pub fn shutdown_sender(&self) -> Arc<watch::Sender<bool>> {
        self.shutdown_tx.clone()
    }

    /// Ask every shard to stop.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Wait for every shard to stop.
    ///
    /// A shard that fails, or stops without being asked, triggers shutdown
    /// of all the others.
    ///
    /// # Errors
    ///
    /// Returns the first shard failure.
    pub async fn wait(mut self) -> Result<(), ProxyError> {
        let mut first_error = None;

        while let Some(joined) = self.tasks.join_next().await {
            let stopping = *self.shutdown_tx.borrow();
            let failure = match joined {
                Ok((index, Ok(()))) if stopping => {
                    debug!("Shard {} stopped", self.name(index));
                    None
                }
                Ok((index, Ok(()))) => Some(ProxyError::ShardFailed {
                    name: self.name(index),
                    message: "stopped unexpectedly".to_string(),
                }),
                Ok((_, Err(e))) => Some(e),
                Err(e) => Some(ProxyError::ShardFailed {
                    name: "unknown".to_string(),
                    message: e.to_string(),
                }),
            };

            if let Some(e) = failure {
                error!("{}; stopping all shards", e);
                self.shutdown_tx.send_replace(true);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn name(&self, index: usize) -> String {
        self.shards
            .get(index)
            .map(|s| s.name.clone())
            .unwrap_or_else(|| index.to_string())
    }
}

fn spawn_child(exe: &Path, index: usize, verbose: u8) -> Result<Child, ProxyError> {
    let mut cmd = Command::new(exe);
    if verbose > 0 {
        cmd.arg(format!("-{}", "v".repeat(verbose as usize)));
    }
    cmd.arg("internal-shard")
        .arg("--index")
        .arg(index.to_string())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    debug!("Spawning {:?}", cmd);
    Ok(cmd.spawn()?)
}

async fn await_ready(name: &str, stdout: ChildStdout) -> Result<SocketAddr, ProxyError> {
    let failed = |message: String| ProxyError::ShardFailed {
        name: name.to_string(),
        message,
    };

    let mut lines = BufReader::new(stdout).lines();
    let line = match tokio::time::timeout(CHILD_READY_TIMEOUT, lines.next_line()).await {
        Ok(Ok(Some(line))) => line,
        Ok(Ok(None)) => return Err(failed("exited during startup".to_string())),
        Ok(Err(e)) => return Err(failed(e.to_string())),
        Err(_) => return Err(failed("did not report ready in time".to_string())),
    };

    line.trim()
        .parse()
        .map_err(|_| failed(format!("reported an invalid address: {:?}", line)))
}

async fn supervise_child(
    index: usize,
    name: String,
    mut child: Child,
    stdin: ChildStdin,
    mut shutdown_rx: watch::Receiver<bool>,
) -> (usize, Result<(), ProxyError>) {
    // The select only yields owned values so no watch guard outlives it.
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        _ = async { let _ = shutdown_rx.wait_for(|stop| *stop).await; } => None,
    };

    let result = match exited {
        Some(status) => Err(ProxyError::ShardFailed {
            name: name.clone(),
            message: match status {
                Ok(status) => format!("exited with {}", status),
                Err(e) => e.to_string(),
            },
        }),
        None => {
            drop(stdin);
            stop_child(&name, &mut child).await
        }
    };
    (index, result)
}

async fn stop_child(name: &str, child: &mut Child) -> Result<(), ProxyError> {
    match tokio::time::timeout(CHILD_STOP_TIMEOUT, child.wait()).await {
        Ok(status) => {
            let status = status?;
            debug!("Shard {} exited with {}", name, status);
            Ok(())
        }
        Err(_) => {
            warn!("Shard {} did not stop in time, killing", name);
            child.start_kill()?;
            child.wait().await?;
            Ok(())
        }
    }
}

/// Run one shard as a supervised child.
///
/// Reads the config frame from `control`, binds the shard, and writes the
/// bound address as one line to `report`. Serves until `control` reaches
/// end of stream or the process is reparented.
///
/// # Errors
///
/// Returns any load, bind or TLS error before serving starts.
pub async fn run_child<R, W>(index: usize, mut control: R, mut report: W) -> Result<(), ProxyError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
{
    let payload = read_frame(&mut control, CONTROL_FRAME_LIMIT).await?;
    let config: Config = serde_json::from_slice(&payload).map_err(io::Error::from)?;

    let material = TlsMaterial::from_files(&config.tls.ca, &config.tls.cert, &config.tls.key)?;
    let origin = OriginClient::new(
        config.origin.address.clone(),
        &config.tls.server_name,
        &material,
        config.timeouts.to_timeouts().origin,
    )?;
    let audit = Arc::new(AuditLogger::from_config(config.general.audit_syslog));
    let state = ShardState::load(&config, index, Arc::new(origin), audit)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = ShardServer::bind(&config.cluster.bind_host, state, &material, shutdown_rx).await?;

    report
        .write_all(format!("{}\n", server.local_addr()?).as_bytes())
        .await?;
    report.flush().await?;

    let watchdog = tokio::spawn(watch_parent(control, shutdown_tx));
    let result = server.run().await;
    watchdog.abort();
    result
}

async fn watch_parent<R: AsyncRead + Unpin>(mut control: R, shutdown_tx: watch::Sender<bool>) {
    let parent = std::os::unix::process::parent_id();
    let mut interval = tokio::time::interval(PARENT_POLL_INTERVAL);
    let mut buf = [0u8; 64];

    loop {
        tokio::select! {
            read = control.read(&mut buf) => match read {
                Ok(0) | Err(_) => {
                    info!("Control channel closed");
                    break;
                }
                Ok(_) => {}
            },
            _ = interval.tick() => {
                if std::os::unix::process::parent_id() != parent {
                    warn!("Supervisor exited, shard was reparented");
                    break;
                }
            }
        }
    }

    shutdown_tx.send_replace(true);
}
