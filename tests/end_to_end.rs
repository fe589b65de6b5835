//! Full-stack tests: client, shards and origin over mutual TLS on
//! ephemeral local ports.

use async_trait::async_trait;
use bytes::Bytes;
use shardproxy::cache::FillMode;
use shardproxy::client::ShardClient;
use shardproxy::config::Config;
use shardproxy::origin::{Catalog, ObjectSource, OriginClient, OriginReply, OriginServer};
use shardproxy::pki::DevCa;
use shardproxy::protocol::Reply;
use shardproxy::proxy::{ProxyError, TlsMaterial};
use shardproxy::rendezvous::{self, ShardIdentity};
use shardproxy::supervisor::{Supervisor, SupervisorHandle};
use shardproxy::telemetry::AuditLogger;
use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

/// Counts every fetch a shard sends to the origin.
struct CountingOrigin {
    inner: OriginClient,
    fetches: AtomicUsize,
}

#[async_trait]
impl ObjectSource for CountingOrigin {
    async fn fetch(&self, key: &str) -> Result<OriginReply, ProxyError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch(key).await
    }
}

struct Cluster {
    handle: SupervisorHandle,
    client: ShardClient,
    origin: Arc<CountingOrigin>,
    origin_shutdown: watch::Sender<bool>,
    _dir: TempDir,
}

impl Cluster {
    fn fetches(&self) -> usize {
        self.origin.fetches.load(Ordering::SeqCst)
    }

    async fn stop(self) {
        self.handle.shutdown();
        self.handle.wait().await.expect("Shards failed during shutdown");
        self.origin_shutdown.send_replace(true);
    }
}

fn object(key: &str, content: &'static str) -> Reply {
    Reply::Object {
        key: key.to_string(),
        content: Bytes::from_static(content.as_bytes()),
    }
}

async fn start_cluster(fill: FillMode) -> Cluster {
    let ca = DevCa::generate().expect("Failed to generate CA");
    let node = ca.issue_node().expect("Failed to issue node certificate");
    let material = TlsMaterial::from_issued(&ca, &node);

    let catalog = Catalog::from_entries([
        ("hello.txt", "hi there"),
        ("a.txt", "alpha"),
        ("secret.txt", "classified"),
    ]);
    let (origin_shutdown, origin_rx) = watch::channel(false);
    let origin_server = OriginServer::bind("127.0.0.1:0", catalog, &material, origin_rx)
        .await
        .expect("Failed to bind origin");
    let origin_addr = origin_server.local_addr().expect("Origin has no address");
    tokio::spawn(async move { origin_server.run().await });

    let dir = TempDir::new().expect("Failed to create temp dir");
    let blacklist = dir.path().join("blacklisted.txt");
    fs::write(&blacklist, "secret.txt\n").expect("Failed to write blacklist");

    let mut config = Config::default();
    config.cluster.shards = (1..=5)
        .map(|i| ShardIdentity::new(format!("shard-{}", i), 0))
        .collect();
    config.blacklist.path = blacklist;
    config.cache.fill = fill;
    config.origin.address = origin_addr.to_string();

    let origin = Arc::new(CountingOrigin {
        inner: OriginClient::new(
            origin_addr.to_string(),
            "localhost",
            &material,
            Duration::from_secs(5),
        )
        .expect("Failed to build origin client"),
        fetches: AtomicUsize::new(0),
    });

    let supervisor = Supervisor::new(config, Arc::new(AuditLogger::new_null()));
    let handle = supervisor
        .start(origin.clone(), &material)
        .await
        .expect("Failed to start shards");

    let client = ShardClient::new(
        "127.0.0.1",
        handle.shards().to_vec(),
        "localhost",
        &material,
        Duration::from_secs(10),
    )
    .expect("Failed to build client");

    Cluster {
        handle,
        client,
        origin,
        origin_shutdown,
        _dir: dir,
    }
}

#[tokio::test]
async fn test_blacklisted_key_denied_by_owner() {
    let cluster = start_cluster(FillMode::PerKey).await;

    let reply = cluster.client.fetch("secret.txt").await.unwrap();
    assert_eq!(reply, Reply::Denied);
    assert_eq!(reply.to_string(), "Access Denied.");
    assert_eq!(cluster.fetches(), 0);

    cluster.stop().await;
}

#[tokio::test]
async fn test_first_request_fills_cache_second_hits() {
    let cluster = start_cluster(FillMode::PerKey).await;

    let first = cluster.client.fetch("hello.txt").await.unwrap();
    assert_eq!(first.to_string(), "hello.txt: hi there");
    assert_eq!(cluster.fetches(), 1);

    let second = cluster.client.fetch("hello.txt").await.unwrap();
    assert_eq!(second, first);
    assert_eq!(cluster.fetches(), 1);

    cluster.stop().await;
}

#[tokio::test]
async fn test_missing_key_not_cached() {
    let cluster = start_cluster(FillMode::PerKey).await;

    for expected_fetches in 1..=2 {
        let reply = cluster.client.fetch("missing.txt").await.unwrap();
        assert_eq!(reply, Reply::NotFound);
        assert_eq!(reply.to_string(), "Access Denied. File does not exist.");
        assert_eq!(cluster.fetches(), expected_fetches);
    }

    cluster.stop().await;
}

/// Shards never check ownership. A request sent to the wrong shard is
/// answered from that shard's own blacklist slice and cache.
#[tokio::test]
async fn test_misrouted_request_is_served_not_rejected() {
    let cluster = start_cluster(FillMode::PerKey).await;
    let shards = cluster.handle.shards().to_vec();

    let owner = cluster.client.route("a.txt");
    assert_eq!(owner, rendezvous::select("a.txt", &shards));
    let other = (owner + 1) % shards.len();

    let routed = cluster.client.fetch("a.txt").await.unwrap();
    let misrouted = cluster.client.fetch_from(other, "a.txt").await.unwrap();
    assert_eq!(routed, object("a.txt", "alpha"));
    assert_eq!(misrouted, routed);
    // Each shard fills its own cache.
    assert_eq!(cluster.fetches(), 2);

    // The blacklist entry lives only in the owner's partition.
    let secret_owner = cluster.client.route("secret.txt");
    let bystander = (secret_owner + 1) % shards.len();
    assert_eq!(
        cluster.client.fetch_from(secret_owner, "secret.txt").await.unwrap(),
        Reply::Denied
    );
    assert_eq!(
        cluster.client.fetch_from(bystander, "secret.txt").await.unwrap(),
        object("secret.txt", "classified")
    );

    cluster.stop().await;
}

async fn concurrent_requests_fetch_once(fill: FillMode) {
    let cluster = start_cluster(fill).await;
    let client = cluster.client.clone();

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move { client.fetch("hello.txt").await }));
    }
    for task in tasks {
        let reply = task.await.unwrap().unwrap();
        assert_eq!(reply, object("hello.txt", "hi there"));
    }
    assert_eq!(cluster.fetches(), 1);

    cluster.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_fetch_once_per_key() {
    concurrent_requests_fetch_once(FillMode::PerKey).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_fetch_once_shard_wide() {
    concurrent_requests_fetch_once(FillMode::ShardWide).await;
}

#[tokio::test]
async fn test_client_from_foreign_ca_rejected() {
    let cluster = start_cluster(FillMode::PerKey).await;

    let rogue_ca = DevCa::generate().unwrap();
    let rogue = TlsMaterial::from_issued(&rogue_ca, &rogue_ca.issue_node().unwrap());
    let rogue_client = ShardClient::new(
        "127.0.0.1",
        cluster.handle.shards().to_vec(),
        "localhost",
        &rogue,
        Duration::from_secs(5),
    )
    .unwrap();

    assert!(rogue_client.fetch("hello.txt").await.is_err());
    assert_eq!(cluster.fetches(), 0);

    // The shard keeps serving trusted clients.
    let reply = cluster.client.fetch("hello.txt").await.unwrap();
    assert_eq!(reply, object("hello.txt", "hi there"));

    cluster.stop().await;
}

#[tokio::test]
async fn test_origin_down_replies_unavailable() {
    let cluster = start_cluster(FillMode::PerKey).await;
    cluster.origin_shutdown.send_replace(true);
    // Let the origin accept loop observe the signal and drop its listener.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let reply = cluster.client.fetch("hello.txt").await.unwrap();
    assert_eq!(reply, Reply::Unavailable);

    // Shards survive origin failures.
    let reply = cluster.client.fetch("secret.txt").await.unwrap();
    assert_eq!(reply, Reply::Denied);

    cluster.stop().await;
}
