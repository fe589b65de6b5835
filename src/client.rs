//! Client side of the cluster.
//!
//! A client holds the same ordered shard list as the supervisor and routes
//! each key with [`rendezvous::select`]. There is no redirect between shards:
//! the client connects straight to the owner's port.

use crate::protocol::{Reply, read_reply, write_key};
use crate::proxy::error::ProxyError;
use crate::proxy::tls::{TlsMaterial, create_tls_connector, to_server_name};
use crate::rendezvous::{self, ShardIdentity};
use rustls_pki_types::ServerName;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, trace};

/// Routes requests to shards over mutually authenticated TLS.
#[derive(Clone)]
pub struct ShardClient {
    host: String,
    shards: Vec<ShardIdentity>,
    server_name: ServerName<'static>,
    connector: TlsConnector,
    timeout: Duration,
}

impl ShardClient {
    /// Create a client for `shards` reachable on `host`.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty shard list or unusable TLS material.
    pub fn new(
        host: impl Into<String>,
        shards: Vec<ShardIdentity>,
        server_name: &str,
        material: &TlsMaterial,
        timeout: Duration,
    ) -> Result<Self, ProxyError> {
        if shards.is_empty() {
            return Err(ProxyError::UnknownShard(0));
        }
        Ok(Self {
            host: host.into(),
            shards,
            server_name: to_server_name(server_name)?,
            connector: create_tls_connector(material)?,
            timeout,
        })
    }

    /// The shard list this client routes over.
    pub fn shards(&self) -> &[ShardIdentity] {
        &self.shards
    }

    /// Index of the shard that owns `key`.
    pub fn route(&self, key: &str) -> usize {
        rendezvous::select(key, &self.shards)
    }

    /// Request `key` from the shard that owns it.
    pub async fn fetch(&self, key: &str) -> Result<Reply, ProxyError> {
        self.fetch_from(self.route(key), key).await
    }

    /// Request `key` from shard `index`, owner or not.
    ///
    /// Shards do not check ownership, so a misrouted request is answered
    /// from the receiving shard's own blacklist slice and cache.
    pub async fn fetch_from(&self, index: usize, key: &str) -> Result<Reply, ProxyError> {
        let shard = self
            .shards
            .get(index)
            .ok_or(ProxyError::UnknownShard(index))?;
        let addr = format!("{}:{}", self.host, shard.port);
        debug!("Requesting '{}' from {} at {}", key, shard.name, addr);

        tokio::time::timeout(self.timeout, self.round_trip(&addr, key))
            .await
            .map_err(|_| ProxyError::Timeout("shard round trip"))?
    }

    async fn round_trip(&self, addr: &str, key: &str) -> Result<Reply, ProxyError> {
        let tcp = TcpStream::connect(addr)
            .await
            .map_err(|e| ProxyError::Connect {
                addr: addr.to_string(),
                message: e.to_string(),
            })?;

        let mut stream = self
            .connector
            .connect(self.server_name.clone(), tcp)
            .await
            .map_err(|e| ProxyError::Tls(format!("Shard handshake failed: {}", e)))?;

        write_key(&mut stream, key).await?;
        let reply = read_reply(&mut stream, key).await?;

        if let Err(e) = stream.shutdown().await {
            trace!("Shard connection shutdown: {}", e);
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pki::DevCa;

    fn client(shards: Vec<ShardIdentity>) -> Result<ShardClient, ProxyError> {
        let ca = DevCa::generate().unwrap();
        let material = TlsMaterial::from_issued(&ca, &ca.issue_node().unwrap());
        ShardClient::new(
            "127.0.0.1",
            shards,
            "localhost",
            &material,
            Duration::from_secs(1),
        )
    }

    #[test]
    fn test_route_matches_selector() {
        let shards: Vec<_> = (1..=5)
            .map(|i| ShardIdentity::new(format!("shard-{}", i), 9000 + i))
            .collect();
        let client = client(shards.clone()).unwrap();

        for key in ["a.txt", "hello.txt", "missing.txt", "", "ünïcode"] {
            assert_eq!(client.route(key), rendezvous::select(key, &shards));
        }
    }

    #[test]
    fn test_empty_shard_list_rejected() {
        assert!(client(Vec::new()).is_err());
    }

    #[tokio::test]
    async fn test_fetch_from_unknown_index() {
        let client = client(vec![ShardIdentity::new("only", 9001)]).unwrap();
        let result = client.fetch_from(3, "a.txt").await;
        assert!(matches!(result, Err(ProxyError::UnknownShard(3))));
    }

    #[tokio::test]
    async fn test_fetch_connection_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = client(vec![ShardIdentity::new("gone", port)]).unwrap();
        let result = client.fetch("a.txt").await;
        assert!(matches!(result, Err(ProxyError::Connect { .. })));
    }
}
