//! Origin server.
//!
//! Serves a [`Catalog`] over mutually authenticated TLS, one request per
//! connection. Each connection is handled in a separate Tokio task.

use super::{Catalog, OriginReply};
use crate::protocol::{MAX_FRAME_LEN, read_key, write_frame};
use crate::proxy::error::ProxyError;
use crate::proxy::tls::{TlsMaterial, create_tls_acceptor};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

/// Default bound on TLS handshake plus key read.
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// The origin server.
pub struct OriginServer {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    catalog: Arc<Catalog>,
    served: Arc<AtomicU64>,
    read_timeout: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl OriginServer {
    /// Bind the origin listener.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Bind`] if the address is unavailable, or a TLS
    /// error if the material is unusable.
    pub async fn bind(
        addr: &str,
        catalog: Catalog,
        material: &TlsMaterial,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<Self, ProxyError> {
        let acceptor = create_tls_acceptor(material)?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ProxyError::Bind {
                addr: addr.to_string(),
                source,
            })?;

        info!("Origin listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            acceptor,
            catalog: Arc::new(catalog),
            served: Arc::new(AtomicU64::new(0)),
            read_timeout: DEFAULT_READ_TIMEOUT,
            shutdown_rx,
        })
    }

    /// Set the bound on handshake plus key read per connection.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ProxyError> {
        Ok(self.listener.local_addr()?)
    }

    /// Number of requests answered so far, "not found" included.
    pub fn requests_served(&self) -> u64 {
        self.served.load(Ordering::SeqCst)
    }

    /// Run the accept loop until the shutdown signal is received.
    pub async fn run(&self) -> Result<(), ProxyError> {
        let mut shutdown_rx = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => {
                            debug!("Origin accepted connection from {}", peer);
                            self.spawn_connection_handler(stream, peer);
                        }
                        Err(e) => {
                            warn!("Failed to accept connection: {}", e);
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Origin shutting down");
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    fn spawn_connection_handler(&self, stream: TcpStream, peer: SocketAddr) {
        let acceptor = self.acceptor.clone();
        let catalog = self.catalog.clone();
        let served = self.served.clone();
        let read_timeout = self.read_timeout;

        tokio::spawn(async move {
            let result: Result<(), ProxyError> = async {
                let tls = tokio::time::timeout(read_timeout, acceptor.accept(stream))
                    .await
                    .map_err(|_| ProxyError::Timeout("origin handshake"))?
                    .map_err(|e| ProxyError::Tls(format!("Handshake with {} failed: {}", peer, e)))?;
                serve_request(tls, &catalog, read_timeout).await
            }
            .await;

            match result {
                Ok(()) => {
                    served.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) if e.is_disconnect() => debug!("Origin connection ended: {}", e),
                Err(e) => warn!("Origin connection error: {}", e),
            }
        });
    }
}

/// Answer a single request on an established channel.
async fn serve_request<S>(
    mut stream: S,
    catalog: &Catalog,
    read_timeout: Duration,
) -> Result<(), ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let key = tokio::time::timeout(read_timeout, read_key(&mut stream))
        .await
        .map_err(|_| ProxyError::Timeout("origin key read"))??;

    let reply = match catalog.get(&key).await? {
        Some(content) => OriginReply::Found(truncate(&key, content)),
        None => {
            debug!("Origin has no object '{}'", key);
            OriginReply::NotFound
        }
    };

    write_frame(&mut stream, &reply.encode(), MAX_FRAME_LEN).await?;
    stream.shutdown().await?;
    Ok(())
}

fn truncate(key: &str, content: Bytes) -> Bytes {
    if content.len() > MAX_FRAME_LEN {
        warn!(
            "Object '{}' is {} bytes, truncating to {}",
            key,
            content.len(),
            MAX_FRAME_LEN
        );
        content.slice(..MAX_FRAME_LEN)
    } else {
        content
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::read_frame;

    #[tokio::test]
    async fn test_serve_found() {
        let catalog = Catalog::from_entries([("hello.txt", "hi there")]);
        let (mut client, server) = tokio::io::duplex(4096);

        let task = tokio::spawn(async move {
            serve_request(server, &catalog, Duration::from_secs(1)).await
        });

        crate::protocol::write_key(&mut client, "hello.txt").await.unwrap();
        let reply = read_frame(&mut client, MAX_FRAME_LEN).await.unwrap();
        assert_eq!(&reply[..], b"hi there");
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_serve_not_found() {
        let catalog = Catalog::from_entries(Vec::<(String, Bytes)>::new());
        let (mut client, server) = tokio::io::duplex(4096);

        let task = tokio::spawn(async move {
            serve_request(server, &catalog, Duration::from_secs(1)).await
        });

        crate::protocol::write_key(&mut client, "missing.txt").await.unwrap();
        let reply = read_frame(&mut client, MAX_FRAME_LEN).await.unwrap();
        assert_eq!(&reply[..], b"File does not exist.");
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_serve_read_timeout() {
        let catalog = Catalog::from_entries([("a", "b")]);
        let (_client, server) = tokio::io::duplex(64);
        let result = serve_request(server, &catalog, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(ProxyError::Timeout(_))));
    }

    #[test]
    fn test_truncate_oversized() {
        let big = Bytes::from(vec![b'x'; MAX_FRAME_LEN + 100]);
        assert_eq!(truncate("big", big).len(), MAX_FRAME_LEN);
        let small = Bytes::from_static(b"small");
        assert_eq!(truncate("small", small.clone()), small);
    }

    #[tokio::test]
    async fn test_run_stops_when_sender_dropped() {
        let ca = crate::pki::DevCa::generate().unwrap();
        let material = TlsMaterial::from_issued(&ca, &ca.issue_node().unwrap());
        let (tx, rx) = watch::channel(false);
        let catalog = Catalog::from_entries([("a", "b")]);
        let server = OriginServer::bind("127.0.0.1:0", catalog, &material, rx)
            .await
            .unwrap();

        drop(tx);
        let result = tokio::time::timeout(Duration::from_secs(2), server.run()).await;
        assert!(matches!(result, Ok(Ok(()))));
    }
}
