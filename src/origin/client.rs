//! TLS client for the origin server.

use super::{ObjectSource, OriginReply};
use crate::protocol::{MAX_FRAME_LEN, read_frame, write_key};
use crate::proxy::error::ProxyError;
use crate::proxy::tls::{TlsMaterial, create_tls_connector, to_server_name};
use async_trait::async_trait;
use rustls_pki_types::ServerName;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, trace};

/// Fetches objects from the origin, one TLS connection per request.
#[derive(Clone)]
pub struct OriginClient {
    addr: String,
    server_name: ServerName<'static>,
    connector: TlsConnector,
    timeout: Duration,
}

impl OriginClient {
    /// Create a client for the origin at `addr`.
    ///
    /// `server_name` is the name the origin certificate must carry.
    /// `timeout` bounds the whole round trip, connect included.
    pub fn new(
        addr: impl Into<String>,
        server_name: &str,
        material: &TlsMaterial,
        timeout: Duration,
    ) -> Result<Self, ProxyError> {
        Ok(Self {
            addr: addr.into(),
            server_name: to_server_name(server_name)?,
            connector: create_tls_connector(material)?,
            timeout,
        })
    }

    /// The origin address.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn round_trip(&self, key: &str) -> Result<OriginReply, ProxyError> {
        let tcp = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| ProxyError::Connect {
                addr: self.addr.clone(),
                message: e.to_string(),
            })?;

        let mut stream = self
            .connector
            .connect(self.server_name.clone(), tcp)
            .await
            .map_err(|e| ProxyError::Tls(format!("Origin handshake failed: {}", e)))?;

        write_key(&mut stream, key).await?;
        let payload = read_frame(&mut stream, MAX_FRAME_LEN).await?;

        if let Err(e) = stream.shutdown().await {
            trace!("Origin connection shutdown: {}", e);
        }

        Ok(OriginReply::decode(payload))
    }
}

#[async_trait]
impl ObjectSource for OriginClient {
    async fn fetch(&self, key: &str) -> Result<OriginReply, ProxyError> {
        debug!("Fetching '{}' from origin {}", key, self.addr);
        tokio::time::timeout(self.timeout, self.round_trip(key))
            .await
            .map_err(|_| ProxyError::Timeout("origin round trip"))?
    }
}

impl std::fmt::Debug for OriginClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OriginClient")
            .field("addr", &self.addr)
            .field("server_name", &self.server_name)
            .field("timeout", &self.timeout)
            .finish()
    }
}
