//! The authoritative object store behind the shards.
//!
//! Shards fill their caches from an [`ObjectSource`]. In a deployment that is
//! an [`OriginClient`] talking to an [`OriginServer`] over mutually
//! authenticated TLS; tests can plug a [`Catalog`] in directly.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────┐  key   ┌──────────────┐  key   ┌──────────────┐
//! │  Shard  │───────▶│ OriginClient │───────▶│ OriginServer │
//! │ (cache) │◀───────│  (one conn   │◀───────│  (Catalog)   │
//! └─────────┘ reply  │ per request) │  body  └──────────────┘
//!                    └──────────────┘
//! ```
//!
//! The origin answers each key with the raw content or with the literal
//! `"File does not exist."`.

mod catalog;
mod client;
mod server;

pub use catalog::Catalog;
pub use client::OriginClient;
pub use server::OriginServer;

use crate::protocol::ORIGIN_NOT_FOUND;
use crate::proxy::error::ProxyError;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Result of an origin lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginReply {
    /// The object content.
    Found(Bytes),
    /// The origin does not hold the key.
    NotFound,
}

impl OriginReply {
    /// Decode an origin response payload.
    ///
    /// Only the exact sentinel means "not found"; anything else, including
    /// an empty payload, is content.
    pub fn decode(payload: Bytes) -> Self {
        if payload == ORIGIN_NOT_FOUND.as_bytes() {
            OriginReply::NotFound
        } else {
            OriginReply::Found(payload)
        }
    }

    /// Encode the response payload.
    pub fn encode(&self) -> Bytes {
        match self {
            OriginReply::Found(content) => content.clone(),
            OriginReply::NotFound => Bytes::from_static(ORIGIN_NOT_FOUND.as_bytes()),
        }
    }

    /// Content for a found object.
    pub fn into_content(self) -> Option<Bytes> {
        match self {
            OriginReply::Found(content) => Some(content),
            OriginReply::NotFound => None,
        }
    }
}

/// Something shards can fetch objects from.
#[async_trait]
pub trait ObjectSource: Send + Sync {
    /// Fetch the content for `key`.
    ///
    /// # Errors
    ///
    /// Returns an error when the source cannot be reached or answers with a
    /// malformed response. "Not found" is not an error.
    async fn fetch(&self, key: &str) -> Result<OriginReply, ProxyError>;
}

#[async_trait]
impl<T: ObjectSource + ?Sized> ObjectSource for Arc<T> {
    async fn fetch(&self, key: &str) -> Result<OriginReply, ProxyError> {
        (**self).fetch(key).await
    }
}
