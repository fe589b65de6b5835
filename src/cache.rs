//! Object cache with single-flight fills.
//!
//! The cache maps object keys to content fetched from the origin. Entries are
//! created by the first successful fetch and never updated or evicted.
//!
//! # Fill Guard
//!
//! Concurrent requests for the same uncached key must cause exactly one
//! origin fetch. Each key owns a `OnceCell`; the first requester runs the
//! fetch while later requesters for that key wait on the same cell and wake
//! up with its content. Misses on different keys fill in parallel.
//!
//! [`FillMode::ShardWide`] additionally serializes every fill in the shard
//! behind one async mutex, so at most one miss is being filled at a time
//! regardless of key.
//!
//! A fetch that ends in "not found" or an error leaves the key uncached, so
//! the next request for it fetches again.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, trace};

/// How concurrent cache misses are serialized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FillMode {
    /// One in-flight fill per key; different keys fill concurrently.
    #[default]
    PerKey,
    /// One in-flight fill per shard, whatever the key.
    ShardWide,
}

/// Result of [`ObjectCache::get_or_fill`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fill {
    /// The content was already cached, or another requester filled it.
    Cached(Bytes),
    /// This requester fetched the content and inserted it.
    Fetched(Bytes),
    /// The fetch reported that the object does not exist. Nothing was cached.
    NotFound,
}

impl Fill {
    /// Content for a successful lookup or fill.
    pub fn content(&self) -> Option<&Bytes> {
        match self {
            Fill::Cached(content) | Fill::Fetched(content) => Some(content),
            Fill::NotFound => None,
        }
    }
}

/// Internal failure of a single fill attempt.
enum Miss<E> {
    NotFound,
    Failed(E),
}

/// Append-only key to content store, shared by all handlers of one shard.
pub struct ObjectCache {
    entries: RwLock<HashMap<String, Arc<OnceCell<Bytes>>>>,
    mode: FillMode,
    shard_guard: Mutex<()>,
}

impl ObjectCache {
    /// Create an empty cache.
    pub fn new(mode: FillMode) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            mode,
            shard_guard: Mutex::new(()),
        }
    }

    /// The configured fill mode.
    pub fn mode(&self) -> FillMode {
        self.mode
    }

    /// Look up cached content.
    pub fn lookup(&self, key: &str) -> Option<Bytes> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .and_then(|cell| cell.get().cloned())
    }

    /// Insert content for `key`.
    ///
    /// Returns false, leaving the cache untouched, if the key already holds
    /// content. Handlers go through [`ObjectCache::get_or_fill`] instead.
    pub fn insert(&self, key: &str, content: Bytes) -> bool {
        self.cell(key).set(content).is_ok()
    }

    /// Number of cached objects.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return cached content for `key`, or run `fetch` once to fill it.
    ///
    /// `fetch` resolves to `Ok(Some(content))` for a found object,
    /// `Ok(None)` when the object does not exist and `Err` on failure.
    /// Concurrent callers for the same key share one fetch. Only found
    /// content is cached.
    ///
    /// # Errors
    ///
    /// Propagates the error of this caller's own fetch. A caller that was
    /// waiting on a failed fetch runs its own fetch in turn.
    pub async fn get_or_fill<F, Fut, E>(&self, key: &str, fetch: F) -> Result<Fill, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<Bytes>, E>>,
    {
        if let Some(content) = self.lookup(key) {
            trace!("Cache hit for '{}'", key);
            return Ok(Fill::Cached(content));
        }

        let _shard_guard = match self.mode {
            FillMode::ShardWide => Some(self.shard_guard.lock().await),
            FillMode::PerKey => None,
        };

        let cell = self.cell(key);
        let mut fetched = false;
        let fetched_flag = &mut fetched;

        let result = cell
            .get_or_try_init(|| async move {
                *fetched_flag = true;
                debug!("Cache miss for '{}', filling", key);
                match fetch().await {
                    Ok(Some(content)) => Ok(content),
                    Ok(None) => Err(Miss::NotFound),
                    Err(e) => Err(Miss::Failed(e)),
                }
            })
            .await
            .cloned();

        match result {
            Ok(content) if fetched => Ok(Fill::Fetched(content)),
            Ok(content) => Ok(Fill::Cached(content)),
            Err(miss) => {
                self.discard_empty(key, &cell);
                match miss {
                    Miss::NotFound => Ok(Fill::NotFound),
                    Miss::Failed(e) => Err(e),
                }
            }
        }
    }

    /// Get or create the cell for `key`.
    fn cell(&self, key: &str) -> Arc<OnceCell<Bytes>> {
        if let Some(cell) = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
        {
            return cell.clone();
        }

        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    /// Drop an empty cell left behind by a failed fill.
    ///
    /// Only removed when no other requester still holds it; new holders can
    /// only clone it under the map lock, so the count check is stable here.
    fn discard_empty(&self, key: &str, cell: &Arc<OnceCell<Bytes>>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let removable = entries
            .get(key)
            .is_some_and(|c| Arc::ptr_eq(c, cell) && !c.initialized() && Arc::strong_count(c) == 2);
        if removable {
            entries.remove(key);
        }
    }
}

impl Default for ObjectCache {
    fn default() -> Self {
        Self::new(FillMode::default())
    }
}
