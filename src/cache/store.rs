//! Storage backend contract.
//!
//! Both page stores implement [`StorageBackend`]; the rest of the cache only
//! ever talks to the trait object chosen at startup.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use super::keys::CacheKey;

/// Failure talking to the underlying storage.
///
/// Callers in the request path treat every variant as non-fatal: a failed
/// read is a miss, a failed write is skipped, a failed delete leaves a stale
/// entry behind.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("blocking storage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("cache root `{0}` is not usable")]
    InvalidRoot(String),
}

/// Persists rendered page bodies by key.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short backend label used in logs and the `X-Cache` header.
    fn name(&self) -> &'static str;

    /// Return the stored body when present and not expired.
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, StorageError>;

    /// Store a body, replacing any previous entry.
    ///
    /// `ttl` of `None` means the backend default; backends without expiry
    /// ignore it.
    async fn put(&self, key: &CacheKey, body: Bytes, ttl: Option<Duration>)
    -> Result<(), StorageError>;

    /// Remove an entry. Removing an absent entry succeeds.
    async fn delete(&self, key: &CacheKey) -> Result<(), StorageError>;

    /// Remove every page this cache owns.
    async fn purge_all(&self) -> Result<(), StorageError>;

    /// Number of live entries, when the backend can report it cheaply.
    fn entry_count(&self) -> Option<usize> {
        None
    }
}
