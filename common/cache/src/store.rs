use std::time::Duration;

use async_trait::async_trait;

use crate::{CacheError, CacheKey};

/// A key/value store with per-key TTL. Values are opaque bytes.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// `Ok(None)` on a miss.
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError>;

    /// One round-trip; the result is aligned with `keys`. Empty input returns empty without I/O.
    async fn mget(&self, keys: &[CacheKey]) -> Result<Vec<Option<Vec<u8>>>, CacheError>;

    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// One round-trip storing every entry with the same TTL. Empty input is a no-op.
    async fn mset(&self, entries: Vec<(CacheKey, Vec<u8>)>, ttl: Duration)
        -> Result<(), CacheError>;
}
