//! Cache-aside reads of records owned by other services.
//!
//! `BatchResolver` reconciles a batch of ids against the cache and fills the gaps with one
//! catalog call; `CacheAside` does the same for a single id; `merge_write_through` folds
//! change events into cached entries.
use std::sync::Arc;

use thiserror::Error;

mod accessor;
mod config;
mod key;
mod memory;
mod merge;
mod redis_store;
mod resolver;
mod store;

pub use accessor::{AccessError, CacheAside, CacheResult};
pub use config::{CacheConfig, CacheStoreConfig};
pub use key::CacheKey;
pub use memory::{MemoryCacheCall, MemoryCacheStore};
pub use merge::{merge_write_through, MergeOutcome};
pub use redis_store::RedisCacheStore;
pub use resolver::{BatchResolver, Resolution, ResolveError, Resolved};
pub use store::CacheStore;

#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("cache operation timed out")]
    Timeout,
    #[error("invalid cache configuration: {0}")]
    InvalidConfiguration(String),
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Redis(#[from] Arc<::redis::RedisError>),
}

impl From<::redis::RedisError> for CacheError {
    fn from(err: ::redis::RedisError) -> Self {
        if err.is_timeout() {
            CacheError::Timeout
        } else {
            CacheError::Redis(Arc::new(err))
        }
    }
}

/// Where a returned value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    Cache,
    Remote,
}

impl std::fmt::Display for CacheSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheSource::Cache => write!(f, "cache"),
            CacheSource::Remote => write!(f, "remote"),
        }
    }
}
