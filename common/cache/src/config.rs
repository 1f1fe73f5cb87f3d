use std::fmt;
use std::time::Duration;

use common_catalog::CatalogEntity;
use envconfig::Envconfig;

use crate::CacheKey;

#[derive(Envconfig, Clone, Debug)]
pub struct CacheStoreConfig {
    #[envconfig(default = "redis://localhost:6379/")]
    pub redis_url: String,

    #[envconfig(default = "100")]
    pub redis_response_timeout_ms: u64,

    #[envconfig(default = "1000")]
    pub redis_connection_timeout_ms: u64,

    // 24h
    #[envconfig(default = "86400")]
    pub cache_ttl_seconds: u64,

    #[envconfig(default = "")]
    pub cache_prefix: String,
}

impl CacheStoreConfig {
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            prefix: self.cache_prefix.clone(),
            ttl: Duration::from_secs(self.cache_ttl_seconds),
        }
    }
}

/// Key namespace and entry TTL shared by the resolver, the accessor and write-through.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub prefix: String,
    pub ttl: Duration,
}

impl CacheConfig {
    pub fn new(ttl: Duration) -> Self {
        Self {
            prefix: String::new(),
            ttl,
        }
    }

    pub fn key<T: CatalogEntity>(&self, id: impl fmt::Display) -> CacheKey {
        CacheKey::with_prefix(&self.prefix, T::KIND, id)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(24 * 60 * 60))
    }
}
