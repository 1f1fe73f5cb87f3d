use std::sync::Arc;

use common_catalog::{CatalogClient, CatalogEntity, CatalogError};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{CacheConfig, CacheSource, CacheStore};

#[derive(Error, Debug)]
pub enum AccessError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },
    #[error("catalog lookup failed: {0}")]
    Catalog(#[from] CatalogError),
}

#[derive(Debug, Clone)]
pub struct CacheResult<T> {
    pub value: T,
    pub source: CacheSource,
}

impl<T> CacheResult<T> {
    pub fn was_cached(&self) -> bool {
        self.source == CacheSource::Cache
    }
}

/// Single-id cache-aside reads of `T`.
///
/// Cache read problems (unavailable store, corrupt entry) fall back to the catalog. A catalog
/// "not found" is never cached, so lookups of a missing id always reach the catalog.
pub struct CacheAside<T: CatalogEntity> {
    store: Arc<dyn CacheStore>,
    catalog: Arc<dyn CatalogClient<T>>,
    config: CacheConfig,
}

impl<T: CatalogEntity> Clone for CacheAside<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            catalog: self.catalog.clone(),
            config: self.config.clone(),
        }
    }
}

impl<T: CatalogEntity> CacheAside<T> {
    pub fn new(
        store: Arc<dyn CacheStore>,
        catalog: Arc<dyn CatalogClient<T>>,
        config: CacheConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            config,
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<CacheResult<T>, AccessError> {
        let key = self.config.key::<T>(id);
        let labels = |source: &str| {
            [
                ("kind".to_string(), T::KIND.to_string()),
                ("source".to_string(), source.to_string()),
            ]
        };

        match self.store.get(&key).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<T>(&bytes) {
                Ok(value) => {
                    debug!(key = %key, "cache hit");
                    common_metrics::inc("cache_accessor_lookups_total", &labels("cache"), 1);
                    return Ok(CacheResult {
                        value,
                        source: CacheSource::Cache,
                    });
                }
                Err(e) => warn!(key = %key, error = %e, "corrupt cache entry, refetching"),
            },
            Ok(None) => debug!(key = %key, "cache miss"),
            Err(e) => warn!(key = %key, error = %e, "cache read failed, falling back to catalog"),
        }

        let value = self.catalog.get_one(id).await.map_err(|e| match e {
            CatalogError::NotFound { kind, id } => AccessError::NotFound { kind, id },
            other => AccessError::Catalog(other),
        })?;
        common_metrics::inc("cache_accessor_lookups_total", &labels("remote"), 1);

        match serde_json::to_vec(&value) {
            Ok(bytes) => {
                if let Err(e) = self.store.set(&key, bytes, self.config.ttl).await {
                    warn!(key = %key, error = %e, "failed to write record to cache");
                }
            }
            Err(e) => warn!(key = %key, error = %e, "could not serialize record for cache"),
        }

        Ok(CacheResult {
            value,
            source: CacheSource::Remote,
        })
    }

    /// `Ok(false)` only when the catalog says the record does not exist.
    pub async fn exists(&self, id: Uuid) -> Result<bool, AccessError> {
        match self.get(id).await {
            Ok(_) => Ok(true),
            Err(AccessError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
