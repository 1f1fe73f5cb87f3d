use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use common_catalog::{CatalogClient, CatalogEntity, CatalogError};
use thiserror::Error;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::{CacheConfig, CacheError, CacheKey, CacheSource, CacheStore};

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("cache lookup failed: {0}")]
    Cache(#[from] CacheError),
    #[error("catalog lookup failed: {0}")]
    Catalog(#[source] Arc<CatalogError>),
    #[error("{} record(s) not found", .0.len())]
    NotFound(Vec<Uuid>),
}

/// Outcome for one input position.
#[derive(Debug, Clone)]
pub enum Resolved<T> {
    Hit { entity: T, source: CacheSource },
    /// The catalog answered but did not return this id.
    NotFound,
    /// The catalog call failed; the id may or may not exist.
    Failed(Arc<CatalogError>),
}

impl<T> Resolved<T> {
    pub fn entity(&self) -> Option<&T> {
        match self {
            Resolved::Hit { entity, .. } => Some(entity),
            _ => None,
        }
    }

    pub fn source(&self) -> Option<CacheSource> {
        match self {
            Resolved::Hit { source, .. } => Some(*source),
            _ => None,
        }
    }
}

/// Result of `resolve_many`, positionally aligned with the requested ids.
#[derive(Debug)]
pub struct Resolution<T> {
    ids: Vec<Uuid>,
    entries: Vec<Resolved<T>>,
}

impl<T> Resolution<T> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Resolved<T>] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&Resolved<T>> {
        self.entries.get(index)
    }

    /// Pairs of requested id and outcome, in request order.
    pub fn iter(&self) -> impl Iterator<Item = (&Uuid, &Resolved<T>)> {
        self.ids.iter().zip(self.entries.iter())
    }

    /// Every entity in request order, or the first reason one is missing. A failed catalog
    /// call wins over not-found ids since the latter may be an artifact of the former.
    pub fn require_all(self) -> Result<Vec<T>, ResolveError> {
        let mut missing = Vec::new();
        let mut entities = Vec::with_capacity(self.entries.len());

        for (id, entry) in self.ids.into_iter().zip(self.entries) {
            match entry {
                Resolved::Hit { entity, .. } => entities.push(entity),
                Resolved::NotFound => missing.push(id),
                Resolved::Failed(err) => return Err(ResolveError::Catalog(err)),
            }
        }

        if missing.is_empty() {
            Ok(entities)
        } else {
            Err(ResolveError::NotFound(missing))
        }
    }
}

/// Batch cache-aside reads of `T`.
///
/// One `mget` for every requested id, then a single `get_many` for the misses. Fetched records
/// are written back with one `mset`, best-effort. A failing `mget` fails the whole call; a
/// failing `get_many` marks only the missing positions as `Failed`.
pub struct BatchResolver<T: CatalogEntity> {
    store: Arc<dyn CacheStore>,
    catalog: Arc<dyn CatalogClient<T>>,
    config: CacheConfig,
}

impl<T: CatalogEntity> Clone for BatchResolver<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            catalog: self.catalog.clone(),
            config: self.config.clone(),
        }
    }
}

impl<T: CatalogEntity> BatchResolver<T> {
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

    pub async fn resolve_many(&self, ids: &[Uuid]) -> Result<Resolution<T>, ResolveError> {
        let labels = [("kind".to_string(), T::KIND.to_string())];
        if ids.is_empty() {
            return Ok(Resolution {
                ids: vec![],
                entries: vec![],
            });
        }

        let keys: Vec<CacheKey> = ids.iter().map(|id| self.config.key::<T>(id)).collect();
        let cached = self.store.mget(&keys).await.map_err(|e| {
            error!(kind = T::KIND, error = %e, "batch cache lookup failed");
            ResolveError::Cache(e)
        })?;
        if cached.len() != ids.len() {
            error!(
                kind = T::KIND,
                requested = ids.len(),
                returned = cached.len(),
                "batch cache lookup returned a misaligned result"
            );
            return Err(ResolveError::Cache(CacheError::Unavailable(format!(
                "mget returned {} entries for {} keys",
                cached.len(),
                ids.len()
            ))));
        }

        let mut entries: Vec<Option<Resolved<T>>> = Vec::with_capacity(ids.len());
        let mut missing: Vec<usize> = Vec::new();

        for (index, raw) in cached.into_iter().enumerate() {
            let Some(bytes) = raw else {
                missing.push(index);
                entries.push(None);
                continue;
            };

            match serde_json::from_slice::<T>(&bytes) {
                Ok(entity) if entity.entity_id() == ids[index] => entries.push(Some(Resolved::Hit {
                    entity,
                    source: CacheSource::Cache,
                })),
                Ok(_) => {
                    warn!(key = %keys[index], "cached entry belongs to another id, refetching");
                    common_metrics::inc("cache_resolver_corrupt_total", &labels, 1);
                    missing.push(index);
                    entries.push(None);
                }
                Err(e) => {
                    warn!(key = %keys[index], error = %e, "corrupt cache entry, refetching");
                    common_metrics::inc("cache_resolver_corrupt_total", &labels, 1);
                    missing.push(index);
                    entries.push(None);
                }
            }
        }

        let hits = ids.len() - missing.len();
        common_metrics::inc("cache_resolver_hits_total", &labels, hits as u64);
        common_metrics::inc("cache_resolver_misses_total", &labels, missing.len() as u64);

        if missing.is_empty() {
            debug!(kind = T::KIND, count = ids.len(), "all records served from cache");
            return Ok(Resolution {
                ids: ids.to_vec(),
                entries: entries.into_iter().flatten().collect(),
            });
        }

        // Duplicated ids are still filled independently below, but fetched once.
        let mut seen = HashSet::new();
        let to_fetch: Vec<Uuid> = missing
            .iter()
            .map(|&index| ids[index])
            .filter(|id| seen.insert(*id))
            .collect();

        debug!(
            kind = T::KIND,
            cached = hits,
            requested = ids.len(),
            fetching = to_fetch.len(),
            "resolving cache misses remotely"
        );
        common_metrics::inc("cache_resolver_remote_fetches_total", &labels, 1);

        match self.catalog.get_many(&to_fetch).await {
            Ok(records) => {
                let fetched: HashMap<Uuid, T> = records
                    .into_iter()
                    .map(|record| (record.entity_id(), record))
                    .collect();

                for &index in &missing {
                    entries[index] = Some(match fetched.get(&ids[index]) {
                        Some(entity) => Resolved::Hit {
                            entity: entity.clone(),
                            source: CacheSource::Remote,
                        },
                        None => Resolved::NotFound,
                    });
                }

                self.write_through(fetched.into_values()).await;
            }
            Err(e) => {
                error!(kind = T::KIND, error = %e, "catalog batch lookup failed");
                let err = Arc::new(e);
                for &index in &missing {
                    entries[index] = Some(Resolved::Failed(err.clone()));
                }
            }
        }

        Ok(Resolution {
            ids: ids.to_vec(),
            entries: entries.into_iter().flatten().collect(),
        })
    }

    async fn write_through(&self, records: impl Iterator<Item = T>) {
        let mut batch = Vec::new();
        for record in records {
            let key = self.config.key::<T>(record.entity_id());
            match serde_json::to_vec(&record) {
                Ok(bytes) => batch.push((key, bytes)),
                Err(e) => warn!(key = %key, error = %e, "could not serialize record for cache"),
            }
        }

        if let Err(e) = self.store.mset(batch, self.config.ttl).await {
            warn!(kind = T::KIND, error = %e, "failed to write fetched records to cache");
            common_metrics::inc(
                "cache_write_through_failures_total",
                &[("kind".to_string(), T::KIND.to_string())],
                1,
            );
        }
    }
}
