use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::{CacheError, CacheKey, CacheStore};

#[derive(Debug, Clone, PartialEq)]
pub enum MemoryCacheCall {
    Get(String),
    MGet(Vec<String>),
    Set { key: String, ttl: Duration },
    MSet { keys: Vec<String>, ttl: Duration },
}

#[derive(Default)]
struct Failures {
    get: Option<CacheError>,
    mget: Option<CacheError>,
    set: Option<CacheError>,
    mset: Option<CacheError>,
}

/// An in-process `CacheStore` honouring TTLs. Records every call and can be primed to fail,
/// which makes it the stand-in for redis in tests and single-process setups.
#[derive(Clone, Default)]
pub struct MemoryCacheStore {
    entries: Arc<Mutex<HashMap<String, (Vec<u8>, Instant)>>>,
    failures: Arc<Mutex<Failures>>,
    calls: Arc<Mutex<Vec<MemoryCacheCall>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store raw bytes without recording a call.
    pub fn insert_raw(&self, key: &CacheKey, value: Vec<u8>, ttl: Duration) {
        lock(&self.entries).insert(key.to_string(), (value, Instant::now() + ttl));
    }

    /// Current live value, without recording a call.
    pub fn peek(&self, key: &CacheKey) -> Option<Vec<u8>> {
        self.live(key.as_str())
    }

    pub fn fail_get(self, err: CacheError) -> Self {
        lock(&self.failures).get = Some(err);
        self
    }

    pub fn fail_mget(self, err: CacheError) -> Self {
        lock(&self.failures).mget = Some(err);
        self
    }

    pub fn fail_set(self, err: CacheError) -> Self {
        lock(&self.failures).set = Some(err);
        self
    }

    pub fn fail_mset(self, err: CacheError) -> Self {
        lock(&self.failures).mset = Some(err);
        self
    }

    pub fn get_calls(&self) -> Vec<MemoryCacheCall> {
        lock(&self.calls).clone()
    }

    fn record(&self, call: MemoryCacheCall) {
        lock(&self.calls).push(call);
    }

    fn live(&self, key: &str) -> Option<Vec<u8>> {
        let mut entries = lock(&self.entries);
        match entries.get(key) {
            Some((_, expires_at)) if *expires_at <= Instant::now() => {
                entries.remove(key);
                None
            }
            Some((value, _)) => Some(value.clone()),
            None => None,
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError> {
        self.record(MemoryCacheCall::Get(key.to_string()));
        if let Some(err) = lock(&self.failures).get.clone() {
            return Err(err);
        }
        Ok(self.live(key.as_str()))
    }

    async fn mget(&self, keys: &[CacheKey]) -> Result<Vec<Option<Vec<u8>>>, CacheError> {
        if keys.is_empty() {
            return Ok(vec![]);
        }
        self.record(MemoryCacheCall::MGet(
            keys.iter().map(ToString::to_string).collect(),
        ));
        if let Some(err) = lock(&self.failures).mget.clone() {
            return Err(err);
        }
        Ok(keys.iter().map(|key| self.live(key.as_str())).collect())
    }

    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.record(MemoryCacheCall::Set {
            key: key.to_string(),
            ttl,
        });
        if let Some(err) = lock(&self.failures).set.clone() {
            return Err(err);
        }
        self.insert_raw(key, value, ttl);
        Ok(())
    }

    async fn mset(
        &self,
        entries: Vec<(CacheKey, Vec<u8>)>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        if entries.is_empty() {
            return Ok(());
        }
        self.record(MemoryCacheCall::MSet {
            keys: entries.iter().map(|(key, _)| key.to_string()).collect(),
            ttl,
        });
        if let Some(err) = lock(&self.failures).mset.clone() {
            return Err(err);
        }
        for (key, value) in entries {
            self.insert_raw(&key, value, ttl);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mget_is_aligned_with_keys() {
        let store = MemoryCacheStore::new();
        let a = CacheKey::new("product", "a");
        let b = CacheKey::new("product", "b");
        store.insert_raw(&b, b"B".to_vec(), Duration::from_secs(60));

        let values = store.mget(&[a.clone(), b.clone(), a]).await.unwrap();

        assert_eq!(values, vec![None, Some(b"B".to_vec()), None]);
    }

    #[tokio::test]
    async fn expired_entries_are_misses() {
        let store = MemoryCacheStore::new();
        let key = CacheKey::new("user", "1");
        store.insert_raw(&key, b"{}".to_vec(), Duration::ZERO);

        assert_eq!(store.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn empty_batches_do_no_io() {
        let store = MemoryCacheStore::new();

        assert!(store.mget(&[]).await.unwrap().is_empty());
        store.mset(vec![], Duration::from_secs(1)).await.unwrap();

        assert!(store.get_calls().is_empty());
    }

    #[tokio::test]
    async fn primed_failures_are_returned() {
        let store = MemoryCacheStore::new().fail_mget(CacheError::Timeout);
        let key = CacheKey::new("user", "1");

        assert!(matches!(
            store.mget(&[key]).await,
            Err(CacheError::Timeout)
        ));
    }
}
