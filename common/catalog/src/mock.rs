use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use crate::{CatalogClient, CatalogEntity, CatalogError};

#[derive(Debug, Clone, PartialEq)]
pub enum MockCatalogCall {
    GetOne(Uuid),
    GetMany(Vec<Uuid>),
}

/// In-process catalog primed with records. `get_many` answers in reverse request order so callers
/// cannot rely on positional alignment.
#[derive(Clone)]
pub struct MockCatalogClient<T> {
    records: HashMap<Uuid, T>,
    failure: Option<String>,
    calls: Arc<Mutex<Vec<MockCatalogCall>>>,
}

impl<T> Default for MockCatalogClient<T> {
    fn default() -> Self {
        Self {
            records: HashMap::new(),
            failure: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: CatalogEntity> MockCatalogClient<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(mut self, record: T) -> Self {
        self.records.insert(record.entity_id(), record);
        self
    }

    /// Every call fails with `CatalogError::Unavailable`.
    pub fn failing(mut self, reason: &str) -> Self {
        self.failure = Some(reason.to_owned());
        self
    }

    pub fn get_calls(&self) -> Vec<MockCatalogCall> {
        match self.calls.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn record_call(&self, call: MockCatalogCall) {
        match self.calls.lock() {
            Ok(mut guard) => guard.push(call),
            Err(poisoned) => poisoned.into_inner().push(call),
        }
    }
}

#[async_trait]
impl<T: CatalogEntity> CatalogClient<T> for MockCatalogClient<T> {
    async fn get_one(&self, id: Uuid) -> Result<T, CatalogError> {
        self.record_call(MockCatalogCall::GetOne(id));
        if let Some(reason) = &self.failure {
            return Err(CatalogError::Unavailable(reason.clone()));
        }
        self.records
            .get(&id)
            .cloned()
            .ok_or(CatalogError::NotFound { kind: T::KIND, id })
    }

    async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<T>, CatalogError> {
        self.record_call(MockCatalogCall::GetMany(ids.to_vec()));
        if let Some(reason) = &self.failure {
            return Err(CatalogError::Unavailable(reason.clone()));
        }
        Ok(ids
            .iter()
            .rev()
            .filter_map(|id| self.records.get(id).cloned())
            .collect())
    }
}
