use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common_models::{ProductRecord, ProductStatus, UserRecord};
use common_server::DatabaseError;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{NewProduct, ProductRepository, ProductUpdate};

struct StoredProduct {
    record: ProductRecord,
    owner_synced_at: DateTime<Utc>,
}

/// Products kept in process memory, with the same owner sync guard as the Postgres repository.
#[derive(Clone, Default)]
pub struct MemoryProductRepository {
    products: Arc<Mutex<HashMap<Uuid, StoredProduct>>>,
    failure: Option<String>,
}

impl MemoryProductRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, reason: &str) -> Self {
        self.failure = Some(reason.to_owned());
        self
    }

    fn check(&self) -> Result<(), DatabaseError> {
        match &self.failure {
            Some(reason) => Err(DatabaseError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ProductRepository for MemoryProductRepository {
    async fn create(&self, product: NewProduct) -> Result<ProductRecord, DatabaseError> {
        self.check()?;
        let now = Utc::now();
        let record = ProductRecord {
            id: Uuid::now_v7(),
            name: product.name,
            description: product.description,
            price: product.price,
            quantity: product.quantity,
            status: ProductStatus::Active,
            owner_id: product.owner.id,
            owner_name: product.owner.full_name(),
            owner_phone: product.owner.phone.clone(),
            owner_email: product.owner.email.clone(),
            created_at: now,
            updated_at: now,
        };

        self.products.lock().await.insert(
            record.id,
            StoredProduct {
                record: record.clone(),
                owner_synced_at: product.owner.updated_at,
            },
        );
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<ProductRecord>, DatabaseError> {
        self.check()?;
        let products = self.products.lock().await;
        Ok(products.get(&id).map(|stored| stored.record.clone()))
    }

    async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<ProductRecord>, DatabaseError> {
        self.check()?;
        let products = self.products.lock().await;
        Ok(products
            .values()
            .filter(|stored| ids.contains(&stored.record.id))
            .map(|stored| stored.record.clone())
            .collect())
    }

    async fn list(&self) -> Result<Vec<ProductRecord>, DatabaseError> {
        self.check()?;
        let products = self.products.lock().await;
        let mut records: Vec<ProductRecord> =
            products.values().map(|stored| stored.record.clone()).collect();
        records.sort_by_key(|record| (record.created_at, record.id));
        Ok(records)
    }

    async fn update(
        &self,
        id: Uuid,
        update: ProductUpdate,
    ) -> Result<Option<ProductRecord>, DatabaseError> {
        self.check()?;
        let mut products = self.products.lock().await;
        let Some(stored) = products.get_mut(&id) else {
            return Ok(None);
        };

        let record = &mut stored.record;
        record.name = update.name;
        record.description = update.description;
        record.price = update.price;
        record.quantity = update.quantity;
        record.status = update.status;
        record.updated_at = Utc::now().max(record.updated_at + chrono::Duration::microseconds(1));
        Ok(Some(record.clone()))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, DatabaseError> {
        self.check()?;
        Ok(self.products.lock().await.remove(&id).is_some())
    }

    async fn apply_owner_change(&self, owner: &UserRecord) -> Result<u64, DatabaseError> {
        self.check()?;
        let mut products = self.products.lock().await;
        let mut changed = 0;

        for stored in products.values_mut() {
            if stored.record.owner_id != owner.id || stored.owner_synced_at >= owner.updated_at {
                continue;
            }
            stored.record.owner_name = owner.full_name();
            stored.record.owner_phone = owner.phone.clone();
            stored.record.owner_email = owner.email.clone();
            stored.owner_synced_at = owner.updated_at;
            changed += 1;
        }
        Ok(changed)
    }
}
