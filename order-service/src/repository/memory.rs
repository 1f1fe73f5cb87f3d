use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common_server::DatabaseError;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::model::{Order, OrderItem, OrderStatus};

use super::{NewOrder, OrderRepository, StatusChange};

struct StoredOrder {
    order: Order,
    /// Parallel to `order.items`.
    product_synced_at: Vec<DateTime<Utc>>,
}

/// Orders kept in process memory, with the same rename guard as the Postgres repository.
#[derive(Clone, Default)]
pub struct MemoryOrderRepository {
    orders: Arc<Mutex<HashMap<Uuid, StoredOrder>>>,
    failure: Option<String>,
}

impl MemoryOrderRepository {
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
impl OrderRepository for MemoryOrderRepository {
    async fn create(&self, order: NewOrder) -> Result<Order, DatabaseError> {
        self.check()?;
        let now = Utc::now();
        let id = Uuid::now_v7();
        let product_synced_at = order.items.iter().map(|item| item.product_synced_at).collect();
        let items = order
            .items
            .into_iter()
            .map(|item| OrderItem {
                id: Uuid::now_v7(),
                order_id: id,
                product_id: item.product_id,
                product_name: item.product_name,
                quantity: item.quantity,
                unit_price: item.unit_price,
                created_at: now,
            })
            .collect();
        let created = Order {
            id,
            user_id: order.user_id,
            status: OrderStatus::Pending,
            total_amount: order.total_amount,
            items,
            created_at: now,
            updated_at: now,
        };

        self.orders.lock().await.insert(
            id,
            StoredOrder {
                order: created.clone(),
                product_synced_at,
            },
        );
        Ok(created)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Order>, DatabaseError> {
        self.check()?;
        let orders = self.orders.lock().await;
        Ok(orders.get(&id).map(|stored| stored.order.clone()))
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Order>, DatabaseError> {
        self.check()?;
        let orders = self.orders.lock().await;
        let mut found: Vec<Order> = orders
            .values()
            .filter(|stored| stored.order.user_id == user_id)
            .map(|stored| stored.order.clone())
            .collect();
        found.sort_by_key(|order| (order.created_at, order.id));
        Ok(found)
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: OrderStatus,
        expected: Option<OrderStatus>,
    ) -> Result<StatusChange, DatabaseError> {
        self.check()?;
        let mut orders = self.orders.lock().await;
        let Some(stored) = orders.get_mut(&id) else {
            return Ok(StatusChange::NotFound);
        };

        let order = &mut stored.order;
        if expected.is_some_and(|expected| expected != order.status) {
            return Ok(StatusChange::Rejected {
                current: order.status,
            });
        }
        order.status = status;
        order.updated_at = Utc::now().max(order.updated_at + chrono::Duration::microseconds(1));
        Ok(StatusChange::Updated(order.clone()))
    }

    async fn rename_product(
        &self,
        product_id: Uuid,
        name: &str,
        synced_at: DateTime<Utc>,
    ) -> Result<u64, DatabaseError> {
        self.check()?;
        let mut orders = self.orders.lock().await;
        let mut changed = 0;

        for stored in orders.values_mut() {
            for (item, item_synced_at) in stored
                .order
                .items
                .iter_mut()
                .zip(stored.product_synced_at.iter_mut())
            {
                if item.product_id != product_id || *item_synced_at >= synced_at {
                    continue;
                }
                item.product_name = name.to_owned();
                *item_synced_at = synced_at;
                changed += 1;
            }
        }
        Ok(changed)
    }
}
