//! Storage of orders and of the product names copied onto their items.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common_server::DatabaseError;
use uuid::Uuid;

use crate::model::{Order, OrderStatus};

mod memory;
mod pg;

pub use memory::MemoryOrderRepository;
pub use pg::PgOrderRepository;

#[derive(Debug, Clone)]
pub struct NewOrderItem {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: f64,
    /// `updated_at` of the product snapshot `product_name` was copied from.
    pub product_synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: Uuid,
    pub total_amount: f64,
    pub items: Vec<NewOrderItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatusChange {
    Updated(Order),
    NotFound,
    /// The order was not in the expected status and was left untouched.
    Rejected { current: OrderStatus },
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Insert the order as `Pending` together with its items, atomically.
    async fn create(&self, order: NewOrder) -> Result<Order, DatabaseError>;

    async fn get(&self, id: Uuid) -> Result<Option<Order>, DatabaseError>;

    /// Orders placed by `user_id`, oldest first.
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Order>, DatabaseError>;

    /// Set the status, only if the order currently is in `expected` when given.
    async fn update_status(
        &self,
        id: Uuid,
        status: OrderStatus,
        expected: Option<OrderStatus>,
    ) -> Result<StatusChange, DatabaseError>;

    /// Copy a product's new name onto every item referencing it, skipping items already synced
    /// from a snapshot at least as recent as `synced_at`. Returns the number of items changed.
    async fn rename_product(
        &self,
        product_id: Uuid,
        name: &str,
        synced_at: DateTime<Utc>,
    ) -> Result<u64, DatabaseError>;
}
