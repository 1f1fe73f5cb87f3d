//! Storage of products and of the owner details copied onto them.
use async_trait::async_trait;
use common_models::{ProductRecord, ProductStatus, UserRecord};
use common_server::DatabaseError;
use uuid::Uuid;

mod memory;
mod pg;

pub use memory::MemoryProductRepository;
pub use pg::PgProductRepository;

#[derive(Debug, Clone)]
pub struct NewProduct {
    pub name: String,
    pub description: String,
    pub price: f64,
    pub quantity: i32,
    /// Snapshot the owner_* columns are copied from.
    pub owner: UserRecord,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProductUpdate {
    pub name: String,
    pub description: String,
    pub price: f64,
    pub quantity: i32,
    pub status: ProductStatus,
}

#[async_trait]
pub trait ProductRepository: Send + Sync {
    /// New products start `active`.
    async fn create(&self, product: NewProduct) -> Result<ProductRecord, DatabaseError>;

    async fn get(&self, id: Uuid) -> Result<Option<ProductRecord>, DatabaseError>;

    /// Products matching `ids`, in no particular order. Unknown ids are skipped.
    async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<ProductRecord>, DatabaseError>;

    async fn list(&self) -> Result<Vec<ProductRecord>, DatabaseError>;

    /// Apply `update` and bump `updated_at`. `None` when the product does not exist.
    async fn update(
        &self,
        id: Uuid,
        update: ProductUpdate,
    ) -> Result<Option<ProductRecord>, DatabaseError>;

    async fn delete(&self, id: Uuid) -> Result<bool, DatabaseError>;

    /// Copy the owner's name, phone and email onto every product they own, skipping products
    /// already synced from a snapshot at least as recent. Returns the number of products changed.
    async fn apply_owner_change(&self, owner: &UserRecord) -> Result<u64, DatabaseError>;
}
