//! Storage of user accounts.
use async_trait::async_trait;
use common_models::{UserRecord, UserRole};
use common_server::DatabaseError;
use uuid::Uuid;

mod memory;
mod pg;

pub use memory::MemoryUserRepository;
pub use pg::PgUserRepository;

#[derive(Debug, Clone)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub role: UserRole,
}

#[derive(Debug, Clone)]
pub struct UserUpdate {
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub is_active: bool,
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Fails with `DatabaseError::Conflict` when the email is taken.
    async fn create(&self, user: NewUser) -> Result<UserRecord, DatabaseError>;

    async fn get(&self, id: Uuid) -> Result<Option<UserRecord>, DatabaseError>;

    /// Users matching `ids`, in no particular order. Unknown ids are skipped.
    async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<UserRecord>, DatabaseError>;

    async fn list(&self) -> Result<Vec<UserRecord>, DatabaseError>;

    /// Apply `update` and bump `updated_at`. `None` when the user does not exist.
    async fn update(&self, id: Uuid, update: UserUpdate)
        -> Result<Option<UserRecord>, DatabaseError>;

    async fn delete(&self, id: Uuid) -> Result<bool, DatabaseError>;
}
